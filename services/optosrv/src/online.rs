//! Connectivity checker.
//!
//! Each configured entry runs its own loop: GET the URL, and when the target
//! answers at all, append one strftime-formatted line to its log file. The
//! same pacing arithmetic as the poll loop, with a one-second guard. A check
//! failure is a debug-level event, never an error; unreachable targets are
//! the whole point of keeping this log.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use opto_model::OnlineCheckEntry;

use crate::sink::LogSink;

/// Pacing remainders below this guard wait a full interval.
const PACING_GUARD: Duration = Duration::from_secs(1);

/// Runs all configured connectivity checks until cancelled.
pub struct OnlineCheck {
    entries: Vec<OnlineCheckEntry>,
    sink: Arc<dyn LogSink>,
    cancel: CancellationToken,
}

impl OnlineCheck {
    pub fn new(
        entries: Vec<OnlineCheckEntry>,
        sink: Arc<dyn LogSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            entries,
            sink,
            cancel,
        }
    }

    pub async fn run(self) {
        let client = reqwest::Client::new();
        let mut tasks = Vec::with_capacity(self.entries.len());
        for entry in self.entries {
            info!(url = %entry.url, interval = entry.interval_secs, "online check starting");
            tasks.push(tokio::spawn(check_entry(
                client.clone(),
                entry,
                self.sink.clone(),
                self.cancel.clone(),
            )));
        }
        for task in tasks {
            let _ = task.await;
        }
    }
}

async fn check_entry(
    client: reqwest::Client,
    entry: OnlineCheckEntry,
    sink: Arc<dyn LogSink>,
    cancel: CancellationToken,
) {
    let interval = Duration::from_secs(entry.interval_secs);
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let started = Instant::now();
        if is_online(&client, &entry.url).await {
            let now = Local::now();
            let folder = now.format(&entry.folder).to_string();
            let file = now.format(&entry.file_pattern).to_string();
            let line = format!("{}\n", now.format(&entry.log_pattern));
            if let Err(e) = sink.append(&folder, &file, &line).await {
                warn!(url = %entry.url, "failed to append online check line: {e}");
            }
        }

        let wait = match interval.checked_sub(started.elapsed()) {
            Some(rest) if rest >= PACING_GUARD => rest,
            _ => interval,
        };
        tokio::select! {
            () = cancel.cancelled() => break,
            () = sleep(wait) => {}
        }
    }
    debug!(url = %entry.url, "online check stopped");
}

async fn is_online(client: &reqwest::Client, url: &str) -> bool {
    match client.get(url).send().await {
        Ok(_) => {
            debug!(url, "online");
            true
        }
        Err(e) => {
            debug!(url, "offline: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::error::Result;

    #[derive(Default)]
    struct MemorySink {
        files: Mutex<HashMap<(String, String), String>>,
    }

    #[async_trait]
    impl LogSink for MemorySink {
        async fn exists(&self, folder: &str, file: &str) -> bool {
            self.files
                .lock()
                .unwrap()
                .contains_key(&(folder.to_string(), file.to_string()))
        }

        async fn append(&self, folder: &str, file: &str, text: &str) -> Result<()> {
            self.files
                .lock()
                .unwrap()
                .entry((folder.to_string(), file.to_string()))
                .or_default()
                .push_str(text);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_reachable_target_appends_line() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket
                        .write_all(
                            b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                        )
                        .await;
                });
            }
        });

        let sink = Arc::new(MemorySink::default());
        let cancel = CancellationToken::new();
        let entry = OnlineCheckEntry {
            url: format!("http://{addr}/"),
            interval_secs: 3600,
            folder: String::new(),
            file_pattern: "online.log".to_string(),
            log_pattern: "%H:%M:%S online".to_string(),
        };

        let check = OnlineCheck::new(vec![entry], sink.clone(), cancel.clone());
        let handle = tokio::spawn(check.run());

        // The first check fires immediately; wait for its line to land.
        for _ in 0..500 {
            if !sink.files.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();
        let _ = handle.await;

        let files = sink.files.lock().unwrap();
        let content = files
            .get(&(String::new(), "online.log".to_string()))
            .expect("one online line");
        assert!(content.ends_with("online\n"));
    }
}
