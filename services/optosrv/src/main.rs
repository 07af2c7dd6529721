//! Heating-link polling service.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use optosrv::alarm::AlarmMonitor;
use optosrv::bootstrap::{self, Args};
use optosrv::link::SerialLink;
use optosrv::notify::{Notifier, SmtpNotifier};
use optosrv::online::OnlineCheck;
use optosrv::poll::PollLoop;
use optosrv::sink::{FileLogSink, LogSink};
use optosrv::web::{self, ToggleState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = bootstrap::init_logging(&args);

    let config = opto_model::config::load(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;
    if args.validate {
        info!("configuration is valid");
        return Ok(());
    }
    info!(devices = config.devices.len(), "configuration loaded");

    let cancel = CancellationToken::new();
    let sink: Arc<dyn LogSink> = Arc::new(FileLogSink::new(&args.data_dir));

    let mut tasks = Vec::new();

    for device_config in &config.devices {
        let notifier: Option<Arc<dyn Notifier>> = match &device_config.alarm_smtp {
            Some(smtp) => {
                let notifier = SmtpNotifier::from_config(smtp).with_context(|| {
                    format!("building SMTP notifier for {}", device_config.device)
                })?;
                info!(device = %device_config.device, server = %smtp.server, "alarm mails enabled");
                Some(Arc::new(notifier))
            }
            None => {
                info!(device = %device_config.device, "no alarm transport configured, alarms disabled");
                None
            }
        };
        let subject = device_config
            .alarm_smtp
            .as_ref()
            .map(|smtp| smtp.subject.clone())
            .unwrap_or_default();

        let device_config = Arc::new(device_config.clone());
        info!(
            device = %device_config.device,
            registers = device_config.registers.len(),
            interval = device_config.interval_secs,
            "starting poll loop"
        );
        let poll = PollLoop::new(
            device_config.clone(),
            sink.clone(),
            AlarmMonitor::new(notifier, subject),
            cancel.clone(),
        );
        let device = device_config.device.clone();
        tasks.push(tokio::spawn(
            poll.run(move || SerialLink::open(&device)),
        ));
    }

    if !config.online_checks.is_empty() {
        let check = OnlineCheck::new(config.online_checks.clone(), sink.clone(), cancel.clone());
        tasks.push(tokio::spawn(check.run()));
    }

    if let Some(web_config) = config.web.clone() {
        let token = cancel.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = web::serve(web_config, ToggleState::default(), token).await {
                error!("toggle page failed: {e}");
            }
        }));
    }

    bootstrap::wait_for_shutdown().await;
    info!("shutdown signal received");
    cancel.cancel();
    for task in tasks {
        let _ = task.await;
    }
    info!("all tasks stopped");

    Ok(())
}
