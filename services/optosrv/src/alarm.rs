//! Threshold alarms with debounce and coming/going mails.
//!
//! One state machine per register, keyed by the register's index in the
//! configured list. A threshold crossing has to persist across more than the
//! configured number of consecutive samples before the "coming" mail goes
//! out, which suppresses single-sample measurement glitches; when the
//! condition clears, a "going" mail follows if and only if a "coming" mail
//! was sent. Dispatch runs on its own spawned task so a slow or failing mail
//! server never delays a sampling pass.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use opto_model::RegisterSpec;

use crate::notify::Notifier;

/// Per-register alarm episode. Exists only while the register is crossing
/// (or has just stopped crossing and the "going" mail is due).
struct AlarmState {
    count: u32,
    notified: bool,
    last_text: String,
}

/// Evaluates completed samples against the configured thresholds.
///
/// Without a notifier the monitor is inert: no state is tracked and nothing
/// is ever dispatched.
pub struct AlarmMonitor {
    notifier: Option<Arc<dyn Notifier>>,
    subject: String,
    active: HashMap<usize, AlarmState>,
}

impl AlarmMonitor {
    pub fn new(notifier: Option<Arc<dyn Notifier>>, subject: impl Into<String>) -> Self {
        Self {
            notifier,
            subject: subject.into(),
            active: HashMap::new(),
        }
    }

    /// Monitor that never tracks or notifies.
    pub fn disabled() -> Self {
        Self::new(None, String::new())
    }

    /// Feed one completed sample. `values` is aligned 1:1 with `registers`.
    ///
    /// Registers are evaluated independently; the evaluation itself is
    /// synchronous and cheap, only notification dispatch is detached.
    pub fn evaluate(&mut self, registers: &[RegisterSpec], values: &[String]) {
        let Some(notifier) = self.notifier.clone() else {
            return;
        };

        for (index, (spec, value)) in registers.iter().zip(values).enumerate() {
            if spec.has_alarm() {
                self.check_register(index, spec, value, &notifier);
            }
        }
    }

    fn check_register(
        &mut self,
        index: usize,
        spec: &RegisterSpec,
        value: &str,
        notifier: &Arc<dyn Notifier>,
    ) {
        match crossing(spec, value) {
            Some((text, delay)) => {
                let state = self.active.entry(index).or_insert(AlarmState {
                    count: 0,
                    notified: false,
                    last_text: String::new(),
                });
                state.count += 1;
                state.last_text = text.clone();
                debug!(
                    register = %spec.column_label(),
                    count = state.count,
                    "alarm condition active"
                );

                if !state.notified && state.count > delay {
                    state.notified = true;
                    dispatch(notifier.clone(), &self.subject, "Coming: ", spec, text);
                }
            }
            None => {
                if let Some(state) = self.active.remove(&index) {
                    debug!(register = %spec.column_label(), "alarm condition cleared");
                    if state.notified {
                        dispatch(
                            notifier.clone(),
                            &self.subject,
                            "Going: ",
                            spec,
                            state.last_text,
                        );
                    }
                }
            }
        }
    }
}

/// Whether `value` crosses a configured threshold. Returns the alarm text
/// and the delay count of the crossed threshold. Non-numeric values never
/// cross.
fn crossing(spec: &RegisterSpec, value: &str) -> Option<(String, u32)> {
    let numeric: f64 = value.trim().parse().ok()?;

    if let Some(hi) = spec.alarm_hi {
        if numeric >= hi {
            let text = format!(
                "{}: value {} at or above limit {}",
                spec.column_label(),
                value,
                hi
            );
            return Some((text, spec.alarm_hi_delay_count));
        }
    }
    if let Some(lo) = spec.alarm_lo {
        if numeric <= lo {
            let text = format!(
                "{}: value {} at or below limit {}",
                spec.column_label(),
                value,
                lo
            );
            return Some((text, spec.alarm_lo_delay_count));
        }
    }
    None
}

/// Fire one notification on its own task. Failures are logged with the
/// register context; the sampling pass has long moved on by then.
fn dispatch(
    notifier: Arc<dyn Notifier>,
    subject: &str,
    prefix: &str,
    spec: &RegisterSpec,
    body: String,
) {
    let subject = format!("{prefix}{subject}");
    let register = spec.column_label();
    tokio::spawn(async move {
        match notifier.send(&subject, &body).await {
            Ok(()) => info!(%register, %subject, "alarm notification sent"),
            Err(e) => warn!(%register, %subject, "failed to send alarm notification: {e}"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use crate::error::Result;

    struct RecordingNotifier {
        sent: mpsc::UnboundedSender<(String, String)>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, subject: &str, body: &str) -> Result<()> {
            self.sent
                .send((subject.to_string(), body.to_string()))
                .expect("test receiver alive");
            Ok(())
        }
    }

    fn monitor() -> (AlarmMonitor, mpsc::UnboundedReceiver<(String, String)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let notifier: Arc<dyn Notifier> = Arc::new(RecordingNotifier { sent: tx });
        (AlarmMonitor::new(Some(notifier), "Heizung Alarm"), rx)
    }

    fn register_with_hi(delay: u32) -> RegisterSpec {
        serde_json::from_value(serde_json::json!({
            "label": "Kesseltemperatur",
            "address": "0x0802",
            "alarm_hi": 95.0,
            "alarm_hi_delay_count": delay,
        }))
        .unwrap()
    }

    fn register_with_lo(delay: u32) -> RegisterSpec {
        serde_json::from_value(serde_json::json!({
            "address": "0x5525",
            "alarm_lo": 5.0,
            "alarm_lo_delay_count": delay,
        }))
        .unwrap()
    }

    fn plain_register() -> RegisterSpec {
        serde_json::from_value(serde_json::json!({ "address": 1 })).unwrap()
    }

    async fn drain(rx: &mut mpsc::UnboundedReceiver<(String, String)>) -> Vec<(String, String)> {
        // Let detached dispatch tasks run to completion.
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        let mut out = Vec::new();
        while let Ok(mail) = rx.try_recv() {
            out.push(mail);
        }
        out
    }

    #[tokio::test]
    async fn test_debounce_fires_coming_on_third_sample() {
        let registers = vec![register_with_hi(2)];
        let (mut monitor, mut rx) = monitor();

        monitor.evaluate(&registers, &[String::from("96.5")]);
        monitor.evaluate(&registers, &[String::from("97")]);
        assert!(drain(&mut rx).await.is_empty());

        monitor.evaluate(&registers, &[String::from("98.1")]);
        let mails = drain(&mut rx).await;
        assert_eq!(mails.len(), 1);
        assert_eq!(mails[0].0, "Coming: Heizung Alarm");
        assert!(mails[0].1.contains("98.1"));
        assert!(mails[0].1.contains("Kesseltemperatur"));
    }

    #[tokio::test]
    async fn test_going_follows_notified_coming() {
        let registers = vec![register_with_hi(2)];
        let (mut monitor, mut rx) = monitor();

        for value in ["96", "97", "98"] {
            monitor.evaluate(&registers, &[value.to_string()]);
        }
        assert_eq!(drain(&mut rx).await.len(), 1);

        monitor.evaluate(&registers, &[String::from("80")]);
        let mails = drain(&mut rx).await;
        assert_eq!(mails.len(), 1);
        assert_eq!(mails[0].0, "Going: Heizung Alarm");
        // The going mail carries the text of the last crossing sample.
        assert!(mails[0].1.contains("98"));
    }

    #[tokio::test]
    async fn test_short_episode_is_swallowed_by_debounce() {
        let registers = vec![register_with_hi(2)];
        let (mut monitor, mut rx) = monitor();

        monitor.evaluate(&registers, &[String::from("96")]);
        monitor.evaluate(&registers, &[String::from("97")]);
        monitor.evaluate(&registers, &[String::from("80")]);
        monitor.evaluate(&registers, &[String::from("96")]);
        monitor.evaluate(&registers, &[String::from("97")]);
        monitor.evaluate(&registers, &[String::from("80")]);

        // Never more than delay_count consecutive crossings: no mail at all,
        // in particular no "going" mail for an unnotified episode.
        assert!(drain(&mut rx).await.is_empty());
    }

    #[tokio::test]
    async fn test_low_threshold_crossing() {
        let registers = vec![register_with_lo(1)];
        let (mut monitor, mut rx) = monitor();

        monitor.evaluate(&registers, &[String::from("4.5")]);
        monitor.evaluate(&registers, &[String::from("3")]);
        let mails = drain(&mut rx).await;
        assert_eq!(mails.len(), 1);
        assert_eq!(mails[0].0, "Coming: Heizung Alarm");
        assert!(mails[0].1.contains("at or below"));
    }

    #[tokio::test]
    async fn test_unconfigured_register_never_notifies() {
        let registers = vec![plain_register()];
        let (mut monitor, mut rx) = monitor();

        for value in ["1", "1000000", "-1000000", "nonsense"] {
            monitor.evaluate(&registers, &[value.to_string()]);
        }
        assert!(drain(&mut rx).await.is_empty());
    }

    #[tokio::test]
    async fn test_non_numeric_value_clears_crossing() {
        let registers = vec![register_with_hi(0)];
        let (mut monitor, mut rx) = monitor();

        monitor.evaluate(&registers, &[String::from("96")]);
        assert_eq!(drain(&mut rx).await.len(), 1);

        // A duration-formatted value is non-numeric: treated as not
        // crossing, which ends the episode with a going mail.
        monitor.evaluate(&registers, &[String::from(" 1:01:01")]);
        let mails = drain(&mut rx).await;
        assert_eq!(mails.len(), 1);
        assert_eq!(mails[0].0, "Going: Heizung Alarm");
    }

    #[tokio::test]
    async fn test_registers_evaluated_independently() {
        let registers = vec![register_with_hi(0), register_with_lo(0)];
        let (mut monitor, mut rx) = monitor();

        monitor.evaluate(
            &registers,
            &[String::from("96"), String::from("3")],
        );
        let mut mails = drain(&mut rx).await;
        mails.sort();
        assert_eq!(mails.len(), 2);
        assert!(mails.iter().all(|(subject, _)| subject == "Coming: Heizung Alarm"));
    }

    #[tokio::test]
    async fn test_disabled_monitor_tracks_nothing() {
        let registers = vec![register_with_hi(0)];
        let mut monitor = AlarmMonitor::disabled();

        monitor.evaluate(&registers, &[String::from("96")]);
        assert!(monitor.active.is_empty());
    }
}
