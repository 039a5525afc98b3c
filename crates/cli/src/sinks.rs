//! Terminal alert sinks: a printed banner for notifications, the terminal bell for the cue.

use airavata::alerts::{AlertCue, Notifier};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub struct TerminalNotifier;

#[async_trait]
impl Notifier for TerminalNotifier {
    async fn notify(&self, title: &str, body: &str, data: &Map<String, Value>) -> anyhow::Result<()> {
        let rule = "=".repeat(title.chars().count().max(body.chars().count()).min(72));
        let mut out = std::io::stdout().lock();
        writeln!(out, "\n{}\n{}\n{}\n{}", rule, title, body, rule)?;
        out.flush()?;
        log::debug!("alert data: {}", Value::Object(data.clone()));
        Ok(())
    }
}

/// Rings the bell once per vibration pulse. Odd entries of the pattern are pulses, even entries
/// are pauses.
#[derive(Default)]
pub struct BellCue {
    stopped: AtomicBool,
}

#[async_trait]
impl AlertCue for BellCue {
    async fn start(&self, pattern: &[u64]) -> anyhow::Result<()> {
        self.stopped.store(false, Ordering::SeqCst);
        for (i, ms) in pattern.iter().enumerate() {
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }
            if i % 2 == 1 {
                let mut out = std::io::stdout().lock();
                write!(out, "\x07")?;
                out.flush()?;
            }
            tokio::time::sleep(Duration::from_millis(*ms)).await;
        }
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}
