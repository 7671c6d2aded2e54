//! Notifier (ambient, spec §9 Design Notes).
//!
//! Generalizes the teacher's per-opportunity `Monitor` (profit/loss stats,
//! Telegram alerts keyed to one arbitrage contract) into a job-lifecycle
//! notifier: completion/failure alerts plus a running counters snapshot,
//! using the same `reqwest` Telegram bot API call the teacher makes.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub jobs_started: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub start_time: Option<std::time::Instant>,
}

pub struct Notifier {
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    start_time: std::time::Instant,
    telegram_bot_token: Option<String>,
    telegram_chat_id: Option<String>,
    http_client: reqwest::Client,
}

impl Notifier {
    pub fn new(telegram_bot_token: Option<String>, telegram_chat_id: Option<String>) -> Self {
        Self {
            started: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            start_time: std::time::Instant::now(),
            telegram_bot_token,
            telegram_chat_id,
            http_client: reqwest::Client::new(),
        }
    }

    pub fn record_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn notify_job_completed(&self, job_id: i64, done: i64, failed: i64) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        info!("job #{} completed ({} done, {} failed)", job_id, done, failed);
    }

    pub async fn notify_job_failed(&self, job_id: i64, reason: String) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        let msg = format!("job #{} failed: {}", job_id, reason);
        warn!("{}", msg);
        self.send_telegram(&msg).await;
    }

    /// Alerts on systemic conditions the engine detects outside any single
    /// job - e.g. the RPC pool entering degraded mode.
    pub async fn notify_systemic(&self, message: &str) {
        warn!("systemic alert: {}", message);
        self.send_telegram(&format!("⚠️ {message}")).await;
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            jobs_started: self.started.load(Ordering::Relaxed),
            jobs_completed: self.completed.load(Ordering::Relaxed),
            jobs_failed: self.failed.load(Ordering::Relaxed),
            start_time: Some(self.start_time),
        }
    }

    async fn send_telegram(&self, message: &str) {
        if let (Some(token), Some(chat_id)) = (&self.telegram_bot_token, &self.telegram_chat_id) {
            let url = format!("https://api.telegram.org/bot{token}/sendMessage");
            let params = serde_json::json!({
                "chat_id": chat_id,
                "text": message,
                "parse_mode": "HTML"
            });

            if let Err(e) = self.http_client.post(&url).json(&params).send().await {
                warn!("failed to send Telegram alert: {:?}", e);
            }
        }
    }

    pub async fn send_startup_message(&self) {
        let msg = "job engine started";
        info!("{}", msg);
        self.send_telegram(msg).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_start_at_zero() {
        let notifier = Notifier::new(None, None);
        let stats = notifier.stats();
        assert_eq!(stats.jobs_started, 0);
        assert_eq!(stats.jobs_completed, 0);
        assert_eq!(stats.jobs_failed, 0);
    }
}
