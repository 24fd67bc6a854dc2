// =============================================================================
// Notifier — best-effort push channel for heartbeat events
// =============================================================================
//
// Delivery is fire-and-forget: a failed send is logged and never propagated
// into the tick path.
// =============================================================================

use async_trait::async_trait;
use tracing::{debug, info, warn};

/// Best-effort notification sink. Safe for concurrent calls from multiple
/// watchers.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str);
}

// ---------------------------------------------------------------------------
// Telegram
// ---------------------------------------------------------------------------

/// Telegram bot channel using the sendMessage API.
pub struct TelegramNotifier {
    http: reqwest::Client,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    /// Build from `TELEGRAM_BOT_TOKEN` / `TELEGRAM_CHAT_ID`. Returns `None`
    /// when either is unset so the caller can fall back to log-only.
    pub fn from_env() -> Option<Self> {
        let token = std::env::var("TELEGRAM_BOT_TOKEN").ok()?;
        let chat_id = std::env::var("TELEGRAM_CHAT_ID").ok()?;
        if token.trim().is_empty() || chat_id.trim().is_empty() {
            return None;
        }
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .ok()?;
        info!("telegram notifier configured");
        Some(Self { http, token, chat_id })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, text: &str) {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);
        let payload = serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
        });

        match self.http.post(&url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(len = text.len(), "telegram notification sent");
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "telegram notification rejected");
            }
            Err(e) => {
                warn!(error = %e, "telegram notification failed");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Log-only fallback
// ---------------------------------------------------------------------------

/// Fallback notifier that writes events to the log stream only.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, text: &str) {
        info!(notification = text, "heartbeat event");
    }
}
