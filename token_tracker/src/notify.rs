/// notify.rs — Notification sink boundary
///
/// Alerts leave the engine as `AlertEvent`s.  A sink turns each one into a
/// message for its user and delivers it; `format_alert` is the shared text
/// layout.
use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::models::{AlertEvent, Direction};

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, alert: &AlertEvent) -> Result<()>;
}

/// Render an alert as the user-facing message.
pub fn format_alert(alert: &AlertEvent) -> String {
    let emoji = if alert.period_change_pct > 0.0 { "📈" } else { "📉" };
    let rule = match alert.direction_used {
        Direction::Both => format!("±{}%", alert.threshold_used),
        Direction::Positive => format!("+{}% (rises only)", alert.threshold_used),
        Direction::Negative => format!("-{}% (drops only)", alert.threshold_used),
    };
    format!(
        "🚨 {emoji} Price Alert!\n\
         Token: {token}\n\
         Price Change: {period:+.2}%\n\
         Old Price: ${old:.8}\n\
         New Price: ${new:.8}\n\
         Entry Price: ${entry:.8}\n\
         Total Change: {total:+.2}%\n\
         Threshold: {rule}\n\
         Time: {time}",
        token  = alert.token_id.short(),
        period = alert.period_change_pct,
        old    = alert.previous_price,
        new    = alert.current_price,
        entry  = alert.entry_price,
        total  = alert.total_change_pct,
        time   = alert.observed_at.format("%Y-%m-%d %H:%M:%S UTC"),
    )
}

/// Delivers every alert, in order, logging the ones that fail.
/// Returns the number delivered.
pub async fn deliver_all(sink: &dyn NotificationSink, alerts: &[AlertEvent]) -> usize {
    let mut delivered = 0;
    for alert in alerts {
        match sink.deliver(alert).await {
            Ok(()) => delivered += 1,
            Err(e) => warn!("Failed to notify {} about {}: {e:#}", alert.user_id, alert.token_id),
        }
    }
    delivered
}

/// Writes alerts to the log.  Used when no chat front-end is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, alert: &AlertEvent) -> Result<()> {
        info!(target: "notify", user = %alert.user_id, "\n{}", format_alert(alert));
        Ok(())
    }
}
