//! Notification sink seam
//!
//! Outcome notifications are fire-and-forget: the engine never blocks on (or
//! fails because of) delivery. The default [`LogNotifier`] just traces the
//! event; the bot/transport layer plugs in its own sink.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use membergate_shared::RejectReason;

/// Events emitted to the user-facing layer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PaymentEvent {
    PaymentApproved {
        payment_id: Uuid,
        amount: Decimal,
        tx_hash: String,
    },
    PaymentRejected {
        payment_id: Uuid,
        reason: RejectReason,
    },
    PaymentEscalated {
        payment_id: Uuid,
        reason: RejectReason,
    },
    SubscriptionCreated {
        subscription_id: i64,
        category_id: Option<i32>,
        end_date: Option<OffsetDateTime>,
    },
    SubscriptionExtended {
        subscription_id: i64,
        category_id: Option<i32>,
        end_date: Option<OffsetDateTime>,
    },
}

/// Delivery seam for outcome notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, user_id: i64, event: PaymentEvent);
}

/// Default sink: structured log lines only.
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify(&self, user_id: i64, event: PaymentEvent) {
        tracing::info!(user_id = user_id, event = ?event, "Payment notification");
    }
}

/// Dispatch without blocking the caller on delivery.
pub fn dispatch(sink: &Arc<dyn NotificationSink>, user_id: i64, event: PaymentEvent) {
    let sink = Arc::clone(sink);
    tokio::spawn(async move {
        sink.notify(user_id, event).await;
    });
}
