use async_trait::async_trait;

use crate::models::{Order, Payment};

/// Post-commit notification sink. Implementations must never block the
/// caller on delivery and must never fail it; a lost notification is logged
/// and dropped, not retried inline.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn order_confirmation(&self, order: &Order, email: Option<&str>);
    async fn payment_success(&self, payment: &Payment, email: Option<&str>);
}

/// Default sink that records the enqueue intent in the log stream. Stands in
/// for a mail relay; swapping in a real transport only touches this type.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn order_confirmation(&self, order: &Order, email: Option<&str>) {
        tracing::info!(
            order_id = %order.id,
            total_amount = order.total_amount,
            email = email.unwrap_or("-"),
            "order confirmation queued"
        );
    }

    async fn payment_success(&self, payment: &Payment, email: Option<&str>) {
        tracing::info!(
            payment_id = %payment.id,
            order_id = %payment.order_id,
            email = email.unwrap_or("-"),
            "payment success notification queued"
        );
    }
}
