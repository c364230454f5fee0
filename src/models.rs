use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub sku: String,
    /// Price in minor units (cents).
    pub price: i64,
    pub stock_quantity: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub total_amount: i64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    /// Price snapshot taken at order time; never re-read from the product.
    pub unit_price: i64,
    pub subtotal: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub transaction_id: Option<String>,
    pub gateway: GatewayKind,
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    #[schema(value_type = Object)]
    pub metadata: Option<Value>,
    pub paid_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Order lifecycle. Transitions are validated here, not at call sites:
/// every status write goes through [`OrderStatus::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    Completed,
    Cancelled,
    Failed,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Failed => "failed",
            OrderStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "processing" => Some(OrderStatus::Processing),
            "completed" => Some(OrderStatus::Completed),
            "cancelled" => Some(OrderStatus::Cancelled),
            "failed" => Some(OrderStatus::Failed),
            "refunded" => Some(OrderStatus::Refunded),
            _ => None,
        }
    }

    pub fn can_be_cancelled(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Processing)
    }

    pub fn can_be_refunded(&self) -> bool {
        matches!(self, OrderStatus::Completed)
    }

    pub fn is_final(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed
                | OrderStatus::Cancelled
                | OrderStatus::Failed
                | OrderStatus::Refunded
        )
    }

    /// Allowed next states. A processing order whose payment is refunded in
    /// full moves straight to refunded without passing through completed.
    pub fn next_statuses(&self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::Pending => &[OrderStatus::Processing, OrderStatus::Cancelled],
            OrderStatus::Processing => &[
                OrderStatus::Completed,
                OrderStatus::Failed,
                OrderStatus::Cancelled,
                OrderStatus::Refunded,
            ],
            OrderStatus::Completed => &[OrderStatus::Refunded],
            OrderStatus::Cancelled | OrderStatus::Failed | OrderStatus::Refunded => &[],
        }
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        self.next_statuses().contains(&next)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical payment status vocabulary; provider-native statuses are mapped
/// onto this set at the gateway boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Refunded,
    PartiallyRefunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::PartiallyRefunded => "partially_refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "processing" => Some(PaymentStatus::Processing),
            "completed" => Some(PaymentStatus::Completed),
            "failed" => Some(PaymentStatus::Failed),
            "refunded" => Some(PaymentStatus::Refunded),
            "partially_refunded" => Some(PaymentStatus::PartiallyRefunded),
            _ => None,
        }
    }

    pub fn is_successful(&self) -> bool {
        matches!(self, PaymentStatus::Completed)
    }

    pub fn can_be_refunded(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Completed | PaymentStatus::PartiallyRefunded
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed set of supported payment providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GatewayKind {
    Stripe,
    Paypal,
    Paystack,
}

impl GatewayKind {
    /// Declaration order; gateway listings preserve it.
    pub const ALL: [GatewayKind; 3] =
        [GatewayKind::Stripe, GatewayKind::Paypal, GatewayKind::Paystack];

    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayKind::Stripe => "stripe",
            GatewayKind::Paypal => "paypal",
            GatewayKind::Paystack => "paystack",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stripe" => Some(GatewayKind::Stripe),
            "paypal" => Some(GatewayKind::Paypal),
            "paystack" => Some(GatewayKind::Paystack),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            GatewayKind::Stripe => "Stripe",
            GatewayKind::Paypal => "PayPal",
            GatewayKind::Paystack => "Paystack",
        }
    }
}

impl fmt::Display for GatewayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_status_round_trips_through_strings() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Processing,
            OrderStatus::Completed,
            OrderStatus::Cancelled,
            OrderStatus::Failed,
            OrderStatus::Refunded,
        ] {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::parse("shipped"), None);
    }

    #[test]
    fn final_states_admit_no_transitions() {
        for status in [
            OrderStatus::Cancelled,
            OrderStatus::Failed,
            OrderStatus::Refunded,
        ] {
            assert!(status.is_final());
            assert!(status.next_statuses().is_empty());
        }
        // Completed is final but may still be refunded.
        assert!(OrderStatus::Completed.is_final());
        assert_eq!(
            OrderStatus::Completed.next_statuses(),
            &[OrderStatus::Refunded]
        );
    }

    #[test]
    fn pending_order_transitions() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Processing));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Completed));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Refunded));
    }

    #[test]
    fn processing_order_can_be_refunded_after_full_payment_refund() {
        assert!(OrderStatus::Processing.can_transition_to(OrderStatus::Refunded));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Refunded));
    }

    #[test]
    fn cancellation_and_refund_windows() {
        assert!(OrderStatus::Pending.can_be_cancelled());
        assert!(OrderStatus::Processing.can_be_cancelled());
        assert!(!OrderStatus::Completed.can_be_cancelled());
        assert!(OrderStatus::Completed.can_be_refunded());
        assert!(!OrderStatus::Pending.can_be_refunded());
    }

    #[test]
    fn payment_refund_window() {
        assert!(PaymentStatus::Completed.can_be_refunded());
        assert!(PaymentStatus::PartiallyRefunded.can_be_refunded());
        assert!(!PaymentStatus::Pending.can_be_refunded());
        assert!(!PaymentStatus::Refunded.can_be_refunded());
        assert!(!PaymentStatus::Failed.can_be_refunded());
    }

    #[test]
    fn gateway_kind_parse_matches_declaration() {
        for kind in GatewayKind::ALL {
            assert_eq!(GatewayKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(GatewayKind::parse("square"), None);
    }
}
