use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::PaymentConfig;
use crate::models::{GatewayKind, PaymentStatus};

pub mod paypal;
pub mod paystack;
pub mod stripe;

/// Failure reported by a provider or the transport underneath it. Providers
/// convert every error at this boundary; nothing panics and no raw transport
/// error escapes past it.
#[derive(Debug, Clone, Error)]
#[error("{message}: {detail}")]
pub struct GatewayError {
    pub message: String,
    pub detail: String,
}

impl GatewayError {
    pub fn new(message: impl Into<String>, detail: impl ToString) -> Self {
        Self {
            message: message.into(),
            detail: detail.to_string(),
        }
    }
}

/// Everything a provider needs to talk to its API, detached from the ORM
/// models so providers stay persistence-agnostic.
#[derive(Debug, Clone)]
pub struct PaymentDetails {
    pub payment_id: Uuid,
    pub order_id: Uuid,
    /// Minor units (cents / kobo).
    pub amount: i64,
    pub currency: String,
    pub transaction_id: Option<String>,
    /// PayPal capture id, read back from payment metadata for refunds.
    pub capture_id: Option<String>,
    pub customer_email: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct InitiateResponse {
    pub reference: String,
    pub gateway: &'static str,
    /// Provider-specific client fields (client secret, approval url, ...).
    #[schema(value_type = Object)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct VerifyResponse {
    pub status: PaymentStatus,
    pub transaction_id: String,
    pub amount: i64,
    #[schema(value_type = Object)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RefundResponse {
    pub refund_id: String,
    pub amount: i64,
}

/// Contract every payment provider implements. Operations perform outbound
/// network calls and must map provider failures into `GatewayError` rather
/// than returning transport errors or panicking.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn initiate(&self, details: &PaymentDetails) -> Result<InitiateResponse, GatewayError>;

    async fn verify(&self, reference: &str) -> Result<VerifyResponse, GatewayError>;

    /// Refund; `amount` in minor units, `None` means full refund.
    async fn refund(
        &self,
        details: &PaymentDetails,
        amount: Option<i64>,
    ) -> Result<RefundResponse, GatewayError>;

    /// Canonical status for a reference; verification failures map to failed.
    async fn status(&self, reference: &str) -> PaymentStatus {
        match self.verify(reference).await {
            Ok(result) => result.status,
            Err(_) => PaymentStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GatewayOption {
    pub value: String,
    pub label: String,
    pub currency: String,
}

/// Provider registry keyed by the closed gateway enum; built once at startup
/// from configuration. Every enum value has an entry, so lookups cannot miss
/// for well-formed input.
pub struct Gateways {
    providers: HashMap<GatewayKind, Arc<dyn PaymentProvider>>,
    options: Vec<GatewayOption>,
}

impl Gateways {
    pub fn from_config(config: &PaymentConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.gateway_timeout)
            .build()?;

        let mut providers: HashMap<GatewayKind, Arc<dyn PaymentProvider>> = HashMap::new();
        providers.insert(
            GatewayKind::Stripe,
            Arc::new(stripe::StripeGateway::new(config.stripe.clone(), http.clone())),
        );
        providers.insert(
            GatewayKind::Paypal,
            Arc::new(paypal::PaypalGateway::new(config.paypal.clone(), http.clone())),
        );
        providers.insert(
            GatewayKind::Paystack,
            Arc::new(paystack::PaystackGateway::new(config.paystack.clone(), http)),
        );

        let options = GatewayKind::ALL
            .into_iter()
            .filter(|kind| match kind {
                GatewayKind::Stripe => config.stripe.enabled,
                GatewayKind::Paypal => config.paypal.enabled,
                GatewayKind::Paystack => config.paystack.enabled,
            })
            .map(|kind| GatewayOption {
                value: kind.as_str().to_string(),
                label: kind.label().to_string(),
                currency: match kind {
                    GatewayKind::Stripe => config.stripe.currency.clone(),
                    GatewayKind::Paypal => config.paypal.currency.clone(),
                    GatewayKind::Paystack => config.paystack.currency.clone(),
                },
            })
            .collect();

        Ok(Self { providers, options })
    }

    pub fn provider(&self, kind: GatewayKind) -> Option<Arc<dyn PaymentProvider>> {
        self.providers.get(&kind).cloned()
    }

    /// Enabled gateways in declaration order.
    pub fn available(&self) -> &[GatewayOption] {
        &self.options
    }

    /// Replace a provider; integration tests use this to inject fakes.
    pub fn set_provider(&mut self, kind: GatewayKind, provider: Arc<dyn PaymentProvider>) {
        self.providers.insert(kind, provider);
    }
}

/// Render minor units as a major-unit decimal string ("200.00").
pub(crate) fn format_major(amount: i64) -> String {
    format!("{}.{:02}", amount / 100, amount % 100)
}

/// Parse a major-unit decimal string back into minor units.
pub(crate) fn parse_major(value: &str) -> Option<i64> {
    let (whole, frac) = match value.split_once('.') {
        Some((w, f)) => (w, f),
        None => (value, ""),
    };
    let whole: i64 = whole.parse().ok()?;
    let cents: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().ok()? * 10,
        2 => frac.parse().ok()?,
        _ => return None,
    };
    Some(whole * 100 + cents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn major_unit_formatting() {
        assert_eq!(format_major(20000), "200.00");
        assert_eq!(format_major(105), "1.05");
        assert_eq!(format_major(50), "0.50");
    }

    #[test]
    fn major_unit_parsing() {
        assert_eq!(parse_major("200.00"), Some(20000));
        assert_eq!(parse_major("1.05"), Some(105));
        assert_eq!(parse_major("3.5"), Some(350));
        assert_eq!(parse_major("42"), Some(4200));
        assert_eq!(parse_major("1.005"), None);
        assert_eq!(parse_major("abc"), None);
    }

    #[test]
    fn registry_lists_only_enabled_gateways_in_declaration_order() {
        let mut config = PaymentConfig::default();
        config.stripe.enabled = true;
        config.paystack.enabled = true;

        let gateways = Gateways::from_config(&config).expect("registry");
        let values: Vec<&str> = gateways
            .available()
            .iter()
            .map(|o| o.value.as_str())
            .collect();
        assert_eq!(values, ["stripe", "paystack"]);
    }

    #[test]
    fn registry_resolves_every_gateway_kind() {
        let gateways = Gateways::from_config(&PaymentConfig::default()).expect("registry");
        for kind in GatewayKind::ALL {
            assert!(gateways.provider(kind).is_some());
        }
    }
}
