use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use crate::config::StripeConfig;
use crate::models::PaymentStatus;

use super::{
    GatewayError, InitiateResponse, PaymentDetails, PaymentProvider, RefundResponse,
    VerifyResponse,
};

const API_URL: &str = "https://api.stripe.com/v1";

/// Card-processor style gateway: amounts are posted in cents and the client
/// finishes the flow with a client secret.
pub struct StripeGateway {
    config: StripeConfig,
    http: Client,
}

impl StripeGateway {
    pub fn new(config: StripeConfig, http: Client) -> Self {
        Self { config, http }
    }
}

#[async_trait]
impl PaymentProvider for StripeGateway {
    fn name(&self) -> &'static str {
        "stripe"
    }

    async fn initiate(&self, details: &PaymentDetails) -> Result<InitiateResponse, GatewayError> {
        let response = self
            .http
            .post(format!("{API_URL}/payment_intents"))
            .basic_auth(&self.config.secret_key, Some(""))
            .form(&[
                ("amount", details.amount.to_string()),
                ("currency", details.currency.to_lowercase()),
                ("description", format!("Order #{}", details.order_id)),
                ("metadata[order_id]", details.order_id.to_string()),
                ("metadata[payment_id]", details.payment_id.to_string()),
            ])
            .send()
            .await
            .map_err(|err| {
                tracing::error!(payment_id = %details.payment_id, error = %err, "stripe initiation failed");
                GatewayError::new("Payment initiation failed", err)
            })?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(payment_id = %details.payment_id, body = %body, "stripe initiation rejected");
            return Err(GatewayError::new(
                "Payment initiation failed",
                format!("stripe api error: {body}"),
            ));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|err| GatewayError::new("Payment initiation failed", err))?;

        let reference = data["id"]
            .as_str()
            .ok_or_else(|| GatewayError::new("Payment initiation failed", "missing intent id"))?
            .to_string();

        Ok(InitiateResponse {
            reference,
            gateway: self.name(),
            params: json!({
                "client_secret": data["client_secret"],
                "public_key": self.config.public_key,
            }),
        })
    }

    async fn verify(&self, reference: &str) -> Result<VerifyResponse, GatewayError> {
        let response = self
            .http
            .get(format!("{API_URL}/payment_intents/{reference}"))
            .basic_auth(&self.config.secret_key, Some(""))
            .send()
            .await
            .map_err(|err| {
                tracing::error!(reference, error = %err, "stripe verification failed");
                GatewayError::new("Payment verification failed", err)
            })?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(reference, body = %body, "stripe verification rejected");
            return Err(GatewayError::new(
                "Payment verification failed",
                format!("stripe api error: {body}"),
            ));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|err| GatewayError::new("Payment verification failed", err))?;

        let transaction_id = data["id"]
            .as_str()
            .ok_or_else(|| GatewayError::new("Payment verification failed", "missing intent id"))?
            .to_string();

        Ok(VerifyResponse {
            status: map_stripe_status(data["status"].as_str().unwrap_or_default()),
            transaction_id,
            amount: data["amount"].as_i64().unwrap_or(0),
            metadata: data["metadata"].clone(),
        })
    }

    async fn refund(
        &self,
        details: &PaymentDetails,
        amount: Option<i64>,
    ) -> Result<RefundResponse, GatewayError> {
        let transaction_id = details
            .transaction_id
            .as_deref()
            .ok_or_else(|| GatewayError::new("Refund failed", "payment has no transaction id"))?;
        let refund_amount = amount.unwrap_or(details.amount);

        let response = self
            .http
            .post(format!("{API_URL}/refunds"))
            .basic_auth(&self.config.secret_key, Some(""))
            .form(&[
                ("payment_intent", transaction_id.to_string()),
                ("amount", refund_amount.to_string()),
            ])
            .send()
            .await
            .map_err(|err| {
                tracing::error!(payment_id = %details.payment_id, error = %err, "stripe refund failed");
                GatewayError::new("Refund failed", err)
            })?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(payment_id = %details.payment_id, body = %body, "stripe refund rejected");
            return Err(GatewayError::new(
                "Refund failed",
                format!("stripe api error: {body}"),
            ));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|err| GatewayError::new("Refund failed", err))?;

        let refund_id = data["id"]
            .as_str()
            .ok_or_else(|| GatewayError::new("Refund failed", "missing refund id"))?
            .to_string();

        Ok(RefundResponse {
            refund_id,
            amount: refund_amount,
        })
    }
}

/// Stripe intent statuses onto the canonical vocabulary; anything
/// unrecognized fails closed.
fn map_stripe_status(status: &str) -> PaymentStatus {
    match status {
        "succeeded" => PaymentStatus::Completed,
        "processing" => PaymentStatus::Processing,
        "requires_payment_method" | "requires_confirmation" | "requires_action" => {
            PaymentStatus::Pending
        }
        _ => PaymentStatus::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stripe_status_mapping() {
        assert_eq!(map_stripe_status("succeeded"), PaymentStatus::Completed);
        assert_eq!(map_stripe_status("processing"), PaymentStatus::Processing);
        assert_eq!(
            map_stripe_status("requires_payment_method"),
            PaymentStatus::Pending
        );
        assert_eq!(
            map_stripe_status("requires_confirmation"),
            PaymentStatus::Pending
        );
        assert_eq!(map_stripe_status("requires_action"), PaymentStatus::Pending);
    }

    #[test]
    fn unknown_stripe_status_fails_closed() {
        assert_eq!(map_stripe_status("canceled"), PaymentStatus::Failed);
        assert_eq!(map_stripe_status(""), PaymentStatus::Failed);
        assert_eq!(map_stripe_status("some_new_status"), PaymentStatus::Failed);
    }
}
