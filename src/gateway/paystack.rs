use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::config::PaystackConfig;
use crate::models::PaymentStatus;

use super::{
    GatewayError, InitiateResponse, PaymentDetails, PaymentProvider, RefundResponse,
    VerifyResponse,
};

const API_URL: &str = "https://api.paystack.co";

/// Regional-processor style gateway: bearer-token API with a `{status, data}`
/// envelope; amounts are in kobo and the transaction is keyed by a reference
/// we generate up front.
pub struct PaystackGateway {
    config: PaystackConfig,
    http: Client,
}

impl PaystackGateway {
    pub fn new(config: PaystackConfig, http: Client) -> Self {
        Self { config, http }
    }
}

#[async_trait]
impl PaymentProvider for PaystackGateway {
    fn name(&self) -> &'static str {
        "paystack"
    }

    async fn initiate(&self, details: &PaymentDetails) -> Result<InitiateResponse, GatewayError> {
        let email = details.customer_email.as_deref().ok_or_else(|| {
            GatewayError::new("Payment initiation failed", "customer email required")
        })?;
        let reference = format!("PSK_{}", Uuid::new_v4().simple());

        let response = self
            .http
            .post(format!("{API_URL}/transaction/initialize"))
            .bearer_auth(&self.config.secret_key)
            .json(&json!({
                "amount": details.amount,
                "email": email,
                "currency": details.currency,
                "reference": reference,
                "metadata": {
                    "order_id": details.order_id,
                    "payment_id": details.payment_id,
                },
            }))
            .send()
            .await
            .map_err(|err| {
                tracing::error!(payment_id = %details.payment_id, error = %err, "paystack initiation failed");
                GatewayError::new("Payment initiation failed", err)
            })?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(payment_id = %details.payment_id, body = %body, "paystack initiation rejected");
            return Err(GatewayError::new(
                "Payment initiation failed",
                format!("paystack api error: {body}"),
            ));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| GatewayError::new("Payment initiation failed", err))?;

        if body["status"] != true {
            return Err(GatewayError::new(
                "Payment initiation failed",
                format!("paystack api error: {}", body["message"]),
            ));
        }

        let data = &body["data"];
        let reference = data["reference"]
            .as_str()
            .unwrap_or(&reference)
            .to_string();

        Ok(InitiateResponse {
            reference,
            gateway: self.name(),
            params: json!({
                "authorization_url": data["authorization_url"],
                "access_code": data["access_code"],
                "public_key": self.config.public_key,
            }),
        })
    }

    async fn verify(&self, reference: &str) -> Result<VerifyResponse, GatewayError> {
        let response = self
            .http
            .get(format!("{API_URL}/transaction/verify/{reference}"))
            .bearer_auth(&self.config.secret_key)
            .send()
            .await
            .map_err(|err| {
                tracing::error!(reference, error = %err, "paystack verification failed");
                GatewayError::new("Payment verification failed", err)
            })?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(reference, body = %body, "paystack verification rejected");
            return Err(GatewayError::new(
                "Payment verification failed",
                format!("paystack api error: {body}"),
            ));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| GatewayError::new("Payment verification failed", err))?;

        if body["status"] != true {
            return Err(GatewayError::new(
                "Payment verification failed",
                format!("paystack api error: {}", body["message"]),
            ));
        }

        let data = &body["data"];
        // Paystack transaction ids are numeric.
        let transaction_id = match &data["id"] {
            Value::Number(id) => id.to_string(),
            Value::String(id) => id.clone(),
            _ => {
                return Err(GatewayError::new(
                    "Payment verification failed",
                    "missing transaction id",
                ));
            }
        };

        Ok(VerifyResponse {
            status: map_paystack_status(data["status"].as_str().unwrap_or_default()),
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

        let mut payload = json!({ "transaction": transaction_id });
        if let Some(amount) = amount {
            payload["amount"] = json!(amount);
        }

        let response = self
            .http
            .post(format!("{API_URL}/refund"))
            .bearer_auth(&self.config.secret_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| {
                tracing::error!(payment_id = %details.payment_id, error = %err, "paystack refund failed");
                GatewayError::new("Refund failed", err)
            })?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(payment_id = %details.payment_id, body = %body, "paystack refund rejected");
            return Err(GatewayError::new(
                "Refund failed",
                format!("paystack api error: {body}"),
            ));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| GatewayError::new("Refund failed", err))?;

        if body["status"] != true {
            return Err(GatewayError::new(
                "Refund failed",
                format!("paystack api error: {}", body["message"]),
            ));
        }

        let refund_id = match &body["data"]["id"] {
            Value::Number(id) => id.to_string(),
            Value::String(id) => id.clone(),
            _ => return Err(GatewayError::new("Refund failed", "missing refund id")),
        };

        Ok(RefundResponse {
            refund_id,
            amount: amount.unwrap_or(details.amount),
        })
    }
}

/// Paystack transaction statuses onto the canonical vocabulary; unknown
/// statuses fail closed.
fn map_paystack_status(status: &str) -> PaymentStatus {
    match status {
        "success" => PaymentStatus::Completed,
        "abandoned" | "ongoing" | "pending" | "queued" => PaymentStatus::Pending,
        "failed" | "reversed" => PaymentStatus::Failed,
        _ => PaymentStatus::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paystack_status_mapping() {
        assert_eq!(map_paystack_status("success"), PaymentStatus::Completed);
        assert_eq!(map_paystack_status("abandoned"), PaymentStatus::Pending);
        assert_eq!(map_paystack_status("ongoing"), PaymentStatus::Pending);
        assert_eq!(map_paystack_status("pending"), PaymentStatus::Pending);
        assert_eq!(map_paystack_status("failed"), PaymentStatus::Failed);
        assert_eq!(map_paystack_status("reversed"), PaymentStatus::Failed);
    }

    #[test]
    fn unknown_paystack_status_fails_closed() {
        assert_eq!(map_paystack_status("disputed"), PaymentStatus::Failed);
        assert_eq!(map_paystack_status(""), PaymentStatus::Failed);
    }
}
