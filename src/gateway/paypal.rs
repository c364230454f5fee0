use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use crate::config::PaypalConfig;
use crate::models::PaymentStatus;

use super::{
    GatewayError, InitiateResponse, PaymentDetails, PaymentProvider, RefundResponse,
    VerifyResponse, format_major, parse_major,
};

const LIVE_URL: &str = "https://api-m.paypal.com";
const SANDBOX_URL: &str = "https://api-m.sandbox.paypal.com";

/// Wallet-redirect style gateway: the buyer approves the order on the
/// provider's site via an approval link; refunds go against the capture id
/// stored in payment metadata.
pub struct PaypalGateway {
    config: PaypalConfig,
    http: Client,
}

impl PaypalGateway {
    pub fn new(config: PaypalConfig, http: Client) -> Self {
        Self { config, http }
    }

    fn api_url(&self) -> &'static str {
        if self.config.mode == "live" {
            LIVE_URL
        } else {
            SANDBOX_URL
        }
    }

    async fn access_token(&self) -> Result<String, GatewayError> {
        let response = self
            .http
            .post(format!("{}/v1/oauth2/token", self.api_url()))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|err| GatewayError::new("Payment initiation failed", err))?;

        if !response.status().is_success() {
            return Err(GatewayError::new(
                "Payment initiation failed",
                "failed to get paypal access token",
            ));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| GatewayError::new("Payment initiation failed", err))?;

        body["access_token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                GatewayError::new("Payment initiation failed", "missing access token")
            })
    }
}

#[async_trait]
impl PaymentProvider for PaypalGateway {
    fn name(&self) -> &'static str {
        "paypal"
    }

    async fn initiate(&self, details: &PaymentDetails) -> Result<InitiateResponse, GatewayError> {
        let token = self.access_token().await?;

        let mut body = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": format!("ORDER_{}", details.order_id),
                "amount": {
                    "currency_code": details.currency,
                    "value": format_major(details.amount),
                },
                "description": format!("Order #{}", details.order_id),
            }],
        });
        if let (Some(return_url), Some(cancel_url)) =
            (&self.config.return_url, &self.config.cancel_url)
        {
            body["application_context"] = json!({
                "return_url": return_url,
                "cancel_url": cancel_url,
            });
        }

        let response = self
            .http
            .post(format!("{}/v2/checkout/orders", self.api_url()))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                tracing::error!(payment_id = %details.payment_id, error = %err, "paypal initiation failed");
                GatewayError::new("Payment initiation failed", err)
            })?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(payment_id = %details.payment_id, body = %body, "paypal initiation rejected");
            return Err(GatewayError::new(
                "Payment initiation failed",
                format!("paypal api error: {body}"),
            ));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|err| GatewayError::new("Payment initiation failed", err))?;

        let reference = data["id"]
            .as_str()
            .ok_or_else(|| GatewayError::new("Payment initiation failed", "missing order id"))?
            .to_string();

        let approval_url = data["links"]
            .as_array()
            .and_then(|links| links.iter().find(|link| link["rel"] == "approve"))
            .and_then(|link| link["href"].as_str());

        Ok(InitiateResponse {
            reference,
            gateway: self.name(),
            params: json!({ "approval_url": approval_url }),
        })
    }

    async fn verify(&self, reference: &str) -> Result<VerifyResponse, GatewayError> {
        let token = self.access_token().await?;

        let response = self
            .http
            .get(format!("{}/v2/checkout/orders/{reference}", self.api_url()))
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|err| {
                tracing::error!(reference, error = %err, "paypal verification failed");
                GatewayError::new("Payment verification failed", err)
            })?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(reference, body = %body, "paypal verification rejected");
            return Err(GatewayError::new(
                "Payment verification failed",
                format!("paypal api error: {body}"),
            ));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|err| GatewayError::new("Payment verification failed", err))?;

        let transaction_id = data["id"]
            .as_str()
            .ok_or_else(|| GatewayError::new("Payment verification failed", "missing order id"))?
            .to_string();

        let amount = data["purchase_units"][0]["amount"]["value"]
            .as_str()
            .and_then(parse_major)
            .unwrap_or(0);

        // Refunds go against the capture, so surface its id for the caller
        // to keep with the payment.
        let capture_id = data["purchase_units"][0]["payments"]["captures"][0]["id"].clone();

        Ok(VerifyResponse {
            status: map_paypal_status(data["status"].as_str().unwrap_or_default()),
            transaction_id,
            amount,
            metadata: json!({
                "status": data["status"],
                "capture_id": capture_id,
                "payer_email": data["payer"]["email_address"],
            }),
        })
    }

    async fn refund(
        &self,
        details: &PaymentDetails,
        amount: Option<i64>,
    ) -> Result<RefundResponse, GatewayError> {
        let capture_id = details
            .capture_id
            .as_deref()
            .ok_or_else(|| GatewayError::new("Refund failed", "capture id not found for refund"))?;
        let token = self.access_token().await?;

        let body = match amount {
            Some(amount) => json!({
                "amount": {
                    "currency_code": details.currency,
                    "value": format_major(amount),
                },
            }),
            None => json!({}),
        };

        let response = self
            .http
            .post(format!(
                "{}/v2/payments/captures/{capture_id}/refund",
                self.api_url()
            ))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                tracing::error!(payment_id = %details.payment_id, error = %err, "paypal refund failed");
                GatewayError::new("Refund failed", err)
            })?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(payment_id = %details.payment_id, body = %body, "paypal refund rejected");
            return Err(GatewayError::new(
                "Refund failed",
                format!("paypal api error: {body}"),
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
            amount: amount.unwrap_or(details.amount),
        })
    }
}

/// PayPal order statuses onto the canonical vocabulary. Unknown statuses fail
/// closed; only the states the approval flow is known to pass through map to
/// pending.
fn map_paypal_status(status: &str) -> PaymentStatus {
    match status {
        "COMPLETED" | "APPROVED" => PaymentStatus::Completed,
        "CREATED" | "SAVED" | "PAYER_ACTION_REQUIRED" => PaymentStatus::Pending,
        "VOIDED" | "EXPIRED" => PaymentStatus::Failed,
        _ => PaymentStatus::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paypal_status_mapping() {
        assert_eq!(map_paypal_status("COMPLETED"), PaymentStatus::Completed);
        assert_eq!(map_paypal_status("APPROVED"), PaymentStatus::Completed);
        assert_eq!(map_paypal_status("CREATED"), PaymentStatus::Pending);
        assert_eq!(map_paypal_status("SAVED"), PaymentStatus::Pending);
        assert_eq!(
            map_paypal_status("PAYER_ACTION_REQUIRED"),
            PaymentStatus::Pending
        );
        assert_eq!(map_paypal_status("VOIDED"), PaymentStatus::Failed);
        assert_eq!(map_paypal_status("EXPIRED"), PaymentStatus::Failed);
    }

    #[test]
    fn unknown_paypal_status_fails_closed() {
        assert_eq!(map_paypal_status("SOMETHING_NEW"), PaymentStatus::Failed);
        assert_eq!(map_paypal_status(""), PaymentStatus::Failed);
    }
}
