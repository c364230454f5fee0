use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub payments: PaymentConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);
        Ok(Self {
            port,
            database_url,
            host,
            payments: PaymentConfig::from_env(),
        })
    }
}

/// Per-gateway credentials and flags, read once at startup and injected
/// into the payment service instead of being looked up ambiently.
#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub default_currency: String,
    pub gateway_timeout: Duration,
    pub stripe: StripeConfig,
    pub paypal: PaypalConfig,
    pub paystack: PaystackConfig,
}

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub enabled: bool,
    pub secret_key: String,
    pub public_key: String,
    pub currency: String,
}

#[derive(Debug, Clone)]
pub struct PaypalConfig {
    pub enabled: bool,
    /// "sandbox" or "live"; selects the API host.
    pub mode: String,
    pub client_id: String,
    pub client_secret: String,
    pub currency: String,
    pub return_url: Option<String>,
    pub cancel_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PaystackConfig {
    pub enabled: bool,
    pub secret_key: String,
    pub public_key: String,
    pub currency: String,
}

impl PaymentConfig {
    pub fn from_env() -> Self {
        let timeout_secs = env::var("GATEWAY_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(10);

        Self {
            default_currency: env_or("PAYMENT_DEFAULT_CURRENCY", "USD"),
            gateway_timeout: Duration::from_secs(timeout_secs),
            stripe: StripeConfig {
                enabled: env_flag("STRIPE_ENABLED"),
                secret_key: env_or("STRIPE_SECRET_KEY", ""),
                public_key: env_or("STRIPE_PUBLIC_KEY", ""),
                currency: env_or("STRIPE_CURRENCY", "USD"),
            },
            paypal: PaypalConfig {
                enabled: env_flag("PAYPAL_ENABLED"),
                mode: env_or("PAYPAL_MODE", "sandbox"),
                client_id: env_or("PAYPAL_CLIENT_ID", ""),
                client_secret: env_or("PAYPAL_CLIENT_SECRET", ""),
                currency: env_or("PAYPAL_CURRENCY", "USD"),
                return_url: env::var("PAYPAL_RETURN_URL").ok(),
                cancel_url: env::var("PAYPAL_CANCEL_URL").ok(),
            },
            paystack: PaystackConfig {
                enabled: env_flag("PAYSTACK_ENABLED"),
                secret_key: env_or("PAYSTACK_SECRET_KEY", ""),
                public_key: env_or("PAYSTACK_PUBLIC_KEY", ""),
                currency: env_or("PAYSTACK_CURRENCY", "NGN"),
            },
        }
    }
}

impl Default for PaymentConfig {
    /// All gateways disabled; used by tests that inject fake providers.
    fn default() -> Self {
        Self {
            default_currency: "USD".into(),
            gateway_timeout: Duration::from_secs(10),
            stripe: StripeConfig {
                enabled: false,
                secret_key: String::new(),
                public_key: String::new(),
                currency: "USD".into(),
            },
            paypal: PaypalConfig {
                enabled: false,
                mode: "sandbox".into(),
                client_id: String::new(),
                client_secret: String::new(),
                currency: "USD".into(),
                return_url: None,
                cancel_url: None,
            },
            paystack: PaystackConfig {
                enabled: false,
                secret_key: String::new(),
                public_key: String::new(),
                currency: "NGN".into(),
            },
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_flag(key: &str) -> bool {
    matches!(
        env::var(key).unwrap_or_default().to_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_all_gateways_disabled() {
        let config = PaymentConfig::default();
        assert!(!config.stripe.enabled);
        assert!(!config.paypal.enabled);
        assert!(!config.paystack.enabled);
        assert_eq!(config.default_currency, "USD");
        assert_eq!(config.gateway_timeout, Duration::from_secs(10));
    }
}
