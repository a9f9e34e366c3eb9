use flora_order::OrderPolicy;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub business_rules: BusinessRules,
    pub payment: PaymentConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    pub tax_rate: f64,
    pub default_currency: String,
    #[serde(default)]
    pub default_shipping_fee: f64,
}

impl BusinessRules {
    /// The configured VAT rate as an exact decimal, e.g. 0.20.
    pub fn tax_rate_decimal(&self) -> Decimal {
        Decimal::from_f64_retain(self.tax_rate)
            .unwrap_or(Decimal::ZERO)
            .round_dp(4)
    }

    /// Shipping fee applied when an order does not carry one, in cents.
    pub fn shipping_fee_decimal(&self) -> Decimal {
        Decimal::from_f64_retain(self.default_shipping_fee)
            .unwrap_or(Decimal::ZERO)
            .round_dp(2)
    }

    pub fn order_policy(&self) -> OrderPolicy {
        OrderPolicy {
            tax_rate: self.tax_rate_decimal(),
            default_currency: self.default_currency.clone(),
            default_shipping_fee: self.shipping_fee_decimal(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentConfig {
    pub provider: String,
    pub webhook_secret: String,
    #[serde(default = "default_tolerance")]
    pub signature_tolerance_seconds: i64,
}

fn default_tolerance() -> i64 {
    300
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            // Start off by merging in the "default" configuration file
            .add_source(config::File::with_name("config/default"))
            // Add in the current environment file
            // Default to 'development' env
            // Note that this file is _optional_
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add in a local configuration file
            // This file shouldn't be checked in to git
            .add_source(config::File::with_name("config/local").required(false))
            // Add in settings from the environment (with a prefix of FLORA)
            // Eg.. `FLORA__DATABASE__URL=...` would set the database url
            .add_source(config::Environment::with_prefix("FLORA").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tax_rate_converts_exactly() {
        let rules = BusinessRules {
            tax_rate: 0.20,
            default_currency: "EUR".to_string(),
            default_shipping_fee: 5.90,
        };
        assert_eq!(rules.tax_rate_decimal(), Decimal::new(20, 2).round_dp(4));

        let policy = rules.order_policy();
        assert_eq!(policy.default_shipping_fee, Decimal::new(590, 2));
        assert_eq!(policy.default_currency, "EUR");
    }
}
