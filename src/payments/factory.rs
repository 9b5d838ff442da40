use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::providers::{CheckoutSessionGateway, HostedFormGateway};
use crate::payments::types::ProviderName;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct PaymentFactoryConfig {
    pub default_provider: ProviderName,
    pub enabled_providers: Vec<ProviderName>,
}

impl PaymentFactoryConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let default_provider = std::env::var("DEFAULT_PAYMENT_PROVIDER")
            .unwrap_or_else(|_| "checkout_session".to_string());
        let default_provider = ProviderName::from_str(&default_provider)?;

        let enabled_raw = std::env::var("ENABLED_PAYMENT_PROVIDERS")
            .unwrap_or_else(|_| "hosted_form,checkout_session".to_string());
        let mut enabled_providers = Vec::new();
        for part in enabled_raw.split(',') {
            let value = part.trim();
            if value.is_empty() {
                continue;
            }
            let provider = ProviderName::from_str(value)?;
            if !enabled_providers.contains(&provider) {
                enabled_providers.push(provider);
            }
        }

        if !enabled_providers.contains(&default_provider) {
            return Err(PaymentError::ValidationError {
                message: "default provider must be enabled".to_string(),
                field: Some("DEFAULT_PAYMENT_PROVIDER".to_string()),
            });
        }

        Ok(Self {
            default_provider,
            enabled_providers,
        })
    }
}

/// Registry of the gateways this process may talk to, keyed by provider name.
pub struct PaymentProviderFactory {
    default_provider: ProviderName,
    gateways: HashMap<ProviderName, Arc<dyn PaymentGateway>>,
}

impl PaymentProviderFactory {
    /// Builds every enabled gateway from its environment configuration.
    pub fn from_env() -> PaymentResult<Self> {
        let config = PaymentFactoryConfig::from_env()?;
        let mut gateways: Vec<Arc<dyn PaymentGateway>> = Vec::new();
        for provider in &config.enabled_providers {
            let gateway: Arc<dyn PaymentGateway> = match provider {
                ProviderName::HostedForm => Arc::new(HostedFormGateway::from_env()?),
                ProviderName::CheckoutSession => Arc::new(CheckoutSessionGateway::from_env()?),
            };
            info!(provider = %provider, "payment gateway configured");
            gateways.push(gateway);
        }
        Ok(Self::with_gateways(config.default_provider, gateways))
    }

    pub fn with_gateways(
        default_provider: ProviderName,
        gateways: impl IntoIterator<Item = Arc<dyn PaymentGateway>>,
    ) -> Self {
        let gateways = gateways
            .into_iter()
            .map(|gateway| (gateway.name(), gateway))
            .collect();
        Self {
            default_provider,
            gateways,
        }
    }

    pub fn get_provider(&self, provider: ProviderName) -> PaymentResult<Arc<dyn PaymentGateway>> {
        self.gateways
            .get(&provider)
            .cloned()
            .ok_or(PaymentError::ValidationError {
                message: format!("provider {} is disabled", provider),
                field: Some("provider".to_string()),
            })
    }

    /// Resolves a provider name from a URL path segment or stored order field.
    pub fn get_by_name(&self, name: &str) -> PaymentResult<Arc<dyn PaymentGateway>> {
        self.get_provider(ProviderName::from_str(name)?)
    }

    pub fn get_default_provider(&self) -> PaymentResult<Arc<dyn PaymentGateway>> {
        self.get_provider(self.default_provider)
    }

    /// Enabled gateways with an empty callback allow-list. Production refuses to
    /// start while this is non-empty.
    pub fn gateways_without_callback_ips(&self) -> Vec<ProviderName> {
        let mut missing: Vec<ProviderName> = self
            .gateways
            .values()
            .filter(|g| g.callback_ips().is_empty())
            .map(|g| g.name())
            .collect();
        missing.sort_by_key(|p| p.as_str());
        missing
    }

    pub fn list_available_providers(&self) -> Vec<ProviderName> {
        let mut providers: Vec<ProviderName> = self.gateways.keys().copied().collect();
        providers.sort_by_key(|p| p.as_str());
        providers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::providers::hosted_form::HostedFormConfig;

    fn hosted_form() -> Arc<dyn PaymentGateway> {
        Arc::new(
            HostedFormGateway::new(HostedFormConfig {
                merchant_key: "m".to_string(),
                password: "p".to_string(),
                base_url: "https://gateway.test".to_string(),
                payment_url: "https://gateway.test/pay".to_string(),
                timeout_secs: 5,
                callback_ips: vec![],
            })
            .expect("gateway init should succeed"),
        )
    }

    #[test]
    fn provider_name_parsing_works() {
        assert!(matches!(
            ProviderName::from_str("hosted_form"),
            Ok(ProviderName::HostedForm)
        ));
        assert!(ProviderName::from_str("unknown").is_err());
    }

    #[test]
    fn disabled_provider_is_rejected() {
        let factory =
            PaymentProviderFactory::with_gateways(ProviderName::HostedForm, vec![hosted_form()]);
        assert!(factory.get_by_name("hosted_form").is_ok());
        assert!(factory.get_by_name("checkout_session").is_err());
        assert_eq!(
            factory.list_available_providers(),
            vec![ProviderName::HostedForm]
        );
    }

    #[test]
    fn reports_gateways_missing_callback_ips() {
        let factory =
            PaymentProviderFactory::with_gateways(ProviderName::HostedForm, vec![hosted_form()]);
        assert_eq!(
            factory.gateways_without_callback_ips(),
            vec![ProviderName::HostedForm]
        );
    }
}
