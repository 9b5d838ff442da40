//! Health check module
//! Reports the order store and the configured payment gateways

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::database::store::OrderStore;
use crate::payments::factory::PaymentProviderFactory;

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

/// Health checker for the application
#[derive(Clone)]
pub struct HealthChecker {
    store: Arc<dyn OrderStore>,
    factory: Arc<PaymentProviderFactory>,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn OrderStore>, factory: Arc<PaymentProviderFactory>) -> Self {
        Self { store, factory }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();

        let store_health = match timeout(CHECK_TIMEOUT, check_store_health(self.store.as_ref())).await
        {
            Ok(Ok(response_time)) => {
                info!(response_time_ms = response_time as u64, "order store health check: OK");
                ComponentHealth::up(Some(response_time))
            }
            Ok(Err(e)) => {
                error!(error = %e, "order store health check failed");
                ComponentHealth::down(Some(e))
            }
            Err(_) => {
                error!("order store health check timed out");
                ComponentHealth::down(Some("Timeout".to_string()))
            }
        };
        health_status
            .checks
            .insert("database".to_string(), store_health);

        let providers = self.factory.list_available_providers();
        let gateway_health = if providers.is_empty() {
            warn!("no payment gateways configured");
            ComponentHealth::warning(None, Some("no payment gateways configured".to_string()))
        } else {
            let names: Vec<&str> = providers.iter().map(|p| p.as_str()).collect();
            ComponentHealth {
                details: Some(names.join(",")),
                ..ComponentHealth::up(None)
            }
        };
        health_status
            .checks
            .insert("gateways".to_string(), gateway_health);

        health_status.status = overall_state(&health_status.checks);
        health_status
    }
}

fn overall_state(checks: &HashMap<String, ComponentHealth>) -> HealthState {
    if checks.values().any(|c| c.status == ComponentState::Down) {
        HealthState::Unhealthy
    } else if checks.values().any(|c| c.status == ComponentState::Warning) {
        HealthState::Degraded
    } else {
        HealthState::Healthy
    }
}

pub async fn check_store_health(store: &dyn OrderStore) -> Result<u128, String> {
    let start = Instant::now();
    store
        .health_check()
        .await
        .map(|_| start.elapsed().as_millis())
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::InMemoryOrderStore;
    use crate::payments::types::ProviderName;

    #[tokio::test]
    async fn test_health_status_creation() {
        let health_status = HealthStatus::new();
        assert!(matches!(health_status.status, HealthState::Healthy));
        assert!(health_status.checks.is_empty());
        assert!(health_status.timestamp <= chrono::Utc::now());
    }

    #[test]
    fn test_component_health_states() {
        let up_health = ComponentHealth::up(Some(100));
        assert!(matches!(up_health.status, ComponentState::Up));
        assert_eq!(up_health.response_time_ms, Some(100));

        let down_health = ComponentHealth::down(Some("Test error".to_string()));
        assert!(matches!(down_health.status, ComponentState::Down));
        assert_eq!(down_health.details, Some("Test error".to_string()));

        let warning_health = ComponentHealth::warning(Some(500), Some("Slow response".to_string()));
        assert!(matches!(warning_health.status, ComponentState::Warning));
    }

    #[tokio::test]
    async fn no_gateways_is_degraded() {
        let checker = HealthChecker::new(
            Arc::new(InMemoryOrderStore::new()),
            Arc::new(PaymentProviderFactory::with_gateways(
                ProviderName::HostedForm,
                Vec::new(),
            )),
        );
        let status = checker.check_health().await;
        assert_eq!(status.status, HealthState::Degraded);
        assert_eq!(status.checks["database"].status, ComponentState::Up);
    }
}
