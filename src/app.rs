//! Wires the store, gateways and notifier into the services, the router state
//! and the background workers.

use std::sync::Arc;

use crate::api::AppState;
use crate::config::PaymentsConfig;
use crate::database::store::OrderStore;
use crate::health::HealthChecker;
use crate::payments::factory::PaymentProviderFactory;
use crate::payments::security::CallbackIpPolicy;
use crate::services::{
    CallbackProcessor, Notifier, PricingOracle, ReconciliationEngine, RefundService,
    RetryExecutor, SessionService, SideEffectDispatcher, SideEffectHandler,
};
use crate::workers::session_sweeper::{SessionSweeper, SessionSweeperConfig};
use crate::workers::side_effect_worker::SideEffectWorker;

pub struct App {
    pub state: AppState,
    pub engine: Arc<ReconciliationEngine>,
    pub side_effect_worker: SideEffectWorker,
    pub sweeper: SessionSweeper,
}

impl App {
    pub fn assemble(
        store: Arc<dyn OrderStore>,
        factory: Arc<PaymentProviderFactory>,
        notifier: Arc<dyn Notifier>,
        config: &PaymentsConfig,
    ) -> Self {
        let retry = RetryExecutor::from_config(config);
        let (dispatcher, rx) = SideEffectDispatcher::channel(config.side_effect_queue_capacity);

        let engine = Arc::new(ReconciliationEngine::new(
            store.clone(),
            dispatcher.clone(),
            retry,
        ));
        let pricing = Arc::new(PricingOracle::new(store.clone()));
        let ip_policy =
            CallbackIpPolicy::new(config.enforce_callback_ips(), config.trust_forwarded_for);

        let callbacks = Arc::new(CallbackProcessor::new(
            factory.clone(),
            store.clone(),
            engine.clone(),
            ip_policy,
            retry,
        ));
        let sessions = Arc::new(SessionService::new(
            store.clone(),
            factory.clone(),
            pricing,
            config.clone(),
        ));
        let refunds = Arc::new(RefundService::new(
            store.clone(),
            factory.clone(),
            dispatcher,
            retry,
        ));

        let side_effect_worker = SideEffectWorker::new(
            rx,
            SideEffectHandler::new(store.clone(), notifier, retry),
        );
        let sweeper = SessionSweeper::new(
            store.clone(),
            factory.clone(),
            engine.clone(),
            retry,
            SessionSweeperConfig::from_payments(config),
        );

        Self {
            state: AppState {
                callbacks,
                sessions,
                refunds,
                health_checker: HealthChecker::new(store, factory),
            },
            engine,
            side_effect_worker,
            sweeper,
        }
    }
}
