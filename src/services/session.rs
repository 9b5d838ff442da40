//! Payment Session Creator: prices the order against live data, opens a
//! session with the chosen gateway and records it on the order.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::PaymentsConfig;
use crate::database::error::DatabaseError;
use crate::database::store::OrderStore;
use crate::error::{AppError, AppErrorKind, DomainError};
use crate::models::money::{format_major, minor_to_major_f64};
use crate::models::{OrderKind, PaymentStatus};
use crate::payments::error::PaymentError;
use crate::payments::factory::PaymentProviderFactory;
use crate::payments::types::{ProviderName, RedirectInstructions, SessionRequest};
use crate::services::pricing::{PricingError, PricingOracle};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOutcome {
    pub order_number: String,
    pub provider: ProviderName,
    pub session_ref: String,
    pub redirect: RedirectInstructions,
    pub amount: f64,
    pub currency: String,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("invalid order number: {0}")]
    InvalidOrderNumber(String),

    #[error("order {0} not found")]
    OrderNotFound(String),

    #[error("order {order_number} is {payment_status} and cannot start a payment")]
    NotPayable {
        order_number: String,
        payment_status: PaymentStatus,
    },

    #[error(transparent)]
    Pricing(#[from] PricingError),

    #[error(transparent)]
    Gateway(#[from] PaymentError),

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::UnsupportedProvider(provider) => AppError::new(AppErrorKind::Domain(
                DomainError::UnsupportedProvider { provider },
            )),
            SessionError::InvalidOrderNumber(number) => {
                AppError::invalid_field("orderNumber", format!("unrecognised order number {}", number))
            }
            SessionError::OrderNotFound(number) => AppError::not_found("Order", number),
            SessionError::NotPayable {
                order_number,
                payment_status,
            } => AppError::new(AppErrorKind::Domain(DomainError::OrderNotPayable {
                order_number,
                payment_status: payment_status.to_string(),
            })),
            SessionError::Pricing(e) => e.into(),
            SessionError::Gateway(e) => e.into(),
            SessionError::Store(e) => e.into(),
        }
    }
}

pub struct SessionService {
    store: Arc<dyn OrderStore>,
    factory: Arc<PaymentProviderFactory>,
    pricing: Arc<PricingOracle>,
    config: PaymentsConfig,
}

impl SessionService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        factory: Arc<PaymentProviderFactory>,
        pricing: Arc<PricingOracle>,
        config: PaymentsConfig,
    ) -> Self {
        Self {
            store,
            factory,
            pricing,
            config,
        }
    }

    pub async fn create_session(
        &self,
        provider: &str,
        order_number: &str,
    ) -> Result<SessionOutcome, SessionError> {
        let gateway = self
            .factory
            .get_by_name(provider)
            .map_err(|_| SessionError::UnsupportedProvider(provider.to_string()))?;

        let order_number = order_number.trim();
        let prefix_kind = OrderKind::from_order_number(order_number)
            .ok_or_else(|| SessionError::InvalidOrderNumber(order_number.to_string()))?;

        let order = self
            .store
            .find_order_by_number(order_number)
            .await?
            .ok_or_else(|| SessionError::OrderNotFound(order_number.to_string()))?;

        if order.kind != prefix_kind {
            warn!(
                order_number = %order.order_number,
                stored_kind = %order.kind,
                prefix_kind = %prefix_kind,
                "order number prefix disagrees with stored kind, using stored kind"
            );
        }

        if !order.payment_status.accepts_new_session() {
            return Err(SessionError::NotPayable {
                order_number: order.order_number,
                payment_status: order.payment_status,
            });
        }

        // Fails before any gateway traffic when live pricing moved.
        let check = self.pricing.revalidate(&order).await?;

        let provider_name = gateway.name();
        let request = SessionRequest {
            order_id: order.id,
            order_number: order.order_number.clone(),
            amount_minor: check.current,
            currency: order.currency.clone(),
            customer_email: order.customer_email.clone(),
            description: format!("{} order {}", order.kind, order.order_number),
            callback_url: self.config.callback_url(provider_name.as_str()),
            return_url: self.config.return_url(&order.order_number),
        };
        let session = gateway.create_session(request).await?;

        let recorded = self
            .store
            .record_session(order.id, provider_name.as_str(), &session.session_ref)
            .await?;
        let order = match recorded {
            Some(order) => order,
            None => {
                // A callback settled the order while the session was being created.
                let current = self
                    .store
                    .find_order(order.id)
                    .await?
                    .map(|o| o.payment_status)
                    .unwrap_or(order.payment_status);
                return Err(SessionError::NotPayable {
                    order_number: order.order_number,
                    payment_status: current,
                });
            }
        };

        info!(
            order_number = %order.order_number,
            provider = %provider_name,
            session_ref = %session.session_ref,
            amount = %format_major(check.current),
            "payment session created"
        );

        Ok(SessionOutcome {
            order_number: order.order_number,
            provider: provider_name,
            session_ref: session.session_ref,
            redirect: session.redirect,
            amount: minor_to_major_f64(check.current),
            currency: order.currency,
        })
    }
}
