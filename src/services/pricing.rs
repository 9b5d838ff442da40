//! Pricing Oracle: recomputes what an order should cost from live records.
//!
//! Read-only. Safe to call any number of times for the same order.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::database::error::DatabaseError;
use crate::database::store::OrderStore;
use crate::error::{AppError, AppErrorKind, DomainError};
use crate::models::money::{format_major, within_tolerance};
use crate::models::{Order, OrderKind, RequestStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceCheck {
    pub kind: OrderKind,
    /// Recomputed amount in minor units.
    pub expected: i64,
    /// Stored order total in minor units.
    pub current: i64,
}

#[derive(Debug, Error)]
pub enum PricingError {
    #[error("{kind} record {subject_id} not found")]
    SubjectMissing { kind: OrderKind, subject_id: i64 },

    #[error("guide {guide_id} has no daily rate")]
    GuideRateUnset { guide_id: i64 },

    #[error("{kind} request is {status}, which cannot be paid")]
    RequestNotPayable { kind: OrderKind, status: String },

    #[error("custom tour components unavailable: {missing:?}")]
    ComponentsUnavailable { missing: Vec<i64> },

    #[error("price mismatch: expected {expected}, order total {current}")]
    PriceMismatch { expected: i64, current: i64 },

    #[error("order total {total} is not a payable amount")]
    InvalidTotal { total: i64 },

    #[error("{item} has quantity {quantity}, which must be positive")]
    InvalidQuantity { item: String, quantity: i64 },

    #[error("expected price overflows the supported range")]
    PriceOverflow,

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

impl From<PricingError> for AppError {
    fn from(err: PricingError) -> Self {
        let kind = match err {
            PricingError::SubjectMissing { kind, subject_id } => {
                AppErrorKind::Domain(DomainError::NotFound {
                    entity: kind.to_string(),
                    id: subject_id.to_string(),
                })
            }
            PricingError::GuideRateUnset { guide_id } => {
                AppErrorKind::Domain(DomainError::GuideRateUnset { guide_id })
            }
            PricingError::RequestNotPayable { kind, status } => {
                AppErrorKind::Domain(DomainError::RequestNotPayable {
                    kind: kind.to_string(),
                    status,
                })
            }
            PricingError::ComponentsUnavailable { missing } => {
                AppErrorKind::Domain(DomainError::ComponentsUnavailable { missing })
            }
            PricingError::PriceMismatch { expected, current } => {
                AppErrorKind::Domain(DomainError::PriceMismatch { expected, current })
            }
            PricingError::InvalidTotal { total } => {
                AppErrorKind::Domain(DomainError::InvalidAmount {
                    amount: format_major(total),
                    reason: "order total must be greater than zero".to_string(),
                })
            }
            PricingError::InvalidQuantity { item, quantity } => {
                AppErrorKind::Domain(DomainError::InvalidAmount {
                    amount: quantity.to_string(),
                    reason: format!("{} quantity must be greater than zero", item),
                })
            }
            PricingError::PriceOverflow => AppErrorKind::Domain(DomainError::InvalidAmount {
                amount: "overflow".to_string(),
                reason: "expected price exceeds the supported range".to_string(),
            }),
            PricingError::Store(e) => return e.into(),
        };
        AppError::new(kind)
    }
}

pub struct PricingOracle {
    store: Arc<dyn OrderStore>,
}

impl PricingOracle {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }

    /// Recomputes the expected charge for `order` and compares it with the
    /// stored total.
    pub async fn revalidate(&self, order: &Order) -> Result<PriceCheck, PricingError> {
        let expected = match order.kind {
            OrderKind::Tour => {
                if order.total_amount <= 0 {
                    return Err(PricingError::InvalidTotal {
                        total: order.total_amount,
                    });
                }
                order.total_amount
            }
            OrderKind::GuideHire => self.guide_hire_price(order).await?,
            OrderKind::Transfer => self.transfer_price(order).await?,
            OrderKind::CustomTour => self.custom_tour_price(order).await?,
        };

        if !within_tolerance(order.total_amount, expected) {
            warn!(
                order_number = %order.order_number,
                kind = %order.kind,
                expected = %format_major(expected),
                current = %format_major(order.total_amount),
                "order total no longer matches live pricing"
            );
            return Err(PricingError::PriceMismatch {
                expected,
                current: order.total_amount,
            });
        }

        debug!(
            order_number = %order.order_number,
            expected = %format_major(expected),
            "price revalidated"
        );
        Ok(PriceCheck {
            kind: order.kind,
            expected,
            current: order.total_amount,
        })
    }

    async fn guide_hire_price(&self, order: &Order) -> Result<i64, PricingError> {
        let request = self
            .store
            .find_guide_hire_request(order.subject_id)
            .await?
            .ok_or(PricingError::SubjectMissing {
                kind: order.kind,
                subject_id: order.subject_id,
            })?;

        if !matches!(
            request.status,
            RequestStatus::Confirmed | RequestStatus::Approved
        ) {
            return Err(PricingError::RequestNotPayable {
                kind: order.kind,
                status: request.status.to_string(),
            });
        }

        let guide = self
            .store
            .find_guide(request.guide_id)
            .await?
            .ok_or(PricingError::GuideRateUnset {
                guide_id: request.guide_id,
            })?;

        let rate = match guide.price_per_day {
            Some(rate) if rate > 0 => rate,
            _ => return Err(PricingError::GuideRateUnset { guide_id: guide.id }),
        };
        if request.number_of_days <= 0 {
            return Err(PricingError::InvalidQuantity {
                item: format!("guide hire request {} days", request.id),
                quantity: request.number_of_days,
            });
        }
        rate.checked_mul(request.number_of_days)
            .ok_or(PricingError::PriceOverflow)
    }

    async fn transfer_price(&self, order: &Order) -> Result<i64, PricingError> {
        let request = self
            .store
            .find_transfer_request(order.subject_id)
            .await?
            .ok_or(PricingError::SubjectMissing {
                kind: order.kind,
                subject_id: order.subject_id,
            })?;

        if !matches!(
            request.status,
            RequestStatus::Pending
                | RequestStatus::Quoted
                | RequestStatus::Confirmed
                | RequestStatus::Approved
        ) {
            return Err(PricingError::RequestNotPayable {
                kind: order.kind,
                status: request.status.to_string(),
            });
        }

        match request.effective_price() {
            Some(price) if price > 0 => Ok(price),
            other => Err(PricingError::InvalidTotal {
                total: other.unwrap_or(0),
            }),
        }
    }

    async fn custom_tour_price(&self, order: &Order) -> Result<i64, PricingError> {
        let custom = self
            .store
            .find_custom_tour_order(order.subject_id)
            .await?
            .ok_or(PricingError::SubjectMissing {
                kind: order.kind,
                subject_id: order.subject_id,
            })?;

        if matches!(
            custom.status,
            RequestStatus::Rejected | RequestStatus::Cancelled
        ) {
            return Err(PricingError::RequestNotPayable {
                kind: order.kind,
                status: custom.status.to_string(),
            });
        }
        if custom.components.is_empty() {
            return Err(PricingError::ComponentsUnavailable {
                missing: Vec::new(),
            });
        }

        let active = self
            .store
            .find_active_components(&custom.component_ids())
            .await?;

        if let Some(frozen) = custom.components.iter().find(|c| c.quantity <= 0) {
            return Err(PricingError::InvalidQuantity {
                item: format!("component {}", frozen.component_id),
                quantity: frozen.quantity,
            });
        }

        let mut missing = Vec::new();
        let mut total = 0i64;
        for frozen in &custom.components {
            match active.iter().find(|c| c.id == frozen.component_id) {
                Some(component) => {
                    total = component
                        .price
                        .checked_mul(frozen.quantity)
                        .and_then(|line| total.checked_add(line))
                        .ok_or(PricingError::PriceOverflow)?;
                }
                None => missing.push(frozen.component_id),
            }
        }

        if !missing.is_empty() {
            return Err(PricingError::ComponentsUnavailable { missing });
        }
        Ok(total)
    }
}
