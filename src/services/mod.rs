//! Payment engine services: pricing, reconciliation, sessions, refunds and
//! the side effects that follow them.

pub mod callback_processor;
pub mod notification;
pub mod pricing;
pub mod reconciliation;
pub mod refund;
pub mod retry;
pub mod session;
pub mod side_effects;

pub use callback_processor::{CallbackAck, CallbackError, CallbackProcessor};
pub use notification::{LoggingNotifier, Notifier};
pub use pricing::{PriceCheck, PricingError, PricingOracle};
pub use reconciliation::{IgnoreReason, ReconcileError, ReconcileOutcome, ReconciliationEngine};
pub use refund::{RefundCommand, RefundError, RefundReceipt, RefundService};
pub use retry::RetryExecutor;
pub use session::{SessionError, SessionOutcome, SessionService};
pub use side_effects::{SideEffect, SideEffectDispatcher, SideEffectHandler};
