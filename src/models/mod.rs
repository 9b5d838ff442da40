//! Domain records shared by the store, the services and the HTTP layer.

pub mod booking;
pub mod money;
pub mod order;
pub mod refund;
pub mod requests;

pub use booking::Booking;
pub use order::{Order, OrderKind, OrderRef, OrderStatus, PaymentStatus, PaymentStatusUpdate};
pub use refund::{
    RefundCompletion, RefundDraft, RefundLedger, RefundLog, RefundLogStatus, RefundRejection,
    RefundReservation,
};
pub use requests::{
    CustomTourOrder, FrozenComponent, Guide, GuideHireRequest, RequestStatus, TourComponent,
    TransferRequest,
};
