pub mod checkout_session;
pub mod hosted_form;

pub use checkout_session::{CheckoutSessionConfig, CheckoutSessionGateway};
pub use hosted_form::{HostedFormConfig, HostedFormGateway};
