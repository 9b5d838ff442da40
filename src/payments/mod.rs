pub mod error;
pub mod factory;
pub mod provider;
pub mod providers;
pub mod security;
pub mod types;
pub mod utils;
