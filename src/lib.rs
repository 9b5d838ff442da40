//! Payment reconciliation engine for the booking platform: gateway sessions,
//! callback reconciliation and audited refunds.

pub mod api;
pub mod app;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod models;
pub mod payments;
pub mod services;
pub mod workers;
