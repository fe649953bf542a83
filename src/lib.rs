//! saaskit - SaaS starter backend
//!
//! Mirrors identity-provider users and payment-provider billing state into
//! SQLite, serves the account and billing API, and keeps subscriptions in
//! sync through signed webhooks.

pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod identity;
pub mod middleware;
pub mod models;
pub mod payments;
pub mod rate_limit;
