//! Application layer containing the core business logic orchestration.
//!
//! This module defines the `PaymentEngine`, the primary entry point for
//! initiating and querying payments, and the settlement worker pool it feeds
//! through a `tokio` channel.

pub mod engine;
pub mod settlement;
pub mod wallets;
