//! # Marketplace escrow gateway server
//!
//! This crate hosts the HTTP server for the escrow gateway. It is responsible for:
//! * Authenticating callers from their access tokens and enforcing route-level roles.
//! * Opening payments with the payment providers and confirming or cancelling them on request.
//! * Receiving provider webhooks, verifying their signatures and applying them to the payment they concern.
//! * Exposing the escrow lifecycle (complete, release, refund, dispute) and the admin repair operations.
//! * Running the auto-release worker that settles escrows once their dispute window closes.
//!
//! The settlement logic itself lives in `escrow_engine`, and provider HTTP contracts in `payment_providers`.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! * `/health`: returns 200 OK.
//! * `/webhooks/{method}`: provider notifications. Authenticated by signature, not by token.
//! * `/api/...`: everything else. Requires an access token. See [routes](routes/index.html).
pub mod auth;
pub mod auto_release_worker;
pub mod cli;
pub mod config;
pub mod data_objects;
pub mod errors;
pub mod integrations;
pub mod middleware;
pub mod routes;
pub mod server;

#[cfg(test)]
mod endpoint_tests;
