//! Scriptgate HTTP front-end and service wiring.
//!
//! Exposes configuration, state, error handling and the router so that
//! integration tests and the binary entrypoint share the same building
//! blocks.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
