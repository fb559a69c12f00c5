//! Multi-tenant WebSocket client for a binary-options trading venue.
//!
//! Each user gets one [`ProtocolClient`] owning the link lifecycle:
//! authorization, tick/proposal/contract streams, purchase and sale, and
//! reconnection with exponential backoff. The [`ConnectionManager`] lazily
//! creates and tears down clients per user id.

/// Command-line argument definitions.
pub mod cli;
/// Per-user protocol client: state machine, dispatch, trading operations.
pub mod client;
/// Runtime configuration model.
pub mod config;
/// Error types used across the crate.
pub mod error;
/// Typed per-category observer registry for push events.
pub mod events;
/// Multi-tenant store of protocol clients.
pub mod manager;
/// Metrics setup and global counters.
pub mod monitoring;
/// Wire types for the venue's JSON api.
pub mod protocol;
/// Per-user connection state and link handle.
pub mod state;
/// Bounded tick history buffer.
pub mod tick_buffer;
/// Tracing/logging initialization.
pub mod tracing_setup;

pub use client::ProtocolClient;
pub use config::Config;
/// Primary crate error type.
pub use error::ClientError;
pub use manager::ConnectionManager;
