//! # Broadcast Hub
//!
//! Real-time connection hub: accepts WebSocket clients, tracks their liveness
//! and fans broadcast messages out to all of them, shedding clients that cannot
//! keep up instead of letting them slow everyone else down.
//!
//! - [`services`] holds the core: the hub, the per-connection pumps and the
//!   liveness monitor.
//! - [`routes`] and [`api`] expose `/ws`, `/broadcast` and `/health`.
//! - [`server`] wires the background tasks to the listener.

pub mod api;
pub mod config;
pub mod models;
pub mod routes;
pub mod server;
pub mod services;
