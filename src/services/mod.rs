// src/services/mod.rs

//! # Services Module
//!
//! The connection hub and everything that runs per connection.

// Per-connection record: outbound queue, probe channel, cancel token, liveness clock
pub mod connection;
// The hub: single coordination task owning the registry
pub mod connection_manager;
// Pluggable consumer for inbound client messages
pub mod inbound;
// Periodic eviction of unresponsive clients
pub mod liveness;
// Read and write pumps
pub mod pump;
