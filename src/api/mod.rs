// src/api/mod.rs

//! # API Module
//!
//! Shared application state and the HTTP handlers that sit in front of the hub.

pub mod broadcast;
pub mod state;
