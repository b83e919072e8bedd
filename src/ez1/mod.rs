//! EZ1 client wrapper module
//!
//! Provides a high-level interface to query and control the EZ1 via its local HTTP API.

pub mod client;
pub mod types;

pub use client::Ez1Client;
pub use types::*;
