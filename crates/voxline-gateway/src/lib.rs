//! HTTP boundary for the Voxline call-reconciliation core.

pub mod gateway_server;

pub use gateway_server::*;
