//! Runtime halves of hot reload, modeled without a JS engine.

pub mod route_state;
pub mod state_bridge;
