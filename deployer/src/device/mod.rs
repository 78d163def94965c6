//! Device session module

pub mod session;
pub mod state;
