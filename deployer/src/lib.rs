//! SONiC Salt Deployer Library
//!
//! Core modules for deploying Salt minions onto SONiC switches.

pub mod app;
pub mod artifacts;
pub mod credentials;
pub mod device;
pub mod errors;
pub mod fleet;
pub mod inventory;
pub mod logs;
pub mod metrics;
pub mod server;
pub mod settings;
pub mod shutdown;
pub mod ssh;
pub mod steps;
pub mod utils;
pub mod vault;
