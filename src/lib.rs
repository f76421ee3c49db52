//! Service-manager coordination framework.
//!
//! Wraps heterogeneous backends (SQL databases, Redis, Docker, Kubernetes,
//! object storage, reverse proxies) behind one [`manager::ServiceManager`]
//! contract, caches live managers per instance, and runs a periodic
//! fleet-wide health and metrics sweep.

pub mod cli;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod instance;
pub mod logging;
pub mod manager;
pub mod shutdown;
pub mod store;
