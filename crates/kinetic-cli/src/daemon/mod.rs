//! Daemon process supervising the perception engine.

pub mod client;
pub mod dispatch;
pub mod engine;
pub mod frame;
pub mod host;
pub mod paths;
pub mod push;
pub mod server;
pub mod supervisor;

// Public API - used by main.rs
pub use client::DaemonClient;
pub use server::DaemonServer;
