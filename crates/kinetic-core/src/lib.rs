//! Core types and state machines for kinetic.
//!
//! This crate provides the shared data structures for supervising a
//! gesture-perception engine: the wire codec for the engine's stdio
//! protocol, capability composition, the confirm-with-timeout machine
//! guarding destructive actions, and reversible host-setting tracking.
//! It is used by the CLI/daemon and is free of I/O, so every state
//! machine can be tested without a live engine process.
//!
//! # Modules
//!
//! - [`error`]: control API error types with actionable suggestions
//! - [`codec`]: newline-delimited engine wire protocol
//! - [`capability`]: detector capability composition and launch flags
//! - [`confirm`]: confirm-with-timeout machine for guarded actions
//! - [`settings`]: reversible host setting baselines
//! - [`mapping`]: gesture-to-command mapping tables
//! - [`protocol`]: JSON-line control request/response protocol

pub mod capability;
pub mod codec;
pub mod confirm;
pub mod error;
pub mod mapping;
pub mod protocol;
pub mod settings;
