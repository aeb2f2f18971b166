//! Control plane for model-serving workers.
//!
//! Boots, authenticates, and tears down a serving worker process: validates
//! device/model configuration, assembles the operator pipeline, records live
//! processes in a persisted registry, optionally gates the start behind a
//! one-time encryption-key handshake, and delivers stop/kill signals.
//!
//! The inference engine itself is external; it is launched through the
//! worker-spawn interface in [`launch`] and reports back only via process
//! exit.

pub mod config;
pub mod error;
pub mod gateway;
pub mod launch;
pub mod ops;
pub mod port;
pub mod process;
pub mod registry;
pub mod supervisor;
