//! `answerpipe` crate (library surface).
//!
//! The primary entrypoint for end users is the `answerpipe` binary (HTTP server + CLI).
//! This library module exposes the route layer and configuration so the server can be
//! embedded or driven from tests without spawning the binary.

pub mod config;
pub mod http;
pub mod rate_limit;

pub use answerpipe_core as core;
pub use answerpipe_local as local;
