//! Fleet inventory service library.
//!
//! This crate primarily ships the `fleetsync-server` binary, but exposes a
//! small library surface for integration testing and reuse.

pub mod api;
pub mod config;
pub mod db;
pub mod state;
