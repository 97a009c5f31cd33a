//! Dayreel - normalize one clip per day and merge them into a single video
//!
//! This library crate exposes the core functionality for integration testing.

pub mod config;
pub mod coordinator;
pub mod label;
pub mod replay;
pub mod server;
