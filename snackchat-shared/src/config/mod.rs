//! # Configuration
//!
//! Server configuration, loaded from files and environment variables.

pub mod server;
