#![cfg_attr(not(test), forbid(unsafe_code))]
#![warn(clippy::pedantic)]

//! Models, configuration and client-side session logic shared by the
//! Snackchat server and CLI.

pub mod config;
pub mod events;
pub mod identity;
pub mod models;
pub mod realtime;
pub mod session;
