#![cfg_attr(not(test), forbid(unsafe_code))]
#![warn(clippy::pedantic)]

//! Snackchat HTTP server.
//!
//! Hosts the chat relay (persist then broadcast), the channel authenticator
//! that signs realtime subscription grants, and the push notification
//! fan-out, together with health, metrics and OpenAPI routes.

pub mod app_state;
pub mod commands;
pub mod db;
pub mod handlers;
pub mod http;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod server;
pub mod services;
pub mod tracer;
