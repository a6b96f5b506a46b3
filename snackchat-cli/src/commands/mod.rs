pub mod chat;
pub mod completion;
pub mod config;
pub mod grant;
pub mod identity;
