pub mod chat;
pub mod health;
pub mod openapi;
pub mod push;
pub mod realtime;
