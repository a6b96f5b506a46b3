pub mod chat;
pub mod push;
pub mod realtime;

#[cfg(test)]
mod chat_tests;
