pub mod approval;
pub mod client;
pub mod handlers;
pub mod render;

pub use client::{ChatClient, ChatError};
