//! Aeonis LLM - completion API client
//!
//! This crate implements `aeonis_core::CompletionEngine` on top of the
//! Gemini `generateContent` function-calling API.

mod client;
mod error;
pub mod wire;

pub use client::GeminiClient;
pub use error::{Error, Result};
