//! Aeonis Core - repository cache, code intelligence and tool dispatch
//!
//! This crate keeps per-project working copies of remote repositories,
//! answers code questions against them, and drives the multi-turn tool
//! protocol between a completion engine and those operations.

pub mod chat;
pub mod config;
pub mod error;
pub mod git;
pub mod scanner;
pub mod secrets;
pub mod store;
pub mod tools;

#[cfg(test)]
pub(crate) mod test_support;

pub use chat::{
    Answer, CompletionEngine, CompletionRequest, Dispatcher, Message, Part, Role, ToolInvocation,
    ToolResult,
};
pub use config::Config;
pub use error::{Error, Result};
pub use git::{RepoCache, WorkingCopy};
pub use scanner::{SemgrepScanner, StaticScanner};
pub use secrets::{Secret, Secrets};
pub use store::{ProjectStore, RepositoryRecord, TraceStore};
pub use tools::{ToolContext, ToolKind, ToolSession};
