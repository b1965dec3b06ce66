//! Model integration layer.
//!
//! This module provides the interface between the conversation engine and a
//! language model provider.  It is organized into:
//!
//! - [`types`] -- Core data types (messages, tool calls, responses, usage).
//! - [`ModelClient`] -- The seam a provider SDK plugs into.

pub mod types;

use async_trait::async_trait;

use crate::error::Result;

// Re-export the most commonly used types for convenience.
pub use types::{Message, ModelResponse, Role, ToolCall, ToolDefinition, Usage};

/// A client able to send an assembled message list to a model.
///
/// Wire formats, authentication, retries and streaming all live behind this
/// trait.  The engine only sees the final [`ModelResponse`].
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Send `messages` and wait for the complete response.
    async fn send(&self, messages: &[Message]) -> Result<ModelResponse>;
}
