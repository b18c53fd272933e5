//! Agent channel abstraction.
//!
//! An [`AgentChannel`] is an owned, disposable handle that exchanges one
//! prompt/response pair per [`send`](AgentChannel::send) call with a single
//! conversational agent instance. Channels are produced by an
//! [`AgentChannelFactory`], one per session episode or isolation reset,
//! and are never shared between sessions.

pub mod codec;
pub mod process;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::Result;

pub use process::{ProcessChannel, ProcessChannelFactory, SpawnConfig};

/// Bidirectional request/response handle bound to one agent instance.
pub trait AgentChannel: Send + Sync {
    /// Session-scoped identity of this channel.
    fn id(&self) -> &str;

    /// Send `text` to the agent and await exactly one response.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Channel`](crate::AppError::Channel) if the channel
    /// has been disposed (including while the call was in flight) or the
    /// underlying transport fails.
    fn send(&self, text: &str) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>>;

    /// Release the underlying agent resource.
    ///
    /// Idempotent. Any in-flight [`send`](Self::send) must fail promptly
    /// instead of blocking.
    fn dispose(&self);
}

/// Produces fresh agent channels.
pub trait AgentChannelFactory: Send + Sync {
    /// Create a new channel identified by `scoped_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Channel`](crate::AppError::Channel) if the agent
    /// instance cannot be brought up.
    fn create(
        &self,
        scoped_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn AgentChannel>>> + Send + '_>>;
}
