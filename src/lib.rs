//! chatloop: session-scoped conversation runtime.
//!
//! Bridges a provider's blocking, chunked chat-completion stream into an
//! async event stream and drives every conversation through a graph of
//! stages that loops back to `await_user_message` after each answer, so a
//! session can keep taking turns for as long as the process lives.
//!
//! # Quick Start
//!
//! ```no_run
//! use futures::StreamExt;
//! use chatloop::prelude::*;
//!
//! # async fn example() -> chatloop::error::Result<()> {
//! let config = ChatLoopConfig::from_env()?;
//! let provider = chatloop::provider::create_provider(&config)?;
//! let runtime = ConversationRuntime::new(provider).with_config(&config);
//!
//! let mut events = runtime.submit("sess-A", "plan a 3-day trip to Kyoto");
//! while let Some(event) = events.next().await {
//!     if let StreamEvent::TextDelta { text } = event? {
//!         print!("{text}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod graph;
pub mod prelude;
pub mod provider;
pub mod registry;
pub mod runtime;
pub mod tools;
pub mod types;

#[cfg(feature = "cli")]
pub mod cli;
