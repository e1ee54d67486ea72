//! # letterbox-sync
//!
//! The identity-scoped live synchronization engine for Letterbox.
//!
//! The engine owns the in-memory collection of letters visible to one
//! resolved identity. For each identity epoch it performs one bulk load,
//! keeps the collection live through the store's insert subscription, and
//! reconciles locally-initiated sends with their echoed insert events,
//! without duplicate, missing or out-of-order entries.
//!
//! ```no_run
//! use std::sync::Arc;
//! use letterbox_core::{LetterRepository, RegistryProvider};
//! use letterbox_sync::{Counterpart, Draft, SyncEngine, Tab};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let store = Arc::new(LetterRepository::in_memory().await?);
//! let provider = Arc::new(RegistryProvider::in_memory().await?);
//!
//! provider.register("peter@letters.example", "Password123!", "Peter").await?;
//! provider.sign_in("peter@letters.example", "Password123!").await?;
//!
//! let engine = SyncEngine::open(store, provider, Arc::new(Counterpart));
//! engine.send(Draft::today("The First Glimpse", "The days grow long without you.")).await?;
//! let inbox = engine.project(Tab::Inbox);
//! engine.close().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod collection;
mod compose;
mod engine;
mod projection;
mod recipient;
mod resolver;

pub use collection::Collection;
pub use compose::{Draft, SendError};
pub use engine::{EngineState, Phase, SyncEngine};
pub use projection::{Tab, project};
pub use recipient::{Counterpart, Fixed, RecipientPolicy};
pub use resolver::{Resolution, resolve_identity};
