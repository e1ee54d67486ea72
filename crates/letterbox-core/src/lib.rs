//! # letterbox-core
//!
//! Domain model and external-service contracts for Letterbox, a two-party
//! letter correspondence system.
//!
//! This crate provides:
//! - The [`Letter`] domain model and [`Identity`] naming
//! - The [`LetterStore`] contract (query, insert, insert subscription)
//! - The [`IdentityProvider`] contract (sessions, profile lookup)
//! - SQLite-backed reference implementations of both contracts

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod auth;
mod identity;
pub mod letter;

pub use auth::{AuthError, IdentityProvider, Profile, RegistryProvider, Session, UserId};
pub use identity::Identity;
pub use letter::{
    InsertFeed, Letter, LetterId, LetterRepository, LetterStore, NewLetter, StoreError,
    display_date,
};
