//! Letters and the letter store contract.

mod model;
mod repository;
mod store;

pub use model::{Letter, LetterId, NewLetter, display_date};
pub use repository::LetterRepository;
pub use store::{InsertFeed, LetterStore, StoreError};
