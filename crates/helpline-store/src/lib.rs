//! # helpline-store
//!
//! Chat history for the Helpline relay: an ordered, append-only log of
//! [`ChatEntry`](helpline_shared::ChatEntry) values mirrored to a single JSON
//! snapshot file that is rewritten in full on every mutation.

pub mod history;

mod error;

pub use error::{Result, StoreError};
pub use history::HistoryStore;
