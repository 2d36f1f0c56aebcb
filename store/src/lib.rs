//! SQLite persistence for the discovery pipeline.
//!
//! One database, four tables: interests and dislikes (the user's profile),
//! known facts (served discoveries, with an optional compacted form used to
//! keep prompts short), and pending facts (the pre-generated queue the next
//! "give me a fact" request is served from).
//!
//! A [`DiscoveryStore`] wraps one `rusqlite::Connection`. Connections are
//! `Send` but not `Sync`: every generation cycle opens its own store and
//! moves it into the worker, which is also why the schema is applied
//! idempotently on every open.

mod store;

pub use store::{DiscoveryStore, FactId, KnownFact, PendingFact, Preference};
