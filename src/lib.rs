//! Suggestion voting, auto-acceptance and translation locking.
//!
//! [`ReviewEngine`] owns all review state. Everything it does to a single
//! translation unit happens under that unit's mutex, so votes, promotions,
//! direct saves and lock changes on one unit are serialized while
//! different units proceed in parallel.

pub mod auth;
pub mod clock;
pub mod components;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod events;
pub mod lock;
pub mod metrics;
pub mod model;
pub mod policy;
pub mod retry;
pub mod scheduler;
pub mod security;
pub mod server;
pub mod store;

pub use auth::{Authorizer, Capability, PrivilegeGate, StaticAuthorizer};
pub use components::{ComponentCatalog, ComponentRegistry, ComponentVotingConfig};
pub use engine::ReviewEngine;
pub use error::ReviewError;
pub use events::{Notifier, ReviewEvent};
pub use model::{ComponentKey, SuggestionId, UnitKey, VotePolarity};
