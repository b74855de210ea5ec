//! # invitegate
//!
//! Issues single-use channel invites under the provider's rate limit and
//! confirms joins from the provider's webhook exactly once.
//!
//! Requests are stored in Postgres and driven through
//! `queued → processing → done | failed` by a pgmq-fed [`worker::Worker`].
//! Join events are matched back to their request through a digest-keyed
//! link index ([`store::LinkIndex`]).

pub mod backoff;
pub mod config;
pub mod db;
pub mod digest;
pub mod engine;
pub mod error;
pub mod intake;
pub mod model;
pub mod notify;
pub mod provider;
pub mod queue;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod webhook;
pub mod worker;
