//! Matchup Backend Library
//!
//! Cross-source reconciliation and aggregation engine for historical
//! batter/pitcher matchups: matches individual pitches between a pitch feed
//! and an independent play-index feed that disagree on ordering, then turns
//! the matched at-bat set into audited plate-appearance statistics.

pub mod aggregate;
pub mod api;
pub mod cache;
pub mod engine;
pub mod feeds;
pub mod guard;
pub mod matching;
pub mod models;
pub mod resolver;
