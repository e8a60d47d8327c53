//! Matchmaking scoring engine
//!
//! Weighted multi-signal scoring of advertiser/podcast pairs with persisted
//! match rows. Large-fanout recalculation is orchestrated by the automation
//! layer under the scheduler.

pub mod engine;

pub use engine::{MatchEngine, MatchScore, MatchSignals, compose};
