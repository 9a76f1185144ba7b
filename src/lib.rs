//! Itinera: step-bounded tool-use rollouts for a travel-planning agent, and a
//! bidirectional pairwise judge that turns competing rollouts into rewards.
//!
//! The rollout loop ([`rollout::AgentLoop`]) always returns a fixed-length
//! batch of step snapshots; the judge ([`judge::PairwiseJudge`]) compares two
//! transcripts in both presentation orders to cancel slot bias.

pub mod config;
pub mod judge;
pub mod model;
pub mod rollout;
pub mod tools;
