//! Tolerant parsing of judge replies.
//!
//! The judge is asked for strict JSON, but replies often arrive wrapped in
//! prose or code fences, or with the keys in a different order. Scores are
//! therefore pulled out with narrow regexes instead of a JSON parser.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Score assumed for both sides when a reply cannot be used.
pub const NEUTRAL_SCORE: f64 = 5.0;

static SCORE_A: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?si)"combined_scores"\s*:\s*\{[^{}]*?"Agent_A"\s*:\s*([0-9]+(?:\.[0-9]+)?)"#)
        .expect("invalid Agent_A score regex")
});

static SCORE_B: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?si)"combined_scores"\s*:\s*\{[^{}]*?"Agent_B"\s*:\s*([0-9]+(?:\.[0-9]+)?)"#)
        .expect("invalid Agent_B score regex")
});

static WINNER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)"winner"\s*:\s*"(Agent_A|Agent_B|Tie)""#).expect("invalid winner regex")
});

/// The side the judge declared as better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Winner {
    AgentA,
    AgentB,
    Tie,
}

impl Winner {
    fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "agent_a" => Some(Self::AgentA),
            "agent_b" => Some(Self::AgentB),
            "tie" => Some(Self::Tie),
            _ => None,
        }
    }
}

impl fmt::Display for Winner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AgentA => write!(f, "Agent_A"),
            Self::AgentB => write!(f, "Agent_B"),
            Self::Tie => write!(f, "Tie"),
        }
    }
}

/// Scores for the two presentation slots of one judge call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    pub score_a: f64,
    pub score_b: f64,
    pub winner: Option<Winner>,
}

impl JudgeVerdict {
    pub fn neutral() -> Self {
        Self {
            score_a: NEUTRAL_SCORE,
            score_b: NEUTRAL_SCORE,
            winner: None,
        }
    }
}

/// Parse a judge reply. Both combined scores must be present; the winner is
/// optional.
pub fn parse_verdict(reply: &str) -> Option<JudgeVerdict> {
    let score_a = capture_score(&SCORE_A, reply)?;
    let score_b = capture_score(&SCORE_B, reply)?;
    let winner = WINNER
        .captures(reply)
        .and_then(|caps| caps.get(1))
        .and_then(|m| Winner::from_label(m.as_str()));
    Some(JudgeVerdict {
        score_a,
        score_b,
        winner,
    })
}

/// The two combined scores, or the neutral pair when the reply has none.
pub fn scores_or_neutral(reply: &str) -> (f64, f64) {
    parse_verdict(reply)
        .map(|v| (v.score_a, v.score_b))
        .unwrap_or((NEUTRAL_SCORE, NEUTRAL_SCORE))
}

fn capture_score(re: &Regex, reply: &str) -> Option<f64> {
    re.captures(reply)?.get(1)?.as_str().parse().ok()
}
