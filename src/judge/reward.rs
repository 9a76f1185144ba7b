//! Turning judge comparisons into rewards.
//!
//! - [`eval_reward`] scores one rollout against its task's reference label.
//! - [`group_reward`] ranks the members of a rollout group against each other
//!   with a [`GroupStrategy`].
//! - [`reward_post_process`] flattens a batch into raw and processed reward
//!   vectors.
//! - [`score_group`] runs both for a group, with the strategy taken from
//!   [`RewardConfig`].

use anyhow::{Context, Result};
use futures::future::join_all;
use thiserror::Error;
use tracing::info;

use crate::config::{GroupStrategy, RewardConfig};
use crate::judge::pairwise::{JudgeBackend, PairwiseJudge};
use crate::model::api::ChatMessage;
use crate::rollout::agent_loop::AgentLoop;
use crate::rollout::generator::Generator;
use crate::rollout::types::{Sample, Task};
use crate::tools::ToolRegistry;

/// Misuse of the reward functions.
#[derive(Debug, Error, PartialEq)]
pub enum RewardError {
    #[error("group size must be greater than 1, got {size}")]
    GroupTooSmall { size: usize },

    #[error("sample {index} has no reference label to compare against")]
    MissingLabel { index: i64 },

    #[error("group member {member} has no samples")]
    EmptyMember { member: usize },
}

/// 1.0 if `final_a` is strictly greater, 0.0 if strictly smaller, 0.5 on a tie.
pub fn assign_pairwise_reward(final_a: f64, final_b: f64) -> f64 {
    if final_a > final_b {
        1.0
    } else if final_a < final_b {
        0.0
    } else {
        0.5
    }
}

/// Compare a rollout's final transcript with its reference label and store
/// the reward on the sample.
pub async fn eval_reward<B: JudgeBackend>(
    judge: &PairwiseJudge<B>,
    sample: &mut Sample,
) -> Result<f64> {
    let reference = sample
        .label
        .as_deref()
        .ok_or(RewardError::MissingLabel { index: sample.index })?;

    let comparison = judge
        .bidirectional_compare(sample.query(), &sample.messages, reference)
        .await;
    let reward = comparison.reward_a();
    info!(
        index = sample.index,
        prediction = comparison.score_a,
        reference = comparison.score_b,
        reward,
        "evaluation reward"
    );

    sample.reward = Some(reward);
    Ok(reward)
}

/// Evaluation mode: roll out `task` and score only its final snapshot.
pub async fn rollout_and_evaluate<G: Generator, B: JudgeBackend>(
    agent: &AgentLoop,
    task: &Task,
    generator: &G,
    tools: &ToolRegistry,
    judge: &PairwiseJudge<B>,
) -> Result<Sample> {
    let mut samples = agent.run(task, generator, tools).await?;
    let mut last = samples.pop().context("rollout produced no samples")?;
    eval_reward(judge, &mut last).await?;
    Ok(last)
}

/// Rank the members of a rollout group against each other.
///
/// Each member is one rollout (a `Vec<Sample>`); its final snapshot is the
/// prediction. Every non-padding sample of member `i` receives reward `i` of
/// the strategy's output, which is also returned. Groups of one or zero
/// members are rejected before the judge is called.
pub async fn group_reward<B: JudgeBackend>(
    judge: &PairwiseJudge<B>,
    strategy: GroupStrategy,
    group: &mut [Vec<Sample>],
) -> Result<Vec<f64>> {
    if group.len() <= 1 {
        return Err(RewardError::GroupTooSmall { size: group.len() }.into());
    }

    let mut predictions = Vec::with_capacity(group.len());
    for (member, samples) in group.iter().enumerate() {
        let last = samples.last().ok_or(RewardError::EmptyMember { member })?;
        predictions.push(last.messages.as_slice());
    }
    let query = group[0].last().map(|s| s.query().to_string()).unwrap_or_default();

    let rewards = match strategy {
        GroupStrategy::Anchor => anchor_rewards(judge, &query, &predictions).await,
        GroupStrategy::RoundRobin => round_robin_rewards(judge, &query, &predictions).await,
    };
    info!(strategy = ?strategy, members = group.len(), rewards = ?rewards, "group reward");

    for (samples, reward) in group.iter_mut().zip(&rewards) {
        for sample in samples.iter_mut().filter(|s| !s.is_padding()) {
            sample.reward = Some(*reward);
        }
    }
    Ok(rewards)
}

/// Member 0 is the anchor. Every other member is judged against it and gets
/// its own outcome; the anchor gets the mean of its outcomes.
async fn anchor_rewards<B: JudgeBackend>(
    judge: &PairwiseJudge<B>,
    query: &str,
    predictions: &[&[ChatMessage]],
) -> Vec<f64> {
    let anchor = predictions[0];
    let outcomes: Vec<f64> = join_all(
        predictions[1..]
            .iter()
            .map(|candidate| judge.bidirectional_compare(query, candidate, anchor)),
    )
    .await
    .into_iter()
    .map(|c| c.reward_a())
    .collect();

    let anchor_reward =
        outcomes.iter().map(|r| 1.0 - r).sum::<f64>() / outcomes.len() as f64;
    std::iter::once(anchor_reward).chain(outcomes).collect()
}

/// Every pair is judged once; a win is worth 1 point and a tie 0.5. The
/// reward is the points divided by the number of opponents.
async fn round_robin_rewards<B: JudgeBackend>(
    judge: &PairwiseJudge<B>,
    query: &str,
    predictions: &[&[ChatMessage]],
) -> Vec<f64> {
    let n = predictions.len();
    let pairs: Vec<(usize, usize)> = (0..n)
        .flat_map(|i| (i + 1..n).map(move |j| (i, j)))
        .collect();

    let comparisons = join_all(
        pairs
            .iter()
            .map(|&(i, j)| judge.bidirectional_compare(query, predictions[i], predictions[j])),
    )
    .await;

    let mut points = vec![0.0; n];
    for (&(i, j), comparison) in pairs.iter().zip(comparisons) {
        let reward = comparison.reward_a();
        points[i] += reward;
        points[j] += 1.0 - reward;
    }
    points.into_iter().map(|p| p / (n - 1) as f64).collect()
}

/// Raw and processed rewards for a batch. Rewards are used as is, so both
/// vectors are equal; padding and unscored samples count as 0.0.
pub fn reward_post_process(samples: &[Sample]) -> (Vec<f64>, Vec<f64>) {
    let raw: Vec<f64> = samples
        .iter()
        .map(|s| if s.is_padding() { 0.0 } else { s.reward_value() })
        .collect();
    (raw.clone(), raw)
}

/// Score a rollout group with the configured strategy, then flatten every
/// member's samples, in member order, into raw and processed rewards.
pub async fn score_group<B: JudgeBackend>(
    judge: &PairwiseJudge<B>,
    config: &RewardConfig,
    group: &mut [Vec<Sample>],
) -> Result<(Vec<f64>, Vec<f64>)> {
    group_reward(judge, config.group_strategy, group).await?;
    let flat: Vec<Sample> = group.iter().flatten().cloned().collect();
    Ok(reward_post_process(&flat))
}
