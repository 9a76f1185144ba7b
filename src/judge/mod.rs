//! Pairwise trajectory judging and reward assignment.

pub mod pairwise;
pub mod reward;
pub mod trajectory;
pub mod verdict;

pub use pairwise::{
    AnyJudgeBackend, Comparison, JudgeBackend, LlmJudgeBackend, PairwiseJudge, ScriptedJudge,
};
pub use reward::{
    assign_pairwise_reward, eval_reward, group_reward, reward_post_process, rollout_and_evaluate,
    score_group, RewardError,
};
pub use trajectory::{extract_trajectory, StepRecord, Trajectory, NO_REPLY};
pub use verdict::{parse_verdict, scores_or_neutral, JudgeVerdict, Winner, NEUTRAL_SCORE};
