//! Itinera: step-bounded travel-agent rollouts scored by a pairwise judge.
//!
//! - `rollout` -- Roll out one task and save the step snapshots
//! - `judge`   -- Compare two saved transcripts bidirectionally
//! - `eval`    -- Roll out a labelled task and score its final snapshot
//! - `group`   -- Rank saved rollouts of one task against each other

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use itinera::config::ItineraConfig;
use itinera::judge::{
    rollout_and_evaluate, score_group, AnyJudgeBackend, LlmJudgeBackend, PairwiseJudge,
    ScriptedJudge,
};
use itinera::model::api::{ChatMessage, LlmClient};
use itinera::rollout::{
    load_samples, save_samples, AgentLoop, AnyGenerator, LlmGenerator, ScriptedGenerator, Task,
};
use itinera::tools::canned::travel_registry;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// Itinera: step-bounded travel-agent rollouts scored by a pairwise judge
#[derive(Parser)]
#[command(name = "itinera", version, about)]
struct Cli {
    /// Path to a JSON configuration file (uses defaults if not provided).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use the scripted policy and judge instead of live model servers.
    #[arg(long, global = true, default_value_t = false)]
    mock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Roll out one task and save its step snapshots.
    Rollout {
        /// Task JSON file; omit to use `--prompt`.
        #[arg(long)]
        task: Option<PathBuf>,

        /// Prompt text used when no task file is given.
        #[arg(long, default_value = "plan a 2-day Hangzhou trip")]
        prompt: String,

        /// Path to save the samples.
        #[arg(long, default_value = "data/samples.json")]
        output: PathBuf,
    },

    /// Compare two transcripts (JSON turn lists) with the judge.
    Judge {
        /// User query both transcripts answer.
        #[arg(long)]
        query: String,

        /// Transcript in the A position.
        #[arg(long)]
        a: PathBuf,

        /// Transcript in the B position.
        #[arg(long)]
        b: PathBuf,
    },

    /// Roll out a labelled task and score the final snapshot against the label.
    Eval {
        /// Task JSON file with a `label` transcript.
        #[arg(long)]
        task: PathBuf,
    },

    /// Rank saved rollouts of the same task with the configured group strategy.
    Group {
        /// Sample files written by `rollout`, one per group member.
        #[arg(required = true, num_args = 2..)]
        rollouts: Vec<PathBuf>,

        /// Write the rewarded samples back to their files.
        #[arg(long, default_value_t = false)]
        write: bool,
    },
}

// ---------------------------------------------------------------------------
// Entrypoint
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing (reads RUST_LOG env var, defaults to info).
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ItineraConfig::load_from_file(path)?,
        None => ItineraConfig::default(),
    };
    config.apply_env();

    match cli.command {
        Commands::Rollout {
            task,
            prompt,
            output,
        } => {
            let task = match task {
                Some(path) => Task::load_from_file(path)?,
                None => Task::new(prompt.as_str()),
            };
            cmd_rollout(&config, cli.mock, &task, &output).await
        }
        Commands::Judge { query, a, b } => cmd_judge(&config, cli.mock, &query, &a, &b).await,
        Commands::Eval { task } => cmd_eval(&config, cli.mock, &task).await,
        Commands::Group { rollouts, write } => cmd_group(&config, cli.mock, &rollouts, write).await,
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_rollout(
    config: &ItineraConfig,
    mock: bool,
    task: &Task,
    output: &Path,
) -> Result<()> {
    tracing::info!(
        max_steps = config.rollout.max_steps,
        query = task.prompt.query(),
        "Rolling out task"
    );

    let generator = create_generator(config, mock)?;
    let agent = AgentLoop::from_config(&config.rollout);
    let samples = agent.run(task, &generator, &travel_registry()).await?;

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    save_samples(&samples, output)?;

    if let Some(answer) = samples.last().and_then(|s| s.final_assistant()) {
        println!("{}", answer.content);
    }
    Ok(())
}

async fn cmd_judge(
    config: &ItineraConfig,
    mock: bool,
    query: &str,
    a: &Path,
    b: &Path,
) -> Result<()> {
    let transcript_a = load_transcript(a)?;
    let transcript_b = load_transcript(b)?;

    let judge = create_judge(config, mock);
    let comparison = judge
        .bidirectional_compare(query, &transcript_a, &transcript_b)
        .await;

    println!("A: {:.2}", comparison.score_a);
    println!("B: {:.2}", comparison.score_b);
    println!("reward(A): {}", comparison.reward_a());
    Ok(())
}

async fn cmd_eval(config: &ItineraConfig, mock: bool, task_path: &Path) -> Result<()> {
    let task = Task::load_from_file(task_path)?;
    let generator = create_generator(config, mock)?;
    let judge = create_judge(config, mock);
    let agent = AgentLoop::from_config(&config.rollout);

    let sample =
        rollout_and_evaluate(&agent, &task, &generator, &travel_registry(), &judge).await?;

    tracing::info!(reward = sample.reward_value(), "Evaluation finished");
    println!("reward: {}", sample.reward_value());
    Ok(())
}

async fn cmd_group(
    config: &ItineraConfig,
    mock: bool,
    rollouts: &[PathBuf],
    write: bool,
) -> Result<()> {
    let mut group = rollouts
        .iter()
        .map(load_samples)
        .collect::<Result<Vec<_>>>()?;

    let judge = create_judge(config, mock);
    let (raw, _) = score_group(&judge, &config.reward, &mut group).await?;
    tracing::info!(
        strategy = ?config.reward.group_strategy,
        members = group.len(),
        "Group scored"
    );

    for (path, samples) in rollouts.iter().zip(&group) {
        let reward = samples.last().map(|s| s.reward_value()).unwrap_or_default();
        println!("{}: {}", path.display(), reward);
        if write {
            save_samples(samples, path)?;
        }
    }
    println!("rewards: {raw:?}");
    Ok(())
}

fn load_transcript(path: &Path) -> Result<Vec<ChatMessage>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read transcript from {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse transcript from {}", path.display()))
}

// ---------------------------------------------------------------------------
// Collaborator construction
// ---------------------------------------------------------------------------

fn create_generator(config: &ItineraConfig, mock: bool) -> Result<AnyGenerator> {
    if mock {
        tracing::info!("Using scripted travel policy");
        return Ok(AnyGenerator::Scripted(ScriptedGenerator::travel_demo()));
    }
    tracing::info!(
        api_base = %config.policy.api_base,
        model = %config.policy.model_id,
        "Using live policy"
    );
    let client = LlmClient::new(&config.policy.api_base, &config.policy.api_key)?;
    Ok(AnyGenerator::Llm(LlmGenerator::new(
        client,
        config.policy.model_id.clone(),
        &config.rollout,
    )))
}

fn create_judge(config: &ItineraConfig, mock: bool) -> PairwiseJudge<AnyJudgeBackend> {
    let backend = if mock {
        tracing::info!("Using scripted judge");
        AnyJudgeBackend::Scripted(ScriptedJudge::by_answer_length())
    } else {
        tracing::info!(
            api_base = %config.judge.api_base,
            model = %config.judge.model,
            "Using live judge"
        );
        AnyJudgeBackend::Llm(LlmJudgeBackend::new(config.judge.clone()))
    };
    PairwiseJudge::from_config(backend, &config.judge)
}
