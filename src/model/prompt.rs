//! Prompt templates.
//!
//! - **Step header**: the system turn the rollout loop rewrites every step.
//! - **Pairwise judge**: the rubric system prompt and the A/B comparison
//!   prompt sent to the judge model.

use chrono::{DateTime, Local, TimeZone};

use crate::model::api::ChatMessage;

// ---------------------------------------------------------------------------
// Step header
// ---------------------------------------------------------------------------

/// Instruction appended to the header once the tool budget is spent.
pub const ANSWER_DIRECTLY: &str = "Answer directly without using any tools.";

/// Build the step-aware system header at the current wall-clock time.
pub fn build_system_message(step_idx: usize, max_steps: usize) -> ChatMessage {
    build_system_message_at(step_idx, max_steps, &Local::now())
}

/// Build the step-aware system header for a fixed point in time.
pub fn build_system_message_at<Tz>(
    step_idx: usize,
    max_steps: usize,
    now: &DateTime<Tz>,
) -> ChatMessage
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let mut prompt = format!("Current time: {}", now.format("%d/%m/%Y, %H:%M"));
    prompt.push_str(&format!(
        "\n\nTool budget: {max_steps} rounds, {step_idx} of {max_steps} rounds used."
    ));
    if step_idx >= max_steps {
        prompt.push_str("\n\n");
        prompt.push_str(ANSWER_DIRECTLY);
    }
    ChatMessage::system(prompt)
}

// ---------------------------------------------------------------------------
// Pairwise judge
// ---------------------------------------------------------------------------

/// Default rubric for comparing two travel-planning agents.
pub const TRAVEL_JUDGE_SYSTEM_PROMPT: &str = r#"You are an expert reviewer of travel-planning LLM agents, with deep knowledge of the travel industry and a rigorous evaluation methodology. For the same user query you will score the reasoning path (Path) and the final answer (Answer) of Agent A and Agent B on each dimension, then give combined scores and a winner. Follow the metrics, scoring rules and output format below exactly.

1. Input format

<USER_QUERY>
{the user's original request}
</USER_QUERY>

<PATH_A>
{the full reasoning path of Agent A}
</PATH_A>

<PATH_B>
{the full reasoning path of Agent B}
</PATH_B>

<Answer_A>
{the full answer of Agent A}
</Answer_A>

<Answer_B>
{the full answer of Agent B}
</Answer_B>

2. Path evaluation

Dimensions:
1. Breadth: does the path cover the problem from several angles (time, space, transport, price, policy) without redundant or repeated steps?
2. Relevance: how well each step matches the user's core needs.
3. Detail: are the facts, figures, times, costs and booking rules gathered sufficient, accurate and useful?

Rules:
- Judge only the tool calls actually made in the path, not the depth of the reasoning text.
- Score each dimension 0-10; 0 means entirely missing, 10 means outstanding.
- Overall_P = mean of the three dimensions, rounded to an integer.

3. Answer evaluation

Dimensions:
1. Relevance: are all sub-requests and constraints answered, in an order that fits the scenario?
2. Feasibility: is the plan self-consistent and practical, free of obvious conflicts?
3. Details: are timetables, fares, travel times and tips rich and useful?
4. Clarity: is the answer well structured and easy to read?

Rules:
- Use the knowledge gathered in the corresponding path when judging the answer.
- Score each dimension 0-10; 0 means entirely missing, 10 means outstanding.
- Overall_A = mean of the four dimensions, rounded to an integer.

4. Combined score and winner

combined_scores = 0.6 * Overall_P + 0.4 * Overall_A, rounded to one decimal place.
If the combined scores are equal the winner is Tie.

Output format (follow strictly, add nothing else):
{
  "analysis": {
    "path_A": "<strengths and weaknesses of path A>",
    "path_B": "<strengths and weaknesses of path B>",
    "answer_A": "<strengths and weaknesses of answer A>",
    "answer_B": "<strengths and weaknesses of answer B>"
  },
  "path_scores": {
    "Agent_A": {"breadth": <0-10>, "relevance": <0-10>, "detail": <0-10>, "overall_p": <0-10>},
    "Agent_B": {"breadth": <0-10>, "relevance": <0-10>, "detail": <0-10>, "overall_p": <0-10>}
  },
  "answer_scores": {
    "Agent_A": {"relevance": <0-10>, "feasibility": <0-10>, "details": <0-10>, "clarity": <0-10>, "overall_a": <0-10>},
    "Agent_B": {"relevance": <0-10>, "feasibility": <0-10>, "details": <0-10>, "clarity": <0-10>, "overall_a": <0-10>}
  },
  "combined_scores": {
    "Agent_A": <0-10>,
    "Agent_B": <0-10>
  },
  "winner": "<Agent_A | Agent_B | Tie>"
}

Requirements:
- Think through each dimension independently before scoring, and stay fair.
- Base every comment only on the supplied text; bring in no outside information.
- Comments must be specific and traceable to the text.
- Keep exactly to the JSON template so the result can be parsed by a program.

Tools:
- poi_search searches points of interest inside a given city.
- around_search searches places within a circle given a centre and radius.
- web_search runs a general open-knowledge search.
- search_flights searches flights and returns fares and timetables.
- direction plans a route between an origin and a destination and accepts waypoints, so a multi-stop route may be planned with several calls or with one call using waypoints. Judge whether every stop on the route is covered first, then the completeness and soundness of the route information."#;

/// Build the user turn that presents two agents side by side.
///
/// `path_a` / `path_b` are already-rendered trajectories.
pub fn pairwise_judge_prompt(
    query: &str,
    path_a: &str,
    path_b: &str,
    answer_a: &str,
    answer_b: &str,
) -> String {
    format!(
        "<USER_QUERY>\n{query}\n</USER_QUERY>\n\n\
         <PATH_A>\n{path_a}\n</PATH_A>\n\n\
         <PATH_B>\n{path_b}\n</PATH_B>\n\n\
         <Answer_A>\n{answer_a}\n</Answer_A>\n\n\
         <Answer_B>\n{answer_b}\n</Answer_B>"
    )
}

/// The two-turn conversation sent to the judge model.
pub fn pairwise_judge_messages(system_prompt: &str, user_prompt: String) -> Vec<ChatMessage> {
    vec![ChatMessage::system(system_prompt), ChatMessage::user(user_prompt)]
}
