//! Answering bot challenges: picking the option an image shows, and replying to
//! questions. Simple arithmetic is solved locally; the rest goes to a model.

pub mod openai;

use crate::errors::AutosignResult;
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;

pub use openai::OpenAiSolver;

pub const CALCULATION_PROMPT: &str = "You are answering a verification question from a chat bot. \
Reply with the final answer only, without any explanation or punctuation.";

#[async_trait]
pub trait Solver: Send + Sync {
    /// Pick the one option among `options` that answers `query` about `image`.
    async fn choose_option(
        &self,
        image: &[u8],
        query: &str,
        options: &[String],
    ) -> AutosignResult<String>;

    /// Free-form answer to `question` under the system `prompt`.
    async fn answer(&self, prompt: &str, question: &str) -> AutosignResult<String>;
}

static ARITHMETIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(-?\d+)\s*([+\-*/×÷xX])\s*(-?\d+)").expect("Failed to compile arithmetic regex")
});

/// Answer an `a op b` question found anywhere in `text`.
///
/// Division is only answered when it is exact. Returns `None` when no such
/// expression is present or it cannot be evaluated.
pub fn solve_arithmetic(text: &str) -> Option<String> {
    let caps = ARITHMETIC.captures(text)?;
    let a: i64 = caps[1].parse().ok()?;
    let b: i64 = caps[3].parse().ok()?;
    let result = match &caps[2] {
        "+" => a.checked_add(b)?,
        "-" => a.checked_sub(b)?,
        "*" | "×" | "x" | "X" => a.checked_mul(b)?,
        "/" | "÷" => {
            if b == 0 || a % b != 0 {
                return None;
            }
            a / b
        }
        _ => return None,
    };
    Some(result.to_string())
}

/// Solve locally when possible, otherwise ask `solver`.
pub async fn answer_question(solver: Option<&dyn Solver>, question: &str) -> AutosignResult<String> {
    if let Some(answer) = solve_arithmetic(question) {
        return Ok(answer);
    }
    match solver {
        Some(solver) => Ok(solver.answer(CALCULATION_PROMPT, question).await?.trim().to_string()),
        None => Err(crate::errors::AutosignError::Config(format!(
            "no solver configured to answer '{}'",
            question
        ))),
    }
}
