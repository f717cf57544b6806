//! Context window construction.
//!
//! The prompt sent upstream is the system instruction followed by the most
//! recent turns of the session. Truncation is a plain suffix slice: it does
//! not try to keep user/assistant pairs together.

use crate::session::Turn;
use relay_common::config::SessionConfig;

/// Trailing turns kept by default (five exchanges).
pub const DEFAULT_CONTEXT_TURNS: usize = 10;

/// The bounded prompt for one completion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextWindow {
    turns: Vec<Turn>,
}

impl ContextWindow {
    /// `[system] ++ last min(max_turns, history.len()) turns of history`.
    pub fn build(system_prompt: &str, history: &[Turn], max_turns: usize) -> Self {
        let start = history.len().saturating_sub(max_turns);

        let mut turns = Vec::with_capacity(history.len() - start + 1);
        turns.push(Turn::system(system_prompt));
        turns.extend_from_slice(&history[start..]);

        Self { turns }
    }

    /// History turns included, excluding the system instruction.
    pub fn history_len(&self) -> usize {
        self.turns.len() - 1
    }

    pub fn into_turns(self) -> Vec<Turn> {
        self.turns
    }
}

/// System prompt and truncation limit applied to every request.
#[derive(Debug, Clone)]
pub struct ContextPolicy {
    system_prompt: String,
    max_turns: usize,
}

impl ContextPolicy {
    pub fn new(system_prompt: impl Into<String>, max_turns: usize) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            max_turns,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.system_prompt.clone(), config.context_turns)
    }

    pub fn window(&self, history: &[Turn]) -> ContextWindow {
        ContextWindow::build(&self.system_prompt, history, self.max_turns)
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }
}
