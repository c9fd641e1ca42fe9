//! Scripting console: wraps code with the value codec, runs it and keeps a
//! history of what was evaluated.

use serde::Serialize;

use crate::codec::{self, DecodedValue};
use crate::config::DEFAULT_TIMEOUT_MS;
use crate::runner::ScriptExecutor;
use crate::InspectorError;

pub const PROMPT_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub request: String,
    /// Decoded result, or the error text when `error` is set.
    pub response: DecodedValue,
    pub error: bool,
}

#[derive(Debug, Clone)]
pub struct Console {
    history: Vec<HistoryEntry>,
    prompt_history: Vec<String>,
    timeout_ms: u64,
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl Console {
    pub fn new() -> Self {
        Self {
            history: Vec::new(),
            prompt_history: Vec::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// `0` disables the timeout.
    pub fn set_timeout(&mut self, timeout_ms: u64) {
        self.timeout_ms = timeout_ms;
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn prompt_history(&self) -> &[String] {
        &self.prompt_history
    }

    /// Empties the evaluation history; the prompt history is kept.
    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    fn remember_prompt(&mut self, code: &str) {
        if self.prompt_history.last().map(String::as_str) == Some(code) {
            return;
        }
        self.prompt_history.push(code.to_string());
        if self.prompt_history.len() > PROMPT_HISTORY_LIMIT {
            let excess = self.prompt_history.len() - PROMPT_HISTORY_LIMIT;
            self.prompt_history.drain(..excess);
        }
    }

    /// Runs `code` (a function body) on `target_id` and decodes its return
    /// value.
    pub async fn evaluate<E>(
        &mut self,
        runner: &E,
        target_id: &str,
        code: &str,
    ) -> Result<DecodedValue, InspectorError>
    where
        E: ScriptExecutor + ?Sized,
    {
        if code.is_empty() {
            return Err(InspectorError::InvalidArgument("no code to evaluate".into()));
        }
        self.remember_prompt(code);

        let outcome = runner
            .run(target_id, &codec::encode(code), self.timeout_ms)
            .await
            .map(|raw| codec::decode(&raw));

        let entry = match &outcome {
            Ok(value) => HistoryEntry {
                request: code.to_string(),
                response: value.clone(),
                error: false,
            },
            Err(e) => {
                tracing::warn!(target = %target_id, error = %e, "Evaluation failed");
                HistoryEntry {
                    request: code.to_string(),
                    response: DecodedValue::String(e.to_string()),
                    error: true,
                }
            }
        };
        self.history.push(entry);
        outcome
    }
}
