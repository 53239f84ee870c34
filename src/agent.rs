use async_trait::async_trait;
use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

use crate::action::{Action, ActionSequence};
use crate::prompt::PromptRequest;
use crate::response::{JsonResponseMapper, ResponseDecodeError, ResponseMapper};

/// Consecutive failed attempts tolerated before a run is failed.
pub const DEFAULT_RETRY_LIMIT: u32 = 3;
pub const DEFAULT_MAX_DELAY_SECS: u64 = 60;

const NO_NEXT_ACTION: &str = "unable to determine next action";
const SEQUENCE_BUDGET_EXHAUSTED: &str = "sequence budget exhausted";
const RUN_BLOCKING_IN_RUNTIME: &str = "run_blocking called from within an async runtime";

// ========================= Core Types =========================

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("prompt error: {0}")]
    Prompt(String),
    #[error("screen capture error: {0}")]
    Screen(String),
    #[error("model error: {0}")]
    Model(String),
    #[error("model did not answer within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Decode(#[from] ResponseDecodeError),
    #[error("other error: {0}")]
    Other(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RunOutcome {
    Passed,
    Failed { reason: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub goal: String,
    pub outcome: RunOutcome,
    pub sequences: usize,
    pub time_ms: u128,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.outcome == RunOutcome::Passed
    }

    fn not_started(goal: &str, reason: String) -> Self {
        Self {
            run_id: nanoid!(),
            goal: goal.to_string(),
            outcome: RunOutcome::Failed { reason },
            sequences: 0,
            time_ms: 0,
        }
    }
}

/// Per-run state; cleared by [`Agent::reset_session`].
#[derive(Clone, Debug, Default)]
pub struct RunState {
    history: Vec<ActionSequence>,
    retries: u32,
}

// ========================= Pluggable Subsystems =========================

/// Language model transport. Replies must already be stripped of markdown
/// code fences.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn prompt(&self, request: &PromptRequest) -> Result<String, AgentError>;
}

#[async_trait]
pub trait PromptProvider: Send + Sync {
    async fn make_prompt(
        &self,
        goal: &str,
        history: &[ActionSequence],
    ) -> Result<PromptRequest, AgentError>;
}

/// Executes a sequence against the system under test. Failures stay inside
/// the performer.
#[async_trait]
pub trait ActionPerformer: Send + Sync {
    async fn perform(&self, sequence: &ActionSequence);
}

#[async_trait]
impl<T: ActionPerformer + ?Sized> ActionPerformer for Arc<T> {
    async fn perform(&self, sequence: &ActionSequence) {
        (**self).perform(sequence).await
    }
}

// ========================= Agent Core =========================

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub retry_limit: u32,
    /// Upper bound on a single model call; `None` waits indefinitely.
    pub model_timeout: Option<Duration>,
    /// Stop with a failure after this many sequences without a verdict.
    pub max_sequences: Option<usize>,
    /// Longest pause honoured between sequences, whatever the model asks for.
    pub max_delay: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            retry_limit: DEFAULT_RETRY_LIMIT,
            model_timeout: Some(Duration::from_secs(120)),
            max_sequences: None,
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
        }
    }
}

pub struct Agent<M, R, P, A>
where
    M: ModelClient,
    R: ResponseMapper,
    P: PromptProvider,
    A: ActionPerformer,
{
    client: M,
    mapper: R,
    prompts: P,
    performer: A,
    cfg: AgentConfig,
    state: RunState,
}

impl<M, R, P, A> Agent<M, R, P, A>
where
    M: ModelClient,
    R: ResponseMapper,
    P: PromptProvider,
    A: ActionPerformer,
{
    pub fn new(client: M, mapper: R, prompts: P, performer: A, cfg: AgentConfig) -> Self {
        Self {
            client,
            mapper,
            prompts,
            performer,
            cfg,
            state: RunState::default(),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.cfg
    }

    /// Sequences attempted in the current run, oldest first.
    pub fn history(&self) -> &[ActionSequence] {
        &self.state.history
    }

    pub fn retry_count(&self) -> u32 {
        self.state.retries
    }

    pub fn reset_session(&mut self) {
        self.state = RunState::default();
    }

    /// Drives the test until the model reports success or failure. Never
    /// errors: every problem ends up as a `Failure` action.
    pub async fn run(&mut self, goal: &str) -> RunReport {
        let run_id = nanoid!();
        let start = Instant::now();
        self.reset_session();
        info!(run_id = %run_id, goal = %goal, "test run started");

        let terminal = loop {
            if let Some(max) = self.cfg.max_sequences {
                if self.state.history.len() >= max {
                    warn!(run_id = %run_id, max, "no verdict within sequence budget");
                    let fallback = ActionSequence::failure(SEQUENCE_BUDGET_EXHAUSTED);
                    self.execute(&fallback).await;
                    break fallback;
                }
            }
            let sequence = self.next_sequence(goal).await;
            if let Some(done) = self.perform_and_decide(sequence).await {
                break done;
            }
        };

        let outcome = match terminal.last_action() {
            Some(Action::Success) => RunOutcome::Passed,
            _ => RunOutcome::Failed { reason: terminal.description.clone() },
        };
        let report = RunReport {
            run_id,
            goal: goal.to_string(),
            outcome,
            sequences: self.state.history.len(),
            time_ms: start.elapsed().as_millis(),
        };
        info!(run_id = %report.run_id, outcome = ?report.outcome, sequences = report.sequences, "test run finished");
        report
    }

    /// Synchronous entry point for callers outside an async runtime. Inside
    /// one it refuses to block and reports a failed run.
    pub fn run_blocking(&mut self, goal: &str) -> RunReport {
        if tokio::runtime::Handle::try_current().is_ok() {
            warn!(goal = %goal, "run_blocking called from within an async runtime");
            return RunReport::not_started(goal, RUN_BLOCKING_IN_RUNTIME.to_string());
        }
        match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt.block_on(self.run(goal)),
            Err(e) => RunReport::not_started(goal, format!("failed to start runtime: {e}")),
        }
    }

    /// Performs one sequence; returns it when the run is over.
    async fn perform_and_decide(&mut self, sequence: ActionSequence) -> Option<ActionSequence> {
        let Some(last) = sequence.last_action() else {
            warn!("model produced a sequence without actions");
            let fallback = ActionSequence::failure(NO_NEXT_ACTION);
            self.execute(&fallback).await;
            return Some(fallback);
        };
        let terminal = last.is_terminal();
        let delay = sequence.delay().min(self.cfg.max_delay);
        self.execute(&sequence).await;
        if terminal {
            return Some(sequence);
        }
        tokio::time::sleep(delay).await;
        None
    }

    async fn execute(&mut self, sequence: &ActionSequence) {
        info!(
            step = self.state.history.len(),
            description = %sequence.description,
            actions = sequence.actions.len(),
            "performing sequence"
        );
        self.performer.perform(sequence).await;
        self.state.history.push(sequence.clone());
    }

    /// Asks the model for the next sequence, retrying any failure until the
    /// retry budget is spent.
    async fn next_sequence(&mut self, goal: &str) -> ActionSequence {
        self.state.retries = 0;
        let limit = self.cfg.retry_limit.max(1);
        loop {
            match self.request_sequence(goal).await {
                Ok(sequence) => return sequence,
                Err(err) => {
                    self.state.retries += 1;
                    warn!(attempt = self.state.retries, limit, error = %err, "next sequence request failed");
                    if self.state.retries >= limit {
                        return ActionSequence::failure(err.to_string());
                    }
                }
            }
        }
    }

    async fn request_sequence(&self, goal: &str) -> Result<ActionSequence, AgentError> {
        let request = self.prompts.make_prompt(goal, &self.state.history).await?;
        let reply = match self.cfg.model_timeout {
            Some(limit) => tokio::time::timeout(limit, self.client.prompt(&request))
                .await
                .map_err(|_| AgentError::Timeout(limit))??,
            None => self.client.prompt(&request).await?,
        };
        Ok(self.mapper.map(&reply)?)
    }
}

// ========================= Defaults & Helpers =========================

impl<M, P, A> Agent<M, JsonResponseMapper, P, A>
where
    M: ModelClient,
    P: PromptProvider,
    A: ActionPerformer,
{
    pub fn with_defaults(client: M, prompts: P, performer: A, cfg: AgentConfig) -> Self {
        Self::new(client, JsonResponseMapper::default(), prompts, performer, cfg)
    }
}

/// Logs sequences instead of executing them.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopPerformer;

#[async_trait]
impl ActionPerformer for NoopPerformer {
    async fn perform(&self, sequence: &ActionSequence) {
        for action in &sequence.actions {
            info!(description = %sequence.description, action = ?action, "dry run");
        }
    }
}
