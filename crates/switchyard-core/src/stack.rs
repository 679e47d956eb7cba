//! Execution context: live progress through a plan of pipeline and failover levels.
//!
//! A multi-step transform is a tree. Each composite step opens a [`Level`]
//! whose steps are either run in order ([`LevelKind::Pipeline`]) or tried in
//! turn until one succeeds ([`LevelKind::Failover`]). The context keeps the
//! open levels as a stack: the first level is the request itself, the last is
//! the one currently running, and each level was opened by the current step
//! of the level below it.
//!
//! Success and failure of a step are reported with
//! [`ExecutionContext::remove_successful_step`] and
//! [`ExecutionContext::remove_failed_step`]. A level that is resolved by the
//! outcome is popped and the same outcome applies to the step that opened it,
//! until a level has more work to do or the stack is empty.
//!
//! The context is plain data and is owned by whoever is handling the request.
//! [`ExecutionContext::encode`] and [`ExecutionContext::decode`] move it
//! between processes.

use crate::model::TransformOptions;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a level treats its steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LevelKind {
    /// Every step must succeed, in order.
    Pipeline,
    /// Steps are alternatives; the first success resolves the level.
    Failover,
}

impl LevelKind {
    /// Single-letter tag used in the wire form.
    pub fn tag(self) -> &'static str {
        match self {
            LevelKind::Pipeline => "P",
            LevelKind::Failover => "F",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "P" => Some(LevelKind::Pipeline),
            "F" => Some(LevelKind::Failover),
            _ => None,
        }
    }
}

impl fmt::Display for LevelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LevelKind::Pipeline => write!(f, "pipeline"),
            LevelKind::Failover => write!(f, "failover"),
        }
    }
}

/// A transformer applied to one source/target pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub transformer_name: String,
    pub source_media_type: String,
    pub target_media_type: String,
}

impl Step {
    pub fn new(
        transformer_name: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            transformer_name: transformer_name.into(),
            source_media_type: source.into(),
            target_media_type: target.into(),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} -> {})",
            self.transformer_name, self.source_media_type, self.target_media_type
        )
    }
}

/// Steps for a level that has not been opened yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelBuilder {
    kind: LevelKind,
    steps: Vec<Step>,
}

impl LevelBuilder {
    pub fn new(kind: LevelKind) -> Self {
        Self {
            kind,
            steps: Vec::new(),
        }
    }

    pub fn pipeline() -> Self {
        Self::new(LevelKind::Pipeline)
    }

    pub fn failover() -> Self {
        Self::new(LevelKind::Failover)
    }

    /// Append a step.
    pub fn step(
        mut self,
        transformer_name: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        self.steps.push(Step::new(transformer_name, source, target));
        self
    }

    pub fn push(&mut self, step: Step) {
        self.steps.push(step);
    }

    pub fn kind(&self) -> LevelKind {
        self.kind
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }
}

/// An open level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Level {
    kind: LevelKind,
    steps: Vec<Step>,
    cursor: usize,
    reference: u64,
    started_at: DateTime<Utc>,
    retries: u32,
}

impl Level {
    fn open(builder: LevelBuilder) -> Result<Self, StackError> {
        if builder.steps.is_empty() {
            return Err(StackError::EmptyLevel);
        }
        Ok(Self {
            kind: builder.kind,
            steps: builder.steps,
            cursor: 0,
            reference: 1,
            started_at: Utc::now(),
            retries: 0,
        })
    }

    /// Reassemble a level, checking that it is well formed.
    pub(crate) fn from_parts(
        kind: LevelKind,
        steps: Vec<Step>,
        cursor: usize,
        reference: u64,
        started_at: DateTime<Utc>,
        retries: u32,
    ) -> Result<Self, StackError> {
        if steps.is_empty() {
            return Err(StackError::Structure("a level without steps".into()));
        }
        if cursor >= steps.len() {
            return Err(StackError::Structure(format!(
                "a cursor in range: {} of {} steps",
                cursor,
                steps.len()
            )));
        }
        if let Some(step) = steps.iter().find(|s| {
            s.transformer_name.trim().is_empty()
                || s.source_media_type.trim().is_empty()
                || s.target_media_type.trim().is_empty()
        }) {
            return Err(StackError::Structure(format!(
                "a blank field in step {:?}",
                step
            )));
        }
        Ok(Self {
            kind,
            steps,
            cursor,
            reference,
            started_at,
            retries,
        })
    }

    pub fn kind(&self) -> LevelKind {
        self.kind
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn current_step(&self) -> &Step {
        &self.steps[self.cursor]
    }

    pub fn reference(&self) -> u64 {
        self.reference
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    fn has_next(&self) -> bool {
        self.cursor + 1 < self.steps.len()
    }

    fn advance(&mut self) {
        self.cursor += 1;
        self.reference += 1;
        self.retries = 0;
    }
}

/// What remains after a step outcome has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// There is a current step to run.
    Continue,
    /// The stack emptied and the request succeeded.
    Completed,
    /// The stack emptied and the request failed.
    Failed,
}

/// Errors from stack operations and from decoding a context.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StackError {
    #[error("execution context has no open levels")]
    Empty,

    #[error("a level needs at least one step")]
    EmptyLevel,

    #[error("execution context did not have {0}")]
    Structure(String),

    #[error("failed to encode execution context: {0}")]
    Encode(String),
}

/// Progress of one request through its plan.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutionContext {
    options: TransformOptions,
    source_reference: Option<String>,
    levels: Vec<Level>,
}

impl ExecutionContext {
    /// A context with no levels yet, carrying the request's options and source.
    pub fn new(options: TransformOptions, source_reference: Option<String>) -> Self {
        Self {
            options,
            source_reference,
            levels: Vec::new(),
        }
    }

    pub(crate) fn from_parts(
        options: TransformOptions,
        source_reference: Option<String>,
        levels: Vec<Level>,
    ) -> Self {
        Self {
            options,
            source_reference,
            levels,
        }
    }

    /// Options the request was made with.
    pub fn options(&self) -> &TransformOptions {
        &self.options
    }

    /// Reference to the request's original source content.
    pub fn source_reference(&self) -> Option<&str> {
        self.source_reference.as_deref()
    }

    /// Open levels, outermost first.
    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn is_finished(&self) -> bool {
        self.levels.is_empty()
    }

    /// Open a level for the current step.
    pub fn add_level(&mut self, level: LevelBuilder) -> Result<(), StackError> {
        self.levels.push(Level::open(level)?);
        Ok(())
    }

    /// The step to run next.
    pub fn current_step(&self) -> Option<&Step> {
        self.levels.last().map(Level::current_step)
    }

    /// Name of the step that opened the current level.
    pub fn parent_name(&self) -> Option<&str> {
        let depth = self.levels.len();
        if depth < 2 {
            return None;
        }
        Some(&self.levels[depth - 2].current_step().transformer_name)
    }

    /// Whether the current step is one alternative of a failover.
    pub fn is_parent_a_failover(&self) -> bool {
        self.levels
            .last()
            .is_some_and(|l| l.kind == LevelKind::Failover)
    }

    pub fn is_last_step_in_level(&self) -> bool {
        self.levels.last().is_some_and(|l| !l.has_next())
    }

    /// The current step succeeded.
    pub fn remove_successful_step(&mut self) -> Result<Progress, StackError> {
        self.resolve(true)
    }

    /// The current step failed for good.
    pub fn remove_failed_step(&mut self) -> Result<Progress, StackError> {
        self.resolve(false)
    }

    fn resolve(&mut self, success: bool) -> Result<Progress, StackError> {
        if self.levels.is_empty() {
            return Err(StackError::Empty);
        }
        loop {
            let Some(level) = self.levels.last_mut() else {
                return Ok(if success {
                    Progress::Completed
                } else {
                    Progress::Failed
                });
            };
            // A pipeline carries on after a success, a failover after a failure.
            let carry_on = match level.kind {
                LevelKind::Pipeline => success,
                LevelKind::Failover => !success,
            };
            if carry_on && level.has_next() {
                level.advance();
                return Ok(Progress::Continue);
            }
            // Resolved: the outcome belongs to the step that opened this level.
            self.levels.pop();
        }
    }

    /// Abandon the whole plan.
    pub fn remove_remaining_levels(&mut self) {
        self.levels.clear();
    }

    /// Dotted path of level counters, outermost first (e.g. `123.2.1`).
    pub fn reference(&self) -> String {
        self.levels
            .iter()
            .map(|l| l.reference.to_string())
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Set the current level's counter, typically to a request number on the
    /// outermost level.
    pub fn set_reference(&mut self, reference: u64) -> Result<(), StackError> {
        self.current_level_mut()?.reference = reference;
        Ok(())
    }

    pub fn increment_reference(&mut self) -> Result<(), StackError> {
        self.current_level_mut()?.reference += 1;
        Ok(())
    }

    /// Attempts already made at the current step.
    pub fn attempted_retries(&self) -> u32 {
        self.levels.last().map_or(0, |l| l.retries)
    }

    pub fn increment_attempted_retries(&mut self) -> Result<u32, StackError> {
        let level = self.current_level_mut()?;
        level.retries += 1;
        Ok(level.retries)
    }

    pub fn reset_attempted_retries(&mut self) {
        if let Some(level) = self.levels.last_mut() {
            level.retries = 0;
        }
    }

    /// Restart the current level's clock.
    pub fn set_start_time(&mut self) {
        if let Some(level) = self.levels.last_mut() {
            level.started_at = Utc::now();
        }
    }

    /// Time since the current level started.
    pub fn elapsed(&self) -> Option<TimeDelta> {
        self.levels.last().map(|l| Utc::now() - l.started_at)
    }

    fn current_level_mut(&mut self) -> Result<&mut Level, StackError> {
        self.levels.last_mut().ok_or(StackError::Empty)
    }
}
