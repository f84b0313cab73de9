//! The execution stack and its completion transitions
//!
//! The stack is the whole continuation of a multi-hop request. A router
//! pushes a [`Level`] for every composite capability it descends into and
//! calls [`ExecutionStack::complete_step`] whenever the current step
//! finishes. Nothing else is needed to resume the plan, so any process
//! holding the message can carry on.

use crate::error::{StackError, StackResult};
use crate::level::{now_millis, Level, LevelInput, LevelKind};
use crate::step::Step;
use crate::TOKEN_SEPARATOR;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tokens in front of the levels: options and source reference.
const RESERVED_SLOTS: usize = 2;

/// Result of a dispatched step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Success,
    Failure,
}

/// Where the plan stands after a completion transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// A current step is waiting to be dispatched.
    Next,
    /// Every level drained; the request succeeded.
    Succeeded,
    /// Every level drained; the request failed.
    Failed,
}

impl Progress {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Progress::Next)
    }
}

/// Ordered levels, outermost first, plus the original request inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Option<String>>", into = "Vec<Option<String>>")]
pub struct ExecutionStack {
    options: BTreeMap<String, String>,
    source_reference: Option<String>,
    levels: Vec<Level>,
}

impl ExecutionStack {
    /// Start a stack for a request as first received.
    pub fn new(
        options: BTreeMap<String, String>,
        source_reference: Option<String>,
    ) -> StackResult<Self> {
        for (key, value) in &options {
            if key.is_empty() {
                return Err(StackError::InvalidOptions("empty option name".into()));
            }
            if key.contains(TOKEN_SEPARATOR) || value.contains(TOKEN_SEPARATOR) {
                return Err(StackError::InvalidOptions(format!(
                    "option '{}' contains the token separator",
                    key
                )));
            }
        }
        Ok(Self {
            options,
            source_reference,
            levels: Vec::new(),
        })
    }

    // ── Reserved slots ───────────────────────────────────────────────

    /// Transform options exactly as the first hop received them.
    pub fn initial_options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    /// Source reference exactly as the first hop received it.
    pub fn initial_source_reference(&self) -> Option<&str> {
        self.source_reference.as_deref()
    }

    // ── Levels ───────────────────────────────────────────────────────

    pub fn push_level(&mut self, level: Level) {
        self.levels.push(level);
    }

    /// Number of live levels (excludes the reserved slots).
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn is_finished(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn current_level(&self) -> Option<&Level> {
        self.levels.last()
    }

    /// The step to dispatch next: the front step of the innermost level.
    pub fn current_step(&self) -> Option<&Step> {
        self.current_level().and_then(Level::current_step)
    }

    /// The step of the enclosing level that the innermost level expands.
    pub fn parent_step(&self) -> Option<&Step> {
        let depth = self.levels.len();
        if depth < 2 {
            return None;
        }
        self.levels[depth - 2].current_step()
    }

    /// Input of the innermost level.
    pub fn current_input(&self) -> Option<&LevelInput> {
        self.current_level().map(Level::input)
    }

    /// Dotted trace id built from every level's reference, e.g. `"2.1"`.
    pub fn reference(&self) -> String {
        self.levels
            .iter()
            .map(Level::reference)
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Replace the reference of the outermost level.
    pub fn set_reference(&mut self, reference: impl Into<String>) -> StackResult<()> {
        let top = self.levels.first_mut().ok_or(StackError::NoLiveLevel)?;
        top.set_reference(reference)
    }

    pub fn retry_count(&self) -> u32 {
        self.current_level().map(Level::retry_count).unwrap_or(0)
    }

    pub fn increment_retry(&mut self) -> StackResult<u32> {
        let level = self.levels.last_mut().ok_or(StackError::NoLiveLevel)?;
        Ok(level.increment_retry())
    }

    pub fn reset_retries(&mut self) -> StackResult<()> {
        let level = self.levels.last_mut().ok_or(StackError::NoLiveLevel)?;
        level.reset_retries();
        Ok(())
    }

    /// Mark the innermost level's current step as dispatched now.
    pub fn restart_clock(&mut self) -> StackResult<()> {
        let level = self.levels.last_mut().ok_or(StackError::NoLiveLevel)?;
        level.restart_clock();
        Ok(())
    }

    /// Milliseconds since the innermost level's clock was last started.
    pub fn elapsed_millis(&self) -> Option<i64> {
        self.current_level()
            .map(|level| (now_millis() - level.started_at()).num_milliseconds())
    }

    // ── Transitions ──────────────────────────────────────────────────

    /// Apply the result of the current step to the innermost level.
    ///
    /// | kind     | result  | effect                                              |
    /// |----------|---------|-----------------------------------------------------|
    /// | pipeline | success | drop the step; if the level drains, succeed upward  |
    /// | pipeline | failure | drop every step; fail upward                        |
    /// | failover | success | drop every step; succeed upward                     |
    /// | failover | failure | drop the step; if the level drains, fail upward     |
    ///
    /// "Upward" applies the same table to the enclosing level, until either
    /// a level keeps a current step or no levels remain.
    pub fn complete_step(&mut self, outcome: StepOutcome) -> StackResult<Progress> {
        let level = self.levels.last_mut().ok_or(StackError::NoLiveLevel)?;

        match (level.kind(), outcome) {
            (LevelKind::Pipeline, StepOutcome::Success)
            | (LevelKind::Failover, StepOutcome::Failure) => level.remove_current(),
            (LevelKind::Pipeline, StepOutcome::Failure)
            | (LevelKind::Failover, StepOutcome::Success) => level.clear(),
        }

        if !level.is_empty() {
            return Ok(Progress::Next);
        }

        self.levels.pop();
        if self.levels.is_empty() {
            return Ok(match outcome {
                StepOutcome::Success => Progress::Succeeded,
                StepOutcome::Failure => Progress::Failed,
            });
        }
        self.complete_step(outcome)
    }

    /// Drop every level as failed. Used when the request is abandoned.
    pub fn abandon(&mut self) -> Progress {
        self.levels.clear();
        Progress::Failed
    }

    /// A received stack must still have work in it.
    pub fn check_structure(&self) -> StackResult<()> {
        if self.levels.is_empty() {
            return Err(StackError::NoLiveLevel);
        }
        Ok(())
    }

    // ── Codec ────────────────────────────────────────────────────────

    pub fn encode(&self) -> Vec<Option<String>> {
        let mut tokens = Vec::with_capacity(RESERVED_SLOTS + self.levels.len());
        tokens.push(Some(encode_options(&self.options)));
        tokens.push(self.source_reference.clone());
        tokens.extend(self.levels.iter().map(|level| Some(level.to_token())));
        tokens
    }

    pub fn decode(tokens: Vec<Option<String>>) -> StackResult<Self> {
        if tokens.len() < RESERVED_SLOTS {
            return Err(StackError::MissingReservedSlots {
                expected: RESERVED_SLOTS,
                found: tokens.len(),
            });
        }
        let mut tokens = tokens.into_iter();
        let options = match tokens.next().flatten() {
            Some(token) => decode_options(&token)?,
            None => return Err(StackError::InvalidOptions("options slot is null".into())),
        };
        let source_reference = tokens.next().flatten();

        let levels = tokens
            .enumerate()
            .map(|(i, token)| {
                let index = RESERVED_SLOTS + i;
                token
                    .ok_or(StackError::MalformedLevel("level token is null".into()))
                    .and_then(|token| Level::from_token(&token))
                    .map_err(|source| StackError::InvalidLevel {
                        index,
                        source: Box::new(source),
                    })
            })
            .collect::<StackResult<Vec<_>>>()?;

        Ok(Self {
            options,
            source_reference,
            levels,
        })
    }
}

impl TryFrom<Vec<Option<String>>> for ExecutionStack {
    type Error = StackError;

    fn try_from(tokens: Vec<Option<String>>) -> Result<Self, Self::Error> {
        Self::decode(tokens)
    }
}

impl From<ExecutionStack> for Vec<Option<String>> {
    fn from(stack: ExecutionStack) -> Self {
        stack.encode()
    }
}

fn encode_options(options: &BTreeMap<String, String>) -> String {
    let sep = TOKEN_SEPARATOR.to_string();
    options
        .iter()
        .flat_map(|(k, v)| [k.as_str(), v.as_str()])
        .collect::<Vec<_>>()
        .join(&sep)
}

fn decode_options(token: &str) -> StackResult<BTreeMap<String, String>> {
    let mut options = BTreeMap::new();
    if token.is_empty() {
        return Ok(options);
    }
    let fields: Vec<&str> = token.split(TOKEN_SEPARATOR).collect();
    if fields.len() % 2 != 0 {
        return Err(StackError::InvalidOptions(
            "option names and values are unpaired".into(),
        ));
    }
    for pair in fields.chunks(2) {
        if pair[0].is_empty() {
            return Err(StackError::InvalidOptions("empty option name".into()));
        }
        if options
            .insert(pair[0].to_string(), pair[1].to_string())
            .is_some()
        {
            return Err(StackError::InvalidOptions(format!(
                "duplicate option '{}'",
                pair[0]
            )));
        }
    }
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TXT: &str = "text/plain";
    const DOC: &str = "application/msword";
    const PDF: &str = "application/pdf";

    fn step(name: &str, source: &str, target: &str) -> Step {
        Step::new(name, source, target).unwrap()
    }

    fn stack_with(level: Level) -> ExecutionStack {
        let mut stack = ExecutionStack::new(BTreeMap::new(), Some("source-1".into())).unwrap();
        stack.push_level(level);
        stack
    }

    fn two_step_pipeline() -> ExecutionStack {
        stack_with(Level::pipeline(vec![step("A", TXT, DOC), step("B", DOC, PDF)]).unwrap())
    }

    fn three_way_failover() -> ExecutionStack {
        stack_with(
            Level::failover(vec![
                step("X", TXT, PDF),
                step("Y", TXT, PDF),
                step("Z", TXT, PDF),
            ])
            .unwrap(),
        )
    }

    fn remaining(stack: &ExecutionStack) -> Vec<String> {
        stack
            .current_level()
            .map(|level| level.steps().map(|s| s.worker_name().to_string()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_pipeline_success_advances_then_finishes() {
        let mut stack = two_step_pipeline();

        assert_eq!(stack.complete_step(StepOutcome::Success).unwrap(), Progress::Next);
        assert_eq!(stack.current_step().unwrap().worker_name(), "B");
        assert_eq!(stack.depth(), 1);

        assert_eq!(
            stack.complete_step(StepOutcome::Success).unwrap(),
            Progress::Succeeded
        );
        assert!(stack.is_finished());
    }

    #[test]
    fn test_pipeline_failure_discards_remaining_steps() {
        let mut stack = two_step_pipeline();
        assert_eq!(stack.complete_step(StepOutcome::Failure).unwrap(), Progress::Failed);
        assert!(stack.is_finished());
        assert!(stack.current_step().is_none());
    }

    #[test]
    fn test_failover_failure_then_success() {
        let mut stack = three_way_failover();

        assert_eq!(stack.complete_step(StepOutcome::Failure).unwrap(), Progress::Next);
        assert_eq!(remaining(&stack), vec!["Y", "Z"]);

        assert_eq!(
            stack.complete_step(StepOutcome::Success).unwrap(),
            Progress::Succeeded
        );
        assert!(stack.is_finished());
    }

    #[test]
    fn test_failover_exhausted() {
        let mut stack = three_way_failover();
        assert_eq!(stack.complete_step(StepOutcome::Failure).unwrap(), Progress::Next);
        assert_eq!(stack.complete_step(StepOutcome::Failure).unwrap(), Progress::Next);
        assert_eq!(stack.current_step().unwrap().worker_name(), "Z");
        assert_eq!(stack.complete_step(StepOutcome::Failure).unwrap(), Progress::Failed);
    }

    #[test]
    fn test_nested_success_completes_parent_step() {
        let mut stack = two_step_pipeline();
        stack.push_level(
            Level::failover(vec![step("A1", TXT, DOC), step("A2", TXT, DOC)]).unwrap(),
        );
        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.parent_step().unwrap().worker_name(), "A");

        assert_eq!(stack.complete_step(StepOutcome::Success).unwrap(), Progress::Next);
        assert_eq!(stack.depth(), 1);
        assert_eq!(stack.current_step().unwrap().worker_name(), "B");
    }

    #[test]
    fn test_nested_failure_propagates_through_pipeline() {
        let mut stack = two_step_pipeline();
        stack.push_level(Level::failover(vec![step("A1", TXT, DOC)]).unwrap());
        assert_eq!(stack.complete_step(StepOutcome::Failure).unwrap(), Progress::Failed);
        assert!(stack.is_finished());
    }

    #[test]
    fn test_complete_on_empty_stack_is_an_error() {
        let mut stack = ExecutionStack::default();
        assert_eq!(
            stack.complete_step(StepOutcome::Success),
            Err(StackError::NoLiveLevel)
        );
        assert_eq!(stack.check_structure(), Err(StackError::NoLiveLevel));
    }

    #[test]
    fn test_abandon_clears_levels() {
        let mut stack = two_step_pipeline();
        stack.push_level(Level::pipeline(vec![step("A1", TXT, DOC)]).unwrap());
        assert_eq!(stack.abandon(), Progress::Failed);
        assert!(stack.is_finished());
        assert_eq!(stack.initial_source_reference(), Some("source-1"));
    }

    #[test]
    fn test_retry_counter_is_per_level() {
        let mut stack = two_step_pipeline();
        stack.increment_retry().unwrap();
        stack.push_level(Level::pipeline(vec![step("A1", TXT, DOC)]).unwrap());
        assert_eq!(stack.retry_count(), 0);
        assert_eq!(stack.increment_retry().unwrap(), 1);
        assert_eq!(stack.increment_retry().unwrap(), 2);
        stack.reset_retries().unwrap();
        assert_eq!(stack.retry_count(), 0);
        assert_eq!(stack.levels()[0].retry_count(), 1);
    }

    #[test]
    fn test_reference_path() {
        let mut stack = two_step_pipeline();
        stack.set_reference("123").unwrap();
        assert_eq!(stack.reference(), "123");
        stack.push_level(Level::pipeline(vec![step("A1", TXT, DOC), step("A2", DOC, DOC)]).unwrap());
        assert_eq!(stack.reference(), "123.1");
        stack.complete_step(StepOutcome::Success).unwrap();
        assert_eq!(stack.reference(), "123.2");
        stack.complete_step(StepOutcome::Success).unwrap();
        assert_eq!(stack.reference(), "124");
    }

    #[test]
    fn test_options_validation() {
        let mut options = BTreeMap::new();
        options.insert(String::new(), "v".to_string());
        assert!(matches!(
            ExecutionStack::new(options, None),
            Err(StackError::InvalidOptions(_))
        ));

        let mut options = BTreeMap::new();
        options.insert("k".to_string(), format!("a{}b", TOKEN_SEPARATOR));
        assert!(ExecutionStack::new(options, None).is_err());
    }

    #[test]
    fn test_encode_layout() {
        let mut options = BTreeMap::new();
        options.insert("resizeWidth".to_string(), "100".to_string());
        options.insert("timeout".to_string(), String::new());
        let mut stack = ExecutionStack::new(options, None).unwrap();
        stack.push_level(Level::pipeline(vec![step("A", TXT, DOC)]).unwrap());

        let tokens = stack.encode();
        assert_eq!(tokens.len(), 3);
        assert_eq!(
            tokens[0].as_deref(),
            Some(format!("resizeWidth{s}100{s}timeout{s}", s = TOKEN_SEPARATOR).as_str())
        );
        assert_eq!(tokens[1], None);

        let decoded = ExecutionStack::decode(tokens).unwrap();
        assert_eq!(decoded, stack);
        assert_eq!(decoded.initial_options()["timeout"], "");
    }

    #[test]
    fn test_decode_rejects_structural_problems() {
        assert!(matches!(
            ExecutionStack::decode(vec![Some(String::new())]),
            Err(StackError::MissingReservedSlots { expected: 2, found: 1 })
        ));
        assert!(matches!(
            ExecutionStack::decode(vec![None, None]),
            Err(StackError::InvalidOptions(_))
        ));
        assert!(matches!(
            ExecutionStack::decode(vec![Some(format!("k{}v{}x", TOKEN_SEPARATOR, TOKEN_SEPARATOR)), None]),
            Err(StackError::InvalidOptions(_))
        ));
        assert!(matches!(
            ExecutionStack::decode(vec![Some(String::new()), None, None]),
            Err(StackError::InvalidLevel { index: 2, .. })
        ));

        let bad_kind = format!("Q{s}1{s}0{s}0{s}{s}{s}w{s}a{s}b", s = TOKEN_SEPARATOR);
        match ExecutionStack::decode(vec![Some(String::new()), None, Some(bad_kind)]) {
            Err(StackError::InvalidLevel { index, source }) => {
                assert_eq!(index, 2);
                assert_eq!(*source, StackError::UnknownKind("Q".into()));
            }
            other => panic!("expected invalid level, got {:?}", other),
        }
    }

    #[test]
    fn test_json_round_trip() {
        let mut stack = two_step_pipeline();
        stack.push_level(
            Level::failover(vec![step("A1", TXT, DOC), step("A2", TXT, DOC)])
                .unwrap()
                .with_input(LevelInput::new("source-1", 10))
                .unwrap(),
        );
        stack.increment_retry().unwrap();

        let json = serde_json::to_string(&stack).unwrap();
        assert!(json.starts_with("[\"\",\"source-1\","));
        let back: ExecutionStack = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stack);
    }

    #[test]
    fn test_json_rejects_invalid_stack() {
        let result: Result<ExecutionStack, _> = serde_json::from_str("[\"\"]");
        assert!(result.is_err());
    }
}
