//! One frame of an execution plan

use crate::error::{StackError, StackResult};
use crate::step::Step;
use crate::TOKEN_SEPARATOR;
use chrono::{DateTime, SubsecRound, Utc};
use std::collections::VecDeque;

/// Number of header fields in front of the step triples of a level token.
const HEADER_FIELDS: usize = 6;
const STEP_FIELDS: usize = 3;

// ── Level Kind ───────────────────────────────────────────────────────

/// How the steps of a level combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LevelKind {
    /// Every step must succeed, in order.
    Pipeline,
    /// Steps are alternatives; the first success wins.
    Failover,
}

impl LevelKind {
    pub fn flag(&self) -> char {
        match self {
            LevelKind::Pipeline => 'P',
            LevelKind::Failover => 'F',
        }
    }

    pub fn from_flag(flag: &str) -> StackResult<Self> {
        match flag {
            "P" => Ok(LevelKind::Pipeline),
            "F" => Ok(LevelKind::Failover),
            other => Err(StackError::UnknownKind(other.to_string())),
        }
    }
}

// ── Level Input ──────────────────────────────────────────────────────

/// The artifact a level's steps start from.
///
/// Failover alternatives restart from this input, so it survives any
/// intermediate artifacts produced by a nested pipeline that later failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LevelInput {
    pub reference: Option<String>,
    pub size: Option<u64>,
}

impl LevelInput {
    pub fn new(reference: impl Into<String>, size: u64) -> Self {
        Self {
            reference: Some(reference.into()),
            size: Some(size),
        }
    }
}

// ── Level ────────────────────────────────────────────────────────────

/// A pipeline or failover frame with its pending steps.
///
/// The front step is the current one. A level is never empty while it is
/// on a stack; [`crate::ExecutionStack`] pops it the moment its last step
/// is removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Level {
    kind: LevelKind,
    reference: String,
    started_at: DateTime<Utc>,
    retry_count: u32,
    input: LevelInput,
    steps: VecDeque<Step>,
}

impl Level {
    pub fn new(kind: LevelKind, steps: Vec<Step>) -> StackResult<Self> {
        if steps.is_empty() {
            return Err(StackError::EmptyLevel);
        }
        Ok(Self {
            kind,
            reference: "1".to_string(),
            started_at: now_millis(),
            retry_count: 0,
            input: LevelInput::default(),
            steps: steps.into(),
        })
    }

    pub fn pipeline(steps: Vec<Step>) -> StackResult<Self> {
        Self::new(LevelKind::Pipeline, steps)
    }

    pub fn failover(steps: Vec<Step>) -> StackResult<Self> {
        Self::new(LevelKind::Failover, steps)
    }

    pub fn with_input(mut self, input: LevelInput) -> StackResult<Self> {
        if let Some(reference) = input.reference.as_deref() {
            if reference.contains(TOKEN_SEPARATOR) {
                return Err(StackError::InvalidInput(reference.to_string()));
            }
        }
        self.input = input;
        Ok(self)
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> StackResult<Self> {
        self.set_reference(reference)?;
        Ok(self)
    }

    pub fn kind(&self) -> LevelKind {
        self.kind
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn set_reference(&mut self, reference: impl Into<String>) -> StackResult<()> {
        let reference = reference.into();
        if !is_valid_reference(&reference) {
            return Err(StackError::InvalidReference(reference));
        }
        self.reference = reference;
        Ok(())
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn restart_clock(&mut self) {
        self.started_at = now_millis();
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn increment_retry(&mut self) -> u32 {
        self.retry_count = self.retry_count.saturating_add(1);
        self.retry_count
    }

    pub fn reset_retries(&mut self) {
        self.retry_count = 0;
    }

    pub fn input(&self) -> &LevelInput {
        &self.input
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.steps.front()
    }

    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Drop the current step. When another step takes its place the
    /// reference moves on and the retry budget starts over.
    pub(crate) fn remove_current(&mut self) {
        self.steps.pop_front();
        if !self.steps.is_empty() {
            self.advance_reference();
            self.retry_count = 0;
        }
    }

    pub(crate) fn clear(&mut self) {
        self.steps.clear();
    }

    fn advance_reference(&mut self) {
        let (prefix, digits) = split_reference(&self.reference);
        if let Some(next) = digits.parse::<u64>().ok().and_then(|n| n.checked_add(1)) {
            self.reference = format!("{}{}", prefix, next);
        }
    }

    // ── Token codec ──────────────────────────────────────────────────

    /// Encode as `flag⏐reference⏐startMillis⏐retries⏐inputRef⏐inputSize`
    /// followed by the steps last-to-first, so the current step is the
    /// final triple.
    pub fn to_token(&self) -> String {
        let mut fields = Vec::with_capacity(HEADER_FIELDS + self.steps.len() * STEP_FIELDS);
        fields.push(self.kind.flag().to_string());
        fields.push(self.reference.clone());
        fields.push(self.started_at.timestamp_millis().to_string());
        fields.push(self.retry_count.to_string());
        fields.push(self.input.reference.clone().unwrap_or_default());
        fields.push(self.input.size.map(|s| s.to_string()).unwrap_or_default());
        for step in self.steps.iter().rev() {
            step.push_fields(&mut fields);
        }
        fields.join(&TOKEN_SEPARATOR.to_string())
    }

    pub fn from_token(token: &str) -> StackResult<Self> {
        let fields: Vec<&str> = token.split(TOKEN_SEPARATOR).collect();
        if fields.len() < HEADER_FIELDS {
            return Err(StackError::MalformedLevel(format!(
                "expected at least {} header fields, found {}",
                HEADER_FIELDS,
                fields.len()
            )));
        }
        let (header, step_fields) = fields.split_at(HEADER_FIELDS);
        if step_fields.is_empty() {
            return Err(StackError::EmptyLevel);
        }
        if step_fields.len() % STEP_FIELDS != 0 {
            return Err(StackError::MalformedLevel(format!(
                "{} step fields do not form whole steps",
                step_fields.len()
            )));
        }

        let kind = LevelKind::from_flag(header[0])?;
        let reference = header[1].to_string();
        if !is_valid_reference(&reference) {
            return Err(StackError::InvalidReference(reference));
        }
        let started_at = header[2]
            .parse::<i64>()
            .ok()
            .filter(|millis| *millis >= 0)
            .and_then(DateTime::from_timestamp_millis)
            .ok_or_else(|| StackError::MalformedLevel(format!("bad start time '{}'", header[2])))?;
        let retry_count = header[3]
            .parse::<u32>()
            .map_err(|_| StackError::MalformedLevel(format!("bad retry count '{}'", header[3])))?;
        let input_reference = match header[4] {
            "" => None,
            value => Some(value.to_string()),
        };
        let input_size = match header[5] {
            "" => None,
            value => Some(value.parse::<u64>().map_err(|_| {
                StackError::MalformedLevel(format!("bad input size '{}'", value))
            })?),
        };

        let mut steps = step_fields
            .chunks(STEP_FIELDS)
            .map(|triple| Step::new(triple[0], triple[1], triple[2]))
            .collect::<StackResult<Vec<_>>>()?;
        steps.reverse();

        Ok(Self {
            kind,
            reference,
            started_at,
            retry_count,
            input: LevelInput {
                reference: input_reference,
                size: input_size,
            },
            steps: steps.into(),
        })
    }
}

/// A reference is a decimal number with an optional leading `e`.
fn is_valid_reference(reference: &str) -> bool {
    let (_, digits) = split_reference(reference);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn split_reference(reference: &str) -> (&str, &str) {
    match reference.strip_prefix('e') {
        Some(digits) => ("e", digits),
        None => ("", reference),
    }
}

pub(crate) fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}
