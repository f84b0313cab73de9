//! Deciding the next hop from a reply
//!
//! [`Orchestrator`] is shared by the synchronous and the queue router. It
//! never performs I/O: given the request the router last dispatched and
//! the reply to it, it applies the completion transition and says what to
//! send next, when to retry, or which terminal reply to return.

use crate::error::{RouterError, RouterResult};
use crate::plan::{self, RequestContext};
use crate::retry::RetryPolicy;
use morph_registry::RegistrySnapshot;
use morph_types::envelope::status;
use morph_types::{
    ExecutionStack, LevelInput, Progress, StackError, StepOutcome, TransformReply,
    TransformRequest, TOKEN_SEPARATOR,
};
use std::time::Duration;

/// One request ready to go to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    pub worker: String,
    /// Base URL of the worker, when the registry knows one.
    pub endpoint: Option<String>,
    pub request: TransformRequest,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Dispatch(Hop),
    Retry { hop: Hop, delay: Duration },
    Done(TransformReply),
}

/// A decision plus the artifacts nothing downstream will read again.
#[derive(Debug, Clone, PartialEq)]
pub struct Advance {
    pub decision: Decision,
    pub releasable: Vec<String>,
}

impl Advance {
    fn new(decision: Decision) -> Self {
        Self {
            decision,
            releasable: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Orchestrator {
    retry: RetryPolicy,
}

impl Orchestrator {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Resolve a client request and build the first hop.
    ///
    /// Validation and resolution failures return an error before any
    /// stack exists. `top_reference` overrides the reference of the
    /// outermost level.
    pub fn begin(
        &self,
        request: &TransformRequest,
        snapshot: &RegistrySnapshot,
        top_reference: Option<&str>,
    ) -> RouterResult<(RequestContext, Advance)> {
        request.validate()?;
        let descriptor = snapshot.resolve(
            &request.source_media_type,
            request.source_size,
            &request.target_media_type,
            &request.transform_options,
        )?;

        let input = LevelInput::new(&request.source_reference, request.source_size);
        let mut level = plan::level_for(
            descriptor,
            &request.source_media_type,
            &request.target_media_type,
        )?
        .with_input(input.clone())?;
        if let Some(reference) = top_reference {
            level = level.with_reference(reference)?;
        }

        let mut stack = ExecutionStack::new(
            request.transform_options.clone(),
            Some(request.source_reference.clone()),
        )?;
        stack.push_level(level);

        tracing::info!(
            request_id = %request.request_id,
            transformer = %descriptor.name,
            source = %request.source_media_type,
            target = %request.target_media_type,
            size = request.source_size,
            "Transform plan started"
        );

        let context = RequestContext::from_request(request);
        let advance = self.advance(&context, stack, input, snapshot)?;
        Ok((context, advance))
    }

    /// Apply `reply` to the plan as it stood when `in_flight` was sent.
    ///
    /// The stack echoed by the worker is not trusted; the one the router
    /// sent is authoritative.
    pub fn on_reply(
        &self,
        context: &RequestContext,
        in_flight: &TransformRequest,
        reply: &TransformReply,
        snapshot: &RegistrySnapshot,
    ) -> RouterResult<Advance> {
        let mut stack = in_flight.stack.clone();
        stack.check_structure()?;
        let step = stack.current_step().ok_or(StackError::NoLiveLevel)?.clone();

        // A target that cannot be carried as the next step's input is unusable output.
        let mut releasable = Vec::new();
        let rejected;
        let reply = match reply.target_reference.as_deref() {
            Some(target) if reply.is_success() && target.contains(TOKEN_SEPARATOR) => {
                releasable.push(target.to_string());
                rejected = reply.clone().with_failure(
                    status::BAD_REQUEST,
                    format!(
                        "Transformer \"{}\" returned a target reference containing the token separator",
                        step.worker_name()
                    ),
                );
                &rejected
            }
            _ => reply,
        };

        if let Some(kind) = reply.failure_kind() {
            if kind.is_retryable() && self.retry.allows(stack.retry_count()) {
                let attempt = stack.increment_retry()?;
                stack.restart_clock()?;
                let delay = self.retry.backoff(attempt);
                tracing::warn!(
                    request_id = %context.request_id,
                    worker = %step.worker_name(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = reply.error_details.as_deref().unwrap_or(""),
                    "Retrying transient step failure"
                );
                let mut request = in_flight.clone();
                request.stack = stack;
                let hop = Hop {
                    worker: step.worker_name().to_string(),
                    endpoint: snapshot.endpoint(step.worker_name()).map(str::to_string),
                    request,
                };
                return Ok(Advance::new(Decision::Retry { hop, delay }));
            }
            tracing::warn!(
                request_id = %context.request_id,
                worker = %step.worker_name(),
                status = reply.status,
                kind = %kind,
                error = reply.error_details.as_deref().unwrap_or(""),
                "Step failed"
            );
        } else {
            tracing::debug!(
                request_id = %context.request_id,
                worker = %step.worker_name(),
                target = reply.target_reference.as_deref().unwrap_or(""),
                "Step succeeded"
            );
        }

        let success = reply.is_success();
        let outcome = if success {
            StepOutcome::Success
        } else {
            StepOutcome::Failure
        };
        let progress = stack.complete_step(outcome)?;

        if !holds(&stack, &in_flight.source_reference) {
            releasable.push(in_flight.source_reference.clone());
        }
        if progress.is_terminal() {
            releasable.extend(stack.initial_source_reference().map(str::to_string));
        }

        let mut advance = match progress {
            Progress::Next => {
                let input = if success {
                    LevelInput {
                        reference: reply.target_reference.clone(),
                        size: reply.target_size,
                    }
                } else {
                    stack.current_input().cloned().unwrap_or_default()
                };
                self.advance(context, stack, input, snapshot)?
            }
            Progress::Succeeded => Advance::new(Decision::Done(terminal_reply(
                context,
                &stack,
                reply.status,
                None,
                Some(reply),
            ))),
            Progress::Failed => Advance::new(Decision::Done(terminal_reply(
                context,
                &stack,
                reply.status,
                reply.error_details.clone(),
                None,
            ))),
        };
        releasable.append(&mut advance.releasable);
        advance.releasable = releasable;
        Ok(advance)
    }

    /// Descend to the next dispatchable step and build its hop. Steps naming
    /// transformers no longer in the snapshot fail in place.
    fn advance(
        &self,
        context: &RequestContext,
        mut stack: ExecutionStack,
        mut input: LevelInput,
        snapshot: &RegistrySnapshot,
    ) -> RouterResult<Advance> {
        loop {
            let step = match plan::descend(&mut stack, snapshot, &input) {
                Ok(step) => step,
                Err(RouterError::UnknownTransformer(name)) => {
                    let message = format!("Transformer \"{}\" is not registered", name);
                    tracing::warn!(request_id = %context.request_id, worker = %name, "Step failed: not registered");
                    match stack.complete_step(StepOutcome::Failure)? {
                        Progress::Next => {
                            input = stack.current_input().cloned().unwrap_or_default();
                            continue;
                        }
                        _ => {
                            let mut done = Advance::new(Decision::Done(terminal_reply(
                                context,
                                &stack,
                                status::BAD_REQUEST,
                                Some(message),
                                None,
                            )));
                            done.releasable
                                .extend(stack.initial_source_reference().map(str::to_string));
                            return Ok(done);
                        }
                    }
                }
                Err(err) => return Err(err),
            };

            stack.restart_clock()?;
            let request = plan::hop_request(context, &stack, &step, &input, snapshot)?;
            tracing::debug!(
                request_id = %context.request_id,
                worker = %step.worker_name(),
                reference = %stack.reference(),
                "Dispatching step"
            );
            return Ok(Advance::new(Decision::Dispatch(Hop {
                worker: step.worker_name().to_string(),
                endpoint: snapshot.endpoint(step.worker_name()).map(str::to_string),
                request,
            })));
        }
    }
}

/// Whether a remaining level may still restart from `reference`.
fn holds(stack: &ExecutionStack, reference: &str) -> bool {
    stack.initial_source_reference() == Some(reference)
        || stack
            .levels()
            .iter()
            .any(|level| level.input().reference.as_deref() == Some(reference))
}

/// The reply returned to the client once the plan has finished. `result`
/// is the last step's reply when the plan succeeded.
pub fn terminal_reply(
    context: &RequestContext,
    stack: &ExecutionStack,
    status: u16,
    error_details: Option<String>,
    result: Option<&TransformReply>,
) -> TransformReply {
    TransformReply {
        request_id: context.request_id.clone(),
        status,
        error_details,
        source_reference: stack.initial_source_reference().map(str::to_string),
        target_reference: result.and_then(|r| r.target_reference.clone()),
        target_size: result.and_then(|r| r.target_size),
        client_data: context.client_data.clone(),
        schema_version: context.schema_version,
        stack: stack.clone(),
    }
}
