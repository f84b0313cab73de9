//! Turning descriptors into levels and steps into worker requests

use crate::error::{RouterError, RouterResult};
use morph_registry::{CapabilityDescriptor, Composition, RegistrySnapshot, TransformOption};
use morph_types::options::TIMEOUT;
use morph_types::{
    ExecutionStack, Level, LevelInput, RequestId, StackError, Step, TransformRequest,
};
use std::collections::{BTreeMap, BTreeSet};

/// Deepest nesting of composites a plan may reach.
pub const MAX_DEPTH: usize = 16;

/// What the router keeps from the client's request for the whole plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub request_id: RequestId,
    pub client_data: String,
    pub schema_version: u32,
    pub source_extension: Option<String>,
    pub source_filename: Option<String>,
    pub target_media_type: String,
    pub target_extension: String,
    /// Queue for the terminal reply, if the client asked for one.
    pub reply_to: Option<String>,
}

impl RequestContext {
    pub fn from_request(request: &TransformRequest) -> Self {
        Self {
            request_id: request.request_id.clone(),
            client_data: request.client_data.clone(),
            schema_version: request.schema_version,
            source_extension: request.source_extension.clone(),
            source_filename: request.source_filename.clone(),
            target_media_type: request.target_media_type.clone(),
            target_extension: request.target_extension.clone(),
            reply_to: request.reply_to.clone(),
        }
    }

    /// Rebuild the context from a hop some router already dispatched.
    ///
    /// The client's target type is the last step of the outermost level.
    /// The hop's `replyTo` named that router, so no client queue is known.
    pub fn from_in_flight(request: &TransformRequest) -> Self {
        let mut context = Self::from_request(request);
        context.reply_to = None;
        let final_target = request
            .stack
            .levels()
            .first()
            .and_then(|level| level.steps().last())
            .map(|step| step.target_media_type().to_string());
        if let Some(target) = final_target {
            if target != request.target_media_type {
                context.target_extension = extension_for(&target);
                context.target_media_type = target;
            }
        }
        context
    }
}

/// The level that runs `descriptor` from `source` to `target`.
///
/// A single worker becomes a one step pipeline. Pipeline steps chain
/// through their declared intermediate types; the final step produces
/// `target`. Failover alternatives all convert `source` to `target`.
pub fn level_for(descriptor: &CapabilityDescriptor, source: &str, target: &str) -> RouterResult<Level> {
    let level = match &descriptor.composition {
        Composition::Leaf => Level::pipeline(vec![Step::new(&descriptor.name, source, target)?])?,
        Composition::Pipeline(steps) => {
            let mut current = source.to_string();
            let mut built = Vec::with_capacity(steps.len());
            for step in steps {
                let next = step.target_media_type.as_deref().unwrap_or(target);
                built.push(Step::new(&step.transformer_name, &current, next)?);
                current = next.to_string();
            }
            Level::pipeline(built)?
        }
        Composition::Failover(names) => Level::failover(
            names
                .iter()
                .map(|name| Step::new(name, source, target))
                .collect::<Result<Vec<_>, _>>()?,
        )?,
    };
    Ok(level)
}

/// Push levels until the current step names a single worker, and return
/// that step. New levels start from `input`.
pub fn descend(
    stack: &mut ExecutionStack,
    snapshot: &RegistrySnapshot,
    input: &LevelInput,
) -> RouterResult<Step> {
    loop {
        let step = stack.current_step().ok_or(StackError::NoLiveLevel)?.clone();
        let descriptor = snapshot
            .descriptor(step.worker_name())
            .ok_or_else(|| RouterError::UnknownTransformer(step.worker_name().to_string()))?;
        if !descriptor.composition.is_composite() {
            return Ok(step);
        }
        if stack.depth() >= MAX_DEPTH {
            return Err(RouterError::PlanTooDeep(step.worker_name().to_string(), MAX_DEPTH));
        }

        let level = level_for(descriptor, step.source_media_type(), step.target_media_type())?
            .with_input(input.clone())?;
        tracing::debug!(
            transformer = %descriptor.name,
            kind = ?level.kind(),
            steps = level.len(),
            depth = stack.depth() + 1,
            "Expanding composite step"
        );
        stack.push_level(level);
    }
}

/// Build the request sent to the worker running `step`.
pub fn hop_request(
    context: &RequestContext,
    stack: &ExecutionStack,
    step: &Step,
    input: &LevelInput,
    snapshot: &RegistrySnapshot,
) -> RouterResult<TransformRequest> {
    let source_reference = input
        .reference
        .clone()
        .or_else(|| stack.initial_source_reference().map(str::to_string))
        .ok_or_else(|| StackError::MalformedLevel("level has no input reference".into()))?;
    let original = stack.initial_source_reference() == Some(source_reference.as_str());

    let target_extension = if step.target_media_type() == context.target_media_type {
        context.target_extension.clone()
    } else {
        extension_for(step.target_media_type())
    };

    Ok(TransformRequest {
        request_id: context.request_id.clone(),
        source_reference,
        source_media_type: step.source_media_type().to_string(),
        source_size: input.size.unwrap_or(0),
        source_extension: if original {
            context.source_extension.clone()
        } else {
            Some(extension_for(step.source_media_type()))
        },
        source_filename: context.source_filename.clone(),
        target_media_type: step.target_media_type().to_string(),
        target_extension,
        client_data: context.client_data.clone(),
        transform_options: step_options(stack.initial_options(), step.worker_name(), snapshot),
        schema_version: context.schema_version,
        reply_to: None,
        stack: stack.clone(),
    })
}

/// The client's options restricted to those the worker understands.
pub fn step_options(
    options: &BTreeMap<String, String>,
    worker: &str,
    snapshot: &RegistrySnapshot,
) -> BTreeMap<String, String> {
    let mut known = BTreeSet::new();
    if let Some(descriptor) = snapshot.descriptor(worker) {
        for name in &descriptor.option_sets {
            if let Some(set) = snapshot.option_sets().get(name) {
                collect_names(set, &mut known);
            }
        }
    }
    options
        .iter()
        .filter(|(name, _)| name.as_str() == TIMEOUT || known.contains(name.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn collect_names<'a>(options: &'a [TransformOption], out: &mut BTreeSet<&'a str>) {
    for option in options {
        match option {
            TransformOption::Value(value) => {
                out.insert(value.name.as_str());
            }
            TransformOption::Group(group) => collect_names(&group.transform_options, out),
        }
    }
}

/// File extension for an intermediate media type.
pub fn extension_for(media_type: &str) -> String {
    let known = match media_type {
        "application/pdf" => Some("pdf"),
        "text/plain" => Some("txt"),
        "text/html" => Some("html"),
        "image/jpeg" => Some("jpeg"),
        "image/svg+xml" => Some("svg"),
        "application/msword" => Some("doc"),
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => Some("docx"),
        "application/vnd.oasis.opendocument.text" => Some("odt"),
        _ => None,
    };
    if let Some(ext) = known {
        return ext.to_string();
    }
    let subtype = media_type
        .split_once('/')
        .map(|(_, s)| s)
        .unwrap_or(media_type);
    let subtype = subtype.split([';', '+']).next().unwrap_or(subtype);
    subtype.trim_start_matches("x-").to_string()
}
