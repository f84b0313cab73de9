//! Running the current step of an incoming request
//!
//! A worker only ever runs the step on top of the stack it was handed. It
//! never applies completion transitions; the reply echoes the stack as
//! received and the router decides what happens next.

use crate::engine::{TransformEngine, TransformJob, TransformOutput};
use crate::error::{EngineError, EngineResult};
use morph_registry::snapshot::CORE_VERSION_CONFIG;
use morph_registry::{
    CapabilityDescriptor, CoreVersion, OptionSets, SizeLimit, TransformConfig, TransformerConfig,
    VersionGate,
};
use morph_types::options::TIMEOUT;
use morph_types::{StackError, TransformReply, TransformRequest};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

struct Hosted {
    engine: Arc<dyn TransformEngine>,
    descriptor: CapabilityDescriptor,
}

/// The transformers one worker process hosts.
pub struct RequestHandler {
    hosted: BTreeMap<String, Hosted>,
    option_sets: OptionSets,
    core_version: Option<CoreVersion>,
}

impl RequestHandler {
    /// A worker built against `core_version` of the protocol.
    pub fn new(core_version: Option<CoreVersion>) -> Self {
        Self {
            hosted: BTreeMap::new(),
            option_sets: OptionSets::new(),
            core_version,
        }
    }

    /// Host another single-step transformer.
    pub fn register(&mut self, engine: Arc<dyn TransformEngine>) -> EngineResult<()> {
        let descriptor = CapabilityDescriptor::try_from(engine.config())
            .map_err(|e| EngineError::InvalidConfig(e.to_string()))?;
        if descriptor.composition.is_composite() {
            return Err(EngineError::InvalidConfig(format!(
                "{} is a pipeline or failover; workers host single steps only",
                descriptor.name
            )));
        }
        if self.hosted.contains_key(&descriptor.name) {
            return Err(EngineError::InvalidConfig(format!(
                "{} is registered twice",
                descriptor.name
            )));
        }
        tracing::info!(
            transformer = %descriptor.name,
            pairs = descriptor.supported.len(),
            "Registered transformer"
        );
        self.option_sets.extend(engine.option_sets());
        self.hosted
            .insert(descriptor.name.clone(), Hosted { engine, descriptor });
        Ok(())
    }

    pub fn with_engine(mut self, engine: Arc<dyn TransformEngine>) -> EngineResult<Self> {
        self.register(engine)?;
        Ok(self)
    }

    pub fn transformer_names(&self) -> impl Iterator<Item = &str> {
        self.hosted.keys().map(String::as_str)
    }

    pub fn core_version(&self) -> Option<&CoreVersion> {
        self.core_version.as_ref()
    }

    /// The capability config this worker advertises. Core versions and the
    /// gated option sets are included from [`CORE_VERSION_CONFIG`] onward.
    pub fn config(&self, config_version: u32) -> TransformConfig {
        let mut descriptors: Vec<CapabilityDescriptor> = self
            .hosted
            .values()
            .map(|hosted| hosted.descriptor.clone())
            .collect();
        let mut option_sets = self.option_sets.clone();

        if config_version >= CORE_VERSION_CONFIG {
            VersionGate::stamp_leaves(&mut descriptors, &mut option_sets, self.core_version.as_ref());
        }

        TransformConfig {
            transform_options: option_sets,
            transformers: descriptors.iter().map(TransformerConfig::from).collect(),
            ..Default::default()
        }
    }

    /// Run the request's current step and build the reply. Every outcome,
    /// including a malformed request, is a reply.
    pub async fn handle(&self, request: TransformRequest) -> TransformReply {
        let started = std::time::Instant::now();
        let reply = TransformReply::for_request(&request);

        match self.run(&request).await {
            Ok(output) => {
                tracing::info!(
                    request_id = %request.request_id,
                    reference = %request.stack.reference(),
                    target = %output.target_reference,
                    size = output.target_size,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Transform succeeded"
                );
                reply.with_target(output.target_reference, output.target_size)
            }
            Err(e) => {
                tracing::warn!(
                    request_id = %request.request_id,
                    reference = %request.stack.reference(),
                    status = e.status(),
                    error = %e,
                    "Transform failed"
                );
                reply.with_failure(e.status(), format!("Transform failed - {}", e))
            }
        }
    }

    async fn run(&self, request: &TransformRequest) -> EngineResult<TransformOutput> {
        request.validate_for_worker()?;
        let step = request
            .stack
            .current_step()
            .ok_or(StackError::NoLiveLevel)
            .map_err(morph_types::EnvelopeError::from)?;

        if step.source_media_type() != request.source_media_type
            || step.target_media_type() != request.target_media_type
        {
            return Err(EngineError::StepMismatch {
                step: step.to_string(),
            });
        }

        let hosted = self
            .hosted
            .get(step.worker_name())
            .ok_or_else(|| EngineError::UnknownTransformer(step.worker_name().to_string()))?;

        let pair = hosted
            .descriptor
            .matching_pair(&request.source_media_type, &request.target_media_type)
            .ok_or_else(|| EngineError::Unsupported {
                transformer: hosted.descriptor.name.clone(),
                source_media_type: request.source_media_type.clone(),
                target_media_type: request.target_media_type.clone(),
            })?;
        if let SizeLimit::Bytes(limit) = pair.effective_limit() {
            if request.source_size > limit {
                return Err(EngineError::SourceTooLarge {
                    size: request.source_size,
                    limit,
                });
            }
        }

        let mut job = TransformJob::from_request(request);
        let timeout = job
            .options
            .remove(TIMEOUT)
            .and_then(|raw| raw.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);

        tracing::debug!(
            request_id = %request.request_id,
            transformer = %hosted.descriptor.name,
            source = %job.source_media_type,
            target = %job.target_media_type,
            "Running step"
        );
        match timeout {
            Some(limit) => tokio::time::timeout(limit, hosted.engine.transform(&job))
                .await
                .map_err(|_| {
                    EngineError::Transient(format!("timed out after {}ms", limit.as_millis()))
                })?,
            None => hosted.engine.transform(&job).await,
        }
    }
}
