//! Publish Orchestrator - publishes every archive to every region
//!
//! Each (region, variant) pair runs as an independent two-phase pipeline:
//! publish a new version, then grant access to exactly that version. A pair
//! never blocks or skips another pair, and every pair yields one
//! [`PublishRecord`], whatever happened to it.
//!
//! Features:
//! - Bounded concurrency (1 = strictly sequential)
//! - Per-call timeout
//! - Retry with backoff, gated by [`PublishRetryPolicy`] for the publish call
//! - Raw remote responses logged for every call

use crate::build::PackagedArchive;
use crate::core::config::{PipelineConfig, PublishRetryPolicy};
use crate::core::error::PipelineError;
use crate::core::retry::{Retried, RetryManager, RetryOptions};
use crate::core::traits::{
    GrantPermissionRequest, GrantStatus, LayerRegistry, PublishVersionRequest,
};
use crate::core::variant::VariantMeta;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tracing::{error, info, warn};

/// Publish stage settings
#[derive(Debug, Clone)]
pub struct PublishOptions {
    /// Description attached to every published version
    pub description: String,
    /// Timeout applied to each publish or grant attempt
    pub timeout: Duration,
    /// Maximum pairs in flight
    pub max_concurrency: usize,
    pub retry: RetryOptions,
    pub publish_retry: PublishRetryPolicy,
    pub grant_principal: String,
    pub grant_action: String,
}

impl PublishOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            description: config.package.description.clone(),
            timeout: config.publish.timeout(),
            max_concurrency: config.publish.max_concurrency,
            retry: config.publish.retry.clone(),
            publish_retry: config.publish.publish_retry,
            grant_principal: config.publish.grant_principal.clone(),
            grant_action: config.publish.grant_action.clone(),
        }
    }
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

/// A packaged archive together with the variant metadata it is published under
#[derive(Debug, Clone)]
pub struct LayerArchive {
    pub meta: VariantMeta,
    pub archive: PackagedArchive,
}

/// How one (region, variant) pair ended
#[derive(Debug, Clone)]
pub enum PairOutcome {
    /// Published and granted
    Granted { version: String, status: GrantStatus },
    /// No version was obtained; nothing was granted
    PublishFailed { error: PipelineError },
    /// A version exists but the grant did not go through
    GrantFailed { version: String, error: PipelineError },
}

/// Outcome of one (region, variant) pair
///
/// The version identifier and grant flag are derived from [`PairOutcome`], so
/// a record can only report a grant when it also carries the version it was
/// granted on.
#[derive(Debug, Clone)]
pub struct PublishRecord {
    pub region: String,
    pub variant: String,
    pub outcome: PairOutcome,
    /// Publish attempts made, including the first
    pub publish_attempts: u32,
    /// Grant attempts made; 0 when no version was obtained
    pub grant_attempts: u32,
    /// Raw body of the last publish response, if one was received
    pub publish_response: Option<String>,
    /// Raw body of the last grant response, if one was received
    pub grant_response: Option<String>,
}

impl PublishRecord {
    pub fn version_identifier(&self) -> Option<&str> {
        match &self.outcome {
            PairOutcome::Granted { version, .. } | PairOutcome::GrantFailed { version, .. } => {
                Some(version)
            }
            PairOutcome::PublishFailed { .. } => None,
        }
    }

    pub fn permission_granted(&self) -> bool {
        matches!(self.outcome, PairOutcome::Granted { .. })
    }

    pub fn is_success(&self) -> bool {
        self.permission_granted()
    }

    pub fn error(&self) -> Option<&PipelineError> {
        match &self.outcome {
            PairOutcome::Granted { .. } => None,
            PairOutcome::PublishFailed { error } | PairOutcome::GrantFailed { error, .. } => {
                Some(error)
            }
        }
    }

    fn failed(region: &str, variant: &str, error: PipelineError) -> Self {
        Self {
            region: region.to_string(),
            variant: variant.to_string(),
            outcome: PairOutcome::PublishFailed { error },
            publish_attempts: 0,
            grant_attempts: 0,
            publish_response: None,
            grant_response: None,
        }
    }
}

/// Statement id of the grant on `version`; one per version, so re-granting is idempotent
pub fn statement_id(version: &str) -> String {
    format!("release-{}", version)
}

/// Extract the version identifier from a publish response
///
/// # Errors
///
/// Returns `PipelineError::PublishParseFailure` when the body is not JSON or
/// `Version` is missing, empty or not a number or string.
pub fn parse_version_identifier(region: &str, raw: &str) -> Result<String, PipelineError> {
    let failure = |message: String| PipelineError::PublishParseFailure {
        region: region.to_string(),
        message,
        raw_response: raw.to_string(),
    };

    let body: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| failure(format!("response is not JSON: {}", e)))?;

    match body.get("Version") {
        Some(serde_json::Value::Number(n)) if n.is_u64() => Ok(n.to_string()),
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(other) => Err(failure(format!("malformed Version field: {}", other))),
        None => Err(failure("Version field is missing".to_string())),
    }
}

/// Publishes archives to regions through a [`LayerRegistry`]
pub struct PublishOrchestrator {
    registry: Arc<dyn LayerRegistry>,
    options: Arc<PublishOptions>,
}

impl PublishOrchestrator {
    pub fn new(registry: Arc<dyn LayerRegistry>, options: PublishOptions) -> Self {
        Self {
            registry,
            options: Arc::new(options),
        }
    }

    pub fn options(&self) -> &PublishOptions {
        &self.options
    }

    /// Publish every archive to every region
    ///
    /// Returns exactly `regions.len() * archives.len()` records, ordered
    /// regions outer and variants inner, regardless of completion order.
    pub async fn publish_all(
        &self,
        archives: &[LayerArchive],
        regions: &[String],
    ) -> Vec<PublishRecord> {
        self.publish_until(archives, regions, std::future::pending())
            .await
            .records
    }

    /// Publish every archive to every region until `cancel` resolves
    ///
    /// On cancellation every unfinished pair is aborted and only the records
    /// of pairs that had already finished are returned, in matrix order.
    pub async fn publish_until(
        &self,
        archives: &[LayerArchive],
        regions: &[String],
        cancel: impl Future<Output = ()>,
    ) -> PublishBatch {
        let concurrency = self.options.max_concurrency.max(1);
        info!(
            registry = self.registry.name(),
            regions = regions.len(),
            variants = archives.len(),
            concurrency,
            "publishing layers"
        );

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut tasks = Vec::with_capacity(regions.len() * archives.len());

        for region in regions {
            for layer in archives {
                let semaphore = Arc::clone(&semaphore);
                let registry = Arc::clone(&self.registry);
                let options = Arc::clone(&self.options);
                let region_for_task = region.clone();
                let layer_for_task = layer.clone();

                let task = tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    publish_pair(registry.as_ref(), &options, &region_for_task, &layer_for_task)
                        .await
                });

                tasks.push((region.clone(), layer.meta.display_name.clone(), task));
            }
        }

        let total = tasks.len();
        let mut cancel = std::pin::pin!(cancel);
        let mut cancelled = false;
        let mut records = Vec::with_capacity(total);

        // Awaiting in submission order keeps the result order stable
        for (region, variant, mut task) in tasks {
            if !cancelled {
                tokio::select! {
                    biased;
                    joined = &mut task => {
                        push_joined(&mut records, &region, &variant, joined);
                        continue;
                    }
                    _ = &mut cancel => {
                        cancelled = true;
                        warn!("publish cancelled; aborting unfinished pairs");
                    }
                }
            }

            // A task that already finished keeps its record; abort has no effect on it
            task.abort();
            match task.await {
                Err(e) if e.is_cancelled() => {}
                joined => push_joined(&mut records, &region, &variant, joined),
            }
        }

        let unfinished = total - records.len();
        if cancelled {
            warn!(finished = records.len(), unfinished, "publish stage interrupted");
        }

        PublishBatch {
            records,
            unfinished,
            cancelled,
        }
    }
}

/// Records produced by a publish run that may have been cancelled
#[derive(Debug)]
pub struct PublishBatch {
    pub records: Vec<PublishRecord>,
    /// Pairs aborted before they finished
    pub unfinished: usize,
    pub cancelled: bool,
}

fn push_joined(
    records: &mut Vec<PublishRecord>,
    region: &str,
    variant: &str,
    joined: Result<PublishRecord, JoinError>,
) {
    match joined {
        Ok(record) => records.push(record),
        Err(e) => {
            error!(%region, %variant, error = %e, "publish task failed");
            records.push(PublishRecord::failed(
                region,
                variant,
                PipelineError::RemoteCallFailure {
                    region: region.to_string(),
                    operation: "publish".to_string(),
                    message: format!("task failed: {}", e),
                    raw_response: String::new(),
                    ambiguous: true,
                },
            ));
        }
    }
}

/// Publish then grant for one pair; never fails, the outcome is in the record
async fn publish_pair(
    registry: &dyn LayerRegistry,
    options: &PublishOptions,
    region: &str,
    layer: &LayerArchive,
) -> PublishRecord {
    let variant = layer.meta.display_name.as_str();
    let retry = RetryManager::new(options.retry.clone());

    let request = PublishVersionRequest {
        layer_name: layer.meta.display_name.clone(),
        description: options.description.clone(),
        archive_path: layer.archive.path.clone(),
        region: region.to_string(),
        compatible_runtimes: vec![layer.meta.runtime_tag.clone()],
    };

    let policy = options.publish_retry;
    let Retried {
        result: published,
        attempts: publish_attempts,
    } = retry
        .retry_if(
            || {
                bounded(
                    options.timeout,
                    region,
                    "publish-layer-version",
                    registry.publish_version(&request),
                )
            },
            |e: &PipelineError| should_retry_publish(policy, e),
        )
        .await;

    let record = |outcome, publish_response, grant_attempts, grant_response| PublishRecord {
        region: region.to_string(),
        variant: variant.to_string(),
        outcome,
        publish_attempts,
        grant_attempts,
        publish_response,
        grant_response,
    };

    let response = match published {
        Ok(response) => response,
        Err(e) => {
            if let Some(raw) = e.raw_response() {
                info!(%region, %variant, response = %raw, "publish response");
            }
            warn!(%region, %variant, attempts = publish_attempts, error = %e, "publish failed");
            let raw = e.raw_response().map(str::to_string);
            return record(PairOutcome::PublishFailed { error: e }, raw, 0, None);
        }
    };
    info!(%region, %variant, response = %response.raw, "publish response");

    let version = match parse_version_identifier(region, &response.raw) {
        Ok(version) => version,
        Err(e) => {
            warn!(%region, %variant, error = %e, "publish response unusable");
            return record(PairOutcome::PublishFailed { error: e }, Some(response.raw), 0, None);
        }
    };

    let grant = GrantPermissionRequest {
        layer_name: layer.meta.display_name.clone(),
        region: region.to_string(),
        version: version.clone(),
        statement_id: statement_id(&version),
        principal: options.grant_principal.clone(),
        action: options.grant_action.clone(),
    };

    let Retried {
        result: granted,
        attempts: grant_attempts,
    } = retry
        .retry(|| {
            bounded(
                options.timeout,
                region,
                "add-layer-version-permission",
                registry.grant_permission(&grant),
            )
        })
        .await;

    match granted {
        Ok(granted) => {
            info!(%region, %variant, %version, status = ?granted.status, response = %granted.raw, "grant response");
            let outcome = PairOutcome::Granted {
                version,
                status: granted.status,
            };
            record(outcome, Some(response.raw), grant_attempts, Some(granted.raw))
        }
        Err(e) => {
            if let Some(raw) = e.raw_response() {
                info!(%region, %variant, %version, response = %raw, "grant response");
            }
            warn!(%region, %variant, %version, attempts = grant_attempts, error = %e, "grant failed");
            let raw = e.raw_response().map(str::to_string);
            let outcome = PairOutcome::GrantFailed { version, error: e };
            record(outcome, Some(response.raw), grant_attempts, raw)
        }
    }
}

fn should_retry_publish(policy: PublishRetryPolicy, error: &PipelineError) -> bool {
    match policy {
        PublishRetryPolicy::Never => false,
        PublishRetryPolicy::UnambiguousOnly => error.is_retryable() && !error.is_ambiguous(),
        PublishRetryPolicy::Always => error.is_retryable(),
    }
}

/// Apply the per-call timeout
async fn bounded<T>(
    timeout: Duration,
    region: &str,
    operation: &str,
    future: impl Future<Output = Result<T, PipelineError>>,
) -> Result<T, PipelineError> {
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| PipelineError::Timeout {
            scope: region.to_string(),
            operation: operation.to_string(),
            timeout,
        })?
}
