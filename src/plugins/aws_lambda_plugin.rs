//! AWS Lambda Plugin - regional layer registry backed by the aws CLI
//!
//! This module provides:
//! - `lambda publish-layer-version` for uploading an archive as a new version
//! - `lambda add-layer-version-permission` for the per-version grant
//! - Classification of CLI failures into retryable / ambiguous errors

use crate::core::error::PipelineError;
use crate::core::traits::{
    GrantPermissionRequest, GrantResponse, GrantStatus, LayerRegistry, PublishVersionRequest,
    RemoteResponse,
};
use crate::security::{CommandError, SafeCommandExecutor};
use async_trait::async_trait;
use std::process::Output;

const PUBLISH_OPERATION: &str = "publish-layer-version";
const GRANT_OPERATION: &str = "add-layer-version-permission";

/// Error code returned when the statement id already exists on the version
const STATEMENT_CONFLICT: &str = "ResourceConflictException";

/// stderr fragments meaning the request reached the service before failing
const AMBIGUOUS_PATTERNS: &[&str] = &[
    "read timeout",
    "connection reset",
    "connection aborted",
    "connection was closed",
];

/// Layer registry using the aws CLI
pub struct AwsLambdaRegistry {
    executor: SafeCommandExecutor,
    profile: Option<String>,
}

impl AwsLambdaRegistry {
    pub fn new(executor: SafeCommandExecutor) -> Self {
        Self {
            executor,
            profile: None,
        }
    }

    /// Use a named credentials profile instead of the default chain
    pub fn with_profile(mut self, profile: &str) -> Self {
        self.profile = Some(profile.to_string());
        self
    }

    async fn aws(&self, region: &str, mut args: Vec<String>) -> Result<Output, CommandError> {
        args.extend(["--region".to_string(), region.to_string()]);
        args.extend(["--output".to_string(), "json".to_string()]);
        if let Some(profile) = &self.profile {
            args.extend(["--profile".to_string(), profile.clone()]);
        }

        self.executor.execute("aws", &args).await
    }
}

fn publish_args(request: &PublishVersionRequest) -> Vec<String> {
    let mut args = vec![
        "lambda".to_string(),
        PUBLISH_OPERATION.to_string(),
        "--layer-name".to_string(),
        request.layer_name.clone(),
        "--description".to_string(),
        request.description.clone(),
        "--zip-file".to_string(),
        format!("fileb://{}", request.archive_path.display()),
        "--compatible-runtimes".to_string(),
    ];
    args.extend(request.compatible_runtimes.iter().cloned());
    args
}

fn grant_args(request: &GrantPermissionRequest) -> Vec<String> {
    vec![
        "lambda".to_string(),
        GRANT_OPERATION.to_string(),
        "--layer-name".to_string(),
        request.layer_name.clone(),
        "--version-number".to_string(),
        request.version.clone(),
        "--statement-id".to_string(),
        request.statement_id.clone(),
        "--principal".to_string(),
        request.principal.clone(),
        "--action".to_string(),
        request.action.clone(),
    ]
}

/// The aws CLI prints the service error on the last non-empty stderr line
fn error_summary(stderr: &str) -> String {
    stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .unwrap_or("no error output")
        .to_string()
}

fn is_ambiguous_failure(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    AMBIGUOUS_PATTERNS.iter().any(|pattern| lower.contains(pattern))
}

/// Raw response surfaced to the operator: stdout, then stderr if any
fn raw_output(stdout: &str, stderr: &str) -> String {
    match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
        (_, true) => stdout.to_string(),
        (true, false) => stderr.to_string(),
        (false, false) => format!("{}\n{}", stdout, stderr),
    }
}

/// Map a failure to run the CLI at all
fn command_failure(region: &str, operation: &str, error: CommandError) -> PipelineError {
    match error {
        CommandError::Timeout(timeout) => PipelineError::Timeout {
            scope: region.to_string(),
            operation: operation.to_string(),
            timeout,
        },
        // Nothing was sent, so the remote cannot have acted
        other => PipelineError::RemoteCallFailure {
            region: region.to_string(),
            operation: operation.to_string(),
            message: other.to_string(),
            raw_response: String::new(),
            ambiguous: false,
        },
    }
}

fn publish_outcome(
    region: &str,
    success: bool,
    stdout: &str,
    stderr: &str,
) -> Result<RemoteResponse, PipelineError> {
    if success {
        return Ok(RemoteResponse {
            raw: stdout.to_string(),
        });
    }

    Err(PipelineError::RemoteCallFailure {
        region: region.to_string(),
        operation: PUBLISH_OPERATION.to_string(),
        message: error_summary(stderr),
        raw_response: raw_output(stdout, stderr),
        ambiguous: is_ambiguous_failure(stderr),
    })
}

fn grant_outcome(
    request: &GrantPermissionRequest,
    success: bool,
    stdout: &str,
    stderr: &str,
) -> Result<GrantResponse, PipelineError> {
    if success {
        return Ok(GrantResponse {
            status: GrantStatus::Granted,
            raw: stdout.to_string(),
        });
    }

    if stderr.contains(STATEMENT_CONFLICT) {
        return Ok(GrantResponse {
            status: GrantStatus::AlreadyGranted,
            raw: raw_output(stdout, stderr),
        });
    }

    Err(PipelineError::PermissionGrantFailure {
        region: request.region.clone(),
        version: request.version.clone(),
        message: error_summary(stderr),
        raw_response: raw_output(stdout, stderr),
    })
}

#[async_trait]
impl LayerRegistry for AwsLambdaRegistry {
    fn name(&self) -> &str {
        "aws-lambda"
    }

    async fn publish_version(
        &self,
        request: &PublishVersionRequest,
    ) -> Result<RemoteResponse, PipelineError> {
        let output = self
            .aws(&request.region, publish_args(request))
            .await
            .map_err(|e| command_failure(&request.region, PUBLISH_OPERATION, e))?;

        publish_outcome(
            &request.region,
            output.status.success(),
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
        )
    }

    async fn grant_permission(
        &self,
        request: &GrantPermissionRequest,
    ) -> Result<GrantResponse, PipelineError> {
        let output = self
            .aws(&request.region, grant_args(request))
            .await
            .map_err(|e| command_failure(&request.region, GRANT_OPERATION, e))?;

        grant_outcome(
            request,
            output.status.success(),
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    fn publish_request() -> PublishVersionRequest {
        PublishVersionRequest {
            layer_name: "Datadog-Python37-metric".to_string(),
            description: "Datadog python API client for lambdas".to_string(),
            archive_path: PathBuf::from("/tmp/layers/datadogpy37.zip"),
            region: "eu-west-1".to_string(),
            compatible_runtimes: vec!["python3.7".to_string()],
        }
    }

    fn grant_request() -> GrantPermissionRequest {
        GrantPermissionRequest {
            layer_name: "Datadog-Python37-metric".to_string(),
            region: "eu-west-1".to_string(),
            version: "12".to_string(),
            statement_id: "release-12".to_string(),
            principal: "*".to_string(),
            action: "lambda:GetLayerVersion".to_string(),
        }
    }

    #[test]
    fn test_publish_args() {
        let args = publish_args(&publish_request());

        assert_eq!(&args[..2], &["lambda", "publish-layer-version"]);
        assert!(args.contains(&"fileb:///tmp/layers/datadogpy37.zip".to_string()));
        assert_eq!(args.last().unwrap(), "python3.7");
    }

    #[test]
    fn test_grant_args_scope_to_version() {
        let args = grant_args(&grant_request());

        let position = args.iter().position(|a| a == "--version-number").unwrap();
        assert_eq!(args[position + 1], "12");
        let position = args.iter().position(|a| a == "--statement-id").unwrap();
        assert_eq!(args[position + 1], "release-12");
        let position = args.iter().position(|a| a == "--principal").unwrap();
        assert_eq!(args[position + 1], "*");
    }

    #[test]
    fn test_publish_failure_keeps_raw_output() {
        let stderr = "\nAn error occurred (AccessDeniedException) when calling the PublishLayerVersion operation: denied\n";
        let error = publish_outcome("eu-west-1", false, "", stderr).unwrap_err();

        match &error {
            PipelineError::RemoteCallFailure {
                message,
                raw_response,
                ambiguous,
                ..
            } => {
                assert!(message.starts_with("An error occurred (AccessDeniedException)"));
                assert_eq!(raw_response, stderr);
                assert!(!ambiguous);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_read_timeout_is_ambiguous() {
        let stderr = "Read timeout on endpoint URL: \"https://lambda.eu-west-1.amazonaws.com/\"";
        let error = publish_outcome("eu-west-1", false, "", stderr).unwrap_err();

        assert!(error.is_ambiguous());
        assert!(error.is_retryable());
    }

    #[test]
    fn test_connect_failure_is_not_ambiguous() {
        let stderr = "Could not connect to the endpoint URL: \"https://lambda.cn-north-1.amazonaws.com.cn/\"";
        let error = publish_outcome("cn-north-1", false, "", stderr).unwrap_err();

        assert!(!error.is_ambiguous());
        assert!(error.is_retryable());
    }

    #[test]
    fn test_grant_conflict_counts_as_granted() {
        let stderr = "An error occurred (ResourceConflictException) when calling the AddLayerVersionPermission operation: The statement id (release-12) provided already exists.";
        let response = grant_outcome(&grant_request(), false, "", stderr).unwrap();

        assert_eq!(response.status, GrantStatus::AlreadyGranted);
        assert!(response.raw.contains("release-12"));
    }

    #[test]
    fn test_grant_failure() {
        let stderr = "An error occurred (ResourceNotFoundException) when calling the AddLayerVersionPermission operation";
        let error = grant_outcome(&grant_request(), false, "", stderr).unwrap_err();

        assert!(matches!(
            error,
            PipelineError::PermissionGrantFailure { ref version, .. } if version == "12"
        ));
    }

    #[test]
    fn test_command_timeout_maps_to_timeout() {
        let error = command_failure(
            "sa-east-1",
            PUBLISH_OPERATION,
            CommandError::Timeout(Duration::from_secs(120)),
        );

        assert!(matches!(error, PipelineError::Timeout { .. }));
        assert!(error.is_ambiguous());
    }

    #[test]
    fn test_missing_cli_is_not_ambiguous() {
        let error = command_failure(
            "sa-east-1",
            PUBLISH_OPERATION,
            CommandError::ExecutionFailed("No such file or directory".to_string()),
        );

        assert!(!error.is_ambiguous());
        assert!(!error.is_retryable());
    }
}
