//! Error handling for the layer release pipeline
//!
//! Build-stage errors abort the whole run. Publish-stage errors are scoped to
//! one (region, variant) pair and are recorded rather than propagated.

use std::time::Duration;
use thiserror::Error;

/// Main error type for layer build and publish operations
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    // Build stage
    #[error("[{variant}] ビルドに失敗しました: {message}")]
    BuildFailure { variant: String, message: String },

    #[error("[{variant}] ビルド成果物の取り出しに失敗しました: {message}")]
    ExtractionFailure { variant: String, message: String },

    #[error("[{variant}] アーカイブの作成に失敗しました: {message}")]
    PackingFailure { variant: String, message: String },

    // Publish stage
    #[error("[{region}] バージョン番号を応答から取得できませんでした: {message}")]
    PublishParseFailure {
        region: String,
        message: String,
        raw_response: String,
    },

    #[error("[{region}] {operation} の呼び出しに失敗しました: {message}")]
    RemoteCallFailure {
        region: String,
        operation: String,
        message: String,
        raw_response: String,
        /// The remote may have accepted the request before the failure
        ambiguous: bool,
    },

    #[error("[{region}] バージョン {version} への権限付与に失敗しました: {message}")]
    PermissionGrantFailure {
        region: String,
        version: String,
        message: String,
        raw_response: String,
    },

    #[error("[{scope}] {operation} が {timeout:?} でタイムアウトしました")]
    Timeout {
        scope: String,
        operation: String,
        timeout: Duration,
    },

    #[error("[{scope}] 処理が中断されました")]
    Interrupted { scope: String },

    #[error("設定エラー: {0}")]
    ConfigError(String),
}

impl PipelineError {
    /// Variant, region or other scope the error belongs to
    pub fn scope(&self) -> &str {
        match self {
            Self::BuildFailure { variant, .. }
            | Self::ExtractionFailure { variant, .. }
            | Self::PackingFailure { variant, .. } => variant,
            Self::PublishParseFailure { region, .. }
            | Self::RemoteCallFailure { region, .. }
            | Self::PermissionGrantFailure { region, .. } => region,
            Self::Timeout { scope, .. } | Self::Interrupted { scope } => scope,
            Self::ConfigError(_) => "config",
        }
    }

    /// Fatal errors abort the run; everything else is recorded per pair
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::BuildFailure { .. }
                | Self::ExtractionFailure { .. }
                | Self::PackingFailure { .. }
                | Self::Interrupted { .. }
                | Self::ConfigError(_)
        )
    }

    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::RemoteCallFailure { message, raw_response, .. }
            | Self::PermissionGrantFailure { message, raw_response, .. } => {
                is_transient_message(message) || is_transient_message(raw_response)
            }
            _ => false,
        }
    }

    /// Whether the remote side may have acted on the request despite the error
    pub fn is_ambiguous(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::RemoteCallFailure { ambiguous, .. } => *ambiguous,
            _ => false,
        }
    }

    /// Raw remote response attached to the error, if any
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Self::PublishParseFailure { raw_response, .. }
            | Self::RemoteCallFailure { raw_response, .. }
            | Self::PermissionGrantFailure { raw_response, .. } => Some(raw_response),
            _ => None,
        }
    }

    /// Get suggested actions for this error
    pub fn suggested_actions(&self) -> Vec<&'static str> {
        match self {
            Self::BuildFailure { .. } => vec![
                "docker が起動しているか確認してください",
                "PIP_TARGET の値がインストール可能か確認してください",
            ],
            Self::ExtractionFailure { .. } => {
                vec!["ビルド環境内のインストール先ディレクトリを確認してください"]
            }
            Self::PackingFailure { .. } => vec![
                "出力ディレクトリの書き込み権限を確認してください",
                "ディスクの空き容量を確認してください",
            ],
            Self::PublishParseFailure { .. } => {
                vec!["aws CLI の出力形式が json になっているか確認してください"]
            }
            Self::RemoteCallFailure { .. } => vec![
                "認証情報とリージョンの有効化状況を確認してください",
                "ネットワーク接続を確認してください",
            ],
            Self::PermissionGrantFailure { .. } => vec![
                "公開済みバージョンに対して権限付与を再実行してください",
                "同じ statement id での再実行は安全です",
            ],
            Self::Timeout { .. } => vec![
                "ネットワーク環境を確認してください",
                "設定ファイルの timeout_secs で時間を延長できます",
            ],
            Self::Interrupted { .. } => vec!["再実行してください（公開と権限付与は再実行しても安全です）"],
            Self::ConfigError(_) => vec!["設定ファイルを確認してください"],
        }
    }

    /// Get error code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Self::BuildFailure { .. } => "BUILD_FAILURE",
            Self::ExtractionFailure { .. } => "EXTRACTION_FAILURE",
            Self::PackingFailure { .. } => "PACKING_FAILURE",
            Self::PublishParseFailure { .. } => "PUBLISH_PARSE_FAILURE",
            Self::RemoteCallFailure { .. } => "REMOTE_CALL_FAILURE",
            Self::PermissionGrantFailure { .. } => "PERMISSION_GRANT_FAILURE",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Interrupted { .. } => "INTERRUPTED",
            Self::ConfigError(_) => "CONFIG_ERROR",
        }
    }
}

/// Message fragments that mark a failure as transient
const TRANSIENT_PATTERNS: &[&str] = &[
    "could not connect to the endpoint url",
    "connection refused",
    "connection reset",
    "connect timeout",
    "read timeout",
    "throttl",
    "toomanyrequestsexception",
    "rate exceeded",
    "serviceexception",
    "temporarily unavailable",
    "network error",
];

fn is_transient_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_PATTERNS.iter().any(|pattern| lower.contains(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(message: &str, ambiguous: bool) -> PipelineError {
        PipelineError::RemoteCallFailure {
            region: "us-east-1".to_string(),
            operation: "publish-layer-version".to_string(),
            message: message.to_string(),
            raw_response: String::new(),
            ambiguous,
        }
    }

    #[test]
    fn test_build_errors_are_fatal() {
        let error = PipelineError::BuildFailure {
            variant: "3.7".to_string(),
            message: "exit status 1".to_string(),
        };

        assert!(error.is_fatal());
        assert!(!error.is_retryable());
        assert_eq!(error.scope(), "3.7");
        assert_eq!(error.code(), "BUILD_FAILURE");
    }

    #[test]
    fn test_publish_errors_are_not_fatal() {
        let parse = PipelineError::PublishParseFailure {
            region: "eu-west-1".to_string(),
            message: "missing Version".to_string(),
            raw_response: "{}".to_string(),
        };

        assert!(!parse.is_fatal());
        assert!(!remote("boom", false).is_fatal());
        assert_eq!(parse.raw_response(), Some("{}"));
    }

    #[test]
    fn test_transient_remote_failures_are_retryable() {
        assert!(remote("Could not connect to the endpoint URL", false).is_retryable());
        assert!(remote("An error occurred (TooManyRequestsException)", false).is_retryable());
        assert!(remote("Rate exceeded", false).is_retryable());
        assert!(!remote("AccessDeniedException", false).is_retryable());
    }

    #[test]
    fn test_timeout_is_retryable_and_ambiguous() {
        let error = PipelineError::Timeout {
            scope: "ap-south-1".to_string(),
            operation: "publish-layer-version".to_string(),
            timeout: Duration::from_secs(5),
        };

        assert!(error.is_retryable());
        assert!(error.is_ambiguous());
        assert!(!remote("Rate exceeded", false).is_ambiguous());
    }

    #[test]
    fn test_error_display_contains_scope() {
        let error = PipelineError::PackingFailure {
            variant: "datadogpy36.zip".to_string(),
            message: "disk full".to_string(),
        };

        let display = error.to_string();
        assert!(display.contains("datadogpy36.zip"));
        assert!(display.contains("disk full"));
        assert!(!error.suggested_actions().is_empty());
    }
}
