//! Shared domain vocabulary, configuration, and pricing for AIVIS.

pub mod app_config;
pub mod config;
pub mod domain;
pub mod pricing;

use thiserror::Error;

pub use app_config::{AppConfig, BackendTransport, Environment};
pub use config::{build_app_config, load_app_config, load_app_config_from_env};
pub use domain::{
    AnswerStatus, CitationSource, DetectedMention, InvocationKind, JobStatus, MentionKind,
    ParseEnumError, RunStatus, TagStatus, TokenUsage, MENTION_CONFIDENCE_THRESHOLD,
};
pub use pricing::{load_pricing, load_pricing_or_default, ModelPricing, PricingTable};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read pricing file {path}: {source}")]
    PricingFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse pricing file: {0}")]
    PricingFileParse(#[from] serde_yaml::Error),

    #[error("pricing validation failed: {0}")]
    Validation(String),
}
