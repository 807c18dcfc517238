//! # Error Types
//!
//! Error enums for every layer of the lifecycle engine. Each concern owns a
//! `thiserror` enum; [`IsmError`] is the crate-level error that the orchestration
//! layer propagates with `?`.
//!
//! ## Taxonomy
//!
//! - [`ClientError`]: failures returned by index administration calls. Remote
//!   transport failures carry a nested cause which steps unwrap to the root.
//! - [`StorageError`]: failures from the config index (job, metadata and policy docs).
//! - [`PolicyValidationError`]: structural problems in a policy document.
//! - [`ConfigurationError`]: settings loading and validation problems.

use thiserror::Error;

/// Crate-level error for orchestration operations
#[derive(Error, Debug)]
pub enum IsmError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Index client error: {0}")]
    Client(#[from] ClientError),

    #[error("Policy validation error: {0}")]
    PolicyValidation(#[from] PolicyValidationError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Policy not found: {policy_id}")]
    PolicyNotFound { policy_id: String },

    #[error("Managed index not found: {index}")]
    ManagedIndexNotFound { index: String },

    #[error("Version conflict on {document}")]
    VersionConflict { document: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, IsmError>;

/// Errors surfaced by the config index client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Config index does not exist: {index}")]
    IndexNotFound { index: String },

    #[error("Cluster block prevents operation: {reason}")]
    ClusterBlocked { reason: String },

    #[error("Too many requests: {reason}")]
    TooManyRequests { reason: String },

    #[error("Transport failure: {reason}")]
    Transport { reason: String },
}

impl StorageError {
    /// Whether the error reports a missing config index
    pub fn is_index_not_found(&self) -> bool {
        matches!(self, Self::IndexNotFound { .. })
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Errors surfaced by index administration calls made from steps
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("Remote transport exception: {message}")]
    RemoteTransport {
        message: String,
        cause: Box<ClientError>,
    },

    #[error("no such index [{index}]")]
    IndexNotFound { index: String },

    #[error("Concurrent snapshot in progress: {reason}")]
    ConcurrentSnapshot { reason: String },

    #[error("Resource already exists: {id}")]
    AlreadyExists { id: String },

    #[error("{0}")]
    IllegalArgument(String),

    #[error("{0}")]
    Other(String),
}

impl ClientError {
    /// Unwraps nested remote transport errors down to the originating error
    pub fn root_cause(&self) -> &ClientError {
        let mut current = self;
        while let Self::RemoteTransport { cause, .. } = current {
            current = cause;
        }
        current
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Structural problems found when validating a policy document
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyValidationError {
    #[error("Policy must contain at least one state")]
    NoStates,

    #[error("Default state [{state}] does not exist in policy")]
    MissingDefaultState { state: String },

    #[error("Policy contains duplicate state name [{state}]")]
    DuplicateState { state: String },

    #[error("State [{state}] transitions to unknown state [{target}]")]
    UnknownTransitionTarget { state: String, target: String },

    #[error("Action at position {position} in state [{state}] declares index {declared}")]
    ActionIndexMismatch {
        state: String,
        position: usize,
        declared: usize,
    },

    #[error("Cannot provide more than one Transition condition")]
    MultipleConditions,

    #[error("Transition conditions require exactly one condition")]
    NoCondition,

    #[error("Transition doc count condition must be greater than 0")]
    NonPositiveDocCount,

    #[error("Transition size condition must be greater than 0")]
    NonPositiveSize,

    #[error("Invalid cron expression [{expression}]: {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("ISM template priority must be non-negative, got {priority}")]
    NegativeTemplatePriority { priority: i32 },
}

/// Errors raised while loading or validating settings
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigurationError>;
