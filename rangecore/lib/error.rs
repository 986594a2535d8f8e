use std::{
    error::Error,
    fmt::{self, Display},
};
use thiserror::Error;

use crate::provider::ProviderError;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a rangecore-related operation.
pub type RangecoreResult<T> = Result<T, RangecoreError>;

/// An error that occurred during a scene orchestration operation.
#[derive(Debug, Error)]
pub enum RangecoreError {
    /// The topology config failed validation. Carries every violation found,
    /// not just the first.
    #[error("topology validation failed: {}", .0.join("; "))]
    TopologyValidation(Vec<String>),

    /// A shared resource pool could not satisfy a reservation request.
    #[error("reservation error: {0}")]
    Reservation(String),

    /// A cloud provider call failed.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// A named lock could not be acquired within the attempt budget.
    #[error("lock '{name}' not acquired after {attempts} attempts")]
    LockTimeout {
        /// The name of the contended lock.
        name: String,

        /// The number of acquisition attempts made.
        attempts: u32,
    },

    /// A database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration failed.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// An error that occurred when a join handle returned an error.
    #[error("join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    /// A serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A YAML parse error.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The referenced scene does not exist.
    #[error("scene not found: {0}")]
    SceneNotFound(String),

    /// The referenced terminal does not exist.
    #[error("terminal not found: {0}")]
    TerminalNotFound(String),

    /// The scene is not in a state that permits the requested operation.
    #[error("scene '{scene}' is {status}, cannot {operation}")]
    InvalidSceneState {
        /// The scene id.
        scene: String,

        /// The persisted scene status.
        status: String,

        /// The operation that was refused.
        operation: String,
    },

    /// Runtime gateway mutation was requested on a gateway that does not
    /// permit user configuration.
    #[error("gateway '{0}' does not allow user configuration")]
    GatewayNotConfigurable(String),

    /// An error that can represent any error.
    #[error(transparent)]
    Custom(#[from] AnyError),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RangecoreError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> RangecoreError {
        RangecoreError::Custom(AnyError {
            error: error.into(),
        })
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an `Ok` `RangecoreResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> RangecoreResult<T> {
    Result::Ok(value)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}
