//! The fixed error taxonomy and exit-code table.
//!
//! Every variant carries a stable `std::process::exit` code. `main.rs` maps
//! any top-level `Err` straight back to `exit_code()`.

use thiserror::Error;

/// A `std::process::exit` code for every error kind the engine can surface.
#[derive(Debug, Error)]
pub enum FuselageError {
    #[error("ParseError: {0}")]
    ParseError(String),

    #[error("BindingError: {0}")]
    BindingError(String),

    #[error("ExecutionError: {0}")]
    ExecutionError(String),

    #[error("CommandError: {0}")]
    CommandError(String),

    #[error("NonConformingPolicy: {0}")]
    NonConformingPolicy(String),

    #[error("NoSuitableProviders: {0}")]
    NoSuitableProviders(String),

    #[error("TooManyProviders: {0}")]
    TooManyProviders(String),

    #[error("InvalidGroup: {0}")]
    InvalidGroup(String),

    #[error("InvalidUser: {0}")]
    InvalidUser(String),

    #[error("BinaryMissing: {0}")]
    BinaryMissing(String),

    #[error("DanglingSymlink: {0}")]
    DanglingSymlink(String),

    #[error("PathComponentMissing: {0}")]
    PathComponentMissing(String),

    #[error("PathComponentNotDirectory: {0}")]
    PathComponentNotDirectory(String),

    #[error("SavedEventsAndNoInstruction: there is a saved events file - you need to specify --resume or --no-resume")]
    SavedEventsAndNoInstruction,

    #[error("MissingDependency: {0}")]
    MissingDependency(String),

    #[error("OperationFailed: {0}")]
    OperationFailed(String),

    #[error("{0}")]
    Generic(String),

    #[error("NothingChanged: no changes have been applied")]
    NothingChanged,
}

impl FuselageError {
    /// The stable exit code for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            FuselageError::ParseError(_) => 128,
            FuselageError::BindingError(_) => 129,
            FuselageError::ExecutionError(_) => 130,
            FuselageError::CommandError(_) => 133,
            FuselageError::NonConformingPolicy(_) => 136,
            FuselageError::NoSuitableProviders(_) => 137,
            FuselageError::TooManyProviders(_) => 138,
            FuselageError::InvalidGroup(_) => 140,
            FuselageError::InvalidUser(_) => 141,
            FuselageError::BinaryMissing(_) => 143,
            FuselageError::DanglingSymlink(_) => 144,
            FuselageError::PathComponentMissing(_) => 146,
            FuselageError::PathComponentNotDirectory(_) => 147,
            FuselageError::SavedEventsAndNoInstruction => 148,
            FuselageError::MissingDependency(_) => 152,
            FuselageError::OperationFailed(_) => 142,
            FuselageError::Generic(_) => 253,
            FuselageError::NothingChanged => 254,
        }
    }

    /// A `SystemError(rc, stdout, stderr)`-equivalent: an unexpected shell
    /// command return code is always a `CommandError`.
    pub fn command_error(rc: i32, stdout: &str, stderr: &str) -> Self {
        FuselageError::CommandError(format!(
            "unexpected return code {rc}\nstdout: {stdout}\nstderr: {stderr}"
        ))
    }
}

pub type Result<T> = std::result::Result<T, FuselageError>;
