use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Pins file errors
    #[error("{path}: the pins file is corrupted or malformed; fix or delete it to continue ({reason})")]
    MalformedLockfile { path: PathBuf, reason: String },

    // Resolution errors
    #[error("dependencies could not be resolved:\n{report}")]
    Unsatisfiable { report: String },

    #[error("no available version of '{identity}' satisfies {range}")]
    NoAvailableVersion { identity: String, range: String },

    #[error("'{identity}' {version} requires tools version {required} but {have} is available")]
    ToolsVersionIncompatible {
        identity: String,
        version: String,
        required: String,
        have: String,
    },

    // Working-copy guards
    #[error("{0} has uncommitted changes")]
    UncommittedChanges(PathBuf),

    #[error("{0} has unpushed changes")]
    UnpushedChanges(PathBuf),

    // Edit workflow
    #[error("branch '{0}' already exists")]
    BranchAlreadyExists(String),

    #[error("revision '{0}' does not exist")]
    RevisionDoesNotExist(String),

    #[error("dependency '{0}' is not in edit mode")]
    DependencyNotInEditMode(String),

    #[error("cannot pin '{identity}' to {requirement}; pinning requires an exact version, branch, or revision")]
    InvalidPinRequirement {
        identity: String,
        requirement: String,
    },

    #[error("dependency '{0}' is missing")]
    DependencyMissing(String),

    // Artifact integrity; fatal, never retried
    #[error("checksum of downloaded artifact '{0}' changed since it was pinned")]
    ArtifactChecksumChanged(String),

    #[error("artifact '{0}' failed checksum validation")]
    ArtifactInvalidChecksum(String),

    #[error("operation was cancelled")]
    Cancelled,

    #[error("invalid tools version \"{0}\"")]
    InvalidToolsVersion(String),

    // Container errors bubble verbatim and become UNSAT causes
    #[error("package container error for '{identity}': {reason}")]
    Container { identity: String, reason: String },

    // Carriers
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Version(#[from] keel_semver::VersionError),

    #[error(transparent)]
    Constraint(#[from] keel_semver::ConstraintError),

    #[error("HTTP error: {0}")]
    Http(#[from] crate::http::HttpError),
}

pub type Result<T> = std::result::Result<T, Error>;
