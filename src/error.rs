//! Error types for the reconciler

use crate::kinds::Kind;
use std::fmt;
use thiserror::Error;

/// Result type alias for reconciler operations
pub type Result<T> = std::result::Result<T, Error>;

/// Remote operation that produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Operation {
    List,
    Get,
    Create,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Operation::List => "list",
            Operation::Get => "get",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        };
        f.write_str(op)
    }
}

/// Failure reported by a [`ClusterApi`](crate::cluster::ClusterApi) implementation
#[derive(Debug, Error)]
pub enum ClientError {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Object does not exist in the store
    #[error("{kind} {name} not found")]
    NotFound { kind: Kind, name: String },

    /// Object with the same name already exists
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: Kind, name: String },

    /// Request refused by the store
    #[error("request rejected: {0}")]
    Rejected(String),

    /// Object could not be converted to or from its stored form
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClientError {
    /// Whether the failure means the object is absent
    pub fn is_not_found(&self) -> bool {
        match self {
            ClientError::NotFound { .. } => true,
            ClientError::Kube(kube::Error::Api(ae)) => ae.code == 404,
            _ => false,
        }
    }
}

/// Errors that can occur during a reconciliation pass
#[derive(Debug, Error)]
pub enum Error {
    /// Ownership selector could not be parsed
    #[error("invalid label selector {selector:?}: clause {clause:?} {reason}")]
    Selector {
        selector: String,
        clause: String,
        reason: String,
    },

    /// Live objects of a kind could not be listed or indexed
    #[error("unable to build {kind} state in namespace {namespace}: {source}")]
    Build {
        kind: Kind,
        namespace: String,
        #[source]
        source: ClientError,
    },

    /// A remote call for a single object failed
    #[error("unable to {operation} {kind} {name} in namespace {namespace}: {source}")]
    Mutation {
        operation: Operation,
        kind: Kind,
        name: String,
        namespace: String,
        #[source]
        source: ClientError,
    },

    /// A controller hook lifecycle step failed
    #[error("controller {name} failed at {step}: {message}")]
    Controller {
        name: String,
        step: &'static str,
        message: String,
    },

    /// Desired manifests could not be decoded
    #[error("bundle error: {0}")]
    Bundle(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Every error collected during one pass
    #[error("{} error(s) during reconciliation: {}", .0.len(), join_errors(.0))]
    Aggregate(Vec<Error>),
}

impl Error {
    pub(crate) fn mutation(
        operation: Operation,
        kind: Kind,
        name: &str,
        namespace: &str,
        source: ClientError,
    ) -> Self {
        Error::Mutation {
            operation,
            kind,
            name: name.to_string(),
            namespace: namespace.to_string(),
            source,
        }
    }
}

fn join_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Bundle(err.to_string())
    }
}
