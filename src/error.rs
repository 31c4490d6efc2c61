use crate::status::{EntityKind, Status};

/// Machine-readable reason attached to every authorization denial.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deny {
    #[error("caller is not authenticated")]
    Unauthenticated,
    #[error("caller role does not permit this action")]
    WrongRole,
    #[error("caller has no ownership relation to the target entity")]
    NotOwner,
    #[error("an application for this campaign and influencer already exists")]
    AlreadyExists,
    #[error("target entity is not in a state that permits this action")]
    InvalidState,
}

#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
    #[error("required field '{0}' is not set")]
    MissingField(&'static str),
    #[error("campaign budget must be greater than zero")]
    ZeroBudget,
    #[error("submission content must not be empty")]
    EmptyContent,
}

/// Error taxonomy for the workflow core. Every rejection carries a stable
/// variant callers can match on; retrying is safe for `Conflict` only.
#[derive(thiserror::Error, Debug)]
pub enum WorkflowError {
    #[error("caller is not authenticated")]
    Unauthenticated,
    #[error("forbidden: {0}")]
    Forbidden(Deny),
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },
    #[error("transition lost a concurrent update race, re-read and retry")]
    Conflict,
    #[error("no transition from '{from}' to '{to}' for {kind}")]
    InvalidState {
        kind: EntityKind,
        from: Status,
        to: Status,
    },
    #[error("side effect failed: {0}")]
    SideEffect(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Storage(#[from] sled::Error),
    #[error("codec failure: {0}")]
    Codec(String),
}

impl From<Deny> for WorkflowError {
    fn from(deny: Deny) -> Self {
        match deny {
            Deny::Unauthenticated => WorkflowError::Unauthenticated,
            other => WorkflowError::Forbidden(other),
        }
    }
}

impl WorkflowError {
    pub fn not_found(kind: &'static str, id: &str) -> Self {
        WorkflowError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}
