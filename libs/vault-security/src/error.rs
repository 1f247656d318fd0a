use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What the caller tried to do with a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Read,
    Create,
    Update,
    Delete,
    Restore,
    Move,
    Purge,
}

impl Operation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Restore => "restore",
            Self::Move => "move",
            Self::Purge => "purge",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("no authenticated user")]
    Unauthenticated,

    #[error("{operation} on {resource_type} '{resource_id}' is not permitted")]
    Forbidden {
        resource_type: String,
        resource_id: String,
        operation: Operation,
    },

    #[error("{resource_type} '{resource_id}' has no owner")]
    OwnerlessResource {
        resource_type: String,
        resource_id: String,
    },

    #[error("{resource_type} '{resource_id}' not found")]
    NotFound {
        resource_type: String,
        resource_id: String,
    },
}

impl AuthError {
    #[must_use]
    pub fn forbidden(
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        operation: Operation,
    ) -> Self {
        Self::Forbidden {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            operation,
        }
    }

    #[must_use]
    pub fn ownerless(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self::OwnerlessResource {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
        }
    }

    #[must_use]
    pub fn not_found(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
        }
    }

    /// Report a denial as if the resource did not exist.
    #[must_use]
    pub fn conceal(self) -> Self {
        match self {
            Self::Forbidden {
                resource_type,
                resource_id,
                ..
            }
            | Self::OwnerlessResource {
                resource_type,
                resource_id,
            } => Self::NotFound {
                resource_type,
                resource_id,
            },
            other => other,
        }
    }

    #[must_use]
    pub fn is_denial(&self) -> bool {
        matches!(self, Self::Forbidden { .. } | Self::OwnerlessResource { .. })
    }
}

/// How repositories surface an ownership denial to their callers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialDisclosure {
    /// Report `Forbidden` / `OwnerlessResource` as-is.
    #[default]
    Forbidden,
    /// Report every denial as `NotFound`.
    NotFound,
}

impl DenialDisclosure {
    #[must_use]
    pub fn apply(self, err: AuthError) -> AuthError {
        match self {
            Self::Forbidden => err,
            Self::NotFound => err.conceal(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conceal_hides_denials_only() {
        let forbidden = AuthError::forbidden("note", "n1", Operation::Update);
        assert_eq!(forbidden.clone().conceal(), AuthError::not_found("note", "n1"));
        assert_eq!(
            AuthError::ownerless("folder", "f1").conceal(),
            AuthError::not_found("folder", "f1")
        );
        assert_eq!(AuthError::Unauthenticated.conceal(), AuthError::Unauthenticated);
        assert_eq!(DenialDisclosure::Forbidden.apply(forbidden.clone()), forbidden);
    }

    #[test]
    fn forbidden_message_names_the_operation() {
        let err = AuthError::forbidden("note", "n1", Operation::Delete);
        assert_eq!(err.to_string(), "delete on note 'n1' is not permitted");
    }
}
