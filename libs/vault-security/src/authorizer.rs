//! Ownership checks for user-owned rows.
//!
//! Every public call records exactly one [`AuditEvent`] before it returns,
//! whether the caller then propagates or ignores the result.

use std::sync::Arc;

use tracing::warn;

use crate::audit::{AuditEvent, AuditSink};
use crate::error::{AuthError, Operation};
use crate::identity::{IdentityProvider, UserId};

pub const REASON_MISSING_USER: &str = "missing_user";
pub const REASON_NOT_FOUND: &str = "not_found";

#[derive(Clone)]
pub struct OwnershipAuthorizer {
    identity: Arc<dyn IdentityProvider>,
    audit: Arc<dyn AuditSink>,
}

impl std::fmt::Debug for OwnershipAuthorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnershipAuthorizer").finish_non_exhaustive()
    }
}

impl OwnershipAuthorizer {
    #[must_use]
    pub fn new(identity: Arc<dyn IdentityProvider>, audit: Arc<dyn AuditSink>) -> Self {
        Self { identity, audit }
    }

    /// The signed-in user.
    ///
    /// # Errors
    /// [`AuthError::Unauthenticated`] when nobody is signed in.
    pub fn require_identity(&self) -> Result<UserId, AuthError> {
        match self.identity.current_user() {
            Some(user) => {
                self.emit(AuditEvent::new("session", true, "identity_ok").actor(Some(user.clone())));
                Ok(user)
            }
            None => {
                self.emit(AuditEvent::new("session", false, REASON_MISSING_USER));
                Err(AuthError::Unauthenticated)
            }
        }
    }

    /// Succeeds only when the caller owns the resource.
    ///
    /// # Errors
    /// `Unauthenticated`, `OwnerlessResource` when `owner` is `None`, otherwise
    /// `Forbidden` on mismatch.
    pub fn verify_ownership(
        &self,
        owner: Option<&UserId>,
        resource_type: &str,
        resource_id: &str,
        operation: Operation,
    ) -> Result<(), AuthError> {
        let resource = format!("{resource_type}:{resource_id}");
        let base = |granted: bool, reason: String, actor: Option<UserId>| {
            AuditEvent::new(resource.clone(), granted, reason)
                .actor(actor)
                .meta("operation", operation.as_str())
                .meta("resource_type", resource_type)
                .meta("resource_id", resource_id)
        };

        let Some(user) = self.identity.current_user() else {
            self.emit(base(false, REASON_MISSING_USER.to_owned(), None));
            return Err(AuthError::Unauthenticated);
        };

        match owner {
            None => {
                self.emit(base(false, format!("ownerless:{resource_id}"), Some(user)));
                Err(AuthError::ownerless(resource_type, resource_id))
            }
            Some(owner) if *owner == user => {
                self.emit(base(true, format!("ok:{resource_id}"), Some(user)));
                Ok(())
            }
            Some(_) => {
                warn!(resource_type, resource_id, %operation, "Ownership check denied");
                self.emit(base(false, format!("forbidden:{resource_id}"), Some(user)));
                Err(AuthError::forbidden(resource_type, resource_id, operation))
            }
        }
    }

    /// Non-failing variant of [`Self::verify_ownership`].
    #[must_use]
    pub fn is_owner(&self, owner: Option<&UserId>) -> bool {
        let user = self.identity.current_user();
        let (granted, reason) = match (&user, owner) {
            (None, _) => (false, REASON_MISSING_USER),
            (Some(_), None) => (false, "ownerless"),
            (Some(u), Some(o)) if u == o => (true, "ok"),
            (Some(_), Some(_)) => (false, "not_owner"),
        };
        self.emit(AuditEvent::new("ownership", granted, reason).actor(user));
        granted
    }

    /// Check `resources` in order, stopping at the first violation.
    ///
    /// # Errors
    /// The error of the first entry that is ownerless or not owned by the caller.
    pub fn verify_batch_ownership(
        &self,
        resources: &[(Option<UserId>, String)],
        resource_type: &str,
        operation: Operation,
    ) -> Result<(), AuthError> {
        let Some(user) = self.identity.current_user() else {
            self.emit(
                AuditEvent::new(resource_type, false, REASON_MISSING_USER)
                    .meta("operation", operation.as_str())
                    .meta("batch_size", resources.len().to_string()),
            );
            return Err(AuthError::Unauthenticated);
        };

        for (index, (owner, id)) in resources.iter().enumerate() {
            let violation = match owner {
                None => Some((format!("ownerless:{id}"), AuthError::ownerless(resource_type, id))),
                Some(o) if *o == user => None,
                Some(_) => Some((
                    format!("forbidden:{id}"),
                    AuthError::forbidden(resource_type, id, operation),
                )),
            };
            if let Some((reason, err)) = violation {
                self.emit(
                    AuditEvent::new(format!("{resource_type}:{id}"), false, reason)
                        .actor(Some(user))
                        .meta("operation", operation.as_str())
                        .meta("batch_index", index.to_string())
                        .meta("batch_size", resources.len().to_string()),
                );
                return Err(err);
            }
        }

        self.emit(
            AuditEvent::new(resource_type, true, format!("batch_ok:{}", resources.len()))
                .actor(Some(user))
                .meta("operation", operation.as_str()),
        );
        Ok(())
    }

    /// Record a lookup miss and return the matching error.
    #[must_use]
    pub fn not_found(&self, resource_type: &str, resource_id: &str) -> AuthError {
        self.emit(
            AuditEvent::new(format!("{resource_type}:{resource_id}"), false, REASON_NOT_FOUND)
                .actor(self.identity.current_user())
                .meta("resource_type", resource_type)
                .meta("resource_id", resource_id),
        );
        AuthError::not_found(resource_type, resource_id)
    }

    fn emit(&self, event: AuditEvent) {
        self.audit.record(event);
    }
}
