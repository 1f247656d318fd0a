#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Ownership enforcement for user-owned vault rows.
//!
//! Repositories ask [`OwnershipAuthorizer`] before touching a row. Each decision
//! is published to an [`AuditSink`]; [`BroadcastAuditTrail`] fans them out to
//! monitoring subscribers.

pub mod audit;
pub mod authorizer;
pub mod error;
pub mod identity;

pub use audit::{AuditEvent, AuditSink, BroadcastAuditTrail};
pub use authorizer::OwnershipAuthorizer;
pub use error::{AuthError, DenialDisclosure, Operation};
pub use identity::{IdentityProvider, SessionIdentity, UserId};
