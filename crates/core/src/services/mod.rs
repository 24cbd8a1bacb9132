//! Business logic services.

#![allow(missing_docs)]

pub mod device_access;
pub mod device_registry;
pub mod fingerprint;
pub mod primary_guard;
pub mod user;

pub use device_access::DeviceAccessService;
pub use device_registry::DeviceRegistry;
pub use fingerprint::{FingerprintPayload, ParsedFingerprint};
pub use primary_guard::{PrimaryAssignmentGuard, ReconcileOutcome};
pub use user::UserService;
