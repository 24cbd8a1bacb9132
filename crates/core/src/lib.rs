//! Core business logic for edugate.
//!
//! The device services share one rule: only [`PrimaryAssignmentGuard`]
//! changes `is_primary`, and it does so under the device-set lock.
//! [`DeviceRegistry`] delegates new-device creation to the guard, and
//! [`DeviceAccessService`] only reads.

pub mod services;

pub use services::*;
