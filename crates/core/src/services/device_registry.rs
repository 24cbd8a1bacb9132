//! Device registry service.

use edugate_common::{AppError, AppResult};
use edugate_db::{
    entities::user_device,
    repositories::{DeviceMetadata, UserDeviceRepository, UserRepository},
};
use tracing::debug;

use super::fingerprint::FingerprintPayload;
use super::primary_guard::PrimaryAssignmentGuard;

/// Maximum length of a stored fingerprint.
pub const MAX_FINGERPRINT_LEN: usize = 255;

/// Resolves a (user, fingerprint) pair to a device record.
#[derive(Clone)]
pub struct DeviceRegistry {
    device_repo: UserDeviceRepository,
    user_repo: UserRepository,
    guard: PrimaryAssignmentGuard,
}

impl DeviceRegistry {
    /// Create a new device registry.
    #[must_use]
    pub const fn new(
        device_repo: UserDeviceRepository,
        user_repo: UserRepository,
        guard: PrimaryAssignmentGuard,
    ) -> Self {
        Self {
            device_repo,
            user_repo,
            guard,
        }
    }

    /// Return the active device for this fingerprint, creating it if needed.
    ///
    /// A known device only gets its `last_used` and metadata refreshed, which
    /// needs no set lock. Creation goes through the guard so that the first
    /// device of a user is the only one that can start out primary.
    pub async fn get_or_create_device(
        &self,
        user_id: &str,
        fingerprint: &str,
        metadata: DeviceMetadata,
    ) -> AppResult<user_device::Model> {
        let fingerprint = normalize_fingerprint(fingerprint)?;

        if let Some(device) = self
            .device_repo
            .find_active_by_fingerprint(user_id, fingerprint)
            .await?
        {
            debug!(user_id, device_id = %device.id, "Known device seen again");
            return self.device_repo.touch_now(device, metadata).await;
        }

        self.guard
            .create_device(user_id, fingerprint, metadata)
            .await
    }

    /// Parse a raw client payload and register the device it describes.
    pub async fn register_from_payload(
        &self,
        user_id: &str,
        payload: &FingerprintPayload,
    ) -> AppResult<user_device::Model> {
        let parsed = payload.parse()?;
        self.get_or_create_device(user_id, &parsed.fingerprint, parsed.metadata)
            .await
    }

    /// Active devices of a user, most recently used first.
    pub async fn list_devices(&self, user_id: &str) -> AppResult<Vec<user_device::Model>> {
        self.user_repo.get_by_id(user_id).await?;
        self.device_repo.find_active_by_user(user_id).await
    }
}

fn normalize_fingerprint(fingerprint: &str) -> AppResult<&str> {
    let trimmed = fingerprint.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation(
            "fingerprint must not be empty".to_string(),
        ));
    }
    if trimmed.chars().count() > MAX_FINGERPRINT_LEN {
        return Err(AppError::Validation(format!(
            "fingerprint must be at most {MAX_FINGERPRINT_LEN} characters"
        )));
    }
    Ok(trimmed)
}
