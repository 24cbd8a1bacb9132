//! Device access check used by the material-serving layer.

use edugate_common::AppResult;
use edugate_db::repositories::UserDeviceRepository;
use tracing::debug;

/// Answers whether a device may open protected learning materials.
#[derive(Clone)]
pub struct DeviceAccessService {
    device_repo: UserDeviceRepository,
}

impl DeviceAccessService {
    /// Create a new device access service.
    #[must_use]
    pub const fn new(device_repo: UserDeviceRepository) -> Self {
        Self { device_repo }
    }

    /// `true` only when the fingerprint maps to the user's active primary device.
    ///
    /// Read-only: an unknown user or fingerprint yields `false` and nothing is
    /// registered or touched.
    pub async fn check_device_access(&self, user_id: &str, fingerprint: &str) -> AppResult<bool> {
        let fingerprint = fingerprint.trim();
        if fingerprint.is_empty() {
            return Ok(false);
        }

        let allowed = self
            .device_repo
            .find_active_by_fingerprint(user_id, fingerprint)
            .await?
            .is_some_and(|device| device.is_primary);

        debug!(user_id, allowed, "Checked device access");
        Ok(allowed)
    }
}
