//! Client fingerprint payload parsing.
//!
//! The browser sends a `visitorId` plus a bag of `components`. Only the
//! visitor id identifies the device; the components are stored as metadata.

use edugate_common::{AppError, AppResult};
use edugate_db::repositories::DeviceMetadata;
use serde::Deserialize;
use serde_json::{Value, json};
use validator::Validate;

const UNKNOWN: &str = "unknown";

/// Raw fingerprint payload as posted by the client.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct FingerprintPayload {
    #[validate(length(max = 255))]
    #[serde(default)]
    pub visitor_id: Option<String>,

    #[serde(default)]
    pub components: Value,
}

/// Fingerprint split into identity and stored metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFingerprint {
    pub fingerprint: String,
    pub metadata: DeviceMetadata,
}

impl FingerprintPayload {
    /// Extract the fingerprint and device metadata.
    ///
    /// Fails with `Validation` when `visitorId` is missing or blank.
    pub fn parse(&self) -> AppResult<ParsedFingerprint> {
        self.validate()?;

        let fingerprint = self
            .visitor_id
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::Validation("visitorId is required".to_string()))?
            .to_string();

        let components = &self.components;
        let os_name = str_at(components, "/os_info/name");
        let os_version = str_at(components, "/os_info/version");
        let os_version = if os_name == "MacIntel" {
            format!("Macintosh; Intel Mac OS X {os_version}")
        } else {
            os_version
        };

        let hardware_info = components
            .get("hardware_info")
            .filter(|v| !v.is_null())
            .cloned();

        let security_fingerprints = json!({
            "canvas": {
                "text": value_at(components, "/canvas/value/text"),
                "geometry": value_at(components, "/canvas/value/geometry"),
                "winding": value_at(components, "/canvas/value/winding"),
            },
            "audio": {
                "value": value_at(components, "/audio/value"),
                "duration": value_at(components, "/audio/duration"),
            },
        });

        Ok(ParsedFingerprint {
            fingerprint,
            metadata: DeviceMetadata {
                browser_name: str_at(components, "/browser_info/name"),
                browser_version: str_at(components, "/browser_info/version"),
                os_name,
                os_version,
                hardware_info,
                security_fingerprints: Some(security_fingerprints),
            },
        })
    }
}

fn str_at(value: &Value, pointer: &str) -> String {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or(UNKNOWN)
        .to_string()
}

fn value_at(value: &Value, pointer: &str) -> Value {
    value.pointer(pointer).cloned().unwrap_or(Value::Null)
}
