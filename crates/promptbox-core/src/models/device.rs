//! Device identity model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Maximum device name length accepted by registration.
pub const MAX_DEVICE_NAME_CHARS: usize = 100;

/// Device class reported at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    #[default]
    Desktop,
    Mobile,
    Tablet,
}

impl DeviceType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Desktop => "desktop",
            Self::Mobile => "mobile",
            Self::Tablet => "tablet",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "desktop" => Ok(Self::Desktop),
            "mobile" => Ok(Self::Mobile),
            "tablet" => Ok(Self::Tablet),
            other => Err(Error::validation(format!("unknown device type: {other}"))),
        }
    }
}

/// The singleton identity of this local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    pub device_id: String,
    pub name: String,
    pub device_type: DeviceType,
    /// Whether the remote store has acknowledged this device
    pub registered: bool,
    pub created_at: DateTime<Utc>,
    /// Last fully successful sync round
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Opaque cursor returned by the remote
    pub sync_token: Option<String>,
}

impl DeviceIdentity {
    /// A fresh, not yet registered identity with a locally generated id.
    pub fn new_local(name: &str, device_type: DeviceType) -> Result<Self> {
        Ok(Self {
            device_id: Uuid::new_v4().to_string(),
            name: validate_device_name(name)?,
            device_type,
            registered: false,
            created_at: crate::util::now(),
            last_sync_at: None,
            sync_token: None,
        })
    }
}

/// Trim a device name and check it is 1-100 characters.
pub fn validate_device_name(name: &str) -> Result<String> {
    let name = name.trim();
    let chars = name.chars().count();
    if chars == 0 || chars > MAX_DEVICE_NAME_CHARS {
        return Err(Error::validation(format!(
            "device name must be 1-{MAX_DEVICE_NAME_CHARS} characters"
        )));
    }
    Ok(name.to_string())
}
