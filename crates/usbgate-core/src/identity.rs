//! Reduce a device event to the identifier the registry is keyed on.

use crate::config::IdentityCfg;
use crate::error::{GateError, GateResult};
use crate::event::{DeviceEvent, SERIAL_ATTRIBUTE};
use log::{debug, warn};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Opaque identifier naming a physical device across attach cycles.
///
/// Always non-empty, without surrounding whitespace or line breaks, so it
/// round-trips through the one-per-line registry file unchanged.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(value: impl Into<String>) -> GateResult<Self> {
        let value = value.into();
        let reason = if value.is_empty() {
            Some("identifier is empty")
        } else if value.contains(|c: char| c == '\n' || c == '\r') {
            Some("identifier contains a line break")
        } else if value.trim() != value {
            Some("identifier has leading or trailing whitespace")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(GateError::InvalidIdentifier {
                value,
                reason: reason.to_string(),
            }),
            None => Ok(Self(value)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl FromStr for DeviceId {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceId::new(s)
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Where an identifier came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSource {
    Serial,
    /// Degraded: only stable while the device stays on the same port.
    DevicePath,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: DeviceId,
    pub source: IdSource,
}

/// Why no identifier could be derived. Always recoverable; the caller denies.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("serial attribute is not a valid single-line UTF-8 string")]
    MalformedSerial,

    #[error("serial attribute is blank")]
    BlankSerial,

    #[error("device exposes no serial and path fallback is disabled")]
    SerialRequired,

    #[error("device exposes neither a serial nor a device path")]
    Missing,
}

/// Identifier derivation rules, built once from configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityPolicy {
    pub allow_path_fallback: bool,
}

impl From<&IdentityCfg> for IdentityPolicy {
    fn from(cfg: &IdentityCfg) -> Self {
        Self {
            allow_path_fallback: cfg.allow_path_fallback,
        }
    }
}

impl IdentityPolicy {
    pub fn with_path_fallback() -> Self {
        Self {
            allow_path_fallback: true,
        }
    }

    /// Derive an identifier: the hardware serial first, then the device path
    /// when fallback is allowed.
    pub fn extract(&self, event: &DeviceEvent) -> Result<Identity, IdentityError> {
        if let Some(raw) = event
            .attributes
            .get(SERIAL_ATTRIBUTE)
            .filter(|raw| !raw.is_empty())
        {
            let text = std::str::from_utf8(raw).map_err(|_| IdentityError::MalformedSerial)?;
            let text = text.trim();
            if text.is_empty() {
                return Err(IdentityError::BlankSerial);
            }
            let id = DeviceId::new(text).map_err(|_| IdentityError::MalformedSerial)?;
            return Ok(Identity {
                id,
                source: IdSource::Serial,
            });
        }

        let devpath = event
            .devpath
            .as_deref()
            .map(str::trim)
            .filter(|path| !path.is_empty());

        match devpath {
            None => Err(IdentityError::Missing),
            Some(_) if !self.allow_path_fallback => Err(IdentityError::SerialRequired),
            Some(path) => {
                let id = DeviceId::new(path).map_err(|_| IdentityError::Missing)?;
                Ok(Identity {
                    id,
                    source: IdSource::DevicePath,
                })
            }
        }
    }

    /// [`IdentityPolicy::extract`] with the outcome logged; `None` means "cannot authenticate".
    pub fn identify(&self, event: &DeviceEvent) -> Option<Identity> {
        match self.extract(event) {
            Ok(identity) => {
                if identity.source == IdSource::DevicePath {
                    warn!(
                        "device {} has no serial; using path identifier (degraded mode)",
                        event.describe()
                    );
                } else {
                    debug!("device {} identified as {}", event.describe(), identity.id);
                }
                Some(identity)
            }
            Err(err) => {
                warn!(
                    "cannot derive identifier for {} ({}): {err}",
                    event.describe(),
                    event.action
                );
                None
            }
        }
    }
}
