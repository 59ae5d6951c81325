//! Owned, platform-neutral form of a hotplug notification.
//!
//! Event sources translate whatever their OS hands them into a [`DeviceEvent`]
//! before it crosses into the worker thread, so nothing here borrows from the
//! platform library.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Raw sysfs/udev attributes, kept as bytes so undecodable values survive until extraction.
pub type AttributeBag = BTreeMap<String, Vec<u8>>;

/// Attribute key carrying the hardware serial number.
pub const SERIAL_ATTRIBUTE: &str = "serial";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceAction {
    Add,
    Remove,
    Other(String),
}

impl DeviceAction {
    pub fn parse(action: &str) -> Self {
        match action {
            "add" => DeviceAction::Add,
            "remove" => DeviceAction::Remove,
            other => DeviceAction::Other(other.to_string()),
        }
    }
}

impl fmt::Display for DeviceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceAction::Add => f.write_str("add"),
            DeviceAction::Remove => f.write_str("remove"),
            DeviceAction::Other(value) => f.write_str(value),
        }
    }
}

/// One device notification as delivered by the event source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEvent {
    pub action: DeviceAction,
    pub subsystem: Option<String>,
    pub devtype: Option<String>,
    /// Kernel device path (`/devices/...`), stable for a given port.
    pub devpath: Option<String>,
    /// Device node such as `/dev/sdb1`, when one exists.
    pub devnode: Option<PathBuf>,
    /// Bus reported by udev (`ID_BUS`).
    pub bus: Option<String>,
    pub attributes: AttributeBag,
}

impl DeviceEvent {
    /// Start an event for a block partition with the given action and path.
    pub fn partition(action: DeviceAction, devpath: impl Into<String>) -> Self {
        Self {
            action,
            subsystem: Some("block".to_string()),
            devtype: Some("partition".to_string()),
            devpath: Some(devpath.into()),
            devnode: None,
            bus: None,
            attributes: AttributeBag::new(),
        }
    }

    pub fn with_serial(mut self, serial: impl Into<Vec<u8>>) -> Self {
        self.attributes
            .insert(SERIAL_ATTRIBUTE.to_string(), serial.into());
        self
    }

    pub fn with_bus(mut self, bus: impl Into<String>) -> Self {
        self.bus = Some(bus.into());
        self
    }

    pub fn with_devnode(mut self, devnode: impl Into<PathBuf>) -> Self {
        self.devnode = Some(devnode.into());
        self
    }

    /// Whether the event describes a partition on a removable block device.
    ///
    /// With `require_usb_bus` set, the partition must also report the USB bus
    /// or carry `usb` somewhere in its device path. A partition with neither a
    /// bus nor a path cannot be judged and is let through, so the caller still
    /// reaches a decision about it.
    pub fn is_removable_partition(&self, require_usb_bus: bool) -> bool {
        if self.subsystem.as_deref() != Some("block") {
            return false;
        }
        if self.devtype.as_deref() != Some("partition") {
            return false;
        }
        if !require_usb_bus || (self.bus.is_none() && self.devpath.is_none()) {
            return true;
        }

        let on_usb_bus = self
            .bus
            .as_deref()
            .map(|bus| bus.eq_ignore_ascii_case("usb"))
            .unwrap_or(false);
        let usb_in_path = self
            .devpath
            .as_deref()
            .map(|path| path.to_ascii_lowercase().contains("usb"))
            .unwrap_or(false);

        on_usb_bus || usb_in_path
    }

    /// Something printable for log lines, even when the path is missing.
    pub fn describe(&self) -> String {
        match (&self.devpath, &self.devnode) {
            (Some(path), Some(node)) => format!("{path} ({})", node.display()),
            (Some(path), None) => path.clone(),
            (None, Some(node)) => node.display().to_string(),
            (None, None) => "<unknown device>".to_string(),
        }
    }
}
