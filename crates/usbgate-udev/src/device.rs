//! Translate udev devices into owned `DeviceEvent` records.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use udev::Device;
use usbgate_core::event::{AttributeBag, SERIAL_ATTRIBUTE};
use usbgate_core::{DeviceAction, DeviceEvent};

/// Build an event from a udev device.
///
/// The serial is looked up on the partition itself, then on its parent USB
/// device, then in the `ID_SERIAL_SHORT` property. Removal events usually
/// only have the property left because sysfs is already gone.
pub fn event_from_device(device: &Device, action: DeviceAction) -> DeviceEvent {
    let mut attributes = AttributeBag::new();
    if let Some(serial) = serial_bytes(device) {
        attributes.insert(SERIAL_ATTRIBUTE.to_string(), serial);
    }

    DeviceEvent {
        action,
        subsystem: device.subsystem().map(lossy),
        devtype: device.devtype().map(lossy),
        devpath: Some(lossy(device.devpath())),
        devnode: device.devnode().map(|node| node.to_path_buf()),
        bus: device.property_value("ID_BUS").map(lossy),
        attributes,
    }
}

/// Map the udev action string; events without one are treated as `change`.
pub fn action_of(device: &Device) -> DeviceAction {
    device
        .action()
        .and_then(OsStr::to_str)
        .map(DeviceAction::parse)
        .unwrap_or_else(|| DeviceAction::Other("change".to_string()))
}

fn serial_bytes(device: &Device) -> Option<Vec<u8>> {
    if let Some(serial) = non_empty(device.attribute_value(SERIAL_ATTRIBUTE)) {
        return Some(serial);
    }

    if let Ok(Some(parent)) = device.parent_with_subsystem_devtype("usb", "usb_device") {
        if let Some(serial) = non_empty(parent.attribute_value(SERIAL_ATTRIBUTE)) {
            return Some(serial);
        }
    }

    non_empty(device.property_value("ID_SERIAL_SHORT"))
}

fn non_empty(value: Option<&OsStr>) -> Option<Vec<u8>> {
    value
        .map(|raw| raw.as_bytes().to_vec())
        .filter(|bytes| !bytes.is_empty())
}

fn lossy(value: &OsStr) -> String {
    value.to_string_lossy().into_owned()
}
