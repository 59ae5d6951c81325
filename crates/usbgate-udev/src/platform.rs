//! Linux `DevicePlatform` backed by libudev.

use crate::device::event_from_device;
use crate::enforcer::HookEnforcer;
use log::debug;
use udev::Enumerator;
use usbgate_core::config::GateConfig;
use usbgate_core::error::{GateError, GateResult};
use usbgate_core::{DeviceAction, DeviceEvent, DevicePlatform, Enforcer};

pub struct UdevPlatform {
    enforcer: HookEnforcer,
    require_usb_bus: bool,
}

impl UdevPlatform {
    pub fn from_config(config: &GateConfig) -> Self {
        Self::new(
            HookEnforcer::from_config(&config.enforcement),
            config.identity.require_usb_bus,
        )
    }

    pub fn new(enforcer: HookEnforcer, require_usb_bus: bool) -> Self {
        Self {
            enforcer,
            require_usb_bus,
        }
    }
}

impl DevicePlatform for UdevPlatform {
    fn enumerate_removable_devices(&self) -> GateResult<Vec<DeviceEvent>> {
        let platform_err = |err: std::io::Error| GateError::Platform(format!("udev scan: {err}"));

        let mut enumerator = Enumerator::new().map_err(platform_err)?;
        enumerator.match_subsystem("block").map_err(platform_err)?;
        enumerator
            .match_property("DEVTYPE", "partition")
            .map_err(platform_err)?;
        if self.require_usb_bus {
            enumerator
                .match_property("ID_BUS", "usb")
                .map_err(platform_err)?;
        }

        let events: Vec<DeviceEvent> = enumerator
            .scan_devices()
            .map_err(platform_err)?
            .map(|device| event_from_device(&device, DeviceAction::Add))
            .collect();
        debug!("udev scan found {} removable partitions", events.len());
        Ok(events)
    }

    fn enforcer(&self) -> &dyn Enforcer {
        &self.enforcer
    }
}
