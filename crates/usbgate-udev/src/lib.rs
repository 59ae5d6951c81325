//! Linux integration for usbgate: udev enumeration and hotplug events, plus an
//! enforcer that runs operator hook commands. Device translation lives in
//! `device`, the event stream in `monitor`, and process handling in `command`.

mod command;
mod device;
mod enforcer;
mod monitor;
mod platform;

pub use command::{HookCommand, HookOutput};
pub use device::event_from_device;
pub use enforcer::{HookEnforcer, DECISION_ENV, DEVICE_ENV};
pub use monitor::forward_udev_events;
pub use platform::UdevPlatform;
