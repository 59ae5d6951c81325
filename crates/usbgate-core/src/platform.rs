use crate::error::GateResult;
use crate::event::DeviceEvent;
use crate::identity::DeviceId;
use std::path::PathBuf;

/// Receives access decisions and turns them into whatever "access" means on the host.
///
/// Calls are best-effort: errors are logged by the caller and never change the
/// session. Implementations must return in bounded time because they run on
/// the event worker.
pub trait Enforcer: Send + Sync {
    fn on_grant(&self, device: &DeviceId) -> GateResult<()>;

    /// `device` is `None` when the attached device could not be identified.
    fn on_deny(&self, device: Option<&DeviceId>) -> GateResult<()>;

    fn on_revoke(&self, device: &DeviceId) -> GateResult<()>;
}

/// Per-OS capability: enumerate removable devices and enforce decisions.
///
/// One implementation exists per target platform and is chosen once at startup.
pub trait DevicePlatform: Send + Sync {
    /// Snapshot of removable block partitions attached right now, shaped as `add` events.
    fn enumerate_removable_devices(&self) -> GateResult<Vec<DeviceEvent>>;

    fn enforcer(&self) -> &dyn Enforcer;
}

/// Enough to find a connected device again: its kernel path and device node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    pub devpath: Option<String>,
    pub devnode: Option<PathBuf>,
}

/// A connected device that could be registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub id: DeviceId,
    pub handle: DeviceHandle,
}
