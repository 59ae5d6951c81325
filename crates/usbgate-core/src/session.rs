//! Access session and the state machine that drives it from device events.

use crate::event::{DeviceAction, DeviceEvent};
use crate::identity::{DeviceId, Identity, IdentityPolicy};
use crate::registry::AuthorizationRegistry;
use log::{debug, info, warn};

/// Current authentication state. Never persisted; every process starts locked.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AccessSession {
    #[default]
    Unauthenticated,
    Authenticated {
        device: DeviceId,
        /// Kernel path of the attach that authenticated, used to match the detach.
        devpath: Option<String>,
    },
}

impl AccessSession {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AccessSession::Authenticated { .. })
    }

    pub fn device(&self) -> Option<&DeviceId> {
        match self {
            AccessSession::Authenticated { device, .. } => Some(device),
            AccessSession::Unauthenticated => None,
        }
    }
}

/// Outcome of feeding one event to the machine.
///
/// Every variant except `Ignored` maps to exactly one enforcement notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Granted(DeviceId),
    /// `None` when the device could not be identified at all.
    Denied(Option<DeviceId>),
    Revoked(DeviceId),
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Not a removable block partition, or an action other than add/remove.
    NotApplicable,
    /// The owning device re-announced itself.
    AlreadyAuthenticated,
    /// A different device arrived while another one holds the session.
    SessionHeldByOther,
    /// Detach while locked, or of a device that does not own the session.
    NotSessionOwner,
}

#[derive(Debug)]
pub struct AccessMachine {
    session: AccessSession,
    identity: IdentityPolicy,
    require_usb_bus: bool,
}

impl AccessMachine {
    pub fn new(identity: IdentityPolicy, require_usb_bus: bool) -> Self {
        Self {
            session: AccessSession::Unauthenticated,
            identity,
            require_usb_bus,
        }
    }

    pub fn session(&self) -> &AccessSession {
        &self.session
    }

    /// Apply one event. Never fails: anything unidentifiable degrades to deny or no-op.
    pub fn handle(&mut self, event: &DeviceEvent, registry: &AuthorizationRegistry) -> Decision {
        if !event.is_removable_partition(self.require_usb_bus) {
            debug!("ignoring non-removable device {}", event.describe());
            return Decision::Ignored(IgnoreReason::NotApplicable);
        }

        match event.action {
            DeviceAction::Add => self.on_attach(event, registry),
            DeviceAction::Remove => self.on_detach(event),
            DeviceAction::Other(_) => Decision::Ignored(IgnoreReason::NotApplicable),
        }
    }

    fn on_attach(&mut self, event: &DeviceEvent, registry: &AuthorizationRegistry) -> Decision {
        let identity = self.identity.identify(event);

        if let AccessSession::Authenticated { device, .. } = &self.session {
            let same_owner = identity.as_ref().map(|found| &found.id) == Some(device);
            if same_owner {
                debug!("device {device} re-announced while already authenticated");
                return Decision::Ignored(IgnoreReason::AlreadyAuthenticated);
            }
            info!(
                "device {} attached while session is held by {device}; leaving session untouched",
                event.describe()
            );
            return Decision::Ignored(IgnoreReason::SessionHeldByOther);
        }

        let Some(Identity { id, .. }) = identity else {
            warn!("access denied: unidentifiable device {}", event.describe());
            return Decision::Denied(None);
        };

        if !registry.is_authorized(&id) {
            warn!(
                "access denied: unauthorized device {id} at {}",
                event.describe()
            );
            return Decision::Denied(Some(id));
        }

        info!("device {id} authenticated at {}", event.describe());
        self.session = AccessSession::Authenticated {
            device: id.clone(),
            devpath: event.devpath.clone(),
        };
        Decision::Granted(id)
    }

    fn on_detach(&mut self, event: &DeviceEvent) -> Decision {
        let AccessSession::Authenticated { device, devpath } = &self.session else {
            return Decision::Ignored(IgnoreReason::NotSessionOwner);
        };

        let same_path = devpath.is_some() && devpath == &event.devpath;
        let same_id = self
            .identity
            .extract(event)
            .map(|found| &found.id == device)
            .unwrap_or(false);

        if !same_path && !same_id {
            debug!(
                "detach of {} does not match session owner {device}",
                event.describe()
            );
            return Decision::Ignored(IgnoreReason::NotSessionOwner);
        }

        let device = device.clone();
        info!(
            "access revoked: device {device} removed from {}",
            event.describe()
        );
        self.session = AccessSession::Unauthenticated;
        Decision::Revoked(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    const PATH_A: &str = "/devices/pci0000:00/usb1/1-1/1-1:1.0/host6/block/sdb/sdb1";
    const PATH_B: &str = "/devices/pci0000:00/usb2/2-4/2-4:1.0/host7/block/sdc/sdc1";

    fn registry_with(ids: &[&str]) -> (TempDir, AuthorizationRegistry) {
        let dir = tempdir().unwrap();
        let mut registry = AuthorizationRegistry::load(dir.path().join("devices.txt"));
        for value in ids {
            registry.register(DeviceId::new(*value).unwrap());
        }
        (dir, registry)
    }

    fn attach(path: &str, serial: &str) -> DeviceEvent {
        DeviceEvent::partition(DeviceAction::Add, path).with_serial(serial)
    }

    fn detach(path: &str) -> DeviceEvent {
        DeviceEvent::partition(DeviceAction::Remove, path)
    }

    fn id(value: &str) -> DeviceId {
        DeviceId::new(value).unwrap()
    }

    #[test]
    fn starts_unauthenticated() {
        let machine = AccessMachine::new(IdentityPolicy::default(), true);
        assert_eq!(machine.session(), &AccessSession::Unauthenticated);
    }

    #[test]
    fn authorized_attach_grants() {
        let (_dir, registry) = registry_with(&["SN123"]);
        let mut machine = AccessMachine::new(IdentityPolicy::default(), true);

        let decision = machine.handle(&attach(PATH_A, "SN123"), &registry);
        assert_eq!(decision, Decision::Granted(id("SN123")));
        assert!(machine.session().is_authenticated());
        assert_eq!(machine.session().device(), Some(&id("SN123")));
    }

    #[test]
    fn unauthorized_attach_denies() {
        let (_dir, registry) = registry_with(&["SN123"]);
        let mut machine = AccessMachine::new(IdentityPolicy::default(), true);

        let decision = machine.handle(&attach(PATH_A, "OTHER"), &registry);
        assert_eq!(decision, Decision::Denied(Some(id("OTHER"))));
        assert!(!machine.session().is_authenticated());
    }

    #[test]
    fn unidentifiable_attach_denies_without_touching_session() {
        let (_dir, registry) = registry_with(&["SN123"]);
        let mut machine = AccessMachine::new(IdentityPolicy::with_path_fallback(), true);
        let mut event = attach(PATH_A, "ignored");
        event.attributes.clear();
        event.devpath = None;

        assert_eq!(machine.handle(&event, &registry), Decision::Denied(None));
        assert_eq!(machine.session(), &AccessSession::Unauthenticated);
    }

    #[test]
    fn owner_detach_revokes() {
        let (_dir, registry) = registry_with(&["SN123"]);
        let mut machine = AccessMachine::new(IdentityPolicy::default(), true);
        machine.handle(&attach(PATH_A, "SN123"), &registry);

        let decision = machine.handle(&detach(PATH_A).with_serial("SN123"), &registry);
        assert_eq!(decision, Decision::Revoked(id("SN123")));
        assert_eq!(machine.session(), &AccessSession::Unauthenticated);
    }

    #[test]
    fn detach_matches_on_path_when_serial_is_gone() {
        let (_dir, registry) = registry_with(&["SN123"]);
        let mut machine = AccessMachine::new(IdentityPolicy::default(), true);
        machine.handle(&attach(PATH_A, "SN123"), &registry);

        let decision = machine.handle(&detach(PATH_A), &registry);
        assert_eq!(decision, Decision::Revoked(id("SN123")));
    }

    #[test]
    fn unrelated_detach_is_a_noop() {
        let (_dir, registry) = registry_with(&["SN123"]);
        let mut machine = AccessMachine::new(IdentityPolicy::default(), true);
        machine.handle(&attach(PATH_A, "SN123"), &registry);

        let decision = machine.handle(&detach(PATH_B).with_serial("OTHER"), &registry);
        assert_eq!(decision, Decision::Ignored(IgnoreReason::NotSessionOwner));
        assert!(machine.session().is_authenticated());
    }

    #[test]
    fn detach_while_locked_is_a_noop() {
        let (_dir, registry) = registry_with(&["SN123"]);
        let mut machine = AccessMachine::new(IdentityPolicy::default(), true);
        let decision = machine.handle(&detach(PATH_A).with_serial("SN123"), &registry);
        assert_eq!(decision, Decision::Ignored(IgnoreReason::NotSessionOwner));
    }

    #[test]
    fn second_device_does_not_steal_session() {
        let (_dir, registry) = registry_with(&["SN1", "SN2"]);
        let mut machine = AccessMachine::new(IdentityPolicy::default(), true);
        machine.handle(&attach(PATH_A, "SN1"), &registry);

        let decision = machine.handle(&attach(PATH_B, "SN2"), &registry);
        assert_eq!(decision, Decision::Ignored(IgnoreReason::SessionHeldByOther));
        assert_eq!(machine.session().device(), Some(&id("SN1")));

        let decision = machine.handle(&attach(PATH_B, "INTRUDER"), &registry);
        assert_eq!(decision, Decision::Ignored(IgnoreReason::SessionHeldByOther));
        assert!(machine.session().is_authenticated());
    }

    #[test]
    fn repeated_owner_attach_is_ignored() {
        let (_dir, registry) = registry_with(&["SN1"]);
        let mut machine = AccessMachine::new(IdentityPolicy::default(), true);
        machine.handle(&attach(PATH_A, "SN1"), &registry);
        assert_eq!(
            machine.handle(&attach(PATH_A, "SN1"), &registry),
            Decision::Ignored(IgnoreReason::AlreadyAuthenticated)
        );
    }

    #[test]
    fn path_fallback_authenticates_only_when_enabled() {
        let (_dir, registry) = registry_with(&[PATH_A]);
        let event = DeviceEvent::partition(DeviceAction::Add, PATH_A);

        let mut strict = AccessMachine::new(IdentityPolicy::default(), true);
        assert_eq!(strict.handle(&event, &registry), Decision::Denied(None));

        let mut degraded = AccessMachine::new(IdentityPolicy::with_path_fallback(), true);
        assert_eq!(
            degraded.handle(&event, &registry),
            Decision::Granted(id(PATH_A))
        );
    }

    #[test]
    fn non_partition_and_change_events_are_ignored() {
        let (_dir, registry) = registry_with(&["SN1"]);
        let mut machine = AccessMachine::new(IdentityPolicy::default(), true);

        let mut disk = attach(PATH_A, "SN1");
        disk.devtype = Some("disk".into());
        assert_eq!(
            machine.handle(&disk, &registry),
            Decision::Ignored(IgnoreReason::NotApplicable)
        );

        let mut change = attach(PATH_A, "SN1");
        change.action = DeviceAction::Other("change".into());
        assert_eq!(
            machine.handle(&change, &registry),
            Decision::Ignored(IgnoreReason::NotApplicable)
        );
        assert!(!machine.session().is_authenticated());
    }
}
