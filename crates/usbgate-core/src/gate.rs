//! The process-wide access context shared by the event worker and front-ends.

use crate::config::GateConfig;
use crate::error::GateResult;
use crate::event::DeviceEvent;
use crate::identity::{DeviceId, IdentityPolicy};
use crate::platform::{Candidate, DeviceHandle, DevicePlatform};
use crate::registry::AuthorizationRegistry;
use crate::session::{AccessMachine, AccessSession, Decision};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

struct GateState {
    registry: AuthorizationRegistry,
    machine: AccessMachine,
}

/// Owns the registry, the session, and the platform capability.
///
/// Build one at startup and share it behind an `Arc`. All reads and writes
/// of the registry and session go through a single lock; enforcement
/// callbacks run after the lock is released. Registry reads first pick up
/// any rewrite of the store by another process, so a running daemon follows
/// `usbgate register`/`remove` without a restart.
pub struct Gate<P: DevicePlatform> {
    state: Mutex<GateState>,
    platform: P,
    identity: IdentityPolicy,
    require_usb_bus: bool,
}

impl<P: DevicePlatform> Gate<P> {
    pub fn new(
        registry: AuthorizationRegistry,
        identity: IdentityPolicy,
        require_usb_bus: bool,
        platform: P,
    ) -> Self {
        Self {
            state: Mutex::new(GateState {
                registry,
                machine: AccessMachine::new(identity, require_usb_bus),
            }),
            platform,
            identity,
            require_usb_bus,
        }
    }

    /// Load the registry named in `config` and start unauthenticated.
    pub fn from_config(config: &GateConfig, platform: P) -> Self {
        let identity = IdentityPolicy::from(&config.identity);
        if identity.allow_path_fallback {
            warn!(
                "identity.allow_path_fallback is enabled; devices without a serial are identified by port path"
            );
        }
        let registry = AuthorizationRegistry::load(config.registry_path());
        Self::new(
            registry,
            identity,
            config.identity.require_usb_bus,
            platform,
        )
    }

    /// Feed one event through the state machine and notify the enforcer.
    pub fn handle_event(&self, event: &DeviceEvent) -> Decision {
        let decision = {
            let mut state = self.synced();
            let GateState { registry, machine } = &mut *state;
            machine.handle(event, registry)
        };
        self.notify(&decision, event);
        decision
    }

    fn notify(&self, decision: &Decision, event: &DeviceEvent) {
        let enforcer = self.platform.enforcer();
        let (kind, result) = match decision {
            Decision::Granted(id) => ("grant", enforcer.on_grant(id)),
            Decision::Denied(id) => ("deny", enforcer.on_deny(id.as_ref())),
            Decision::Revoked(id) => ("revoke", enforcer.on_revoke(id)),
            Decision::Ignored(reason) => {
                debug!("no enforcement for {} ({reason:?})", event.describe());
                return;
            }
        };
        if let Err(err) = result {
            warn!(
                "{kind} enforcement for {} failed: {err}",
                event.describe()
            );
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock().machine.session().is_authenticated()
    }

    pub fn current_device(&self) -> Option<DeviceId> {
        self.lock().machine.session().device().cloned()
    }

    pub fn session(&self) -> AccessSession {
        self.lock().machine.session().clone()
    }

    pub fn list_authorized(&self) -> Vec<DeviceId> {
        self.synced().registry.list()
    }

    /// Authorize `id`. Returns `false` if it was already registered.
    ///
    /// An attached device only gains access on its next attach event.
    pub fn register_device(&self, id: DeviceId) -> bool {
        self.synced().registry.register(id)
    }

    /// Deauthorize `id`. An active session held by it stays until the device is removed.
    pub fn remove_device(&self, id: &DeviceId) -> bool {
        self.synced().registry.remove(id)
    }

    pub fn reload_registry(&self) {
        let mut state = self.lock();
        state.registry.reload();
        info!(
            "registry reloaded ({} authorized devices)",
            state.registry.len()
        );
    }

    pub fn registry_path(&self) -> PathBuf {
        self.lock().registry.path().to_path_buf()
    }

    /// Whether the last registry write failed and the file lags behind memory.
    pub fn registry_stale(&self) -> bool {
        self.lock().registry.is_stale_on_disk()
    }

    pub fn registered_count(&self) -> usize {
        self.synced().registry.len()
    }

    /// Removable devices attached right now, one entry per identifier.
    pub fn list_connected_candidates(&self) -> GateResult<Vec<Candidate>> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for event in self.platform.enumerate_removable_devices()? {
            if !event.is_removable_partition(self.require_usb_bus) {
                continue;
            }
            let identity = match self.identity.extract(&event) {
                Ok(identity) => identity,
                Err(err) => {
                    debug!("skipping candidate {}: {err}", event.describe());
                    continue;
                }
            };
            if !seen.insert(identity.id.clone()) {
                continue;
            }
            candidates.push(Candidate {
                id: identity.id,
                handle: DeviceHandle {
                    devpath: event.devpath,
                    devnode: event.devnode,
                },
            });
        }

        Ok(candidates)
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock with the registry brought up to date with the store file.
    fn synced(&self) -> MutexGuard<'_, GateState> {
        let mut state = self.lock();
        state.registry.refresh_if_changed();
        state
    }
}
