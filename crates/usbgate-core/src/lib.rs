//! Device-presence access gate: identity extraction, the authorization
//! registry, and the state machine that turns attach/detach events into
//! grant, deny, and revoke decisions.

pub mod config;
pub mod error;
pub mod event;
pub mod gate;
pub mod identity;
pub mod logging;
pub mod platform;
pub mod registry;
pub mod session;
pub mod worker;

pub use config::GateConfig;
pub use error::{GateError, GateResult};
pub use event::{AttributeBag, DeviceAction, DeviceEvent};
pub use gate::Gate;
pub use identity::{DeviceId, IdSource, Identity, IdentityPolicy};
pub use platform::{Candidate, DeviceHandle, DevicePlatform, Enforcer};
pub use registry::AuthorizationRegistry;
pub use session::{AccessSession, Decision, IgnoreReason};
pub use worker::{spawn_worker, EventSender, Worker};
