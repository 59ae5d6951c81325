//! `Enforcer` that hands decisions to operator-configured commands.

use crate::command::HookCommand;
use log::{info, warn};
use usbgate_core::config::EnforcementCfg;
use usbgate_core::error::{GateError, GateResult};
use usbgate_core::{DeviceId, Enforcer};

pub const DECISION_ENV: &str = "USBGATE_DECISION";
pub const DEVICE_ENV: &str = "USBGATE_DEVICE_ID";

/// Runs the grant/deny/revoke hook for each decision. Decisions without a
/// configured hook are only logged.
#[derive(Debug, Clone, Default)]
pub struct HookEnforcer {
    grant: Option<HookCommand>,
    deny: Option<HookCommand>,
    revoke: Option<HookCommand>,
}

impl HookEnforcer {
    pub fn from_config(cfg: &EnforcementCfg) -> Self {
        let timeout = cfg.timeout();
        let hook = |argv: &Option<Vec<String>>| {
            argv.clone()
                .and_then(|argv| HookCommand::new(argv, timeout))
        };
        Self {
            grant: hook(&cfg.grant_command),
            deny: hook(&cfg.deny_command),
            revoke: hook(&cfg.revoke_command),
        }
    }

    fn dispatch(
        &self,
        hook: Option<&HookCommand>,
        decision: &str,
        device: Option<&DeviceId>,
    ) -> GateResult<()> {
        let device = device.map(DeviceId::as_str).unwrap_or("");
        let Some(hook) = hook else {
            return Ok(());
        };

        let output = hook.run(&[(DECISION_ENV, decision), (DEVICE_ENV, device)])?;
        if !output.succeeded() {
            let ended = match output.code {
                Some(code) => format!("exited with {code}"),
                None => "was killed by a signal".to_string(),
            };
            return Err(GateError::Enforcement(format!(
                "{decision} hook {} {ended}: {}",
                hook.program(),
                output.stderr.trim()
            )));
        }
        if !output.stderr.trim().is_empty() {
            warn!(
                "{decision} hook {} wrote to stderr: {}",
                hook.program(),
                output.stderr.trim()
            );
        }
        Ok(())
    }
}

impl Enforcer for HookEnforcer {
    fn on_grant(&self, device: &DeviceId) -> GateResult<()> {
        info!("access granted to {device}");
        self.dispatch(self.grant.as_ref(), "grant", Some(device))
    }

    fn on_deny(&self, device: Option<&DeviceId>) -> GateResult<()> {
        match device {
            Some(device) => info!("access denied for {device}"),
            None => info!("access denied for unidentified device"),
        }
        self.dispatch(self.deny.as_ref(), "deny", device)
    }

    fn on_revoke(&self, device: &DeviceId) -> GateResult<()> {
        info!("access revoked: {device} removed");
        self.dispatch(self.revoke.as_ref(), "revoke", Some(device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn sh(script: String) -> Option<Vec<String>> {
        Some(vec!["/bin/sh".into(), "-c".into(), script])
    }

    #[test]
    fn unconfigured_decisions_succeed() {
        let enforcer = HookEnforcer::default();
        let id = DeviceId::new("SN1").unwrap();
        assert!(enforcer.on_grant(&id).is_ok());
        assert!(enforcer.on_deny(None).is_ok());
        assert!(enforcer.on_revoke(&id).is_ok());
    }

    #[test]
    fn hooks_receive_decision_and_device() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("hook.log");
        let script = format!(
            "echo \"${DECISION_ENV}:${DEVICE_ENV}\" >> '{}'",
            log.display()
        );
        let cfg = EnforcementCfg {
            grant_command: sh(script.clone()),
            deny_command: sh(script.clone()),
            revoke_command: sh(script),
            timeout_secs: 5,
        };
        let enforcer = HookEnforcer::from_config(&cfg);
        let id = DeviceId::new("SN1").unwrap();

        enforcer.on_grant(&id).unwrap();
        enforcer.on_revoke(&id).unwrap();
        enforcer.on_deny(None).unwrap();

        assert_eq!(
            fs::read_to_string(&log).unwrap(),
            "grant:SN1\nrevoke:SN1\ndeny:\n"
        );
    }

    #[test]
    fn failing_hook_reports_exit_status() {
        let cfg = EnforcementCfg {
            deny_command: sh("echo locked-out >&2; exit 7".into()),
            ..EnforcementCfg::default()
        };
        let err = HookEnforcer::from_config(&cfg).on_deny(None).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("exited with 7"), "{message}");
        assert!(message.contains("locked-out"), "{message}");
    }
}
