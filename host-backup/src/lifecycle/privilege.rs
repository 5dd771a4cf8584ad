//! Elevated access for whole-system operations.
//!
//! Archiving `/` or restoring onto it needs root. The orchestrator either already
//! runs as root or reaches root through sudo; unattended runs accept only
//! pre-authorized `sudo -n`, so they fail fast instead of hanging on a password
//! prompt.

use crate::utils::{BackupError, Result};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Elevation {
    /// Operation does not touch privileged paths
    NotRequired,
    /// Effective uid is 0
    Root,
    /// Tools are wrapped in sudo; `interactive` allows a password prompt
    Sudo { interactive: bool },
}

impl Elevation {
    /// Decide how elevated access is obtained
    pub async fn resolve(required: bool, unattended: bool) -> Result<Self> {
        if !required {
            return Ok(Elevation::NotRequired);
        }
        if nix::unistd::geteuid().is_root() {
            return Ok(Elevation::Root);
        }
        if which::which("sudo").is_err() {
            return Err(BackupError::PrivilegeUnavailable(
                "not running as root and sudo is not installed".to_string(),
            ));
        }

        let preauthorized = Command::new("sudo")
            .args(["-n", "true"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false);

        if preauthorized {
            debug!("Using pre-authorized sudo");
            return Ok(Elevation::Sudo { interactive: false });
        }
        if unattended {
            return Err(BackupError::PrivilegeUnavailable(
                "unattended run needs root or passwordless sudo (sudo -n failed)".to_string(),
            ));
        }

        info!("sudo will prompt for a password");
        Ok(Elevation::Sudo { interactive: true })
    }

    /// Command for `program`, wrapped in sudo when needed
    pub fn command(&self, program: &str) -> Command {
        match self {
            Elevation::NotRequired | Elevation::Root => Command::new(program),
            Elevation::Sudo { interactive } => {
                let mut cmd = Command::new("sudo");
                if !interactive {
                    cmd.arg("-n");
                }
                cmd.arg("--").arg(program);
                cmd
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_not_required_short_circuits() {
        assert_eq!(
            Elevation::resolve(false, true).await.unwrap(),
            Elevation::NotRequired
        );
    }

    #[test]
    fn test_sudo_wrapping() {
        let cmd = Elevation::Sudo { interactive: false }.command("tar");
        let std_cmd = cmd.as_std();
        assert_eq!(std_cmd.get_program(), "sudo");
        let args: Vec<_> = std_cmd.get_args().collect();
        assert_eq!(args, vec!["-n", "--", "tar"]);

        let plain = Elevation::Root.command("tar");
        assert_eq!(plain.as_std().get_program(), "tar");
    }
}
