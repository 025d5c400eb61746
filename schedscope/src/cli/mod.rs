//! Command-line interface

mod args;

pub use args::Args;

use crate::domain::SessionError;

// Exit codes
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_ERROR: i32 = 1;
pub const EXIT_USAGE: i32 = 2;
pub const EXIT_NOPERM: i32 = 77;

/// Map a fatal error to the process exit code
///
/// Session errors are matched by variant. An attach failure, like any error
/// raised outside the session, falls back to the message, where a refused
/// privilege check shows up as "permission denied" or "requires root".
#[must_use]
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<SessionError>() {
        Some(SessionError::EmptyCommand) => return EXIT_USAGE,
        Some(SessionError::Attach(_)) | None => {}
        Some(_) => return EXIT_ERROR,
    }

    let msg = format!("{err:#}").to_lowercase();
    if msg.contains("permission denied") || msg.contains("requires root") {
        EXIT_NOPERM
    } else if msg.contains("missing required argument") {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProbeError;
    use anyhow::{anyhow, Context};

    #[test]
    fn test_spawn_permission_error_is_not_noperm() {
        let err = anyhow::Error::from(SessionError::WorkloadSpawn {
            command: "./bench.sh".into(),
            reason: "Permission denied (os error 13)".into(),
        });
        assert_eq!(exit_code_for(&err), EXIT_ERROR);

        let wrapped = Err::<(), _>(err).context("Session failed").unwrap_err();
        assert_eq!(exit_code_for(&wrapped), EXIT_ERROR);
    }

    #[test]
    fn test_empty_command_is_usage() {
        assert_eq!(exit_code_for(&anyhow::Error::from(SessionError::EmptyCommand)), EXIT_USAGE);
    }

    #[test]
    fn test_privilege_check_is_noperm() {
        let err = anyhow!("Permission denied: schedscope requires root privileges to load eBPF programs.");
        assert_eq!(exit_code_for(&err), EXIT_NOPERM);

        let attach = anyhow::Error::from(SessionError::Attach(ProbeError::AttachFailed {
            probe: "sched_migrate_task".into(),
            target: "sched/sched_migrate_task".into(),
            error: "permission denied".into(),
        }));
        assert_eq!(exit_code_for(&attach), EXIT_NOPERM);
    }

    #[test]
    fn test_other_errors() {
        assert_eq!(exit_code_for(&anyhow!("eBPF object not found")), EXIT_ERROR);
        let wait = anyhow::Error::from(SessionError::Wait(std::io::Error::other("gone")));
        assert_eq!(exit_code_for(&wait), EXIT_ERROR);
    }
}
