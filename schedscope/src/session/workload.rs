//! Workload command and child process spawning

#![allow(unsafe_code)] // getpwnam() requires unsafe

use log::debug;
use std::ffi::CString;
use std::process::Stdio;
use tokio::process::{Child, Command};

use crate::domain::SessionError;

/// The command line measured by a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadCommand {
    line: String,
    shell: bool,
    user: Option<String>,
}

impl WorkloadCommand {
    /// Run `line` through `sh -c`
    ///
    /// # Errors
    /// Returns [`SessionError::EmptyCommand`] if `line` is blank
    pub fn shell(line: impl Into<String>) -> Result<Self, SessionError> {
        Self::new(line.into(), true)
    }

    /// Exec `line` directly, splitting arguments on whitespace
    ///
    /// # Errors
    /// Returns [`SessionError::EmptyCommand`] if `line` is blank
    pub fn direct(line: impl Into<String>) -> Result<Self, SessionError> {
        Self::new(line.into(), false)
    }

    fn new(line: String, shell: bool) -> Result<Self, SessionError> {
        if line.trim().is_empty() {
            return Err(SessionError::EmptyCommand);
        }
        Ok(Self { line, shell, user: None })
    }

    /// Run the workload as `user` (uid and primary gid)
    #[must_use]
    pub fn as_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    #[must_use]
    pub fn line(&self) -> &str {
        &self.line
    }

    /// Spawn the workload; it is killed if the handle is dropped un-reaped
    ///
    /// # Errors
    /// Returns [`SessionError::WorkloadSpawn`] if the user is unknown or the
    /// process cannot be started
    pub fn spawn(&self) -> Result<Child, SessionError> {
        let mut command = if self.shell {
            let mut command = Command::new("sh");
            command.arg("-c").arg(&self.line);
            command
        } else {
            let mut parts = self.line.split_whitespace();
            let program = parts.next().ok_or(SessionError::EmptyCommand)?;
            let mut command = Command::new(program);
            command.args(parts);
            command
        };

        if let Some(ref user) = self.user {
            let (uid, gid) = lookup_user(user).ok_or_else(|| self.spawn_error("unknown user"))?;
            debug!("Running workload as {user} (uid={uid}, gid={gid})");
            command.uid(uid).gid(gid);
        }

        command
            .stdin(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(&e.to_string()))
    }

    fn spawn_error(&self, reason: &str) -> SessionError {
        SessionError::WorkloadSpawn { command: self.line.clone(), reason: reason.to_string() }
    }
}

/// Resolve a user name to `(uid, gid)` through the passwd database
fn lookup_user(name: &str) -> Option<(u32, u32)> {
    let name = CString::new(name).ok()?;
    // SAFETY: name is NUL-terminated; the returned record is only read before
    // any other passwd call on this thread
    let pwd = unsafe { libc::getpwnam(name.as_ptr()) };
    if pwd.is_null() {
        return None;
    }
    // SAFETY: checked non-null above
    let (uid, gid) = unsafe { ((*pwd).pw_uid, (*pwd).pw_gid) };
    Some((uid, gid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_command_rejected() {
        assert!(matches!(WorkloadCommand::shell(""), Err(SessionError::EmptyCommand)));
        assert!(matches!(WorkloadCommand::direct("   "), Err(SessionError::EmptyCommand)));
    }

    #[test]
    fn test_lookup_root() {
        assert_eq!(lookup_user("root"), Some((0, 0)));
        assert_eq!(lookup_user("no-such-user-schedscope"), None);
    }

    #[tokio::test]
    async fn test_spawn_shell() {
        let mut child = WorkloadCommand::shell("exit 3").unwrap().spawn().unwrap();
        let status = child.wait().await.unwrap();
        assert_eq!(status.code(), Some(3));
    }

    #[tokio::test]
    async fn test_spawn_direct_missing_binary() {
        let err = WorkloadCommand::direct("/nonexistent/schedscope-workload --flag")
            .unwrap()
            .spawn()
            .unwrap_err();
        assert!(matches!(err, SessionError::WorkloadSpawn { .. }));
    }

    #[tokio::test]
    async fn test_spawn_unknown_user() {
        let err = WorkloadCommand::shell("true")
            .unwrap()
            .as_user("no-such-user-schedscope")
            .spawn()
            .unwrap_err();
        assert!(err.to_string().contains("unknown user"));
    }
}
