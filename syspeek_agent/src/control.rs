//! Mutating operations: signals, scheduling priority, containers, services,
//! users and groups.
//!
//! Callers are expected to have passed the read-write access check already;
//! this module only validates arguments and performs the action.

use std::io;
use std::str::FromStr;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{ControlError, SourceError};
use crate::exec;

pub const MIN_SIGNAL: i32 = 1;
pub const MAX_SIGNAL: i32 = 64;
pub const MIN_PRIORITY: i32 = -20;
pub const MAX_PRIORITY: i32 = 19;

/// Niceness the server asks for itself at startup.
pub const SELF_PRIORITY: i32 = -5;

/// Identifiers handed to external tools: `[A-Za-z0-9_.@:-]+`, never option-like.
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'@' | b':' | b'-'))
}

fn checked_name<'a>(what: &str, name: &'a str) -> Result<&'a str, ControlError> {
    if is_safe_name(name) {
        Ok(name)
    } else {
        Err(ControlError::Invalid(format!("Invalid {what} name")))
    }
}

fn checked_pid(pid: u32) -> Result<libc::pid_t, ControlError> {
    match libc::pid_t::try_from(pid) {
        Ok(p) if p > 0 => Ok(p),
        _ => Err(ControlError::Invalid("Invalid PID".into())),
    }
}

/// Sends `signal` (SIGTERM when absent or zero) to `pid`.
pub fn kill(pid: u32, signal: Option<i32>, self_pid: u32) -> Result<i32, ControlError> {
    let target = checked_pid(pid)?;
    if pid == self_pid {
        return Err(ControlError::SelfTarget);
    }
    let signal = match signal {
        None | Some(0) => libc::SIGTERM,
        Some(s) if (MIN_SIGNAL..=MAX_SIGNAL).contains(&s) => s,
        Some(s) => return Err(ControlError::Invalid(format!("Invalid signal {s}"))),
    };
    // SAFETY: plain syscall with validated integer arguments.
    let rc = unsafe { libc::kill(target, signal) };
    if rc != 0 {
        return Err(SourceError::from_errno(pid, io::Error::last_os_error()).into());
    }
    info!(pid, signal, "signal sent");
    Ok(signal)
}

fn setpriority(pid: u32, priority: i32) -> io::Result<()> {
    // SAFETY: plain syscall; `who` is a pid or 0 for the calling process.
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, pid as libc::id_t, priority) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Changes the nice value of `pid`.
pub fn renice(pid: u32, priority: i32) -> Result<(), ControlError> {
    checked_pid(pid)?;
    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        return Err(ControlError::Invalid(format!(
            "Priority must be between {MIN_PRIORITY} and {MAX_PRIORITY}"
        )));
    }
    setpriority(pid, priority).map_err(|e| SourceError::from_errno(pid, e))?;
    info!(pid, priority, "priority changed");
    Ok(())
}

/// Best effort; lowering niceness needs CAP_SYS_NICE.
pub fn raise_own_priority() {
    if let Err(e) = setpriority(0, SELF_PRIORITY) {
        warn!("could not set own priority to {SELF_PRIORITY}: {e}");
    }
}

/// Lifecycle verbs shared by containers and services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    Restart,
    Kill,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Restart => "restart",
            Action::Kill => "kill",
        }
    }

    fn past_tense(self) -> &'static str {
        match self {
            Action::Start => "started",
            Action::Stop => "stopped",
            Action::Restart => "restarted",
            Action::Kill => "killed",
        }
    }
}

impl FromStr for Action {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Action::Start),
            "stop" => Ok(Action::Stop),
            "restart" => Ok(Action::Restart),
            "kill" => Ok(Action::Kill),
            other => Err(ControlError::Invalid(format!("Unknown action {other}"))),
        }
    }
}

pub async fn container_action(id: &str, action: Action) -> Result<String, ControlError> {
    let id = checked_name("container", id)?;
    exec::run("docker", &[action.as_str(), id], exec::DEFAULT_TIMEOUT * 6).await?;
    info!(container = id, action = action.as_str(), "container action");
    Ok(format!("Container {}", action.past_tense()))
}

pub async fn service_action(name: &str, action: Action) -> Result<String, ControlError> {
    let name = checked_name("service", name)?;
    exec::run("systemctl", &[action.as_str(), name], exec::DEFAULT_TIMEOUT * 6).await?;
    info!(service = name, action = action.as_str(), "service action");
    Ok(format!("Service {}", action.past_tense()))
}

pub async fn remove_from_group(group: &str, user: &str) -> Result<(), ControlError> {
    let group = checked_name("group", group)?;
    let user = checked_name("user", user)?;
    exec::run("gpasswd", &["-d", user, group], exec::DEFAULT_TIMEOUT).await?;
    info!(group, user, "user removed from group");
    Ok(())
}

/// Fields of a user-modify request; empty or missing fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UserChanges {
    pub shell: String,
    pub home: String,
}

fn checked_path<'a>(what: &str, path: &'a str) -> Result<&'a str, ControlError> {
    if path.starts_with('/') && !path.chars().any(|c| c.is_control()) {
        Ok(path)
    } else {
        Err(ControlError::Invalid(format!("{what} must be an absolute path")))
    }
}

pub async fn modify_user(user: &str, changes: &UserChanges) -> Result<(), ControlError> {
    let user = checked_name("user", user)?;
    if changes.shell.is_empty() && changes.home.is_empty() {
        return Err(ControlError::Invalid("Nothing to modify".into()));
    }
    if !changes.shell.is_empty() {
        let shell = checked_path("Shell", &changes.shell)?;
        exec::run("chsh", &["-s", shell, user], exec::DEFAULT_TIMEOUT).await?;
    }
    if !changes.home.is_empty() {
        let home = checked_path("Home directory", &changes.home)?;
        exec::run("usermod", &["-d", home, user], exec::DEFAULT_TIMEOUT).await?;
    }
    info!(user, "user modified");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::Command;

    #[test]
    fn safe_names() {
        assert!(is_safe_name("nginx.service"));
        assert!(is_safe_name("user@1000.service"));
        assert!(is_safe_name("a1b2c3d4e5f6"));
        assert!(!is_safe_name(""));
        assert!(!is_safe_name("-rf"));
        assert!(!is_safe_name("foo bar"));
        assert!(!is_safe_name("a;b"));
        assert!(!is_safe_name("../etc"));
    }

    #[test]
    fn kill_guards() {
        assert!(matches!(kill(0, None, 1), Err(ControlError::Invalid(_))));
        assert!(matches!(kill(77, None, 77), Err(ControlError::SelfTarget)));
        assert!(matches!(kill(77, Some(65), 1), Err(ControlError::Invalid(_))));
        assert!(matches!(kill(77, Some(-1), 1), Err(ControlError::Invalid(_))));
    }

    #[test]
    fn kill_delivers_default_sigterm() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let sent = kill(child.id(), None, std::process::id()).unwrap();
        assert_eq!(sent, libc::SIGTERM);
        let status = child.wait().unwrap();
        assert_eq!(status.signal(), Some(libc::SIGTERM));
    }

    #[test]
    fn kill_missing_pid_is_not_found() {
        // above PID_MAX_LIMIT
        let e = kill(i32::MAX as u32, Some(libc::SIGTERM), 1).unwrap_err();
        assert!(matches!(e, ControlError::Source(SourceError::NotFound(_))));
    }

    #[test]
    fn renice_range() {
        assert!(matches!(renice(1, 20), Err(ControlError::Invalid(_))));
        assert!(matches!(renice(1, -21), Err(ControlError::Invalid(_))));
        assert!(matches!(renice(0, 0), Err(ControlError::Invalid(_))));
    }

    #[test]
    fn renice_child_to_lower_priority() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        renice(child.id(), 10).unwrap();
        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn actions_parse() {
        assert_eq!("restart".parse::<Action>().unwrap(), Action::Restart);
        assert!("reload".parse::<Action>().is_err());
    }

    #[tokio::test]
    async fn unsafe_identifiers_are_rejected_before_spawning() {
        let e = container_action("--privileged", Action::Start).await.unwrap_err();
        assert!(matches!(e, ControlError::Invalid(_)));
        let e = service_action("a b", Action::Stop).await.unwrap_err();
        assert!(matches!(e, ControlError::Invalid(_)));
        let e = remove_from_group("wheel", "-x").await.unwrap_err();
        assert!(matches!(e, ControlError::Invalid(_)));
    }

    #[tokio::test]
    async fn modify_user_validates_fields() {
        let e = modify_user("bob", &UserChanges::default()).await.unwrap_err();
        assert!(matches!(e, ControlError::Invalid(_)));
        let changes = UserChanges {
            shell: "bin/sh".into(),
            home: String::new(),
        };
        let e = modify_user("bob", &changes).await.unwrap_err();
        assert!(matches!(e, ControlError::Invalid(_)));
    }
}
