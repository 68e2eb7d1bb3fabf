//! Side-effecting collaborators: the software-management tool, systemd units,
//! power verbs and process signals.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::process::Command;
use std::thread;
use sysinfo::{Pid, ProcessesToUpdate, Signal, System};
use tracing::{info, warn};

use crate::proto::{PowerAction, ProcessSignal, ServiceAction, SoftwareAction};

pub trait CommandExecutor: Send + Sync + 'static {
    /// Runs `<tool> <action> <args...>` to completion and returns its output.
    fn run_software_command(
        &self,
        tool: &Path,
        action: SoftwareAction,
        args: &[String],
    ) -> Result<String>;

    /// Runs `systemctl <action> <unit>` to completion and returns its output.
    fn run_service_command(&self, action: ServiceAction, unit: &str) -> Result<String>;

    /// Starts the power verb and returns without waiting for it.
    fn run_power_command(&self, verb: PowerAction) -> Result<()>;

    fn signal_process(&self, pid: u32, signal: ProcessSignal) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExecutor;

// Output is stdout followed by stderr; a failed exit is only logged since
// the tools explain themselves in their output.
fn run_captured(cmd: &mut Command) -> Result<String> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    let out = cmd
        .output()
        .with_context(|| format!("couldn't run {program}"))?;
    let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
    if !out.stderr.is_empty() {
        text.push_str(&String::from_utf8_lossy(&out.stderr));
    }
    if !out.status.success() {
        warn!("{program} exited with {}", out.status);
    }
    Ok(text)
}

impl CommandExecutor for SystemExecutor {
    fn run_software_command(
        &self,
        tool: &Path,
        action: SoftwareAction,
        args: &[String],
    ) -> Result<String> {
        info!("{} software with ID(s) {:?}", action.as_str(), args);
        run_captured(Command::new(tool).arg(action.as_str()).args(args))
    }

    fn run_service_command(&self, action: ServiceAction, unit: &str) -> Result<String> {
        info!("{} service {unit}", action.as_str());
        run_captured(Command::new("systemctl").arg(action.as_str()).arg(unit))
    }

    fn run_power_command(&self, verb: PowerAction) -> Result<()> {
        info!("running power action {}", verb.as_str());
        let mut child = Command::new(verb.as_str())
            .spawn()
            .with_context(|| format!("couldn't start {}", verb.as_str()))?;
        // reap in the background so nothing waits on the host going down
        thread::spawn(move || {
            let _ = child.wait();
        });
        Ok(())
    }

    fn signal_process(&self, pid: u32, signal: ProcessSignal) -> Result<()> {
        let pid = Pid::from_u32(pid);
        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        let process = sys
            .process(pid)
            .with_context(|| format!("no process with PID {pid}"))?;
        let sig = match signal {
            ProcessSignal::Terminate => Signal::Term,
            ProcessSignal::Kill => Signal::Kill,
            ProcessSignal::Suspend => Signal::Stop,
            ProcessSignal::Resume => Signal::Continue,
        };
        info!("sending {sig:?} to process {pid}");
        match process.kill_with(sig) {
            Some(true) => Ok(()),
            Some(false) => bail!("couldn't signal process {pid}"),
            None => bail!("{sig:?} is not supported on this platform"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;

    #[test]
    fn software_command_captures_stdout() {
        // echo stands in for the tool: it prints its own argv
        let out = SystemExecutor
            .run_software_command(
                Path::new("echo"),
                SoftwareAction::Install,
                &["7".to_string(), "23".to_string()],
            )
            .unwrap();
        assert_eq!(out.trim_end(), "install 7 23");
    }

    #[test]
    fn missing_tool_is_an_error() {
        assert!(SystemExecutor
            .run_software_command(Path::new("/nonexistent/tool"), SoftwareAction::Install, &[])
            .is_err());
    }

    #[cfg(unix)]
    #[test]
    fn stderr_follows_stdout_even_on_failure() {
        let out = run_captured(Command::new("sh").args(["-c", "echo done; echo oops >&2; exit 3"]))
            .unwrap();
        assert_eq!(out, "done\noops\n");
    }

    #[cfg(unix)]
    #[test]
    fn terminate_signal_reaches_child() {
        let mut child = Command::new("sleep")
            .arg("30")
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        SystemExecutor
            .signal_process(child.id(), ProcessSignal::Terminate)
            .unwrap();
        let status = child.wait().unwrap();
        assert!(!status.success());
    }
}
