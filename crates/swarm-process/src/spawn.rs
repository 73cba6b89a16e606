//! Spawning discipline for sub-agent processes.

use anyhow::{Context, Result};
use tokio::process::Command;

/// Spawn a sub-agent process for streamed capture.
///
/// - stdin closed (sub-agents receive their prompt via argv)
/// - stdout/stderr piped
/// - child isolated in its own process group so terminal signals aimed at
///   the orchestrator's foreground group do not hit it directly
/// - `kill_on_drop` as a safety net if the awaiting task is dropped
pub async fn spawn_agent(mut cmd: Command) -> Result<tokio::process::Child> {
    cmd.stdin(std::process::Stdio::null());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.kill_on_drop(true);

    // SAFETY: setsid() is async-signal-safe and runs between fork and exec.
    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }

    cmd.spawn().context("Failed to spawn agent process")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_spawn_agent_pipes_stdout() {
        let mut cmd = Command::new("echo");
        cmd.arg("hello");
        let mut child = spawn_agent(cmd).await.unwrap();

        let mut stdout = String::new();
        child
            .stdout
            .take()
            .unwrap()
            .read_to_string(&mut stdout)
            .await
            .unwrap();
        let status = child.wait().await.unwrap();

        assert!(status.success());
        assert_eq!(stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_spawn_agent_closes_stdin() {
        // `cat` with a closed stdin exits immediately instead of blocking.
        let mut child = spawn_agent(Command::new("cat")).await.unwrap();
        let status = child.wait().await.unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_spawn_agent_missing_binary_errors() {
        let result = spawn_agent(Command::new("definitely-not-a-real-binary-xyz")).await;
        assert!(result.is_err());
    }
}
