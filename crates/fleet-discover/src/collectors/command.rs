//! Child-process plumbing shared by the collectors.

use std::io::ErrorKind;
use std::process::Stdio;

use tokio::process::Command;

use super::CollectError;

/// Captured output of one tool run.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stderr, or stdout when stderr is empty, trimmed to one line.
    pub fn diagnostic(&self) -> String {
        let text = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        text.lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("no output")
            .to_string()
    }
}

/// Run `program` to completion.
///
/// Secrets travel in `env`, never in `args`. The child is killed if the
/// returned future is dropped, which is how collector timeouts reclaim it.
pub async fn run_tool(
    program: &str,
    args: &[String],
    env: &[(&str, &str)],
) -> Result<ToolOutput, CollectError> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in env {
        cmd.env(key, value);
    }

    let output = cmd.output().await.map_err(|e| match e.kind() {
        ErrorKind::NotFound => CollectError::Transport(format!("{program} is not installed")),
        _ => CollectError::Transport(format!("failed to run {program}: {e}")),
    })?;

    Ok(ToolOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
