//! Shell script execution for `script` responses and `after-script` hooks.

use crate::error::ScriptError;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{error, info, warn};

/// Runs script lines through a shell, one process per line.
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    shell: String,
    timeout: Option<Duration>,
}

impl Default for ScriptRunner {
    fn default() -> Self {
        Self {
            shell: "/bin/sh".to_string(),
            timeout: None,
        }
    }
}

impl ScriptRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    /// Run `lines` in order with `env` added to the process environment.
    ///
    /// Returns the concatenated standard output. The first failing line
    /// aborts the run.
    pub async fn run(
        &self,
        lines: &[String],
        env: &[(String, String)],
    ) -> Result<Vec<u8>, ScriptError> {
        let mut stdout = Vec::new();
        for line in lines {
            info!("* {}", line);
            match self.run_line(line, env).await {
                Ok(out) => stdout.extend_from_slice(&out),
                Err(e) => {
                    error!(error = %e, "script failed");
                    return Err(e);
                }
            }
        }
        Ok(stdout)
    }

    async fn run_line(&self, line: &str, env: &[(String, String)]) -> Result<Vec<u8>, ScriptError> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(line)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| ScriptError::Spawn {
            line: line.to_string(),
            source,
        })?;

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| ScriptError::Timeout {
                    line: line.to_string(),
                    timeout_ms: limit.as_millis() as u64,
                })?,
            None => child.wait_with_output().await,
        }
        .map_err(|source| ScriptError::Spawn {
            line: line.to_string(),
            source,
        })?;

        if !output.stdout.is_empty() {
            info!("stdout: {}", String::from_utf8_lossy(&output.stdout).trim_end());
        }
        if !output.stderr.is_empty() {
            warn!("stderr: {}", String::from_utf8_lossy(&output.stderr).trim_end());
        }

        if !output.status.success() {
            return Err(ScriptError::Exit {
                line: line.to_string(),
                status: output.status,
            });
        }
        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_concatenates_stdout() {
        let runner = ScriptRunner::default();
        let out = runner
            .run(&lines(&["printf 'a\\n'", "printf b"]), &[])
            .await
            .unwrap();
        assert_eq!(out, b"a\nb");
    }

    #[tokio::test]
    async fn test_env_is_visible() {
        let runner = ScriptRunner::default();
        let env = vec![("p1".to_string(), "widget".to_string())];
        let out = runner.run(&lines(&["printf \"$p1\""]), &env).await.unwrap();
        assert_eq!(out, b"widget");
    }

    #[tokio::test]
    async fn test_failure_stops_remaining_lines() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let runner = ScriptRunner::default();

        let touch = format!("touch {}", marker.display());
        let result = runner.run(&lines(&["exit 3", touch.as_str()]), &[]).await;

        assert!(matches!(result, Err(ScriptError::Exit { .. })));
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_timeout() {
        let runner = ScriptRunner::new(Some(Duration::from_millis(50)));
        let result = runner.run(&lines(&["sleep 5"]), &[]).await;
        assert!(matches!(
            result,
            Err(ScriptError::Timeout { timeout_ms: 50, .. })
        ));
    }
}
