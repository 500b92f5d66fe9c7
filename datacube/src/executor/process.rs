//! Subprocess backend: one worker process per invocation.
//!
//! The request is written to the child's stdin as a single JSON document; the
//! child answers with an [`InvocationResponse`] as the last line of stdout.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::backend::{ChunkRequest, ExecutionBackend, InvocationResponse, InvokeError};
use crate::jobs::ChunkResult;

/// Default per-invocation timeout (15 minutes).
pub const DEFAULT_PROCESS_TIMEOUT_SECS: u64 = 900;

/// Bytes of stderr kept in error messages.
const STDERR_TAIL: usize = 2048;

/// Spawns `program args... [--debug]` for every request.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    program: PathBuf,
    args: Vec<String>,
    env: Vec<(String, String)>,
    timeout: Duration,
}

impl ProcessBackend {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            timeout: Duration::from_secs(DEFAULT_PROCESS_TIMEOUT_SECS),
        }
    }

    /// The current executable's `worker` subcommand.
    pub fn current_exe() -> Result<Self, InvokeError> {
        let exe = std::env::current_exe().map_err(|e| InvokeError::Spawn(e.to_string()))?;
        Ok(Self::new(exe).with_args(["worker"]))
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, request: &ChunkRequest) -> Result<ChunkResult, InvokeError> {
        let payload =
            serde_json::to_vec(request).map_err(|e| InvokeError::Protocol(e.to_string()))?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if request.debug {
            command.arg("--debug");
        }

        let mut child = command
            .spawn()
            .map_err(|e| InvokeError::Spawn(format!("{}: {}", self.program.display(), e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(&payload).await {
                debug!(error = %e, "Worker closed stdin early");
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| InvokeError::Transport(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let response = stdout
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .map(serde_json::from_str::<InvocationResponse>);

        match response {
            Some(Ok(response)) => response.into_result(),
            Some(Err(e)) if output.status.success() => Err(InvokeError::Protocol(e.to_string())),
            _ => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let tail_start = stderr.len().saturating_sub(STDERR_TAIL);
                let tail = stderr.get(tail_start..).unwrap_or(&stderr).trim();
                Err(InvokeError::Remote(format!(
                    "worker exited with {}: {}",
                    output.status, tail
                )))
            }
        }
    }
}

impl ExecutionBackend for ProcessBackend {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn invoke(&self, request: ChunkRequest) -> Result<ChunkResult, InvokeError> {
        match tokio::time::timeout(self.timeout, self.run(&request)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(job = %request.job, timeout = ?self.timeout, "Worker process timed out");
                Err(InvokeError::Timeout(self.timeout))
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::executor::tests::request;

    fn shell(script: &str) -> ProcessBackend {
        ProcessBackend::new("sh").with_args(["-c", script])
    }

    #[tokio::test]
    async fn test_process_backend_parses_ok_response() {
        let backend = shell(
            r#"cat > /dev/null; echo 'log line'; echo '{"ok":{"success":true,"num_scenes":3,"start_time":1.0,"search_duration":0.1,"load_duration":0.2,"write_duration":0.3,"region":"r","cloud_provider":null}}'"#,
        );
        let result = backend.invoke(request(0, 1)).await.unwrap();
        assert!(result.success);
        assert_eq!(result.num_scenes, 3);
        assert_eq!(result.region.as_deref(), Some("r"));
    }

    #[tokio::test]
    async fn test_process_backend_passes_request_on_stdin() {
        let backend = shell(
            r#"if grep -q '"tile"' ; then echo '{"error":"saw request"}'; else echo '{"error":"empty"}'; fi"#,
        );
        assert_eq!(
            backend.invoke(request(0, 1)).await,
            Err(InvokeError::Remote("saw request".to_string()))
        );
    }

    #[tokio::test]
    async fn test_process_backend_reports_exit_status() {
        let backend = shell("cat > /dev/null; echo 'no luck' >&2; exit 3");
        match backend.invoke(request(0, 0)).await {
            Err(InvokeError::Remote(message)) => assert!(message.contains("no luck")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_process_backend_times_out() {
        let backend = shell("sleep 5").with_timeout(Duration::from_millis(100));
        assert_eq!(
            backend.invoke(request(0, 0)).await,
            Err(InvokeError::Timeout(Duration::from_millis(100)))
        );
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let backend = ProcessBackend::new("/nonexistent/datacube-worker");
        assert!(matches!(
            backend.invoke(request(0, 0)).await,
            Err(InvokeError::Spawn(_))
        ));
    }
}
