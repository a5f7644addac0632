//! Async subprocess execution with output fanned out to a log file and
//! an in-memory collector simultaneously.
//!
//! A write splitter forwards every line of stdout/stderr to both the
//! file sink and the in-memory [`gitdeploy_types::LogEntry`] vector;
//! order within a single stream is preserved, inter-stream order is
//! best-effort and timestamped per write (§9 of the design notes this
//! crate exists to satisfy).

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use gitdeploy_types::{LogEntry, Stream};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// A spawned subprocess plus the handles needed to tee its output and await completion.
pub struct SpawnedProcess {
    child: Child,
    logs: Arc<Mutex<Vec<LogEntry>>>,
    stdout_task: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
}

impl SpawnedProcess {
    /// Spawn `program` with `args` and `envs`, writing combined stdout/stderr
    /// to `log_path` (created with mode 0644) while also collecting each
    /// line in memory, tagged by stream and write time.
    pub async fn spawn(
        program: &str,
        args: &[String],
        envs: &[(String, String)],
        log_path: &Path,
    ) -> Result<Self> {
        let mut command = Command::new(program);
        command
            .args(args)
            .envs(envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn {program}"))?;

        let log_file = open_log_file(log_path).await?;
        let log_file = Arc::new(Mutex::new(log_file));
        let logs = Arc::new(Mutex::new(Vec::new()));

        let stdout = child.stdout.take().context("child stdout not piped")?;
        let stderr = child.stderr.take().context("child stderr not piped")?;

        let stdout_task = tokio::spawn(pump(stdout, Stream::Out, log_file.clone(), logs.clone()));
        let stderr_task = tokio::spawn(pump(stderr, Stream::Err, log_file.clone(), logs.clone()));

        Ok(Self {
            child,
            logs,
            stdout_task,
            stderr_task,
        })
    }

    /// Shared handle to the in-memory log collector; clone it out before `wait`
    /// if the caller needs to read logs while the subprocess is still running.
    pub fn logs(&self) -> Arc<Mutex<Vec<LogEntry>>> {
        self.logs.clone()
    }

    /// Request termination of the still-running child.
    pub async fn kill(&mut self) -> Result<()> {
        self.child.kill().await.context("failed to kill child")
    }

    /// Non-blocking poll: `Some(code)` once the child has exited, `None` while still running.
    pub fn try_wait(&mut self) -> Result<Option<i32>> {
        match self.child.try_wait().context("failed to poll child")? {
            Some(status) => Ok(Some(status.code().unwrap_or(-1))),
            None => Ok(None),
        }
    }

    /// Join the output pumps after the child has already been reaped via [`try_wait`](Self::try_wait).
    pub async fn join_output_pumps(self) {
        let _ = self.stdout_task.await;
        let _ = self.stderr_task.await;
    }

    /// Wait for the subprocess to exit and for both output pumps to drain.
    /// Returns the exit code, or `-1` if it could not be determined.
    pub async fn wait(mut self) -> Result<i32> {
        let status = self.child.wait().await.context("failed to wait on child")?;
        let _ = self.stdout_task.await;
        let _ = self.stderr_task.await;
        Ok(status.code().unwrap_or(-1))
    }
}

async fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create log dir {}", parent.display()))?;
    }

    let file = File::create(path)
        .await
        .with_context(|| format!("failed to create log file {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o644);
        let _ = tokio::fs::set_permissions(path, perms).await;
    }

    Ok(file)
}

async fn pump(
    reader: impl tokio::io::AsyncRead + Unpin,
    stream: Stream,
    log_file: Arc<Mutex<File>>,
    logs: Arc<Mutex<Vec<LogEntry>>>,
) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(text)) => {
                let timestamp = Utc::now();

                {
                    let mut file = log_file.lock().await;
                    let _ = file.write_all(text.as_bytes()).await;
                    let _ = file.write_all(b"\n").await;
                }

                {
                    let mut logs = logs.lock().await;
                    logs.push(LogEntry {
                        timestamp,
                        stream,
                        text,
                    });
                }
            }
            Ok(None) => break,
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn spawn_captures_stdout_to_file_and_memory() {
        let td = tempdir().expect("tempdir");
        let log_path = td.path().join("job.log");

        let proc = SpawnedProcess::spawn(
            "sh",
            &["-c".to_string(), "echo hello".to_string()],
            &[],
            &log_path,
        )
        .await
        .expect("spawn");

        let logs_handle = proc.logs();
        let exit_code = proc.wait().await.expect("wait");
        assert_eq!(exit_code, 0);

        let logs = logs_handle.lock().await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].text, "hello");
        assert_eq!(logs[0].stream, Stream::Out);

        let contents = tokio::fs::read_to_string(&log_path).await.expect("read log");
        assert_eq!(contents, "hello\n");
    }

    #[tokio::test]
    async fn spawn_captures_stderr_separately_tagged() {
        let td = tempdir().expect("tempdir");
        let log_path = td.path().join("job.log");

        let proc = SpawnedProcess::spawn(
            "sh",
            &["-c".to_string(), "echo oops 1>&2".to_string()],
            &[],
            &log_path,
        )
        .await
        .expect("spawn");

        let logs_handle = proc.logs();
        proc.wait().await.expect("wait");

        let logs = logs_handle.lock().await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].stream, Stream::Err);
    }

    #[tokio::test]
    async fn exit_code_is_propagated() {
        let td = tempdir().expect("tempdir");
        let log_path = td.path().join("job.log");

        let proc = SpawnedProcess::spawn(
            "sh",
            &["-c".to_string(), "exit 7".to_string()],
            &[],
            &log_path,
        )
        .await
        .expect("spawn");

        let exit_code = proc.wait().await.expect("wait");
        assert_eq!(exit_code, 7);
    }

    #[tokio::test]
    async fn environment_variables_are_passed_through() {
        let td = tempdir().expect("tempdir");
        let log_path = td.path().join("job.log");

        let proc = SpawnedProcess::spawn(
            "sh",
            &["-c".to_string(), "echo $GIT_REF_NAME".to_string()],
            &[("GIT_REF_NAME".to_string(), "master".to_string())],
            &log_path,
        )
        .await
        .expect("spawn");

        let logs_handle = proc.logs();
        proc.wait().await.expect("wait");

        let logs = logs_handle.lock().await;
        assert_eq!(logs[0].text, "master");
    }

    #[tokio::test]
    async fn kill_terminates_a_long_running_child() {
        let td = tempdir().expect("tempdir");
        let log_path = td.path().join("job.log");

        let mut proc = SpawnedProcess::spawn(
            "sh",
            &["-c".to_string(), "sleep 30".to_string()],
            &[],
            &log_path,
        )
        .await
        .expect("spawn");

        proc.kill().await.expect("kill");
        let exit_code = proc.wait().await.expect("wait");
        assert_ne!(exit_code, 0);
    }
}
