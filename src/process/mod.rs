//! Spawning external commands: container engine, scaffolding CLI, schema validator.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::logger::Logger;
use crate::{Error, Result};

/// How long a finished or killed command's pipes may stay open. A
/// grandchild that inherited them can keep them open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub timeout: Option<Duration>,
    pub stdin: Option<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into(), ..Default::default() }
    }

    /// Build from an argv vector; the first element is the program.
    pub fn from_argv(argv: &[String]) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::Usage("empty command line".to_string()))?;
        Ok(Self::new(program.clone()).args(args.iter().cloned()))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// `program arg1 arg2`, for log titles.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(|a| a.as_str()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub(crate) fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).envs(&self.env).kill_on_drop(true);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        cmd
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit code, `None` when killed by a signal or on timeout.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0) && !self.timed_out
    }
}

/// Run a command to completion, capturing output. With a logger, the
/// command's output is written as one box per stream as it arrives.
pub async fn run(spec: &CommandSpec, logger: Option<&Logger>) -> Result<ProcessOutput> {
    let mut cmd = spec.command();
    cmd.stdin(if spec.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| Error::Spawn {
        program: spec.program.clone(),
        reason: e.to_string(),
    })?;

    if let (Some(input), Some(mut stdin)) = (&spec.stdin, child.stdin.take()) {
        stdin.write_all(input.as_bytes()).await?;
        stdin.shutdown().await?;
    }

    if let Some(log) = logger {
        let _ = log.box_open(&format!("$ {}", spec.display()));
    }

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let out_log = logger.cloned();
    let err_log = logger.map(|l| l.nested());
    let (stop_tx, stop_rx) = watch::channel(false);
    let out_task = tokio::spawn(collect_lines(stdout, out_log, "", stop_rx.clone()));
    let err_task = tokio::spawn(collect_lines(stderr, err_log, "stderr: ", stop_rx));

    let (code, timed_out) = match spec.timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => (status?.code(), false),
            Err(_) => {
                tracing::warn!("{} timed out after {:?}, killing", spec.program, limit);
                let _ = child.kill().await;
                (None, true)
            }
        },
        None => (child.wait().await?.code(), false),
    };

    let (stdout, stderr) = drain(out_task, err_task, stop_tx).await;

    if let Some(log) = logger {
        let summary = match (code, timed_out) {
            (_, true) => "timed out".to_string(),
            (Some(c), _) => format!("exit {}", c),
            (None, _) => "terminated by signal".to_string(),
        };
        let _ = log.box_close(&summary);
    }

    Ok(ProcessOutput { code, stdout, stderr, timed_out })
}

/// Like [`run`], but a non-zero exit or a timeout becomes an error.
pub async fn run_checked(spec: &CommandSpec, logger: Option<&Logger>) -> Result<ProcessOutput> {
    let output = run(spec, logger).await?;
    if output.timed_out {
        return Err(Error::ProcessTimeout {
            program: spec.program.clone(),
            timeout_ms: spec.timeout.map(|t| t.as_millis() as u64).unwrap_or(0),
        });
    }
    if output.code != Some(0) {
        return Err(Error::Assertion(format!(
            "`{}` exited with {:?}: {}",
            spec.display(),
            output.code,
            last_lines(&output.stderr, 5)
        )));
    }
    Ok(output)
}

/// Wait for both readers, cutting them off once [`DRAIN_GRACE`] has passed.
async fn drain(
    out: JoinHandle<String>,
    err: JoinHandle<String>,
    stop: watch::Sender<bool>,
) -> (String, String) {
    let joined = async { tokio::join!(out, err) };
    tokio::pin!(joined);
    let (out, err) = match tokio::time::timeout(DRAIN_GRACE, &mut joined).await {
        Ok(done) => done,
        Err(_) => {
            tracing::debug!("Output pipes still open {:?} after exit, cutting off", DRAIN_GRACE);
            let _ = stop.send(true);
            joined.await
        }
    };
    (out.unwrap_or_default(), err.unwrap_or_default())
}

async fn collect_lines<R>(
    stream: Option<R>,
    logger: Option<Logger>,
    prefix: &'static str,
    mut stop: watch::Receiver<bool>,
) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(stream) = stream else { return String::new() };
    let mut lines = BufReader::new(stream).lines();
    let mut buf = String::new();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = stop.changed() => break,
        };
        let Ok(Some(line)) = line else { break };
        if let Some(log) = &logger {
            let _ = log.box_line(&format!("{}{}", prefix, line));
        }
        buf.push_str(&line);
        buf.push('\n');
    }
    buf
}

/// Tail of a captured stream, for error messages.
pub fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_run_captures_stdout_and_code() {
        let spec = CommandSpec::new("sh").args(["-c", "echo hello; echo oops >&2; exit 3"]);
        let out = run(&spec, None).await.unwrap();
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stdout, "hello\n");
        assert_eq!(out.stderr, "oops\n");
        assert!(!out.success());
    }

    #[tokio::test]
    async fn test_run_feeds_stdin() {
        let spec = CommandSpec::new("cat").stdin("piped in");
        let out = run(&spec, None).await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "piped in");
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let spec = CommandSpec::new("sleep").arg("5").timeout(Duration::from_millis(100));
        let out = run(&spec, None).await.unwrap();
        assert!(out.timed_out);
        assert!(matches!(run_checked(&spec, None).await, Err(Error::ProcessTimeout { .. })));
    }

    #[tokio::test]
    async fn test_timeout_bounds_call_when_grandchild_holds_pipes() {
        // `sh` forks `sleep`, which keeps stdout and stderr open after
        // the shell itself is killed.
        let spec = CommandSpec::new("sh")
            .args(["-c", "echo started; sleep 4; true"])
            .timeout(Duration::from_millis(200));
        let began = std::time::Instant::now();
        let out = run(&spec, None).await.unwrap();
        assert!(out.timed_out);
        assert!(!out.success());
        assert!(began.elapsed() < Duration::from_secs(2), "took {:?}", began.elapsed());
        assert_eq!(out.stdout, "started\n");
    }

    #[tokio::test]
    async fn test_background_grandchild_does_not_block_exit() {
        let spec = CommandSpec::new("sh").args(["-c", "sleep 4 & echo spawned"]);
        let began = std::time::Instant::now();
        let out = run(&spec, None).await.unwrap();
        assert_eq!(out.code, Some(0));
        assert_eq!(out.stdout, "spawned\n");
        assert!(began.elapsed() < Duration::from_secs(2), "took {:?}", began.elapsed());
    }

    #[tokio::test]
    async fn test_run_boxes_output_into_logger() {
        let dir = tempdir().unwrap();
        let logger = Logger::new(dir.path().join("p.log"));
        let spec = CommandSpec::new("sh").args(["-c", "echo one; echo two"]);
        run(&spec, Some(&logger)).await.unwrap();

        let content = std::fs::read_to_string(logger.path()).unwrap();
        assert!(content.starts_with("┌─ $ sh -c"));
        assert!(content.contains("│ one\n"));
        assert!(content.contains("│ two\n"));
        assert!(content.trim_end().lines().last().unwrap().starts_with("└─ exit 0"));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_error() {
        let spec = CommandSpec::new("definitely-not-a-real-binary-xyz");
        assert!(matches!(run(&spec, None).await, Err(Error::Spawn { .. })));
    }

    #[test]
    fn test_from_argv() {
        let spec = CommandSpec::from_argv(&["docker".to_string(), "ps".to_string()]).unwrap();
        assert_eq!(spec.display(), "docker ps");
        assert!(CommandSpec::from_argv(&[]).is_err());
    }
}
