use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use super::{dispatch, Reporter, RunnerEvent};
use crate::logger::Logger;
use crate::process::CommandSpec;
use crate::{Error, Result};

/// Decode one protocol line. Anything that is not an event is plain console
/// output without a task.
pub fn parse_event(line: &str) -> RunnerEvent {
    match serde_json::from_str::<RunnerEvent>(line) {
        Ok(event) => event,
        Err(_) => RunnerEvent::ConsoleLog {
            content: line.to_string(),
            task_id: None,
        },
    }
}

/// Feed every line of `reader` to `reporter`. Returns whether the stream
/// carried a `finished` event.
pub async fn pump<B, R>(reader: B, reporter: &mut R) -> Result<bool>
where
    B: AsyncBufRead + Unpin,
    R: Reporter,
{
    let mut lines = reader.lines();
    let mut finished = false;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let event = parse_event(&line);
        finished |= matches!(event, RunnerEvent::Finished);
        dispatch(reporter, event).await;
    }
    Ok(finished)
}

/// Run an external runner that speaks the NDJSON protocol on stdout. Its
/// stderr is boxed into `logger`. Returns the runner's exit code.
pub async fn run_external<R: Reporter>(
    argv: &[String],
    cwd: Option<&Path>,
    reporter: &mut R,
    logger: &Logger,
) -> Result<Option<i32>> {
    let mut spec = CommandSpec::from_argv(argv)?;
    if let Some(dir) = cwd {
        spec = spec.cwd(dir);
    }
    let mut cmd = spec.command();
    cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(|e| Error::Spawn {
        program: spec.program.clone(),
        reason: e.to_string(),
    })?;
    tracing::info!("Runner started: {}", spec.display());

    let _ = logger.box_open(&format!("$ {} (stderr)", spec.display()));
    let stderr = child.stderr.take();
    let err_log = logger.clone();
    let err_task = tokio::spawn(async move {
        let Some(stream) = stderr else { return };
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let _ = err_log.box_line(&line);
        }
    });

    reporter.on_init().await;
    let stdout = child.stdout.take().ok_or_else(|| Error::Spawn {
        program: spec.program.clone(),
        reason: "stdout not captured".to_string(),
    })?;
    let finished = pump(BufReader::new(stdout), reporter).await?;

    let status = child.wait().await?;
    let _ = err_task.await;
    let _ = logger.box_close(&match status.code() {
        Some(code) => format!("exit {}", code),
        None => "terminated by signal".to_string(),
    });

    if !finished {
        tracing::warn!("Runner exited without a finished event");
        reporter.on_finished().await;
    }
    Ok(status.code())
}
