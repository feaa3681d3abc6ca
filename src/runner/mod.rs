//! Test-runner side of the harness: the task tree, the event stream a runner
//! produces, and the two runners that produce it.

mod inband;
mod ndjson;
mod task;

use serde::{Deserialize, Serialize};

pub use inband::{
    InbandRunner, Outcome, RunCounts, SuiteDef, TestCase, TestContext, TestFile, TestPlan,
};
pub use ndjson::{parse_event, pump, run_external};
pub use task::{Task, TaskHandle, TaskId, TaskKind, TaskState};

/// One event of the runner protocol, one JSON object per line on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum RunnerEvent {
    Collected {
        files: Vec<Task>,
    },
    TaskUpdate {
        updates: Vec<(TaskId, TaskState)>,
    },
    ConsoleLog {
        content: String,
        #[serde(rename = "taskId", default, skip_serializing_if = "Option::is_none")]
        task_id: Option<TaskId>,
    },
    Finished,
}

/// Receives runner events. Callbacks never fail: implementations log their
/// own errors so a bad event cannot stop the run.
#[allow(async_fn_in_trait)]
pub trait Reporter {
    async fn on_init(&mut self) {}

    /// May be called several times, possibly with files seen before.
    async fn on_collected(&mut self, files: Vec<Task>);

    /// Updates come in any order and may repeat a task.
    async fn on_task_update(&mut self, updates: Vec<(TaskId, TaskState)>);

    async fn on_console_log(&mut self, content: String, task: Option<TaskId>);

    async fn on_finished(&mut self) {}
}

/// Hand one event to the matching callback.
pub async fn dispatch<R: Reporter>(reporter: &mut R, event: RunnerEvent) {
    match event {
        RunnerEvent::Collected { files } => reporter.on_collected(files).await,
        RunnerEvent::TaskUpdate { updates } => reporter.on_task_update(updates).await,
        RunnerEvent::ConsoleLog { content, task_id } => {
            reporter.on_console_log(content, task_id).await
        }
        RunnerEvent::Finished => reporter.on_finished().await,
    }
}
