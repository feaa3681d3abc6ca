//! In-process runner. Files run one after another; inside a file, suites
//! marked concurrent run all their tests at once.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;

use super::{RunnerEvent, Task, TaskId, TaskState};
use crate::hierarchy::{tag_line, DisplayNames};
use crate::Result;

/// How a test body finished when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Skipped(String),
}

pub type TestFuture = Pin<Box<dyn Future<Output = Result<Outcome>> + Send>>;
type TestBody = Box<dyn FnOnce(TestContext) -> TestFuture + Send>;

pub struct TestCase {
    name: String,
    body: TestBody,
}

impl TestCase {
    pub fn new<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: FnOnce(TestContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Outcome>> + Send + 'static,
    {
        Self {
            name: name.into(),
            body: Box::new(move |ctx| Box::pin(body(ctx))),
        }
    }

    /// A test that reports `skip` without running anything.
    pub fn skipped(name: impl Into<String>, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::new(name, move |_| async move { Ok(Outcome::Skipped(reason)) })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

pub struct SuiteDef {
    name: String,
    concurrent: bool,
    tests: Vec<TestCase>,
}

impl SuiteDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            concurrent: false,
            tests: Vec::new(),
        }
    }

    pub fn concurrent(mut self) -> Self {
        self.concurrent = true;
        self
    }

    pub fn test(mut self, case: TestCase) -> Self {
        self.tests.push(case);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }
}

pub struct TestFile {
    path: String,
    suites: Vec<SuiteDef>,
}

impl TestFile {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            suites: Vec::new(),
        }
    }

    pub fn suite(mut self, suite: SuiteDef) -> Self {
        self.suites.push(suite);
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[derive(Default)]
pub struct TestPlan {
    files: Vec<TestFile>,
}

impl std::fmt::Debug for TestPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestPlan")
            .field("files", &self.files.iter().map(|file| file.path()).collect::<Vec<_>>())
            .finish()
    }
}

impl TestPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(mut self, file: TestFile) -> Self {
        self.files.push(file);
        self
    }

    pub fn add(&mut self, file: TestFile) {
        self.files.push(file);
    }

    pub fn files(&self) -> &[TestFile] {
        &self.files
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Handed to every test body. All output goes back to the reporter as
/// console events.
#[derive(Clone)]
pub struct TestContext {
    task: TaskId,
    name: String,
    events: UnboundedSender<RunnerEvent>,
}

impl TestContext {
    pub fn task(&self) -> &TaskId {
        &self.task
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Output attributed to this test.
    pub fn log(&self, content: impl Into<String>) {
        self.send(content.into(), Some(self.task.clone()));
    }

    /// Output with no task attached, as from a detached async context.
    pub fn log_unattributed(&self, content: impl Into<String>) {
        self.send(content.into(), None);
    }

    /// Output carrying an inline hierarchy tag instead of a task.
    pub fn log_tagged(&self, names: &DisplayNames, content: &str) {
        self.send(tag_line(names, content), None);
    }

    fn send(&self, content: String, task_id: Option<TaskId>) {
        // A closed channel means the reporter is gone; nothing left to show.
        let _ = self.events.send(RunnerEvent::ConsoleLog { content, task_id });
    }
}

/// Terminal tallies of one in-band run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
}

impl RunCounts {
    fn add(&mut self, state: TaskState) {
        match state {
            TaskState::Pass => self.passed += 1,
            TaskState::Fail => self.failed += 1,
            TaskState::Skip | TaskState::Todo => self.skipped += 1,
            TaskState::Queued | TaskState::Run => {}
        }
    }
}

pub struct InbandRunner {
    events: UnboundedSender<RunnerEvent>,
}

impl InbandRunner {
    pub fn new(events: UnboundedSender<RunnerEvent>) -> Self {
        Self { events }
    }

    /// Collect every file, then run them in order. Ends with `finished`.
    pub async fn run(self, plan: TestPlan) -> RunCounts {
        let tasks: Vec<Task> = plan
            .files
            .iter()
            .enumerate()
            .map(|(i, file)| file_task(i, file))
            .collect();
        self.emit(RunnerEvent::Collected { files: tasks.clone() });

        let mut counts = RunCounts::default();
        for (file, task) in plan.files.into_iter().zip(tasks) {
            tracing::debug!("Running {}", file.path);
            for (suite, suite_task) in file.suites.into_iter().zip(task.children) {
                let cases = suite.tests.into_iter().zip(suite_task.children);
                if suite.concurrent {
                    let mut set = JoinSet::new();
                    for (case, test_task) in cases {
                        let events = self.events.clone();
                        set.spawn(run_case(events, test_task.id, case));
                    }
                    while let Some(joined) = set.join_next().await {
                        counts.add(joined.unwrap_or(TaskState::Fail));
                    }
                } else {
                    for (case, test_task) in cases {
                        counts.add(run_case(self.events.clone(), test_task.id, case).await);
                    }
                }
            }
        }

        self.emit(RunnerEvent::Finished);
        counts
    }

    fn emit(&self, event: RunnerEvent) {
        let _ = self.events.send(event);
    }
}

fn file_task(index: usize, file: &TestFile) -> Task {
    let file_id = format!("f{}", index);
    let mut task = Task::file(file_id.clone(), file.path.clone());
    for (s, suite) in file.suites.iter().enumerate() {
        let suite_id = format!("{}_s{}", file_id, s);
        let mut suite_task = Task::suite(suite_id.clone(), suite.name.clone(), &file.path);
        for (t, case) in suite.tests.iter().enumerate() {
            suite_task = suite_task.with_child(Task::test(
                format!("{}_t{}", suite_id, t),
                case.name.clone(),
                &file.path,
            ));
        }
        task = task.with_child(suite_task);
    }
    task
}

/// Run one body on its own task so a panic is contained and reported as
/// a failure of that test.
async fn run_case(events: UnboundedSender<RunnerEvent>, id: TaskId, case: TestCase) -> TaskState {
    let _ = events.send(RunnerEvent::TaskUpdate {
        updates: vec![(id.clone(), TaskState::Run)],
    });
    let ctx = TestContext {
        task: id.clone(),
        name: case.name.clone(),
        events: events.clone(),
    };
    let state = match tokio::spawn((case.body)(ctx.clone())).await {
        Ok(Ok(Outcome::Passed)) => TaskState::Pass,
        Ok(Ok(Outcome::Skipped(reason))) => {
            ctx.log(format!("skipped: {}", reason));
            TaskState::Skip
        }
        Ok(Err(e)) => {
            ctx.log(format!("❌ {}", e));
            TaskState::Fail
        }
        Err(e) => {
            ctx.log(format!("❌ test body panicked: {}", e));
            TaskState::Fail
        }
    };
    let _ = events.send(RunnerEvent::TaskUpdate {
        updates: vec![(id, state)],
    });
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn explode() -> Result<Outcome> {
        panic!("kaboom")
    }

    async fn run_plan(plan: TestPlan) -> (RunCounts, Vec<RunnerEvent>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let counts = InbandRunner::new(tx).run(plan).await;
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        (counts, events)
    }

    fn terminal_order(events: &[RunnerEvent]) -> Vec<(TaskId, TaskState)> {
        events
            .iter()
            .filter_map(|e| match e {
                RunnerEvent::TaskUpdate { updates } => Some(updates.clone()),
                _ => None,
            })
            .flatten()
            .filter(|(_, s)| s.is_terminal())
            .collect()
    }

    #[tokio::test]
    async fn test_outcomes_map_to_states() {
        let plan = TestPlan::new().file(
            TestFile::new("e2e/suite.test.rs").suite(
                SuiteDef::new("infra")
                    .test(TestCase::new("ok", |ctx| async move {
                        ctx.log("fine");
                        Ok(Outcome::Passed)
                    }))
                    .test(TestCase::new("bad", |_| async move {
                        Err(crate::Error::Assertion("nope".into()))
                    }))
                    .test(TestCase::new("boom", |_| async move { explode() }))
                    .test(TestCase::skipped("later", "fixture disabled")),
            ),
        );
        let (counts, events) = run_plan(plan).await;
        assert_eq!(counts, RunCounts { passed: 1, failed: 2, skipped: 1 });

        assert!(matches!(events.first(), Some(RunnerEvent::Collected { .. })));
        assert_eq!(events.last(), Some(&RunnerEvent::Finished));
        let states: Vec<TaskState> = terminal_order(&events).into_iter().map(|(_, s)| s).collect();
        assert_eq!(states, vec![TaskState::Pass, TaskState::Fail, TaskState::Fail, TaskState::Skip]);
        assert!(events.iter().any(|e| matches!(
            e,
            RunnerEvent::ConsoleLog { content, task_id: Some(_) } if content.contains("ASSERTION_FAILED")
        )));
    }

    #[tokio::test]
    async fn test_concurrent_suite_completes_out_of_order() {
        let slow = TestCase::new("slow", |_| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(Outcome::Passed)
        });
        let fast = TestCase::new("fast", |_| async move { Ok(Outcome::Passed) });
        let plan = TestPlan::new().file(
            TestFile::new("e2e/schema.test.rs")
                .suite(SuiteDef::new("files").concurrent().test(slow).test(fast)),
        );
        let (_, events) = run_plan(plan).await;
        let order: Vec<String> = terminal_order(&events).into_iter().map(|(id, _)| id.0).collect();
        assert_eq!(order, vec!["f0_s0_t1", "f0_s0_t0"]);
    }

    #[tokio::test]
    async fn test_files_run_sequentially() {
        let plan = TestPlan::new()
            .file(TestFile::new("a.test.rs").suite(SuiteDef::new("a").test(TestCase::new(
                "one",
                |_| async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(Outcome::Passed)
                },
            ))))
            .file(TestFile::new("b.test.rs").suite(
                SuiteDef::new("b").test(TestCase::new("two", |_| async move { Ok(Outcome::Passed) })),
            ));
        let (_, events) = run_plan(plan).await;
        let order: Vec<String> = terminal_order(&events).into_iter().map(|(id, _)| id.0).collect();
        assert_eq!(order, vec!["f0_s0_t0", "f1_s0_t0"]);
    }

    #[tokio::test]
    async fn test_context_log_variants() {
        let names = DisplayNames {
            area: "Suite".into(),
            config: "none".into(),
            group: "infra".into(),
            test: "probe".into(),
        };
        let plan = TestPlan::new().file(TestFile::new("e2e/suite.test.rs").suite(
            SuiteDef::new("infra").test(TestCase::new("probe", move |ctx| async move {
                ctx.log_unattributed("detached");
                ctx.log_tagged(&names, "tagged");
                Ok(Outcome::Passed)
            })),
        ));
        let (_, events) = run_plan(plan).await;
        let logs: Vec<(String, Option<TaskId>)> = events
            .into_iter()
            .filter_map(|e| match e {
                RunnerEvent::ConsoleLog { content, task_id } => Some((content, task_id)),
                _ => None,
            })
            .collect();
        assert_eq!(logs[0], ("detached".to_string(), None));
        assert!(logs[1].1.is_none());
        let (addr, line) = crate::hierarchy::parse_tag(&logs[1].0).unwrap();
        assert_eq!(addr, crate::hierarchy::HierarchyAddress::from_names("Suite", "none", "infra", "probe"));
        assert_eq!(line, "tagged");
    }
}
