//! Runner-facing adapter: maps runner events onto the hierarchy and feeds
//! the ordering engine.

use std::collections::HashMap;

use crate::detail::{DetailKind, DetailWatcher};
use crate::emitter::{LineSink, TestStatus};
use crate::hierarchy::{parse_tag, HierarchyAddress, HierarchyCollector, AREA_SUITE};
use crate::logger::Logger;
use crate::ordering::OrderingEngine;
use crate::runner::{Reporter, Task, TaskId, TaskState};

/// Prefix of the log-location pointer printed at the end of a run. Lines
/// starting with it skip attribution and go straight to the stream.
pub const LOGS_POINTER: &str = "📁 Logs:";

/// Set to `1` or `true` when an external runner will collect no suite
/// files, so streaming need not wait for the suite area.
pub const SUITE_ABSENT_ENV: &str = "E2E_SUITE_ABSENT";

pub fn suite_absent_from_env() -> bool {
    std::env::var(SUITE_ABSENT_ENV)
        .map(|v| matches!(v.trim(), "1" | "true"))
        .unwrap_or(false)
}

pub fn status_of(state: TaskState) -> TestStatus {
    match state {
        TaskState::Pass => TestStatus::Pass,
        TaskState::Fail => TestStatus::Fail,
        TaskState::Skip | TaskState::Todo => TestStatus::Skip,
        TaskState::Queued | TaskState::Run => TestStatus::Pending,
    }
}

pub struct HierarchyReporter<S: LineSink> {
    collector: HierarchyCollector,
    engine: OrderingEngine<S>,
    /// The test whose execution window is open; fallback owner of
    /// unattributed output.
    active_test: Option<TaskId>,
    /// States reported before the task was collected.
    pending_states: HashMap<TaskId, TaskState>,
    suite_absent: bool,
    watcher: Option<DetailWatcher>,
    log: Option<Logger>,
}

impl<S: LineSink> HierarchyReporter<S> {
    pub fn new(engine: OrderingEngine<S>) -> Self {
        Self {
            collector: HierarchyCollector::new(),
            engine,
            active_test: None,
            pending_states: HashMap::new(),
            suite_absent: false,
            watcher: None,
            log: None,
        }
    }

    /// Declare that this run has no suite area, so streaming may begin
    /// with whatever area comes first.
    pub fn with_suite_absent(mut self, absent: bool) -> Self {
        self.suite_absent = absent;
        self
    }

    /// Watch the detail files and note every change in `log`.
    pub fn with_detail_watch(mut self, watcher: DetailWatcher, log: Logger) -> Self {
        self.watcher = Some(watcher);
        self.log = Some(log);
        self
    }

    pub fn engine(&self) -> &OrderingEngine<S> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut OrderingEngine<S> {
        &mut self.engine
    }

    pub fn collector(&self) -> &HierarchyCollector {
        &self.collector
    }

    pub fn active_test(&self) -> Option<&TaskId> {
        self.active_test.as_ref()
    }

    fn may_start(&self) -> bool {
        self.engine.is_started() || self.suite_absent || self.engine.has_area(AREA_SUITE)
    }

    async fn apply_state(&mut self, id: TaskId, state: TaskState) {
        if self.collector.is_ignored(&id) {
            return;
        }
        let Some(address) = self.collector.address_of(&id).cloned() else {
            // Not collected yet; replayed once it is.
            self.pending_states.insert(id, state);
            return;
        };
        if !self.collector.is_test(&id) {
            return;
        }
        if state == TaskState::Run {
            self.active_test = Some(id);
            return;
        }
        if state.is_terminal() {
            if self.active_test.as_ref() == Some(&id) {
                self.active_test = None;
            }
            self.engine.set_status(&address, status_of(state)).await;
        }
    }

    /// Attribution order: inline tag, task handle, active test.
    fn attribute(&self, content: &str, task: Option<&TaskId>) -> Option<(HierarchyAddress, String)> {
        if let Some(tagged) = parse_tag(content) {
            return Some(tagged);
        }
        let by_task = task
            .and_then(|id| self.collector.address_of(id))
            .filter(|addr| addr.test.is_some());
        if let Some(addr) = by_task {
            return Some((addr.clone(), content.to_string()));
        }
        let active = self.active_test.as_ref()?;
        let addr = self.collector.address_of(active)?;
        Some((addr.clone(), content.to_string()))
    }

    fn poll_details(&mut self) {
        let Some(watcher) = self.watcher.as_mut() else {
            return;
        };
        let changed = watcher.poll();
        if changed.is_empty() {
            return;
        }
        let Some(log) = &self.log else { return };
        for kind in changed {
            let counts = watcher.store().counts(kind);
            if let Err(e) = log.line(&format!("detail {}: {}", kind.file_name(), counts)) {
                tracing::error!("Failed to note detail change: {}", e);
            }
        }
    }

    fn print_summary(&mut self) {
        let counts = self.engine.counts();
        let mut body = vec![format!("{} tests: {}", counts.icon(), counts)];
        if let Some(watcher) = &self.watcher {
            for kind in DetailKind::ALL {
                let details = watcher.store().counts(kind);
                if details.total() > 0 {
                    body.push(format!("{} details: {}", kind.area(), details));
                }
            }
        }
        self.engine.emitter_mut().boxed("RESULTS", &body, "");
    }
}

impl<S: LineSink> Reporter for HierarchyReporter<S> {
    async fn on_init(&mut self) {
        tracing::debug!("Reporter initialised");
    }

    async fn on_collected(&mut self, files: Vec<Task>) {
        for file in &files {
            for test in self.collector.collect(file) {
                self.engine.register(&test.address, &test.names);
            }
        }

        let replay: Vec<TaskId> = self
            .pending_states
            .keys()
            .filter(|id| self.collector.address_of(id).is_some() || self.collector.is_ignored(id))
            .cloned()
            .collect();
        for id in replay {
            if let Some(state) = self.pending_states.remove(&id) {
                self.apply_state(id, state).await;
            }
        }

        if self.may_start() {
            self.engine.start().await;
        }
    }

    async fn on_task_update(&mut self, updates: Vec<(TaskId, TaskState)>) {
        for (id, state) in updates {
            self.apply_state(id, state).await;
        }
        self.poll_details();
    }

    async fn on_console_log(&mut self, content: String, task: Option<TaskId>) {
        if content.starts_with(LOGS_POINTER) {
            self.engine.emitter_mut().raw(&content);
            return;
        }
        match self.attribute(&content, task.as_ref()) {
            Some((addr, line)) => self.engine.route_output(&addr, &line),
            None => tracing::debug!("Dropping unattributed output: {}", content),
        }
    }

    async fn on_finished(&mut self) {
        self.poll_details();
        self.engine.finish().await;
        self.print_summary();
    }
}
