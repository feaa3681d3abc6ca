use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    File,
    Suite,
    Test,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Run,
    Pass,
    Fail,
    Skip,
    Todo,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Pass | TaskState::Fail | TaskState::Skip | TaskState::Todo)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Run => "run",
            TaskState::Pass => "pass",
            TaskState::Fail => "fail",
            TaskState::Skip => "skip",
            TaskState::Todo => "todo",
        }
    }
}

/// A node of the runner's collected task tree: file → suites → tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    /// Path of the file the task was collected from.
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub state: Option<TaskState>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub children: Vec<Task>,
}

impl Task {
    pub fn file(id: impl Into<String>, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            id: TaskId::new(id),
            name: path.clone(),
            kind: TaskKind::File,
            file: path,
            state: None,
            children: Vec::new(),
        }
    }

    pub fn suite(id: impl Into<String>, name: impl Into<String>, file: &str) -> Self {
        Self {
            id: TaskId::new(id),
            name: name.into(),
            kind: TaskKind::Suite,
            file: file.to_string(),
            state: None,
            children: Vec::new(),
        }
    }

    pub fn test(id: impl Into<String>, name: impl Into<String>, file: &str) -> Self {
        Self {
            id: TaskId::new(id),
            name: name.into(),
            kind: TaskKind::Test,
            file: file.to_string(),
            state: None,
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: Task) -> Self {
        self.children.push(child);
        self
    }

    /// Copy without children, as kept in lookups.
    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            id: self.id.clone(),
            name: self.name.clone(),
            kind: self.kind,
            file: self.file.clone(),
        }
    }

    /// Every task in the subtree, depth-first, self first.
    pub fn walk(&self) -> Vec<&Task> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.walk());
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    pub id: TaskId,
    pub name: String,
    pub kind: TaskKind,
    pub file: String,
}
