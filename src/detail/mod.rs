//! Structured per-run detail files.
//!
//! Suite and schema tests append `{severity, message}` entries to list-shaped
//! files; scenario tests record per-step severities in a map keyed by
//! scenario name. Step severities only ever get worse.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::format;
use crate::logger::RunPaths;
use crate::Result;

pub const SUITE_DETAIL_FILE: &str = "_suite-detail.json";
pub const SCHEMA_DETAIL_FILE: &str = "_schema-detail.json";
pub const SCENARIO_DETAIL_FILE: &str = "_scenario-detail.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Ok,
    Warn,
    Fail,
}

impl Severity {
    pub fn icon(&self) -> &'static str {
        match self {
            Severity::Ok => format::ICON_OK,
            Severity::Warn => format::ICON_WARN,
            Severity::Fail => format::ICON_FAIL,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Ok => "ok",
            Severity::Warn => "warn",
            Severity::Fail => "fail",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which detail file a record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetailKind {
    Suite,
    Schema,
    Scenarios,
}

impl DetailKind {
    pub const ALL: [DetailKind; 3] = [DetailKind::Suite, DetailKind::Schema, DetailKind::Scenarios];

    pub fn file_name(&self) -> &'static str {
        match self {
            DetailKind::Suite => SUITE_DETAIL_FILE,
            DetailKind::Schema => SCHEMA_DETAIL_FILE,
            DetailKind::Scenarios => SCENARIO_DETAIL_FILE,
        }
    }

    pub fn area(&self) -> &'static str {
        match self {
            DetailKind::Suite => "suite",
            DetailKind::Schema => "schema",
            DetailKind::Scenarios => "scenarios",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailEntry {
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Scaffold,
    Env,
    Files,
}

impl Step {
    pub const ALL: [Step; 3] = [Step::Scaffold, Step::Env, Step::Files];

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Scaffold => "scaffold",
            Step::Env => "env",
            Step::Files => "files",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub meta: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioRecord {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub scaffold: Option<StepRecord>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub env: Option<StepRecord>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub files: Option<StepRecord>,
}

impl ScenarioRecord {
    pub fn step(&self, step: Step) -> Option<&StepRecord> {
        match step {
            Step::Scaffold => self.scaffold.as_ref(),
            Step::Env => self.env.as_ref(),
            Step::Files => self.files.as_ref(),
        }
    }

    fn slot(&mut self, step: Step) -> &mut Option<StepRecord> {
        match step {
            Step::Scaffold => &mut self.scaffold,
            Step::Env => &mut self.env,
            Step::Files => &mut self.files,
        }
    }

    /// Record a step, keeping the worse of the stored and new severity.
    /// Returns the severity that ends up stored.
    pub fn upgrade(
        &mut self,
        step: Step,
        severity: Severity,
        meta: Option<serde_json::Value>,
    ) -> Severity {
        let slot = self.slot(step);
        if let Some(existing) = slot.as_mut() {
            if severity >= existing.severity {
                existing.severity = severity;
                if meta.is_some() {
                    existing.meta = meta;
                }
            }
            return existing.severity;
        }
        *slot = Some(StepRecord { severity, meta });
        severity
    }

    /// Worst severity across recorded steps, `None` when nothing was recorded.
    pub fn overall(&self) -> Option<Severity> {
        Step::ALL
            .iter()
            .filter_map(|s| self.step(*s).map(|r| r.severity))
            .max()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub ok: u32,
    pub warn: u32,
    pub fail: u32,
}

impl SeverityCounts {
    pub fn add(&mut self, severity: Severity) {
        match severity {
            Severity::Ok => self.ok += 1,
            Severity::Warn => self.warn += 1,
            Severity::Fail => self.fail += 1,
        }
    }

    pub fn merge(&mut self, other: &SeverityCounts) {
        self.ok += other.ok;
        self.warn += other.warn;
        self.fail += other.fail;
    }

    pub fn total(&self) -> u32 {
        self.ok + self.warn + self.fail
    }

    pub fn worst(&self) -> Option<Severity> {
        if self.fail > 0 {
            Some(Severity::Fail)
        } else if self.warn > 0 {
            Some(Severity::Warn)
        } else if self.ok > 0 {
            Some(Severity::Ok)
        } else {
            None
        }
    }
}

impl std::fmt::Display for SeverityCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ok · {} warn · {} fail", self.ok, self.warn, self.fail)
    }
}

/// Handle on one run's detail files. Clones share the per-file write locks,
/// so every writer in the process serialises its read-modify-write.
#[derive(Debug, Clone)]
pub struct DetailStore {
    dir: PathBuf,
    suite_lock: Arc<Mutex<()>>,
    schema_lock: Arc<Mutex<()>>,
    scenario_lock: Arc<Mutex<()>>,
}

impl DetailStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            suite_lock: Arc::new(Mutex::new(())),
            schema_lock: Arc::new(Mutex::new(())),
            scenario_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn for_run(paths: &RunPaths) -> Self {
        Self::new(paths.e2e_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, kind: DetailKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    fn lock(&self, kind: DetailKind) -> &Mutex<()> {
        match kind {
            DetailKind::Suite => &self.suite_lock,
            DetailKind::Schema => &self.schema_lock,
            DetailKind::Scenarios => &self.scenario_lock,
        }
    }

    /// Create empty detail files for a fresh run. Existing files are kept.
    pub fn init(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        for kind in DetailKind::ALL {
            let path = self.path(kind);
            if !path.exists() {
                let empty = if kind == DetailKind::Scenarios { "{}" } else { "[]" };
                std::fs::write(&path, empty)?;
            }
        }
        Ok(())
    }

    /// Append one entry to the suite or schema list.
    pub fn append(&self, kind: DetailKind, severity: Severity, message: impl Into<String>) -> Result<()> {
        debug_assert!(kind != DetailKind::Scenarios, "scenarios are map-shaped");
        let _guard = self.lock(kind).lock().unwrap_or_else(|e| e.into_inner());
        let mut entries = self.read_list(kind);
        entries.push(DetailEntry { severity, message: message.into() });
        self.write_json(kind, &entries)
    }

    /// Record a scenario step. Severity is upgraded to the worst seen value.
    pub fn record_step(
        &self,
        scenario: &str,
        step: Step,
        severity: Severity,
        meta: Option<serde_json::Value>,
    ) -> Result<Severity> {
        let _guard = self
            .lock(DetailKind::Scenarios)
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let mut scenarios = self.read_scenarios();
        let stored = scenarios
            .entry(scenario.to_string())
            .or_default()
            .upgrade(step, severity, meta);
        self.write_json(DetailKind::Scenarios, &scenarios)?;
        Ok(stored)
    }

    /// Missing or corrupt files read as empty.
    pub fn read_list(&self, kind: DetailKind) -> Vec<DetailEntry> {
        read_or_default(&self.path(kind))
    }

    pub fn read_scenarios(&self) -> BTreeMap<String, ScenarioRecord> {
        read_or_default(&self.path(DetailKind::Scenarios))
    }

    /// Counts per kind. Scenarios count once each, by their worst step.
    pub fn counts(&self, kind: DetailKind) -> SeverityCounts {
        let mut counts = SeverityCounts::default();
        match kind {
            DetailKind::Suite | DetailKind::Schema => {
                for entry in self.read_list(kind) {
                    counts.add(entry.severity);
                }
            }
            DetailKind::Scenarios => {
                for record in self.read_scenarios().values() {
                    if let Some(sev) = record.overall() {
                        counts.add(sev);
                    }
                }
            }
        }
        counts
    }

    pub fn raw(&self, kind: DetailKind) -> Option<Vec<u8>> {
        std::fs::read(self.path(kind)).ok()
    }

    fn write_json<T: Serialize>(&self, kind: DetailKind, value: &T) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path(kind);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(value)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

fn read_or_default<T: serde::de::DeserializeOwned + Default>(path: &Path) -> T {
    let Ok(content) = std::fs::read_to_string(path) else {
        return T::default();
    };
    match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("Unreadable detail file {}, treating as empty: {}", path.display(), e);
            T::default()
        }
    }
}

/// Detects detail-file changes by content hash, so unchanged files are not
/// re-rendered on every task update.
#[derive(Debug)]
pub struct DetailWatcher {
    store: DetailStore,
    seen: std::collections::HashMap<DetailKind, blake3::Hash>,
}

impl DetailWatcher {
    pub fn new(store: DetailStore) -> Self {
        Self { store, seen: Default::default() }
    }

    pub fn store(&self) -> &DetailStore {
        &self.store
    }

    /// Kinds whose file content changed since the previous poll.
    pub fn poll(&mut self) -> Vec<DetailKind> {
        let mut changed = Vec::new();
        for kind in DetailKind::ALL {
            let Some(bytes) = self.store.raw(kind) else { continue };
            let hash = blake3::hash(&bytes);
            if self.seen.get(&kind) != Some(&hash) {
                self.seen.insert(kind, hash);
                changed.push(kind);
            }
        }
        changed
    }
}
