use std::collections::{HashMap, HashSet};

use regex::Regex;

use super::address::*;
use crate::runner::{Task, TaskHandle, TaskId, TaskKind};

/// Area a collected file belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileArea {
    pub area: String,
    pub area_name: String,
}

/// A test node discovered during collection, in discovery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedTest {
    pub id: TaskId,
    pub address: HierarchyAddress,
    pub names: DisplayNames,
}

/// Maps the runner's task tree onto the four-level display hierarchy.
/// Lookups are filled once per task and never rewritten.
pub struct HierarchyCollector {
    suite_re: Regex,
    schema_re: Regex,
    scenario_re: Regex,
    addresses: HashMap<TaskId, HierarchyAddress>,
    handles: HashMap<TaskId, TaskHandle>,
    /// Every task of an unclassified file, the file included.
    ignored: HashSet<TaskId>,
}

impl Default for HierarchyCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl HierarchyCollector {
    pub fn new() -> Self {
        Self {
            suite_re: Regex::new(r"(^|/)suite[^/]*\.(test|spec)\.\w+$").expect("valid suite regex"),
            schema_re: Regex::new(r"(^|/)schema[^/]*\.(test|spec)\.\w+$").expect("valid schema regex"),
            scenario_re: Regex::new(r"(^|/)scenarios/([^/]+)/(.+/)?[^/]+\.(test|spec)\.\w+$").expect("valid scenario regex"),
            addresses: HashMap::new(),
            handles: HashMap::new(),
            ignored: HashSet::new(),
        }
    }

    /// Match a file path against the suite, schema and scenario patterns.
    pub fn classify_file(&self, path: &str) -> Option<FileArea> {
        let path = normalize_path(path);
        if self.suite_re.is_match(&path) {
            return Some(FileArea { area: AREA_SUITE.into(), area_name: "Suite".into() });
        }
        if self.schema_re.is_match(&path) {
            return Some(FileArea { area: AREA_SCHEMA.into(), area_name: "Schema".into() });
        }
        if self.scenario_re.is_match(&path) && !path.contains("/_runner/") {
            return Some(FileArea {
                area: AREA_SCENARIOS.into(),
                area_name: "Scenarios".into(),
            });
        }
        None
    }

    /// Config key for a file: `none` for suite, `main` for schema, the
    /// directory right under `scenarios/` for scenario files.
    pub fn derive_config(&self, path: &str, area: &str) -> String {
        match area {
            AREA_SUITE => CONFIG_NONE.to_string(),
            AREA_SCHEMA => CONFIG_MAIN.to_string(),
            _ => {
                let path = normalize_path(path);
                self.scenario_re
                    .captures(&path)
                    .map(|c| c[2].to_string())
                    .unwrap_or_else(|| CONFIG_NONE.to_string())
            }
        }
    }

    /// Collect one file task. Returns its tests in discovery order; calling
    /// again with the same tree returns the same list and changes nothing.
    pub fn collect(&mut self, file: &Task) -> Vec<CollectedTest> {
        let Some(area) = self.classify_file(&file.file) else {
            if self.ignored.insert(file.id.clone()) {
                tracing::warn!("Unclassified test file, not shown in hierarchy: {}", file.file);
            }
            self.ignored.extend(file.walk().into_iter().map(|t| t.id.clone()));
            return Vec::new();
        };
        let config_raw = self.derive_config(&file.file, &area.area);
        let config = normalize_key(&config_raw);

        self.remember(file, HierarchyAddress::config(&area.area, &config));

        let mut out = Vec::new();
        let ctx = BuildContext { area: &area, config: &config, config_name: &config_raw };
        let loose: Vec<&Task> = file.children.iter().filter(|c| c.kind == TaskKind::Test).collect();
        if !loose.is_empty() {
            // Tests outside any describe block form a group named after the file.
            let group_name = file_stem(&file.file);
            self.build_group(&ctx, &group_name, None, &loose, &mut out);
        }
        for child in file.children.iter().filter(|c| c.kind == TaskKind::Suite) {
            self.build_hierarchy(&ctx, child, &mut out);
        }
        out
    }

    /// Depth-first walk: every suite becomes a test group at the same
    /// config level, its direct tests become tests of that group.
    fn build_hierarchy(&mut self, ctx: &BuildContext, suite: &Task, out: &mut Vec<CollectedTest>) {
        let tests: Vec<&Task> = suite.children.iter().filter(|c| c.kind == TaskKind::Test).collect();
        self.build_group(ctx, &suite.name, Some(suite), &tests, out);
        for nested in suite.children.iter().filter(|c| c.kind == TaskKind::Suite) {
            self.build_hierarchy(ctx, nested, out);
        }
    }

    fn build_group(
        &mut self,
        ctx: &BuildContext,
        group_name: &str,
        suite: Option<&Task>,
        tests: &[&Task],
        out: &mut Vec<CollectedTest>,
    ) {
        let group_key = normalize_key(group_name);
        if let Some(suite) = suite {
            self.remember(suite, HierarchyAddress::group(&ctx.area.area, ctx.config, &group_key));
        }
        for test in tests {
            let address = HierarchyAddress::test(
                &ctx.area.area,
                ctx.config,
                &group_key,
                &test_key(group_name, &test.name),
            );
            self.remember(test, address.clone());
            out.push(CollectedTest {
                id: test.id.clone(),
                address: self.addresses[&test.id].clone(),
                names: DisplayNames {
                    area: ctx.area.area_name.clone(),
                    config: ctx.config_name.to_string(),
                    group: group_name.to_string(),
                    test: test.name.clone(),
                },
            });
        }
    }

    fn remember(&mut self, task: &Task, address: HierarchyAddress) {
        self.addresses.entry(task.id.clone()).or_insert(address);
        self.handles.entry(task.id.clone()).or_insert_with(|| task.handle());
    }

    pub fn address_of(&self, id: &TaskId) -> Option<&HierarchyAddress> {
        self.addresses.get(id)
    }

    pub fn handle_of(&self, id: &TaskId) -> Option<&TaskHandle> {
        self.handles.get(id)
    }

    pub fn is_test(&self, id: &TaskId) -> bool {
        self.handles.get(id).is_some_and(|h| h.kind == TaskKind::Test)
    }

    pub fn is_ignored(&self, id: &TaskId) -> bool {
        self.ignored.contains(id)
    }
}

struct BuildContext<'a> {
    area: &'a FileArea,
    config: &'a str,
    config_name: &'a str,
}

fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

fn file_stem(path: &str) -> String {
    let name = normalize_path(path);
    let base = name.rsplit('/').next().unwrap_or(&name).to_string();
    base.split('.').next().unwrap_or(&base).to_string()
}
