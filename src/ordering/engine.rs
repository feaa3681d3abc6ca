use std::collections::HashMap;
use std::time::Duration;

use super::tree::BufferTree;
use crate::emitter::{CiEmitter, LineSink, StatusCounts, TestStatus};
use crate::hierarchy::{DisplayNames, HierarchyAddress, OpenPath, AREA_PRIORITY, CONFIG_NONE};

pub const NOTE_NO_OUTPUT: &str = "completed but did not provide any results";
pub const NOTE_BEFORE_DISPLAY: &str = "completed before display";

/// One step of a cascade. Each step yields at most one follow-up, so a
/// whole cascade runs as a flat loop.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Transition {
    OpenArea(String),
    OpenConfig(HierarchyAddress),
    OpenGroup(HierarchyAddress),
    OpenTest(HierarchyAddress),
    CloseTest(HierarchyAddress),
    CloseGroup(HierarchyAddress),
    CloseConfig(HierarchyAddress),
    CloseArea(String),
}

/// Re-serializes out-of-order test output into the fixed
/// Area → Config → Group → Test order.
///
/// Exactly one path is open at a time. Output for the open test is
/// emitted immediately; everything else waits in the test's buffer until
/// the cascade reaches it.
pub struct OrderingEngine<S: LineSink> {
    tree: BufferTree,
    open: OpenPath,
    emitter: CiEmitter<S>,
    flush_delay: Duration,
    started: bool,
    /// Set by `finish`: opened tests close right after their flush.
    forcing: bool,
    /// Output for tests that are not registered yet.
    orphans: HashMap<HierarchyAddress, Vec<String>>,
}

impl<S: LineSink> OrderingEngine<S> {
    pub fn new(emitter: CiEmitter<S>, flush_delay: Duration) -> Self {
        Self {
            tree: BufferTree::new(&AREA_PRIORITY),
            open: OpenPath::default(),
            emitter,
            flush_delay,
            started: false,
            forcing: false,
            orphans: HashMap::new(),
        }
    }

    pub fn emitter(&self) -> &CiEmitter<S> {
        &self.emitter
    }

    pub fn emitter_mut(&mut self) -> &mut CiEmitter<S> {
        &mut self.emitter
    }

    pub fn open_path(&self) -> &OpenPath {
        &self.open
    }

    pub fn tree(&self) -> &BufferTree {
        &self.tree
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn has_area(&self, area: &str) -> bool {
        self.tree.has_area(area)
    }

    pub fn is_complete(&self) -> bool {
        self.tree.all_complete()
    }

    pub fn counts(&self) -> StatusCounts {
        self.tree.counts()
    }

    /// Add a collected test. Registering the same address twice is a no-op.
    pub fn register(&mut self, addr: &HierarchyAddress, names: &DisplayNames) {
        if !self.tree.ensure(addr, names) {
            return;
        }
        if let Some(lines) = self.orphans.remove(addr) {
            if let Some(node) = self.tree.test_mut(addr) {
                node.lines.extend(lines);
            }
        }
    }

    /// Emit `content` if `addr` is the open test, buffer it otherwise.
    pub fn route_output(&mut self, addr: &HierarchyAddress, content: &str) {
        if addr.test.is_none() {
            tracing::debug!("Dropping output above test level for {}", addr);
            return;
        }
        if self.open.is_test(addr) {
            self.emitter.test_line(content);
            if let Some(node) = self.tree.test_mut(addr) {
                node.has_output = true;
            }
            return;
        }
        match self.tree.test_mut(addr) {
            Some(node) if node.complete => {
                tracing::debug!("Dropping output for closed test {}", addr);
            }
            Some(node) => node.lines.push(content.to_string()),
            None => self
                .orphans
                .entry(addr.clone())
                .or_default()
                .push(content.to_string()),
        }
    }

    /// Record a test's status. A terminal status on the open test closes it
    /// and advances the cascade.
    pub async fn set_status(&mut self, addr: &HierarchyAddress, status: TestStatus) {
        let Some(node) = self.tree.test_mut(addr) else {
            return;
        };
        if node.complete {
            return;
        }
        node.status = status;
        if status.is_terminal() && self.open.is_test(addr) {
            self.drive(Transition::CloseTest(addr.clone())).await;
        }
    }

    /// Begin streaming, or resume it when the previous cascade ran off the
    /// end of the tree and new areas have been collected since.
    pub async fn start(&mut self) {
        self.started = true;
        if !self.open.is_empty() {
            return;
        }
        if let Some(area) = self.tree.first_open_area() {
            self.drive(Transition::OpenArea(area)).await;
        }
    }

    /// Drain everything still on the tree, whatever its status.
    pub async fn finish(&mut self) {
        self.started = true;
        self.forcing = true;
        loop {
            self.tree.reopen_stale();
            let step = if let Some(test) = self.open_test_address() {
                Transition::CloseTest(test)
            } else if let Some(area) = self.open.area.clone() {
                Transition::CloseArea(area)
            } else if let Some(area) = self.tree.first_open_area() {
                Transition::OpenArea(area)
            } else {
                break;
            };
            self.drive(step).await;
        }
    }

    pub async fn open_area(&mut self, area: &str) {
        self.drive(Transition::OpenArea(area.to_string())).await;
    }

    /// Open a config. With `cascade_open`, its area is opened first if it
    /// is not the open one.
    pub async fn open_config(&mut self, addr: &HierarchyAddress, cascade_open: bool) {
        if cascade_open {
            self.open_ancestors(addr, 1);
        }
        self.drive(Transition::OpenConfig(config_address(addr))).await;
    }

    pub async fn open_test_group(&mut self, addr: &HierarchyAddress, cascade_open: bool) {
        if cascade_open {
            self.open_ancestors(addr, 2);
        }
        self.drive(Transition::OpenGroup(addr.group_only())).await;
    }

    pub async fn open_test(&mut self, addr: &HierarchyAddress, cascade_open: bool) {
        if cascade_open {
            self.open_ancestors(addr, 3);
        }
        self.drive(Transition::OpenTest(addr.clone())).await;
    }

    pub async fn close_test(&mut self, addr: &HierarchyAddress) {
        self.drive(Transition::CloseTest(addr.clone())).await;
    }

    pub async fn close_test_group(&mut self, addr: &HierarchyAddress) {
        self.drive(Transition::CloseGroup(addr.group_only())).await;
    }

    pub async fn close_config(&mut self, addr: &HierarchyAddress) {
        self.drive(Transition::CloseConfig(config_address(addr))).await;
    }

    pub async fn close_area(&mut self, area: &str) {
        self.drive(Transition::CloseArea(area.to_string())).await;
    }

    async fn drive(&mut self, first: Transition) {
        let mut next = Some(first);
        while let Some(step) = next {
            tracing::trace!("transition {:?}", step);
            next = match step {
                Transition::OpenArea(area) => self.apply_open_area(&area),
                Transition::OpenConfig(addr) => self.apply_open_config(&addr),
                Transition::OpenGroup(addr) => self.apply_open_group(&addr),
                Transition::OpenTest(addr) => self.apply_open_test(&addr).await,
                Transition::CloseTest(addr) => self.apply_close_test(&addr),
                Transition::CloseGroup(addr) => self.apply_close_group(&addr).await,
                Transition::CloseConfig(addr) => self.apply_close_config(&addr).await,
                Transition::CloseArea(area) => self.apply_close_area(&area).await,
            };
        }
    }

    /// Emit headers for the `levels` ancestors of `addr` that are not open,
    /// without cascading into their first children.
    fn open_ancestors(&mut self, addr: &HierarchyAddress, levels: usize) {
        if self.open.area.as_deref() != Some(addr.area.as_str()) {
            let Some(area) = self.tree.area(&addr.area) else {
                return;
            };
            let name = area.name.clone();
            self.open = OpenPath {
                area: Some(addr.area.clone()),
                ..OpenPath::default()
            };
            self.emitter.area_header(&name);
        }
        if levels < 2 {
            return;
        }
        if self.open.config.as_deref() != Some(addr.config.as_str()) {
            let Some(config) = self.tree.config(&addr.area, &addr.config) else {
                return;
            };
            let name = config.name.clone();
            self.open.config = Some(addr.config.clone());
            self.open.group = None;
            self.open.test = None;
            if addr.config != CONFIG_NONE {
                self.emitter.config_header(&name);
            }
        }
        if levels < 3 {
            return;
        }
        if self.open.group != addr.group {
            let Some(group) = self.tree.group(addr) else {
                return;
            };
            let name = group.name.clone();
            self.open.group = addr.group.clone();
            self.open.test = None;
            self.emitter.group_header(&name);
        }
    }

    fn apply_open_area(&mut self, area: &str) -> Option<Transition> {
        if self.open.area.as_deref() == Some(area) {
            return None;
        }
        let node = self.tree.area(area)?;
        if node.complete {
            return self.tree.first_open_area().map(Transition::OpenArea);
        }
        let name = node.name.clone();
        self.open = OpenPath {
            area: Some(area.to_string()),
            ..OpenPath::default()
        };
        self.emitter.area_header(&name);
        Some(self.next_config_or_close(area))
    }

    fn apply_open_config(&mut self, addr: &HierarchyAddress) -> Option<Transition> {
        if self.is_open_config(addr) {
            return None;
        }
        let node = self.tree.config(&addr.area, &addr.config)?;
        if node.complete {
            return Some(self.next_config_or_close(&addr.area));
        }
        let name = node.name.clone();
        self.open.config = Some(addr.config.clone());
        self.open.group = None;
        self.open.test = None;
        if addr.config != CONFIG_NONE {
            self.emitter.config_header(&name);
        }
        Some(self.next_group_or_close(addr))
    }

    fn apply_open_group(&mut self, addr: &HierarchyAddress) -> Option<Transition> {
        if self.is_open_group(addr) {
            return None;
        }
        let node = self.tree.group(addr)?;
        if node.complete {
            return Some(self.next_group_or_close(&config_address(addr)));
        }
        let name = node.name.clone();
        self.open.group = addr.group.clone();
        self.open.test = None;
        self.emitter.group_header(&name);
        Some(self.next_test_or_close(addr))
    }

    async fn apply_open_test(&mut self, addr: &HierarchyAddress) -> Option<Transition> {
        if self.open.is_test(addr) {
            return None;
        }
        let node = self.tree.test_mut(addr)?;
        if node.complete {
            return Some(self.next_test_or_close(&addr.group_only()));
        }
        node.opened = true;
        let name = node.name.clone();
        let lines = std::mem::take(&mut node.lines);

        self.open.test = addr.test.clone();
        self.emitter.test_header(&name);
        self.flush_lines(addr, lines).await;

        let status = self.tree.test(addr)?.status;
        if status.is_terminal() || self.forcing {
            Some(Transition::CloseTest(addr.clone()))
        } else {
            None
        }
    }

    fn apply_close_test(&mut self, addr: &HierarchyAddress) -> Option<Transition> {
        if !self.open.is_test(addr) {
            tracing::debug!("Ignoring close of {}: not the open test", addr);
            return None;
        }
        let node = self.tree.test_mut(addr)?;
        if node.complete {
            return None;
        }
        node.complete = true;
        let (name, status, has_output) = (node.name.clone(), node.status, node.has_output);

        if !has_output && status.is_terminal() {
            self.emitter.test_note(NOTE_NO_OUTPUT);
        }
        self.emitter.test_footer(&name, status);
        self.open.test = None;
        Some(self.next_test_or_close(&addr.group_only()))
    }

    async fn apply_close_group(&mut self, addr: &HierarchyAddress) -> Option<Transition> {
        if !self.complete_group(addr).await {
            return None;
        }
        Some(self.next_group_or_close(&config_address(addr)))
    }

    async fn apply_close_config(&mut self, addr: &HierarchyAddress) -> Option<Transition> {
        if !self.complete_config(addr).await {
            return None;
        }
        Some(self.next_config_or_close(&addr.area))
    }

    async fn apply_close_area(&mut self, area: &str) -> Option<Transition> {
        let node = self.tree.area(area)?;
        if node.complete {
            return None;
        }
        let configs = incomplete(&node.order, |k| node.configs.get(k).map(|c| c.complete));
        for config in configs {
            self.complete_config(&HierarchyAddress::config(area, &config)).await;
        }

        let node = self.tree.area_mut(area)?;
        node.complete = true;
        let (name, counts) = (node.name.clone(), node.counts());
        self.emitter.area_footer(&name, counts);
        self.open = OpenPath::default();
        self.tree.first_open_area().map(Transition::OpenArea)
    }

    /// Mark a group complete, force-flushing tests that never reached the
    /// open path. Returns false when it was already complete.
    async fn complete_group(&mut self, addr: &HierarchyAddress) -> bool {
        let Some(group) = self.tree.group(addr) else {
            return false;
        };
        if group.complete {
            return false;
        }
        if !self.is_open_group(addr) {
            let name = group.name.clone();
            self.emitter.group_header(&name);
        }
        let tests = incomplete(&group.order, |k| group.tests.get(k).map(|t| t.complete));
        for key in tests {
            let test = HierarchyAddress {
                test: Some(key),
                ..addr.group_only()
            };
            self.force_flush(&test).await;
        }

        let Some(group) = self.tree.group_mut(addr) else {
            return false;
        };
        group.complete = true;
        let (name, counts) = (group.name.clone(), group.counts());
        self.emitter.group_footer(&name, counts);
        if self.is_open_group(addr) {
            self.open.group = None;
            self.open.test = None;
        }
        true
    }

    async fn complete_config(&mut self, addr: &HierarchyAddress) -> bool {
        let Some(config) = self.tree.config(&addr.area, &addr.config) else {
            return false;
        };
        if config.complete {
            return false;
        }
        if !self.is_open_config(addr) && addr.config != CONFIG_NONE {
            let name = config.name.clone();
            self.emitter.config_header(&name);
        }
        let groups = incomplete(&config.order, |k| config.groups.get(k).map(|g| g.complete));
        for group in groups {
            self.complete_group(&HierarchyAddress::group(&addr.area, &addr.config, &group))
                .await;
        }

        let Some(config) = self.tree.config_mut(&addr.area, &addr.config) else {
            return false;
        };
        config.complete = true;
        let (name, counts) = (config.name.clone(), config.counts());
        if addr.config != CONFIG_NONE {
            self.emitter.config_footer(&name, counts);
        }
        if self.is_open_config(addr) {
            self.open.config = None;
            self.open.group = None;
            self.open.test = None;
        }
        true
    }

    /// Emit a test that is being completed by its group rather than by its
    /// own terminal status.
    async fn force_flush(&mut self, addr: &HierarchyAddress) {
        let was_open = self.open.is_test(addr);
        let Some(node) = self.tree.test_mut(addr) else {
            return;
        };
        node.complete = true;
        let lines = std::mem::take(&mut node.lines);
        let (name, status, opened) = (node.name.clone(), node.status, node.opened);
        let had_output = node.has_output || !lines.is_empty();

        if !was_open {
            self.emitter.test_header(&name);
            if status.is_terminal() && !opened && !lines.is_empty() {
                self.emitter.test_note(NOTE_BEFORE_DISPLAY);
            }
        }
        self.flush_lines(addr, lines).await;
        if !had_output && status.is_terminal() {
            self.emitter.test_note(NOTE_NO_OUTPUT);
        }
        self.emitter.test_footer(&name, status);
        if was_open {
            self.open.test = None;
        }
    }

    async fn flush_lines(&mut self, addr: &HierarchyAddress, lines: Vec<String>) {
        if lines.is_empty() {
            return;
        }
        for (i, line) in lines.iter().enumerate() {
            if i > 0 && !self.flush_delay.is_zero() {
                tokio::time::sleep(self.flush_delay).await;
            }
            self.emitter.test_line(line);
        }
        if let Some(node) = self.tree.test_mut(addr) {
            node.has_output = true;
        }
    }

    fn next_config_or_close(&self, area: &str) -> Transition {
        match self.tree.first_open_config(area) {
            Some(config) => Transition::OpenConfig(HierarchyAddress::config(area, &config)),
            None => Transition::CloseArea(area.to_string()),
        }
    }

    fn next_group_or_close(&self, config: &HierarchyAddress) -> Transition {
        match self.tree.first_open_group(&config.area, &config.config) {
            Some(group) => {
                Transition::OpenGroup(HierarchyAddress::group(&config.area, &config.config, &group))
            }
            None => Transition::CloseConfig(config_address(config)),
        }
    }

    fn next_test_or_close(&self, group: &HierarchyAddress) -> Transition {
        match self.tree.first_open_test(group) {
            Some(test) => Transition::OpenTest(HierarchyAddress {
                test: Some(test),
                ..group.group_only()
            }),
            None => Transition::CloseGroup(group.group_only()),
        }
    }

    fn is_open_config(&self, addr: &HierarchyAddress) -> bool {
        self.open.area.as_deref() == Some(addr.area.as_str())
            && self.open.config.as_deref() == Some(addr.config.as_str())
    }

    fn is_open_group(&self, addr: &HierarchyAddress) -> bool {
        self.is_open_config(addr) && addr.group.is_some() && self.open.group == addr.group
    }

    fn open_test_address(&self) -> Option<HierarchyAddress> {
        Some(HierarchyAddress::test(
            self.open.area.as_deref()?,
            self.open.config.as_deref()?,
            self.open.group.as_deref()?,
            self.open.test.as_deref()?,
        ))
    }
}

fn config_address(addr: &HierarchyAddress) -> HierarchyAddress {
    HierarchyAddress::config(&addr.area, &addr.config)
}

fn incomplete<F>(order: &[String], complete: F) -> Vec<String>
where
    F: Fn(&str) -> Option<bool>,
{
    order
        .iter()
        .filter(|k| complete(k) == Some(false))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::MemorySink;

    fn engine() -> (OrderingEngine<MemorySink>, MemorySink) {
        let sink = MemorySink::new();
        let emitter = CiEmitter::new(sink.clone(), 60);
        (OrderingEngine::new(emitter, Duration::ZERO), sink)
    }

    fn add(engine: &mut OrderingEngine<MemorySink>, area: &str, config: &str, group: &str, test: &str) -> HierarchyAddress {
        let addr = HierarchyAddress::from_names(area, config, group, test);
        let names = DisplayNames {
            area: area.to_string(),
            config: config.to_string(),
            group: group.to_string(),
            test: test.to_string(),
        };
        engine.register(&addr, &names);
        addr
    }

    fn position(lines: &[String], needle: &str) -> usize {
        lines
            .iter()
            .position(|l| l.contains(needle))
            .unwrap_or_else(|| panic!("{:?} not found in {:#?}", needle, lines))
    }

    /// Lines between each test header and its footer belong to that test.
    fn assert_not_interleaved(lines: &[String]) {
        let mut current: Option<String> = None;
        for line in lines {
            if let Some(name) = line.trim_start_matches('│').trim().strip_prefix("• ") {
                assert!(current.is_none(), "test {} opened while {:?} open", name, current);
                current = Some(name.to_string());
            } else if let Some(name) = &current {
                let body = line.trim_start_matches('│').trim();
                if body.ends_with(name.as_str()) && !body.starts_with("out-") {
                    current = None;
                } else if let Some(owner) = body.strip_prefix("out-") {
                    assert!(owner.starts_with(name.as_str()), "{} leaked into {}", body, name);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_out_of_order_completion_replays_in_declared_order() {
        let (mut engine, sink) = engine();
        let a = add(&mut engine, "suite", "none", "g", "A");
        let b = add(&mut engine, "suite", "none", "g", "B");
        engine.start().await;
        assert!(engine.open_path().is_test(&a));

        engine.route_output(&b, "out-B 1");
        engine.set_status(&b, TestStatus::Pass).await;
        engine.route_output(&a, "out-A 1");
        engine.set_status(&a, TestStatus::Pass).await;

        let lines = sink.lines();
        assert!(position(&lines, "out-A 1") < position(&lines, "• B"));
        assert!(position(&lines, "✅ A") < position(&lines, "out-B 1"));
        assert_eq!(lines.iter().filter(|l| l.contains("out-B 1")).count(), 1);
        assert_not_interleaved(&lines);
        assert!(engine.is_complete());
    }

    #[tokio::test]
    async fn test_buffered_output_keeps_arrival_order() {
        let (mut engine, sink) = engine();
        let a = add(&mut engine, "suite", "none", "g", "A");
        let b = HierarchyAddress::from_names("suite", "none", "g", "B");
        // Output before B is even collected.
        engine.route_output(&b, "out-B 1");
        add(&mut engine, "suite", "none", "g", "B");
        engine.route_output(&b, "out-B 2");
        engine.route_output(&b, "out-B 3");

        engine.start().await;
        engine.set_status(&a, TestStatus::Pass).await;
        engine.set_status(&b, TestStatus::Fail).await;

        let lines = sink.lines();
        let p1 = position(&lines, "out-B 1");
        let p2 = position(&lines, "out-B 2");
        let p3 = position(&lines, "out-B 3");
        assert!(p1 < p2 && p2 < p3);
        assert!(lines.iter().any(|l| l.contains("❌ B")));
    }

    #[tokio::test]
    async fn test_area_priority_ignores_collection_order() {
        let (mut engine, sink) = engine();
        let sc = add(&mut engine, "scenarios", "basic", "s1", "scaffold");
        let su = add(&mut engine, "suite", "none", "infra", "db");
        let sh = add(&mut engine, "schema", "main", "files", "basic.json");
        engine.start().await;
        engine.set_status(&sc, TestStatus::Pass).await;
        engine.set_status(&sh, TestStatus::Pass).await;
        engine.set_status(&su, TestStatus::Pass).await;

        let lines = sink.lines();
        let suite = position(&lines, "┌─ SUITE");
        let schema = position(&lines, "┌─ SCHEMA");
        let scenarios = position(&lines, "┌─ SCENARIOS");
        assert!(suite < schema && schema < scenarios);
        assert!(engine.is_complete());
    }

    #[tokio::test]
    async fn test_completion_cascade_reaches_root() {
        let (mut engine, sink) = engine();
        let a = add(&mut engine, "scenarios", "basic", "s1", "scaffold");
        let b = add(&mut engine, "scenarios", "basic", "s2", "scaffold");
        let c = add(&mut engine, "scenarios", "extra", "s3", "scaffold");
        engine.start().await;
        for addr in [&a, &b, &c] {
            engine.set_status(addr, TestStatus::Pass).await;
        }
        assert!(engine.is_complete());
        assert!(engine.open_path().is_empty());

        let before = sink.lines().len();
        engine.start().await;
        engine.close_area("scenarios").await;
        assert_eq!(sink.lines().len(), before, "no opens after the root closed");

        let lines = sink.lines();
        assert!(position(&lines, "⚙ basic") < position(&lines, "⚙ extra"));
        assert!(lines.last().unwrap().starts_with("└─ ✅ scenarios: 3 passed"));
    }

    #[tokio::test]
    async fn test_silent_test_gets_note() {
        let (mut engine, sink) = engine();
        let a = add(&mut engine, "suite", "none", "g", "quiet");
        engine.start().await;
        engine.set_status(&a, TestStatus::Pass).await;
        let lines = sink.lines();
        assert!(lines.iter().any(|l| l.contains(NOTE_NO_OUTPUT)));
    }

    #[tokio::test]
    async fn test_double_close_is_noop() {
        let (mut engine, sink) = engine();
        let a = add(&mut engine, "suite", "none", "g", "A");
        add(&mut engine, "suite", "none", "g", "B");
        engine.start().await;
        engine.set_status(&a, TestStatus::Pass).await;
        engine.set_status(&a, TestStatus::Fail).await;
        engine.close_test(&a).await;
        let lines = sink.lines();
        assert_eq!(lines.iter().filter(|l| l.contains("✅ A")).count(), 1);
        assert!(!lines.iter().any(|l| l.contains("❌ A")));
    }

    #[tokio::test]
    async fn test_close_group_flushes_tests_finished_off_path() {
        let (mut engine, sink) = engine();
        let a = add(&mut engine, "suite", "none", "g", "A");
        let b = add(&mut engine, "suite", "none", "g", "B");
        engine.start().await;
        engine.route_output(&b, "out-B early");
        engine.set_status(&b, TestStatus::Pass).await;

        engine.close_test_group(&a).await;
        let lines = sink.lines();
        let marker = position(&lines, NOTE_BEFORE_DISPLAY);
        assert!(position(&lines, "• B") < marker);
        assert!(marker < position(&lines, "out-B early"));
        assert_eq!(lines.iter().filter(|l| l.contains("g: ")).count(), 1);

        // The natural cascade must not emit a second group footer.
        engine.set_status(&a, TestStatus::Pass).await;
        assert_eq!(sink.lines().iter().filter(|l| l.contains("g: ")).count(), 1);
    }

    #[tokio::test]
    async fn test_output_above_test_level_dropped() {
        let (mut engine, sink) = engine();
        let a = add(&mut engine, "suite", "none", "g", "A");
        engine.start().await;
        engine.route_output(&a.group_only(), "lost");
        engine.set_status(&a, TestStatus::Pass).await;
        assert!(!sink.lines().iter().any(|l| l.contains("lost")));
    }

    #[tokio::test]
    async fn test_finish_drains_unfinished_tests() {
        let (mut engine, sink) = engine();
        let a = add(&mut engine, "suite", "none", "g", "A");
        let b = add(&mut engine, "schema", "main", "files", "x.json");
        engine.route_output(&b, "out-x.json buffered");
        engine.start().await;
        engine.route_output(&a, "out-A live");
        engine.finish().await;

        let lines = sink.lines();
        assert!(lines.iter().any(|l| l.contains("⏳ A")));
        assert!(lines.iter().any(|l| l.contains("out-x.json buffered")));
        assert!(lines.iter().any(|l| l.contains("1 unfinished")));
        assert!(engine.is_complete());
    }

    #[tokio::test]
    async fn test_late_test_shown_on_finish() {
        let (mut engine, sink) = engine();
        let a = add(&mut engine, "suite", "none", "g", "A");
        engine.start().await;
        engine.set_status(&a, TestStatus::Pass).await;
        assert!(engine.is_complete());

        let late = add(&mut engine, "suite", "none", "g", "late");
        engine.route_output(&late, "out-late 1");
        engine.set_status(&late, TestStatus::Pass).await;
        engine.finish().await;
        let lines = sink.lines();
        assert!(position(&lines, "• late") < position(&lines, "out-late 1"));
        assert!(engine.is_complete());
    }

    #[tokio::test]
    async fn test_open_test_with_ancestor_cascade() {
        let (mut engine, sink) = engine();
        add(&mut engine, "scenarios", "basic", "s1", "scaffold");
        let env = add(&mut engine, "scenarios", "basic", "s1", "env");
        engine.open_test(&env, true).await;
        assert!(engine.open_path().is_test(&env));
        let lines = sink.lines();
        assert_eq!(position(&lines, "SCENARIOS"), 0);
        assert!(position(&lines, "⚙ basic") < position(&lines, "▸ s1"));
        assert!(!lines.iter().any(|l| l.contains("• scaffold")));
    }

    #[tokio::test]
    async fn test_open_area_and_config_are_idempotent() {
        let (mut engine, sink) = engine();
        let t = add(&mut engine, "schema", "main", "definitions", "a.json");
        engine.open_area("schema").await;
        engine.open_area("schema").await;
        engine.open_config(&t, false).await;
        assert!(engine.open_path().is_test(&t));
        let lines = sink.lines();
        assert_eq!(lines.iter().filter(|l| l.contains("┌─ SCHEMA")).count(), 1);
        assert_eq!(lines.iter().filter(|l| l.contains("⚙ main")).count(), 1);
    }

    #[tokio::test]
    async fn test_close_config_moves_to_next_config() {
        let (mut engine, sink) = engine();
        let t1 = add(&mut engine, "scenarios", "alpha", "g", "t1");
        let t2 = add(&mut engine, "scenarios", "beta", "g", "t2");

        engine.open_test_group(&t2, true).await;
        assert!(engine.open_path().is_test(&t2));
        engine.route_output(&t2, "out-t2 1");
        engine.close_config(&t2).await;
        assert!(engine.open_path().is_test(&t1));

        let lines = sink.lines();
        assert!(position(&lines, "⚙ beta") < position(&lines, "out-t2 1"));
        assert!(position(&lines, "⏳ t2") < position(&lines, "⚙ alpha"));
        assert!(lines.iter().any(|l| l.contains("beta: 0 passed · 0 failed · 0 skipped · 1 unfinished")));

        engine.set_status(&t1, TestStatus::Pass).await;
        assert!(engine.is_complete());
    }
}
