#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use cascade::config::HarnessSettings;
use cascade::emitter::{CiEmitter, MemorySink};
use cascade::ordering::OrderingEngine;
use cascade::reporter::HierarchyReporter;
use cascade::runner::{self, InbandRunner, Reporter, RunCounts, TestPlan};

/// Settings rooted in a scratch directory: logs under `logs/`, scenario
/// definitions under `scenarios/`, no flush pacing.
pub fn scratch_settings(root: &Path, scaffold_script: &str) -> HarnessSettings {
    HarnessSettings {
        log_root: root.join("logs"),
        scenarios_dir: root.join("scenarios"),
        flush_delay_ms: 0,
        box_width: 60,
        scaffold_command: vec!["sh".to_string(), "-c".to_string(), scaffold_script.to_string()],
        prompt_timeout_ms: 5_000,
        process_timeout_ms: 20_000,
        ..HarnessSettings::default()
    }
}

/// Write `scenarios/<config>/<file>` and return its path.
pub fn write_scenario(root: &Path, config: &str, file: &str, json: &str) -> PathBuf {
    let dir = root.join("scenarios").join(config);
    std::fs::create_dir_all(&dir).expect("create scenario dir");
    let path = dir.join(file);
    std::fs::write(&path, json).expect("write scenario");
    path
}

/// A reporter printing into memory.
pub fn memory_reporter(suite_absent: bool) -> (HierarchyReporter<MemorySink>, MemorySink) {
    let sink = MemorySink::new();
    let engine = OrderingEngine::new(CiEmitter::new(sink.clone(), 60), Duration::ZERO);
    (HierarchyReporter::new(engine).with_suite_absent(suite_absent), sink)
}

/// Run a plan in-band and feed every event to `reporter`.
pub async fn run_plan<R: Reporter>(plan: TestPlan, reporter: &mut R) -> RunCounts {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let handle = tokio::spawn(InbandRunner::new(tx).run(plan));
    reporter.on_init().await;
    while let Some(event) = rx.recv().await {
        runner::dispatch(&mut *reporter, event).await;
    }
    handle.await.expect("in-band runner panicked")
}

/// Index of the first line containing `needle`.
pub fn line_index(lines: &[String], needle: &str) -> usize {
    lines
        .iter()
        .position(|l| l.contains(needle))
        .unwrap_or_else(|| panic!("no line contains {:?}:\n{}", needle, lines.join("\n")))
}

/// Assert that the needles appear in this order.
pub fn assert_in_order(lines: &[String], needles: &[&str]) {
    let mut last = 0;
    for needle in needles {
        let idx = lines[last..]
            .iter()
            .position(|l| l.contains(needle))
            .map(|i| i + last)
            .unwrap_or_else(|| panic!("{:?} not found after line {}:\n{}", needle, last, lines.join("\n")));
        last = idx + 1;
    }
}
