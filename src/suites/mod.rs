//! The harness's own test bodies: infra sanity, scenario definition
//! validation and scaffolding scenarios.

mod infra;
mod scenarios;
mod schema;

use std::sync::Arc;

use crate::config::HarnessSettings;
use crate::detail::{DetailKind, DetailStore, Severity};
use crate::hierarchy::{AREA_SCENARIOS, AREA_SCHEMA, AREA_SUITE};
use crate::logger::RunPaths;
use crate::runner::{Outcome, TestPlan};
use crate::{Error, Result};

pub use scenarios::{
    evaluate_env, evaluate_files, load_definitions, parse_definition, DefinitionFile, EnvExpectations,
    EnvReport, FileExpectations, FilesReport, ScenarioDef,
};
pub use schema::validator_argv;

pub const SUITE_TEST_FILE: &str = "e2e/suite.test.rs";
pub const SCHEMA_TEST_FILE: &str = "e2e/schema.test.rs";

pub fn scenario_test_file(config: &str) -> String {
    format!("e2e/scenarios/{}/scenarios.test.rs", config)
}

pub const KNOWN_AREAS: [&str; 3] = [AREA_SUITE, AREA_SCHEMA, AREA_SCENARIOS];

/// Everything a test body needs from the run.
#[derive(Debug, Clone)]
pub struct SuiteContext {
    pub settings: Arc<HarnessSettings>,
    pub paths: RunPaths,
    pub store: DetailStore,
    pub fixture_enabled: bool,
}

pub fn check_areas(only: &[String]) -> Result<()> {
    match only.iter().find(|a| !KNOWN_AREAS.contains(&a.as_str())) {
        Some(unknown) => Err(Error::Usage(format!(
            "unknown area '{}', expected one of {}",
            unknown,
            KNOWN_AREAS.join(", ")
        ))),
        None => Ok(()),
    }
}

/// Build the plan for the selected areas; an empty selection means all.
pub fn build_plan(ctx: &SuiteContext, only: &[String]) -> Result<TestPlan> {
    check_areas(only)?;
    let wants = |area: &str| only.is_empty() || only.iter().any(|a| a == area);

    let definitions = if wants(AREA_SCHEMA) || wants(AREA_SCENARIOS) {
        load_definitions(&ctx.settings.scenarios_dir)
    } else {
        Vec::new()
    };

    let mut plan = TestPlan::new();
    if wants(AREA_SUITE) {
        plan.add(infra::file(ctx));
    }
    if wants(AREA_SCHEMA) {
        plan.add(schema::file(ctx, &definitions));
    }
    if wants(AREA_SCENARIOS) {
        for file in scenarios::files(ctx, &definitions) {
            plan.add(file);
        }
    }
    Ok(plan)
}

/// Append a list entry for a finished suite or schema test and pass the
/// result through. A skip is recorded as a warning.
fn record_entry(
    store: &DetailStore,
    kind: DetailKind,
    label: &str,
    result: Result<Outcome>,
) -> Result<Outcome> {
    let (severity, message) = match &result {
        Ok(Outcome::Passed) => (Severity::Ok, label.to_string()),
        Ok(Outcome::Skipped(reason)) => (Severity::Warn, format!("{}: {}", label, reason)),
        Err(e) => (Severity::Fail, format!("{}: {}", label, e)),
    };
    if let Err(e) = store.append(kind, severity, message) {
        tracing::warn!("Could not record {} detail for {}: {}", kind.area(), label, e);
    }
    result
}
