use std::path::Path;
use std::time::Duration;

use super::scenarios::DefinitionFile;
use super::{record_entry, SuiteContext, SCHEMA_TEST_FILE};
use crate::detail::DetailKind;
use crate::logger::Logger;
use crate::process::{self, CommandSpec};
use crate::runner::{Outcome, SuiteDef, TestCase, TestContext, TestFile};
use crate::{Error, Result};

/// One concurrent test per definition file.
pub(super) fn file(ctx: &SuiteContext, definitions: &[DefinitionFile]) -> TestFile {
    let mut suite = SuiteDef::new("definitions").concurrent();
    for def in definitions {
        let ctx = ctx.clone();
        let def = def.clone();
        suite = suite.test(TestCase::new(def.rel.clone(), move |t| async move {
            let store = ctx.store.clone();
            let label = def.rel.clone();
            let result = validate(&t, &ctx, &def).await;
            record_entry(&store, DetailKind::Schema, &label, result)
        }));
    }
    TestFile::new(SCHEMA_TEST_FILE).suite(suite)
}

/// Substitute `{schema}` and `{data}` in a validator command template.
pub fn validator_argv(template: &[String], schema: &Path, data: &Path) -> Vec<String> {
    let schema = schema.display().to_string();
    let data = data.display().to_string();
    template
        .iter()
        .map(|arg| arg.replace("{schema}", &schema).replace("{data}", &data))
        .collect()
}

async fn validate(t: &TestContext, ctx: &SuiteContext, def: &DefinitionFile) -> Result<Outcome> {
    let text = tokio::fs::read_to_string(&def.path).await?;
    serde_json::from_str::<serde_json::Value>(&text).map_err(|e| Error::InvalidScenario {
        path: def.rel.clone(),
        reason: e.to_string(),
    })?;
    t.log("well-formed JSON");

    let settings = &ctx.settings;
    if settings.schema_validator.is_empty() {
        t.log("⚠️ no schema validator configured, structure not checked");
        return Ok(Outcome::Skipped("no schema validator configured".to_string()));
    }

    let argv = validator_argv(&settings.schema_validator, &settings.schema_file, &def.path);
    let spec = CommandSpec::from_argv(&argv)?.timeout(Duration::from_millis(settings.process_timeout_ms));
    let log = Logger::new(ctx.paths.area_log("schema")).with_width(settings.box_width);
    let output = process::run(&spec, Some(&log)).await?;
    if output.timed_out {
        return Err(Error::ProcessTimeout {
            program: spec.program.clone(),
            timeout_ms: settings.process_timeout_ms,
        });
    }
    if !output.success() {
        let detail = if output.stderr.trim().is_empty() { &output.stdout } else { &output.stderr };
        return Err(Error::Assertion(format!(
            "{} rejected by validator: {}",
            def.rel,
            process::last_lines(detail, 5)
        )));
    }
    t.log(format!("valid against {}", settings.schema_file.display()));
    Ok(Outcome::Passed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_validator_argv_placeholders() {
        let template: Vec<String> = ["ajv", "validate", "-s", "{schema}", "-d", "{data}", "--spec={schema}"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let argv = validator_argv(
            &template,
            &PathBuf::from("schemas/scenario.schema.json"),
            &PathBuf::from("scenarios/basic/app.json"),
        );
        assert_eq!(argv[3], "schemas/scenario.schema.json");
        assert_eq!(argv[5], "scenarios/basic/app.json");
        assert_eq!(argv[6], "--spec=schemas/scenario.schema.json");
    }
}
