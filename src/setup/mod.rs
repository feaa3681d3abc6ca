//! Global setup and teardown around one run.

use std::sync::Arc;

use crate::config::HarnessSettings;
use crate::detail::DetailStore;
use crate::emitter::{CiEmitter, LineSink};
use crate::fixture::{self, PostgresFixture};
use crate::logger::{Logger, RunPaths, RunStamp};
use crate::reporter::LOGS_POINTER;
use crate::suites::SuiteContext;
use crate::summary::{self, RunReport};
use crate::Result;

/// State shared from global setup to teardown.
pub struct RunSession {
    pub settings: Arc<HarnessSettings>,
    pub paths: RunPaths,
    pub store: DetailStore,
    pub log: Logger,
    fixture: Option<PostgresFixture>,
    fixture_enabled: bool,
}

/// Outcome of teardown.
#[derive(Debug)]
pub struct RunFinish {
    pub report: RunReport,
    pub exit_code: i32,
}

/// Stamp the run, lay out its directories and provision the database.
/// A provisioning failure is recorded and published, never returned.
pub async fn global_setup(settings: HarnessSettings, with_fixture: bool) -> Result<RunSession> {
    let stamp = RunStamp::from_env_or_claim(&settings.log_root)?;
    stamp.publish();

    let paths = RunPaths::new(settings.log_root.clone(), stamp);
    paths.ensure_dirs()?;
    let store = DetailStore::for_run(&paths);
    store.init()?;

    let log = Logger::new(paths.suite_log())
        .with_width(settings.box_width)
        .with_timestamps();
    log.boxed(
        "run",
        &[
            format!("stamp: {}", paths.stamp()),
            format!("logs: {}", paths.run_dir().display()),
            format!("fixture: {}", if with_fixture { "postgres" } else { "disabled" }),
        ],
    )?;

    let fixture = if with_fixture {
        match PostgresFixture::provision(&settings, &log).await {
            Ok(fixture) => {
                fixture.endpoint().publish();
                Some(fixture)
            }
            Err(e) => {
                let cause = e.to_string();
                tracing::error!("Fixture provisioning failed: {}", cause);
                log.boxed("fixture failed", &[cause.as_str()])?;
                fixture::publish_error(&cause);
                None
            }
        }
    } else {
        None
    };

    Ok(RunSession {
        settings: Arc::new(settings),
        paths,
        store,
        log,
        fixture,
        fixture_enabled: with_fixture,
    })
}

impl RunSession {
    pub fn suite_context(&self) -> SuiteContext {
        SuiteContext {
            settings: Arc::clone(&self.settings),
            paths: self.paths.clone(),
            store: self.store.clone(),
            fixture_enabled: self.fixture_enabled,
        }
    }

    /// Summarise, write `_summary.json`, remove the fixture and print the
    /// log-location pointer. The pointer is printed even when earlier steps
    /// fail.
    pub async fn teardown<S: LineSink>(self, emitter: &mut CiEmitter<S>, tests_failed: bool) -> RunFinish {
        let report = summary::summarise(&self.store, self.paths.stamp());
        summary::render(&report, emitter);
        match summary::write(&report, &self.paths) {
            Ok(path) => {
                let _ = self.log.line(&format!("summary written to {}", path.display()));
            }
            Err(e) => tracing::error!("Failed to write summary: {}", e),
        }

        if let Some(fixture) = &self.fixture {
            fixture.teardown().await;
        }

        let exit_code = summary::exit_code(&report, tests_failed);
        let _ = self.log.line(&format!("run finished, exit code {}", exit_code));
        emitter.raw(&format!("{} {}", LOGS_POINTER, self.paths.run_dir().display()));
        RunFinish { report, exit_code }
    }
}
