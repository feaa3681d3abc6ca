use std::time::Duration;

use super::{record_entry, SuiteContext, SUITE_TEST_FILE};
use crate::detail::DetailKind;
use crate::fixture::{self, DbEndpoint};
use crate::logger::Logger;
use crate::runner::{Outcome, SuiteDef, TestCase, TestContext, TestFile};
use crate::{Error, Result};

const FIXTURE_DISABLED: &str = "fixture disabled for this run";

pub(super) fn file(ctx: &SuiteContext) -> TestFile {
    let suite = SuiteDef::new("infra")
        .test(case(ctx, "database provisioned", fixture_ready))
        .test(case(ctx, "database accepts connections", accepts_connections))
        .test(case(ctx, "log directory writable", log_dir_writable));
    TestFile::new(SUITE_TEST_FILE).suite(suite)
}

fn case<F, Fut>(ctx: &SuiteContext, name: &'static str, check: F) -> TestCase
where
    F: FnOnce(TestContext, SuiteContext) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<Outcome>> + Send + 'static,
{
    let ctx = ctx.clone();
    TestCase::new(name, move |t| async move {
        let store = ctx.store.clone();
        let result = check(t, ctx).await;
        record_entry(&store, DetailKind::Suite, name, result)
    })
}

fn published_endpoint() -> Result<DbEndpoint> {
    if let Some(cause) = fixture::fixture_error() {
        return Err(Error::FixtureUnavailable(cause));
    }
    DbEndpoint::from_env()
        .ok_or_else(|| Error::FixtureUnavailable("connection details were never published".to_string()))
}

async fn fixture_ready(t: TestContext, ctx: SuiteContext) -> Result<Outcome> {
    if !ctx.fixture_enabled {
        return Ok(Outcome::Skipped(FIXTURE_DISABLED.to_string()));
    }
    let endpoint = published_endpoint()?;
    t.log(format!(
        "postgres at {}:{} database {}",
        endpoint.host, endpoint.port, endpoint.database
    ));
    Ok(Outcome::Passed)
}

async fn accepts_connections(t: TestContext, ctx: SuiteContext) -> Result<Outcome> {
    if !ctx.fixture_enabled {
        return Ok(Outcome::Skipped(FIXTURE_DISABLED.to_string()));
    }
    let endpoint = published_endpoint()?;
    let retries = ctx.settings.db_connect_retries;
    let backoff = Duration::from_millis(ctx.settings.db_connect_backoff_ms);
    fixture::wait_for_tcp(&endpoint.host, endpoint.port, retries, backoff).await?;
    t.log(format!("TCP connect to {}:{} ok", endpoint.host, endpoint.port));
    Ok(Outcome::Passed)
}

async fn log_dir_writable(t: TestContext, ctx: SuiteContext) -> Result<Outcome> {
    let log = Logger::new(ctx.paths.area_log("suite"));
    log.line("infra: log directory probe")?;
    let probe = ctx.paths.e2e_dir().join(".write-probe");
    tokio::fs::write(&probe, b"ok").await?;
    tokio::fs::remove_file(&probe).await?;
    t.log(format!("writing to {}", ctx.paths.e2e_dir().display()));
    Ok(Outcome::Passed)
}
