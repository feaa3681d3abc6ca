use std::time::Duration;

use cascade::config::{self, HarnessSettings};
use cascade::detail::{DetailStore, DetailWatcher};
use cascade::emitter::{CiEmitter, StdoutSink};
use cascade::hierarchy::AREA_SUITE;
use cascade::logger::{RunPaths, RunStamp};
use cascade::ordering::OrderingEngine;
use cascade::reporter::{self, HierarchyReporter};
use cascade::runner::{self, InbandRunner, Reporter};
use cascade::setup::{self, RunSession};
use cascade::{suites, summary, Error, Result};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "Usage:
  cascade run [--only suite|schema|scenarios]... [--no-fixture]
  cascade exec [--no-fixture] [--no-suite] -- <runner command...>
  cascade summary <stamp>";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = match args.first().map(|s| s.as_str()) {
        Some("run") => run(&args[1..]).await,
        Some("exec") => exec(&args[1..]).await,
        Some("summary") => show_summary(&args[1..]),
        _ => Err(Error::Usage("expected a command".to_string())),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e @ Error::Usage(_)) => {
            eprintln!("{}\n{}", e, USAGE);
            std::process::exit(2);
        }
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}

fn settings() -> HarnessSettings {
    let cwd = std::env::current_dir().ok();
    config::resolve(cwd.as_deref())
}

fn reporter_for(session: &RunSession, suite_absent: bool) -> HierarchyReporter<StdoutSink> {
    let emitter = CiEmitter::new(StdoutSink, session.settings.box_width);
    let engine = OrderingEngine::new(emitter, Duration::from_millis(session.settings.flush_delay_ms));
    HierarchyReporter::new(engine)
        .with_suite_absent(suite_absent)
        .with_detail_watch(DetailWatcher::new(session.store.clone()), session.log.clone())
}

async fn run(args: &[String]) -> Result<i32> {
    let mut only = Vec::new();
    let mut with_fixture = true;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--only" => {
                let area = iter
                    .next()
                    .ok_or_else(|| Error::Usage("--only needs an area".to_string()))?;
                only.push(area.clone());
            }
            "--no-fixture" => with_fixture = false,
            other => return Err(Error::Usage(format!("unknown option '{}'", other))),
        }
    }
    // Reject a bad selection before anything is provisioned.
    suites::check_areas(&only)?;

    let session = setup::global_setup(settings(), with_fixture).await?;
    let plan = suites::build_plan(&session.suite_context(), &only)?;
    let suite_absent = !only.is_empty() && !only.iter().any(|a| a == AREA_SUITE);
    let mut reporter = reporter_for(&session, suite_absent);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let inband = tokio::spawn(InbandRunner::new(tx).run(plan));
    reporter.on_init().await;
    while let Some(event) = rx.recv().await {
        runner::dispatch(&mut reporter, event).await;
    }
    let counts = inband.await.unwrap_or_else(|e| {
        tracing::error!("In-band runner aborted: {}", e);
        Default::default()
    });
    tracing::info!(
        "Run complete: {} passed, {} failed, {} skipped",
        counts.passed,
        counts.failed,
        counts.skipped
    );

    let finish = session
        .teardown(reporter.engine_mut().emitter_mut(), counts.failed > 0)
        .await;
    Ok(finish.exit_code)
}

async fn exec(args: &[String]) -> Result<i32> {
    let split = args
        .iter()
        .position(|a| a == "--")
        .ok_or_else(|| Error::Usage("exec needs '-- <runner command>'".to_string()))?;
    let (options, command) = (&args[..split], &args[split + 1..]);
    if command.is_empty() {
        return Err(Error::Usage("empty runner command".to_string()));
    }
    let mut with_fixture = true;
    let mut suite_absent = reporter::suite_absent_from_env();
    for option in options {
        match option.as_str() {
            "--no-fixture" => with_fixture = false,
            "--no-suite" => suite_absent = true,
            other => return Err(Error::Usage(format!("unknown option '{}'", other))),
        }
    }

    let session = setup::global_setup(settings(), with_fixture).await?;
    let mut reporter = reporter_for(&session, suite_absent);
    let cwd = std::env::current_dir().ok();
    let code = runner::run_external(command, cwd.as_deref(), &mut reporter, &session.log).await?;

    let tests_failed = code != Some(0) || reporter.engine().counts().failed > 0;
    let finish = session
        .teardown(reporter.engine_mut().emitter_mut(), tests_failed)
        .await;
    Ok(finish.exit_code)
}

fn show_summary(args: &[String]) -> Result<i32> {
    let [stamp] = args else {
        return Err(Error::Usage("summary needs exactly one run stamp".to_string()));
    };
    let settings = settings();
    let paths = RunPaths::new(settings.log_root.clone(), RunStamp::from(stamp.as_str()));
    if !paths.e2e_dir().is_dir() {
        return Err(Error::Usage(format!("no run found at {}", paths.run_dir().display())));
    }
    let store = DetailStore::for_run(&paths);
    let report = summary::summarise(&store, paths.stamp());
    let mut emitter = CiEmitter::new(StdoutSink, settings.box_width);
    summary::render(&report, &mut emitter);
    Ok(summary::exit_code(&report, false))
}
