//! Per-run log files.
//!
//! Every run writes under `<logRoot>/<stamp>/`: the global narrative goes to
//! `suite.log`, each test area or scenario gets `e2e/<sanitizedName>.log`.
//! The stamp travels between components through [`RUN_STAMP_ENV`].

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::format;
use crate::Result;

pub const RUN_STAMP_ENV: &str = "E2E_RUN_STAMP";
pub const LOG_ROOT_ENV: &str = "E2E_LOG_ROOT";

/// Time-derived identifier namespacing one run's logs and artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStamp(String);

impl RunStamp {
    pub fn new() -> Self {
        Self(chrono::Local::now().format("%Y%m%d-%H%M%S").to_string())
    }

    /// Reuse the stamp published by global setup, or claim a new one
    /// under `root`.
    pub fn from_env_or_claim(root: &Path) -> Result<Self> {
        match std::env::var(RUN_STAMP_ENV) {
            Ok(s) if !s.trim().is_empty() => Ok(Self(s.trim().to_string())),
            _ => Self::claim(root),
        }
    }

    /// Mint a stamp and create its run directory under `root`. A run
    /// started in the same second as an earlier one gets `-2`, `-3` and so
    /// on appended, so no two runs share detail files.
    pub fn claim(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        let base = Self::new();
        let mut stamp = base.clone();
        let mut n = 1;
        loop {
            match std::fs::create_dir(root.join(stamp.as_str())) {
                Ok(()) => return Ok(stamp),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    n += 1;
                    stamp = Self(format!("{}-{}", base.0, n));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn publish(&self) {
        std::env::set_var(RUN_STAMP_ENV, &self.0);
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunStamp {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for RunStamp {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for RunStamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Path conventions for one run.
#[derive(Debug, Clone)]
pub struct RunPaths {
    root: PathBuf,
    stamp: RunStamp,
}

impl RunPaths {
    pub fn new(root: impl Into<PathBuf>, stamp: RunStamp) -> Self {
        Self { root: root.into(), stamp }
    }

    pub fn stamp(&self) -> &RunStamp {
        &self.stamp
    }

    pub fn run_dir(&self) -> PathBuf {
        self.root.join(self.stamp.as_str())
    }

    pub fn suite_log(&self) -> PathBuf {
        self.run_dir().join("suite.log")
    }

    pub fn e2e_dir(&self) -> PathBuf {
        self.run_dir().join("e2e")
    }

    pub fn area_log(&self, name: &str) -> PathBuf {
        self.e2e_dir().join(format!("{}.log", format::sanitize_name(name)))
    }

    /// Scratch space for scaffolded projects, kept with the run's logs.
    pub fn work_dir(&self) -> PathBuf {
        self.run_dir().join("work")
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(self.e2e_dir())?;
        Ok(())
    }
}

/// Appends formatted lines to one log file. Cheap to clone; every write
/// opens the file in append mode so concurrent loggers never truncate.
#[derive(Debug, Clone)]
pub struct Logger {
    path: PathBuf,
    depth: usize,
    width: usize,
    timestamps: bool,
}

impl Logger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            depth: 0,
            width: format::DEFAULT_WIDTH,
            timestamps: false,
        }
    }

    pub fn with_width(mut self, width: usize) -> Self {
        self.width = width;
        self
    }

    pub fn with_timestamps(mut self) -> Self {
        self.timestamps = true;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn indent(&mut self) {
        self.depth += 1;
    }

    pub fn dedent(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// A copy of this logger nested one level deeper.
    pub fn nested(&self) -> Self {
        let mut child = self.clone();
        child.indent();
        child
    }

    pub fn line(&self, text: &str) -> Result<()> {
        self.write_raw(&[text])
    }

    pub fn lines<S: AsRef<str>>(&self, lines: &[S]) -> Result<()> {
        let refs: Vec<&str> = lines.iter().map(|l| l.as_ref()).collect();
        self.write_raw(&refs)
    }

    pub fn box_open(&self, title: &str) -> Result<()> {
        self.line(&format::box_top(title, self.width))
    }

    pub fn box_line(&self, text: &str) -> Result<()> {
        self.line(&format::box_line(text))
    }

    pub fn box_close(&self, summary: &str) -> Result<()> {
        self.line(&format::box_bottom(summary, self.width))
    }

    /// Write `title` and `body` as one box in a single append.
    pub fn boxed<S: AsRef<str>>(&self, title: &str, body: &[S]) -> Result<()> {
        let mut out = Vec::with_capacity(body.len() + 2);
        out.push(format::box_top(title, self.width));
        for line in body {
            for part in line.as_ref().lines() {
                out.push(format::box_line(part));
            }
        }
        out.push(format::box_bottom("", self.width));
        self.lines(&out)
    }

    fn write_raw(&self, lines: &[&str]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let pad = format::indent(self.depth);
        let mut buf = String::new();
        for line in lines {
            if self.timestamps {
                buf.push_str(&chrono::Local::now().format("[%H:%M:%S] ").to_string());
            }
            buf.push_str(&pad);
            buf.push_str(line);
            buf.push('\n');
        }
        file.write_all(buf.as_bytes())?;
        Ok(())
    }
}
