//! Console formatting for the ordered progress stream.
//!
//! Areas are boxes; configs, groups and tests are indented rows inside them.
//! Everything goes through a [`LineSink`], so tests can capture the stream.

use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::format::{self, ICON_FAIL, ICON_OK, ICON_PENDING, ICON_SKIP};

/// Destination of emitted lines.
pub trait LineSink: Send {
    fn write_line(&mut self, line: &str);
}

/// Writes to process stdout, flushing after every line.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl LineSink for StdoutSink {
    fn write_line(&mut self, line: &str) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{}", line);
        let _ = out.flush();
    }
}

/// Collects lines in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl LineSink for MemorySink {
    fn write_line(&mut self, line: &str) {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).push(line.to_string());
    }
}

/// Terminal status of a displayed test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    Pending,
    Pass,
    Fail,
    Skip,
}

impl TestStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TestStatus::Pending)
    }

    pub fn icon(&self) -> &'static str {
        match self {
            TestStatus::Pending => ICON_PENDING,
            TestStatus::Pass => ICON_OK,
            TestStatus::Fail => ICON_FAIL,
            TestStatus::Skip => ICON_SKIP,
        }
    }
}

/// Pass/fail/skip tallies shown in footers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub pending: u32,
}

impl StatusCounts {
    pub fn add(&mut self, status: TestStatus) {
        match status {
            TestStatus::Pass => self.passed += 1,
            TestStatus::Fail => self.failed += 1,
            TestStatus::Skip => self.skipped += 1,
            TestStatus::Pending => self.pending += 1,
        }
    }

    pub fn merge(&mut self, other: StatusCounts) {
        self.passed += other.passed;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.pending += other.pending;
    }

    pub fn icon(&self) -> &'static str {
        if self.failed > 0 {
            ICON_FAIL
        } else if self.pending > 0 {
            ICON_PENDING
        } else if self.passed == 0 && self.skipped > 0 {
            ICON_SKIP
        } else {
            ICON_OK
        }
    }
}

impl std::fmt::Display for StatusCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} passed · {} failed · {} skipped", self.passed, self.failed, self.skipped)?;
        if self.pending > 0 {
            write!(f, " · {} unfinished", self.pending)?;
        }
        Ok(())
    }
}

pub struct CiEmitter<S: LineSink> {
    sink: S,
    width: usize,
}

impl<S: LineSink> CiEmitter<S> {
    pub fn new(sink: S, width: usize) -> Self {
        Self { sink, width }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Bypass all formatting.
    pub fn raw(&mut self, line: &str) {
        self.sink.write_line(line);
    }

    fn row(&mut self, depth: usize, content: &str) {
        let line = format::box_line(&format!("{}{}", format::indent(depth), content));
        self.sink.write_line(&line);
    }

    pub fn area_header(&mut self, name: &str) {
        let line = format::box_top(&name.to_uppercase(), self.width);
        self.sink.write_line(&line);
    }

    pub fn area_footer(&mut self, name: &str, counts: StatusCounts) {
        let label = format!("{} {}: {}", counts.icon(), name, counts);
        let line = format::box_bottom(&label, self.width);
        self.sink.write_line(&line);
    }

    pub fn config_header(&mut self, name: &str) {
        self.row(0, &format!("⚙ {}", name));
    }

    pub fn config_footer(&mut self, name: &str, counts: StatusCounts) {
        self.row(0, &format!("{} {}: {}", counts.icon(), name, counts));
    }

    pub fn group_header(&mut self, name: &str) {
        self.row(1, &format!("▸ {}", name));
    }

    pub fn group_footer(&mut self, name: &str, counts: StatusCounts) {
        self.row(1, &format!("{} {}: {}", counts.icon(), name, counts));
    }

    pub fn test_header(&mut self, name: &str) {
        self.row(2, &format!("• {}", name));
    }

    /// One line of a test's own output.
    pub fn test_line(&mut self, content: &str) {
        for part in content.lines() {
            self.row(3, part);
        }
        if content.is_empty() {
            self.row(3, "");
        }
    }

    pub fn test_note(&mut self, note: &str) {
        self.row(3, &format!("ℹ {}", note));
    }

    pub fn test_footer(&mut self, name: &str, status: TestStatus) {
        self.row(2, &format!("{} {}", status.icon(), name));
    }

    /// A standalone box, as used by summaries.
    pub fn boxed(&mut self, title: &str, body: &[String], footer: &str) {
        self.sink.write_line(&format::box_top(title, self.width));
        for line in body {
            self.sink.write_line(&format::box_line(line));
        }
        self.sink.write_line(&format::box_bottom(footer, self.width));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_are_indented_by_level() {
        let sink = MemorySink::new();
        let mut em = CiEmitter::new(sink.clone(), 40);
        em.area_header("suite");
        em.group_header("infra");
        em.test_header("db up");
        em.test_line("connected");
        em.test_footer("db up", TestStatus::Pass);

        let lines = sink.lines();
        assert!(lines[0].starts_with("┌─ SUITE "));
        assert_eq!(lines[1], "│   ▸ infra");
        assert_eq!(lines[2], "│     • db up");
        assert_eq!(lines[3], "│       connected");
        assert_eq!(lines[4], "│     ✅ db up");
    }

    #[test]
    fn test_multiline_output_split() {
        let sink = MemorySink::new();
        let mut em = CiEmitter::new(sink.clone(), 40);
        em.test_line("a\nb");
        assert_eq!(sink.lines(), vec!["│       a", "│       b"]);
    }

    #[test]
    fn test_counts_display_and_icon() {
        let mut counts = StatusCounts::default();
        counts.add(TestStatus::Pass);
        counts.add(TestStatus::Fail);
        assert_eq!(counts.to_string(), "1 passed · 1 failed · 0 skipped");
        assert_eq!(counts.icon(), ICON_FAIL);

        let mut skipped = StatusCounts::default();
        skipped.add(TestStatus::Skip);
        assert_eq!(skipped.icon(), ICON_SKIP);
    }

    #[test]
    fn test_area_footer_width() {
        let sink = MemorySink::new();
        let mut em = CiEmitter::new(sink.clone(), format::DEFAULT_WIDTH);
        em.area_footer("Suite", StatusCounts { passed: 2, ..Default::default() });
        let line = &sink.lines()[0];
        assert!(line.starts_with("└─ ✅ Suite: 2 passed"));
        assert_eq!(line.chars().count(), format::DEFAULT_WIDTH + 1);
    }
}
