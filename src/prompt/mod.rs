//! Drives an interactive CLI through a scripted list of prompts.
//!
//! The driver keeps an ANSI-stripped transcript of everything the process
//! printed and a scan cursor into it. Each step waits until its `expect`
//! text shows up after the cursor, moves the cursor past the match, then
//! types the answer. Checkbox answers are computed from the option rows the
//! process rendered after the prompt.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

use crate::{Error, Result};

pub const KEY_ENTER: &str = "\r";
pub const KEY_DOWN: &str = "\x1b[B";
pub const KEY_SPACE: &str = " ";

/// How long checkbox option rows must stay unchanged before answering.
const SETTLE: Duration = Duration::from_millis(150);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Answer {
    Text(String),
    Confirm(bool),
    Checkbox(Vec<String>),
    Enter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptStep {
    pub expect: String,
    pub answer: Answer,
    #[serde(rename = "timeoutMs", skip_serializing_if = "Option::is_none", default)]
    pub timeout_ms: Option<u64>,
}

/// One rendered checkbox row.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckboxOption {
    pub label: String,
    pub checked: bool,
}

pub struct PromptDriver<R, W> {
    reader: R,
    /// Dropped by `finish`, which closes the process's input.
    writer: Option<W>,
    transcript: String,
    cursor: usize,
    eof: bool,
    default_timeout: Duration,
}

impl<R, W> PromptDriver<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, default_timeout: Duration) -> Self {
        Self {
            reader,
            writer: Some(writer),
            transcript: String::new(),
            cursor: 0,
            eof: false,
            default_timeout,
        }
    }

    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    /// Run every step in order. Returns the transcript so far.
    pub async fn run(&mut self, steps: &[PromptStep]) -> Result<String> {
        for step in steps {
            let timeout = step
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(self.default_timeout);
            self.expect(&step.expect, timeout).await?;
            self.answer(&step.answer, timeout).await?;
        }
        Ok(self.transcript.clone())
    }

    /// Wait for `needle` after the cursor and move the cursor past it.
    pub async fn expect(&mut self, needle: &str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(pos) = self.transcript[self.cursor..].find(needle) {
                self.cursor += pos + needle.len();
                return Ok(());
            }
            if self.eof {
                return Err(Error::PromptClosed(needle.to_string()));
            }
            if !self.read_until(deadline).await? {
                return Err(Error::PromptTimeout {
                    expect: needle.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        }
    }

    pub async fn answer(&mut self, answer: &Answer, timeout: Duration) -> Result<()> {
        match answer {
            Answer::Text(text) => {
                self.send(text).await?;
                self.send(KEY_ENTER).await
            }
            Answer::Confirm(yes) => {
                self.send(if *yes { "y" } else { "n" }).await?;
                self.send(KEY_ENTER).await
            }
            Answer::Enter => self.send(KEY_ENTER).await,
            Answer::Checkbox(wanted) => {
                let options = self.wait_for_options(timeout).await?;
                let keys = checkbox_keys(&options, wanted)?;
                self.send(&keys).await
            }
        }
    }

    pub async fn send(&mut self, keys: &str) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(Error::PromptClosed(keys.escape_debug().to_string()));
        };
        writer.write_all(keys.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Close the process's input, then drain remaining output until it
    /// closes its stream.
    pub async fn finish(&mut self, timeout: Duration) -> Result<String> {
        drop(self.writer.take());
        let deadline = Instant::now() + timeout;
        while !self.eof {
            if !self.read_until(deadline).await? {
                break;
            }
        }
        Ok(self.transcript.clone())
    }

    async fn wait_for_options(&mut self, timeout: Duration) -> Result<Vec<CheckboxOption>> {
        let deadline = Instant::now() + timeout;
        loop {
            let options = parse_checkbox_options(&self.transcript[self.cursor..]);
            if !options.is_empty() {
                // Let the whole list render before picking.
                let settle = (Instant::now() + SETTLE).min(deadline);
                let grew = self.read_until(settle).await?;
                if !grew || self.eof {
                    return Ok(parse_checkbox_options(&self.transcript[self.cursor..]));
                }
                continue;
            }
            if self.eof {
                return Err(Error::PromptClosed("checkbox options".to_string()));
            }
            if !self.read_until(deadline).await? {
                return Err(Error::PromptTimeout {
                    expect: "checkbox options".to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        }
    }

    /// Read one chunk. `Ok(false)` when the deadline passed first.
    async fn read_until(&mut self, deadline: Instant) -> Result<bool> {
        let mut buf = [0u8; 4096];
        match tokio::time::timeout_at(deadline, self.reader.read(&mut buf)).await {
            Err(_) => Ok(false),
            Ok(Ok(0)) => {
                self.eof = true;
                Ok(true)
            }
            Ok(Ok(n)) => {
                let chunk = String::from_utf8_lossy(&buf[..n]);
                self.transcript.push_str(&strip_ansi(&chunk));
                Ok(true)
            }
            Ok(Err(e)) => Err(e.into()),
        }
    }
}

pub fn strip_ansi(text: &str) -> String {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    let re = ANSI.get_or_init(|| {
        Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07]*\x07|\x1b[()][A-Za-z0-9]|\r")
            .expect("valid ansi regex")
    });
    re.replace_all(text, "").into_owned()
}

/// Option rows after the latest redraw. Renderers repaint the whole list on
/// every keypress, so a repeated label starts a fresh list.
pub fn parse_checkbox_options(text: &str) -> Vec<CheckboxOption> {
    static ROW: OnceLock<Regex> = OnceLock::new();
    let re = ROW.get_or_init(|| {
        Regex::new(r"^\s*(?:[❯>›]\s*)?(◯|◉|○|●|◻|◼|□|■|\[ \]|\[[xX*]\])\s+(.+?)\s*$")
            .expect("valid checkbox regex")
    });

    let mut options: Vec<CheckboxOption> = Vec::new();
    for line in text.lines() {
        let Some(caps) = re.captures(line) else { continue };
        let label = caps[2].to_string();
        if options.iter().any(|o| o.label == label) {
            options.clear();
        }
        let checked = !matches!(&caps[1], "◯" | "○" | "◻" | "□" | "[ ]");
        options.push(CheckboxOption { label, checked });
    }
    options
}

/// Keystrokes that make the checked set equal `wanted`, starting with the
/// cursor on the first row, then confirm.
pub fn checkbox_keys(options: &[CheckboxOption], wanted: &[String]) -> Result<String> {
    if let Some(missing) = wanted.iter().find(|w| !options.iter().any(|o| &o.label == *w)) {
        return Err(Error::Assertion(format!(
            "checkbox option '{}' not offered (have: {})",
            missing,
            options.iter().map(|o| o.label.as_str()).collect::<Vec<_>>().join(", ")
        )));
    }
    let mut keys = String::new();
    for (i, option) in options.iter().enumerate() {
        let want = wanted.iter().any(|w| w == &option.label);
        if want != option.checked {
            keys.push_str(KEY_SPACE);
        }
        if i + 1 < options.len() {
            keys.push_str(KEY_DOWN);
        }
    }
    keys.push_str(KEY_ENTER);
    Ok(keys)
}
