use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const MAX_BOX_WIDTH: usize = 240;

/// All configurable settings with their defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct HarnessSettings {
    pub log_root: PathBuf,
    pub box_width: usize,
    pub flush_delay_ms: u64,
    pub db_image: String,
    pub db_port: u16,
    pub db_user: String,
    pub db_password: String,
    pub db_name: String,
    pub db_connect_retries: u32,
    pub db_connect_backoff_ms: u64,
    pub scaffold_command: Vec<String>,
    pub schema_validator: Vec<String>,
    pub schema_file: PathBuf,
    pub scenarios_dir: PathBuf,
    pub prompt_timeout_ms: u64,
    pub process_timeout_ms: u64,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            log_root: PathBuf::from("logs"),
            box_width: 78,
            flush_delay_ms: 5,
            db_image: "postgres:16-alpine".to_string(),
            db_port: 54329,
            db_user: "postgres".to_string(),
            db_password: "postgres".to_string(),
            db_name: "e2e".to_string(),
            db_connect_retries: 30,
            db_connect_backoff_ms: 500,
            scaffold_command: vec!["npx".to_string(), "create-app".to_string()],
            schema_validator: Vec::new(),
            schema_file: PathBuf::from("schemas/scenario.schema.json"),
            scenarios_dir: PathBuf::from("scenarios"),
            prompt_timeout_ms: 30_000,
            process_timeout_ms: 300_000,
        }
    }
}

/// Raw JSON representation. Every field is optional so files can override a subset.
#[derive(Debug, Deserialize, Default)]
struct SettingsFile {
    #[serde(rename = "log.root")]
    log_root: Option<PathBuf>,
    #[serde(rename = "output.boxWidth")]
    box_width: Option<usize>,
    #[serde(rename = "output.flushDelayMs")]
    flush_delay_ms: Option<u64>,
    #[serde(rename = "db.image")]
    db_image: Option<String>,
    #[serde(rename = "db.port")]
    db_port: Option<u16>,
    #[serde(rename = "db.user")]
    db_user: Option<String>,
    #[serde(rename = "db.password")]
    db_password: Option<String>,
    #[serde(rename = "db.name")]
    db_name: Option<String>,
    #[serde(rename = "db.connectRetries")]
    db_connect_retries: Option<u32>,
    #[serde(rename = "db.connectBackoffMs")]
    db_connect_backoff_ms: Option<u64>,
    #[serde(rename = "scaffold.command")]
    scaffold_command: Option<Vec<String>>,
    #[serde(rename = "schema.validator")]
    schema_validator: Option<Vec<String>>,
    #[serde(rename = "schema.file")]
    schema_file: Option<PathBuf>,
    #[serde(rename = "scenarios.dir")]
    scenarios_dir: Option<PathBuf>,
    #[serde(rename = "prompt.timeoutMs")]
    prompt_timeout_ms: Option<u64>,
    #[serde(rename = "process.timeoutMs")]
    process_timeout_ms: Option<u64>,
}

/// Resolve settings: defaults → user global → project-local → `E2E_LOG_ROOT`.
pub fn resolve(project_root: Option<&Path>) -> HarnessSettings {
    let global_path = dirs::home_dir().map(|h| h.join(".cascade/settings.json"));
    let project_path = project_root.map(|r| r.join(".cascade/settings.json"));
    let mut settings = resolve_with_paths(global_path.as_deref(), project_path.as_deref());

    if let Ok(root) = std::env::var(crate::logger::LOG_ROOT_ENV) {
        if !root.trim().is_empty() {
            settings.log_root = PathBuf::from(root);
        }
    }
    if let Some(root) = project_root {
        settings.anchor(root);
    }
    settings
}

/// Testable resolver that accepts explicit file paths (no home dir dependency).
fn resolve_with_paths(global_path: Option<&Path>, project_path: Option<&Path>) -> HarnessSettings {
    let mut settings = HarnessSettings::default();

    if let Some(path) = global_path {
        apply_file(&mut settings, path);
    }
    if let Some(path) = project_path {
        apply_file(&mut settings, path);
    }

    settings
}

impl HarnessSettings {
    /// Make relative directories relative to the project root.
    fn anchor(&mut self, root: &Path) {
        for path in [&mut self.log_root, &mut self.schema_file, &mut self.scenarios_dir] {
            if path.is_relative() {
                *path = root.join(&*path);
            }
        }
    }
}

fn apply_file(settings: &mut HarnessSettings, path: &Path) {
    let Ok(content) = std::fs::read_to_string(path) else { return };
    let Ok(file) = serde_json::from_str::<SettingsFile>(&content) else {
        tracing::warn!("Invalid settings file, ignoring: {}", path.display());
        return;
    };

    if let Some(v) = file.log_root {
        settings.log_root = v;
    }
    if let Some(v) = file.box_width {
        if (20..=MAX_BOX_WIDTH).contains(&v) {
            settings.box_width = v;
        } else {
            tracing::warn!(
                "output.boxWidth ({}) out of range (20..{}), using default",
                v, MAX_BOX_WIDTH
            );
        }
    }
    if let Some(v) = file.flush_delay_ms {
        if v <= 1_000 {
            settings.flush_delay_ms = v;
        } else {
            tracing::warn!("output.flushDelayMs ({}) out of range (0..1000), using default", v);
        }
    }
    if let Some(v) = file.db_image {
        settings.db_image = v;
    }
    if let Some(v) = file.db_port {
        if v >= 1024 {
            settings.db_port = v;
        } else {
            tracing::warn!("db.port ({}) is a privileged port, using default", v);
        }
    }
    if let Some(v) = file.db_user {
        settings.db_user = v;
    }
    if let Some(v) = file.db_password {
        settings.db_password = v;
    }
    if let Some(v) = file.db_name {
        settings.db_name = v;
    }
    if let Some(v) = file.db_connect_retries {
        if (1..=600).contains(&v) {
            settings.db_connect_retries = v;
        } else {
            tracing::warn!("db.connectRetries ({}) out of range (1..600), using default", v);
        }
    }
    if let Some(v) = file.db_connect_backoff_ms {
        if (10..=10_000).contains(&v) {
            settings.db_connect_backoff_ms = v;
        } else {
            tracing::warn!(
                "db.connectBackoffMs ({}) out of range (10..10000), using default",
                v
            );
        }
    }
    if let Some(v) = file.scaffold_command {
        if v.is_empty() {
            tracing::warn!("scaffold.command is empty, using default");
        } else {
            settings.scaffold_command = v;
        }
    }
    if let Some(v) = file.schema_validator {
        settings.schema_validator = v;
    }
    if let Some(v) = file.schema_file {
        settings.schema_file = v;
    }
    if let Some(v) = file.scenarios_dir {
        settings.scenarios_dir = v;
    }
    if let Some(v) = file.prompt_timeout_ms {
        if (100..=600_000).contains(&v) {
            settings.prompt_timeout_ms = v;
        } else {
            tracing::warn!("prompt.timeoutMs ({}) out of range (100..600000), using default", v);
        }
    }
    if let Some(v) = file.process_timeout_ms {
        if (1_000..=3_600_000).contains(&v) {
            settings.process_timeout_ms = v;
        } else {
            tracing::warn!(
                "process.timeoutMs ({}) out of range (1000..3600000), using default",
                v
            );
        }
    }
}
