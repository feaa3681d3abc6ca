//! Ephemeral Postgres container for the run.

use std::time::Duration;

use tokio::net::TcpStream;

use crate::config::HarnessSettings;
use crate::logger::Logger;
use crate::process::{self, CommandSpec};
use crate::{Error, Result};

pub const FIXTURE_ERROR_ENV: &str = "E2E_FIXTURE_ERROR";
pub const DB_HOST_ENV: &str = "E2E_DB_HOST";
pub const DB_PORT_ENV: &str = "E2E_DB_PORT";
pub const DB_USER_ENV: &str = "E2E_DB_USER";
pub const DB_PASSWORD_ENV: &str = "E2E_DB_PASSWORD";
pub const DB_NAME_ENV: &str = "E2E_DB_NAME";
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

const ENGINE: &str = "docker";
const HOST: &str = "127.0.0.1";

/// Connection details of a reachable database.
#[derive(Debug, Clone, PartialEq)]
pub struct DbEndpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl DbEndpoint {
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }

    /// Export connection info for test bodies and spawned processes.
    pub fn publish(&self) {
        std::env::set_var(DB_HOST_ENV, &self.host);
        std::env::set_var(DB_PORT_ENV, self.port.to_string());
        std::env::set_var(DB_USER_ENV, &self.user);
        std::env::set_var(DB_PASSWORD_ENV, &self.password);
        std::env::set_var(DB_NAME_ENV, &self.database);
        std::env::set_var(DATABASE_URL_ENV, self.url());
        std::env::remove_var(FIXTURE_ERROR_ENV);
    }

    /// Read back what global setup published.
    pub fn from_env() -> Option<Self> {
        let host = std::env::var(DB_HOST_ENV).ok()?;
        let port = std::env::var(DB_PORT_ENV).ok()?.parse().ok()?;
        Some(Self {
            host,
            port,
            user: std::env::var(DB_USER_ENV).unwrap_or_default(),
            password: std::env::var(DB_PASSWORD_ENV).unwrap_or_default(),
            database: std::env::var(DB_NAME_ENV).unwrap_or_default(),
        })
    }
}

/// Cause recorded by a failed provisioning, if any.
pub fn fixture_error() -> Option<String> {
    std::env::var(FIXTURE_ERROR_ENV).ok().filter(|s| !s.is_empty())
}

pub fn publish_error(cause: &str) {
    std::env::set_var(FIXTURE_ERROR_ENV, cause);
}

#[derive(Debug)]
pub struct PostgresFixture {
    container: String,
    endpoint: DbEndpoint,
    logger: Logger,
}

impl PostgresFixture {
    /// Start a container and wait until it accepts connections.
    pub async fn provision(settings: &HarnessSettings, logger: &Logger) -> Result<Self> {
        let short = uuid::Uuid::new_v4().to_string();
        let container = format!("cascade-pg-{}", short.split('-').next().unwrap_or("run"));
        let endpoint = DbEndpoint {
            host: HOST.to_string(),
            port: settings.db_port,
            user: settings.db_user.clone(),
            password: settings.db_password.clone(),
            database: settings.db_name.clone(),
        };
        let fixture = Self { container, endpoint, logger: logger.clone() };

        let start = CommandSpec::new(ENGINE)
            .args(["run", "-d", "--rm", "--name"])
            .arg(fixture.container.as_str())
            .arg("-e")
            .arg(format!("POSTGRES_USER={}", settings.db_user))
            .arg("-e")
            .arg(format!("POSTGRES_PASSWORD={}", settings.db_password))
            .arg("-e")
            .arg(format!("POSTGRES_DB={}", settings.db_name))
            .arg("-p")
            .arg(format!("{}:5432", settings.db_port))
            .arg(settings.db_image.as_str())
            .timeout(Duration::from_millis(settings.process_timeout_ms));
        process::run_checked(&start, Some(logger))
            .await
            .map_err(|e| Error::Container(e.to_string()))?;

        let backoff = Duration::from_millis(settings.db_connect_backoff_ms);
        if let Err(e) = fixture.wait_healthy(settings.db_connect_retries, backoff).await {
            fixture.teardown().await;
            return Err(e);
        }
        if let Err(e) =
            wait_for_tcp(&fixture.endpoint.host, fixture.endpoint.port, settings.db_connect_retries, backoff)
                .await
        {
            fixture.teardown().await;
            return Err(e);
        }

        let _ = logger.line(&format!(
            "database ready: {} ({})",
            fixture.endpoint.url(),
            fixture.container
        ));
        Ok(fixture)
    }

    pub fn endpoint(&self) -> &DbEndpoint {
        &self.endpoint
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Poll `pg_isready` inside the container with linear backoff.
    async fn wait_healthy(&self, retries: u32, backoff: Duration) -> Result<()> {
        let probe = CommandSpec::new(ENGINE)
            .args(["exec", self.container.as_str(), "pg_isready", "-U", self.endpoint.user.as_str()])
            .timeout(Duration::from_secs(10));
        for attempt in 1..=retries {
            match process::run(&probe, None).await {
                Ok(out) if out.success() => {
                    tracing::debug!("pg_isready ok after {} attempt(s)", attempt);
                    return Ok(());
                }
                Ok(out) => tracing::debug!("pg_isready attempt {}: {}", attempt, out.stdout.trim()),
                Err(e) => tracing::debug!("pg_isready attempt {}: {}", attempt, e),
            }
            tokio::time::sleep(backoff * attempt.min(4)).await;
        }
        Err(Error::FixtureUnavailable(format!(
            "container {} never reported healthy after {} checks",
            self.container, retries
        )))
    }

    /// Remove the container. Failures are logged, never raised.
    pub async fn teardown(&self) {
        let rm = CommandSpec::new(ENGINE)
            .args(["rm", "-f", self.container.as_str()])
            .timeout(Duration::from_secs(30));
        match process::run(&rm, None).await {
            Ok(out) if out.success() => {
                let _ = self.logger.line(&format!("removed container {}", self.container));
            }
            Ok(out) => tracing::warn!("docker rm -f {} failed: {}", self.container, out.stderr.trim()),
            Err(e) => tracing::warn!("docker rm -f {} failed: {}", self.container, e),
        }
    }
}

/// Connect-retry loop against a TCP endpoint.
pub async fn wait_for_tcp(host: &str, port: u16, retries: u32, backoff: Duration) -> Result<()> {
    let addr = format!("{}:{}", host, port);
    let mut last_err = String::new();
    for attempt in 1..=retries.max(1) {
        match tokio::time::timeout(Duration::from_secs(2), TcpStream::connect(&addr)).await {
            Ok(Ok(_)) => return Ok(()),
            Ok(Err(e)) => last_err = e.to_string(),
            Err(_) => last_err = "connect timed out".to_string(),
        }
        if attempt < retries {
            tokio::time::sleep(backoff).await;
        }
    }
    Err(Error::FixtureUnavailable(format!(
        "{} unreachable after {} attempt(s): {}",
        addr, retries, last_err
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url() {
        let ep = DbEndpoint {
            host: "127.0.0.1".into(),
            port: 5555,
            user: "u".into(),
            password: "p".into(),
            database: "d".into(),
        };
        assert_eq!(ep.url(), "postgres://u:p@127.0.0.1:5555/d");
    }

    #[tokio::test]
    async fn test_wait_for_tcp_succeeds_on_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        wait_for_tcp("127.0.0.1", port, 3, Duration::from_millis(10)).await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_tcp_gives_up() {
        // Bind then drop to get a port nothing listens on.
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let err = wait_for_tcp("127.0.0.1", port, 2, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FixtureUnavailable(_)));
    }
}
