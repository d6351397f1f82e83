//! Выпуск и продление TLS-сертификатов через certbot.

use crate::command::CommandRunner;
use crate::error::{AdminError, AdminResult};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;

const INSTALL_SCRIPT: &str = "apt-get update -qq && DEBIAN_FRONTEND=noninteractive apt-get install -y -qq certbot python3-certbot-nginx";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub domain: String,
    /// `None`, если дату не удалось прочитать из файла.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Успешный запуск certbot: хвост его вывода для оператора.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueOutcome {
    pub details: String,
}

pub struct CertificateManager {
    client_binary: String,
    live_dir: PathBuf,
    diagnostic_lines: usize,
    runner: Arc<dyn CommandRunner>,
}

impl CertificateManager {
    pub fn new(
        client_binary: impl Into<String>,
        live_dir: impl Into<PathBuf>,
        diagnostic_lines: usize,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            client_binary: client_binary.into(),
            live_dir: live_dir.into(),
            diagnostic_lines: diagnostic_lines.max(1),
            runner,
        }
    }

    fn cert_path(&self, domain: &str) -> PathBuf {
        self.live_dir.join(domain).join("cert.pem")
    }

    pub fn has_certificate(&self, domain: &str) -> bool {
        !domain.is_empty() && self.cert_path(domain).is_file()
    }

    pub fn certificate(&self, domain: &str) -> Option<Certificate> {
        if !self.has_certificate(domain) {
            return None;
        }
        let path = self.cert_path(domain);
        let path_arg = path.to_string_lossy().into_owned();
        let out = self
            .runner
            .run("openssl", &["x509", "-enddate", "-noout", "-in", path_arg.as_str()]);
        let expires_at = if out.success() {
            parse_not_after(&out.stdout)
        } else {
            tracing::warn!(domain = domain, stderr = %out.stderr, "Failed to read certificate expiry");
            None
        };
        Some(Certificate {
            domain: domain.to_string(),
            expires_at,
        })
    }

    fn ensure_client(&self) -> AdminResult<()> {
        if self.runner.run("which", &[self.client_binary.as_str()]).success() {
            return Ok(());
        }
        tracing::info!(client = %self.client_binary, "Certificate client missing, installing");
        let install = self.runner.run("sh", &["-c", INSTALL_SCRIPT]);
        if !install.success() {
            return Err(AdminError::UpstreamFailure(format!(
                "Не удалось установить {}: {}",
                self.client_binary,
                install.tail(self.diagnostic_lines)
            )));
        }
        Ok(())
    }

    /// Выпуск сертификата для уже настроенного в nginx домена.
    pub fn issue(&self, domain: &str, email: Option<&str>) -> AdminResult<IssueOutcome> {
        if domain.trim().is_empty() {
            return Err(AdminError::NotConfigured("домен для сертификата".to_string()));
        }
        self.ensure_client()?;

        let email = email
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("admin@{}", domain));
        tracing::info!(domain = domain, email = %email, "Requesting certificate");
        let out = self.runner.run(
            &self.client_binary,
            &[
                "--nginx",
                "-d",
                domain,
                "--redirect",
                "--non-interactive",
                "--agree-tos",
                "-m",
                email.as_str(),
            ],
        );
        let details = out.tail(self.diagnostic_lines);
        if !out.success() {
            tracing::warn!(domain = domain, details = %details, "Certificate issuance failed");
            return Err(AdminError::UpstreamFailure(details));
        }
        tracing::info!(domain = domain, "Certificate issued");
        Ok(IssueOutcome { details })
    }

    pub fn renew(&self) -> AdminResult<IssueOutcome> {
        let out = self.runner.run(
            &self.client_binary,
            &["renew", "--nginx", "--no-random-sleep-on-renew", "-n"],
        );
        let details = out.tail(self.diagnostic_lines);
        if !out.success() {
            tracing::warn!(details = %details, "Certificate renewal failed");
            return Err(AdminError::UpstreamFailure(details));
        }
        tracing::info!("Certificate renewal finished");
        Ok(IssueOutcome { details })
    }
}

/// `notAfter=Jan  5 12:00:00 2027 GMT`
fn parse_not_after(output: &str) -> Option<DateTime<Utc>> {
    let raw = output
        .lines()
        .find_map(|line| line.trim().strip_prefix("notAfter="))?;
    let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    NaiveDateTime::parse_from_str(&normalized, "%b %d %H:%M:%S %Y GMT")
        .ok()
        .map(|naive| naive.and_utc())
}
