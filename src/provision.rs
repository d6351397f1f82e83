//! Сценарии из нескольких шагов: смена домена, выпуск SSL, смена токена бота.
//!
//! Шаги не откатываются: если упал поздний шаг, ранние изменения остаются
//! в силе, а отчёт показывает исход каждого шага отдельно.

use crate::app_config::{ConfigKey, ConfigStore, MutationBatch};
use crate::certificate::CertificateManager;
use crate::db::{Actor, Db};
use crate::error::{AdminError, AdminResult};
use crate::nginx::{ReverseProxyManager, normalize_domain};
use crate::service::ProcessController;
use crate::webhook::{SyncOutcome, WebhookApi, WebhookRegistration, WebhookSynchronizer};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningStage {
    ConfigUpdated,
    ProxyUpdated,
    ProxyReloaded,
    CertificateIssued,
    CertificateSkipped,
    WebhookSynced,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Done(String),
    Skipped(String),
    Failed(String),
}

impl StepOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, StepOutcome::Done(_))
    }

    fn skipped(reason: &str) -> Self {
        StepOutcome::Skipped(reason.to_string())
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Done(text) => write!(f, "✅ {}", text),
            StepOutcome::Skipped(text) => write!(f, "⏭ {}", text),
            StepOutcome::Failed(text) => write!(f, "❌ {}", text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainReport {
    pub domain: String,
    /// Домен записан и nginx принял конфигурацию с новым доменом.
    pub success: bool,
    pub message: String,
    /// Итог шага с сертификатом и webhook.
    pub ssl: String,
    pub ssl_success: bool,
    pub config: StepOutcome,
    pub proxy_update: StepOutcome,
    pub proxy_reload: StepOutcome,
    pub certificate: StepOutcome,
    pub webhook: StepOutcome,
    pub webhook_url: Option<String>,
    /// Пройденные стадии по порядку.
    pub stages: Vec<ProvisioningStage>,
}

impl DomainReport {
    fn new(domain: &str) -> Self {
        let pending = StepOutcome::skipped("не выполнялось");
        Self {
            domain: domain.to_string(),
            success: false,
            message: String::new(),
            ssl: String::new(),
            ssl_success: false,
            config: pending.clone(),
            proxy_update: pending.clone(),
            proxy_reload: pending.clone(),
            certificate: pending.clone(),
            webhook: pending,
            webhook_url: None,
            stages: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateReport {
    pub success: bool,
    pub message: String,
    /// Последние строки вывода certbot.
    pub details: String,
    pub webhook: StepOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialsReport {
    pub success: bool,
    pub message: String,
    pub bot_username: Option<String>,
    pub webhook: StepOutcome,
    pub bot_restarted: bool,
}

/// Сводка настроек без самого токена.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigOverview {
    pub bot_token_configured: bool,
    pub admin_id_configured: bool,
    pub domain_configured: bool,
    pub domain: Option<String>,
    pub bot_username: Option<String>,
}

pub struct DomainProvisioningOrchestrator<A> {
    config: Arc<ConfigStore>,
    proxy: Arc<ReverseProxyManager>,
    certificates: Arc<CertificateManager>,
    webhook: WebhookSynchronizer<A>,
    process: Arc<ProcessController>,
    audit: Arc<Db>,
}

impl<A: WebhookApi> DomainProvisioningOrchestrator<A> {
    pub fn new(
        config: Arc<ConfigStore>,
        proxy: Arc<ReverseProxyManager>,
        certificates: Arc<CertificateManager>,
        webhook: WebhookSynchronizer<A>,
        process: Arc<ProcessController>,
        audit: Arc<Db>,
    ) -> Self {
        Self {
            config,
            proxy,
            certificates,
            webhook,
            process,
            audit,
        }
    }

    pub fn certificates(&self) -> &CertificateManager {
        &self.certificates
    }

    pub fn proxy(&self) -> &ReverseProxyManager {
        &self.proxy
    }

    fn configured(&self, key: ConfigKey) -> AdminResult<Option<String>> {
        Ok(self
            .config
            .get(key)?
            .filter(|value| key.is_configured(value)))
    }

    fn token(&self) -> AdminResult<String> {
        self.configured(ConfigKey::BotToken)?
            .ok_or_else(|| AdminError::NotConfigured("токен бота (APIKEY)".to_string()))
    }

    async fn sync_step(&self, domain: &str) -> (StepOutcome, Option<String>) {
        let token = match self.token() {
            Ok(token) => token,
            Err(error) => return (StepOutcome::Skipped(error.to_string()), None),
        };
        match self.webhook.synchronize(domain, &token).await {
            Ok(SyncOutcome::Updated(url)) => {
                (StepOutcome::Done(format!("webhook: {}", url)), Some(url))
            }
            Ok(SyncOutcome::Unchanged(url)) => (
                StepOutcome::Done(format!("webhook без изменений: {}", url)),
                Some(url),
            ),
            Err(error) => {
                tracing::warn!(domain = domain, error = %error, "Webhook synchronization failed");
                (StepOutcome::Failed(error.to_string()), None)
            }
        }
    }

    /// Новый домен: config.php, nginx, сертификат, webhook.
    pub async fn apply_domain(
        &self,
        actor: &Actor,
        domain: &str,
        email: Option<&str>,
    ) -> DomainReport {
        let mut report = DomainReport::new(domain.trim());

        let domain = match normalize_domain(domain) {
            Ok(domain) => domain,
            Err(error) => {
                report.config = StepOutcome::Failed(error.to_string());
                report.message = format!("Ошибка: {}", error);
                return report;
            }
        };
        report.domain = domain.clone();
        tracing::info!(domain = %domain, admin_id = actor.admin_id, "Applying domain");

        let mut batch = MutationBatch::new();
        batch.set(ConfigKey::Domain, domain.as_str());
        match self.config.apply(&batch) {
            Ok(applied) if applied.skipped.contains(&ConfigKey::Domain) => {
                report.config = StepOutcome::Failed(format!(
                    "в {} нет присваивания ${}",
                    self.config.path().display(),
                    ConfigKey::Domain.var_name()
                ));
            }
            Ok(applied) => {
                let mut text = if applied.written() {
                    format!("domainhosts = {}", domain)
                } else {
                    format!("domainhosts уже {}", domain)
                };
                if !applied.mismatched.is_empty() {
                    text.push_str(" (значение не подтвердилось при проверке)");
                }
                report.config = StepOutcome::Done(text);
                report.stages.push(ProvisioningStage::ConfigUpdated);
            }
            Err(error) => report.config = StepOutcome::Failed(error.to_string()),
        }
        if !report.config.is_done() {
            report.message = format!("Ошибка: {}", report.config);
            self.audit_domain(actor, &report).await;
            return report;
        }

        match self.proxy.update_domain(&domain) {
            Ok(update) => {
                let text = if update.created {
                    "создан файл сайта"
                } else if update.changed {
                    "server_name обновлён"
                } else {
                    "уже настроен"
                };
                report.proxy_update = StepOutcome::Done(format!(
                    "{}: {} → {}",
                    text, update.binding.domain, update.binding.upstream
                ));
                report.stages.push(ProvisioningStage::ProxyUpdated);
                match self.proxy.reload() {
                    Ok(()) => {
                        report.proxy_reload = StepOutcome::Done("nginx перезагружен".to_string());
                        report.stages.push(ProvisioningStage::ProxyReloaded);
                    }
                    Err(error) => report.proxy_reload = StepOutcome::Failed(error.to_string()),
                }
            }
            Err(error) => {
                report.proxy_update = StepOutcome::Failed(error.to_string());
                report.proxy_reload = StepOutcome::skipped("nginx не обновлён");
            }
        }

        let proxy_ready = report.proxy_reload.is_done();
        let mut reload_after_certificate = None;
        if proxy_ready {
            match self.proxy.install_certificate(&domain, email, &self.certificates) {
                Ok(install) => {
                    report.ssl_success = true;
                    report.certificate = StepOutcome::Done("сертификат выпущен".to_string());
                    report.stages.push(ProvisioningStage::CertificateIssued);
                    tracing::debug!(details = %install.issued.details, "certbot output");
                    if let Err(error) = install.reload {
                        // Сертификат уже на диске: webhook всё равно уйдёт на https.
                        let text = format!("после выпуска SSL: {}", error);
                        report.proxy_reload = StepOutcome::Failed(text.clone());
                        reload_after_certificate = Some(text);
                    }
                }
                Err(error) => {
                    report.certificate = StepOutcome::Failed(error.to_string());
                    report.stages.push(ProvisioningStage::CertificateSkipped);
                }
            }
        } else {
            report.certificate = StepOutcome::skipped("nginx не готов, SSL не запрашивался");
            report.stages.push(ProvisioningStage::CertificateSkipped);
        }

        let (webhook, url) = self.sync_step(&domain).await;
        if webhook.is_done() {
            report.stages.push(ProvisioningStage::WebhookSynced);
        }
        report.webhook = webhook;
        report.webhook_url = url;

        report.success = proxy_ready;
        report.message = if report.success {
            let mut message = "Домен и nginx обновлены".to_string();
            if report.ssl_success {
                message.push_str(" | SSL установлен");
            }
            if let Some(error) = &reload_after_certificate {
                message.push_str(&format!(" | nginx не перезагружен {}", error));
            }
            message
        } else {
            format!(
                "Домен сохранён в конфигурации, но nginx не обновлён: {}",
                match &report.proxy_update {
                    StepOutcome::Failed(_) => &report.proxy_update,
                    _ => &report.proxy_reload,
                }
            )
        };
        report.ssl = if report.ssl_success {
            format!("SSL выпущен | {}", report.webhook)
        } else {
            format!("SSL не установлен: {} | {}", report.certificate, report.webhook)
        };
        report.stages.push(ProvisioningStage::Done);
        tracing::info!(
            domain = %report.domain,
            success = report.success,
            ssl_success = report.ssl_success,
            webhook_url = ?report.webhook_url,
            stages = ?report.stages,
            "Domain provisioning finished"
        );

        self.audit_domain(actor, &report).await;
        report
    }

    async fn audit_domain(&self, actor: &Actor, report: &DomainReport) {
        let description = format!(
            "domain={}, config={}, proxy={}, ssl={}",
            report.domain,
            if report.config.is_done() { "ok" } else { "failed" },
            if report.success { "ok" } else { "failed" },
            if report.ssl_success { "installed" } else { "failed" }
        );
        self.audit.record(actor, "set_domain", &description).await;
    }

    /// Выпуск сертификата для домена, который уже обслуживает nginx.
    pub async fn issue_certificate(
        &self,
        actor: &Actor,
        domain: &str,
        email: &str,
    ) -> AdminResult<CertificateReport> {
        let domain = normalize_domain(domain)?;
        if email.trim().is_empty() {
            return Err(AdminError::NotConfigured("email для сертификата".to_string()));
        }

        let outcome = match self.certificates.issue(&domain, Some(email)) {
            Ok(outcome) => outcome,
            Err(AdminError::UpstreamFailure(details)) => {
                return Ok(CertificateReport {
                    success: false,
                    message: "Ошибка выпуска SSL".to_string(),
                    details,
                    webhook: StepOutcome::skipped("SSL не выпущен"),
                });
            }
            Err(error) => return Err(error),
        };

        let (webhook, _) = self.sync_step(&domain).await;
        self.audit
            .record(actor, "ssl_install", &format!("SSL installed for: {}", domain))
            .await;
        Ok(CertificateReport {
            success: true,
            message: "SSL выпущен".to_string(),
            details: outcome.details,
            webhook,
        })
    }

    pub async fn renew_certificates(&self, actor: &Actor) -> CertificateReport {
        let (success, details) = match self.certificates.renew() {
            Ok(outcome) => (true, outcome.details),
            Err(AdminError::UpstreamFailure(details)) => (false, details),
            Err(error) => (false, error.to_string()),
        };
        self.audit
            .record(
                actor,
                "ssl_renew",
                if success { "Certificates renewed" } else { "Certificate renewal failed" },
            )
            .await;
        CertificateReport {
            success,
            message: if success {
                "Продление SSL выполнено".to_string()
            } else {
                "Ошибка продления SSL".to_string()
            },
            details,
            webhook: StepOutcome::skipped("не требуется"),
        }
    }

    /// Новый токен и admin id управляемого бота, затем перезапуск процесса.
    pub async fn update_bot_config(
        &self,
        actor: &Actor,
        token: &str,
        admin_id: &str,
        domain: Option<&str>,
    ) -> AdminResult<CredentialsReport> {
        let token = token.trim();
        let admin_id = admin_id.trim();
        if token.is_empty() || admin_id.is_empty() {
            return Err(AdminError::NotConfigured("токен бота и admin id".to_string()));
        }
        let domain = domain
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(normalize_domain)
            .transpose()?;

        let mut batch = MutationBatch::new();
        batch.set(ConfigKey::BotToken, token);
        batch.set(ConfigKey::AdminId, admin_id);
        if let Some(domain) = &domain {
            batch.set(ConfigKey::Domain, domain.as_str());
        }
        let bot_username = match self.webhook.api().bot_username(token).await {
            Ok(username) if !username.is_empty() => {
                let username = format!("@{}", username.trim_start_matches('@'));
                batch.set(ConfigKey::BotUsername, username.as_str());
                Some(username)
            }
            Ok(_) => None,
            Err(error) => {
                tracing::warn!(error = %error, "getMe failed for the new token");
                None
            }
        };

        let applied = self.config.apply(&batch)?;
        if !applied.skipped.is_empty() || !applied.mismatched.is_empty() {
            tracing::warn!(
                skipped = ?applied.skipped,
                mismatched = ?applied.mismatched,
                "Credentials only partially applied"
            );
        }

        let webhook = match &domain {
            Some(domain) => self.sync_step(domain).await.0,
            None => StepOutcome::skipped("домен не указан"),
        };

        let restart = self.process.restart(actor).await;
        self.audit
            .record(actor, "bot_config_update", "Updated bot token and admin ID")
            .await;

        Ok(CredentialsReport {
            success: true,
            message: "Конфигурация бота обновлена".to_string(),
            bot_username,
            webhook,
            bot_restarted: restart.success,
        })
    }

    pub fn config_overview(&self) -> AdminResult<ConfigOverview> {
        let values = self.config.values()?;
        let configured = |key: ConfigKey| {
            values
                .get(&key)
                .filter(|value| key.is_configured(value))
                .cloned()
        };
        let domain = configured(ConfigKey::Domain);
        Ok(ConfigOverview {
            bot_token_configured: configured(ConfigKey::BotToken).is_some(),
            admin_id_configured: configured(ConfigKey::AdminId).is_some(),
            domain_configured: domain.is_some(),
            domain,
            bot_username: configured(ConfigKey::BotUsername),
        })
    }

    pub async fn sync_webhook(&self, actor: &Actor) -> AdminResult<SyncOutcome> {
        let token = self.token()?;
        // Без домена сертификата нет, и webhook уходит на http-адрес сервера.
        let domain = self.configured(ConfigKey::Domain)?.unwrap_or_default();
        let outcome = self.webhook.synchronize(&domain, &token).await?;
        if let SyncOutcome::Updated(url) = &outcome {
            self.audit
                .record(actor, "webhook_update", &format!("Set webhook: {}", url))
                .await;
        }
        Ok(outcome)
    }

    pub async fn clear_webhook(&self, actor: &Actor) -> AdminResult<()> {
        let token = self.token()?;
        self.webhook.clear(&token).await?;
        self.audit
            .record(actor, "webhook_delete", "Deleted webhook")
            .await;
        Ok(())
    }

    pub async fn webhook_info(&self) -> AdminResult<WebhookRegistration> {
        let token = self.token()?;
        self.webhook.current_registration(&token).await
    }
}
