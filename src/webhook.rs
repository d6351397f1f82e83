//! Регистрация webhook управляемого бота в Telegram.

use crate::app_config::ConfigKey;
use crate::certificate::CertificateManager;
use crate::error::{AdminError, AdminResult};
use std::future::Future;
use std::sync::Arc;
use teloxide::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WebhookRegistration {
    /// `None`, если webhook не установлен.
    pub url: Option<String>,
    pub pending_update_count: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Unchanged(String),
    Updated(String),
}

/// Вызовы Bot API, которые нужны для webhook. Ошибки отдаются текстом как есть.
pub trait WebhookApi: Send + Sync {
    fn get_info(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<WebhookRegistration, String>> + Send;
    fn set(&self, token: &str, url: &str) -> impl Future<Output = Result<(), String>> + Send;
    fn delete(&self, token: &str) -> impl Future<Output = Result<(), String>> + Send;
    fn bot_username(&self, token: &str)
    -> impl Future<Output = Result<String, String>> + Send;
}

/// Bot API через teloxide: отдельный `Bot` на каждый токен управляемого бота.
#[derive(Debug, Clone, Default)]
pub struct TelegramWebhookApi;

impl WebhookApi for TelegramWebhookApi {
    async fn get_info(&self, token: &str) -> Result<WebhookRegistration, String> {
        let info = Bot::new(token)
            .get_webhook_info()
            .await
            .map_err(|e| e.to_string())?;
        Ok(WebhookRegistration {
            url: info.url.map(|url| url.to_string()),
            pending_update_count: info.pending_update_count,
            last_error: info.last_error_message,
        })
    }

    async fn set(&self, token: &str, url: &str) -> Result<(), String> {
        let url = url::Url::parse(url).map_err(|e| format!("Некорректный URL {}: {}", url, e))?;
        Bot::new(token)
            .set_webhook(url)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    async fn delete(&self, token: &str) -> Result<(), String> {
        Bot::new(token)
            .delete_webhook()
            .drop_pending_updates(true)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    async fn bot_username(&self, token: &str) -> Result<String, String> {
        let me = Bot::new(token).get_me().await.map_err(|e| e.to_string())?;
        Ok(me.username().to_string())
    }
}

pub struct WebhookSynchronizer<A> {
    api: A,
    certificates: Arc<CertificateManager>,
    entrypoint: String,
    fallback_host: String,
}

impl<A: WebhookApi> WebhookSynchronizer<A> {
    pub fn new(
        api: A,
        certificates: Arc<CertificateManager>,
        entrypoint: impl Into<String>,
        fallback_host: impl Into<String>,
    ) -> Self {
        Self {
            api,
            certificates,
            entrypoint: entrypoint.into().trim_start_matches('/').to_string(),
            fallback_host: fallback_host.into(),
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// https при наличии сертификата для домена, иначе http на локальный адрес.
    pub fn desired_url(&self, domain: &str) -> String {
        let domain = domain.trim();
        if self.certificates.has_certificate(domain) {
            format!("https://{}/{}", domain, self.entrypoint)
        } else {
            format!("http://{}/{}", self.fallback_host, self.entrypoint)
        }
    }

    pub async fn current_registration(&self, token: &str) -> AdminResult<WebhookRegistration> {
        let token = require_token(token)?;
        self.api
            .get_info(token)
            .await
            .map_err(AdminError::UpstreamFailure)
    }

    pub async fn synchronize(&self, domain: &str, token: &str) -> AdminResult<SyncOutcome> {
        let token = require_token(token)?;
        let desired = self.desired_url(domain);
        let current = self
            .api
            .get_info(token)
            .await
            .map_err(AdminError::UpstreamFailure)?;

        if current.url.as_deref() == Some(desired.as_str()) {
            tracing::info!(url = %desired, "Webhook already registered");
            return Ok(SyncOutcome::Unchanged(desired));
        }

        self.api
            .set(token, &desired)
            .await
            .map_err(AdminError::UpstreamFailure)?;
        tracing::info!(
            previous = ?current.url,
            url = %desired,
            "Webhook registered"
        );
        Ok(SyncOutcome::Updated(desired))
    }

    pub async fn clear(&self, token: &str) -> AdminResult<()> {
        let token = require_token(token)?;
        self.api
            .delete(token)
            .await
            .map_err(AdminError::UpstreamFailure)?;
        tracing::info!("Webhook removed");
        Ok(())
    }
}

fn require_token(token: &str) -> AdminResult<&str> {
    let token = token.trim();
    if !ConfigKey::BotToken.is_configured(token) {
        return Err(AdminError::NotConfigured("токен бота (APIKEY)".to_string()));
    }
    Ok(token)
}


#[cfg(test)]
mod tests {
    use super::fake::FakeWebhookApi;
    use super::*;
    use crate::command::fake::FakeRunner;
    use std::fs;

    const TOKEN: &str = "123456:ABC-DEF";

    fn synchronizer(
        api: FakeWebhookApi,
        live_dir: &std::path::Path,
    ) -> WebhookSynchronizer<FakeWebhookApi> {
        let runner = Arc::new(FakeRunner::always_ok());
        let certs = CertificateManager::new("certbot", live_dir, 5, runner);
        WebhookSynchronizer::new(api, Arc::new(certs), "index.php", "203.0.113.7")
    }

    #[tokio::test]
    async fn second_synchronize_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let sync = synchronizer(FakeWebhookApi::default(), dir.path());

        let first = sync.synchronize("bot.example.com", TOKEN).await.unwrap();
        let second = sync.synchronize("bot.example.com", TOKEN).await.unwrap();

        assert_eq!(first, SyncOutcome::Updated("http://203.0.113.7/index.php".to_string()));
        assert_eq!(second, SyncOutcome::Unchanged("http://203.0.113.7/index.php".to_string()));
        assert_eq!(sync.api().mutations().len(), 1);
    }

    #[tokio::test]
    async fn certificate_switches_to_https() {
        let dir = tempfile::tempdir().unwrap();
        let sync = synchronizer(FakeWebhookApi::default(), dir.path());
        sync.synchronize("bot.example.com", TOKEN).await.unwrap();

        let live = dir.path().join("bot.example.com");
        fs::create_dir_all(&live).unwrap();
        fs::write(live.join("cert.pem"), "cert").unwrap();

        let outcome = sync.synchronize("bot.example.com", TOKEN).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Updated("https://bot.example.com/index.php".to_string()));
        assert_eq!(sync.api().url().as_deref(), Some("https://bot.example.com/index.php"));
        assert_eq!(sync.api().mutations().len(), 2);
    }

    #[tokio::test]
    async fn placeholder_token_fails_before_network() {
        let dir = tempfile::tempdir().unwrap();
        let sync = synchronizer(FakeWebhookApi::default(), dir.path());

        for token in ["", "  ", "{API_KEY}"] {
            let err = sync.synchronize("bot.example.com", token).await.unwrap_err();
            assert!(matches!(err, AdminError::NotConfigured(_)));
        }
        assert!(matches!(
            sync.clear("{API_KEY}").await.unwrap_err(),
            AdminError::NotConfigured(_)
        ));
        assert_eq!(sync.api().reads(), 0);
        assert!(sync.api().mutations().is_empty());
    }

    #[tokio::test]
    async fn upstream_error_is_passed_through() {
        let dir = tempfile::tempdir().unwrap();
        let sync = synchronizer(FakeWebhookApi::failing("Unauthorized"), dir.path());

        let err = sync.synchronize("bot.example.com", TOKEN).await.unwrap_err();
        assert!(matches!(err, AdminError::UpstreamFailure(ref m) if m == "Unauthorized"));
        assert_eq!(sync.api().reads(), 1);
    }

    #[tokio::test]
    async fn clear_removes_registration() {
        let dir = tempfile::tempdir().unwrap();
        let sync = synchronizer(FakeWebhookApi::default(), dir.path());
        sync.synchronize("bot.example.com", TOKEN).await.unwrap();

        sync.clear(TOKEN).await.unwrap();
        let info = sync.current_registration(TOKEN).await.unwrap();
        assert_eq!(info.url, None);
        assert_eq!(sync.api().mutations().last().map(String::as_str), Some("delete"));
    }
}
