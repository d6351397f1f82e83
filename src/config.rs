//! Конфигурация vpnbot-admin (TOML).

use serde::Deserialize;
use std::path::{Path, PathBuf};

const TOKEN_ENV: &str = "VPNBOT_ADMIN_TOKEN";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Токен админ-бота. Может быть задан через `VPNBOT_ADMIN_TOKEN`.
    #[serde(default)]
    pub bot_token: Option<String>,
    pub admin_ids: Vec<i64>,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub process: ProcessSection,
    #[serde(default)]
    pub proxy: ProxySection,
    #[serde(default)]
    pub certificates: CertificateSection,
    #[serde(default)]
    pub webhook: WebhookSection,
}

/// Управляемое приложение: его файл конфигурации и владелец.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub config_path: PathBuf,
    pub runtime_user: String,
    pub lint_binary: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("/var/www/vpnbot/config.php"),
            runtime_user: "www-data".to_string(),
            lint_binary: "php".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessSection {
    pub supervisor: String,
    pub service_name: String,
    pub log_path: PathBuf,
    pub fallback_log_path: PathBuf,
}

impl Default for ProcessSection {
    fn default() -> Self {
        Self {
            supervisor: "supervisorctl".to_string(),
            service_name: "vpnbot".to_string(),
            log_path: PathBuf::from("/var/log/vpnbot.log"),
            fallback_log_path: PathBuf::from("/var/www/vpnbot/logs/bot.log"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxySection {
    pub site_path: PathBuf,
    pub enabled_path: PathBuf,
    pub document_root: PathBuf,
    pub upstream: String,
    pub nginx_binary: String,
    pub service_manager: String,
    pub proxy_service: String,
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            site_path: PathBuf::from("/etc/nginx/sites-available/vpnbot"),
            enabled_path: PathBuf::from("/etc/nginx/sites-enabled/vpnbot"),
            document_root: PathBuf::from("/var/www/vpnbot"),
            upstream: "unix:/var/run/php/php8.2-fpm.sock".to_string(),
            nginx_binary: "nginx".to_string(),
            service_manager: "systemctl".to_string(),
            proxy_service: "nginx".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CertificateSection {
    pub client_binary: String,
    pub live_dir: PathBuf,
    pub diagnostic_lines: usize,
}

impl Default for CertificateSection {
    fn default() -> Self {
        Self {
            client_binary: "certbot".to_string(),
            live_dir: PathBuf::from("/etc/letsencrypt/live"),
            diagnostic_lines: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebhookSection {
    pub entrypoint: String,
    /// Хост для http-вебхука, пока для домена нет сертификата.
    pub fallback_host: String,
}

impl Default for WebhookSection {
    fn default() -> Self {
        Self {
            entrypoint: "index.php".to_string(),
            fallback_host: "127.0.0.1".to_string(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/vpnbot-admin/admin.db")
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Не удалось прочитать конфиг {}: {}", path.display(), e)
        })?;
        Self::parse(&content)
            .map_err(|e| anyhow::anyhow!("Некорректный конфиг {}: {}", path.display(), e))
    }

    pub fn parse(content: &str) -> Result<Self, anyhow::Error> {
        let config: Config = toml::from_str(content)?;
        if config.admin_ids.is_empty() {
            anyhow::bail!("admin_ids не может быть пустым");
        }
        Ok(config)
    }

    pub fn bot_token(&self) -> Result<String, anyhow::Error> {
        if let Ok(token) = std::env::var(TOKEN_ENV)
            && !token.trim().is_empty()
        {
            return Ok(token.trim().to_string());
        }
        self.bot_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Не задан bot_token (или {})", TOKEN_ENV))
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_stock_defaults() {
        let config = Config::parse("admin_ids = [42]\nbot_token = \"1:x\"\n").unwrap();
        assert!(config.is_admin(42));
        assert!(!config.is_admin(7));
        assert_eq!(config.process.supervisor, "supervisorctl");
        assert_eq!(config.app.runtime_user, "www-data");
        assert_eq!(config.webhook.entrypoint, "index.php");
        assert_eq!(config.certificates.diagnostic_lines, 10);
        assert_eq!(
            config.proxy.site_path,
            PathBuf::from("/etc/nginx/sites-available/vpnbot")
        );
    }

    #[test]
    fn sections_override_defaults() {
        let config = Config::parse(
            r#"
            admin_ids = [1, 2]
            db_path = "/tmp/admin.db"

            [process]
            service_name = "shop_bot"

            [webhook]
            fallback_host = "203.0.113.7"
            "#,
        )
        .unwrap();
        assert_eq!(config.process.service_name, "shop_bot");
        assert_eq!(config.process.supervisor, "supervisorctl");
        assert_eq!(config.webhook.fallback_host, "203.0.113.7");
        assert_eq!(config.db_path, PathBuf::from("/tmp/admin.db"));
    }

    #[test]
    fn empty_admin_list_is_rejected() {
        assert!(Config::parse("admin_ids = []").is_err());
        assert!(Config::parse("bot_token = \"x\"").is_err());
    }
}
