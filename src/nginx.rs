//! Конфигурация nginx для домена бота: генерация, правка server_name, проверка и reload.

use crate::certificate::{CertificateManager, IssueOutcome};
use crate::command::CommandRunner;
use crate::error::{AdminError, AdminResult};
use regex::{Captures, Regex};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

static SERVER_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(server_name\s+)([^;]+)(;)").expect("server_name pattern is valid")
});

static DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(root|fastcgi_pass)\s+([^;]+);").expect("directive pattern is valid")
});

/// certbot помечает свои правки этим комментарием.
const CERTBOT_MARKER: &str = "# managed by Certbot";

/// Привязка домена к приложению: один server-блок.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyDomainBinding {
    pub domain: String,
    pub document_root: PathBuf,
    pub upstream: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyUpdate {
    pub binding: ProxyDomainBinding,
    /// Файл сайта создан с нуля по шаблону.
    pub created: bool,
    pub changed: bool,
}

/// Итог установки сертификата: выпуск и reload после него по отдельности.
#[derive(Debug)]
pub struct CertificateInstall {
    pub issued: IssueOutcome,
    /// Сертификат уже на диске, даже если nginx не принял правки certbot.
    pub reload: AdminResult<()>,
}

pub struct ProxySettings {
    pub site_path: PathBuf,
    pub enabled_path: PathBuf,
    pub document_root: PathBuf,
    pub upstream: String,
    pub nginx_binary: String,
    pub service_manager: String,
    pub proxy_service: String,
    pub file_owner: String,
}

pub struct ReverseProxyManager {
    settings: ProxySettings,
    runner: Arc<dyn CommandRunner>,
}

impl ReverseProxyManager {
    pub fn new(settings: ProxySettings, runner: Arc<dyn CommandRunner>) -> Self {
        Self { settings, runner }
    }

    pub fn binding_for(&self, domain: &str) -> ProxyDomainBinding {
        ProxyDomainBinding {
            domain: domain.to_string(),
            document_root: self.settings.document_root.clone(),
            upstream: self.settings.upstream.clone(),
        }
    }

    /// Привязка, которая сейчас записана в файле сайта.
    pub fn current_binding(&self) -> AdminResult<Option<ProxyDomainBinding>> {
        let path = &self.settings.site_path;
        if !path.is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(path).map_err(|e| AdminError::io(path, e))?;
        Ok(parse_binding(&content))
    }

    pub fn update_domain(&self, domain: &str) -> AdminResult<ProxyUpdate> {
        let domain = normalize_domain(domain)?;
        let path = &self.settings.site_path;
        let binding = self.binding_for(&domain);

        let previous = if path.is_file() {
            Some(fs::read_to_string(path).map_err(|e| AdminError::io(path, e))?)
        } else {
            None
        };
        let candidate = match previous.as_deref() {
            Some(content) => rebind(content, &binding).unwrap_or_else(|| render_site(&binding)),
            None => render_site(&binding),
        };

        if previous.as_deref() == Some(candidate.as_str()) {
            tracing::info!(domain = %domain, path = %path.display(), "Proxy site already bound to domain");
            self.ensure_enabled();
            return Ok(ProxyUpdate {
                binding,
                created: false,
                changed: false,
            });
        }

        self.write_site(&candidate)?;
        self.ensure_enabled();

        if let Err(error) = self.test_config() {
            tracing::error!(domain = %domain, error = %error, "Proxy config test failed, restoring previous site file");
            match previous.as_deref() {
                Some(content) => self.write_site(content)?,
                None => {
                    if let Err(e) = fs::remove_file(path) {
                        tracing::warn!(error = %e, "Failed to remove rejected site file");
                    }
                }
            }
            return Err(error);
        }

        tracing::info!(
            domain = %domain,
            path = %path.display(),
            created = previous.is_none(),
            "Proxy site bound to domain"
        );
        Ok(ProxyUpdate {
            binding,
            created: previous.is_none(),
            changed: true,
        })
    }

    /// `nginx -t`; текст диагностики возвращается как есть.
    pub fn test_config(&self) -> AdminResult<()> {
        let out = self.runner.run(&self.settings.nginx_binary, &["-t"]);
        if out.success() {
            Ok(())
        } else {
            Err(AdminError::InvalidResult(out.tail(20)))
        }
    }

    pub fn reload(&self) -> AdminResult<()> {
        self.test_config()?;
        let out = self.runner.run(
            &self.settings.service_manager,
            &["reload", self.settings.proxy_service.as_str()],
        );
        if !out.success() {
            return Err(AdminError::UpstreamFailure(format!(
                "Не удалось перезагрузить {}: {}",
                self.settings.proxy_service,
                out.tail(10)
            )));
        }
        tracing::info!(service = %self.settings.proxy_service, "Proxy reloaded");
        Ok(())
    }

    pub fn install_certificate(
        &self,
        domain: &str,
        email: Option<&str>,
        certificates: &CertificateManager,
    ) -> AdminResult<CertificateInstall> {
        let domain = normalize_domain(domain)?;
        let issued = certificates.issue(&domain, email)?;
        let reload = self.reload();
        if let Err(error) = &reload {
            tracing::error!(domain = %domain, error = %error, "Proxy reload failed after certificate issuance");
        }
        Ok(CertificateInstall { issued, reload })
    }

    fn write_site(&self, content: &str) -> AdminResult<()> {
        let path = &self.settings.site_path;
        let dir = path
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let denied = || AdminError::PermissionDenied {
            path: path.clone(),
            remediation: AdminError::remediation_for(path, &self.settings.file_owner, "664"),
        };
        let map_io = |e: std::io::Error, at: &Path| match e.kind() {
            std::io::ErrorKind::PermissionDenied => denied(),
            _ => AdminError::io(at, e),
        };

        fs::create_dir_all(dir).map_err(|e| map_io(e, dir))?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".vpnbot-site.")
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(|e| map_io(e, dir))?;
        tmp.write_all(content.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| map_io(e, path))?;
        let perms = fs::metadata(path)
            .map(|m| m.permissions())
            .unwrap_or_else(|_| std::os::unix::fs::PermissionsExt::from_mode(0o644));
        if let Err(error) = fs::set_permissions(tmp.path(), perms) {
            tracing::debug!(error = %error, "Could not set site file mode");
        }
        tmp.persist(path).map_err(|e| map_io(e.error, path))?;
        Ok(())
    }

    fn ensure_enabled(&self) {
        let link = &self.settings.enabled_path;
        if link.exists() || link.is_symlink() {
            return;
        }
        if let Some(parent) = link.parent()
            && let Err(error) = fs::create_dir_all(parent)
        {
            tracing::warn!(path = %parent.display(), error = %error, "Cannot create sites-enabled directory");
            return;
        }
        if let Err(error) = std::os::unix::fs::symlink(&self.settings.site_path, link) {
            tracing::warn!(
                link = %link.display(),
                error = %error,
                "Failed to enable proxy site"
            );
        }
    }
}

/// Приводит домен к нижнему регистру и отбрасывает то, что сломает конфиг.
pub fn normalize_domain(domain: &str) -> AdminResult<String> {
    let domain = domain.trim().trim_end_matches('.').to_ascii_lowercase();
    let valid_label = |label: &str| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
    };
    if domain.is_empty() || domain.len() > 253 || !domain.split('.').all(valid_label) {
        return Err(AdminError::InvalidResult(format!(
            "Некорректный домен: {:?}",
            domain
        )));
    }
    Ok(domain)
}

pub fn render_site(binding: &ProxyDomainBinding) -> String {
    format!(
        r#"server {{
    listen 80;
    listen [::]:80;
    server_name {domain};

    root {root};
    index index.php index.html;

    add_header X-Frame-Options "SAMEORIGIN" always;
    add_header X-Content-Type-Options "nosniff" always;

    location / {{
        try_files $uri $uri/ /index.php?$query_string;
    }}

    location ~ \.php$ {{
        include snippets/fastcgi-php.conf;
        fastcgi_pass {upstream};
        fastcgi_param SCRIPT_FILENAME $document_root$fastcgi_script_name;
        include fastcgi_params;
    }}

    location ~ /\. {{
        deny all;
    }}

    location ~ /config\.php$ {{
        deny all;
    }}
}}
"#,
        domain = binding.domain,
        root = binding.document_root.display(),
        upstream = binding.upstream,
    )
}

/// Правка на месте. `None`, если файл надо пересоздать по шаблону.
fn rebind(content: &str, binding: &ProxyDomainBinding) -> Option<String> {
    let current = parse_binding(content)?;
    if content.contains(CERTBOT_MARKER) && current.domain != binding.domain {
        // Блоки certbot ссылаются на сертификат старого домена.
        return None;
    }
    let replaced = SERVER_NAME.replace_all(content, |caps: &Captures| {
        format!("{}{}{}", &caps[1], binding.domain, &caps[3])
    });
    Some(replaced.into_owned())
}

fn parse_binding(content: &str) -> Option<ProxyDomainBinding> {
    let domain = SERVER_NAME
        .captures(content)?
        .get(2)?
        .as_str()
        .split_whitespace()
        .next()?
        .to_string();
    let mut document_root = PathBuf::new();
    let mut upstream = String::new();
    for caps in DIRECTIVE.captures_iter(content) {
        match &caps[1] {
            "root" if document_root.as_os_str().is_empty() => {
                document_root = PathBuf::from(caps[2].trim());
            }
            "fastcgi_pass" if upstream.is_empty() => upstream = caps[2].trim().to_string(),
            _ => {}
        }
    }
    Some(ProxyDomainBinding {
        domain,
        document_root,
        upstream,
    })
}
