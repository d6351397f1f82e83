use crate::certificate::Certificate;
use crate::provision::{CertificateReport, ConfigOverview, CredentialsReport, DomainReport};
use crate::service::{LogTail, ProcessStatus, format_uptime};
use crate::webhook::WebhookRegistration;

/// Telegram режет сообщения длиннее 4096 символов.
pub const MESSAGE_LIMIT: usize = 4000;

fn yes_no(value: bool) -> &'static str {
    if value { "✅" } else { "❌" }
}

fn or_dash(value: Option<&str>) -> &str {
    value.filter(|v| !v.is_empty()).unwrap_or("—")
}

/// Оставляет конец текста, если он не помещается в одно сообщение.
pub fn fit_message(text: &str) -> String {
    let count = text.chars().count();
    if count <= MESSAGE_LIMIT {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - (MESSAGE_LIMIT - 2)).collect();
    format!("…\n{}", tail)
}

pub fn format_process_status(service_name: &str, status: &ProcessStatus) -> String {
    let mut out = format!(
        "Процесс {}: {} {}",
        service_name,
        yes_no(status.running),
        status.state
    );
    if let Some(pid) = status.pid {
        out.push_str(&format!("\nPID: {}", pid));
    }
    if let Some(cpu) = status.cpu_percent {
        out.push_str(&format!("\nCPU: {:.1}%", cpu));
    }
    if let Some(mem) = status.mem_percent {
        out.push_str(&format!("\nRAM: {:.1}%", mem));
    }
    if let Some(uptime) = status.uptime {
        out.push_str(&format!("\nUptime: {}", format_uptime(uptime)));
    }
    if !status.running && !status.raw.is_empty() {
        out.push_str(&format!("\n\n{}", status.raw));
    }
    out
}

pub fn format_registration(registration: &WebhookRegistration) -> String {
    let mut out = format!(
        "Webhook: {}\nОжидают доставки: {}",
        or_dash(registration.url.as_deref()),
        registration.pending_update_count
    );
    if let Some(error) = registration.last_error.as_deref() {
        out.push_str(&format!("\nПоследняя ошибка: {}", error));
    }
    out
}

pub fn format_certificate(domain: &str, certificate: Option<&Certificate>) -> String {
    match certificate {
        Some(cert) => match cert.expires_at {
            Some(expires) => format!(
                "SSL {}: ✅ до {}",
                cert.domain,
                expires.format("%Y-%m-%d %H:%M UTC")
            ),
            None => format!("SSL {}: ✅ (срок не прочитан)", cert.domain),
        },
        None => format!("SSL {}: ❌ не выпущен", domain),
    }
}

pub fn format_log_tail(tail: &LogTail) -> String {
    if tail.lines.is_empty() {
        return format!("Лог {} пуст.", tail.path.display());
    }
    fit_message(&format!(
        "📜 {} (последние {} строк)\n\n{}",
        tail.path.display(),
        tail.lines.len(),
        tail.lines.join("\n")
    ))
}

pub fn format_domain_report(report: &DomainReport) -> String {
    let header = if report.success { "✅" } else { "⚠️" };
    fit_message(&format!(
        "{} {}\n\n\
         Домен: {}\n\
         config.php: {}\n\
         nginx: {}\n\
         reload: {}\n\
         SSL: {}\n\
         Webhook: {}\n\n\
         {}",
        header,
        report.message,
        report.domain,
        report.config,
        report.proxy_update,
        report.proxy_reload,
        report.certificate,
        report.webhook,
        report.ssl
    ))
}

pub fn format_certificate_report(report: &CertificateReport) -> String {
    let mut out = format!("{} {}", yes_no(report.success), report.message);
    if report.success {
        out.push_str(&format!("\nWebhook: {}", report.webhook));
    }
    if !report.details.is_empty() {
        out.push_str(&format!("\n\n{}", report.details));
    }
    fit_message(&out)
}

pub fn format_credentials_report(report: &CredentialsReport) -> String {
    format!(
        "{} {}\n\
         Username: {}\n\
         Webhook: {}\n\
         Перезапуск бота: {}",
        yes_no(report.success),
        report.message,
        or_dash(report.bot_username.as_deref()),
        report.webhook,
        yes_no(report.bot_restarted)
    )
}

pub fn format_overview(overview: &ConfigOverview) -> String {
    format!(
        "🛠 Конфигурация бота\n\n\
         Токен: {}\n\
         Admin ID: {}\n\
         Домен: {} {}\n\
         Username: {}",
        yes_no(overview.bot_token_configured),
        yes_no(overview.admin_id_configured),
        yes_no(overview.domain_configured),
        or_dash(overview.domain.as_deref()),
        or_dash(overview.bot_username.as_deref())
    )
}

pub fn help_text() -> &'static str {
    r#"Команды:
/status — состояние процесса бота и webhook
/service <start|stop|restart|status> — управление процессом бота
/logs [n] — последние строки лога (по умолчанию 50, максимум 500)
/clearlogs — очистить лог бота
/domain <домен> [email] — сменить домен: config.php, nginx, SSL, webhook
/ssl <домен> <email> — выпустить SSL-сертификат
/renew — продлить все сертификаты
/webhook [info|sync|clear] — webhook управляемого бота
/settoken <токен> <admin_id> [домен] — сменить токен бота
/config — сводка настроек бота"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::StepOutcome;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn long_text_keeps_its_end() {
        let text = format!("{}END", "x".repeat(MESSAGE_LIMIT * 2));
        let fitted = fit_message(&text);
        assert_eq!(fitted.chars().count(), MESSAGE_LIMIT);
        assert!(fitted.starts_with('…'));
        assert!(fitted.ends_with("END"));
        assert_eq!(fit_message("short"), "short");
    }

    #[test]
    fn running_status_shows_metrics() {
        let status = ProcessStatus {
            state: "RUNNING".to_string(),
            running: true,
            pid: Some(4821),
            cpu_percent: Some(1.5),
            mem_percent: Some(3.25),
            uptime: Some(Duration::from_secs(3725)),
            raw: "vpnbot RUNNING pid 4821, uptime 1:02:05".to_string(),
        };
        let text = format_process_status("vpnbot", &status);
        assert!(text.contains("PID: 4821"));
        assert!(text.contains("CPU: 1.5%"));
        assert!(text.contains("RAM: 3.2%") || text.contains("RAM: 3.3%"));
        assert!(!text.contains("uptime 1:02:05"));
    }

    #[test]
    fn empty_registration_is_dashed() {
        let text = format_registration(&WebhookRegistration::default());
        assert!(text.starts_with("Webhook: —"));
    }

    #[test]
    fn empty_log_has_its_own_message() {
        let tail = LogTail {
            path: PathBuf::from("/var/log/vpnbot.log"),
            lines: Vec::new(),
        };
        assert_eq!(format_log_tail(&tail), "Лог /var/log/vpnbot.log пуст.");
    }

    #[test]
    fn certificate_report_hides_webhook_on_failure() {
        let report = CertificateReport {
            success: false,
            message: "Ошибка выпуска SSL".to_string(),
            details: "Challenge failed".to_string(),
            webhook: StepOutcome::Skipped("SSL не выпущен".to_string()),
        };
        let text = format_certificate_report(&report);
        assert!(text.contains("Challenge failed"));
        assert!(!text.contains("Webhook"));
    }
}
