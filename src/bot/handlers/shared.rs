use super::format::{
    fit_message, format_certificate, format_process_status, format_registration,
};
use super::state::BotState;
use crate::error::AdminError;
use crate::service::{ServiceAction, ServiceResult};
use crate::webhook::SyncOutcome;
use teloxide::prelude::*;

pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

pub const DEFAULT_LOG_LINES: usize = 50;
pub const MAX_LOG_LINES: usize = 500;

/// `/logs 120` -> 120; без аргумента 50, сверху ограничено 500.
pub fn parse_log_lines(arg: Option<&str>) -> Result<usize, String> {
    let Some(raw) = arg.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(DEFAULT_LOG_LINES);
    };
    match raw.parse::<usize>() {
        Ok(0) | Err(_) => Err(format!("Некорректное число строк: {}", raw)),
        Ok(n) => Ok(n.min(MAX_LOG_LINES)),
    }
}

/// `service:restart` -> Some(Some(Restart)); `service:status` -> Some(None).
pub fn parse_service_payload(data: &str) -> Option<Option<ServiceAction>> {
    match data.strip_prefix("service:")? {
        "status" => Some(None),
        other => ServiceAction::parse(other).map(Some),
    }
}

pub fn callback_message_target(q: &CallbackQuery) -> Option<(ChatId, teloxide::types::MessageId)> {
    q.message.as_ref().map(|msg| (msg.chat().id, msg.id()))
}

pub fn callback_prefix_filter(prefix: &'static str) -> impl Fn(CallbackQuery) -> Option<CallbackQuery> {
    move |q: CallbackQuery| {
        if q.data.as_deref().is_some_and(|payload| payload.starts_with(prefix)) {
            Some(q)
        } else {
            None
        }
    }
}

pub async fn require_admin_callback(
    bot: &Bot,
    q: &CallbackQuery,
    state: &BotState,
) -> Result<Option<i64>, anyhow::Error> {
    let admin_id = q.from.id.0 as i64;
    if !state.config.is_admin(admin_id) {
        bot.answer_callback_query(q.id.clone())
            .text("Недостаточно прав")
            .show_alert(true)
            .await?;
        return Ok(None);
    }
    Ok(Some(admin_id))
}

pub fn service_panel_text(
    state: &BotState,
    last: Option<(ServiceAction, &ServiceResult)>,
) -> String {
    let status = state.process.status();
    let mut text = format!(
        "⚙️ Процесс бота\n\n{}",
        format_process_status(state.process.service_name(), &status)
    );
    if let Some((action, result)) = last {
        text.push_str("\n\n");
        text.push_str(&state.process.format_result(action.as_str(), result));
    }
    fit_message(&text)
}

pub async fn admin_show_service_panel(
    bot: &Bot,
    chat_id: ChatId,
    state: &BotState,
) -> HandlerResult {
    bot.send_message(chat_id, service_panel_text(state, None))
        .reply_markup(crate::bot::keyboards::service_control_buttons())
        .await?;
    Ok(())
}

/// Процесс, webhook и сертификат текущего домена одним сообщением.
pub async fn status_text(state: &BotState) -> String {
    let status = state.process.status();
    let mut text = format!(
        "📊 Состояние\n\n{}",
        format_process_status(state.process.service_name(), &status)
    );

    match state.orchestrator.webhook_info().await {
        Ok(registration) => {
            text.push_str("\n\n");
            text.push_str(&format_registration(&registration));
        }
        Err(error) => text.push_str(&format!("\n\nWebhook: {}", error)),
    }

    match state.orchestrator.proxy().current_binding() {
        Ok(Some(binding)) => text.push_str(&format!(
            "\nnginx: {} → {}",
            binding.domain, binding.upstream
        )),
        Ok(None) => text.push_str("\nnginx: сайт не настроен"),
        Err(error) => text.push_str(&format!("\nnginx: {}", error)),
    }
    if let Ok(overview) = state.orchestrator.config_overview()
        && let Some(domain) = overview.domain.as_deref()
    {
        let certificate = state.orchestrator.certificates().certificate(domain);
        text.push('\n');
        text.push_str(&format_certificate(domain, certificate.as_ref()));
    }
    fit_message(&text)
}

pub fn sync_outcome_text(outcome: &SyncOutcome) -> String {
    match outcome {
        SyncOutcome::Updated(url) => format!("✅ Webhook установлен: {}", url),
        SyncOutcome::Unchanged(url) => format!("Webhook уже указывает на {}", url),
    }
}

pub fn error_text(error: &AdminError) -> String {
    fit_message(&format!("❌ {}", error))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_lines_default_and_cap() {
        assert_eq!(parse_log_lines(None), Ok(DEFAULT_LOG_LINES));
        assert_eq!(parse_log_lines(Some("  ")), Ok(DEFAULT_LOG_LINES));
        assert_eq!(parse_log_lines(Some("120")), Ok(120));
        assert_eq!(parse_log_lines(Some("100000")), Ok(MAX_LOG_LINES));
        assert!(parse_log_lines(Some("0")).is_err());
        assert!(parse_log_lines(Some("-5")).is_err());
        assert!(parse_log_lines(Some("abc")).is_err());
    }

    #[test]
    fn service_payloads() {
        assert_eq!(parse_service_payload("service:status"), Some(None));
        assert_eq!(
            parse_service_payload("service:restart"),
            Some(Some(ServiceAction::Restart))
        );
        assert_eq!(parse_service_payload("service:reload"), None);
        assert_eq!(parse_service_payload("webhook:sync"), None);
    }

    #[test]
    fn error_text_is_prefixed() {
        let text = error_text(&AdminError::NotConfigured("домен".to_string()));
        assert_eq!(text, "❌ Не настроено: домен");
    }
}
