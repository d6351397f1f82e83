use super::format::{
    format_certificate_report, format_credentials_report, format_domain_report, format_log_tail,
    format_overview, format_registration, help_text,
};
use super::shared::{
    HandlerResult, admin_show_service_panel, error_text, parse_log_lines, service_panel_text,
    status_text, sync_outcome_text,
};
use super::state::{BotState, is_admin_message, message_actor, sender_user_id};
use crate::db::Actor;
use crate::service::ServiceAction;
use teloxide::dptree;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
pub enum BotCommand {
    #[command(description = "Панель администратора")]
    Start,
    #[command(description = "Справка")]
    Help,
    #[command(description = "Состояние бота и webhook")]
    Status,
    #[command(description = "Управление процессом бота")]
    Service,
    #[command(description = "Последние строки лога")]
    Logs,
    #[command(description = "Очистить лог")]
    ClearLogs,
    #[command(description = "Сменить домен")]
    Domain,
    #[command(description = "Выпустить SSL-сертификат")]
    Ssl,
    #[command(description = "Продлить сертификаты")]
    Renew,
    #[command(description = "Webhook управляемого бота")]
    Webhook,
    #[command(description = "Сменить токен бота")]
    SetToken,
    #[command(description = "Сводка настроек")]
    Config,
}

pub fn handler()
-> teloxide::dispatching::UpdateHandler<Box<dyn std::error::Error + Send + Sync + 'static>> {
    teloxide::filter_command::<BotCommand, _>()
        .branch(dptree::case![BotCommand::Start].endpoint(cmd_start))
        .branch(dptree::case![BotCommand::Help].endpoint(cmd_help))
        .branch(dptree::case![BotCommand::Status].endpoint(cmd_status))
        .branch(dptree::case![BotCommand::Service].endpoint(cmd_service))
        .branch(dptree::case![BotCommand::Logs].endpoint(cmd_logs))
        .branch(dptree::case![BotCommand::ClearLogs].endpoint(cmd_clear_logs))
        .branch(dptree::case![BotCommand::Domain].endpoint(cmd_domain))
        .branch(dptree::case![BotCommand::Ssl].endpoint(cmd_ssl))
        .branch(dptree::case![BotCommand::Renew].endpoint(cmd_renew))
        .branch(dptree::case![BotCommand::Webhook].endpoint(cmd_webhook))
        .branch(dptree::case![BotCommand::SetToken].endpoint(cmd_set_token))
        .branch(dptree::case![BotCommand::Config].endpoint(cmd_config))
}

/// Аргументы после имени команды. Для кнопок меню аргументов нет.
fn command_args(msg: &Message) -> Vec<String> {
    let text = msg.text().unwrap_or("");
    if !text.starts_with('/') {
        return Vec::new();
    }
    text.split_whitespace()
        .skip(1)
        .map(str::to_string)
        .collect()
}

/// Актор для админской команды; посторонним отвечает отказом.
async fn admin_actor(
    bot: &Bot,
    msg: &Message,
    state: &BotState,
) -> Result<Option<Actor>, teloxide::RequestError> {
    if !is_admin_message(msg, state) {
        tracing::warn!(user_id = ?sender_user_id(msg), "Command from non-admin rejected");
        bot.send_message(msg.chat.id, "Доступ запрещён.").await?;
        return Ok(None);
    }
    Ok(message_actor(msg))
}

async fn cmd_start(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    if admin_actor(&bot, &msg, &state).await?.is_none() {
        return Ok(());
    }
    tracing::info!(user_id = ?sender_user_id(&msg), "Received /start command");
    bot.send_message(
        msg.chat.id,
        "Добро пожаловать в панель администратора. Используйте кнопки ниже.",
    )
    .reply_markup(crate::bot::keyboards::admin_menu())
    .await?;
    Ok(())
}

pub async fn cmd_help(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    if admin_actor(&bot, &msg, &state).await?.is_none() {
        return Ok(());
    }
    bot.send_message(msg.chat.id, help_text())
        .reply_markup(crate::bot::keyboards::admin_menu())
        .await?;
    Ok(())
}

pub async fn cmd_status(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    if admin_actor(&bot, &msg, &state).await?.is_none() {
        return Ok(());
    }
    bot.send_message(msg.chat.id, status_text(&state).await)
        .reply_markup(crate::bot::keyboards::admin_menu())
        .await?;
    Ok(())
}

async fn cmd_service(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    let Some(actor) = admin_actor(&bot, &msg, &state).await? else {
        return Ok(());
    };

    let args = command_args(&msg);
    let action = args.first().map(String::as_str).unwrap_or("status");
    tracing::info!(action = action, admin_id = actor.admin_id, "Admin command /service");

    if action == "status" {
        return admin_show_service_panel(&bot, msg.chat.id, &state).await;
    }
    let Some(action) = ServiceAction::parse(action) else {
        bot.send_message(msg.chat.id, "Использование: /service <start|stop|restart|status>")
            .await?;
        return Ok(());
    };

    let result = state.process.control(&actor, action).await;
    bot.send_message(msg.chat.id, service_panel_text(&state, Some((action, &result))))
        .reply_markup(crate::bot::keyboards::service_control_buttons())
        .await?;
    Ok(())
}

pub async fn cmd_logs(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    if admin_actor(&bot, &msg, &state).await?.is_none() {
        return Ok(());
    }
    let args = command_args(&msg);
    let lines = match parse_log_lines(args.first().map(String::as_str)) {
        Ok(lines) => lines,
        Err(text) => {
            bot.send_message(msg.chat.id, format!("{}\nИспользование: /logs [n]", text))
                .await?;
            return Ok(());
        }
    };

    let reply = match state.process.tail_logs(lines) {
        Ok(tail) => format_log_tail(&tail),
        Err(error) => error_text(&error),
    };
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

async fn cmd_clear_logs(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    let Some(actor) = admin_actor(&bot, &msg, &state).await? else {
        return Ok(());
    };
    let reply = match state.process.clear_logs(&actor).await {
        Ok(path) => format!("🧹 Лог {} очищен.", path.display()),
        Err(error) => error_text(&error),
    };
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

async fn cmd_domain(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    let Some(actor) = admin_actor(&bot, &msg, &state).await? else {
        return Ok(());
    };
    let args = command_args(&msg);
    let Some(domain) = args.first() else {
        bot.send_message(msg.chat.id, "Использование: /domain <домен> [email]")
            .await?;
        return Ok(());
    };
    tracing::info!(domain = %domain, admin_id = actor.admin_id, "Admin command /domain");

    bot.send_message(
        msg.chat.id,
        format!("⏳ Настраиваю {}: config.php, nginx, SSL, webhook…", domain),
    )
    .await?;
    let report = state
        .orchestrator
        .apply_domain(&actor, domain, args.get(1).map(String::as_str))
        .await;
    bot.send_message(msg.chat.id, format_domain_report(&report))
        .await?;
    Ok(())
}

async fn cmd_ssl(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    let Some(actor) = admin_actor(&bot, &msg, &state).await? else {
        return Ok(());
    };
    let args = command_args(&msg);
    let (Some(domain), Some(email)) = (args.first(), args.get(1)) else {
        bot.send_message(msg.chat.id, "Использование: /ssl <домен> <email>")
            .await?;
        return Ok(());
    };
    tracing::info!(domain = %domain, admin_id = actor.admin_id, "Admin command /ssl");

    let reply = match state.orchestrator.issue_certificate(&actor, domain, email).await {
        Ok(report) => format_certificate_report(&report),
        Err(error) => error_text(&error),
    };
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

async fn cmd_renew(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    let Some(actor) = admin_actor(&bot, &msg, &state).await? else {
        return Ok(());
    };
    let report = state.orchestrator.renew_certificates(&actor).await;
    bot.send_message(msg.chat.id, format_certificate_report(&report))
        .await?;
    Ok(())
}

/// Ответ на `/webhook <действие>` и на кнопки `webhook:*`.
pub async fn webhook_action_text(state: &BotState, actor: &Actor, action: &str) -> Option<String> {
    let text = match action {
        "info" => match state.orchestrator.webhook_info().await {
            Ok(registration) => format_registration(&registration),
            Err(error) => error_text(&error),
        },
        "sync" => match state.orchestrator.sync_webhook(actor).await {
            Ok(outcome) => sync_outcome_text(&outcome),
            Err(error) => error_text(&error),
        },
        "clear" => match state.orchestrator.clear_webhook(actor).await {
            Ok(()) => "🗑 Webhook удалён, ожидающие обновления сброшены.".to_string(),
            Err(error) => error_text(&error),
        },
        _ => return None,
    };
    Some(text)
}

pub async fn cmd_webhook(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    let Some(actor) = admin_actor(&bot, &msg, &state).await? else {
        return Ok(());
    };
    let args = command_args(&msg);
    let action = args.first().map(String::as_str).unwrap_or("info");
    match webhook_action_text(&state, &actor, action).await {
        Some(text) => {
            bot.send_message(msg.chat.id, text)
                .reply_markup(crate::bot::keyboards::webhook_buttons())
                .await?;
        }
        None => {
            bot.send_message(msg.chat.id, "Использование: /webhook [info|sync|clear]")
                .await?;
        }
    }
    Ok(())
}

async fn cmd_set_token(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    let Some(actor) = admin_actor(&bot, &msg, &state).await? else {
        return Ok(());
    };
    let args = command_args(&msg);
    let (Some(token), Some(admin_id)) = (args.first(), args.get(1)) else {
        bot.send_message(
            msg.chat.id,
            "Использование: /settoken <токен> <admin_id> [домен]",
        )
        .await?;
        return Ok(());
    };
    tracing::info!(admin_id = actor.admin_id, "Admin command /settoken");

    // Токен не должен оставаться в истории чата.
    if let Err(error) = bot.delete_message(msg.chat.id, msg.id).await {
        tracing::warn!(error = %error, "Failed to delete message with bot token");
    }

    let reply = match state
        .orchestrator
        .update_bot_config(&actor, token, admin_id, args.get(2).map(String::as_str))
        .await
    {
        Ok(report) => format_credentials_report(&report),
        Err(error) => error_text(&error),
    };
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

pub async fn cmd_config(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    if admin_actor(&bot, &msg, &state).await?.is_none() {
        return Ok(());
    }
    let reply = match state.orchestrator.config_overview() {
        Ok(overview) => format_overview(&overview),
        Err(error) => error_text(&error),
    };
    bot.send_message(msg.chat.id, reply)
        .reply_markup(crate::bot::keyboards::admin_menu())
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_with_lowercase_names() {
        let parsed = BotCommand::parse("/clearlogs", "vpnbot_admin_bot");
        assert!(matches!(parsed, Ok(BotCommand::ClearLogs)));
        let parsed = BotCommand::parse("/settoken", "vpnbot_admin_bot");
        assert!(matches!(parsed, Ok(BotCommand::SetToken)));
        assert!(BotCommand::parse("/unknown", "vpnbot_admin_bot").is_err());
    }

    #[test]
    fn help_lists_every_command() {
        let help = help_text();
        for command in [
            "/status", "/service", "/logs", "/clearlogs", "/domain", "/ssl", "/renew", "/webhook",
            "/settoken", "/config",
        ] {
            assert!(help.contains(command), "{command} missing from help");
        }
    }
}
