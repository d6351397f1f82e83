use super::commands::{cmd_config, cmd_help, cmd_logs, cmd_status, cmd_webhook};
use super::shared::{HandlerResult, admin_show_service_panel};
use super::state::{BotState, is_admin_message};
use teloxide::prelude::*;

pub async fn handle_menu_buttons(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    if !is_admin_message(&msg, &state) {
        bot.send_message(msg.chat.id, "Доступ запрещён.").await?;
        return Ok(());
    }

    match text {
        crate::bot::keyboards::BTN_STATUS => cmd_status(bot, msg, state).await?,
        crate::bot::keyboards::BTN_SERVICE => {
            admin_show_service_panel(&bot, msg.chat.id, &state).await?;
        }
        crate::bot::keyboards::BTN_LOGS => cmd_logs(bot, msg, state).await?,
        crate::bot::keyboards::BTN_WEBHOOK => cmd_webhook(bot, msg, state).await?,
        crate::bot::keyboards::BTN_CONFIG => cmd_config(bot, msg, state).await?,
        crate::bot::keyboards::BTN_HELP => cmd_help(bot, msg, state).await?,
        _ => {
            bot.send_message(
                msg.chat.id,
                "Не понял команду. Используйте кнопки админ-меню или /help.",
            )
            .reply_markup(crate::bot::keyboards::admin_menu())
            .await?;
        }
    }
    Ok(())
}
