use super::commands::webhook_action_text;
use super::shared::{
    HandlerResult, callback_message_target, callback_prefix_filter, parse_service_payload,
    require_admin_callback, service_panel_text,
};
use super::state::{BotState, callback_actor};
use teloxide::dptree;
use teloxide::prelude::*;

pub fn handler()
-> teloxide::dispatching::UpdateHandler<Box<dyn std::error::Error + Send + Sync + 'static>> {
    Update::filter_callback_query()
        .branch(
            dptree::filter_map(callback_prefix_filter("service:")).endpoint(callback_service_action),
        )
        .branch(
            dptree::filter_map(callback_prefix_filter("webhook:")).endpoint(callback_webhook_action),
        )
}

async fn callback_service_action(bot: Bot, q: CallbackQuery, state: BotState) -> HandlerResult {
    if require_admin_callback(&bot, &q, &state).await?.is_none() {
        return Ok(());
    }

    let data = q.data.as_deref().unwrap_or("");
    let Some(action) = parse_service_payload(data) else {
        bot.answer_callback_query(q.id.clone())
            .text("Неизвестное действие")
            .await?;
        return Ok(());
    };

    let actor = callback_actor(&q);
    let text = match action {
        Some(action) => {
            tracing::info!(action = action.as_str(), admin_id = actor.admin_id, "Service callback received");
            let result = state.process.control(&actor, action).await;
            bot.answer_callback_query(q.id.clone())
                .text(if result.success { "Выполнено" } else { "Ошибка" })
                .await?;
            service_panel_text(&state, Some((action, &result)))
        }
        None => {
            bot.answer_callback_query(q.id.clone()).await?;
            service_panel_text(&state, None)
        }
    };

    if let Some((chat_id, message_id)) = callback_message_target(&q) {
        bot.edit_message_text(chat_id, message_id, text)
            .reply_markup(crate::bot::keyboards::service_control_buttons())
            .await?;
    }
    Ok(())
}

async fn callback_webhook_action(bot: Bot, q: CallbackQuery, state: BotState) -> HandlerResult {
    if require_admin_callback(&bot, &q, &state).await?.is_none() {
        return Ok(());
    }

    let data = q.data.as_deref().unwrap_or("");
    let action = data.strip_prefix("webhook:").unwrap_or("info");
    let actor = callback_actor(&q);
    tracing::info!(action = action, admin_id = actor.admin_id, "Webhook callback received");

    let Some(text) = webhook_action_text(&state, &actor, action).await else {
        bot.answer_callback_query(q.id.clone())
            .text("Неизвестное действие")
            .await?;
        return Ok(());
    };
    bot.answer_callback_query(q.id.clone()).await?;

    if let Some((chat_id, message_id)) = callback_message_target(&q) {
        // Telegram отвергает правку без изменений текста.
        if let Err(error) = bot
            .edit_message_text(chat_id, message_id, text)
            .reply_markup(crate::bot::keyboards::webhook_buttons())
            .await
        {
            tracing::debug!(error = %error, "Webhook panel not edited");
        }
    }
    Ok(())
}
