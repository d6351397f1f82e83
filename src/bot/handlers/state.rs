use crate::config::Config;
use crate::db::Actor;
use crate::provision::DomainProvisioningOrchestrator;
use crate::service::ProcessController;
use crate::webhook::TelegramWebhookApi;
use std::sync::Arc;
use teloxide::types::{CallbackQuery, Message};

pub type Orchestrator = DomainProvisioningOrchestrator<TelegramWebhookApi>;

#[derive(Clone)]
pub struct BotState {
    pub config: Arc<Config>,
    pub process: Arc<ProcessController>,
    pub orchestrator: Arc<Orchestrator>,
}

pub fn sender_user_id(msg: &Message) -> Option<i64> {
    msg.from.as_ref().map(|user| user.id.0 as i64)
}

pub fn is_admin_message(msg: &Message, state: &BotState) -> bool {
    sender_user_id(msg).is_some_and(|user_id| state.config.is_admin(user_id))
}

pub fn message_actor(msg: &Message) -> Option<Actor> {
    sender_user_id(msg).map(|user_id| Actor::telegram(user_id, msg.chat.id.0))
}

pub fn callback_actor(q: &CallbackQuery) -> Actor {
    let admin_id = q.from.id.0 as i64;
    let chat_id = q
        .message
        .as_ref()
        .map(|msg| msg.chat().id.0)
        .unwrap_or(admin_id);
    Actor::telegram(admin_id, chat_id)
}
