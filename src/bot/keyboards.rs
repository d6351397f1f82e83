//! Клавиатуры бота: inline и постоянные reply-кнопки.

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup};

pub const BTN_STATUS: &str = "📊 Статус";
pub const BTN_SERVICE: &str = "⚙️ Процесс бота";
pub const BTN_LOGS: &str = "📜 Логи";
pub const BTN_WEBHOOK: &str = "🔗 Webhook";
pub const BTN_CONFIG: &str = "🛠 Конфигурация";
pub const BTN_HELP: &str = "❓ Справка";

pub fn admin_menu() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![
        vec![KeyboardButton::new(BTN_STATUS), KeyboardButton::new(BTN_SERVICE)],
        vec![KeyboardButton::new(BTN_LOGS), KeyboardButton::new(BTN_WEBHOOK)],
        vec![KeyboardButton::new(BTN_CONFIG), KeyboardButton::new(BTN_HELP)],
    ])
    .resize_keyboard()
    .persistent()
}

pub fn service_control_buttons() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::default()
        .append_row(vec![
            InlineKeyboardButton::callback("🔄 Обновить", "service:status"),
            InlineKeyboardButton::callback("♻️ Рестарт", "service:restart"),
        ])
        .append_row(vec![
            InlineKeyboardButton::callback("▶️ Старт", "service:start"),
            InlineKeyboardButton::callback("⏹ Стоп", "service:stop"),
        ])
}

pub fn webhook_buttons() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::default()
        .append_row(vec![
            InlineKeyboardButton::callback("🔄 Обновить", "webhook:info"),
            InlineKeyboardButton::callback("🔁 Синхронизировать", "webhook:sync"),
        ])
        .append_row(vec![InlineKeyboardButton::callback(
            "🗑 Удалить webhook",
            "webhook:clear",
        )])
}
