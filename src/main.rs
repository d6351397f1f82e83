//! vpnbot-admin: Telegram-бот для администрирования развёртывания VPN-бота:
//! config.php, процесс под supervisor, nginx, SSL и webhook.

mod app_config;
mod bot;
mod certificate;
mod command;
mod config;
mod db;
mod error;
mod nginx;
mod provision;
mod service;
mod webhook;

use std::path::PathBuf;
use std::sync::Arc;
use teloxide::dispatching::Dispatcher;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/etc/vpnbot-admin.toml"));
    tracing::info!(
        "Starting vpnbot-admin with config {}",
        config_path.display()
    );

    let config = Arc::new(config::Config::load(&config_path)?);
    let token = config.bot_token()?;
    tracing::info!(
        admin_count = config.admin_ids.len(),
        db_path = %config.db_path.display(),
        app_config_path = %config.app.config_path.display(),
        service_name = %config.process.service_name,
        site_path = %config.proxy.site_path.display(),
        "Configuration loaded"
    );

    let db = Arc::new(db::Db::open(&config.db_path).await?);
    let runner: Arc<dyn command::CommandRunner> = Arc::new(command::SystemCommandRunner);

    let store = Arc::new(app_config::ConfigStore::new(
        &config.app.config_path,
        config.app.runtime_user.as_str(),
        config.app.lint_binary.as_str(),
        runner.clone(),
    ));
    let process = Arc::new(service::ProcessController::new(
        config.process.supervisor.as_str(),
        config.process.service_name.as_str(),
        &config.process.log_path,
        &config.process.fallback_log_path,
        runner.clone(),
        db.clone(),
    ));
    let certificates = Arc::new(certificate::CertificateManager::new(
        config.certificates.client_binary.as_str(),
        &config.certificates.live_dir,
        config.certificates.diagnostic_lines,
        runner.clone(),
    ));
    let proxy = Arc::new(nginx::ReverseProxyManager::new(
        nginx::ProxySettings {
            site_path: config.proxy.site_path.clone(),
            enabled_path: config.proxy.enabled_path.clone(),
            document_root: config.proxy.document_root.clone(),
            upstream: config.proxy.upstream.clone(),
            nginx_binary: config.proxy.nginx_binary.clone(),
            service_manager: config.proxy.service_manager.clone(),
            proxy_service: config.proxy.proxy_service.clone(),
            file_owner: config.app.runtime_user.clone(),
        },
        runner.clone(),
    ));
    let webhook = webhook::WebhookSynchronizer::new(
        webhook::TelegramWebhookApi,
        certificates.clone(),
        config.webhook.entrypoint.as_str(),
        config.webhook.fallback_host.as_str(),
    );
    let orchestrator = Arc::new(provision::DomainProvisioningOrchestrator::new(
        store,
        proxy,
        certificates,
        webhook,
        process.clone(),
        db,
    ));

    let bot = Bot::new(token);
    if let Err(error) = bot
        .set_my_commands(bot::handlers::BotCommand::bot_commands())
        .await
    {
        tracing::warn!(error = %error, "Не удалось зарегистрировать список команд");
    }

    let state = bot::handlers::BotState {
        config,
        process,
        orchestrator,
    };
    tracing::info!("Dispatcher initialized, bot is ready");

    Dispatcher::builder(bot, bot::handlers::schema())
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
