use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use teloxide::{
    dispatching::Dispatcher,
    dptree,
    error_handlers::LoggingErrorHandler,
    prelude::*,
    update_listeners::webhooks,
};

use tokio::sync::{Mutex, OwnedMutexGuard};

use csvbot_core::{
    config::Config,
    messaging::port::MessagingPort,
    sessions::{InMemorySessionStore, SessionStore},
    workflow::Workflow,
};

use crate::handlers;
use crate::TelegramMessenger;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub workflow: Arc<Workflow>,
    pub user_locks: Arc<UserLocks>,
}

/// Per-user async locks so updates from one user are handled one at a time.
#[derive(Default)]
pub struct UserLocks {
    inner: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl UserLocks {
    pub async fn lock(&self, key: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Run the bot until shutdown: webhook mode when an external URL is configured,
/// long polling otherwise.
pub async fn run(cfg: Arc<Config>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    if let Ok(me) = bot.get_me().await {
        tracing::info!("csvbot started: @{}", me.username());
    }
    tracing::info!("Work directory: {}", cfg.work_dir.display());
    if cfg.telegram_allowed_users.is_empty() {
        tracing::info!("Allowed users: everyone");
    } else {
        tracing::info!("Allowed users: {}", cfg.telegram_allowed_users.len());
    }

    let messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new(cfg.unit_session_ttl));
    let workflow = Arc::new(Workflow::new(cfg.clone(), store, messenger));

    spawn_session_sweeper(workflow.clone());

    let state = Arc::new(AppState {
        cfg: cfg.clone(),
        workflow,
        user_locks: Arc::new(UserLocks::default()),
    });

    let handler =
        dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    let mut dispatcher = Dispatcher::builder(bot.clone(), handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build();

    match cfg.webhook_endpoint() {
        Some(endpoint) => {
            let url = reqwest::Url::parse(&endpoint)
                .map_err(|e| anyhow::anyhow!("invalid webhook url {endpoint}: {e}"))?;
            let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
            tracing::info!("Webhook mode: {url} (listening on {addr})");

            let listener = webhooks::axum(bot, webhooks::Options::new(addr, url)).await?;
            dispatcher
                .dispatch_with_listener(
                    listener,
                    LoggingErrorHandler::with_custom_text("An error from the update listener"),
                )
                .await;
        }
        None => {
            tracing::info!("No webhook URL configured, using long polling");
            dispatcher.dispatch().await;
        }
    }

    Ok(())
}

fn spawn_session_sweeper(workflow: Arc<Workflow>) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tick.tick().await;
            let dropped = workflow.sweep_expired().await;
            if dropped > 0 {
                tracing::debug!("swept {dropped} expired unit sessions");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn user_locks_serialize_same_user() {
        let locks = Arc::new(UserLocks::default());
        let guard = locks.lock(1).await;

        // Another user is independent.
        let other = tokio::time::timeout(Duration::from_millis(50), locks.lock(2)).await;
        assert!(other.is_ok());

        // The same user waits until the first guard is dropped, whatever chat
        // the second update comes from.
        let same = tokio::time::timeout(Duration::from_millis(50), locks.lock(1)).await;
        assert!(same.is_err());

        drop(guard);
        let same = tokio::time::timeout(Duration::from_millis(50), locks.lock(1)).await;
        assert!(same.is_ok());
    }
}
