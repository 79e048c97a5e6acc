//! Application service: one method per bot interaction.
//!
//! The Telegram adapter downloads files to the paths handed out by
//! [`Workflow::route_document`] and then calls the matching `handle_*` method.
//! Everything a handler writes to disk is removed before it returns.

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    aggregate::{Aggregator, CsvOutcome},
    config::Config,
    day::{parse_day_arg, DayCalendar},
    domain::{ChatId, UserId},
    errors::Error,
    merge::merge_txt_files,
    messaging::port::MessagingPort,
    security::is_authorized,
    sessions::{SessionStore, UnitSlot, UNIT_FILES},
    Result,
};

pub const GREETING: &str = "Привет 👋 Пришли CSV файл, и я сделаю TXT с номерами.";

pub const HELP: &str = "Команды:\n\
/day <число> - задать номер дня для имён файлов\n\
/day - показать текущий номер дня\n\
/unit [число] - объединить два TXT файла в «Б1 (<день>).txt»\n\
/cancel - отменить объединение\n\n\
Пришлите CSV файл со столбцом phone, чтобы получить TXT по группам.";

pub const UNAUTHORIZED: &str = "⛔ Нет доступа. Обратитесь к владельцу бота.";

/// Where an incoming document should go.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DocumentRoute {
    /// Download to `dest`, then call [`Workflow::handle_csv`].
    Csv { dest: PathBuf },
    /// Download to `dest`, then call [`Workflow::handle_unit_file`].
    UnitFile { dest: PathBuf },
    /// Do not download; reply with the message.
    Rejected(String),
}

pub struct Workflow {
    cfg: Arc<Config>,
    calendar: DayCalendar,
    aggregator: Aggregator,
    store: Arc<dyn SessionStore>,
    messenger: Arc<dyn MessagingPort>,
}

impl Workflow {
    pub fn new(
        cfg: Arc<Config>,
        store: Arc<dyn SessionStore>,
        messenger: Arc<dyn MessagingPort>,
    ) -> Self {
        Self {
            calendar: DayCalendar::from_config(&cfg),
            aggregator: Aggregator::default(),
            cfg,
            store,
            messenger,
        }
    }

    pub fn messenger(&self) -> &Arc<dyn MessagingPort> {
        &self.messenger
    }

    /// Scratch directory for one user's inputs and outputs.
    pub fn user_dir(&self, user: UserId) -> PathBuf {
        self.cfg.work_dir.join(user.to_string())
    }

    /// Check the sender against the allow-list. A refused sender is told so;
    /// a failed reply is only logged.
    pub async fn admit(&self, chat_id: ChatId, user: Option<UserId>) -> bool {
        if is_authorized(user, &self.cfg.telegram_allowed_users) {
            return true;
        }
        tracing::warn!("unauthorized message from {user:?} in chat {chat_id}");
        if let Err(e) = self.messenger.send_text(chat_id, UNAUTHORIZED).await {
            tracing::warn!("failed to reply in chat {chat_id}: {e}");
        }
        false
    }

    /// Effective day number: the user's override, else today's calendar number.
    pub async fn day_for(&self, user: UserId) -> i64 {
        match self.store.day_override(user).await {
            Some(day) => day,
            None => self.calendar.today(),
        }
    }

    // ============== Commands ==============

    pub async fn day_command(&self, user: UserId, args: &str) -> String {
        if args.trim().is_empty() {
            let source = match self.store.day_override(user).await {
                Some(_) => "задан вручную",
                None => "по календарю",
            };
            let day = self.day_for(user).await;
            return format!("📅 Текущий номер дня: {day} ({source})\nИзменить: /day <число>");
        }

        match parse_day_arg(args) {
            Ok(day) => {
                self.store.set_day_override(user, day).await;
                tracing::info!("user {user} set day override to {day}");
                format!("✅ Номер дня установлен: {day}")
            }
            Err(_) => "❌ Неверный формат. Использование: /day <число>".to_string(),
        }
    }

    pub async fn unit_command(&self, user: UserId, args: &str) -> String {
        let day = if args.trim().is_empty() {
            self.day_for(user).await
        } else {
            match parse_day_arg(args) {
                Ok(day) => day,
                Err(_) => return "❌ Неверный формат. Использование: /unit [число]".to_string(),
            }
        };

        if let Some(prev) = self.store.open_unit(user, day).await {
            remove_files(&prev.files).await;
        }
        tracing::info!("user {user} opened unit session for day {day}");
        format!(
            "📎 Режим объединения. Пришлите {UNIT_FILES} TXT файла, результат: «Б1 ({day}).txt».\nОтмена: /cancel"
        )
    }

    pub async fn cancel_command(&self, user: UserId) -> String {
        match self.store.close_unit(user).await {
            Some(session) => {
                remove_files(&session.files).await;
                "🗑 Режим объединения отменён.".to_string()
            }
            None => "ℹ️ Нет активного режима объединения.".to_string(),
        }
    }

    // ============== Documents ==============

    /// Decide what to do with an uploaded document before downloading it.
    pub async fn route_document(&self, user: UserId, file_name: &str) -> Result<DocumentRoute> {
        self.sweep_expired().await;

        let lower = file_name.to_lowercase();
        let is_txt = lower.ends_with(".txt");
        let dir = self.user_dir(user);

        if self.store.unit(user).await.is_some() {
            if !is_txt {
                return Ok(DocumentRoute::Rejected(
                    "❌ В режиме объединения принимаются только .txt файлы. Отмена: /cancel"
                        .to_string(),
                ));
            }
            tokio::fs::create_dir_all(&dir).await?;
            // The slot is taken here, before the download, so two uploads in
            // flight never share a destination.
            return Ok(match self.store.reserve_unit_slot(user).await {
                UnitSlot::Slot(n) => DocumentRoute::UnitFile {
                    dest: dir.join(format!("temp_{user}_{n}.txt")),
                },
                UnitSlot::Full => DocumentRoute::Rejected(format!(
                    "⏳ Все {UNIT_FILES} TXT файла уже получены, дождитесь результата."
                )),
                UnitSlot::NoSession => DocumentRoute::Rejected(
                    "ℹ️ Режим объединения не активен. Отправьте /unit, чтобы начать.".to_string(),
                ),
            });
        }

        if lower.ends_with(".csv") {
            let name = upload_name(file_name)?;
            tokio::fs::create_dir_all(&dir).await?;
            return Ok(DocumentRoute::Csv {
                dest: dir.join(format!("temp_{name}")),
            });
        }

        if is_txt {
            return Ok(DocumentRoute::Rejected(
                "ℹ️ Чтобы объединить TXT файлы, сначала отправьте /unit".to_string(),
            ));
        }

        Ok(DocumentRoute::Rejected(
            "❌ Поддерживаются только CSV файлы (и TXT в режиме /unit).".to_string(),
        ))
    }

    /// Undo a route whose download failed: free the unit slot and drop any
    /// partial file.
    pub async fn abandon_upload(&self, user: UserId, route: &DocumentRoute) {
        match route {
            DocumentRoute::UnitFile { dest } => {
                self.store.release_unit_slot(user).await;
                remove_files(&[dest.clone()]).await;
            }
            DocumentRoute::Csv { dest } => remove_files(&[dest.clone()]).await,
            DocumentRoute::Rejected(_) => {}
        }
    }

    /// Classify a downloaded CSV, send the group files and the report.
    pub async fn handle_csv(
        &self,
        chat_id: ChatId,
        user: UserId,
        input: &Path,
        file_name: &str,
    ) -> Result<()> {
        let day = self.day_for(user).await;
        let out_dir = self.user_dir(user);

        let outcome = {
            let aggregator = self.aggregator.clone();
            let input = input.to_path_buf();
            let name = file_name.to_string();
            let out_dir = out_dir.clone();
            tokio::task::spawn_blocking(move || {
                aggregator.process_file(&input, &name, day, &out_dir)
            })
            .await
            .map_err(|e| Error::External(format!("csv task failed: {e}")))
            .and_then(|res| res)
        };

        let result = match outcome {
            Ok(outcome) => self.deliver_csv(chat_id, file_name, &outcome).await,
            Err(e) => {
                tracing::warn!("processing {file_name} for user {user} failed: {e}");
                self.messenger
                    .send_text(chat_id, &processing_error_message(file_name, &e))
                    .await
            }
        };

        remove_files(&[input.to_path_buf()]).await;
        result
    }

    async fn deliver_csv(
        &self,
        chat_id: ChatId,
        file_name: &str,
        outcome: &CsvOutcome,
    ) -> Result<()> {
        tracing::info!(
            "processed {file_name}: {} rows into {} files",
            outcome.report.total,
            outcome.files.len()
        );

        for file in &outcome.files {
            if let Err(e) = self.messenger.send_document(chat_id, file).await {
                tracing::error!("failed to send {}: {e}", file.display());
            }
        }
        let sent = self
            .messenger
            .send_text(chat_id, &outcome.report.to_string())
            .await;

        remove_files(&outcome.files).await;
        sent
    }

    /// Store one downloaded TXT for the user's unit session; merge once both are in.
    pub async fn handle_unit_file(&self, chat_id: ChatId, user: UserId, input: PathBuf) -> Result<()> {
        let Some(session) = self.store.push_unit_file(user, input.clone()).await else {
            remove_files(&[input]).await;
            return self
                .messenger
                .send_text(
                    chat_id,
                    "ℹ️ Режим объединения не активен. Отправьте /unit, чтобы начать.",
                )
                .await;
        };

        if !session.is_complete() {
            let n = session.files.len();
            return self
                .messenger
                .send_text(
                    chat_id,
                    &format!("✅ Файл {n} из {UNIT_FILES} получен. Жду следующий TXT файл."),
                )
                .await;
        }

        let Some(session) = self.store.close_unit(user).await else {
            return Ok(());
        };

        let merged = {
            let files = session.files.clone();
            let out_dir = self.user_dir(user);
            let day = session.day;
            tokio::task::spawn_blocking(move || merge_txt_files(&files, day, &out_dir))
                .await
                .map_err(|e| Error::External(format!("merge task failed: {e}")))
                .and_then(|res| res)
        };

        let result = match merged {
            Ok(out) => {
                tracing::info!("merged {} lines for user {user}", out.lines);
                let sent = self.messenger.send_document(chat_id, &out.file).await;
                remove_files(&[out.file]).await;
                sent
            }
            Err(e) => {
                tracing::warn!("merge for user {user} failed: {e}");
                self.messenger
                    .send_text(chat_id, &format!("❌ Ошибка при объединении файлов: {e}"))
                    .await
            }
        };

        remove_files(&session.files).await;
        result
    }

    /// Drop expired unit sessions and their pending files. Returns how many were dropped.
    pub async fn sweep_expired(&self) -> usize {
        let expired = self.store.sweep_expired().await;
        for (user, session) in &expired {
            tracing::info!(
                "unit session of user {user} expired with {} pending files",
                session.files.len()
            );
            remove_files(&session.files).await;
        }
        expired.len()
    }
}

/// User-facing text for a failed CSV run.
pub fn processing_error_message(file_name: &str, err: &Error) -> String {
    match err {
        Error::MissingColumn { file, column } => format!("❌ В файле {file} нет столбца '{column}'"),
        other => format!("❌ Ошибка при обработке {file_name}: {other}"),
    }
}

/// Final path component of an uploaded file name, safe to join onto a directory.
fn upload_name(file_name: &str) -> Result<String> {
    let normalized = file_name.replace('\\', "/");
    Path::new(&normalized)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| Error::InvalidPath {
            path: PathBuf::from(file_name),
            reason: "no usable file name".to_string(),
        })
}

async fn remove_files(paths: &[PathBuf]) {
    for p in paths {
        match tokio::fs::remove_file(p).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("failed to remove {}: {e}", p.display()),
        }
    }
}
