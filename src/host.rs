//! Seams towards whatever renders the dashboard. The managers only ever talk
//! to these traits; the recording adapters back the tests and the headless
//! binary uses [`TracingPresenter`].

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::address::NavigationFrame;
use crate::api::UploadProgress;
use crate::errors::{AppError, AppResult};
use crate::import::ImportStatus;
use crate::modal::ModalFrame;
use crate::state::{Section, TableKind, ViewMode};
use crate::table::TableView;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Success,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
}

impl Notification {
    pub fn new(level: NotificationLevel, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn success(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Success, title, message)
    }

    pub fn warning(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Warning, title, message)
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Error, title, message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModalAlert {
    pub level: NotificationLevel,
    pub message: String,
}

/// Renders frames produced by the managers. Every method defaults to a no-op
/// so hosts only implement what they display.
pub trait Presenter: Send + Sync {
    fn table(&self, _view: &TableView) {}
    fn table_error(&self, _table: TableKind, _message: &str) {}
    fn navigation(&self, _frame: &NavigationFrame) {}
    fn view_mode(&self, _view: ViewMode) {}
    fn section(&self, _section: Section) {}
    fn notify(&self, _notification: &Notification) {}
    fn user(&self, _username: &str) {}
    fn modal(&self, _frame: &ModalFrame) {}
    fn modal_alert(&self, _alert: &ModalAlert) {}
    fn modal_closed(&self) {}
    fn import_status(&self, _status: &ImportStatus) {}
    fn import_progress(&self, _progress: &UploadProgress) {}
    fn weather(&self, _text: &str) {}
}

/// Location of the hosting page and the ability to leave it.
pub trait Navigator: Send + Sync {
    fn current_path(&self) -> String;
    fn current_url(&self) -> String {
        self.current_path()
    }
    fn redirect(&self, location: &str);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmRequest {
    pub title: String,
    pub message: String,
}

impl ConfirmRequest {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptRequest {
    pub message: String,
    pub initial_value: String,
}

/// Confirmation and text-entry dialogs as a request/response exchange.
#[async_trait]
pub trait Interactor: Send + Sync {
    async fn confirm(&self, request: &ConfirmRequest) -> bool;
    /// `None` when the user dismissed the prompt.
    async fn prompt(&self, request: &PromptRequest) -> Option<String>;
}

/// Host facilities held for the duration of an upload.
pub trait ImportEnvironment: Send + Sync {
    /// Returns `false` when the platform has no wake lock.
    fn acquire_wake_lock(&self) -> bool;
    fn release_wake_lock(&self);
    fn install_unload_guard(&self, message: &str);
    fn remove_unload_guard(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

#[async_trait]
pub trait Geolocator: Send + Sync {
    async fn current_position(&self) -> AppResult<Position>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum PresentedFrame {
    Table(TableView),
    TableError { table: TableKind, message: String },
    Navigation(NavigationFrame),
    ViewMode(ViewMode),
    Section(Section),
    Notification(Notification),
    User(String),
    Modal(ModalFrame),
    ModalAlert(ModalAlert),
    ModalClosed,
    ImportStatus(ImportStatus),
    ImportProgress(UploadProgress),
    Weather(String),
}

#[derive(Default)]
pub struct RecordingPresenter {
    frames: Mutex<Vec<PresentedFrame>>,
}

impl RecordingPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<PresentedFrame> {
        self.frames.lock().clone()
    }

    pub fn clear(&self) {
        self.frames.lock().clear();
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.collect(|frame| match frame {
            PresentedFrame::Notification(n) => Some(n.clone()),
            _ => None,
        })
    }

    pub fn last_table(&self, kind: TableKind) -> Option<TableView> {
        self.collect(|frame| match frame {
            PresentedFrame::Table(view) if view.table == kind => Some(view.clone()),
            _ => None,
        })
        .pop()
    }

    pub fn table_errors(&self) -> Vec<(TableKind, String)> {
        self.collect(|frame| match frame {
            PresentedFrame::TableError { table, message } => Some((*table, message.clone())),
            _ => None,
        })
    }

    pub fn last_navigation(&self) -> Option<NavigationFrame> {
        self.collect(|frame| match frame {
            PresentedFrame::Navigation(nav) => Some(nav.clone()),
            _ => None,
        })
        .pop()
    }

    pub fn last_modal(&self) -> Option<ModalFrame> {
        self.collect(|frame| match frame {
            PresentedFrame::Modal(modal) => Some(modal.clone()),
            _ => None,
        })
        .pop()
    }

    pub fn modal_alerts(&self) -> Vec<ModalAlert> {
        self.collect(|frame| match frame {
            PresentedFrame::ModalAlert(alert) => Some(alert.clone()),
            _ => None,
        })
    }

    pub fn import_statuses(&self) -> Vec<ImportStatus> {
        self.collect(|frame| match frame {
            PresentedFrame::ImportStatus(status) => Some(status.clone()),
            _ => None,
        })
    }

    pub fn progress(&self) -> Vec<UploadProgress> {
        self.collect(|frame| match frame {
            PresentedFrame::ImportProgress(progress) => Some(*progress),
            _ => None,
        })
    }

    pub fn last_user(&self) -> Option<String> {
        self.collect(|frame| match frame {
            PresentedFrame::User(name) => Some(name.clone()),
            _ => None,
        })
        .pop()
    }

    pub fn last_weather(&self) -> Option<String> {
        self.collect(|frame| match frame {
            PresentedFrame::Weather(text) => Some(text.clone()),
            _ => None,
        })
        .pop()
    }

    fn collect<T>(&self, pick: impl Fn(&PresentedFrame) -> Option<T>) -> Vec<T> {
        self.frames.lock().iter().filter_map(pick).collect()
    }

    fn push(&self, frame: PresentedFrame) {
        self.frames.lock().push(frame);
    }
}

impl Presenter for RecordingPresenter {
    fn table(&self, view: &TableView) {
        self.push(PresentedFrame::Table(view.clone()));
    }

    fn table_error(&self, table: TableKind, message: &str) {
        self.push(PresentedFrame::TableError {
            table,
            message: message.to_string(),
        });
    }

    fn navigation(&self, frame: &NavigationFrame) {
        self.push(PresentedFrame::Navigation(frame.clone()));
    }

    fn view_mode(&self, view: ViewMode) {
        self.push(PresentedFrame::ViewMode(view));
    }

    fn section(&self, section: Section) {
        self.push(PresentedFrame::Section(section));
    }

    fn notify(&self, notification: &Notification) {
        self.push(PresentedFrame::Notification(notification.clone()));
    }

    fn user(&self, username: &str) {
        self.push(PresentedFrame::User(username.to_string()));
    }

    fn modal(&self, frame: &ModalFrame) {
        self.push(PresentedFrame::Modal(frame.clone()));
    }

    fn modal_alert(&self, alert: &ModalAlert) {
        self.push(PresentedFrame::ModalAlert(alert.clone()));
    }

    fn modal_closed(&self) {
        self.push(PresentedFrame::ModalClosed);
    }

    fn import_status(&self, status: &ImportStatus) {
        self.push(PresentedFrame::ImportStatus(status.clone()));
    }

    fn import_progress(&self, progress: &UploadProgress) {
        self.push(PresentedFrame::ImportProgress(*progress));
    }

    fn weather(&self, text: &str) {
        self.push(PresentedFrame::Weather(text.to_string()));
    }
}

/// Presenter for headless runs: every frame becomes a log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPresenter;

impl Presenter for TracingPresenter {
    fn table(&self, view: &TableView) {
        info!(
            target: "presenter",
            table = view.table.as_str(),
            rows = view.rows.len(),
            total = view.total,
            page = view.page,
            pages = view.page_count,
            "table rendered"
        );
    }

    fn table_error(&self, table: TableKind, message: &str) {
        warn!(target: "presenter", table = table.as_str(), message, "table error");
    }

    fn navigation(&self, frame: &NavigationFrame) {
        debug!(target: "presenter", step = ?frame.step, items = frame.items.len(), "navigation rendered");
    }

    fn notify(&self, notification: &Notification) {
        match notification.level {
            NotificationLevel::Error | NotificationLevel::Warning => warn!(
                target: "presenter",
                title = %notification.title,
                message = %notification.message,
                "notification"
            ),
            _ => info!(
                target: "presenter",
                title = %notification.title,
                message = %notification.message,
                "notification"
            ),
        }
    }

    fn user(&self, username: &str) {
        info!(target: "presenter", username, "signed-in user");
    }

    fn import_progress(&self, progress: &UploadProgress) {
        debug!(target: "presenter", percentage = progress.percentage, "upload progress");
    }

    fn weather(&self, text: &str) {
        info!(target: "presenter", weather = text, "weather");
    }
}

pub struct RecordingNavigator {
    origin: String,
    path: Mutex<String>,
    redirects: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn new(path: impl Into<String>) -> Self {
        Self::with_origin("http://localhost", path)
    }

    pub fn with_origin(origin: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            path: Mutex::new(path.into()),
            redirects: Mutex::new(Vec::new()),
        }
    }

    pub fn redirects(&self) -> Vec<String> {
        self.redirects.lock().clone()
    }

    pub fn set_path(&self, path: impl Into<String>) {
        *self.path.lock() = path.into();
    }
}

impl Navigator for RecordingNavigator {
    fn current_path(&self) -> String {
        self.path.lock().clone()
    }

    fn current_url(&self) -> String {
        format!("{}{}", self.origin, self.path.lock())
    }

    fn redirect(&self, location: &str) {
        self.redirects.lock().push(location.to_string());
        *self.path.lock() = location.to_string();
    }
}

/// Answers dialogs from queued responses, falling back to fixed defaults.
pub struct ScriptedInteractor {
    confirms: Mutex<VecDeque<bool>>,
    prompts: Mutex<VecDeque<Option<String>>>,
    default_confirm: bool,
    confirm_log: Mutex<Vec<ConfirmRequest>>,
    prompt_log: Mutex<Vec<PromptRequest>>,
}

impl ScriptedInteractor {
    pub fn accepting() -> Self {
        Self::with_default(true)
    }

    pub fn declining() -> Self {
        Self::with_default(false)
    }

    fn with_default(default_confirm: bool) -> Self {
        Self {
            confirms: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(VecDeque::new()),
            default_confirm,
            confirm_log: Mutex::new(Vec::new()),
            prompt_log: Mutex::new(Vec::new()),
        }
    }

    pub fn push_confirm(&self, answer: bool) {
        self.confirms.lock().push_back(answer);
    }

    pub fn push_prompt(&self, answer: Option<&str>) {
        self.prompts.lock().push_back(answer.map(str::to_string));
    }

    pub fn confirmations(&self) -> Vec<ConfirmRequest> {
        self.confirm_log.lock().clone()
    }

    pub fn prompts(&self) -> Vec<PromptRequest> {
        self.prompt_log.lock().clone()
    }
}

#[async_trait]
impl Interactor for ScriptedInteractor {
    async fn confirm(&self, request: &ConfirmRequest) -> bool {
        self.confirm_log.lock().push(request.clone());
        self.confirms
            .lock()
            .pop_front()
            .unwrap_or(self.default_confirm)
    }

    async fn prompt(&self, request: &PromptRequest) -> Option<String> {
        self.prompt_log.lock().push(request.clone());
        self.prompts.lock().pop_front().flatten()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportEnvironmentStats {
    pub wake_locks_acquired: usize,
    pub wake_locks_released: usize,
    pub guards_installed: usize,
    pub guards_removed: usize,
}

#[derive(Default)]
pub struct RecordingImportEnvironment {
    stats: Mutex<ImportEnvironmentStats>,
    unload_message: Mutex<Option<String>>,
}

impl RecordingImportEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> ImportEnvironmentStats {
        *self.stats.lock()
    }

    pub fn unload_message(&self) -> Option<String> {
        self.unload_message.lock().clone()
    }

    pub fn is_idle(&self) -> bool {
        let stats = self.stats();
        stats.wake_locks_acquired == stats.wake_locks_released
            && stats.guards_installed == stats.guards_removed
    }
}

impl ImportEnvironment for RecordingImportEnvironment {
    fn acquire_wake_lock(&self) -> bool {
        self.stats.lock().wake_locks_acquired += 1;
        true
    }

    fn release_wake_lock(&self) {
        self.stats.lock().wake_locks_released += 1;
    }

    fn install_unload_guard(&self, message: &str) {
        self.stats.lock().guards_installed += 1;
        *self.unload_message.lock() = Some(message.to_string());
    }

    fn remove_unload_guard(&self) {
        self.stats.lock().guards_removed += 1;
        *self.unload_message.lock() = None;
    }
}

/// Always reports the same position, optionally after a delay.
pub struct FixedGeolocator {
    position: Option<Position>,
    delay: Duration,
}

impl FixedGeolocator {
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            position: Some(Position {
                latitude,
                longitude,
            }),
            delay: Duration::ZERO,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            position: None,
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Geolocator for FixedGeolocator {
    async fn current_position(&self) -> AppResult<Position> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.position
            .ok_or_else(|| AppError::NotFound("Geolocation nicht unterstützt".into()))
    }
}
