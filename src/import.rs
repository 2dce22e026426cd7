//! Excel upload flow: file checks, confirmation, the guarded upload itself
//! and the reload of both collections afterwards.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::address::AddressManager;
use crate::api::{ApiService, ProgressCallback};
use crate::config::ImportLimits;
use crate::errors::{AppError, AppResult};
use crate::host::{ConfirmRequest, ImportEnvironment, Interactor, Notification, NotificationLevel, Presenter};
use crate::models::ImportResult;
use crate::notes::NotesManager;
use crate::state::AppState;
use crate::utils::{format_file_size, is_valid_excel_file};

const MIB: f64 = 1024.0 * 1024.0;
const UNLOAD_MESSAGE: &str = "Import läuft noch. Seite wirklich verlassen?";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedFile {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
}

impl SelectedFile {
    pub fn new(path: impl Into<PathBuf>, size: u64) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { path, name, size }
    }

    fn size_mib(&self) -> f64 {
        self.size as f64 / MIB
    }
}

/// What the import panel shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ImportStatus {
    #[serde(rename_all = "camelCase")]
    FileSelected {
        name: String,
        size: String,
        estimate: &'static str,
    },
    Cleared,
    Message {
        level: NotificationLevel,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    Running {
        file_name: String,
        size_mib: String,
        estimate: &'static str,
    },
    Elapsed {
        display: String,
    },
    #[serde(rename_all = "camelCase")]
    Succeeded {
        records_processed: Option<u64>,
        duration: String,
        warnings: Vec<String>,
    },
    Failed {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub records_processed: Option<u64>,
    pub elapsed: Duration,
    pub warnings: Vec<String>,
}

pub fn validate_import_file(file: Option<&SelectedFile>, limits: &ImportLimits) -> ImportValidation {
    let Some(file) = file else {
        return ImportValidation {
            is_valid: false,
            errors: vec!["Keine Datei ausgewählt".to_string()],
            warnings: Vec::new(),
        };
    };

    let mut errors = Vec::new();
    if !is_valid_excel_file(&file.name) {
        errors.push("Ungültiger Dateityp. Nur .xlsx und .xls Dateien sind erlaubt".to_string());
    }
    if file.size > limits.max_bytes {
        errors.push(format!(
            "Datei zu groß. Maximum: {}",
            format_file_size(limits.max_bytes)
        ));
    }
    if file.size < limits.min_bytes {
        errors.push("Datei zu klein. Möglicherweise leer oder beschädigt".to_string());
    }

    let mut warnings = Vec::new();
    if file.size > limits.warn_bytes {
        warnings.push("Große Datei - Import kann lange dauern".to_string());
    }

    ImportValidation {
        is_valid: errors.is_empty(),
        errors,
        warnings,
    }
}

/// Rough, non-binding duration hint by file size.
pub fn estimate_import_time(bytes: u64) -> &'static str {
    let mib = bytes as f64 / MIB;
    if mib < 5.0 {
        "1-5 Minuten"
    } else if mib < 20.0 {
        "5-30 Minuten"
    } else if mib < 50.0 {
        "30-90 Minuten"
    } else if mib < 100.0 {
        "1-2 Stunden"
    } else {
        "2+ Stunden"
    }
}

/// `HH:MM:SS`
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

fn format_minutes_seconds(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}

/// Holds the in-progress flag, the wake lock and the unload guard for one
/// upload and gives all three back when dropped.
struct ImportScope<'a> {
    state: &'a AppState,
    environment: &'a dyn ImportEnvironment,
    wake_lock: bool,
    timer: Option<AbortHandle>,
}

impl<'a> ImportScope<'a> {
    fn enter(state: &'a AppState, environment: &'a dyn ImportEnvironment) -> AppResult<Self> {
        if state.set_import_in_progress(true) {
            return Err(AppError::ImportInProgress);
        }
        let wake_lock = environment.acquire_wake_lock();
        if !wake_lock {
            debug!(target: "import", "wake lock not available");
        }
        environment.install_unload_guard(UNLOAD_MESSAGE);
        Ok(Self {
            state,
            environment,
            wake_lock,
            timer: None,
        })
    }
}

impl Drop for ImportScope<'_> {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if self.wake_lock {
            self.environment.release_wake_lock();
        }
        self.environment.remove_unload_guard();
        self.state.set_import_in_progress(false);
        debug!(target: "import", "import environment released");
    }
}

pub struct ImportManager {
    api: ApiService,
    state: Arc<AppState>,
    addresses: Arc<AddressManager>,
    notes: Arc<NotesManager>,
    presenter: Arc<dyn Presenter>,
    interactor: Arc<dyn Interactor>,
    environment: Arc<dyn ImportEnvironment>,
    limits: ImportLimits,
    selected: Mutex<Option<SelectedFile>>,
}

impl ImportManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        api: ApiService,
        state: Arc<AppState>,
        addresses: Arc<AddressManager>,
        notes: Arc<NotesManager>,
        presenter: Arc<dyn Presenter>,
        interactor: Arc<dyn Interactor>,
        environment: Arc<dyn ImportEnvironment>,
        limits: ImportLimits,
    ) -> Self {
        Self {
            api,
            state,
            addresses,
            notes,
            presenter,
            interactor,
            environment,
            limits,
            selected: Mutex::new(None),
        }
    }

    /// Picks a file from disk. `None` clears the selection.
    pub async fn select_file(&self, path: Option<&Path>) -> AppResult<Option<SelectedFile>> {
        let Some(path) = path else {
            self.clear_selected_file();
            return Ok(None);
        };
        let size = tokio::fs::metadata(path).await?.len();
        Ok(self.choose_file(SelectedFile::new(path, size)).await)
    }

    /// Type check and large-file confirmation for an already described file.
    pub async fn choose_file(&self, file: SelectedFile) -> Option<SelectedFile> {
        if !is_valid_excel_file(&file.name) {
            self.presenter.notify(&Notification::error(
                "Ungültiger Dateityp",
                "Bitte wählen Sie eine Excel-Datei (.xlsx oder .xls)",
            ));
            self.clear_selected_file();
            return None;
        }

        if file.size > self.limits.confirm_bytes {
            let request = ConfirmRequest::new(
                "Große Datei",
                format!(
                    "Die Datei ist sehr groß ({:.1} MB). Der Import kann sehr lange dauern. Fortfahren?",
                    file.size_mib()
                ),
            );
            if !self.interactor.confirm(&request).await {
                self.clear_selected_file();
                return None;
            }
        }

        self.presenter.import_status(&ImportStatus::FileSelected {
            name: file.name.clone(),
            size: format_file_size(file.size),
            estimate: estimate_import_time(file.size),
        });
        *self.selected.lock() = Some(file.clone());
        Some(file)
    }

    pub fn clear_selected_file(&self) {
        self.selected.lock().take();
        self.presenter.import_status(&ImportStatus::Cleared);
    }

    pub fn selected_file(&self) -> Option<SelectedFile> {
        self.selected.lock().clone()
    }

    pub fn is_import_in_progress(&self) -> bool {
        self.state.import_in_progress()
    }

    pub fn validate_selected(&self) -> ImportValidation {
        validate_import_file(self.selected.lock().as_ref(), &self.limits)
    }

    /// Uploads the selected file. Nothing is acquired until validation and
    /// the user's confirmation have passed.
    pub async fn start_import(&self) -> AppResult<ImportReport> {
        let Some(file) = self.selected_file() else {
            self.show_message(NotificationLevel::Error, "Bitte wählen Sie eine Datei aus.");
            return Err(AppError::validation("Keine Datei ausgewählt"));
        };

        let validation = validate_import_file(Some(&file), &self.limits);
        if !validation.is_valid {
            warn!(target: "import", file = %file.name, errors = ?validation.errors, "file rejected");
            self.show_message(NotificationLevel::Error, validation.errors.join("\n"));
            return Err(AppError::Validation(validation.errors));
        }
        if self.state.import_in_progress() {
            return Err(AppError::ImportInProgress);
        }

        let estimate = estimate_import_time(file.size);
        let request = ConfirmRequest::new("Import starten", confirmation_text(&file, estimate));
        if !self.interactor.confirm(&request).await {
            debug!(target: "import", "import declined");
            return Err(AppError::Cancelled);
        }

        let mut scope = ImportScope::enter(&self.state, self.environment.as_ref())?;
        let started = Instant::now();
        self.presenter.import_status(&ImportStatus::Running {
            file_name: file.name.clone(),
            size_mib: format!("{:.1}", file.size_mib()),
            estimate,
        });
        scope.timer = Some(self.spawn_timer(started));
        info!(target: "import", file = %file.name, bytes = file.size, "import started");

        let presenter = Arc::clone(&self.presenter);
        let progress: ProgressCallback = Arc::new(move |update| presenter.import_progress(&update));
        let outcome = self.api.import_file(&file.path, Some(progress)).await;
        let elapsed = started.elapsed();

        let result = match outcome.and_then(into_success) {
            Ok(result) => result,
            Err(err) => {
                let message = err.to_string();
                error!(target: "import", error = %message, "import failed");
                self.presenter
                    .import_status(&ImportStatus::Failed { message: message.clone() });
                self.presenter
                    .notify(&Notification::error("Import fehlgeschlagen", message));
                return Err(err);
            }
        };

        let mut warnings = validation.warnings;
        warnings.extend(result.errors.iter().cloned());
        self.presenter.import_status(&ImportStatus::Succeeded {
            records_processed: result.records_processed,
            duration: format_minutes_seconds(elapsed),
            warnings: warnings.clone(),
        });

        if let Err(err) = self.reload_collections().await {
            self.presenter.notify(&Notification::error(
                "Aktualisierung fehlgeschlagen",
                format!(
                    "Der Import wurde abgeschlossen, die Daten konnten aber nicht neu geladen werden: {err}"
                ),
            ));
            drop(scope);
            self.clear_selected_file();
            return Err(err);
        }

        let records = result
            .records_processed
            .map(|count| count.to_string())
            .unwrap_or_else(|| "Unbekannte Anzahl".to_string());
        self.presenter.notify(&Notification::success(
            "Import erfolgreich!",
            format!(
                "{records} Datensätze verarbeitet in {}",
                format_minutes_seconds(elapsed)
            ),
        ));
        info!(target: "import", records = ?result.records_processed, elapsed_secs = elapsed.as_secs(), "import finished");

        drop(scope);
        self.clear_selected_file();
        Ok(ImportReport {
            records_processed: result.records_processed,
            elapsed,
            warnings,
        })
    }

    /// Reloads addresses and notes. Both run even when the first fails; the
    /// first error is returned.
    async fn reload_collections(&self) -> AppResult<()> {
        let addresses = self.addresses.load_addresses().await;
        if let Err(err) = &addresses {
            warn!(target: "import", error = %err, "reloading addresses after import failed");
        }
        let notes = self.notes.load_all_notes().await;
        if let Err(err) = &notes {
            warn!(target: "import", error = %err, "reloading notes after import failed");
        }
        addresses.and(notes).map(|_| ())
    }

    fn spawn_timer(&self, started: Instant) -> AbortHandle {
        let presenter = Arc::clone(&self.presenter);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                presenter.import_status(&ImportStatus::Elapsed {
                    display: format_elapsed(started.elapsed()),
                });
            }
        })
        .abort_handle()
    }

    fn show_message(&self, level: NotificationLevel, message: impl Into<String>) {
        self.presenter.import_status(&ImportStatus::Message {
            level,
            message: message.into(),
        });
    }
}

fn into_success(result: ImportResult) -> AppResult<ImportResult> {
    if result.success {
        return Ok(result);
    }
    let message = result
        .error
        .clone()
        .filter(|message| !message.trim().is_empty())
        .or_else(|| (!result.errors.is_empty()).then(|| result.errors.join("; ")))
        .unwrap_or_else(|| "Import fehlgeschlagen".to_string());
    Err(AppError::validation(message))
}

fn confirmation_text(file: &SelectedFile, estimate: &str) -> String {
    format!(
        "Import Details:\n\
         - Datei: {}\n\
         - Größe: {}\n\
         - Geschätzte Dauer: {estimate}\n\n\
         Wichtige Hinweise:\n\
         - Browser-Tab offen lassen\n\
         - Computer nicht in Standby versetzen\n\
         - Import kann nicht abgebrochen werden\n\n\
         Möchten Sie fortfahren?",
        file.name,
        format_file_size(file.size)
    )
}
