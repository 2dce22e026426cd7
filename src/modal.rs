use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::api::ApiService;
use crate::host::{
    ConfirmRequest, Interactor, ModalAlert, Notification, NotificationLevel, Presenter,
    PromptRequest,
};
use crate::models::{Address, Note, Project, ProjectStatus};
use crate::notes::{validate_note, NotesManager};
use crate::state::AppState;
use crate::utils::{address_string, format_date, format_date_short};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModalNote {
    pub id: Option<i64>,
    pub text: String,
    pub created_by: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "lowercase")]
pub enum NotesPanel {
    Loaded(Vec<ModalNote>),
    Empty,
    Failed(String),
}

impl NotesPanel {
    pub fn placeholder(&self) -> Option<&'static str> {
        match self {
            Self::Empty => Some("Keine Notizen vorhanden"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectCard {
    pub title: String,
    pub status: String,
    pub status_class: &'static str,
    pub status_icon: &'static str,
    pub operator: String,
    pub price: String,
    pub sales_period: String,
    pub homes: String,
}

impl ProjectCard {
    pub fn from_project(project: &Project) -> Self {
        let status = ProjectStatus::from_raw(project.status.as_deref());
        Self {
            title: format!("Projekt {}", dash_or(project.id)),
            status: project.status.clone().unwrap_or_else(|| "-".to_string()),
            status_class: status.css_class(),
            status_icon: status.icon(),
            operator: project.operator.clone().unwrap_or_else(|| "-".to_string()),
            price: project
                .product_price
                .map(|price| format!("{price:.2} €"))
                .unwrap_or_else(|| "-".to_string()),
            sales_period: format!(
                "{} - {}",
                format_date_short(project.sales_start.as_ref()),
                format_date_short(project.sales_end.as_ref())
            ),
            homes: dash_or(project.number_of_homes.filter(|homes| *homes > 0)),
        }
    }
}

fn dash_or<T: ToString>(value: Option<T>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Detail view of one address: its notes and projects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModalFrame {
    pub address_id: i64,
    pub title: String,
    pub region: Option<String>,
    pub notes: NotesPanel,
    pub projects: Vec<ProjectCard>,
    pub projects_placeholder: Option<&'static str>,
}

/// Newest first; notes without a timestamp go last.
pub fn newest_first(mut notes: Vec<Note>) -> Vec<Note> {
    notes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    notes
}

pub struct ModalManager {
    api: ApiService,
    state: Arc<AppState>,
    notes: Arc<NotesManager>,
    presenter: Arc<dyn Presenter>,
    interactor: Arc<dyn Interactor>,
    current: Mutex<Option<ModalFrame>>,
}

impl ModalManager {
    pub fn new(
        api: ApiService,
        state: Arc<AppState>,
        notes: Arc<NotesManager>,
        presenter: Arc<dyn Presenter>,
        interactor: Arc<dyn Interactor>,
    ) -> Self {
        Self {
            api,
            state,
            notes,
            presenter,
            interactor,
            current: Mutex::new(None),
        }
    }

    pub async fn open_notes_modal(&self, address_id: Option<i64>) -> Option<ModalFrame> {
        let Some(address_id) = address_id.filter(|id| *id != 0) else {
            self.presenter
                .notify(&Notification::error("Fehler", "Ungültige Adresse"));
            return None;
        };
        let Some(address) = self.state.address_by_id(address_id) else {
            warn!(target: "modal", address_id, "address not loaded");
            self.presenter
                .notify(&Notification::error("Fehler", "Adresse nicht gefunden"));
            return None;
        };

        self.state.set_selected_address(Some(address_id));
        let notes = self.notes_panel(address_id).await;
        let frame = build_frame(&address, notes);
        *self.current.lock() = Some(frame.clone());
        self.presenter.modal(&frame);
        Some(frame)
    }

    async fn notes_panel(&self, address_id: i64) -> NotesPanel {
        match self.notes.load_notes_for_address(address_id).await {
            Ok(notes) if notes.is_empty() => NotesPanel::Empty,
            Ok(notes) => NotesPanel::Loaded(
                newest_first(notes)
                    .into_iter()
                    .map(|note| ModalNote {
                        id: note.id,
                        created_by: note.created_by.clone().unwrap_or_else(|| "-".to_string()),
                        created_at: format_date(note.created_at.as_ref()),
                        text: note.text,
                    })
                    .collect(),
            ),
            Err(err) => NotesPanel::Failed(format!("Fehler beim Laden der Notizen: {err}")),
        }
    }

    /// Reloads the note list of the open modal.
    async fn refresh(&self) -> Option<ModalFrame> {
        let address_id = self.state.selected_address_id()?;
        let address = self.state.address_by_id(address_id)?;
        let frame = build_frame(&address, self.notes_panel(address_id).await);
        *self.current.lock() = Some(frame.clone());
        self.presenter.modal(&frame);
        Some(frame)
    }

    /// Adds a note to the selected address from the modal form.
    pub async fn submit_note(&self, text: &str) -> bool {
        let Some(address_id) = self.state.selected_address_id() else {
            debug!(target: "modal", "note submitted without a selected address");
            return false;
        };

        let text = text.trim();
        if text.is_empty() {
            self.alert(NotificationLevel::Warning, "Bitte geben Sie einen Notiztext ein.");
            return false;
        }
        let validation = validate_note(text);
        if !validation.is_valid {
            self.alert(NotificationLevel::Error, validation.errors.join("\n"));
            return false;
        }

        let author = self.api.username();
        match self
            .notes
            .create_note(Some(address_id), text, Some(&author))
            .await
        {
            Ok(_) => {
                self.alert(NotificationLevel::Success, "Notiz erfolgreich gespeichert!");
                self.refresh().await;
                true
            }
            Err(err) => {
                error!(target: "modal", address_id, error = %err, "saving note from modal failed");
                self.alert(
                    NotificationLevel::Error,
                    format!("Fehler beim Speichern der Notiz: {err}"),
                );
                false
            }
        }
    }

    pub async fn edit_note_in_modal(&self, note_id: i64) -> bool {
        let Some(joined) = self.notes.note_by_id(note_id) else {
            self.alert(NotificationLevel::Error, "Notiz nicht gefunden");
            return false;
        };

        let request = PromptRequest {
            message: "Notiz bearbeiten:".to_string(),
            initial_value: joined.note.text.clone(),
        };
        let Some(new_text) = self.interactor.prompt(&request).await else {
            return false;
        };
        if new_text.trim() == joined.note.text {
            return false;
        }

        match self.notes.update_note(note_id, &new_text).await {
            Ok(_) => {
                self.alert(NotificationLevel::Success, "Notiz erfolgreich aktualisiert");
                self.refresh().await;
                true
            }
            Err(err) => {
                self.alert(
                    NotificationLevel::Error,
                    format!("Fehler beim Aktualisieren: {err}"),
                );
                false
            }
        }
    }

    pub async fn delete_note_in_modal(&self, note_id: i64) -> bool {
        let Some(joined) = self.notes.note_by_id(note_id) else {
            self.alert(NotificationLevel::Error, "Notiz nicht gefunden");
            return false;
        };

        let preview: String = joined.note.text.chars().take(100).collect();
        let ellipsis = if joined.note.text.chars().count() > 100 { "..." } else { "" };
        let request = ConfirmRequest::new(
            "Notiz löschen",
            format!("Möchten Sie diese Notiz wirklich löschen?\n\n\"{preview}{ellipsis}\""),
        );
        if !self.interactor.confirm(&request).await {
            return false;
        }

        match self.notes.delete_note(note_id).await {
            Ok(()) => {
                self.alert(NotificationLevel::Success, "Notiz erfolgreich gelöscht");
                self.refresh().await;
                true
            }
            Err(err) => {
                self.alert(NotificationLevel::Error, format!("Fehler beim Löschen: {err}"));
                false
            }
        }
    }

    /// Hides the modal and clears the selection.
    pub fn close(&self) {
        self.current.lock().take();
        self.state.set_selected_address(None);
        self.presenter.modal_closed();
    }

    pub fn is_open(&self) -> bool {
        self.current.lock().is_some()
    }

    pub fn current_frame(&self) -> Option<ModalFrame> {
        self.current.lock().clone()
    }

    fn alert(&self, level: NotificationLevel, message: impl Into<String>) {
        self.presenter.modal_alert(&ModalAlert {
            level,
            message: message.into(),
        });
    }
}

fn build_frame(address: &Address, notes: NotesPanel) -> ModalFrame {
    let projects: Vec<ProjectCard> = address.projects.iter().map(ProjectCard::from_project).collect();
    ModalFrame {
        address_id: address.id,
        title: format!("Notizen - {}", address_string(address)),
        region: address.region_name.clone(),
        notes,
        projects_placeholder: projects.is_empty().then_some("Keine Projekte vorhanden"),
        projects,
    }
}
