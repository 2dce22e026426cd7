use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Local};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::api::{ApiService, NoteMutation};
use crate::errors::{AppError, AppResult};
use crate::host::{ConfirmRequest, Interactor, Notification, Presenter, PromptRequest};
use crate::models::{JoinedNote, Note};
use crate::state::{AppState, TableKind};
use crate::table::TableManager;

pub const MAX_NOTE_LENGTH: usize = 10_000;
const CONFIRM_PREVIEW_LENGTH: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl NoteValidation {
    pub fn into_result(self) -> AppResult<()> {
        if self.is_valid {
            Ok(())
        } else {
            Err(AppError::Validation(self.errors))
        }
    }
}

/// Every problem with `text`, not just the first.
pub fn validate_note(text: &str) -> NoteValidation {
    let mut errors = Vec::new();
    if text.is_empty() {
        errors.push("Notiztext ist erforderlich".to_string());
    } else {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            errors.push("Notiztext darf nicht leer sein".to_string());
        }
        if trimmed.chars().count() > MAX_NOTE_LENGTH {
            errors.push("Notiztext ist zu lang (max. 10.000 Zeichen)".to_string());
        }
    }
    NoteValidation {
        is_valid: errors.is_empty(),
        errors,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotesStats {
    pub total_notes: usize,
    pub unique_authors: usize,
    pub addresses_with_notes: usize,
    pub notes_today: usize,
    pub notes_this_week: usize,
    pub average_notes_per_address: f64,
}

pub struct NotesManager {
    api: ApiService,
    state: Arc<AppState>,
    tables: TableManager,
    presenter: Arc<dyn Presenter>,
    interactor: Arc<dyn Interactor>,
}

impl NotesManager {
    pub fn new(
        api: ApiService,
        state: Arc<AppState>,
        tables: TableManager,
        presenter: Arc<dyn Presenter>,
        interactor: Arc<dyn Interactor>,
    ) -> Self {
        Self {
            api,
            state,
            tables,
            presenter,
            interactor,
        }
    }

    /// Fetches every note and joins it against the loaded addresses.
    pub async fn load_all_notes(&self) -> AppResult<Arc<Vec<JoinedNote>>> {
        match self.api.fetch_all_notes().await {
            Ok(notes) => {
                let addresses = self.state.addresses();
                let joined: Vec<JoinedNote> = notes
                    .into_iter()
                    .map(|note| JoinedNote::join(note, &addresses))
                    .collect();
                info!(target: "notes", count = joined.len(), "notes loaded");
                self.state.set_notes(joined);
                Ok(self.state.notes())
            }
            Err(err) => {
                error!(target: "notes", error = %err, "loading notes failed");
                self.tables.render_error(
                    TableKind::Notes,
                    &format!("Fehler beim Laden der Notizen: {err}"),
                );
                Err(err)
            }
        }
    }

    pub async fn load_notes_for_address(&self, address_id: i64) -> AppResult<Vec<Note>> {
        let notes = self.api.fetch_notes(address_id).await.map_err(|err| {
            error!(target: "notes", address_id, error = %err, "loading address notes failed");
            err
        })?;
        debug!(target: "notes", address_id, count = notes.len(), "address notes loaded");
        Ok(notes)
    }

    pub async fn create_note(
        &self,
        address_id: Option<i64>,
        text: &str,
        created_by: Option<&str>,
    ) -> AppResult<JoinedNote> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(AppError::validation("Notiztext ist erforderlich"));
        }
        let address_id = address_id
            .filter(|id| *id > 0)
            .ok_or_else(|| AppError::validation("Adresse ist erforderlich"))?;
        validate_note(trimmed).into_result()?;

        let author = created_by
            .filter(|name| !name.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.api.username());

        match self.api.create_note(address_id, trimmed, &author).await {
            Ok(mutation) => {
                let note = created_note(mutation, address_id, trimmed, &author);
                let joined = JoinedNote::join(note, &self.state.addresses());

                let mut notes = (*self.state.notes()).clone();
                notes.insert(0, joined.clone());
                self.state.set_notes(notes);

                info!(target: "notes", address_id, "note created");
                self.presenter.notify(&Notification::success(
                    "Notiz erstellt",
                    "Notiz wurde erfolgreich gespeichert",
                ));
                Ok(joined)
            }
            Err(err) => {
                error!(target: "notes", address_id, error = %err, "creating note failed");
                self.presenter.notify(&Notification::error(
                    "Fehler",
                    format!("Fehler beim Erstellen der Notiz: {err}"),
                ));
                Err(err)
            }
        }
    }

    /// Returns the merged local copy, or `None` when the note was not loaded.
    pub async fn update_note(&self, note_id: i64, text: &str) -> AppResult<Option<JoinedNote>> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(AppError::validation("Notiztext ist erforderlich"));
        }
        validate_note(trimmed).into_result()?;

        match self.api.update_note(note_id, trimmed).await {
            Ok(mutation) => {
                let mut notes = (*self.state.notes()).clone();
                let merged = notes
                    .iter_mut()
                    .find(|joined| joined.note.id == Some(note_id))
                    .map(|joined| {
                        merge_update(&mut joined.note, mutation, trimmed);
                        joined.clone()
                    });
                if merged.is_some() {
                    self.state.set_notes(notes);
                }

                info!(target: "notes", note_id, "note updated");
                self.presenter.notify(&Notification::success(
                    "Notiz aktualisiert",
                    "Notiz wurde erfolgreich aktualisiert",
                ));
                Ok(merged)
            }
            Err(err) => {
                error!(target: "notes", note_id, error = %err, "updating note failed");
                self.presenter.notify(&Notification::error(
                    "Fehler",
                    format!("Fehler beim Aktualisieren der Notiz: {err}"),
                ));
                Err(err)
            }
        }
    }

    pub async fn delete_note(&self, note_id: i64) -> AppResult<()> {
        match self.api.delete_note(note_id).await {
            Ok(()) => {
                let notes: Vec<JoinedNote> = self
                    .state
                    .notes()
                    .iter()
                    .filter(|joined| joined.note.id != Some(note_id))
                    .cloned()
                    .collect();
                self.state.set_notes(notes);

                info!(target: "notes", note_id, "note deleted");
                self.presenter.notify(&Notification::success(
                    "Notiz gelöscht",
                    "Notiz wurde erfolgreich gelöscht",
                ));
                Ok(())
            }
            Err(err) => {
                error!(target: "notes", note_id, error = %err, "deleting note failed");
                self.presenter.notify(&Notification::error(
                    "Fehler",
                    format!("Fehler beim Löschen der Notiz: {err}"),
                ));
                Err(err)
            }
        }
    }

    /// Asks before deleting. Returns whether the note is gone; failures have
    /// already been reported to the user.
    pub async fn delete_note_with_confirm(&self, note_id: i64) -> bool {
        let Some(joined) = self.note_by_id(note_id) else {
            self.presenter
                .notify(&Notification::error("Fehler", "Notiz nicht gefunden"));
            return false;
        };

        let request = ConfirmRequest::new("Notiz löschen", delete_confirmation(&joined.note.text));
        if !self.interactor.confirm(&request).await {
            debug!(target: "notes", note_id, "deletion declined");
            return false;
        }
        self.delete_note(note_id).await.is_ok()
    }

    /// Prompts for a new text and saves it when it changed.
    pub async fn edit_note(&self, note_id: i64) -> bool {
        let Some(joined) = self.note_by_id(note_id) else {
            self.presenter
                .notify(&Notification::error("Fehler", "Notiz nicht gefunden"));
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
        self.update_note(note_id, &new_text).await.is_ok()
    }

    pub fn note_by_id(&self, note_id: i64) -> Option<JoinedNote> {
        self.state
            .notes()
            .iter()
            .find(|joined| joined.note.id == Some(note_id))
            .cloned()
    }

    pub fn notes_stats(&self) -> NotesStats {
        let notes = self.state.notes();
        let now = Local::now().naive_local();
        let today = now.date();
        let week_ago = now - Duration::days(7);

        let authors: HashSet<&str> = notes
            .iter()
            .filter_map(|joined| joined.note.created_by.as_deref())
            .filter(|author| !author.is_empty())
            .collect();
        let addresses: HashSet<Option<i64>> =
            notes.iter().map(|joined| joined.note.address_id).collect();
        let notes_today = notes
            .iter()
            .filter(|joined| joined.note.created_at.map(|at| at.date()) == Some(today))
            .count();
        let notes_this_week = notes
            .iter()
            .filter(|joined| joined.note.created_at.is_some_and(|at| at >= week_ago))
            .count();

        let average = if addresses.is_empty() {
            0.0
        } else {
            (notes.len() as f64 / addresses.len() as f64 * 100.0).round() / 100.0
        };

        NotesStats {
            total_notes: notes.len(),
            unique_authors: authors.len(),
            addresses_with_notes: addresses.len(),
            notes_today,
            notes_this_week,
            average_notes_per_address: average,
        }
    }
}

/// The backend may answer with only a status message; the local copy then
/// carries what was sent.
fn created_note(mutation: NoteMutation, address_id: i64, text: &str, author: &str) -> Note {
    let mut note = mutation.note.unwrap_or_default();
    note.address_id.get_or_insert(address_id);
    if note.text.is_empty() {
        note.text = text.to_string();
    }
    note.created_by.get_or_insert_with(|| author.to_string());
    note.created_at
        .get_or_insert_with(|| Local::now().naive_local());
    note
}

fn merge_update(note: &mut Note, mutation: NoteMutation, text: &str) {
    match mutation.note {
        Some(echo) => {
            note.text = if echo.text.is_empty() { text.to_string() } else { echo.text };
            if echo.created_by.is_some() {
                note.created_by = echo.created_by;
            }
            if echo.created_at.is_some() {
                note.created_at = echo.created_at;
            }
        }
        None => note.text = text.to_string(),
    }
}

fn delete_confirmation(text: &str) -> String {
    let preview: String = text.chars().take(CONFIRM_PREVIEW_LENGTH).collect();
    let ellipsis = if text.chars().count() > CONFIRM_PREVIEW_LENGTH {
        "..."
    } else {
        ""
    };
    format!("Möchten Sie diese Notiz wirklich löschen?\n\n\"{preview}{ellipsis}\"")
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use httptest::{matchers::*, responders::*, Expectation, Server};
    use serde_json::json;

    use super::*;
    use crate::config::AppConfig;
    use crate::host::{NotificationLevel, RecordingPresenter, ScriptedInteractor};
    use crate::models::Address;
    use crate::session::{SessionStore, USERNAME};

    struct Harness {
        notes: NotesManager,
        state: Arc<AppState>,
        presenter: Arc<RecordingPresenter>,
        interactor: Arc<ScriptedInteractor>,
    }

    fn harness(server: &Server) -> Harness {
        let config = AppConfig::for_api_base(server.url_str("/api/v1"));
        let session = SessionStore::seeded([(USERNAME, "anna")]);
        let api = ApiService::new(&config, session).unwrap();
        let state = Arc::new(AppState::default());
        state.set_addresses(vec![Address {
            id: 7,
            postal_code: Some("10115".into()),
            street: Some("Lindenstr".into()),
            house_number: Some("5".into()),
            ..Address::default()
        }]);
        let presenter = Arc::new(RecordingPresenter::new());
        let interactor = Arc::new(ScriptedInteractor::accepting());
        let tables = TableManager::new(state.clone(), presenter.clone(), StdDuration::from_millis(10));
        let notes = NotesManager::new(
            api,
            state.clone(),
            tables,
            presenter.clone(),
            interactor.clone(),
        );
        Harness {
            notes,
            state,
            presenter,
            interactor,
        }
    }

    fn seed_notes(state: &AppState, texts: &[(i64, &str)]) {
        let addresses = state.addresses();
        state.set_notes(
            texts
                .iter()
                .map(|(id, text)| {
                    JoinedNote::join(
                        Note {
                            id: Some(*id),
                            address_id: Some(7),
                            text: text.to_string(),
                            created_by: Some("anna".into()),
                            ..Note::default()
                        },
                        &addresses,
                    )
                })
                .collect(),
        );
    }

    #[test]
    fn validation_collects_messages() {
        assert_eq!(validate_note("").errors, vec!["Notiztext ist erforderlich"]);
        assert_eq!(validate_note("   ").errors, vec!["Notiztext darf nicht leer sein"]);
        let long = "x".repeat(MAX_NOTE_LENGTH + 1);
        assert_eq!(
            validate_note(&long).errors,
            vec!["Notiztext ist zu lang (max. 10.000 Zeichen)"]
        );
        assert!(validate_note(" Rückruf ").is_valid);
    }

    #[test]
    fn confirmation_previews_long_text() {
        let message = delete_confirmation(&"a".repeat(120));
        assert!(message.ends_with(&format!("\"{}...\"", "a".repeat(100))));
        assert!(delete_confirmation("kurz").ends_with("\"kurz\""));
    }

    #[tokio::test]
    async fn whitespace_note_never_reaches_backend() {
        // no expectations: any request fails the test when the server drops
        let server = Server::run();
        let h = harness(&server);

        let err = h.notes.create_note(Some(7), "   ", None).await.unwrap_err();
        assert_eq!(err.to_string(), "Notiztext ist erforderlich");
        let err = h.notes.create_note(None, "Text", None).await.unwrap_err();
        assert_eq!(err.to_string(), "Adresse ist erforderlich");
        assert!(h.presenter.notifications().is_empty());
    }

    #[tokio::test]
    async fn created_note_is_prepended() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/api/v1/notes/7"),
                request::body(json_decoded(eq(json!({ "text": "Rückruf", "createdBy": "anna" })))),
            ])
            .respond_with(json_encoded(json!({ "message": "Note created successfully" }))),
        );
        let h = harness(&server);
        seed_notes(&h.state, &[(1, "alt")]);

        let created = h.notes.create_note(Some(7), "  Rückruf ", None).await.unwrap();
        assert_eq!(created.note.text, "Rückruf");
        assert_eq!(created.address.street.as_deref(), Some("Lindenstr"));

        let notes = h.state.notes();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].note.text, "Rückruf");
        assert_eq!(notes[0].note.created_by.as_deref(), Some("anna"));
        let last = h.presenter.notifications().pop().unwrap();
        assert_eq!(last.level, NotificationLevel::Success);
        assert_eq!(last.title, "Notiz erstellt");
    }

    #[tokio::test]
    async fn failed_create_leaves_collection_untouched() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/api/v1/notes/7"))
                .respond_with(status_code(500)),
        );
        let h = harness(&server);
        seed_notes(&h.state, &[(1, "alt")]);

        assert!(h.notes.create_note(Some(7), "neu", Some("bob")).await.is_err());
        assert_eq!(h.state.notes().len(), 1);
        let last = h.presenter.notifications().pop().unwrap();
        assert_eq!(last.level, NotificationLevel::Error);
        assert!(last.message.starts_with("Fehler beim Erstellen der Notiz: HTTP 500"));
    }

    #[tokio::test]
    async fn update_merges_in_place() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("PUT", "/api/v1/notes/note/2"),
                request::body(json_decoded(eq(json!({ "text": "neu" })))),
            ])
            .respond_with(json_encoded(json!({ "message": "Note updated successfully" }))),
        );
        let h = harness(&server);
        seed_notes(&h.state, &[(1, "eins"), (2, "zwei")]);

        let merged = h.notes.update_note(2, " neu ").await.unwrap().unwrap();
        assert_eq!(merged.note.text, "neu");
        let notes = h.state.notes();
        assert_eq!(notes[1].note.text, "neu");
        assert_eq!(notes[1].note.created_by.as_deref(), Some("anna"));
        assert_eq!(notes[0].note.text, "eins");
    }

    #[tokio::test]
    async fn delete_with_confirmation() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("DELETE", "/api/v1/notes/note/1"))
                .times(1)
                .respond_with(json_encoded(json!({ "message": "Note deleted successfully" }))),
        );
        let h = harness(&server);
        seed_notes(&h.state, &[(1, "eins"), (2, "zwei")]);

        h.interactor.push_confirm(false);
        assert!(!h.notes.delete_note_with_confirm(1).await);
        assert_eq!(h.state.notes().len(), 2);

        assert!(h.notes.delete_note_with_confirm(1).await);
        assert_eq!(h.state.notes().len(), 1);
        assert!(h.notes.note_by_id(1).is_none());

        assert!(!h.notes.delete_note_with_confirm(42).await);
        assert_eq!(
            h.presenter.notifications().pop().unwrap().message,
            "Notiz nicht gefunden"
        );
        assert!(h.interactor.confirmations()[0]
            .message
            .starts_with("Möchten Sie diese Notiz wirklich löschen?"));
    }

    #[tokio::test]
    async fn edit_through_prompt() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("PUT", "/api/v1/notes/note/1"))
                .times(1)
                .respond_with(status_code(204)),
        );
        let h = harness(&server);
        seed_notes(&h.state, &[(1, "eins")]);

        h.interactor.push_prompt(None);
        assert!(!h.notes.edit_note(1).await);
        h.interactor.push_prompt(Some(" eins "));
        assert!(!h.notes.edit_note(1).await);
        h.interactor.push_prompt(Some("zwei"));
        assert!(h.notes.edit_note(1).await);

        assert_eq!(h.state.notes()[0].note.text, "zwei");
        assert_eq!(h.interactor.prompts()[0].initial_value, "eins");
    }

    #[tokio::test]
    async fn load_joins_against_addresses() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/api/v1/notes")).respond_with(
                json_encoded(json!([
                    { "id": 1, "addressId": 7, "text": "a", "createdBy": "anna" },
                    { "id": 2, "addressId": 99, "text": "b", "addressText": "Irgendwo 1" }
                ])),
            ),
        );
        let h = harness(&server);

        let notes = h.notes.load_all_notes().await.unwrap();
        assert_eq!(notes[0].address.street.as_deref(), Some("Lindenstr"));
        assert_eq!(notes[1].address.address_text.as_deref(), Some("Irgendwo 1"));
    }

    #[tokio::test]
    async fn failed_load_shows_inline_error_and_keeps_notes() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/api/v1/notes"))
                .respond_with(status_code(503)),
        );
        let h = harness(&server);
        seed_notes(&h.state, &[(1, "alt")]);

        let err = h.notes.load_all_notes().await.unwrap_err();
        assert_eq!(err.status().map(|s| s.as_u16()), Some(503));
        assert_eq!(h.state.notes().len(), 1);
        let errors = h.presenter.table_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, TableKind::Notes);
        assert!(errors[0].1.starts_with("Fehler beim Laden der Notizen: HTTP 503"));
    }

    #[test]
    fn stats_cover_recent_notes() {
        let server = Server::run();
        let h = harness(&server);
        let now = Local::now().naive_local();
        let addresses = h.state.addresses();
        let note = |id, address_id, author: &str, created_at| {
            JoinedNote::join(
                Note {
                    id: Some(id),
                    address_id: Some(address_id),
                    text: "x".into(),
                    created_by: Some(author.to_string()),
                    created_at,
                    ..Note::default()
                },
                &addresses,
            )
        };
        h.state.set_notes(vec![
            note(1, 7, "anna", Some(now)),
            note(2, 7, "bob", Some(now - Duration::days(3))),
            note(3, 8, "anna", Some(now - Duration::days(30))),
            note(4, 8, "", None),
        ]);

        let stats = h.notes.notes_stats();
        assert_eq!(stats.total_notes, 4);
        assert_eq!(stats.unique_authors, 2);
        assert_eq!(stats.addresses_with_notes, 2);
        assert_eq!(stats.notes_today, 1);
        assert_eq!(stats.notes_this_week, 2);
        assert_eq!(stats.average_notes_per_address, 2.0);
    }
}
