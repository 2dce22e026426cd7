use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::errors::AppError;
use crate::models::{Address, JoinedNote};

const DEFAULT_PAGE_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    Addresses,
    Notes,
}

impl TableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableKind::Addresses => "addresses",
            TableKind::Notes => "notes",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn toggled(self) -> Self {
        match self {
            SortOrder::Asc => SortOrder::Desc,
            SortOrder::Desc => SortOrder::Asc,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// Column a table can be sorted by. Address tables use `Plz`..`Region`,
/// note tables use `Id` and `Address`..`CreatedAt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    Id,
    Plz,
    Street,
    Number,
    Region,
    Address,
    Text,
    CreatedBy,
    CreatedAt,
}

impl SortField {
    /// Identifiers and timestamps start newest first.
    pub fn default_order(&self) -> SortOrder {
        match self {
            SortField::Id | SortField::CreatedAt => SortOrder::Desc,
            _ => SortOrder::Asc,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SortField::Id => "id",
            SortField::Plz => "plz",
            SortField::Street => "street",
            SortField::Number => "number",
            SortField::Region => "region",
            SortField::Address => "address",
            SortField::Text => "text",
            SortField::CreatedBy => "createdBy",
            SortField::CreatedAt => "createdAt",
        }
    }
}

impl FromStr for SortField {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "id" => Ok(SortField::Id),
            "plz" => Ok(SortField::Plz),
            "street" => Ok(SortField::Street),
            "number" => Ok(SortField::Number),
            "region" => Ok(SortField::Region),
            "address" => Ok(SortField::Address),
            "text" => Ok(SortField::Text),
            "createdBy" => Ok(SortField::CreatedBy),
            "createdAt" => Ok(SortField::CreatedAt),
            other => Err(AppError::validation(format!("unknown sort field `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableState {
    pub page: usize,
    pub size: usize,
    pub sort: SortField,
    pub order: SortOrder,
    pub search: String,
}

impl TableState {
    pub fn for_kind(kind: TableKind, size: usize) -> Self {
        let (sort, order) = match kind {
            TableKind::Addresses => (SortField::Plz, SortOrder::Asc),
            TableKind::Notes => (SortField::Id, SortOrder::Desc),
        };
        Self {
            page: 1,
            size: size.max(1),
            sort,
            order,
            search: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    Table,
    Tree,
}

impl FromStr for ViewMode {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "table" => Ok(ViewMode::Table),
            "tree" => Ok(ViewMode::Tree),
            other => Err(AppError::validation(format!("unknown view `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Addresses,
    Notes,
    Import,
}

impl FromStr for Section {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "addresses" => Ok(Section::Addresses),
            "notes" => Ok(Section::Notes),
            "import" => Ok(Section::Import),
            other => Err(AppError::NotFound(format!("unknown section `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NavStep {
    #[default]
    Plz,
    Street,
    Number,
}

/// Drill-down cursor over postal code, street and house number.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Navigation {
    pub step: NavStep,
    pub plz: Option<String>,
    pub street: Option<String>,
    pub number: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppEvent {
    AddressesUpdated(Arc<Vec<Address>>),
    NotesUpdated(Arc<Vec<JoinedNote>>),
    AddressSelected(Option<i64>),
    TableUpdated { table: TableKind, state: TableState },
    ViewChanged(ViewMode),
    NavigationUpdated(Navigation),
    SectionChanged(Section),
    DetailRequested(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    AddressesUpdated,
    NotesUpdated,
    AddressSelected,
    TableUpdated(TableKind),
    ViewChanged,
    NavigationUpdated,
    SectionChanged,
    DetailRequested,
}

impl AppEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            AppEvent::AddressesUpdated(_) => EventKind::AddressesUpdated,
            AppEvent::NotesUpdated(_) => EventKind::NotesUpdated,
            AppEvent::AddressSelected(_) => EventKind::AddressSelected,
            AppEvent::TableUpdated { table, .. } => EventKind::TableUpdated(*table),
            AppEvent::ViewChanged(_) => EventKind::ViewChanged,
            AppEvent::NavigationUpdated(_) => EventKind::NavigationUpdated,
            AppEvent::SectionChanged(_) => EventKind::SectionChanged,
            AppEvent::DetailRequested(_) => EventKind::DetailRequested,
        }
    }
}

type Listener = Arc<dyn Fn(&AppEvent) + Send + Sync>;

#[derive(Default)]
struct ListenerRegistry {
    next_id: u64,
    entries: Vec<ListenerEntry>,
}

struct ListenerEntry {
    id: u64,
    kind: EventKind,
    listener: Listener,
}

/// Handle returned by [`AppState::subscribe`]. Dropping it keeps the listener registered.
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<ListenerRegistry>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().entries.retain(|entry| entry.id != self.id);
        }
    }
}

struct StateInner {
    addresses: Arc<Vec<Address>>,
    notes: Arc<Vec<JoinedNote>>,
    selected_address_id: Option<i64>,
    current_view: ViewMode,
    navigation: Navigation,
    addresses_table: TableState,
    notes_table: TableState,
    import_in_progress: bool,
}

impl StateInner {
    fn table_mut(&mut self, kind: TableKind) -> &mut TableState {
        match kind {
            TableKind::Addresses => &mut self.addresses_table,
            TableKind::Notes => &mut self.notes_table,
        }
    }
}

/// Serialisable view of the store used for debugging exports.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub addresses: usize,
    pub notes: usize,
    pub selected_address_id: Option<i64>,
    pub current_view: ViewMode,
    pub navigation: Navigation,
    pub tables: TablesSnapshot,
    pub import_in_progress: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TablesSnapshot {
    pub addresses: TableState,
    pub notes: TableState,
}

/// Process-wide store. Every setter replaces its slice under the lock and
/// then notifies listeners of the matching [`EventKind`] outside of it.
pub struct AppState {
    inner: Mutex<StateInner>,
    listeners: Arc<Mutex<ListenerRegistry>>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl AppState {
    pub fn new(page_size: usize) -> Self {
        Self {
            inner: Mutex::new(StateInner {
                addresses: Arc::new(Vec::new()),
                notes: Arc::new(Vec::new()),
                selected_address_id: None,
                current_view: ViewMode::Table,
                navigation: Navigation::default(),
                addresses_table: TableState::for_kind(TableKind::Addresses, page_size),
                notes_table: TableState::for_kind(TableKind::Notes, page_size),
                import_in_progress: false,
            }),
            listeners: Arc::new(Mutex::new(ListenerRegistry::default())),
        }
    }

    pub fn subscribe<F>(&self, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&AppEvent) + Send + Sync + 'static,
    {
        let mut registry = self.listeners.lock();
        registry.next_id += 1;
        let id = registry.next_id;
        registry.entries.push(ListenerEntry {
            id,
            kind,
            listener: Arc::new(listener),
        });
        Subscription {
            id,
            registry: Arc::downgrade(&self.listeners),
        }
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners
            .lock()
            .entries
            .iter()
            .filter(|entry| entry.kind == kind)
            .count()
    }

    pub fn emit(&self, event: AppEvent) {
        let kind = event.kind();
        let targets: Vec<Listener> = self
            .listeners
            .lock()
            .entries
            .iter()
            .filter(|entry| entry.kind == kind)
            .map(|entry| Arc::clone(&entry.listener))
            .collect();

        debug!(target: "app_state", ?kind, listeners = targets.len(), "emitting state event");
        for listener in targets {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listener(&event))) {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(target: "app_state", ?kind, %reason, "event listener failed");
            }
        }
    }

    pub fn addresses(&self) -> Arc<Vec<Address>> {
        Arc::clone(&self.inner.lock().addresses)
    }

    pub fn set_addresses(&self, addresses: Vec<Address>) {
        let addresses = Arc::new(addresses);
        self.inner.lock().addresses = Arc::clone(&addresses);
        self.emit(AppEvent::AddressesUpdated(addresses));
    }

    pub fn notes(&self) -> Arc<Vec<JoinedNote>> {
        Arc::clone(&self.inner.lock().notes)
    }

    pub fn set_notes(&self, notes: Vec<JoinedNote>) {
        let notes = Arc::new(notes);
        self.inner.lock().notes = Arc::clone(&notes);
        self.emit(AppEvent::NotesUpdated(notes));
    }

    pub fn selected_address_id(&self) -> Option<i64> {
        self.inner.lock().selected_address_id
    }

    pub fn set_selected_address(&self, address_id: Option<i64>) {
        self.inner.lock().selected_address_id = address_id;
        self.emit(AppEvent::AddressSelected(address_id));
    }

    pub fn table_state(&self, kind: TableKind) -> TableState {
        self.inner.lock().table_mut(kind).clone()
    }

    /// Applies `update` to the table's state and announces the result.
    pub fn update_table_state<F>(&self, kind: TableKind, update: F) -> TableState
    where
        F: FnOnce(&mut TableState),
    {
        let state = {
            let mut inner = self.inner.lock();
            let table = inner.table_mut(kind);
            update(table);
            table.size = table.size.max(1);
            table.page = table.page.max(1);
            table.clone()
        };
        self.emit(AppEvent::TableUpdated {
            table: kind,
            state: state.clone(),
        });
        state
    }

    pub fn reset_table_state(&self, kind: TableKind) -> TableState {
        self.update_table_state(kind, |table| {
            table.page = 1;
            table.search.clear();
        })
    }

    pub fn current_view(&self) -> ViewMode {
        self.inner.lock().current_view
    }

    pub fn set_current_view(&self, view: ViewMode) {
        self.inner.lock().current_view = view;
        self.emit(AppEvent::ViewChanged(view));
    }

    pub fn navigation(&self) -> Navigation {
        self.inner.lock().navigation.clone()
    }

    pub fn set_navigation(&self, navigation: Navigation) {
        self.inner.lock().navigation = navigation.clone();
        self.emit(AppEvent::NavigationUpdated(navigation));
    }

    pub fn reset_navigation(&self) {
        self.set_navigation(Navigation::default());
    }

    pub fn import_in_progress(&self) -> bool {
        self.inner.lock().import_in_progress
    }

    /// Sets the flag and returns its previous value.
    pub fn set_import_in_progress(&self, running: bool) -> bool {
        std::mem::replace(&mut self.inner.lock().import_in_progress, running)
    }

    pub fn address_by_id(&self, id: i64) -> Option<Address> {
        self.inner
            .lock()
            .addresses
            .iter()
            .find(|address| address.id == id)
            .cloned()
    }

    pub fn notes_for_address(&self, address_id: i64) -> Vec<JoinedNote> {
        self.inner
            .lock()
            .notes
            .iter()
            .filter(|note| note.note.address_id == Some(address_id))
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let inner = self.inner.lock();
        StateSnapshot {
            addresses: inner.addresses.len(),
            notes: inner.notes.len(),
            selected_address_id: inner.selected_address_id,
            current_view: inner.current_view,
            navigation: inner.navigation.clone(),
            tables: TablesSnapshot {
                addresses: inner.addresses_table.clone(),
                notes: inner.notes_table.clone(),
            },
            import_in_progress: inner.import_in_progress,
        }
    }
}
