pub mod address;
pub mod api;
pub mod auth;
pub mod config;
pub mod errors;
pub mod host;
pub mod import;
pub mod modal;
pub mod models;
pub mod notes;
pub mod session;
pub mod state;
pub mod table;
pub mod utils;
pub mod weather;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::address::{AddressManager, AddressStats};
use crate::api::ApiService;
use crate::auth::{AuthManager, SessionInfo};
use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::host::{
    Geolocator, ImportEnvironment, Interactor, Navigator, Notification, Presenter,
};
use crate::import::ImportManager;
use crate::modal::ModalManager;
use crate::notes::{NotesManager, NotesStats};
use crate::session::SessionStore;
use crate::state::{
    AppEvent, AppState, EventKind, Section, Subscription, TableKind, TablesSnapshot, ViewMode,
};
use crate::table::TableManager;
use crate::weather::WeatherService;

const EXPORT_VERSION: &str = "1.0.0";

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,salesman_dashboard=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}

/// Platform adapters the dashboard runs against.
#[derive(Clone)]
pub struct HostAdapters {
    pub presenter: Arc<dyn Presenter>,
    pub navigator: Arc<dyn Navigator>,
    pub interactor: Arc<dyn Interactor>,
    pub import_environment: Arc<dyn ImportEnvironment>,
    pub geolocator: Arc<dyn Geolocator>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStats {
    pub addresses: AddressStats,
    pub notes: NotesStats,
    pub session: Option<SessionInfo>,
    pub import_in_progress: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportedState {
    timestamp: String,
    version: &'static str,
    address_count: usize,
    note_count: usize,
    selected_address_id: Option<i64>,
    current_view: ViewMode,
    current_section: Section,
    tables: TablesSnapshot,
    import_in_progress: bool,
}

/// Composition root: owns the store, every manager and the event wiring
/// between them.
pub struct AppContext {
    config: AppConfig,
    state: Arc<AppState>,
    api: ApiService,
    presenter: Arc<dyn Presenter>,
    tables: TableManager,
    auth: AuthManager,
    addresses: Arc<AddressManager>,
    notes: Arc<NotesManager>,
    modal: Arc<ModalManager>,
    imports: ImportManager,
    weather: WeatherService,
    section: Mutex<Section>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl AppContext {
    pub fn new(config: AppConfig, session: SessionStore, hosts: HostAdapters) -> AppResult<Self> {
        let HostAdapters {
            presenter,
            navigator,
            interactor,
            import_environment,
            geolocator,
        } = hosts;

        let state = Arc::new(AppState::new(config.table_page_size));
        let api = ApiService::new(&config, session)?;
        let tables = TableManager::new(
            Arc::clone(&state),
            Arc::clone(&presenter),
            Duration::from_millis(config.search_debounce_ms),
        );
        let auth = AuthManager::new(
            api.clone(),
            &config,
            Arc::clone(&presenter),
            navigator,
            Arc::clone(&interactor),
        );
        let addresses = Arc::new(AddressManager::new(
            api.clone(),
            Arc::clone(&state),
            tables.clone(),
            Arc::clone(&presenter),
        ));
        let notes = Arc::new(NotesManager::new(
            api.clone(),
            Arc::clone(&state),
            tables.clone(),
            Arc::clone(&presenter),
            Arc::clone(&interactor),
        ));
        let modal = Arc::new(ModalManager::new(
            api.clone(),
            Arc::clone(&state),
            Arc::clone(&notes),
            Arc::clone(&presenter),
            Arc::clone(&interactor),
        ));
        let imports = ImportManager::new(
            api.clone(),
            Arc::clone(&state),
            Arc::clone(&addresses),
            Arc::clone(&notes),
            Arc::clone(&presenter),
            interactor,
            import_environment,
            config.import,
        );
        let weather = WeatherService::new(api.clone(), &config, geolocator, Arc::clone(&presenter));

        let context = Self {
            config,
            state,
            api,
            presenter,
            tables,
            auth,
            addresses,
            notes,
            modal,
            imports,
            weather,
            section: Mutex::new(Section::Addresses),
            subscriptions: Mutex::new(Vec::new()),
        };
        context.wire_events();
        Ok(context)
    }

    /// Managers only publish; both tables redraw from the store.
    fn wire_events(&self) {
        let tables = self.tables.clone();
        let addresses_rendered = self.state.subscribe(EventKind::AddressesUpdated, move |_| {
            tables.render(TableKind::Addresses);
        });

        let tables = self.tables.clone();
        let notes_rendered = self.state.subscribe(EventKind::NotesUpdated, move |_| {
            tables.render(TableKind::Notes);
        });

        let modal = Arc::clone(&self.modal);
        let detail_opened = self.state.subscribe(EventKind::DetailRequested, move |event| {
            let AppEvent::DetailRequested(address_id) = event else {
                return;
            };
            let address_id = *address_id;
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    let modal = Arc::clone(&modal);
                    runtime.spawn(async move {
                        modal.open_notes_modal(Some(address_id)).await;
                    });
                }
                Err(_) => warn!(target: "app", address_id, "no runtime to open address detail"),
            }
        });

        self.subscriptions
            .lock()
            .extend([addresses_rendered, notes_rendered, detail_opened]);
    }

    /// Startup sequence. Returns `false` when the session is not usable or
    /// the core data could not be loaded.
    pub async fn initialize(&self) -> bool {
        info!(target: "app", api = %self.config.api_base_url, "initializing dashboard");
        if !self.auth.initialize().await {
            info!(target: "app", "not authenticated, initialization stopped");
            return false;
        }

        if let Err(err) = self.load_core_data().await {
            error!(target: "app", error = %err, "initialization failed");
            if err.is_unauthorized() {
                self.presenter.notify(&Notification::error(
                    "Fehler",
                    "Sitzung abgelaufen. Bitte melden Sie sich erneut an.",
                ));
                self.auth.handle_auth_failure();
            } else {
                self.presenter.notify(&Notification::error(
                    "Fehler",
                    "Fehler beim Laden der Daten. Bitte laden Sie die Seite neu.",
                ));
            }
            return false;
        }

        self.weather.load_weather().await;
        self.show_section(Section::Addresses).await;
        info!(target: "app", "dashboard ready");
        true
    }

    async fn load_core_data(&self) -> AppResult<()> {
        self.addresses.load_addresses().await?;
        self.notes.load_all_notes().await?;
        Ok(())
    }

    /// Switches the visible section, loading notes lazily the first time
    /// the notes list is opened.
    pub async fn show_section(&self, section: Section) {
        if section == Section::Notes
            && self.state.notes().is_empty()
            && !self.state.addresses().is_empty()
        {
            if let Err(err) = self.notes.load_all_notes().await {
                warn!(target: "app", error = %err, "loading notes for section failed");
            }
        }
        *self.section.lock() = section;
        self.state.emit(AppEvent::SectionChanged(section));
        self.presenter.section(section);
        debug!(target: "app", ?section, "section shown");
    }

    pub fn current_section(&self) -> Section {
        *self.section.lock()
    }

    pub fn app_stats(&self) -> AppStats {
        AppStats {
            addresses: self.addresses.address_stats(),
            notes: self.notes.notes_stats(),
            session: self.auth.session_info(),
            import_in_progress: self.state.import_in_progress(),
        }
    }

    /// JSON snapshot for debugging and support requests.
    pub fn export_state(&self) -> AppResult<Value> {
        let snapshot = self.state.snapshot();
        let exported = ExportedState {
            timestamp: Utc::now().to_rfc3339(),
            version: EXPORT_VERSION,
            address_count: snapshot.addresses,
            note_count: snapshot.notes,
            selected_address_id: snapshot.selected_address_id,
            current_view: snapshot.current_view,
            current_section: self.current_section(),
            tables: snapshot.tables,
            import_in_progress: snapshot.import_in_progress,
        };
        serde_json::to_value(exported).map_err(AppError::from)
    }

    /// Drops cached session entries and resets both tables. Credentials stay.
    pub fn clear_app_cache(&self) {
        self.api.session().clear_cache();
        self.state.reset_table_state(TableKind::Addresses);
        self.state.reset_table_state(TableKind::Notes);
        self.state.reset_navigation();
        info!(target: "app", "application cache cleared");
    }

    /// Cancels timers and detaches every subscription.
    pub fn destroy(&self) {
        self.auth.cancel_refresh();
        if self.modal.is_open() {
            self.modal.close();
        }
        for subscription in self.subscriptions.lock().drain(..) {
            subscription.unsubscribe();
        }
        info!(target: "app", "dashboard destroyed");
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    pub fn api(&self) -> &ApiService {
        &self.api
    }

    pub fn tables(&self) -> &TableManager {
        &self.tables
    }

    pub fn auth(&self) -> &AuthManager {
        &self.auth
    }

    pub fn addresses(&self) -> &AddressManager {
        &self.addresses
    }

    pub fn notes(&self) -> &NotesManager {
        &self.notes
    }

    pub fn modal(&self) -> &ModalManager {
        &self.modal
    }

    pub fn imports(&self) -> &ImportManager {
        &self.imports
    }

    pub fn weather(&self) -> &WeatherService {
        &self.weather
    }
}
