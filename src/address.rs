use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info};

use crate::api::ApiService;
use crate::errors::AppResult;
use crate::host::Presenter;
use crate::models::Address;
use crate::state::{AppEvent, AppState, NavStep, Navigation, TableKind, ViewMode};
use crate::table::TableManager;
use crate::utils::{extract_number, extract_plz, extract_street, locale_compare, parse_leading_int};

const NO_PLZS: &str = "Keine PLZs verfügbar";
const NO_ENTRIES: &str = "Keine Einträge verfügbar";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Breadcrumb {
    pub text: String,
    pub active: bool,
}

impl Breadcrumb {
    fn done(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            active: false,
        }
    }

    fn current(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            active: true,
        }
    }
}

/// One level of the drill-down as the tree view shows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationFrame {
    pub step: NavStep,
    pub breadcrumb: Vec<Breadcrumb>,
    pub items: Vec<String>,
    /// Shown instead of the grid when `items` is empty.
    pub placeholder: Option<&'static str>,
    pub show_back: bool,
}

impl NavigationFrame {
    fn new(step: NavStep, breadcrumb: Vec<Breadcrumb>, items: Vec<String>, empty: &'static str) -> Self {
        Self {
            placeholder: items.is_empty().then_some(empty),
            show_back: step != NavStep::Plz,
            step,
            breadcrumb,
            items,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressStats {
    pub total_addresses: usize,
    pub unique_plzs: usize,
    pub unique_streets: usize,
    pub total_projects: usize,
    pub average_projects_per_address: f64,
}

/// Distinct non-empty postal codes, lexically sorted.
pub fn distinct_plzs(addresses: &[Address]) -> Vec<String> {
    addresses
        .iter()
        .map(extract_plz)
        .filter(|plz| !plz.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn streets_in(addresses: &[Address], plz: &str) -> Vec<String> {
    addresses
        .iter()
        .filter(|address| extract_plz(address) == plz)
        .map(extract_street)
        .filter(|street| !street.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn numbers_in(addresses: &[Address], plz: &str, street: &str) -> Vec<String> {
    let mut numbers: Vec<String> = addresses
        .iter()
        .filter(|address| extract_plz(address) == plz && extract_street(address) == street)
        .map(extract_number)
        .filter(|number| !number.is_empty())
        .collect();
    numbers.sort_by(|a, b| compare_drilldown_numbers(a, b));
    numbers
}

/// Numeric when both sides start with a number, locale order otherwise and on ties.
fn compare_drilldown_numbers(a: &str, b: &str) -> Ordering {
    match (parse_leading_int(a), parse_leading_int(b)) {
        (Some(left), Some(right)) => left.cmp(&right).then_with(|| locale_compare(a, b)),
        _ => locale_compare(a, b),
    }
}

pub struct AddressManager {
    api: ApiService,
    state: Arc<AppState>,
    tables: TableManager,
    presenter: Arc<dyn Presenter>,
}

impl AddressManager {
    pub fn new(
        api: ApiService,
        state: Arc<AppState>,
        tables: TableManager,
        presenter: Arc<dyn Presenter>,
    ) -> Self {
        Self {
            api,
            state,
            tables,
            presenter,
        }
    }

    pub async fn load_addresses(&self) -> AppResult<Arc<Vec<Address>>> {
        match self.api.fetch_addresses().await {
            Ok(addresses) => {
                info!(target: "address", count = addresses.len(), "addresses loaded");
                self.state.set_addresses(addresses);
                self.show_all_plzs();
                Ok(self.state.addresses())
            }
            Err(err) => {
                error!(target: "address", error = %err, "loading addresses failed");
                self.tables.render_error(
                    TableKind::Addresses,
                    &format!("Fehler beim Laden der Adressen: {err}"),
                );
                Err(err)
            }
        }
    }

    pub fn show_all_plzs(&self) -> NavigationFrame {
        let frame = NavigationFrame::new(
            NavStep::Plz,
            vec![Breadcrumb::current("PLZ auswählen")],
            distinct_plzs(&self.state.addresses()),
            NO_PLZS,
        );
        self.presenter.navigation(&frame);
        frame
    }

    pub fn select_plz(&self, plz: &str) -> NavigationFrame {
        self.state.set_navigation(Navigation {
            step: NavStep::Street,
            plz: Some(plz.to_string()),
            street: None,
            number: None,
        });

        let frame = NavigationFrame::new(
            NavStep::Street,
            vec![
                Breadcrumb::done(format!("PLZ: {plz}")),
                Breadcrumb::current("Straße auswählen"),
            ],
            streets_in(&self.state.addresses(), plz),
            NO_ENTRIES,
        );
        self.presenter.navigation(&frame);
        frame
    }

    pub fn select_street(&self, street: &str) -> NavigationFrame {
        let mut navigation = self.state.navigation();
        navigation.step = NavStep::Number;
        navigation.street = Some(street.to_string());
        let plz = navigation.plz.clone().unwrap_or_default();
        self.state.set_navigation(navigation);

        let frame = NavigationFrame::new(
            NavStep::Number,
            vec![
                Breadcrumb::done(format!("PLZ: {plz}")),
                Breadcrumb::done(format!("Straße: {street}")),
                Breadcrumb::current("Hausnummer auswählen"),
            ],
            numbers_in(&self.state.addresses(), &plz, street),
            NO_ENTRIES,
        );
        self.presenter.navigation(&frame);
        frame
    }

    /// Resolves the address under the cursor and asks for its detail view.
    pub fn select_number(&self, number: &str) -> Option<i64> {
        let navigation = self.state.navigation();
        let plz = navigation.plz.unwrap_or_default();
        let street = navigation.street.unwrap_or_default();

        let address_id = self
            .state
            .addresses()
            .iter()
            .find(|address| {
                extract_plz(address) == plz
                    && extract_street(address) == street
                    && extract_number(address) == number
            })
            .map(|address| address.id);

        match address_id {
            Some(id) => {
                self.state.set_navigation(Navigation {
                    number: Some(number.to_string()),
                    ..self.state.navigation()
                });
                self.state.emit(AppEvent::DetailRequested(id));
            }
            None => debug!(target: "address", %plz, %street, number, "no address under cursor"),
        }
        address_id
    }

    /// One level up; `None` when already at the postal code level.
    pub fn go_back(&self) -> Option<NavigationFrame> {
        let navigation = self.state.navigation();
        match navigation.step {
            NavStep::Plz => None,
            NavStep::Street => Some(self.reset_to_top()),
            NavStep::Number => match navigation.plz {
                Some(plz) => Some(self.select_plz(&plz)),
                None => Some(self.reset_to_top()),
            },
        }
    }

    fn reset_to_top(&self) -> NavigationFrame {
        self.state.reset_navigation();
        self.show_all_plzs()
    }

    pub fn show_address_view(&self, view: ViewMode) {
        self.state.set_current_view(view);
        self.presenter.view_mode(view);
        if view == ViewMode::Tree {
            self.reset_to_top();
        }
    }

    pub fn address_stats(&self) -> AddressStats {
        let addresses = self.state.addresses();
        let mut plzs = BTreeSet::new();
        let mut streets = BTreeSet::new();
        let mut total_projects = 0;

        for address in addresses.iter() {
            let plz = extract_plz(address);
            if !plz.is_empty() {
                plzs.insert(plz);
            }
            let street = extract_street(address);
            if !street.is_empty() {
                streets.insert(street);
            }
            total_projects += address.projects.len();
        }

        let average = if addresses.is_empty() {
            0.0
        } else {
            (total_projects as f64 / addresses.len() as f64 * 100.0).round() / 100.0
        };

        AddressStats {
            total_addresses: addresses.len(),
            unique_plzs: plzs.len(),
            unique_streets: streets.len(),
            total_projects,
            average_projects_per_address: average,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{self, AtomicUsize};
    use std::time::Duration;

    use httptest::{matchers::*, responders::*, Expectation, Server};
    use parking_lot::Mutex;

    use super::*;
    use crate::config::AppConfig;
    use crate::host::RecordingPresenter;
    use crate::models::Project;
    use crate::session::SessionStore;
    use crate::state::EventKind;

    fn address(id: i64, plz: &str, street: &str, number: &str) -> Address {
        Address {
            id,
            postal_code: Some(plz.into()),
            street: Some(street.into()),
            house_number: Some(number.into()),
            ..Address::default()
        }
    }

    fn sample() -> Vec<Address> {
        vec![
            address(1, "10115", "Lindenstr", "5"),
            address(2, "10115", "Lindenstr", "3a"),
            address(3, "80331", "Marienplatz", "1"),
            address(4, "10115", "Auguststr", "12"),
            address(5, "10115", "Lindenstr", "10"),
        ]
    }

    fn manager_at(url: String, addresses: Vec<Address>) -> (AddressManager, Arc<AppState>, Arc<RecordingPresenter>) {
        let config = AppConfig::for_api_base(url);
        let api = ApiService::new(&config, SessionStore::in_memory()).unwrap();
        let state = Arc::new(AppState::default());
        state.set_addresses(addresses);
        let presenter = Arc::new(RecordingPresenter::new());
        let tables = TableManager::new(state.clone(), presenter.clone(), Duration::from_millis(10));
        let manager = AddressManager::new(api, state.clone(), tables, presenter.clone());
        (manager, state, presenter)
    }

    fn manager(addresses: Vec<Address>) -> (AddressManager, Arc<AppState>, Arc<RecordingPresenter>) {
        manager_at("http://127.0.0.1:9/api/v1".to_string(), addresses)
    }

    #[test]
    fn plzs_are_distinct_sorted_and_stable() {
        let (manager, _, _) = manager(sample());
        let first = manager.show_all_plzs();
        assert_eq!(first.items, vec!["10115", "80331"]);
        assert_eq!(first.breadcrumb, vec![Breadcrumb::current("PLZ auswählen")]);
        assert!(!first.show_back);
        assert_eq!(manager.show_all_plzs(), first);
    }

    #[test]
    fn drill_down_orders_numbers_numerically() {
        let (manager, state, _) = manager(sample());

        let streets = manager.select_plz("10115");
        assert_eq!(streets.items, vec!["Auguststr", "Lindenstr"]);
        assert_eq!(state.navigation().step, NavStep::Street);

        let numbers = manager.select_street("Lindenstr");
        assert_eq!(numbers.items, vec!["3a", "5", "10"]);
        assert_eq!(numbers.breadcrumb.len(), 3);
        assert_eq!(numbers.breadcrumb[1].text, "Straße: Lindenstr");
        assert!(numbers.breadcrumb[2].active);
        assert!(numbers.show_back);
    }

    #[test]
    fn two_address_scenario() {
        let (manager, _, _) = manager(vec![
            address(1, "10115", "Lindenstr", "5"),
            address(2, "10115", "Lindenstr", "3a"),
        ]);
        manager.select_plz("10115");
        assert_eq!(manager.select_street("Lindenstr").items, vec!["3a", "5"]);
    }

    #[test]
    fn unparsable_numbers_fall_back_to_locale_order() {
        assert_eq!(compare_drilldown_numbers("b", "a"), Ordering::Greater);
        assert_eq!(compare_drilldown_numbers("2", "10"), Ordering::Less);
        assert_eq!(compare_drilldown_numbers("5b", "5a"), Ordering::Greater);
    }

    #[test]
    fn selecting_a_number_requests_detail() {
        let (manager, state, _) = manager(sample());
        let requested = Arc::new(Mutex::new(Vec::new()));
        let sink = requested.clone();
        let _subscription = state.subscribe(EventKind::DetailRequested, move |event| {
            if let AppEvent::DetailRequested(id) = event {
                sink.lock().push(*id);
            }
        });

        manager.select_plz("10115");
        manager.select_street("Lindenstr");
        assert_eq!(manager.select_number("3a"), Some(2));
        assert_eq!(manager.select_number("99"), None);
        assert_eq!(*requested.lock(), vec![2]);
        assert_eq!(state.navigation().number.as_deref(), Some("3a"));
    }

    #[test]
    fn go_back_pops_one_level() {
        let (manager, state, _) = manager(sample());
        assert!(manager.go_back().is_none());

        manager.select_plz("10115");
        manager.select_street("Lindenstr");
        let frame = manager.go_back().unwrap();
        assert_eq!(frame.step, NavStep::Street);
        assert_eq!(state.navigation().street, None);
        assert_eq!(state.navigation().plz.as_deref(), Some("10115"));

        let frame = manager.go_back().unwrap();
        assert_eq!(frame.step, NavStep::Plz);
        assert_eq!(state.navigation(), Navigation::default());
    }

    #[test]
    fn empty_levels_show_placeholders() {
        let (manager, _, _) = manager(Vec::new());
        assert_eq!(manager.show_all_plzs().placeholder, Some("Keine PLZs verfügbar"));
        assert_eq!(manager.select_plz("00000").placeholder, Some("Keine Einträge verfügbar"));
    }

    #[test]
    fn tree_view_resets_cursor() {
        let (manager, state, presenter) = manager(sample());
        manager.select_plz("10115");
        manager.show_address_view(ViewMode::Tree);
        assert_eq!(state.current_view(), ViewMode::Tree);
        assert_eq!(state.navigation().step, NavStep::Plz);
        assert_eq!(presenter.last_navigation().unwrap().step, NavStep::Plz);
    }

    #[test]
    fn stats_count_unique_values() {
        let mut addresses = sample();
        addresses[0].projects = vec![Project::default(), Project::default()];
        addresses[3].projects = vec![Project::default()];
        let (manager, _, _) = manager(addresses);

        let stats = manager.address_stats();
        assert_eq!(stats.total_addresses, 5);
        assert_eq!(stats.unique_plzs, 2);
        assert_eq!(stats.unique_streets, 3);
        assert_eq!(stats.total_projects, 3);
        assert_eq!(stats.average_projects_per_address, 0.6);
    }

    #[tokio::test]
    async fn failed_load_shows_inline_error() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/api/v1/addresses"))
                .respond_with(status_code(500)),
        );
        let (manager, state, presenter) = manager_at(server.url_str("/api/v1"), Vec::new());

        assert!(manager.load_addresses().await.is_err());
        assert!(state.addresses().is_empty());
        let errors = presenter.table_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, TableKind::Addresses);
        assert!(errors[0].1.starts_with("Fehler beim Laden der Adressen: HTTP 500"));
    }

    #[tokio::test]
    async fn load_publishes_and_shows_top_level() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/api/v1/addresses")).respond_with(
                json_encoded(serde_json::json!([
                    { "id": 1, "postalCode": "10115", "street": "Lindenstr", "houseNumber": "5" },
                    { "id": 2, "addressText": "Marienplatz 1, 80331 München" }
                ])),
            ),
        );
        let (manager, state, presenter) = manager_at(server.url_str("/api/v1"), Vec::new());
        let published = Arc::new(AtomicUsize::new(0));
        let seen = published.clone();
        let _subscription = state.subscribe(EventKind::AddressesUpdated, move |event| {
            if let AppEvent::AddressesUpdated(list) = event {
                seen.store(list.len(), atomic::Ordering::SeqCst);
            }
        });

        let addresses = manager.load_addresses().await.unwrap();
        assert_eq!(addresses.len(), 2);
        assert_eq!(published.load(atomic::Ordering::SeqCst), 2);
        assert_eq!(
            presenter.last_navigation().unwrap().items,
            vec!["10115", "80331"]
        );
    }
}
