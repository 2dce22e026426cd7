//! Sort, filter and paginate engine behind both dashboard tables.
//!
//! The pure functions at the top of the module are what every render goes
//! through; [`TableManager`] only reads the per-table state from
//! [`AppState`], runs them and hands the resulting [`TableView`] to the
//! presenter.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::host::Presenter;
use crate::models::{Address, JoinedNote};
use crate::state::{AppState, SortField, SortOrder, TableKind, TableState};
use crate::utils::{
    address_string, extract_number, extract_plz, extract_street, format_date, locale_compare,
    normalize_search_text, parse_leading_int, text_preview, Debouncer,
};

pub const MAX_VISIBLE_PAGES: usize = 5;

/// A record type one of the tables can display.
pub trait TableRecord {
    const KIND: TableKind;

    /// Concatenated searchable fields, not yet normalized.
    fn search_text(&self) -> String;

    /// Ascending comparison for `field`.
    fn compare_by(&self, other: &Self, field: SortField) -> Ordering;

    fn to_row(&self) -> TableRow;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectTag {
    pub status: String,
    pub class: &'static str,
    pub icon: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRow {
    pub id: Option<i64>,
    /// Address whose detail view the row opens.
    pub address_id: Option<i64>,
    pub cells: Vec<String>,
    pub tags: Vec<ProjectTag>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PageControl {
    Previous { target: usize, disabled: bool },
    Page { number: usize, active: bool },
    Ellipsis,
    Next { target: usize, disabled: bool },
}

impl PageControl {
    pub fn label(&self) -> String {
        match self {
            Self::Previous { .. } => "‹".to_string(),
            Self::Page { number, .. } => number.to_string(),
            Self::Ellipsis => "…".to_string(),
            Self::Next { .. } => "›".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SortIndicator {
    pub field: SortField,
    pub order: SortOrder,
}

/// Everything needed to draw one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableView {
    pub table: TableKind,
    pub rows: Vec<TableRow>,
    /// Records left after filtering.
    pub total: usize,
    pub page: usize,
    pub page_count: usize,
    pub size: usize,
    pub search: String,
    pub sort: SortIndicator,
    /// Empty when the pagination bar is hidden.
    pub pagination: Vec<PageControl>,
    pub empty_message: Option<&'static str>,
}

impl TableRecord for Address {
    const KIND: TableKind = TableKind::Addresses;

    fn search_text(&self) -> String {
        [
            extract_plz(self),
            extract_street(self),
            extract_number(self),
            self.region_name.clone().unwrap_or_default(),
            self.address_text.clone().unwrap_or_default(),
        ]
        .join(" ")
    }

    fn compare_by(&self, other: &Self, field: SortField) -> Ordering {
        match field {
            SortField::Plz => locale_compare(&extract_plz(self), &extract_plz(other)),
            SortField::Street => locale_compare(&extract_street(self), &extract_street(other)),
            SortField::Number => compare_house_numbers(&extract_number(self), &extract_number(other)),
            SortField::Region => locale_compare(
                self.region_name.as_deref().unwrap_or_default(),
                other.region_name.as_deref().unwrap_or_default(),
            ),
            _ => self.id.cmp(&other.id),
        }
    }

    fn to_row(&self) -> TableRow {
        TableRow {
            id: Some(self.id),
            address_id: Some(self.id),
            cells: vec![
                or_dash(extract_plz(self)),
                or_dash(extract_street(self)),
                or_dash(extract_number(self)),
                or_dash(self.region_name.clone().unwrap_or_default()),
            ],
            tags: self
                .projects
                .iter()
                .map(|project| {
                    let status = project.canonical_status();
                    ProjectTag {
                        status: project.status.clone().unwrap_or_else(|| "unknown".to_string()),
                        class: status.css_class(),
                        icon: status.icon(),
                    }
                })
                .collect(),
        }
    }
}

impl TableRecord for JoinedNote {
    const KIND: TableKind = TableKind::Notes;

    fn search_text(&self) -> String {
        [
            self.note.text.clone(),
            self.note.created_by.clone().unwrap_or_default(),
            address_string(&self.address),
            self.note.id.map(|id| id.to_string()).unwrap_or_default(),
        ]
        .join(" ")
    }

    fn compare_by(&self, other: &Self, field: SortField) -> Ordering {
        match field {
            SortField::Address => {
                locale_compare(&address_string(&self.address), &address_string(&other.address))
            }
            SortField::Text => locale_compare(&self.note.text, &other.note.text),
            SortField::CreatedBy => locale_compare(
                self.note.created_by.as_deref().unwrap_or_default(),
                other.note.created_by.as_deref().unwrap_or_default(),
            ),
            SortField::CreatedAt => self.note.created_at.cmp(&other.note.created_at),
            _ => self.note.id.unwrap_or(0).cmp(&other.note.id.unwrap_or(0)),
        }
    }

    fn to_row(&self) -> TableRow {
        TableRow {
            id: self.note.id,
            address_id: Some(self.address.id),
            cells: vec![
                self.note
                    .id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                address_string(&self.address),
                text_preview(&self.note.text),
                or_dash(self.note.created_by.clone().unwrap_or_default()),
                format_date(self.note.created_at.as_ref()),
            ],
            tags: Vec::new(),
        }
    }
}

fn or_dash(value: String) -> String {
    if value.is_empty() {
        "-".to_string()
    } else {
        value
    }
}

/// Leading integer first (unparsable counts as 0), locale order on ties.
fn compare_house_numbers(a: &str, b: &str) -> Ordering {
    let left = parse_leading_int(a).unwrap_or(0);
    let right = parse_leading_int(b).unwrap_or(0);
    left.cmp(&right).then_with(|| locale_compare(a, b))
}

pub fn filter_records<'a, T: TableRecord>(records: &'a [T], search: &str) -> Vec<&'a T> {
    let needle = normalize_search_text(search);
    if needle.is_empty() {
        return records.iter().collect();
    }
    records
        .iter()
        .filter(|record| normalize_search_text(&record.search_text()).contains(&needle))
        .collect()
}

/// Stable sort; descending reverses the comparison so equal records keep
/// their source order either way.
pub fn sort_records<T: TableRecord>(records: &mut [&T], field: SortField, order: SortOrder) {
    records.sort_by(|a, b| {
        let ordering = a.compare_by(b, field);
        match order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });
}

pub fn page_count(total: usize, size: usize) -> usize {
    total.div_ceil(size.max(1))
}

pub fn paginate<T>(items: &[T], page: usize, size: usize) -> &[T] {
    let size = size.max(1);
    let start = page.saturating_sub(1).saturating_mul(size).min(items.len());
    let end = start.saturating_add(size).min(items.len());
    &items[start..end]
}

/// Window of at most `max_visible` page numbers centred on `current`.
pub fn visible_pages(current: usize, total: usize, max_visible: usize) -> (usize, usize) {
    let mut start = current.saturating_sub(max_visible / 2).max(1);
    let end = total.min(start + max_visible - 1);
    if end + 1 < start + max_visible {
        start = (end + 1).saturating_sub(max_visible).max(1);
    }
    (start, end)
}

pub fn pagination_controls(page: usize, total_pages: usize) -> Vec<PageControl> {
    if total_pages <= 1 {
        return Vec::new();
    }

    let mut controls = vec![PageControl::Previous {
        target: page.saturating_sub(1),
        disabled: page == 1,
    }];
    let (start, end) = visible_pages(page, total_pages, MAX_VISIBLE_PAGES);

    if start > 1 {
        controls.push(PageControl::Page {
            number: 1,
            active: false,
        });
        if start > 2 {
            controls.push(PageControl::Ellipsis);
        }
    }
    controls.extend((start..=end).map(|number| PageControl::Page {
        number,
        active: number == page,
    }));
    if end < total_pages {
        if end + 1 < total_pages {
            controls.push(PageControl::Ellipsis);
        }
        controls.push(PageControl::Page {
            number: total_pages,
            active: false,
        });
    }
    controls.push(PageControl::Next {
        target: page + 1,
        disabled: page == total_pages,
    });
    controls
}

pub fn build_view<T: TableRecord>(records: &[T], state: &TableState) -> TableView {
    let mut matched = filter_records(records, &state.search);
    sort_records(&mut matched, state.sort, state.order);

    let total = matched.len();
    let pages = page_count(total, state.size);
    let page = state.page.clamp(1, pages.max(1));
    let rows: Vec<TableRow> = paginate(&matched, page, state.size)
        .iter()
        .map(|record| record.to_row())
        .collect();

    let empty_message = rows.is_empty().then_some(match T::KIND {
        TableKind::Addresses => "Keine Adressen gefunden",
        TableKind::Notes => "Keine Notizen gefunden",
    });

    TableView {
        table: T::KIND,
        rows,
        total,
        page,
        page_count: pages,
        size: state.size,
        search: state.search.clone(),
        sort: SortIndicator {
            field: state.sort,
            order: state.order,
        },
        pagination: pagination_controls(page, pages),
        empty_message,
    }
}

#[derive(Clone)]
pub struct TableManager {
    state: Arc<AppState>,
    presenter: Arc<dyn Presenter>,
    debouncer: Debouncer,
}

impl TableManager {
    pub fn new(state: Arc<AppState>, presenter: Arc<dyn Presenter>, debounce: Duration) -> Self {
        Self {
            state,
            presenter,
            debouncer: Debouncer::new(debounce),
        }
    }

    /// Computes the current frame for `kind` without presenting it.
    pub fn view(&self, kind: TableKind) -> TableView {
        let table_state = self.state.table_state(kind);
        match kind {
            TableKind::Addresses => build_view(&self.state.addresses(), &table_state),
            TableKind::Notes => build_view(&self.state.notes(), &table_state),
        }
    }

    pub fn render(&self, kind: TableKind) -> TableView {
        let view = self.view(kind);
        if view.page != self.state.table_state(kind).page {
            let page = view.page;
            self.state.update_table_state(kind, |table| table.page = page);
        }
        debug!(
            target: "table",
            table = kind.as_str(),
            rows = view.rows.len(),
            total = view.total,
            page = view.page,
            "rendering table"
        );
        self.presenter.table(&view);
        view
    }

    /// Inline error row in place of the table body.
    pub fn render_error(&self, kind: TableKind, message: &str) {
        warn!(target: "table", table = kind.as_str(), message, "table load failed");
        self.presenter.table_error(kind, message);
    }

    /// Same field flips the order, a new field starts at its default order.
    pub fn sort_table(&self, kind: TableKind, field: SortField) -> TableView {
        self.state.update_table_state(kind, |table| {
            if table.sort == field {
                table.order = table.order.toggled();
            } else {
                table.sort = field;
                table.order = field.default_order();
            }
            table.page = 1;
        });
        self.render(kind)
    }

    /// Live search input: updates the state immediately, renders once typing pauses.
    pub fn filter_table(&self, kind: TableKind, search: &str) {
        self.apply_search(kind, search);
        let manager = self.clone();
        self.debouncer.call(move || {
            manager.render(kind);
        });
    }

    pub fn filter_table_now(&self, kind: TableKind, search: &str) -> TableView {
        self.debouncer.cancel();
        self.apply_search(kind, search);
        self.render(kind)
    }

    fn apply_search(&self, kind: TableKind, search: &str) {
        self.state.update_table_state(kind, |table| {
            table.search = search.to_string();
            table.page = 1;
        });
    }

    pub fn change_page_size(&self, kind: TableKind, size: usize) -> TableView {
        self.state.update_table_state(kind, |table| {
            table.size = size;
            table.page = 1;
        });
        self.render(kind)
    }

    /// Returns `false` and leaves the state untouched when `page` is out of range.
    pub fn change_page(&self, kind: TableKind, page: usize) -> bool {
        if page < 1 {
            return false;
        }
        let max_page = self.view(kind).page_count;
        if page > max_page {
            debug!(target: "table", table = kind.as_str(), page, max_page, "page out of range");
            return false;
        }
        self.state.update_table_state(kind, |table| table.page = page);
        self.render(kind);
        true
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::host::RecordingPresenter;
    use crate::models::{Note, Project};

    fn address(id: i64, plz: &str, street: &str, number: &str) -> Address {
        Address {
            id,
            postal_code: Some(plz.into()),
            street: Some(street.into()),
            house_number: Some(number.into()),
            ..Address::default()
        }
    }

    fn numbered(count: i64) -> Vec<Address> {
        (1..=count)
            .map(|id| address(id, "10115", "Lindenstr", &id.to_string()))
            .collect()
    }

    fn manager_with(addresses: Vec<Address>) -> (TableManager, Arc<AppState>, Arc<RecordingPresenter>) {
        let state = Arc::new(AppState::default());
        state.set_addresses(addresses);
        let presenter = Arc::new(RecordingPresenter::new());
        let manager = TableManager::new(state.clone(), presenter.clone(), Duration::from_millis(100));
        (manager, state, presenter)
    }

    #[test]
    fn search_ignores_case_and_accents() {
        let records = vec![
            address(1, "10115", "Hauptstraße", "1"),
            address(2, "80331", "Marienplatz", "2"),
        ];
        let found = filter_records(&records, "STRASSE");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, 1);
        assert_eq!(filter_records(&records, "  ").len(), 2);
    }

    #[test]
    fn number_sort_is_numeric_first() {
        let records = vec![
            address(1, "1", "A", "9a"),
            address(2, "1", "A", "12"),
            address(3, "1", "A", "9"),
        ];
        let mut refs: Vec<&Address> = records.iter().collect();
        sort_records(&mut refs, SortField::Number, SortOrder::Asc);
        let numbers: Vec<_> = refs.iter().map(|a| a.house_number.clone().unwrap()).collect();
        assert_eq!(numbers, vec!["9", "9a", "12"]);

        sort_records(&mut refs, SortField::Number, SortOrder::Desc);
        assert_eq!(refs[0].house_number.as_deref(), Some("12"));
    }

    #[test]
    fn notes_sort_by_creation_date() {
        let day = |d| NaiveDate::from_ymd_opt(2025, 6, d).unwrap().and_hms_opt(9, 0, 0);
        let note = |id, created_at| {
            JoinedNote::join(
                Note {
                    id: Some(id),
                    address_id: Some(1),
                    text: format!("note {id}"),
                    created_at,
                    ..Note::default()
                },
                &[],
            )
        };
        let notes = vec![note(1, day(3)), note(2, None), note(3, day(10))];
        let mut refs: Vec<&JoinedNote> = notes.iter().collect();
        sort_records(&mut refs, SortField::CreatedAt, SortOrder::Desc);
        let ids: Vec<_> = refs.iter().map(|n| n.note.id.unwrap()).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn pagination_math() {
        assert_eq!(page_count(0, 20), 0);
        assert_eq!(page_count(41, 20), 3);
        let items: Vec<i32> = (1..=45).collect();
        assert_eq!(paginate(&items, 3, 20), &[41, 42, 43, 44, 45]);
        assert!(paginate(&items, 9, 20).is_empty());
        assert_eq!(visible_pages(1, 10, 5), (1, 5));
        assert_eq!(visible_pages(6, 10, 5), (4, 8));
        assert_eq!(visible_pages(10, 10, 5), (6, 10));
        assert_eq!(visible_pages(2, 3, 5), (1, 3));
    }

    #[test]
    fn pagination_controls_with_ellipses() {
        assert!(pagination_controls(1, 1).is_empty());

        let controls = pagination_controls(6, 12);
        let labels: Vec<String> = controls.iter().map(PageControl::label).collect();
        assert_eq!(
            labels,
            vec!["‹", "1", "…", "4", "5", "6", "7", "8", "…", "12", "›"]
        );
        assert!(controls.contains(&PageControl::Page { number: 6, active: true }));

        let first = pagination_controls(1, 3);
        assert_eq!(first[0], PageControl::Previous { target: 0, disabled: true });
        assert_eq!(
            first.last(),
            Some(&PageControl::Next { target: 2, disabled: false })
        );
    }

    #[test]
    fn rows_project_addresses_and_tags() {
        let mut record = address(7, "10115", "Lindenstr", "5");
        record.projects = vec![Project {
            id: Some(1),
            status: Some("Completed".into()),
            ..Project::default()
        }];
        let row = record.to_row();
        assert_eq!(row.cells, vec!["10115", "Lindenstr", "5", "-"]);
        assert_eq!(row.tags[0].class, "status-completed");
        assert_eq!(row.tags[0].status, "Completed");
    }

    #[test]
    fn empty_result_carries_placeholder() {
        let (manager, _state, _) = manager_with(numbered(3));
        let view = manager.filter_table_now(TableKind::Addresses, "nirgendwo");
        assert_eq!(view.total, 0);
        assert_eq!(view.empty_message, Some("Keine Adressen gefunden"));
        assert!(view.pagination.is_empty());
    }

    #[test]
    fn out_of_range_page_is_a_no_op() {
        let (manager, state, presenter) = manager_with(numbered(45));
        assert!(manager.change_page(TableKind::Addresses, 3));
        assert_eq!(state.table_state(TableKind::Addresses).page, 3);
        assert_eq!(presenter.last_table(TableKind::Addresses).unwrap().rows.len(), 5);

        assert!(!manager.change_page(TableKind::Addresses, 4));
        assert!(!manager.change_page(TableKind::Addresses, 0));
        assert_eq!(state.table_state(TableKind::Addresses).page, 3);
    }

    #[test]
    fn sorting_toggles_and_resets_page() {
        let (manager, state, _) = manager_with(numbered(45));
        manager.change_page(TableKind::Addresses, 2);

        let view = manager.sort_table(TableKind::Addresses, SortField::Plz);
        assert_eq!(view.sort.order, SortOrder::Desc);
        assert_eq!(view.page, 1);

        let view = manager.sort_table(TableKind::Addresses, SortField::Id);
        assert_eq!(view.sort, SortIndicator { field: SortField::Id, order: SortOrder::Desc });
        assert_eq!(view.rows[0].id, Some(45));

        manager.sort_table(TableKind::Addresses, SortField::Street);
        assert_eq!(state.table_state(TableKind::Addresses).order, SortOrder::Asc);
    }

    #[test]
    fn page_size_change_resets_to_first_page() {
        let (manager, state, _) = manager_with(numbered(45));
        manager.change_page(TableKind::Addresses, 3);
        let view = manager.change_page_size(TableKind::Addresses, 50);
        assert_eq!(view.page, 1);
        assert_eq!(view.page_count, 1);
        assert_eq!(state.table_state(TableKind::Addresses).size, 50);
    }

    #[test]
    fn render_clamps_page_after_data_shrinks() {
        let (manager, state, _) = manager_with(numbered(45));
        manager.change_page(TableKind::Addresses, 3);
        state.set_addresses(numbered(5));
        let view = manager.render(TableKind::Addresses);
        assert_eq!(view.page, 1);
        assert_eq!(state.table_state(TableKind::Addresses).page, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn live_search_renders_once_after_pause() {
        let (manager, state, presenter) = manager_with(numbered(12));
        manager.filter_table(TableKind::Addresses, "1");
        manager.filter_table(TableKind::Addresses, "12");
        manager.filter_table(TableKind::Addresses, "12");
        assert_eq!(state.table_state(TableKind::Addresses).search, "12");
        assert!(presenter.last_table(TableKind::Addresses).is_none());

        tokio::time::sleep(Duration::from_millis(150)).await;

        let tables: Vec<_> = presenter
            .frames()
            .into_iter()
            .filter(|frame| matches!(frame, crate::host::PresentedFrame::Table(_)))
            .collect();
        assert_eq!(tables.len(), 1);
        assert_eq!(presenter.last_table(TableKind::Addresses).unwrap().total, 1);
    }
}
