use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::models::Address;

static PLZ_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{4,5}\b").expect("postal code pattern"));
static STREET_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([^,\d]+)").expect("street pattern"));
static NUMBER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+[a-zA-Z]*").expect("house number pattern"));

const PREVIEW_LENGTH: usize = 80;
const SIZE_UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
const EXCEL_EXTENSIONS: [&str; 2] = ["xlsx", "xls"];

pub fn extract_plz(address: &Address) -> String {
    non_empty(address.postal_code.as_deref())
        .map(str::to_string)
        .unwrap_or_else(|| extract_from_text(address.address_text.as_deref(), &PLZ_PATTERN))
}

pub fn extract_street(address: &Address) -> String {
    if let Some(street) = non_empty(address.street.as_deref()) {
        return street.to_string();
    }
    let Some(text) = non_empty(address.address_text.as_deref()) else {
        return String::new();
    };
    match STREET_PATTERN.captures(text).and_then(|caps| caps.get(1)) {
        Some(found) => found.as_str().trim().to_string(),
        None => text.split(',').next().unwrap_or_default().trim().to_string(),
    }
}

pub fn extract_number(address: &Address) -> String {
    non_empty(address.house_number.as_deref())
        .map(str::to_string)
        .unwrap_or_else(|| extract_from_text(address.address_text.as_deref(), &NUMBER_PATTERN))
}

/// `"<plz> <street> <number>"`, trimmed.
pub fn address_string(address: &Address) -> String {
    format!(
        "{} {} {}",
        extract_plz(address),
        extract_street(address),
        extract_number(address)
    )
    .trim()
    .to_string()
}

fn extract_from_text(text: Option<&str>, pattern: &Regex) -> String {
    text.and_then(|value| pattern.find(value))
        .map(|found| found.as_str().to_string())
        .unwrap_or_default()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

pub fn format_date(value: Option<&NaiveDateTime>) -> String {
    value
        .map(|ts| ts.format("%d.%m.%Y, %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

pub fn format_date_short(value: Option<&chrono::NaiveDate>) -> String {
    value
        .map(|date| date.format("%d.%m.%Y").to_string())
        .unwrap_or_else(|| "-".to_string())
}

pub fn format_file_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut exponent = 0;
    let mut scaled = bytes;
    while scaled >= 1024 && exponent < SIZE_UNITS.len() - 1 {
        scaled /= 1024;
        exponent += 1;
    }
    let value = bytes as f64 / 1024_f64.powi(exponent as i32);
    let formatted = format!("{value:.2}");
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed} {}", SIZE_UNITS[exponent])
}

/// Lowercased extension after the last dot; empty for dot-files and names without one.
pub fn file_extension(file_name: &str) -> String {
    match file_name.rfind('.') {
        Some(0) | None => String::new(),
        Some(index) => file_name[index + 1..].to_lowercase(),
    }
}

pub fn is_valid_excel_file(file_name: &str) -> bool {
    EXCEL_EXTENSIONS.contains(&file_extension(file_name).as_str())
}

pub fn text_preview(text: &str) -> String {
    if text.is_empty() {
        return "Kein Text".to_string();
    }
    if text.chars().count() <= PREVIEW_LENGTH {
        return text.to_string();
    }
    let mut preview: String = text.chars().take(PREVIEW_LENGTH).collect();
    preview.push_str("...");
    preview
}

/// Case and diacritic folding used by every search box.
pub fn normalize_search_text(text: &str) -> String {
    fold(text).trim().to_string()
}

fn fold(text: &str) -> String {
    text.to_lowercase()
        .replace('ß', "ss")
        .nfd()
        .filter(|c| !('\u{0300}'..='\u{036f}').contains(c))
        .collect()
}

/// Integer prefix the way `parseInt` reads it: optional sign, then digits.
pub fn parse_leading_int(value: &str) -> Option<i64> {
    let trimmed = value.trim_start();
    let (sign, rest) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse::<i64>().ok().map(|n| n * sign)
}

/// German collation with numeric runs compared by value.
///
/// Primary strength ignores case and accents (`ß` sorts as `ss`); ties fall
/// back to accents, then lowercase before uppercase.
pub fn locale_compare(a: &str, b: &str) -> Ordering {
    let folded_a: Vec<char> = fold(a).chars().collect();
    let folded_b: Vec<char> = fold(b).chars().collect();
    natural_cmp(&folded_a, &folded_b)
        .then_with(|| a.to_lowercase().cmp(&b.to_lowercase()))
        .then_with(|| b.cmp(a))
}

fn natural_cmp(a: &[char], b: &[char]) -> Ordering {
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i].is_ascii_digit() && b[j].is_ascii_digit() {
            let start_a = i;
            while i < a.len() && a[i].is_ascii_digit() {
                i += 1;
            }
            let start_b = j;
            while j < b.len() && b[j].is_ascii_digit() {
                j += 1;
            }
            let ordering = compare_digit_runs(&a[start_a..i], &b[start_b..j]);
            if ordering != Ordering::Equal {
                return ordering;
            }
            continue;
        }
        let ordering = char_class(a[i])
            .cmp(&char_class(b[j]))
            .then_with(|| a[i].cmp(&b[j]));
        if ordering != Ordering::Equal {
            return ordering;
        }
        i += 1;
        j += 1;
    }
    (a.len() - i).cmp(&(b.len() - j))
}

fn compare_digit_runs(a: &[char], b: &[char]) -> Ordering {
    let strip = |run: &[char]| -> Vec<char> {
        let first = run.iter().position(|c| *c != '0').unwrap_or(run.len());
        run[first..].to_vec()
    };
    let (sa, sb) = (strip(a), strip(b));
    sa.len()
        .cmp(&sb.len())
        .then_with(|| sa.cmp(&sb))
        .then_with(|| a.len().cmp(&b.len()))
}

fn char_class(c: char) -> u8 {
    if c.is_ascii_digit() {
        1
    } else if c.is_alphabetic() {
        2
    } else {
        0
    }
}

/// Trailing-edge coalescing of repeated calls; only the last call within the delay runs.
#[derive(Clone)]
pub struct Debouncer {
    delay: Duration,
    generation: Arc<AtomicU64>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn call<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let ticket = self.generation.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            action();
            return;
        };
        let generation = Arc::clone(&self.generation);
        let delay = self.delay;
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if generation.load(AtomicOrdering::SeqCst) == ticket {
                action();
            }
        });
    }

    pub fn cancel(&self) {
        self.generation.fetch_add(1, AtomicOrdering::SeqCst);
    }
}
