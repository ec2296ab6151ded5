//! Field-level parsers for the vendor's booking notification.
//!
//! None of these fail: a malformed value degrades to an empty string, `None`
//! or `0.0` so a partially broken email still yields a best-effort booking.

use chrono::{NaiveDate, NaiveDateTime};

/// Date-time layouts tried in order once the leading weekday is removed.
/// "Monday, January 5, 2026 from 14:00" / "Tuesday, January 6, 2026 until 12:00"
const DATE_TIME_LAYOUTS: [&str; 2] = ["%B %d, %Y from %H:%M", "%B %d, %Y until %H:%M"];
/// "Monday, January 5, 2026"
const DATE_LAYOUT: &str = "%B %d, %Y";

/// Guest details pulled out of the multi-line "Guest:" block.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GuestDetails {
    pub name: String,
    pub email: String,
    pub phone: String,
}

pub fn compact_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parses a European-formatted amount ("1.234,56 €") into a number.
pub fn parse_price(raw: &str) -> f64 {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .collect();
    let normalized = kept.replace('.', "").replace(',', ".");

    normalized.parse::<f64>().unwrap_or(0.0)
}

/// Parses the vendor's long date format, with an optional "from"/"until" time.
pub fn parse_booking_date(raw: &str) -> Option<NaiveDateTime> {
    let text = compact_whitespace(raw);
    let text = strip_weekday(&text);

    for layout in DATE_TIME_LAYOUTS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, layout) {
            return Some(parsed);
        }
    }

    NaiveDate::parse_from_str(text, DATE_LAYOUT)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

fn strip_weekday(text: &str) -> &str {
    match text.split_once(',') {
        Some((weekday, rest)) if !weekday.is_empty() && weekday.chars().all(char::is_alphabetic) => {
            rest.trim_start()
        }
        _ => text,
    }
}

/// Splits "2 Deluxe Suite" into a room count and a room type.
pub fn parse_room_line(raw: &str) -> (Option<u32>, String) {
    let line = compact_whitespace(raw);
    let (head, rest) = line.split_once(' ').unwrap_or((line.as_str(), ""));

    match head.parse::<u32>() {
        Ok(count) => (Some(count), rest.to_string()),
        Err(_) => (None, line.clone()),
    }
}

pub fn looks_like_phone(line: &str) -> bool {
    line.chars().any(|c| c.is_ascii_digit()) && (line.contains('+') || line.chars().count() > 6)
}

/// Classifies the lines of the guest block. The first line of each kind wins.
pub fn parse_guest_lines<S: AsRef<str>>(lines: &[S]) -> GuestDetails {
    let mut guest = GuestDetails::default();

    for line in lines {
        let line = line.as_ref().trim();
        if line.is_empty() {
            continue;
        }

        if line.contains('@') {
            if guest.email.is_empty() {
                guest.email = line.to_string();
            }
        } else if looks_like_phone(line) {
            if guest.phone.is_empty() {
                guest.phone = line.to_string();
            }
        } else if guest.name.is_empty() {
            guest.name = line.to_string();
        }
    }

    guest
}
