use log::debug;
use mail_parser::{MessageParser, PartType};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

use super::fields::{
    compact_whitespace, parse_booking_date, parse_guest_lines, parse_price, parse_room_line,
};
use super::model::Booking;

const BOOKING_NUMBER_LABEL: &str = "Booking number:";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("no HTML part in message")]
    NoHtmlPart,

    #[error("missing booking number")]
    MissingBookingNumber,

    #[error("invalid pattern: {0}")]
    InvalidPattern(String),
}

type FieldParser = fn(&mut Booking, ElementRef<'_>);

/// One label of the vendor's two-column layout and how to read its value.
pub struct FieldRule {
    pub label: &'static str,
    apply: FieldParser,
}

/// Labels are matched case-sensitively against the first column's text.
pub const FIELD_RULES: &[FieldRule] = &[
    FieldRule { label: "Guest:", apply: apply_guest },
    FieldRule { label: "Check-in:", apply: apply_check_in },
    FieldRule { label: "Check-out:", apply: apply_check_out },
    FieldRule { label: "Booked on:", apply: apply_booked_on },
    FieldRule { label: "Rooms booked:", apply: apply_rooms },
    FieldRule { label: "Booking source:", apply: apply_source },
    FieldRule { label: "Total net price:", apply: apply_net_price },
    FieldRule { label: "Total sell price:", apply: apply_sell_price },
    FieldRule { label: "Number of guests:", apply: apply_guests },
    FieldRule { label: "Promo name:", apply: apply_promotion },
    FieldRule { label: "Meal plan:", apply: apply_meal_plan },
    FieldRule { label: "Preferences:", apply: apply_preferences },
    FieldRule { label: "Booking conditions:", apply: apply_conditions },
];

fn apply_guest(booking: &mut Booking, value: ElementRef<'_>) {
    let guest = parse_guest_lines(&value_lines(value));
    booking.guest_name = guest.name;
    booking.guest_email = guest.email;
    booking.guest_phone = guest.phone;
}

fn apply_check_in(booking: &mut Booking, value: ElementRef<'_>) {
    booking.check_in = parse_booking_date(&text_content(value));
}

fn apply_check_out(booking: &mut Booking, value: ElementRef<'_>) {
    booking.check_out = parse_booking_date(&text_content(value));
}

fn apply_booked_on(booking: &mut Booking, value: ElementRef<'_>) {
    booking.booked_on = parse_booking_date(&text_content(value));
}

fn apply_rooms(booking: &mut Booking, value: ElementRef<'_>) {
    let (count, room_type) = parse_room_line(&text_content(value));
    booking.room_count = count;
    booking.room_type = room_type;
}

fn apply_source(booking: &mut Booking, value: ElementRef<'_>) {
    booking.source = text_content(value);
}

fn apply_net_price(booking: &mut Booking, value: ElementRef<'_>) {
    booking.total_net_price = parse_price(&text_content(value));
}

fn apply_sell_price(booking: &mut Booking, value: ElementRef<'_>) {
    booking.total_sell_price = parse_price(&text_content(value));
}

fn apply_guests(booking: &mut Booking, value: ElementRef<'_>) {
    booking.guests = text_content(value);
}

fn apply_promotion(booking: &mut Booking, value: ElementRef<'_>) {
    booking.promotion = text_content(value);
}

fn apply_meal_plan(booking: &mut Booking, value: ElementRef<'_>) {
    booking.meal_plan = text_content(value);
}

fn apply_preferences(booking: &mut Booking, value: ElementRef<'_>) {
    booking.preferences = value_lines(value).join("\n");
}

fn apply_conditions(booking: &mut Booking, value: ElementRef<'_>) {
    booking.conditions = value_lines(value).join("\n");
}

fn text_content(elem: ElementRef<'_>) -> String {
    compact_whitespace(&elem.text().collect::<Vec<_>>().join(" "))
}

/// Text nodes of an element split into trimmed, non-empty lines.
fn value_lines(elem: ElementRef<'_>) -> Vec<String> {
    elem.text()
        .flat_map(str::lines)
        .map(compact_whitespace)
        .filter(|line| !line.is_empty())
        .collect()
}

fn child_elements(elem: ElementRef<'_>) -> impl Iterator<Item = ElementRef<'_>> {
    elem.children().filter_map(ElementRef::wrap)
}

fn selector(css: &str) -> Result<Selector, ExtractionError> {
    Selector::parse(css).map_err(|_| ExtractionError::InvalidPattern(css.to_string()))
}

/// Turns the vendor's booking notification email into a [`Booking`].
pub struct BookingExtractor {
    cells: Selector,
    styled: Selector,
    flex_style: Regex,
}

impl BookingExtractor {
    pub fn new() -> Result<Self, ExtractionError> {
        let flex_style = Regex::new(r"(?i)display\s*:\s*(inline-)?flex")
            .map_err(|e| ExtractionError::InvalidPattern(e.to_string()))?;

        Ok(BookingExtractor {
            cells: selector("td")?,
            styled: selector("[style]")?,
            flex_style,
        })
    }

    /// Extracts a booking from a raw RFC 822 message (or a bare HTML document).
    pub fn extract(&self, raw: &[u8]) -> Result<Booking, ExtractionError> {
        let html = locate_html(raw)?;
        self.extract_from_html(&html)
    }

    pub fn extract_from_html(&self, html: &str) -> Result<Booking, ExtractionError> {
        let document = Html::parse_document(html);

        let mut booking = Booking {
            booking_number: self.find_booking_number(&document).unwrap_or_default(),
            ..Booking::default()
        };

        let mut matched = 0;
        for row in document.select(&self.styled) {
            if !self.is_flex_row(row) {
                continue;
            }

            let columns: Vec<ElementRef<'_>> = child_elements(row).collect();
            let [label_column, value_column, ..] = columns.as_slice() else {
                continue;
            };

            let label = text_content(*label_column);
            if let Some(rule) = FIELD_RULES.iter().find(|rule| rule.label == label) {
                (rule.apply)(&mut booking, *value_column);
                matched += 1;
            }
        }

        debug!(
            "Extracted booking '{}' ({} labelled field(s) matched)",
            booking.booking_number, matched
        );

        if !booking.has_booking_number() {
            return Err(ExtractionError::MissingBookingNumber);
        }

        Ok(booking)
    }

    fn is_flex_row(&self, elem: ElementRef<'_>) -> bool {
        elem.value()
            .attr("style")
            .map(|style| self.flex_style.is_match(style))
            .unwrap_or(false)
    }

    /// The number lives in the innermost cell holding the label, inside its
    /// trailing inline element ("Booking number: <strong>HTL-1001</strong>").
    fn find_booking_number(&self, document: &Html) -> Option<String> {
        let cell = document
            .select(&self.cells)
            .filter(|cell| cell.select(&self.cells).next().is_none())
            .find(|cell| text_content(*cell).contains(BOOKING_NUMBER_LABEL))?;

        let trailing = child_elements(cell)
            .last()
            .map(text_content)
            .filter(|text| !text.is_empty() && !text.contains(BOOKING_NUMBER_LABEL));

        let number = match trailing {
            Some(text) => text,
            None => text_content(cell)
                .split_once(BOOKING_NUMBER_LABEL)
                .map(|(_, after)| after.trim().to_string())
                .unwrap_or_default(),
        };

        if number.is_empty() {
            None
        } else {
            Some(number)
        }
    }
}

/// Returns the first `text/html` part of the message; plain-text parts are
/// ignored. A body that already is an HTML document is used as-is.
pub fn locate_html(raw: &[u8]) -> Result<String, ExtractionError> {
    if let Some(message) = MessageParser::default().parse(raw) {
        let html = message.parts.iter().find_map(|part| match &part.body {
            PartType::Html(html) => Some(html.to_string()),
            _ => None,
        });
        if let Some(html) = html {
            return Ok(html);
        }
    }

    let text = String::from_utf8_lossy(raw);
    if text.trim_start().starts_with('<') {
        return Ok(text.into_owned());
    }

    Err(ExtractionError::NoHtmlPart)
}

/// Convenience wrapper building a one-off extractor.
pub fn extract(raw: &[u8]) -> Result<Booking, ExtractionError> {
    BookingExtractor::new()?.extract(raw)
}
