use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A reservation extracted from one OTA notification email.
///
/// Only `booking_number` is mandatory; every other field is best-effort and
/// stays empty, `None` or `0.0` when the email does not carry it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    /// Assigned by the ID generator right before persistence.
    pub id: i64,
    pub booking_number: String,
    pub guest_name: String,
    pub guest_email: String,
    pub guest_phone: String,
    pub check_in: Option<NaiveDateTime>,
    pub check_out: Option<NaiveDateTime>,
    pub room_type: String,
    pub room_count: Option<u32>,
    /// Free-form descriptor such as "2 adults, 1 child".
    pub guests: String,
    pub booked_on: Option<NaiveDateTime>,
    pub source: String,
    pub total_net_price: f64,
    pub total_sell_price: f64,
    pub promotion: String,
    pub meal_plan: String,
    pub preferences: String,
    pub conditions: String,
}

impl Booking {
    pub fn has_booking_number(&self) -> bool {
        !self.booking_number.trim().is_empty()
    }
}
