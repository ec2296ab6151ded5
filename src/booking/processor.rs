use std::sync::Arc;

use log::{info, debug, warn, error};

use crate::email::{FetchedMessage, ProcessingResult};
use crate::persistence::{BookingRepository, IdGenerator, StoreOutcome};
use super::extractor::{BookingExtractor, ExtractionError};
use super::model::Booking;

/// Turns fetched booking notifications into stored bookings, one at a time.
/// Failures are logged and the booking is dropped; nothing here is retried.
pub struct BookingProcessor {
    extractor: BookingExtractor,
    ids: Arc<dyn IdGenerator>,
    repository: Option<Arc<dyn BookingRepository>>,
}

impl BookingProcessor {
    pub fn new(
        ids: Arc<dyn IdGenerator>,
        repository: Arc<dyn BookingRepository>,
    ) -> Result<Self, ExtractionError> {
        Ok(BookingProcessor {
            extractor: BookingExtractor::new()?,
            ids,
            repository: Some(repository),
        })
    }

    /// Extracts and assigns IDs but prints bookings instead of storing them.
    pub fn new_dry_run(ids: Arc<dyn IdGenerator>) -> Result<Self, ExtractionError> {
        info!("🧪 Booking processor in dry-run mode (no database)");

        Ok(BookingProcessor {
            extractor: BookingExtractor::new()?,
            ids,
            repository: None,
        })
    }

    pub fn is_dry_run(&self) -> bool {
        self.repository.is_none()
    }

    pub async fn process_batch(&self, messages: Vec<FetchedMessage>) -> ProcessingResult {
        let mut result = ProcessingResult::new();

        for message in &messages {
            self.process_message(message, &mut result).await;
        }

        if !messages.is_empty() {
            info!(
                "Batch processed: {} created, {} duplicate(s), {} extraction failure(s), {} persistence failure(s)",
                result.bookings_created,
                result.bookings_duplicated,
                result.extraction_failures,
                result.persistence_failures
            );
        }

        result
    }

    async fn process_message(&self, message: &FetchedMessage, result: &mut ProcessingResult) {
        debug!("Processing booking email {} ('{}')", message.sequence, message.subject);

        let mut booking = match self.extractor.extract(&message.body) {
            Ok(booking) => booking,
            Err(e) => {
                warn!(
                    "Skipping email {} ('{}'): {}",
                    message.sequence, message.subject, e
                );
                result.extraction_failures += 1;
                return;
            }
        };

        booking.id = match self.ids.next_id() {
            Ok(id) => id,
            Err(e) => {
                error!(
                    "❌ No ID for booking {} from email {} ('{}'): {:#}",
                    booking.booking_number, message.sequence, message.subject, e
                );
                result.persistence_failures += 1;
                return;
            }
        };

        let Some(repository) = &self.repository else {
            print_booking(&booking);
            result.bookings_created += 1;
            return;
        };

        match repository.create_booking(&booking).await {
            Ok(StoreOutcome::Created) => {
                info!("✅ Booking {} stored with id {}", booking.booking_number, booking.id);
                result.bookings_created += 1;
            }
            Ok(StoreOutcome::Duplicate) => {
                info!("Booking {} already stored, skipped", booking.booking_number);
                result.bookings_duplicated += 1;
            }
            Err(e) => {
                error!(
                    "❌ Failed to store booking {} from email {} ('{}'): {:#}",
                    booking.booking_number, message.sequence, message.subject, e
                );
                result.persistence_failures += 1;
            }
        }
    }
}

fn print_booking(booking: &Booking) {
    match serde_json::to_string_pretty(booking) {
        Ok(json) => {
            println!("🏨 Booking {} (id {}):", booking.booking_number, booking.id);
            println!("{}", json);
        }
        Err(e) => warn!("Unable to render booking {}: {}", booking.booking_number, e),
    }
}
