/// Booking notification parsing and hand-off to the booking store
pub mod extractor;
pub mod fields;
pub mod model;
pub mod processor;

pub use extractor::{BookingExtractor, ExtractionError};
pub use model::Booking;
pub use processor::BookingProcessor;
