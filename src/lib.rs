// Library exports for the booking-ingest crate
// This allows tests and the binary to use the modules

pub mod backoff;
pub mod config;
pub mod database;
pub mod id_generator;
pub mod imap_client;
pub mod persistence;

// Mailbox seams: sessions, fetch-and-filter
pub mod email;

// Booking notification extraction and processing
pub mod booking;

// Idle/reconnect loop and worker lifecycle
pub mod ingest;
