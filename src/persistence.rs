//! Contracts of the booking store consumed by the ingestion worker.
//!
//! Both are owned by the CRUD side of the platform; the worker only calls
//! them, one booking at a time.

use anyhow::Result;
use async_trait::async_trait;

use crate::booking::Booking;

/// Source of globally unique booking identifiers.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> Result<i64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Created,
    /// A booking with the same booking number was already stored.
    Duplicate,
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn create_booking(&self, booking: &Booking) -> Result<StoreOutcome>;
}
