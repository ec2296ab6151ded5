use anyhow::{Result, Context};
use async_trait::async_trait;
use log::{info, debug};
use sqlx::PgPool;

use crate::booking::Booking;
use crate::config::DatabaseConfig;
use crate::persistence::{BookingRepository, StoreOutcome};

pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to PostgreSQL database {}@{}:{}/{}",
              config.username, config.host, config.port, config.database);

        let database_url = format!(
            "postgres://{}:{}@{}:{}/{}",
            config.username, config.password, config.host, config.port, config.database
        );

        let pool = PgPool::connect(&database_url)
            .await
            .context("Unable to connect to the database")?;

        info!("Database connection established");

        let db = Database { pool };

        // Create tables if they don't exist
        db.create_tables_if_not_exists().await?;

        Ok(db)
    }

    async fn create_tables_if_not_exists(&self) -> Result<()> {
        info!("Checking/creating database tables");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bookings (
                id BIGINT PRIMARY KEY,
                booking_number VARCHAR(255) UNIQUE NOT NULL,
                guest_name TEXT NOT NULL DEFAULT '',
                guest_email TEXT NOT NULL DEFAULT '',
                guest_phone TEXT NOT NULL DEFAULT '',
                check_in TIMESTAMP,
                check_out TIMESTAMP,
                room_type TEXT NOT NULL DEFAULT '',
                room_count INTEGER,
                guests TEXT NOT NULL DEFAULT '',
                booked_on TIMESTAMP,
                source VARCHAR(255) NOT NULL DEFAULT '',
                total_net_price DOUBLE PRECISION NOT NULL DEFAULT 0,
                total_sell_price DOUBLE PRECISION NOT NULL DEFAULT 0,
                promotion TEXT NOT NULL DEFAULT '',
                meal_plan TEXT NOT NULL DEFAULT '',
                preferences TEXT NOT NULL DEFAULT '',
                conditions TEXT NOT NULL DEFAULT '',
                created_at TIMESTAMPTZ DEFAULT NOW()
            )
            "#
        )
        .execute(&self.pool)
        .await
        .context("Unable to create bookings table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_bookings_check_in ON bookings (check_in DESC)"
        )
        .execute(&self.pool)
        .await
        .context("Unable to create index on check_in")?;

        info!("Database tables checked/created successfully");
        Ok(())
    }

    /// Inserts a booking unless one with the same booking number exists.
    pub async fn save_booking(&self, booking: &Booking) -> Result<StoreOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO bookings
            (id, booking_number, guest_name, guest_email, guest_phone, check_in, check_out,
             room_type, room_count, guests, booked_on, source, total_net_price, total_sell_price,
             promotion, meal_plan, preferences, conditions)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (booking_number) DO NOTHING
            "#
        )
        .bind(booking.id)
        .bind(&booking.booking_number)
        .bind(&booking.guest_name)
        .bind(&booking.guest_email)
        .bind(&booking.guest_phone)
        .bind(booking.check_in)
        .bind(booking.check_out)
        .bind(&booking.room_type)
        .bind(room_count_column(booking.room_count))
        .bind(&booking.guests)
        .bind(booking.booked_on)
        .bind(&booking.source)
        .bind(booking.total_net_price)
        .bind(booking.total_sell_price)
        .bind(&booking.promotion)
        .bind(&booking.meal_plan)
        .bind(&booking.preferences)
        .bind(&booking.conditions)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Error inserting booking {}", booking.booking_number))?;

        if result.rows_affected() == 0 {
            debug!("Existing booking skipped: {}", booking.booking_number);
            return Ok(StoreOutcome::Duplicate);
        }

        debug!("Booking saved: {} (id {})", booking.booking_number, booking.id);
        Ok(StoreOutcome::Created)
    }

    pub async fn close(&self) -> Result<()> {
        info!("Closing database connection");
        self.pool.close().await;
        Ok(())
    }
}

/// `INTEGER` column; counts that do not fit are stored as NULL.
fn room_count_column(count: Option<u32>) -> Option<i32> {
    count.and_then(|count| i32::try_from(count).ok())
}

#[async_trait]
impl BookingRepository for Database {
    async fn create_booking(&self, booking: &Booking) -> Result<StoreOutcome> {
        self.save_booking(booking).await
    }
}
