//! PostgreSQL implementation of [`DeviceStore`].

use async_trait::async_trait;
use sqlx::PgPool;

use super::DeviceStore;
use crate::error::StoreError;
use crate::models::{Device, NewDevice, Reading};

// ---

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeviceStore for PgStore {
    // ---
    async fn find_device_by_serial(&self, serial: &str) -> Result<Option<Device>, StoreError> {
        // ---
        let device = sqlx::query_as::<_, Device>(
            r#"
            SELECT id, device_type, serial_number, user_id, created_at, updated_at
            FROM devices
            WHERE serial_number = $1
            "#,
        )
        .bind(serial)
        .fetch_optional(&self.pool)
        .await?;

        Ok(device)
    }

    async fn create_device(&self, device: &NewDevice) -> Result<(), StoreError> {
        // ---
        let result = sqlx::query(
            r#"
            INSERT INTO devices (device_type, serial_number, user_id)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(&device.device_type)
        .bind(&device.serial_number)
        .bind(device.user_id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::DuplicateSerial(device.serial_number.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn append_reading(&self, reading: &Reading) -> Result<Reading, StoreError> {
        // ---
        let stored = sqlx::query_as::<_, Reading>(
            r#"
            INSERT INTO device_data (
                device_id, serial_number,
                temperature, humidity, nitrogen, phosphorous, potassium, ph,
                soil_moisture, soil_temperature, soil_humidity,
                longitude, latitude, captured_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING
                id, device_id, serial_number,
                temperature, humidity, nitrogen, phosphorous, potassium, ph,
                soil_moisture, soil_temperature, soil_humidity,
                longitude, latitude, captured_at
            "#,
        )
        .bind(reading.device_id)
        .bind(&reading.serial_number)
        .bind(reading.temperature)
        .bind(reading.humidity)
        .bind(reading.nitrogen)
        .bind(reading.phosphorous)
        .bind(reading.potassium)
        .bind(reading.ph)
        .bind(reading.soil_moisture)
        .bind(reading.soil_temperature)
        .bind(reading.soil_humidity)
        .bind(reading.longitude)
        .bind(reading.latitude)
        .bind(reading.captured_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(stored)
    }
}
