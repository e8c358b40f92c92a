//! Database schema management for `fieldeyes-ingest`.
//!
//! Ensures the tables the ingestion path writes to exist before the subscriber
//! starts. Applied once on startup from `main.rs` (EMBP: single gateway call).

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create or update the database schema (idempotent).
///
/// Creates the `devices` registry and the append-only `device_data` reading
/// log. Safe to call on every startup; no-op if objects already exist.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    // Device registry. The unique serial is what makes concurrent
    // auto-registration safe.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS devices (
            id            BIGSERIAL PRIMARY KEY,
            device_type   VARCHAR(100) NOT NULL,
            serial_number VARCHAR(100) NOT NULL UNIQUE,
            user_id       BIGINT,
            created_at    TIMESTAMPTZ  NOT NULL DEFAULT NOW(),
            updated_at    TIMESTAMPTZ  NOT NULL DEFAULT NOW()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Append-only reading log
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS device_data (
            id               BIGSERIAL PRIMARY KEY,
            device_id        BIGINT           NOT NULL REFERENCES devices (id),
            serial_number    VARCHAR(100)     NOT NULL,
            temperature      DOUBLE PRECISION NOT NULL,
            humidity         DOUBLE PRECISION NOT NULL,
            nitrogen         DOUBLE PRECISION NOT NULL,
            phosphorous      DOUBLE PRECISION NOT NULL,
            potassium        DOUBLE PRECISION NOT NULL,
            ph               DOUBLE PRECISION NOT NULL,
            soil_moisture    DOUBLE PRECISION NOT NULL,
            soil_temperature DOUBLE PRECISION NOT NULL,
            soil_humidity    DOUBLE PRECISION NOT NULL,
            longitude        DOUBLE PRECISION NOT NULL,
            latitude         DOUBLE PRECISION NOT NULL,
            captured_at      TIMESTAMPTZ      NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_device_data_device_id
            ON device_data (device_id);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_devices_user_id
            ON devices (user_id);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
