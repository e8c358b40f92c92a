//! Data models for the telemetry ingestion pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::IngestError;

/// Device type given to devices registered by their first reading.
pub const AUTO_REGISTERED_DEVICE_TYPE: &str = "auto_registered";

// ---

/// Raw reading as published by a device.
///
/// Sensors a unit does not carry are left out of the payload or sent as
/// `null`, so every numeric field defaults to zero. Any `device_id` the device sends is ignored;
/// the resolved internal id is authoritative.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RawReading {
    // ---
    pub serial_number: String,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub temperature: f64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub humidity: f64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub nitrogen: f64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub phosphorous: f64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub potassium: f64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub ph: f64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub soil_moisture: f64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub soil_temperature: f64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub soil_humidity: f64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub longitude: f64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub latitude: f64,
    /// Capture time. Devices without a clock omit it.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Sensor value that may be absent or `null` on the wire.
fn null_as_zero<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(0.0))
}

/// A reading bound to its resolved device, as stored in `device_data`.
#[derive(Debug, Clone, Serialize, PartialEq, sqlx::FromRow)]
pub struct Reading {
    // ---
    /// Row id; zero until persisted.
    pub id: i64,
    pub device_id: i64,
    pub serial_number: String,
    pub temperature: f64,
    pub humidity: f64,
    pub nitrogen: f64,
    pub phosphorous: f64,
    pub potassium: f64,
    pub ph: f64,
    pub soil_moisture: f64,
    pub soil_temperature: f64,
    pub soil_humidity: f64,
    pub longitude: f64,
    pub latitude: f64,
    pub captured_at: DateTime<Utc>,
}

/// A registered device.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, sqlx::FromRow)]
pub struct Device {
    // ---
    pub id: i64,
    pub device_type: String,
    pub serial_number: String,
    /// Owning user; `None` while the device is unclaimed.
    pub user_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert form of [`Device`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDevice {
    // ---
    pub device_type: String,
    pub serial_number: String,
    pub user_id: Option<i64>,
}

impl RawReading {
    // ---
    /// Decode a JSON payload and check the fields the pipeline depends on.
    pub fn decode(payload: &[u8]) -> Result<Self, IngestError> {
        // ---
        let raw: RawReading = serde_json::from_slice(payload)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.serial_number.trim().is_empty() {
            return Err(IngestError::Invalid("serial_number is empty".into()));
        }
        Ok(())
    }

    /// Bind this reading to a resolved device id.
    ///
    /// `received_at` stands in for the capture time when the device sent none.
    pub fn into_reading(self, device_id: i64, received_at: DateTime<Utc>) -> Reading {
        // ---
        Reading {
            id: 0,
            device_id,
            serial_number: self.serial_number,
            temperature: self.temperature,
            humidity: self.humidity,
            nitrogen: self.nitrogen,
            phosphorous: self.phosphorous,
            potassium: self.potassium,
            ph: self.ph,
            soil_moisture: self.soil_moisture,
            soil_temperature: self.soil_temperature,
            soil_humidity: self.soil_humidity,
            longitude: self.longitude,
            latitude: self.latitude,
            captured_at: self.created_at.unwrap_or(received_at),
        }
    }
}

impl NewDevice {
    /// An unclaimed device registered from its first reading.
    pub fn auto_registered(serial_number: &str) -> Self {
        NewDevice {
            device_type: AUTO_REGISTERED_DEVICE_TYPE.to_string(),
            serial_number: serial_number.to_string(),
            user_id: None,
        }
    }
}

impl Device {
    pub fn is_claimed(&self) -> bool {
        self.user_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    fn create_test_payload(serial: &str) -> String {
        // ---
        format!(
            r#"{{
                "serial_number": "{serial}",
                "temperature": 21.5,
                "humidity": 40.0,
                "nitrogen": 12.0,
                "phosphorous": 7.0,
                "potassium": 9.0,
                "ph": 6.5,
                "soil_moisture": 15.0,
                "soil_temperature": 18.0,
                "soil_humidity": 33.0,
                "longitude": 36.82,
                "latitude": -1.29,
                "created_at": "2025-03-26T18:45:00Z"
            }}"#
        )
    }

    #[test]
    fn test_decode_full_payload() {
        // ---
        let raw = RawReading::decode(create_test_payload("SN-1").as_bytes()).unwrap();

        assert_eq!(raw.serial_number, "SN-1");
        assert_eq!(raw.soil_moisture, 15.0);
        assert_eq!(raw.ph, 6.5);
        assert_eq!(
            raw.created_at,
            Some(Utc.with_ymd_and_hms(2025, 3, 26, 18, 45, 0).unwrap())
        );
    }

    #[test]
    fn test_missing_sensors_default_to_zero() {
        // ---
        let raw = RawReading::decode(br#"{"serial_number":"SN-2","temperature":3.0}"#).unwrap();

        assert_eq!(raw.temperature, 3.0);
        assert_eq!(raw.nitrogen, 0.0);
        assert_eq!(raw.latitude, 0.0);
        assert!(raw.created_at.is_none());
    }

    #[test]
    fn test_null_sensors_default_to_zero() {
        // ---
        let raw = RawReading::decode(
            br#"{"serial_number":"SN-3","temperature":null,"humidity":61.5,"ph":null,"latitude":null,"created_at":null}"#,
        )
        .unwrap();

        assert_eq!(raw.temperature, 0.0);
        assert_eq!(raw.humidity, 61.5);
        assert_eq!(raw.ph, 0.0);
        assert_eq!(raw.latitude, 0.0);
        assert!(raw.created_at.is_none());
    }

    #[test]
    fn test_reject_bad_payloads() {
        // ---
        // Not JSON at all
        assert!(matches!(
            RawReading::decode(b"\x00\x01garbage"),
            Err(IngestError::Decode(_))
        ));

        // Missing serial number
        assert!(matches!(
            RawReading::decode(br#"{"temperature":1.0}"#),
            Err(IngestError::Decode(_))
        ));

        // Blank serial number
        assert!(matches!(
            RawReading::decode(br#"{"serial_number":"  "}"#),
            Err(IngestError::Invalid(_))
        ));
    }

    #[test]
    fn test_device_id_is_taken_from_resolution() {
        // ---
        // A device-claimed id in the payload is ignored by decoding.
        let raw =
            RawReading::decode(br#"{"serial_number":"SN-3","device_id":999,"ph":7.0}"#).unwrap();
        let received = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let reading = raw.into_reading(42, received);

        assert_eq!(reading.device_id, 42);
        assert_eq!(reading.serial_number, "SN-3");
        assert_eq!(reading.captured_at, received);
        assert_eq!(reading.id, 0);
    }

    #[test]
    fn test_auto_registered_device_is_unclaimed() {
        // ---
        let new_device = NewDevice::auto_registered("SN-4");

        assert_eq!(new_device.device_type, AUTO_REGISTERED_DEVICE_TYPE);
        assert_eq!(new_device.serial_number, "SN-4");
        assert!(new_device.user_id.is_none());
    }
}
