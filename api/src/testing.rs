//! In-process [`Store`] doubles for handler tests.

use crate::db::Store;
use crate::errors::{Error, Result};
use crate::model::{Device, NewReading, NewUser, Reading, User};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    devices: Vec<Device>,
    readings: Vec<Reading>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl Tables {
    /// Strictly increasing timestamps, like `now()` across separate transactions.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_timestamp {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_timestamp = Some(ts);
        ts
    }
}

/// Mirrors the schema's constraints: unique external ids and device ownership.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap()
    }
}

fn rejected(message: &str) -> Error {
    Error::Database(sqlx::Error::Protocol(message.to_string()))
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, user: NewUser) -> Result<User> {
        let mut tables = self.tables();
        if tables.users.iter().any(|u| u.external_id == user.user_id) {
            return Err(rejected(
                "duplicate key value violates unique constraint \"users_external_id_key\"",
            ));
        }

        let created_at = tables.next_timestamp();
        let user = User {
            id: Uuid::new_v4(),
            external_id: user.user_id,
            display_name: user.display_name,
            picture_url: user.picture_url,
            created_at,
        };
        tables.users.push(user.clone());
        Ok(user)
    }

    async fn find_user_id(&self, external_id: &str) -> Result<Option<Uuid>> {
        Ok(self
            .tables()
            .users
            .iter()
            .find(|u| u.external_id == external_id)
            .map(|u| u.id))
    }

    async fn insert_device(&self, user_id: Uuid, name: String) -> Result<Device> {
        let mut tables = self.tables();
        if !tables.users.iter().any(|u| u.id == user_id) {
            return Err(rejected(
                "insert or update on table \"devices\" violates foreign key constraint",
            ));
        }

        let created_at = tables.next_timestamp();
        let device = Device {
            id: Uuid::new_v4(),
            user_id,
            name,
            created_at,
        };
        tables.devices.push(device.clone());
        Ok(device)
    }

    async fn list_devices(&self, user_id: Uuid) -> Result<Vec<Device>> {
        Ok(self
            .tables()
            .devices
            .iter()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn insert_reading(&self, device_id: &str, reading: NewReading) -> Result<Reading> {
        let mut tables = self.tables();
        let created_at = tables.next_timestamp();
        let reading = Reading {
            id: tables.readings.len() as i64 + 1,
            device_id: device_id.to_string(),
            temperature: reading.temperature,
            humidity: reading.humidity,
            created_at,
        };
        tables.readings.push(reading.clone());
        Ok(reading)
    }

    async fn recent_readings(&self, device_id: &str, limit: i64) -> Result<Vec<Reading>> {
        let mut readings: Vec<Reading> = self
            .tables()
            .readings
            .iter()
            .filter(|r| r.device_id == device_id)
            .cloned()
            .collect();
        readings.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        readings.truncate(limit.max(0) as usize);
        Ok(readings)
    }
}

/// Every call fails as if the database were unreachable.
pub struct FailingStore;

fn unavailable<T>() -> Result<T> {
    Err(Error::Database(sqlx::Error::PoolTimedOut))
}

#[async_trait]
impl Store for FailingStore {
    async fn insert_user(&self, _user: NewUser) -> Result<User> {
        unavailable()
    }

    async fn find_user_id(&self, _external_id: &str) -> Result<Option<Uuid>> {
        unavailable()
    }

    async fn insert_device(&self, _user_id: Uuid, _name: String) -> Result<Device> {
        unavailable()
    }

    async fn list_devices(&self, _user_id: Uuid) -> Result<Vec<Device>> {
        unavailable()
    }

    async fn insert_reading(&self, _device_id: &str, _reading: NewReading) -> Result<Reading> {
        unavailable()
    }

    async fn recent_readings(&self, _device_id: &str, _limit: i64) -> Result<Vec<Reading>> {
        unavailable()
    }
}
