use crate::config::Config;
use crate::errors::Result;
use crate::metrics::{DB_FAILURES_TOTAL, DB_LATENCY_SECONDS};
use crate::model::{Device, NewUser, NewReading, Reading, User};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

/// Number of readings returned by the recent-readings query
pub const RECENT_READINGS_LIMIT: i64 = 10;

/// Persistence operations backing the REST handlers
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_user(&self, user: NewUser) -> Result<User>;

    /// Internal id of the user with the given external identifier, if any.
    async fn find_user_id(&self, external_id: &str) -> Result<Option<Uuid>>;

    async fn insert_device(&self, user_id: Uuid, name: String) -> Result<Device>;

    async fn list_devices(&self, user_id: Uuid) -> Result<Vec<Device>>;

    async fn insert_reading(&self, device_id: &str, reading: NewReading) -> Result<Reading>;

    /// Most recent readings for a device, newest first.
    async fn recent_readings(&self, device_id: &str, limit: i64) -> Result<Vec<Reading>>;
}

pub async fn make_pool(config: &Config) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(config.connect_options()?)
        .await?;

    info!("Database connection established");
    if config.skip_migrations {
        info!("Skipping database migrations");
    } else {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Migrations completed");
    }

    Ok(pool)
}

const INSERT_USER: &str = r#"
    INSERT INTO users (external_id, display_name, picture_url)
    VALUES ($1, $2, $3)
    RETURNING id, external_id, display_name, picture_url, created_at
    "#;
const SELECT_USER_ID: &str = "SELECT id FROM users WHERE external_id = $1";
const INSERT_DEVICE: &str = r#"
    INSERT INTO devices (user_id, name)
    VALUES ($1, $2)
    RETURNING id, user_id, name, created_at
    "#;
const SELECT_DEVICES: &str = "SELECT id, user_id, name, created_at FROM devices WHERE user_id = $1";
const INSERT_READING: &str = r#"
    INSERT INTO device_data (device_id, temperature, humidity)
    VALUES ($1, $2, $3)
    RETURNING id, device_id, temperature, humidity, created_at
    "#;
const SELECT_RECENT_READINGS: &str = r#"
    SELECT id, device_id, temperature, humidity, created_at
    FROM device_data
    WHERE device_id = $1
    ORDER BY created_at DESC, id DESC
    LIMIT $2
    "#;

/// PostgreSQL-backed [`Store`]
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Runs one database call, recording its latency and failures.
async fn observe<T, F>(operation: &'static str, call: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let start = Instant::now();
    let result = call.await;
    DB_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());

    result.map_err(|e| {
        DB_FAILURES_TOTAL.inc();
        error!(operation, "Database call failed: {}", e);
        e.into()
    })
}

#[async_trait]
impl Store for PgStore {
    async fn insert_user(&self, user: NewUser) -> Result<User> {
        observe(
            "insert_user",
            sqlx::query_as::<_, User>(INSERT_USER)
                .bind(&user.user_id)
                .bind(&user.display_name)
                .bind(&user.picture_url)
                .fetch_one(&self.pool),
        )
        .await
    }

    async fn find_user_id(&self, external_id: &str) -> Result<Option<Uuid>> {
        observe(
            "find_user_id",
            sqlx::query_scalar::<_, Uuid>(SELECT_USER_ID)
                .bind(external_id)
                .fetch_optional(&self.pool),
        )
        .await
    }

    async fn insert_device(&self, user_id: Uuid, name: String) -> Result<Device> {
        observe(
            "insert_device",
            sqlx::query_as::<_, Device>(INSERT_DEVICE)
                .bind(user_id)
                .bind(&name)
                .fetch_one(&self.pool),
        )
        .await
    }

    async fn list_devices(&self, user_id: Uuid) -> Result<Vec<Device>> {
        observe(
            "list_devices",
            sqlx::query_as::<_, Device>(SELECT_DEVICES)
                .bind(user_id)
                .fetch_all(&self.pool),
        )
        .await
    }

    async fn insert_reading(&self, device_id: &str, reading: NewReading) -> Result<Reading> {
        observe(
            "insert_reading",
            sqlx::query_as::<_, Reading>(INSERT_READING)
                .bind(device_id)
                .bind(reading.temperature)
                .bind(reading.humidity)
                .fetch_one(&self.pool),
        )
        .await
    }

    async fn recent_readings(&self, device_id: &str, limit: i64) -> Result<Vec<Reading>> {
        observe(
            "recent_readings",
            sqlx::query_as::<_, Reading>(SELECT_RECENT_READINGS)
                .bind(device_id)
                .bind(limit)
                .fetch_all(&self.pool),
        )
        .await
    }
}
