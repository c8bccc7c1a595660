use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use uuid::Uuid;

use shared::domain::DoctorId;

pub const DOCTOR_ID_KEY: &str = "doctor_id";
pub const DOCTOR_NAME_KEY: &str = "doctor_name";
pub const DOCTOR_SPECIALIZATION_KEY: &str = "doctor_specialization";
pub const DOCTOR_DEPARTMENT_KEY: &str = "doctor_department";

const DOCTOR_SESSION_KEYS: [&str; 4] = [
    DOCTOR_ID_KEY,
    DOCTOR_NAME_KEY,
    DOCTOR_SPECIALIZATION_KEY,
    DOCTOR_DEPARTMENT_KEY,
];

/// Local key-value state of the client, backed by sqlite.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDoctorSession {
    pub doctor_id: DoctorId,
    pub name: String,
    pub specialization: Option<String>,
    pub department_name: Option<String>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every connection to `sqlite::memory:` opens its own database.
        let max_connections = if database_url.starts_with("sqlite::memory:") {
            1
        } else {
            5
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open client state database '{database_url}'"))?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Reads the signed-in doctor. A missing id or name means nobody is signed in.
    pub async fn load_doctor_session(&self) -> Result<Option<StoredDoctorSession>> {
        let rows = sqlx::query("SELECT key, value FROM client_kv WHERE key IN (?, ?, ?, ?)")
            .bind(DOCTOR_ID_KEY)
            .bind(DOCTOR_NAME_KEY)
            .bind(DOCTOR_SPECIALIZATION_KEY)
            .bind(DOCTOR_DEPARTMENT_KEY)
            .fetch_all(&self.pool)
            .await
            .context("failed to read doctor session")?;

        let mut doctor_id = None;
        let mut name = None;
        let mut specialization = None;
        let mut department_name = None;

        for row in rows {
            let key: String = row.try_get("key")?;
            let value: String = row.try_get("value")?;
            match key.as_str() {
                DOCTOR_ID_KEY => doctor_id = Some(value),
                DOCTOR_NAME_KEY => name = Some(value),
                DOCTOR_SPECIALIZATION_KEY => specialization = non_empty(value),
                DOCTOR_DEPARTMENT_KEY => department_name = non_empty(value),
                _ => {}
            }
        }

        let (Some(doctor_id), Some(name)) = (doctor_id, name) else {
            return Ok(None);
        };
        let doctor_id = Uuid::parse_str(&doctor_id)
            .map(DoctorId)
            .map_err(|err| anyhow!("stored doctor id '{doctor_id}' is not a uuid: {err}"))?;

        Ok(Some(StoredDoctorSession {
            doctor_id,
            name,
            specialization,
            department_name,
        }))
    }

    pub async fn save_doctor_session(
        &self,
        doctor_id: DoctorId,
        name: &str,
        specialization: Option<&str>,
        department_name: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let doctor_id = doctor_id.to_string();
        let entries = [
            (DOCTOR_ID_KEY, doctor_id.as_str()),
            (DOCTOR_NAME_KEY, name),
            (DOCTOR_SPECIALIZATION_KEY, specialization.unwrap_or_default()),
            (DOCTOR_DEPARTMENT_KEY, department_name.unwrap_or_default()),
        ];

        let mut tx = self.pool.begin().await?;
        for (key, value) in entries {
            sqlx::query(
                "INSERT INTO client_kv (key, value, updated_at) VALUES (?, ?, ?)
                 ON CONFLICT(key) DO UPDATE
                 SET value = excluded.value, updated_at = excluded.updated_at",
            )
            .bind(key)
            .bind(value)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to write doctor session key '{key}'"))?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn clear_doctor_session(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for key in DOCTOR_SESSION_KEYS {
            sqlx::query("DELETE FROM client_kv WHERE key = ?")
                .bind(key)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("failed to clear doctor session key '{key}'"))?;
        }
        tx.commit().await?;
        Ok(())
    }
}

fn non_empty(value: String) -> Option<String> {
    (!value.trim().is_empty()).then_some(value)
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
