//! Read-only access to the device provisioning database.
//!
//! One connection per load, closed before returning on every path.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use edgeprov_core::AgentConfig;
use edgeprov_core::db::{self, DatabaseError};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Connection;
use tracing::{debug, info, warn};

use crate::device::{DeviceRecord, Endpoint, parse_component_list};
use crate::identity::normalize_identifier;

/// Table holding one row per provisionable device.
pub const DEVICE_TABLE: &str = "device_config";
/// Optional table mapping hardware identifiers to `device_config.device_id`.
pub const IDENTIFIER_TABLE: &str = "device_identifiers";

/// Source of the device record for this run.
pub trait DeviceSource {
    fn load_device_record(&self) -> impl Future<Output = Result<DeviceRecord, DatabaseError>> + Send;
}

/// `SQLite`-backed [`DeviceSource`].
#[derive(Debug, Clone)]
pub struct DeviceConfigRepository {
    path: PathBuf,
    identifier: Option<String>,
    timeout: Duration,
}

impl DeviceConfigRepository {
    pub fn new(config: &AgentConfig, identifier: Option<String>) -> Self {
        Self {
            path: config.paths.database_path.clone(),
            identifier,
            timeout: config.database.timeout(),
        }
    }

    async fn load(&self) -> Result<DeviceRecord, DatabaseError> {
        let mut conn = db::open_read_only(&self.path).await?;
        let result = self.select(&mut conn).await;
        if let Err(e) = conn.close().await {
            warn!(error = %e, "Failed to close device database cleanly");
        }
        result
    }

    async fn select(&self, conn: &mut SqliteConnection) -> Result<DeviceRecord, DatabaseError> {
        if !db::table_exists(conn, DEVICE_TABLE).await? {
            return Err(DatabaseError::MissingTable(DEVICE_TABLE.into()));
        }

        if let Some(identifier) = self.identifier.as_deref() {
            if let Some(row) = row_for_identifier(conn, identifier).await? {
                info!(identifier, "Selected device record by hardware identifier");
                return record_from_row(&row);
            }
            debug!(identifier, "No device record matches hardware identifier");
        }

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM device_config")
            .fetch_one(&mut *conn)
            .await?;
        if count > 1 {
            info!(rows = count, "Multiple device records; selecting the lowest rowid");
        }

        let row = sqlx::query("SELECT * FROM device_config ORDER BY rowid ASC LIMIT 1")
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(DatabaseError::NoDevice)?;
        record_from_row(&row)
    }
}

impl DeviceSource for DeviceConfigRepository {
    async fn load_device_record(&self) -> Result<DeviceRecord, DatabaseError> {
        let record = tokio::time::timeout(self.timeout, self.load())
            .await
            .map_err(|_| DatabaseError::Timeout(self.timeout))??;
        info!(
            device_id = %record.device_id,
            thing_name = %record.thing_name,
            "Loaded device record"
        );
        Ok(record)
    }
}

async fn row_for_identifier(
    conn: &mut SqliteConnection,
    identifier: &str,
) -> Result<Option<SqliteRow>, DatabaseError> {
    if !db::table_exists(conn, IDENTIFIER_TABLE).await? {
        return Ok(None);
    }
    let device_id: Option<(String,)> = sqlx::query_as(
        "SELECT device_id FROM device_identifiers \
         WHERE REPLACE(LOWER(mac_address), ':', '') = ?1 OR serial_number = ?2 \
         ORDER BY rowid ASC LIMIT 1",
    )
    .bind(normalize_identifier(identifier))
    .bind(identifier)
    .fetch_optional(&mut *conn)
    .await?;

    let Some((device_id,)) = device_id else {
        return Ok(None);
    };
    let row = sqlx::query("SELECT * FROM device_config WHERE device_id = ? LIMIT 1")
        .bind(&device_id)
        .fetch_optional(&mut *conn)
        .await?;
    if row.is_none() {
        warn!(%device_id, "Identifier maps to a device_id with no device_config row");
    }
    Ok(row)
}

fn record_from_row(row: &SqliteRow) -> Result<DeviceRecord, DatabaseError> {
    let iot_endpoint: Endpoint = required_text(row, "iot_endpoint")?
        .parse()
        .map_err(DatabaseError::Malformed)?;

    let mqtt_port = match optional_int(row, "mqtt_port")? {
        None => None,
        Some(n) => Some(u16::try_from(n).ok().filter(|p| *p != 0).ok_or_else(|| {
            DatabaseError::Malformed(format!("mqtt_port {n} is not a valid port"))
        })?),
    };

    let record = DeviceRecord {
        device_id: required_text(row, "device_id")?,
        thing_name: required_text(row, "thing_name")?.trim().to_string(),
        iot_endpoint,
        aws_region: required_text(row, "aws_region")?,
        role_alias: optional_text(row, "role_alias")?.unwrap_or_default(),
        role_alias_endpoint: optional_text(row, "role_alias_endpoint")?,
        root_ca: optional_text(row, "root_ca_path")?,
        certificate_pem: optional_text(row, "certificate_pem")?,
        private_key_pem: optional_text(row, "private_key_pem")?,
        nucleus_version: optional_text(row, "nucleus_version")?,
        deployment_group: optional_text(row, "deployment_group")?,
        initial_components: optional_text(row, "initial_components")?
            .map(|raw| parse_component_list(&raw))
            .unwrap_or_default(),
        proxy_url: optional_text(row, "proxy_url")?,
        mqtt_port,
        created_at: optional_timestamp(row, "created_at")?,
    };
    record.validate().map_err(DatabaseError::Malformed)?;
    Ok(record)
}

fn required_text(row: &SqliteRow, column: &str) -> Result<String, DatabaseError> {
    match row.try_get::<Option<String>, _>(column) {
        Ok(Some(value)) => Ok(value),
        Ok(None) => Err(DatabaseError::Malformed(format!("column `{column}` is NULL"))),
        Err(sqlx::Error::ColumnNotFound(_)) => {
            Err(DatabaseError::Malformed(format!("missing column `{column}`")))
        }
        Err(e) => Err(DatabaseError::Malformed(format!("column `{column}`: {e}"))),
    }
}

/// Absent columns and blank values both read as `None`.
fn optional_text(row: &SqliteRow, column: &str) -> Result<Option<String>, DatabaseError> {
    match row.try_get::<Option<String>, _>(column) {
        Ok(value) => Ok(value.filter(|v| !v.trim().is_empty())),
        Err(sqlx::Error::ColumnNotFound(_)) => Ok(None),
        Err(e) => Err(DatabaseError::Malformed(format!("column `{column}`: {e}"))),
    }
}

fn optional_int(row: &SqliteRow, column: &str) -> Result<Option<i64>, DatabaseError> {
    match row.try_get::<Option<i64>, _>(column) {
        Ok(value) => Ok(value),
        Err(sqlx::Error::ColumnNotFound(_)) => Ok(None),
        // Stored as text by some provisioning pipelines.
        Err(_) => optional_text(row, column)?
            .map(|v| {
                v.trim().parse::<i64>().map_err(|_| {
                    DatabaseError::Malformed(format!("column `{column}` is not an integer: {v}"))
                })
            })
            .transpose(),
    }
}

/// Creation metadata is kept verbatim, whether stored as text or epoch seconds.
fn optional_timestamp(row: &SqliteRow, column: &str) -> Result<Option<String>, DatabaseError> {
    match row.try_get::<Option<String>, _>(column) {
        Ok(value) => Ok(value.filter(|v| !v.trim().is_empty())),
        Err(sqlx::Error::ColumnNotFound(_)) => Ok(None),
        Err(_) => Ok(optional_int(row, column)?.map(|n| n.to_string())),
    }
}
