//! Device identity repository (singleton row)

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::models::{DeviceIdentity, DeviceType};
use crate::util::{from_millis, to_millis};

/// Trait for device identity storage
pub trait DeviceRepository {
    /// Load the identity, if one was ever created
    fn load(&self) -> Result<Option<DeviceIdentity>>;

    /// Create or replace the identity
    fn save(&self, identity: &DeviceIdentity) -> Result<()>;

    /// Record a fully successful sync round
    fn record_sync(&self, sync_token: &str, at: DateTime<Utc>) -> Result<()>;

    /// Forget the sync cursor so the next round pulls everything
    fn reset_sync(&self) -> Result<()>;
}

/// `SQLite` implementation of `DeviceRepository`
pub struct SqliteDeviceRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteDeviceRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl DeviceRepository for SqliteDeviceRepository<'_> {
    fn load(&self) -> Result<Option<DeviceIdentity>> {
        let identity = self
            .conn
            .query_row(
                "SELECT device_id, name, device_type, registered, created_at, last_sync_at,
                    sync_token
                 FROM device_identity WHERE singleton = 1",
                [],
                |row| {
                    let device_type: String = row.get(2)?;
                    Ok(DeviceIdentity {
                        device_id: row.get(0)?,
                        name: row.get(1)?,
                        device_type: device_type.parse::<DeviceType>().map_err(|error| {
                            rusqlite::Error::FromSqlConversionFailure(
                                2,
                                Type::Text,
                                Box::new(error),
                            )
                        })?,
                        registered: row.get(3)?,
                        created_at: from_millis(row.get(4)?),
                        last_sync_at: row.get::<_, Option<i64>>(5)?.map(from_millis),
                        sync_token: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(identity)
    }

    fn save(&self, identity: &DeviceIdentity) -> Result<()> {
        self.conn.execute(
            "INSERT INTO device_identity (singleton, device_id, name, device_type, registered,
                created_at, last_sync_at, sync_token)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (singleton) DO UPDATE SET
                device_id = excluded.device_id,
                name = excluded.name,
                device_type = excluded.device_type,
                registered = excluded.registered,
                created_at = excluded.created_at,
                last_sync_at = excluded.last_sync_at,
                sync_token = excluded.sync_token",
            params![
                identity.device_id,
                identity.name,
                identity.device_type.as_str(),
                identity.registered,
                to_millis(&identity.created_at),
                identity.last_sync_at.as_ref().map(to_millis),
                identity.sync_token,
            ],
        )?;
        Ok(())
    }

    fn record_sync(&self, sync_token: &str, at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE device_identity SET sync_token = ?1, last_sync_at = ?2 WHERE singleton = 1",
            params![sync_token, to_millis(&at)],
        )?;
        Ok(())
    }

    fn reset_sync(&self) -> Result<()> {
        self.conn.execute(
            "UPDATE device_identity SET sync_token = NULL, last_sync_at = NULL WHERE singleton = 1",
            [],
        )?;
        Ok(())
    }
}
