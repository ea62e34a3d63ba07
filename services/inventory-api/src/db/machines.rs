//! Machine registration storage.
//!
//! A machine is identified by its hardware id within a tenant. Registering
//! the same (hardware id, tenant) twice returns the existing record.

use chrono::{DateTime, Utc};
use fleetsync_id::{MachineId, TenantId};
use serde::Serialize;
use sqlx::{
    postgres::{PgPool, PgRow},
    Row,
};
use tracing::{debug, instrument};

use super::DbError;

/// A registered machine.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineRecord {
    pub machine_id: MachineId,
    pub tenant_id: TenantId,
    pub hostname: String,
    pub mac_address: String,
    pub hardware_id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

struct MachineRow {
    machine_id: String,
    tenant_id: String,
    hostname: String,
    mac_address: String,
    hardware_id: String,
    status: String,
    created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for MachineRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            machine_id: row.try_get("machine_id")?,
            tenant_id: row.try_get("tenant_id")?,
            hostname: row.try_get("hostname")?,
            mac_address: row.try_get("mac_address")?,
            hardware_id: row.try_get("hardware_id")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<MachineRow> for MachineRecord {
    type Error = DbError;

    fn try_from(row: MachineRow) -> Result<Self, Self::Error> {
        let corrupt = |e: fleetsync_id::IdError| DbError::CorruptRow {
            table: "machines",
            message: e.to_string(),
        };
        Ok(Self {
            machine_id: row.machine_id.parse().map_err(corrupt)?,
            tenant_id: row.tenant_id.parse().map_err(corrupt)?,
            hostname: row.hostname,
            mac_address: row.mac_address,
            hardware_id: row.hardware_id,
            status: row.status,
            created_at: row.created_at,
        })
    }
}

/// Fields supplied by an agent registering its machine.
#[derive(Debug, Clone)]
pub struct NewMachine {
    pub tenant_id: TenantId,
    pub hostname: String,
    pub mac_address: String,
    pub hardware_id: String,
}

/// Outcome of a registration.
#[derive(Debug, Clone)]
pub enum Registration {
    Created(MachineRecord),
    Existing(MachineRecord),
}

impl Registration {
    pub fn record(&self) -> &MachineRecord {
        match self {
            Self::Created(record) | Self::Existing(record) => record,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

const MACHINE_COLUMNS: &str =
    "machine_id, tenant_id, hostname, mac_address, hardware_id, status, created_at";

/// Store for machine records.
#[derive(Clone)]
pub struct MachineStore {
    pool: PgPool,
}

impl MachineStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Register a machine, or return the one already registered under the
    /// same hardware id and tenant.
    #[instrument(skip_all, fields(tenant_id = %machine.tenant_id, hardware_id = %machine.hardware_id))]
    pub async fn register(&self, machine: &NewMachine) -> Result<Registration, DbError> {
        let inserted = sqlx::query_as::<_, MachineRow>(&format!(
            r#"
            INSERT INTO machines (machine_id, tenant_id, hostname, mac_address, hardware_id, status)
            VALUES ($1, $2, $3, $4, $5, 'active')
            ON CONFLICT (hardware_id, tenant_id) DO NOTHING
            RETURNING {MACHINE_COLUMNS}
            "#
        ))
        .bind(MachineId::new().to_string())
        .bind(machine.tenant_id.to_string())
        .bind(&machine.hostname)
        .bind(&machine.mac_address)
        .bind(&machine.hardware_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::Query)?;

        if let Some(row) = inserted {
            debug!("Machine registered");
            return Ok(Registration::Created(row.try_into()?));
        }

        debug!("Machine already registered");
        self.find_by_hardware_id(machine.tenant_id, &machine.hardware_id)
            .await?
            .map(Registration::Existing)
            .ok_or(DbError::Query(sqlx::Error::RowNotFound))
    }

    pub async fn find_by_hardware_id(
        &self,
        tenant_id: TenantId,
        hardware_id: &str,
    ) -> Result<Option<MachineRecord>, DbError> {
        let row = sqlx::query_as::<_, MachineRow>(&format!(
            "SELECT {MACHINE_COLUMNS} FROM machines WHERE hardware_id = $1 AND tenant_id = $2"
        ))
        .bind(hardware_id)
        .bind(tenant_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::Query)?;

        row.map(MachineRecord::try_from).transpose()
    }

    pub async fn get(&self, machine_id: MachineId) -> Result<Option<MachineRecord>, DbError> {
        let row = sqlx::query_as::<_, MachineRow>(&format!(
            "SELECT {MACHINE_COLUMNS} FROM machines WHERE machine_id = $1"
        ))
        .bind(machine_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::Query)?;

        row.map(MachineRecord::try_from).transpose()
    }
}
