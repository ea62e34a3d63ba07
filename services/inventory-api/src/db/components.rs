//! Postgres-backed component store.
//!
//! One row per (machine, component name); the pair is unique at the schema
//! level. Rows are never deleted, only flipped inactive.

use async_trait::async_trait;
use fleetsync_id::{ComponentId, MachineId};
use fleetsync_reconcile::{Component, ComponentStore, ComponentTx, Insert, StoreError, Update};
use sqlx::{
    postgres::{PgPool, PgRow},
    Postgres, Row, Transaction,
};
use tracing::instrument;

use super::DbError;

struct ComponentRow {
    component_id: String,
    machine_id: String,
    name: String,
    component_type: String,
    description: Option<String>,
    active: bool,
}

impl<'r> sqlx::FromRow<'r, PgRow> for ComponentRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            component_id: row.try_get("component_id")?,
            machine_id: row.try_get("machine_id")?,
            name: row.try_get("name")?,
            component_type: row.try_get("component_type")?,
            description: row.try_get("description")?,
            active: row.try_get("active")?,
        })
    }
}

impl TryFrom<ComponentRow> for Component {
    type Error = DbError;

    fn try_from(row: ComponentRow) -> Result<Self, Self::Error> {
        let corrupt = |e: fleetsync_id::IdError| DbError::CorruptRow {
            table: "components",
            message: e.to_string(),
        };
        Ok(Self {
            id: row.component_id.parse().map_err(corrupt)?,
            machine_id: row.machine_id.parse().map_err(corrupt)?,
            name: row.name,
            kind: row.component_type,
            description: row.description,
            active: row.active,
        })
    }
}

fn query_error(err: sqlx::Error) -> StoreError {
    DbError::Query(err).into()
}

/// Component store over a Postgres pool.
#[derive(Clone)]
pub struct PgComponentStore {
    pool: PgPool,
}

impl PgComponentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// All rows of a machine, oldest first.
    pub async fn list(&self, machine_id: MachineId) -> Result<Vec<Component>, DbError> {
        let rows = sqlx::query_as::<_, ComponentRow>(
            r#"
            SELECT component_id, machine_id, name, component_type, description, active
            FROM components
            WHERE machine_id = $1
            ORDER BY created_at, component_id
            "#,
        )
        .bind(machine_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Query)?;

        rows.into_iter().map(Component::try_from).collect()
    }
}

#[async_trait]
impl ComponentStore for PgComponentStore {
    type Tx = PgComponentTx;

    #[instrument(skip_all, fields(machine_id = %machine_id))]
    async fn load_components(&self, machine_id: MachineId) -> Result<Vec<Component>, StoreError> {
        self.list(machine_id).await.map_err(StoreError::from)
    }

    async fn begin(&self) -> Result<PgComponentTx, StoreError> {
        let tx = self.pool.begin().await.map_err(query_error)?;
        Ok(PgComponentTx { tx })
    }
}

/// A reconciliation transaction. Dropping it without commit rolls back.
pub struct PgComponentTx {
    tx: Transaction<'static, Postgres>,
}

impl PgComponentTx {
    fn expect_one(affected: u64, id: ComponentId) -> Result<(), StoreError> {
        if affected == 1 {
            Ok(())
        } else {
            Err(StoreError::rejected(format!(
                "component {id} matched {affected} rows"
            )))
        }
    }
}

#[async_trait]
impl ComponentTx for PgComponentTx {
    async fn insert_component(
        &mut self,
        machine_id: MachineId,
        insert: &Insert,
    ) -> Result<ComponentId, StoreError> {
        let id = ComponentId::new();

        sqlx::query(
            r#"
            INSERT INTO components
                (component_id, machine_id, name, component_type, description, active)
            VALUES ($1, $2, $3, $4, $5, TRUE)
            "#,
        )
        .bind(id.to_string())
        .bind(machine_id.to_string())
        .bind(&insert.name)
        .bind(&insert.kind)
        .bind(insert.description.as_deref())
        .execute(&mut *self.tx)
        .await
        .map_err(query_error)?;

        Ok(id)
    }

    async fn update_component(
        &mut self,
        machine_id: MachineId,
        update: &Update,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE components
            SET component_type = $3, description = $4, active = TRUE, updated_at = now()
            WHERE component_id = $1 AND machine_id = $2
            "#,
        )
        .bind(update.id.to_string())
        .bind(machine_id.to_string())
        .bind(&update.kind)
        .bind(update.description.as_deref())
        .execute(&mut *self.tx)
        .await
        .map_err(query_error)?;

        Self::expect_one(result.rows_affected(), update.id)
    }

    async fn deactivate_component(
        &mut self,
        machine_id: MachineId,
        id: ComponentId,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE components
            SET active = FALSE, updated_at = now()
            WHERE component_id = $1 AND machine_id = $2
            "#,
        )
        .bind(id.to_string())
        .bind(machine_id.to_string())
        .execute(&mut *self.tx)
        .await
        .map_err(query_error)?;

        Self::expect_one(result.rows_affected(), id)
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(query_error)
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(query_error)
    }
}
