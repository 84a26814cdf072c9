//! SQLite-based persistence store

use crate::core::{
    Node, NodeId, NodeStatus, Relationship, Run, RunId, RunStatus, Step, StepConfig, StepId,
    StepStatus,
};
use crate::persistence::PersistenceBackend;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::HashSet;
use std::path::Path;
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS runs (
        id TEXT PRIMARY KEY,
        status TEXT NOT NULL,
        config TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS steps (
        id TEXT PRIMARY KEY,
        run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
        position INTEGER NOT NULL,
        config TEXT NOT NULL,
        status TEXT NOT NULL,
        errored_seq INTEGER,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS nodes (
        id TEXT PRIMARY KEY,
        parent_node_id TEXT,
        value TEXT NOT NULL,
        ablated INTEGER NOT NULL DEFAULT 0,
        ancestors TEXT NOT NULL,
        node_metadata TEXT NOT NULL,
        status TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS step_nodes (
        step_id TEXT NOT NULL REFERENCES steps(id) ON DELETE CASCADE,
        node_id TEXT NOT NULL,
        relationship_type TEXT NOT NULL,
        position INTEGER NOT NULL,
        PRIMARY KEY (step_id, node_id, relationship_type)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_steps_run ON steps(run_id, position)",
    "CREATE INDEX IF NOT EXISTS idx_steps_status ON steps(status)",
    "CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(parent_node_id)",
];

const STEP_COLUMNS: &str = "id, run_id, position, config, status, updated_at";
const NODE_COLUMNS: &str = "id, parent_node_id, value, ablated, ancestors, node_metadata, status";

/// SQLite store for runs, steps and nodes
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Private in-memory database; a single connection keeps it alive
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Convert DateTime<Utc> to NaiveDateTime for SQLite
    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    /// Convert NaiveDateTime to DateTime<Utc>
    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn parse_id(row: &SqliteRow, column: &str) -> Result<Uuid> {
        let raw: String = row.try_get(column)?;
        Uuid::parse_str(&raw).with_context(|| format!("Corrupt id in column {}", column))
    }

    fn run_from_row(row: &SqliteRow) -> Result<Run> {
        let status: String = row.try_get("status")?;
        Ok(Run {
            id: Self::parse_id(row, "id")?,
            status: RunStatus::parse(&status)
                .with_context(|| format!("Unknown run status '{}'", status))?,
            config: row.try_get("config")?,
            created_at: Self::from_naive(row.try_get("created_at")?),
            updated_at: Self::from_naive(row.try_get("updated_at")?),
        })
    }

    fn step_from_row(row: &SqliteRow) -> Result<Step> {
        let status: String = row.try_get("status")?;
        let config: String = row.try_get("config")?;
        Ok(Step {
            id: Self::parse_id(row, "id")?,
            run_id: Self::parse_id(row, "run_id")?,
            position: row.try_get::<i64, _>("position")? as usize,
            config: serde_json::from_str::<StepConfig>(&config)
                .context("Stored step config is unreadable")?,
            status: StepStatus::parse(&status)
                .with_context(|| format!("Unknown step status '{}'", status))?,
            updated_at: Self::from_naive(row.try_get("updated_at")?),
        })
    }

    fn node_from_row(row: &SqliteRow) -> Result<Node> {
        let status: String = row.try_get("status")?;
        let parent: Option<String> = row.try_get("parent_node_id")?;
        let ancestors: String = row.try_get("ancestors")?;
        let metadata: String = row.try_get("node_metadata")?;
        Ok(Node {
            id: Self::parse_id(row, "id")?,
            parent_node_id: parent.map(|p| Uuid::parse_str(&p)).transpose()?,
            value: row.try_get("value")?,
            ablated: row.try_get::<i64, _>("ablated")? != 0,
            ancestors: serde_json::from_str(&ancestors)?,
            node_metadata: serde_json::from_str(&metadata)?,
            status: NodeStatus::parse(&status)
                .with_context(|| format!("Unknown node status '{}'", status))?,
        })
    }

    async fn upsert_node(conn: &mut SqliteConnection, node: &Node) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO nodes (id, parent_node_id, value, ablated, ancestors, node_metadata, status)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                parent_node_id = excluded.parent_node_id,
                value = excluded.value,
                ablated = excluded.ablated,
                ancestors = excluded.ancestors,
                node_metadata = excluded.node_metadata,
                status = excluded.status
            "#,
        )
        .bind(node.id.to_string())
        .bind(node.parent_node_id.map(|p| p.to_string()))
        .bind(&node.value)
        .bind(node.ablated as i64)
        .bind(serde_json::to_string(&node.ancestors)?)
        .bind(serde_json::to_string(&node.node_metadata)?)
        .bind(node.status.as_str())
        .execute(&mut *conn)
        .await
        .context("Failed to save node")?;
        Ok(())
    }

    async fn insert_links(
        conn: &mut SqliteConnection,
        step_id: StepId,
        relationship: Relationship,
        node_ids: &[NodeId],
    ) -> Result<()> {
        for node_id in node_ids {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO step_nodes (step_id, node_id, relationship_type, position)
                VALUES (?1, ?2, ?3, (
                    SELECT COALESCE(MAX(position), -1) + 1 FROM step_nodes
                    WHERE step_id = ?1 AND relationship_type = ?3
                ))
                "#,
            )
            .bind(step_id.to_string())
            .bind(node_id.to_string())
            .bind(relationship.as_str())
            .execute(&mut *conn)
            .await
            .context("Failed to link node")?;
        }
        Ok(())
    }

    async fn set_step_status(
        conn: &mut SqliteConnection,
        step_id: StepId,
        status: StepStatus,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE steps SET
                status = ?2,
                updated_at = ?3,
                errored_seq = CASE
                    WHEN ?2 = 'errored' THEN (SELECT COALESCE(MAX(errored_seq), 0) + 1 FROM steps)
                    ELSE errored_seq
                END
            WHERE id = ?1
            "#,
        )
        .bind(step_id.to_string())
        .bind(status.as_str())
        .bind(Self::to_naive(Utc::now()))
        .execute(&mut *conn)
        .await
        .context("Failed to update step status")?;

        if result.rows_affected() == 0 {
            anyhow::bail!("Step {} does not exist", step_id);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for SqliteStore {
    async fn create_run(&self, run: &Run, steps: &[Step]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO runs (id, status, config, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(run.id.to_string())
        .bind(run.status.as_str())
        .bind(&run.config)
        .bind(Self::to_naive(run.created_at))
        .bind(Self::to_naive(run.updated_at))
        .execute(&mut *tx)
        .await
        .context("Failed to create run")?;

        for step in steps {
            sqlx::query(
                r#"
                INSERT INTO steps (id, run_id, position, config, status, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(step.id.to_string())
            .bind(step.run_id.to_string())
            .bind(step.position as i64)
            .bind(serde_json::to_string(&step.config)?)
            .bind(step.status.as_str())
            .bind(Self::to_naive(step.updated_at))
            .execute(&mut *tx)
            .await
            .context("Failed to create step")?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load_run(&self, run_id: RunId) -> Result<Option<Run>> {
        let row = sqlx::query(
            "SELECT id, status, config, created_at, updated_at FROM runs WHERE id = ?1",
        )
        .bind(run_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load run")?;

        row.as_ref().map(Self::run_from_row).transpose()
    }

    async fn list_runs(&self, limit: usize) -> Result<Vec<Run>> {
        let rows = sqlx::query(
            r#"
            SELECT id, status, config, created_at, updated_at
            FROM runs
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list runs")?;

        rows.iter().map(Self::run_from_row).collect()
    }

    async fn update_run_status(&self, run_id: RunId, status: RunStatus) -> Result<()> {
        let result = sqlx::query("UPDATE runs SET status = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(run_id.to_string())
            .bind(status.as_str())
            .bind(Self::to_naive(Utc::now()))
            .execute(&self.pool)
            .await
            .context("Failed to update run status")?;

        if result.rows_affected() == 0 {
            anyhow::bail!("Run {} does not exist", run_id);
        }
        Ok(())
    }

    async fn load_step(&self, step_id: StepId) -> Result<Option<Step>> {
        let row = sqlx::query(&format!("SELECT {} FROM steps WHERE id = ?1", STEP_COLUMNS))
            .bind(step_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load step")?;

        row.as_ref().map(Self::step_from_row).transpose()
    }

    async fn list_steps(&self, run_id: RunId) -> Result<Vec<Step>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM steps WHERE run_id = ?1 ORDER BY position ASC",
            STEP_COLUMNS
        ))
        .bind(run_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list steps")?;

        rows.iter().map(Self::step_from_row).collect()
    }

    async fn update_step_status(&self, step_id: StepId, status: StepStatus) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        Self::set_step_status(&mut *conn, step_id, status).await
    }

    async fn last_errored_step(&self) -> Result<Option<Step>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM steps
            WHERE status = 'errored'
            ORDER BY errored_seq DESC
            LIMIT 1
            "#,
            STEP_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await
        .context("Failed to find last errored step")?;

        row.as_ref().map(Self::step_from_row).transpose()
    }

    async fn save_nodes(&self, nodes: &[Node]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for node in nodes {
            Self::upsert_node(&mut *tx, node).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn load_nodes(&self, ids: &[NodeId]) -> Result<Vec<Node>> {
        let query = format!("SELECT {} FROM nodes WHERE id = ?1", NODE_COLUMNS);
        let mut nodes = Vec::with_capacity(ids.len());
        for id in ids {
            let row = sqlx::query(&query)
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .context("Failed to load node")?;
            if let Some(row) = row {
                nodes.push(Self::node_from_row(&row)?);
            }
        }
        Ok(nodes)
    }

    async fn link_nodes(
        &self,
        step_id: StepId,
        relationship: Relationship,
        node_ids: &[NodeId],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::insert_links(&mut *tx, step_id, relationship, node_ids).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn linked_node_ids(
        &self,
        step_id: StepId,
        relationship: Relationship,
    ) -> Result<Vec<NodeId>> {
        let rows = sqlx::query(
            r#"
            SELECT node_id FROM step_nodes
            WHERE step_id = ?1 AND relationship_type = ?2
            ORDER BY position ASC
            "#,
        )
        .bind(step_id.to_string())
        .bind(relationship.as_str())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list step links")?;

        rows.iter().map(|row| Self::parse_id(row, "node_id")).collect()
    }

    async fn nodes_with_children(&self, ids: &[NodeId]) -> Result<HashSet<NodeId>> {
        let mut treated = HashSet::new();
        for id in ids {
            let row = sqlx::query("SELECT 1 FROM nodes WHERE parent_node_id = ?1 LIMIT 1")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .context("Failed to look up derived nodes")?;
            if row.is_some() {
                treated.insert(*id);
            }
        }
        Ok(treated)
    }

    async fn children_of(&self, parent_id: NodeId) -> Result<Vec<Node>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM nodes WHERE parent_node_id = ?1 ORDER BY rowid ASC",
            NODE_COLUMNS
        ))
        .bind(parent_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to load derived nodes")?;

        rows.iter().map(Self::node_from_row).collect()
    }

    async fn begin_step(&self, step_id: StepId, inputs: &[Node]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::set_step_status(&mut *tx, step_id, StepStatus::Running).await?;
        for node in inputs {
            Self::upsert_node(&mut *tx, node).await?;
        }
        let ids: Vec<NodeId> = inputs.iter().map(|n| n.id).collect();
        Self::insert_links(&mut *tx, step_id, Relationship::Input, &ids).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_node_result(
        &self,
        step_id: StepId,
        input: &Node,
        outputs: &[Node],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::upsert_node(&mut *tx, input).await?;
        for node in outputs {
            Self::upsert_node(&mut *tx, node).await?;
        }
        let ids: Vec<NodeId> = outputs.iter().map(|n| n.id).collect();
        Self::insert_links(&mut *tx, step_id, Relationship::Output, &ids).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn complete_step(&self, step_id: StepId, outputs: &[Node]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for node in outputs {
            Self::upsert_node(&mut *tx, node).await?;
        }
        let ids: Vec<NodeId> = outputs.iter().map(|n| n.id).collect();
        Self::insert_links(&mut *tx, step_id, Relationship::Output, &ids).await?;
        Self::set_step_status(&mut *tx, step_id, StepStatus::Processed).await?;
        tx.commit().await?;
        Ok(())
    }
}
