use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};

use common::{
    ChildOrder, ChildOrderSpec, ChildStatus, Error, OrderLedger, Result, RunRepository, RunState,
    StrategyKind, StrategyRun,
};

use super::{new_child, next_child, next_run};

/// Durable store backed by SQLite. Transitions are compare-and-set: the
/// UPDATE only applies if the row still holds the status that was read, and
/// a lost race is retried against the fresh row.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url` and run migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        info!(url, "Database ready");
        Ok(store)
    }

    /// Private in-memory database. A single connection, since every SQLite
    /// memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Other(format!("bad timestamp '{raw}': {e}")))
}

fn child_from_row(row: &SqliteRow) -> Result<ChildOrder> {
    let spec: ChildOrderSpec = serde_json::from_str(row.try_get("spec")?)?;
    let status: &str = row.try_get("status")?;
    Ok(ChildOrder {
        run_id: row.try_get("run_id")?,
        spec,
        client_order_id: row.try_get("client_order_id")?,
        status: ChildStatus::from_str(status).map_err(Error::Other)?,
        venue_order_id: row.try_get("venue_order_id")?,
        last_error: row.try_get("last_error")?,
        updated_at: parse_time(row.try_get("updated_at")?)?,
    })
}

fn run_from_row(row: &SqliteRow) -> Result<StrategyRun> {
    let kind: &str = row.try_get("kind")?;
    let state: &str = row.try_get("state")?;
    let completed_at: Option<&str> = row.try_get("completed_at")?;
    Ok(StrategyRun {
        run_id: row.try_get("run_id")?,
        kind: match kind {
            "TWAP" => StrategyKind::Twap,
            "GRID" => StrategyKind::Grid,
            other => return Err(Error::Other(format!("unknown strategy kind '{other}'"))),
        },
        params: serde_json::from_str(row.try_get("params")?)?,
        plan: serde_json::from_str(row.try_get("plan")?)?,
        state: RunState::from_str(state).map_err(Error::Other)?,
        failure_reason: row.try_get("failure_reason")?,
        created_at: parse_time(row.try_get("created_at")?)?,
        completed_at: completed_at.map(parse_time).transpose()?,
    })
}

#[async_trait]
impl OrderLedger for SqliteStore {
    async fn record(&self, run_id: &str, index: u32, spec: &ChildOrderSpec) -> Result<ChildOrder> {
        let child = new_child(run_id, &ChildOrderSpec { index, ..spec.clone() }, Utc::now());
        let inserted = sqlx::query(
            r#"
            INSERT INTO child_orders (run_id, idx, spec, client_order_id, status, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (run_id, idx) DO NOTHING
            "#,
        )
        .bind(run_id)
        .bind(index as i64)
        .bind(serde_json::to_string(&child.spec)?)
        .bind(&child.client_order_id)
        .bind(child.status.to_string())
        .bind(child.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(Error::DuplicateChildOrder {
                run_id: run_id.to_string(),
                index,
            });
        }
        Ok(child)
    }

    async fn update_status(
        &self,
        run_id: &str,
        index: u32,
        status: ChildStatus,
        venue_order_id: Option<&str>,
        error: Option<&str>,
    ) -> Result<ChildOrder> {
        loop {
            let current = self.get(run_id, index).await?;
            let next = next_child(&current, status, venue_order_id, error, Utc::now())?;

            let updated = sqlx::query(
                r#"
                UPDATE child_orders
                SET status = ?1, venue_order_id = ?2, last_error = ?3, updated_at = ?4
                WHERE run_id = ?5 AND idx = ?6 AND status = ?7
                "#,
            )
            .bind(next.status.to_string())
            .bind(&next.venue_order_id)
            .bind(&next.last_error)
            .bind(next.updated_at.to_rfc3339())
            .bind(run_id)
            .bind(index as i64)
            .bind(current.status.to_string())
            .execute(&self.pool)
            .await?;

            if updated.rows_affected() == 1 {
                return Ok(next);
            }
            debug!(run_id, index, "Lost ledger update race, re-reading slot");
        }
    }

    async fn get(&self, run_id: &str, index: u32) -> Result<ChildOrder> {
        let row = sqlx::query("SELECT * FROM child_orders WHERE run_id = ?1 AND idx = ?2")
            .bind(run_id)
            .bind(index as i64)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => child_from_row(&row),
            None => Err(Error::UnknownChildOrder {
                run_id: run_id.to_string(),
                index,
            }),
        }
    }

    async fn query(&self, run_id: &str) -> Result<Vec<ChildOrder>> {
        sqlx::query("SELECT * FROM child_orders WHERE run_id = ?1 ORDER BY idx")
            .bind(run_id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(child_from_row)
            .collect()
    }
}

#[async_trait]
impl RunRepository for SqliteStore {
    async fn insert_run(&self, run: &StrategyRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO strategy_runs
                (run_id, kind, symbol, params, plan, state, failure_reason, created_at, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&run.run_id)
        .bind(run.kind.to_string())
        .bind(run.symbol())
        .bind(serde_json::to_string(&run.params)?)
        .bind(serde_json::to_string(&run.plan)?)
        .bind(run.state.to_string())
        .bind(&run.failure_reason)
        .bind(run.created_at.to_rfc3339())
        .bind(run.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<StrategyRun> {
        let row = sqlx::query("SELECT * FROM strategy_runs WHERE run_id = ?1")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => run_from_row(&row),
            None => Err(Error::RunNotFound(run_id.to_string())),
        }
    }

    async fn list_runs(&self, state: Option<RunState>) -> Result<Vec<StrategyRun>> {
        let rows = match state {
            Some(state) => {
                sqlx::query(
                    "SELECT * FROM strategy_runs WHERE state = ?1 ORDER BY created_at, run_id",
                )
                .bind(state.to_string())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM strategy_runs ORDER BY created_at, run_id")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(run_from_row).collect()
    }

    async fn transition_run(
        &self,
        run_id: &str,
        to: RunState,
        reason: Option<&str>,
    ) -> Result<StrategyRun> {
        loop {
            let current = self.get_run(run_id).await?;
            let next = next_run(&current, to, reason, Utc::now())?;

            let updated = sqlx::query(
                r#"
                UPDATE strategy_runs
                SET state = ?1, failure_reason = ?2, completed_at = ?3
                WHERE run_id = ?4 AND state = ?5
                "#,
            )
            .bind(next.state.to_string())
            .bind(&next.failure_reason)
            .bind(next.completed_at.map(|t| t.to_rfc3339()))
            .bind(run_id)
            .bind(current.state.to_string())
            .execute(&self.pool)
            .await?;

            if updated.rows_affected() == 1 {
                return Ok(next);
            }
            debug!(run_id, "Lost run transition race, re-reading run");
        }
    }
}
