//! Store (spec §4.5).
//!
//! ACID-transactional persistence over SQLite via `sqlx`. The teacher repo
//! has no persistence layer of its own (an in-process arbitrage bot has
//! nothing to resume); this module is enriched from the pack's
//! `sqlx`-using manifests (e.g. `shanmukanaks-tee-otc`, `0xphen-Kaskade`)
//! since spec.md §4.5/§8 Property 6 (resumability) requires durable,
//! queryable state across restarts.
//!
//! U256/Address values are stored as decimal/hex strings — SQLite has no
//! native 256-bit integer type — and parsed back at the Store boundary so
//! callers never see raw strings.

use ethers::types::{Address, H256, U256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

use crate::error::StoreError;

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn u256_to_text(v: U256) -> String {
    v.to_string()
}

fn text_to_u256(s: &str) -> Result<U256, StoreError> {
    U256::from_dec_str(s).map_err(|e| StoreError::Sqlx(sqlx::Error::Decode(Box::new(e))))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Paused,
    Cancelled,
    Completed,
    Failed,
}

impl JobState {
    fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Paused => "paused",
            JobState::Cancelled => "cancelled",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "running" => JobState::Running,
            "paused" => JobState::Paused,
            "cancelled" => JobState::Cancelled,
            "completed" => JobState::Completed,
            "failed" => JobState::Failed,
            _ => JobState::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub title: String,
    pub mode: String,
    pub config_json: String,
    pub priority: i64,
    pub total: i64,
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: i64,
    pub title: String,
    pub mode: String,
    pub config_json: String,
    pub state: JobState,
    pub priority: i64,
    pub total: i64,
    pub done: i64,
    pub failed: i64,
    pub eta_secs: Option<i64>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub state: Option<JobState>,
    pub total: Option<i64>,
    pub done: Option<i64>,
    pub failed: Option<i64>,
    pub eta_secs: Option<Option<i64>>,
    pub started_at: Option<Option<i64>>,
    pub completed_at: Option<Option<i64>>,
    pub error_message: Option<Option<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Pending,
    Mined,
    Failed,
    Canceled,
}

impl TxStatus {
    fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Mined => "mined",
            TxStatus::Failed => "failed",
            TxStatus::Canceled => "canceled",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "mined" => TxStatus::Mined,
            "failed" => TxStatus::Failed,
            "canceled" => TxStatus::Canceled,
            _ => TxStatus::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewTxRecord {
    pub job_id: i64,
    pub kind: String,
    pub token_addr: Option<Address>,
    pub from: Address,
    pub to: Address,
    pub amount_wei: U256,
    pub gas_price_wei: U256,
    pub tx_hash: H256,
}

#[derive(Debug, Clone)]
pub struct TxRecord {
    pub id: i64,
    pub job_id: i64,
    pub ts: i64,
    pub kind: String,
    pub token_addr: Option<Address>,
    pub from: Address,
    pub to: Address,
    pub amount_wei: U256,
    pub gas_price_wei: U256,
    pub gas_used: Option<U256>,
    pub tx_hash: H256,
    pub status: TxStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RewardRecord {
    pub id: i64,
    pub address: Address,
    pub plex_amount_wei: U256,
    pub usdt_amount_wei: U256,
    pub source_tx_hash: Option<H256>,
    pub tx_hash: Option<H256>,
    pub created_at: i64,
    pub sent_flag: bool,
}

#[derive(Debug, Clone)]
pub struct DistributionMeta {
    pub name: String,
    pub token_addr: Address,
    pub token_symbol: String,
    pub amount_per_tx_wei: U256,
    pub total_addresses: i64,
    pub total_cycles: i64,
    pub interval_s: i64,
}

#[derive(Debug, Clone)]
pub struct DistributionItem {
    pub dist_id: i64,
    pub address: Address,
    pub cycle: i64,
}

#[derive(Debug, Clone)]
pub struct FoundTx {
    pub tx_hash: H256,
    pub block_number: i64,
    pub from: Address,
    pub to: Address,
    pub value_wei: U256,
    pub token_addr: Option<Address>,
    pub extra: Option<String>,
}

/// Durable, transactional store (spec §4.5).
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(path: &str) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
            .map_err(StoreError::Sqlx)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(opts)
            .await
            .map_err(StoreError::Sqlx)?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("store opened at {}", path);
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub async fn connect_in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(StoreError::Sqlx)?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn create_job(&self, spec: NewJob) -> Result<i64, StoreError> {
        let now = now_unix();
        let result = sqlx::query(
            "INSERT INTO jobs (title, mode, config, state, priority, total, done, failed, created_at)
             VALUES (?, ?, ?, 'pending', ?, ?, 0, 0, ?)",
        )
        .bind(&spec.title)
        .bind(&spec.mode)
        .bind(&spec.config_json)
        .bind(spec.priority)
        .bind(spec.total)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn update_job(&self, job_id: i64, patch: JobPatch) -> Result<(), StoreError> {
        let mut job = self
            .get_job(job_id)
            .await?
            .ok_or(StoreError::JobNotFound(job_id))?;

        if let Some(state) = patch.state {
            job.state = state;
        }
        if let Some(total) = patch.total {
            job.total = total;
        }
        if let Some(done) = patch.done {
            job.done = done;
        }
        if let Some(failed) = patch.failed {
            job.failed = failed;
        }
        if let Some(eta) = patch.eta_secs {
            job.eta_secs = eta;
        }
        if let Some(started) = patch.started_at {
            job.started_at = started;
        }
        if let Some(completed) = patch.completed_at {
            job.completed_at = completed;
        }
        if let Some(err) = patch.error_message {
            job.error_message = err;
        }

        sqlx::query(
            "UPDATE jobs SET state = ?, total = ?, done = ?, failed = ?, eta_secs = ?, started_at = ?,
             completed_at = ?, error_message = ? WHERE id = ?",
        )
        .bind(job.state.as_str())
        .bind(job.total)
        .bind(job.done)
        .bind(job.failed)
        .bind(job.eta_secs)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.error_message)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_job(&self, job_id: i64) -> Result<Option<JobRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT id, title, mode, config, state, priority, total, done, failed, eta_secs,
             created_at, started_at, completed_at, error_message FROM jobs WHERE id = ?",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_job))
    }

    pub async fn list_jobs(&self, state: Option<JobState>) -> Result<Vec<JobRecord>, StoreError> {
        let rows = match state {
            Some(s) => {
                sqlx::query(
                    "SELECT id, title, mode, config, state, priority, total, done, failed, eta_secs,
                     created_at, started_at, completed_at, error_message FROM jobs WHERE state = ?
                     ORDER BY priority ASC, created_at ASC",
                )
                .bind(s.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, title, mode, config, state, priority, total, done, failed, eta_secs,
                     created_at, started_at, completed_at, error_message FROM jobs
                     ORDER BY priority ASC, created_at ASC",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.into_iter().map(row_to_job).collect())
    }

    /// Appends a tx_history row. Unique on `tx_hash` (spec §3, §8 Property 4).
    pub async fn append_tx(&self, record: NewTxRecord) -> Result<i64, StoreError> {
        let now = now_unix();
        let tx_hash_hex = format!("{:?}", record.tx_hash);

        let result = sqlx::query(
            "INSERT INTO tx_history (job_id, ts, kind, token_addr, from_addr, to_addr,
             amount_wei, gas_price_wei, tx_hash, status)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending')",
        )
        .bind(record.job_id)
        .bind(now)
        .bind(&record.kind)
        .bind(record.token_addr.map(|a| format!("{:?}", a)))
        .bind(format!("{:?}", record.from))
        .bind(format!("{:?}", record.to))
        .bind(u256_to_text(record.amount_wei))
        .bind(u256_to_text(record.gas_price_wei))
        .bind(&tx_hash_hex)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::DuplicateTxHash(record.tx_hash)
            }
            _ => StoreError::Sqlx(e),
        })?;

        Ok(result.last_insert_rowid())
    }

    pub async fn set_tx_status(
        &self,
        tx_hash: H256,
        status: TxStatus,
        gas_used: Option<U256>,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE tx_history SET status = ?, gas_used = ?, error = ? WHERE tx_hash = ?")
            .bind(status.as_str())
            .bind(gas_used.map(u256_to_text))
            .bind(error)
            .bind(format!("{:?}", tx_hash))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Rows left `pending` when the process last stopped (spec §4.5, §8
    /// Property 6). Called at Store/Engine startup and by a periodic sweep.
    pub async fn reconcile_pending(&self) -> Result<Vec<TxRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, job_id, ts, kind, token_addr, from_addr, to_addr, amount_wei,
             gas_price_wei, gas_used, tx_hash, status, error FROM tx_history WHERE status = 'pending'",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_tx).collect()
    }

    pub async fn upsert_reward(
        &self,
        address: Address,
        plex_amount_wei: U256,
        usdt_amount_wei: U256,
        source_tx_hash: Option<H256>,
    ) -> Result<i64, StoreError> {
        let now = now_unix();
        let result = sqlx::query(
            "INSERT INTO rewards (address, plex_amount_wei, usdt_amount_wei, source_tx_hash, created_at, sent_flag)
             VALUES (?, ?, ?, ?, ?, 0)",
        )
        .bind(format!("{:?}", address))
        .bind(u256_to_text(plex_amount_wei))
        .bind(u256_to_text(usdt_amount_wei))
        .bind(source_tx_hash.map(|h| format!("{:?}", h)))
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn mark_tx_rewarded(&self, source_tx_hash: H256) -> Result<(), StoreError> {
        sqlx::query("UPDATE rewards SET sent_flag = 1 WHERE source_tx_hash = ?")
            .bind(format!("{:?}", source_tx_hash))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_reward_sent(&self, reward_id: i64, tx_hash: H256) -> Result<(), StoreError> {
        sqlx::query("UPDATE rewards SET sent_flag = 1, tx_hash = ? WHERE id = ?")
            .bind(format!("{:?}", tx_hash))
            .bind(reward_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_unrewarded(&self, sender: Option<Address>) -> Result<Vec<RewardRecord>, StoreError> {
        let rows = match sender {
            Some(addr) => {
                sqlx::query(
                    "SELECT id, address, plex_amount_wei, usdt_amount_wei, source_tx_hash, tx_hash,
                     created_at, sent_flag FROM rewards WHERE sent_flag = 0 AND address = ?
                     ORDER BY created_at ASC",
                )
                .bind(format!("{:?}", addr))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, address, plex_amount_wei, usdt_amount_wei, source_tx_hash, tx_hash,
                     created_at, sent_flag FROM rewards WHERE sent_flag = 0 ORDER BY created_at ASC",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(row_to_reward).collect()
    }

    pub async fn create_distribution(&self, meta: DistributionMeta) -> Result<i64, StoreError> {
        let now = now_unix();
        let result = sqlx::query(
            "INSERT INTO mass_distributions (name, token_addr, token_symbol, amount_per_tx_wei,
             total_addresses, total_cycles, interval_s, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', ?)",
        )
        .bind(&meta.name)
        .bind(format!("{:?}", meta.token_addr))
        .bind(&meta.token_symbol)
        .bind(u256_to_text(meta.amount_per_tx_wei))
        .bind(meta.total_addresses)
        .bind(meta.total_cycles)
        .bind(meta.interval_s)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn append_distribution_item(&self, item: DistributionItem) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO mass_distribution_items (dist_id, address, cycle, status)
             VALUES (?, ?, ?, 'pending')",
        )
        .bind(item.dist_id)
        .bind(format!("{:?}", item.address))
        .bind(item.cycle)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn set_distribution_status(&self, dist_id: i64, status: &str) -> Result<(), StoreError> {
        let completed_at = if status == "completed" { Some(now_unix()) } else { None };
        sqlx::query("UPDATE mass_distributions SET status = ?, completed_at = COALESCE(?, completed_at) WHERE id = ?")
            .bind(status)
            .bind(completed_at)
            .bind(dist_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn found_tx_insert(&self, tx: FoundTx) -> Result<i64, StoreError> {
        let now = now_unix();
        let result = sqlx::query(
            "INSERT OR IGNORE INTO found_transactions (tx_hash, block_number, from_addr, to_addr,
             value_wei, token_addr, discovered_at, extra) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(format!("{:?}", tx.tx_hash))
        .bind(tx.block_number)
        .bind(format!("{:?}", tx.from))
        .bind(format!("{:?}", tx.to))
        .bind(u256_to_text(tx.value_wei))
        .bind(tx.token_addr.map(|a| format!("{:?}", a)))
        .bind(now)
        .bind(tx.extra)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn found_tx_query(&self, to_addr: Option<Address>) -> Result<Vec<FoundTx>, StoreError> {
        let rows = match to_addr {
            Some(addr) => {
                sqlx::query(
                    "SELECT tx_hash, block_number, from_addr, to_addr, value_wei, token_addr, extra
                     FROM found_transactions WHERE to_addr = ? ORDER BY block_number ASC",
                )
                .bind(format!("{:?}", addr))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT tx_hash, block_number, from_addr, to_addr, value_wei, token_addr, extra
                     FROM found_transactions ORDER BY block_number ASC",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(row_to_found_tx).collect()
    }
}

fn row_to_job(row: sqlx::sqlite::SqliteRow) -> JobRecord {
    JobRecord {
        id: row.get("id"),
        title: row.get("title"),
        mode: row.get("mode"),
        config_json: row.get("config"),
        state: JobState::parse(row.get::<String, _>("state").as_str()),
        priority: row.get("priority"),
        total: row.get("total"),
        done: row.get("done"),
        failed: row.get("failed"),
        eta_secs: row.get("eta_secs"),
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        error_message: row.get("error_message"),
    }
}

fn row_to_tx(row: sqlx::sqlite::SqliteRow) -> Result<TxRecord, StoreError> {
    Ok(TxRecord {
        id: row.get("id"),
        job_id: row.get("job_id"),
        ts: row.get("ts"),
        kind: row.get("kind"),
        token_addr: row
            .get::<Option<String>, _>("token_addr")
            .map(|s| s.parse())
            .transpose()
            .map_err(|_| StoreError::Sqlx(sqlx::Error::ColumnDecode {
                index: "token_addr".into(),
                source: "invalid address".into(),
            }))?,
        from: row
            .get::<String, _>("from_addr")
            .parse()
            .map_err(|_| StoreError::Sqlx(sqlx::Error::ColumnDecode {
                index: "from_addr".into(),
                source: "invalid address".into(),
            }))?,
        to: row
            .get::<String, _>("to_addr")
            .parse()
            .map_err(|_| StoreError::Sqlx(sqlx::Error::ColumnDecode {
                index: "to_addr".into(),
                source: "invalid address".into(),
            }))?,
        amount_wei: text_to_u256(&row.get::<String, _>("amount_wei"))?,
        gas_price_wei: text_to_u256(&row.get::<String, _>("gas_price_wei"))?,
        gas_used: row
            .get::<Option<String>, _>("gas_used")
            .map(|s| text_to_u256(&s))
            .transpose()?,
        tx_hash: row
            .get::<String, _>("tx_hash")
            .parse()
            .map_err(|_| StoreError::Sqlx(sqlx::Error::ColumnDecode {
                index: "tx_hash".into(),
                source: "invalid hash".into(),
            }))?,
        status: TxStatus::parse(row.get::<String, _>("status").as_str()),
        error: row.get("error"),
    })
}

fn row_to_reward(row: sqlx::sqlite::SqliteRow) -> Result<RewardRecord, StoreError> {
    Ok(RewardRecord {
        id: row.get("id"),
        address: row
            .get::<String, _>("address")
            .parse()
            .map_err(|_| StoreError::Sqlx(sqlx::Error::ColumnDecode {
                index: "address".into(),
                source: "invalid address".into(),
            }))?,
        plex_amount_wei: text_to_u256(&row.get::<String, _>("plex_amount_wei"))?,
        usdt_amount_wei: text_to_u256(&row.get::<String, _>("usdt_amount_wei"))?,
        source_tx_hash: row
            .get::<Option<String>, _>("source_tx_hash")
            .map(|s| s.parse())
            .transpose()
            .map_err(|_| StoreError::Sqlx(sqlx::Error::ColumnDecode {
                index: "source_tx_hash".into(),
                source: "invalid hash".into(),
            }))?,
        tx_hash: row
            .get::<Option<String>, _>("tx_hash")
            .map(|s| s.parse())
            .transpose()
            .map_err(|_| StoreError::Sqlx(sqlx::Error::ColumnDecode {
                index: "tx_hash".into(),
                source: "invalid hash".into(),
            }))?,
        created_at: row.get("created_at"),
        sent_flag: row.get::<i64, _>("sent_flag") != 0,
    })
}

fn row_to_found_tx(row: sqlx::sqlite::SqliteRow) -> Result<FoundTx, StoreError> {
    Ok(FoundTx {
        tx_hash: row
            .get::<String, _>("tx_hash")
            .parse()
            .map_err(|_| StoreError::Sqlx(sqlx::Error::ColumnDecode {
                index: "tx_hash".into(),
                source: "invalid hash".into(),
            }))?,
        block_number: row.get("block_number"),
        from: row
            .get::<String, _>("from_addr")
            .parse()
            .map_err(|_| StoreError::Sqlx(sqlx::Error::ColumnDecode {
                index: "from_addr".into(),
                source: "invalid address".into(),
            }))?,
        to: row
            .get::<String, _>("to_addr")
            .parse()
            .map_err(|_| StoreError::Sqlx(sqlx::Error::ColumnDecode {
                index: "to_addr".into(),
                source: "invalid address".into(),
            }))?,
        value_wei: text_to_u256(&row.get::<String, _>("value_wei"))?,
        token_addr: row
            .get::<Option<String>, _>("token_addr")
            .map(|s| s.parse())
            .transpose()
            .map_err(|_| StoreError::Sqlx(sqlx::Error::ColumnDecode {
                index: "token_addr".into(),
                source: "invalid address".into(),
            }))?,
        extra: row.get("extra"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_fetch_job_roundtrips() {
        let store = Store::connect_in_memory().await.unwrap();
        let job_id = store
            .create_job(NewJob {
                title: "distribute PLEX".into(),
                mode: "distribution".into(),
                config_json: "{}".into(),
                priority: 5,
                total: 3,
            })
            .await
            .unwrap();

        let job = store.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.title, "distribute PLEX");
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.total, 3);
    }

    #[tokio::test]
    async fn duplicate_tx_hash_is_rejected() {
        let store = Store::connect_in_memory().await.unwrap();
        let job_id = store
            .create_job(NewJob {
                title: "t".into(),
                mode: "distribution".into(),
                config_json: "{}".into(),
                priority: 1,
                total: 1,
            })
            .await
            .unwrap();

        let hash = H256::random();
        let new_tx = NewTxRecord {
            job_id,
            kind: "erc20_transfer".into(),
            token_addr: None,
            from: Address::zero(),
            to: Address::zero(),
            amount_wei: U256::one(),
            gas_price_wei: U256::one(),
            tx_hash: hash,
        };
        store.append_tx(new_tx.clone()).await.unwrap();
        let result = store.append_tx(new_tx).await;
        assert!(matches!(result, Err(StoreError::DuplicateTxHash(_))));
    }

    #[tokio::test]
    async fn reconcile_pending_returns_unfinalized_rows() {
        let store = Store::connect_in_memory().await.unwrap();
        let job_id = store
            .create_job(NewJob {
                title: "t".into(),
                mode: "distribution".into(),
                config_json: "{}".into(),
                priority: 1,
                total: 1,
            })
            .await
            .unwrap();

        let hash = H256::random();
        store
            .append_tx(NewTxRecord {
                job_id,
                kind: "native_transfer".into(),
                token_addr: None,
                from: Address::zero(),
                to: Address::zero(),
                amount_wei: U256::one(),
                gas_price_wei: U256::one(),
                tx_hash: hash,
            })
            .await
            .unwrap();

        let pending = store.reconcile_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].tx_hash, hash);
    }

    #[tokio::test]
    async fn connect_runs_migrations_against_a_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job-engine.db");
        let store = Store::connect(path.to_str().unwrap()).await.unwrap();

        let job_id = store
            .create_job(NewJob {
                title: "t".into(),
                mode: "rewards".into(),
                config_json: "{}".into(),
                priority: 1,
                total: 0,
            })
            .await
            .unwrap();

        drop(store);
        let reopened = Store::connect(path.to_str().unwrap()).await.unwrap();
        let job = reopened.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.title, "t");
    }
}
