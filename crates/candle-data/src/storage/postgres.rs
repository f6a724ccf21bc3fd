//! PostgreSQL 저장소 구현.

use super::{validate_identifier, CandleStore, ProductStartStore, PRODUCTS_TABLE};
use crate::error::{DataError, Result};
use async_trait::async_trait;
use candle_core::{Candle, DatabaseConfig, ProductId, CANDLE_TABLE_PREFIX};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// 데이터베이스 연결 풀 래퍼.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 새로운 데이터베이스 연결 풀을 생성합니다.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| DataError::ConnectionError(e.to_string()))?;

        info!("Database connection established");

        Ok(Self { pool })
    }

    /// 기존 연결 풀에서 Database 인스턴스를 생성합니다.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 내부 연결 풀을 반환합니다.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 데이터베이스 상태를 확인합니다.
    pub async fn health_check(&self) -> Result<bool> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(true)
    }
}

/// 캔들 테이블 레코드.
#[derive(Debug, Clone, FromRow)]
struct CandleRecord {
    open_timestamp: DateTime<Utc>,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
}

impl From<CandleRecord> for Candle {
    fn from(r: CandleRecord) -> Self {
        Candle::new(r.open_timestamp, r.open, r.high, r.low, r.close, r.volume)
    }
}

/// PostgreSQL 캔들/상품 저장소.
#[derive(Clone)]
pub struct PgCandleStore {
    pool: PgPool,
}

impl PgCandleStore {
    /// 새 저장소 생성.
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

#[async_trait]
impl CandleStore for PgCandleStore {
    async fn ensure_template(&self) -> Result<()> {
        let template = validate_identifier(CANDLE_TABLE_PREFIX)?;
        let sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {template} (
                open_timestamp TIMESTAMPTZ PRIMARY KEY,
                open NUMERIC NOT NULL,
                high NUMERIC NOT NULL,
                low NUMERIC NOT NULL,
                close NUMERIC NOT NULL,
                volume NUMERIC NOT NULL CHECK (volume >= 0)
            )
            "#
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        debug!(table = template, "템플릿 테이블 확인");
        Ok(())
    }

    async fn has_table(&self, table: &str) -> Result<bool> {
        let table = validate_identifier(table)?;
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = current_schema() AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn create_like(&self, table: &str, template: &str) -> Result<()> {
        let table = validate_identifier(table)?;
        let template = validate_identifier(template)?;
        let sql = format!("CREATE TABLE IF NOT EXISTS {table} (LIKE {template} INCLUDING ALL)");
        sqlx::query(&sql).execute(&self.pool).await?;
        info!(table = table, template = template, "채널 테이블 생성");
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> Result<()> {
        let table = validate_identifier(table)?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
            .execute(&self.pool)
            .await?;
        info!(table = table, "테이블 삭제");
        Ok(())
    }

    #[instrument(skip(self, rows), fields(count = rows.len()))]
    async fn insert(&self, table: &str, rows: &[Candle]) -> Result<usize> {
        let table = validate_identifier(table)?;
        if rows.is_empty() {
            return Ok(0);
        }

        // 단일 문장이므로 충돌 시 배치 전체가 롤백됨
        let open_times: Vec<DateTime<Utc>> = rows.iter().map(|c| c.open_time).collect();
        let opens: Vec<Decimal> = rows.iter().map(|c| c.open).collect();
        let highs: Vec<Decimal> = rows.iter().map(|c| c.high).collect();
        let lows: Vec<Decimal> = rows.iter().map(|c| c.low).collect();
        let closes: Vec<Decimal> = rows.iter().map(|c| c.close).collect();
        let volumes: Vec<Decimal> = rows.iter().map(|c| c.volume).collect();

        let sql = format!(
            r#"
            INSERT INTO {table} (open_timestamp, open, high, low, close, volume)
            SELECT * FROM UNNEST(
                $1::timestamptz[], $2::numeric[], $3::numeric[],
                $4::numeric[], $5::numeric[], $6::numeric[]
            )
            "#
        );

        let result = sqlx::query(&sql)
            .bind(&open_times)
            .bind(&opens)
            .bind(&highs)
            .bind(&lows)
            .bind(&closes)
            .bind(&volumes)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() as usize)
    }

    #[instrument(skip(self))]
    async fn select_range(
        &self,
        table: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let table = validate_identifier(table)?;
        let sql = format!(
            r#"
            SELECT open_timestamp, open, high, low, close, volume
            FROM {table}
            WHERE open_timestamp BETWEEN $1 AND $2
            ORDER BY open_timestamp ASC
            "#
        );

        let records: Vec<CandleRecord> = sqlx::query_as(&sql)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;

        Ok(records.into_iter().map(Candle::from).collect())
    }

    async fn select_extreme(
        &self,
        table: &str,
        most_recent: bool,
    ) -> Result<Option<DateTime<Utc>>> {
        let table = validate_identifier(table)?;
        let order = if most_recent { "DESC" } else { "ASC" };
        let sql =
            format!("SELECT open_timestamp FROM {table} ORDER BY open_timestamp {order} LIMIT 1");

        let result: Option<(DateTime<Utc>,)> =
            sqlx::query_as(&sql).fetch_optional(&self.pool).await?;
        Ok(result.map(|(t,)| t))
    }

    async fn count(&self, table: &str) -> Result<u64> {
        let table = validate_identifier(table)?;
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl ProductStartStore for PgCandleStore {
    async fn ensure_products_table(&self) -> Result<()> {
        let sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {PRODUCTS_TABLE} (
                product_name VARCHAR(20) PRIMARY KEY,
                start_date TIMESTAMPTZ NOT NULL
            )
            "#
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn load_start(&self, product: &ProductId) -> Result<Option<DateTime<Utc>>> {
        let sql = format!("SELECT start_date FROM {PRODUCTS_TABLE} WHERE product_name = $1");
        let result: Option<(DateTime<Utc>,)> = sqlx::query_as(&sql)
            .bind(product.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(result.map(|(t,)| t))
    }

    async fn save_start(&self, product: &ProductId, start: DateTime<Utc>) -> Result<()> {
        let sql = format!(
            r#"
            INSERT INTO {PRODUCTS_TABLE} (product_name, start_date)
            VALUES ($1, $2)
            ON CONFLICT (product_name) DO UPDATE SET start_date = EXCLUDED.start_date
            "#
        );
        sqlx::query(&sql)
            .bind(product.as_str())
            .bind(start)
            .execute(&self.pool)
            .await?;
        info!(product = %product, start = %start, "상품 시작일 저장");
        Ok(())
    }

    async fn clear_starts(&self) -> Result<()> {
        sqlx::query(&format!("DELETE FROM {PRODUCTS_TABLE}"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
