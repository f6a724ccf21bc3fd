//! 인메모리 저장소.
//!
//! PostgreSQL 구현과 같은 의미(템플릿 테이블 필요, 고유 시각 키, 전부 아니면 전무 삽입)를
//! 갖습니다. 테스트에서 쓰기 실패를 주입할 수 있습니다.

use super::{validate_identifier, CandleStore, ProductStartStore};
use crate::error::{DataError, Result};
use async_trait::async_trait;
use candle_core::{Candle, ProductId, CANDLE_TABLE_PREFIX};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, RwLock};

type Table = BTreeMap<DateTime<Utc>, Candle>;

/// 메모리 기반 `CandleStore` + `ProductStartStore`.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Table>>,
    starts: RwLock<HashMap<ProductId, DateTime<Utc>>>,
    /// 다음 `insert` 호출들이 순서대로 반환할 에러
    insert_failures: Mutex<VecDeque<DataError>>,
    insert_calls: AtomicUsize,
}

impl MemoryStore {
    /// 빈 저장소 생성.
    pub fn new() -> Self {
        Self::default()
    }

    /// 다음 `insert` 호출 하나를 주어진 에러로 실패시킴.
    pub async fn fail_next_insert(&self, err: DataError) {
        self.insert_failures.lock().await.push_back(err);
    }

    /// 지금까지의 `insert` 호출 수.
    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    /// 테이블 전체를 시각 오름차순으로 반환 (없으면 빈 목록).
    pub async fn snapshot(&self, table: &str) -> Vec<Candle> {
        self.tables
            .read()
            .await
            .get(table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CandleStore for MemoryStore {
    async fn ensure_template(&self) -> Result<()> {
        self.tables
            .write()
            .await
            .entry(CANDLE_TABLE_PREFIX.to_string())
            .or_default();
        Ok(())
    }

    async fn has_table(&self, table: &str) -> Result<bool> {
        let table = validate_identifier(table)?;
        Ok(self.tables.read().await.contains_key(table))
    }

    async fn create_like(&self, table: &str, template: &str) -> Result<()> {
        let table = validate_identifier(table)?;
        let template = validate_identifier(template)?;

        let mut tables = self.tables.write().await;
        if !tables.contains_key(template) {
            return Err(DataError::TableNotFound(template.to_string()));
        }
        tables.entry(table.to_string()).or_default();
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> Result<()> {
        let table = validate_identifier(table)?;
        self.tables.write().await.remove(table);
        Ok(())
    }

    async fn insert(&self, table: &str, rows: &[Candle]) -> Result<usize> {
        let table = validate_identifier(table)?;
        self.insert_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(err) = self.insert_failures.lock().await.pop_front() {
            return Err(err);
        }

        let mut tables = self.tables.write().await;
        let stored = tables
            .get_mut(table)
            .ok_or_else(|| DataError::TableNotFound(table.to_string()))?;

        // 반영 전에 전체 검사
        let mut batch = BTreeMap::new();
        for candle in rows {
            if candle.volume < Decimal::ZERO {
                return Err(DataError::InvalidData(format!(
                    "음수 거래량: {}",
                    candle.open_time
                )));
            }
            if stored.contains_key(&candle.open_time)
                || batch.insert(candle.open_time, candle.clone()).is_some()
            {
                return Err(DataError::UniqueViolation(format!(
                    "duplicate key open_timestamp={}",
                    candle.open_time
                )));
            }
        }

        let inserted = batch.len();
        stored.extend(batch);
        Ok(inserted)
    }

    async fn select_range(
        &self,
        table: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let table = validate_identifier(table)?;
        if from > to {
            return Ok(Vec::new());
        }

        let tables = self.tables.read().await;
        let stored = tables
            .get(table)
            .ok_or_else(|| DataError::TableNotFound(table.to_string()))?;
        Ok(stored.range(from..=to).map(|(_, c)| c.clone()).collect())
    }

    async fn select_extreme(
        &self,
        table: &str,
        most_recent: bool,
    ) -> Result<Option<DateTime<Utc>>> {
        let table = validate_identifier(table)?;
        let tables = self.tables.read().await;
        let stored = tables
            .get(table)
            .ok_or_else(|| DataError::TableNotFound(table.to_string()))?;

        let key = if most_recent {
            stored.keys().next_back()
        } else {
            stored.keys().next()
        };
        Ok(key.copied())
    }

    async fn count(&self, table: &str) -> Result<u64> {
        let table = validate_identifier(table)?;
        let tables = self.tables.read().await;
        let stored = tables
            .get(table)
            .ok_or_else(|| DataError::TableNotFound(table.to_string()))?;
        Ok(stored.len() as u64)
    }
}

#[async_trait]
impl ProductStartStore for MemoryStore {
    async fn ensure_products_table(&self) -> Result<()> {
        Ok(())
    }

    async fn load_start(&self, product: &ProductId) -> Result<Option<DateTime<Utc>>> {
        Ok(self.starts.read().await.get(product).copied())
    }

    async fn save_start(&self, product: &ProductId, start: DateTime<Utc>) -> Result<()> {
        self.starts.write().await.insert(product.clone(), start);
        Ok(())
    }

    async fn clear_starts(&self) -> Result<()> {
        self.starts.write().await.clear();
        Ok(())
    }
}
