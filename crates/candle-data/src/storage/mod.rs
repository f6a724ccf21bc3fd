//! 저장소 인터페이스.
//!
//! 채널마다 하나의 테이블을 사용하며, 모든 채널 테이블은 템플릿 테이블
//! (`candle`)과 같은 구조로 생성됩니다. 시각 키(`open_timestamp`)에 고유
//! 제약이 있어 같은 캔들을 두 번 저장할 수 없습니다.

pub mod memory;
pub mod postgres;

use crate::error::{DataError, Result};
use async_trait::async_trait;
use candle_core::{Candle, ProductId};
use chrono::{DateTime, Utc};

/// 상품 시작일 테이블 이름.
pub const PRODUCTS_TABLE: &str = "products";

/// PostgreSQL 식별자 최대 길이.
const MAX_IDENTIFIER_LEN: usize = 63;

/// 테이블 이름 검증.
///
/// 쿼리에 직접 들어가므로 소문자로 시작하는 `[a-z0-9_]`만 허용합니다.
pub fn validate_identifier(name: &str) -> Result<&str> {
    let valid = !name.is_empty()
        && name.len() <= MAX_IDENTIFIER_LEN
        && name.starts_with(|c: char| c.is_ascii_lowercase())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if valid {
        Ok(name)
    } else {
        Err(DataError::InvalidIdentifier(name.to_string()))
    }
}

/// 채널 캔들 테이블 저장소.
#[async_trait]
pub trait CandleStore: Send + Sync {
    /// 템플릿 테이블이 없으면 생성.
    async fn ensure_template(&self) -> Result<()>;

    /// 테이블 존재 여부.
    async fn has_table(&self, table: &str) -> Result<bool>;

    /// 템플릿과 같은 구조로 테이블 생성 (이미 있으면 무시).
    async fn create_like(&self, table: &str, template: &str) -> Result<()>;

    /// 테이블 삭제 (없으면 무시).
    async fn drop_table(&self, table: &str) -> Result<()>;

    /// 캔들 일괄 삽입.
    ///
    /// 전부 반영되거나 전혀 반영되지 않습니다. 하나라도 기존 시각과 겹치면
    /// `DataError::UniqueViolation`을 반환합니다.
    async fn insert(&self, table: &str, rows: &[Candle]) -> Result<usize>;

    /// `[from, to]` 구간(양 끝 포함)의 캔들을 시각 오름차순으로 조회.
    async fn select_range(
        &self,
        table: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>>;

    /// 가장 최근(`most_recent`) 또는 가장 오래된 캔들 시각.
    async fn select_extreme(&self, table: &str, most_recent: bool)
        -> Result<Option<DateTime<Utc>>>;

    /// 저장된 캔들 수.
    async fn count(&self, table: &str) -> Result<u64>;
}

/// 상품별 첫 데이터 시각 저장소.
#[async_trait]
pub trait ProductStartStore: Send + Sync {
    /// 상품 테이블이 없으면 생성.
    async fn ensure_products_table(&self) -> Result<()>;

    /// 저장된 시작 시각 조회.
    async fn load_start(&self, product: &ProductId) -> Result<Option<DateTime<Utc>>>;

    /// 시작 시각 저장 (기존 값 덮어씀).
    async fn save_start(&self, product: &ProductId, start: DateTime<Utc>) -> Result<()>;

    /// 저장된 시작 시각 모두 삭제.
    async fn clear_starts(&self) -> Result<()>;
}
