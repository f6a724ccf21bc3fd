//! 거래소 trait 정의.

use async_trait::async_trait;
use candle_core::{Candle, Granularity, ProductId};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::ExchangeError;

/// 거래소 작업을 위한 Result 타입.
pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// 구간 단위 캔들 조회 인터페이스.
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// 데이터 소스 이름 반환.
    fn name(&self) -> &str;

    /// `[start, end]` 구간의 캔들 조회.
    ///
    /// 한 번의 호출은 거래소의 요청당 레코드 상한을 넘지 않는 구간이어야 합니다.
    /// 반환 순서는 보장하지 않습니다.
    async fn get_candles(
        &self,
        product: &ProductId,
        granularity: Granularity,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ExchangeResult<Vec<Candle>>;
}

/// 실시간 캔들 수신 인터페이스.
#[async_trait]
pub trait CandleFeed: Send + Sync {
    /// `from` 이후에 새로 닫힌 캔들을 수신합니다.
    ///
    /// 같은 캔들이 여러 번 전달될 수 있으므로 수신 측은 중복을 허용해야 합니다.
    /// 수신 측이 Receiver를 버리면 구독이 종료됩니다.
    async fn watch(
        &self,
        product: &ProductId,
        granularity: Granularity,
        from: DateTime<Utc>,
    ) -> ExchangeResult<mpsc::Receiver<Candle>>;
}
