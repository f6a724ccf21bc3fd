//! 캔들 레코드.
//!
//! 채널 저장소의 한 행에 해당하며 `open_time`이 채널 내 중복 제거 키입니다.

use crate::types::{Granularity, Price, Volume};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// OHLCV 캔들 데이터.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    /// 캔들 시작 시간 (채널 내 고유)
    pub open_time: DateTime<Utc>,
    /// 시가
    pub open: Price,
    /// 고가
    pub high: Price,
    /// 저가
    pub low: Price,
    /// 종가
    pub close: Price,
    /// 거래량 (기준 자산 단위, 음수 불가)
    pub volume: Volume,
}

impl Candle {
    /// 새 캔들을 생성합니다.
    pub fn new(
        open_time: DateTime<Utc>,
        open: Price,
        high: Price,
        low: Price,
        close: Price,
        volume: Volume,
    ) -> Self {
        Self {
            open_time,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// 캔들 종료 시간을 반환합니다.
    pub fn close_time(&self, granularity: Granularity) -> DateTime<Utc> {
        self.open_time + granularity.duration()
    }

    /// 저장 가능한 값인지 확인합니다.
    pub fn is_well_formed(&self) -> bool {
        self.volume >= Decimal::ZERO && self.low <= self.high
    }
}

/// 캔들 묶음을 `open_time` 오름차순으로 정렬하고 같은 시각의 중복을 제거합니다.
///
/// 같은 `open_time`이 여러 번 나오면 먼저 나온 레코드를 남깁니다.
pub fn sort_dedup_candles(candles: &mut Vec<Candle>) {
    candles.sort_by_key(|c| c.open_time);
    candles.dedup_by_key(|c| c.open_time);
}
