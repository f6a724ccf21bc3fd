//! 윈도우 단위 캔들 조회.

use super::planner::FetchWindow;
use crate::error::FetchError;
use candle_core::{sort_dedup_candles, Candle};
use candle_exchange::{CandleSource, RateLimiter};
use std::sync::Arc;
use tracing::debug;

/// rate limiter를 거쳐 윈도우 하나를 조회하는 fetcher.
#[derive(Clone)]
pub struct Fetcher {
    source: Arc<dyn CandleSource>,
    limiter: Arc<RateLimiter>,
}

impl Fetcher {
    /// 새 fetcher 생성.
    pub fn new(source: Arc<dyn CandleSource>, limiter: Arc<RateLimiter>) -> Self {
        Self { source, limiter }
    }

    /// 윈도우 조회 (시도 1회 = 거래소 호출 1회).
    ///
    /// 결과는 `[window.start, window.end)`로 잘라낸 뒤 시각 오름차순으로 정렬하고
    /// 중복을 제거합니다.
    pub async fn fetch(&self, window: &FetchWindow) -> Result<Vec<Candle>, FetchError> {
        self.limiter.acquire().await;

        let mut candles = self
            .source
            .get_candles(
                &window.channel.product,
                window.channel.granularity,
                window.start,
                window.end,
            )
            .await
            .map_err(FetchError::from)?;

        let received = candles.len();
        candles.retain(|c| c.open_time >= window.start && c.open_time < window.end);
        sort_dedup_candles(&mut candles);

        debug!(
            channel = %window.channel,
            start = %window.start,
            end = %window.end,
            received = received,
            kept = candles.len(),
            "윈도우 조회"
        );

        Ok(candles)
    }
}
