//! 폴링 기반 실시간 캔들 피드.
//!
//! 거래소 REST 엔드포인트를 주기적으로 조회하여 새로 닫힌 캔들을 채널로 전달합니다.
//! 요청은 공유 rate limiter를 거치므로 백필과 같은 예산을 사용합니다.
//!
//! 거래소는 닫힌 캔들을 늦게 게시할 수 있으므로 조회 위치는 실제로 받은 캔들
//! 다음으로만 전진합니다. 빈 응답이 `settle` 동안 이어진 구간만 거래 없는
//! 구간으로 보고 건너뜁니다.

use crate::rate_limit::RateLimiter;
use crate::traits::{CandleFeed, CandleSource, ExchangeResult};
use async_trait::async_trait;
use candle_core::{sort_dedup_candles, Candle, Granularity, LiveConfig, ProductId};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// 현재 시각 공급 함수.
pub type Clock = fn() -> DateTime<Utc>;

/// `CandleSource`를 주기적으로 조회하는 `CandleFeed` 구현.
pub struct PollingCandleFeed {
    source: Arc<dyn CandleSource>,
    limiter: Arc<RateLimiter>,
    poll_interval: Duration,
    max_records: u32,
    buffer: usize,
    settle: Duration,
    clock: Clock,
}

impl PollingCandleFeed {
    /// 새 피드 생성.
    pub fn new(
        source: Arc<dyn CandleSource>,
        limiter: Arc<RateLimiter>,
        live: &LiveConfig,
        max_records: u32,
    ) -> Self {
        Self {
            source,
            limiter,
            poll_interval: live.poll_interval(),
            max_records: max_records.max(2),
            buffer: live.buffer.max(1),
            settle: live.settle(),
            clock: Utc::now,
        }
    }

    /// 폴링 간격 변경.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// 빈 구간을 건너뛰기 전 대기 시간 변경.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// 시각 공급 함수 변경.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

/// 한 채널의 폴링 상태.
struct PollTask {
    source: Arc<dyn CandleSource>,
    limiter: Arc<RateLimiter>,
    product: ProductId,
    granularity: Granularity,
    max_records: u32,
    settle: Duration,
    clock: Clock,
    /// 다음에 조회할 캔들 시작 시각
    next_from: DateTime<Utc>,
    /// `next_from`부터 빈 응답이 처음 나온 시각
    empty_since: Option<Instant>,
    tx: mpsc::Sender<Candle>,
}

impl PollTask {
    /// 닫힌 캔들을 모두 따라잡을 때까지 페이지 단위로 조회.
    ///
    /// 수신 측이 닫혔으면 `false`를 반환합니다.
    async fn catch_up(&mut self) -> bool {
        let step = self.granularity.duration();
        let page = step * (self.max_records as i32 - 1);
        let closed_before = self.granularity.align_down((self.clock)());

        while self.next_from < closed_before {
            let page_end = (self.next_from + page).min(closed_before);

            self.limiter.acquire().await;
            let mut candles = match self
                .source
                .get_candles(&self.product, self.granularity, self.next_from, page_end)
                .await
            {
                Ok(candles) => candles,
                Err(e) => {
                    warn!(
                        product = %self.product,
                        granularity = %self.granularity,
                        error = %e,
                        "실시간 캔들 조회 실패, 다음 주기에 재시도"
                    );
                    return true;
                }
            };

            candles.retain(|c| c.open_time >= self.next_from && c.open_time < page_end);
            sort_dedup_candles(&mut candles);

            let last = candles.last().map(|c| c.open_time);
            for candle in candles {
                if self.tx.send(candle).await.is_err() {
                    return false;
                }
            }

            match last {
                Some(open_time) => {
                    self.next_from = open_time + step;
                    self.empty_since = None;
                }
                None => {
                    let since = *self.empty_since.get_or_insert_with(Instant::now);
                    if since.elapsed() < self.settle {
                        debug!(
                            product = %self.product,
                            granularity = %self.granularity,
                            from = %self.next_from,
                            "캔들 미게시, 다음 주기에 재조회"
                        );
                        return true;
                    }
                    warn!(
                        product = %self.product,
                        granularity = %self.granularity,
                        from = %self.next_from,
                        to = %page_end,
                        "빈 구간 건너뜀"
                    );
                    self.next_from = page_end;
                    self.empty_since = None;
                }
            }
        }
        true
    }

    async fn run(mut self, poll_interval: Duration) {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.tx.closed() => break,
                _ = ticker.tick() => {
                    if !self.catch_up().await {
                        break;
                    }
                }
            }
        }

        debug!(
            product = %self.product,
            granularity = %self.granularity,
            "실시간 폴링 종료"
        );
    }
}

#[async_trait]
impl CandleFeed for PollingCandleFeed {
    async fn watch(
        &self,
        product: &ProductId,
        granularity: Granularity,
        from: DateTime<Utc>,
    ) -> ExchangeResult<mpsc::Receiver<Candle>> {
        let (tx, rx) = mpsc::channel(self.buffer);

        let task = PollTask {
            source: Arc::clone(&self.source),
            limiter: Arc::clone(&self.limiter),
            product: product.clone(),
            granularity,
            max_records: self.max_records,
            settle: self.settle,
            clock: self.clock,
            next_from: granularity.align_down(from) + granularity.duration(),
            empty_since: None,
            tx,
        };

        info!(
            product = %product,
            granularity = %granularity,
            from = %from,
            source = self.source.name(),
            "실시간 폴링 시작"
        );

        tokio::spawn(task.run(self.poll_interval));
        Ok(rx)
    }
}
