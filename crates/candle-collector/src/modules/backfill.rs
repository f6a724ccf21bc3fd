//! 채널별 백필 상태 기계.
//!
//! 채널마다 독립된 tokio 태스크가 다음 상태를 거칩니다:
//!
//! ```text
//! Idle → (커서 없음) Discovering → Planning → Fetching → Writing → { Fetching | Done }
//!                                               └──────────┴→ Failed / Interrupted
//! ```
//!
//! 채널 사이의 유일한 동기화 지점은 공유 rate limiter입니다. 한 채널의 실패는
//! 다른 채널에 영향을 주지 않으며, 실패 채널은 저장되지 않은 구간과 함께 보고됩니다.

use super::cursor::read_cursor;
use super::fetcher::Fetcher;
use super::planner::{FetchWindow, WindowPlanner};
use super::reconciler::Reconciler;
use super::registry::SeriesRegistry;
use crate::error::ChannelError;
use crate::stats::{BackfillReport, ChannelOutcome, ChannelReport, ChannelStats};
use candle_core::{channel_span, BackfillConfig, Candle, Channel, FetchConfig};
use candle_data::CandleStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

/// 채널 백필 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Discovering,
    Planning,
    Fetching,
    Writing,
    Done,
    Failed,
    Interrupted,
}

/// 모든 채널의 백필을 구동하는 coordinator.
#[derive(Clone)]
pub struct BackfillCoordinator {
    registry: Arc<SeriesRegistry>,
    store: Arc<dyn CandleStore>,
    planner: WindowPlanner,
    fetcher: Fetcher,
    reconciler: Reconciler,
    fetch: FetchConfig,
    end: Option<DateTime<Utc>>,
    cancel: CancellationToken,
}

impl BackfillCoordinator {
    /// 새 coordinator 생성.
    pub fn new(
        registry: Arc<SeriesRegistry>,
        store: Arc<dyn CandleStore>,
        fetcher: Fetcher,
        reconciler: Reconciler,
        fetch: FetchConfig,
        backfill: &BackfillConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            store,
            planner: WindowPlanner::new(fetch.max_records_per_request),
            fetcher,
            reconciler,
            fetch,
            end: backfill.end,
            cancel,
        }
    }

    /// 채널의 백필 종료 시각 (제외).
    ///
    /// 설정된 종료 시각이 없으면 `now`를 사용하며, 어느 쪽이든 캔들 경계로 내림하여
    /// 아직 형성 중인 캔들은 포함하지 않습니다.
    pub fn channel_end(&self, channel: &Channel, now: DateTime<Utc>) -> DateTime<Utc> {
        channel.granularity.align_down(self.end.unwrap_or(now))
    }

    /// 모든 채널을 동시에 백필하고 채널별 결과를 모읍니다.
    pub async fn run(&self, channels: &[Channel]) -> BackfillReport {
        self.run_at(channels, Utc::now()).await
    }

    /// 기준 시각 `now`로 백필합니다.
    pub async fn run_at(&self, channels: &[Channel], now: DateTime<Utc>) -> BackfillReport {
        let started = Instant::now();
        info!(channels = channels.len(), now = %now, "백필 시작");

        let mut tasks = JoinSet::new();
        for channel in channels {
            let worker = ChannelWorker {
                coordinator: self.clone(),
                channel: channel.clone(),
                now,
                state: ChannelState::Idle,
                stats: ChannelStats::new(),
            };
            let span = channel_span!("backfill", channel);
            tasks.spawn(worker.run().instrument(span));
        }

        let mut report = BackfillReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(channel_report) => report.channels.push(channel_report),
                Err(e) => error!(error = %e, "채널 태스크 비정상 종료"),
            }
        }
        report.channels.sort_by(|a, b| a.channel.cmp(&b.channel));
        report.elapsed = started.elapsed();
        report
    }
}

/// 한 채널의 백필 실행자.
struct ChannelWorker {
    coordinator: BackfillCoordinator,
    channel: Channel,
    now: DateTime<Utc>,
    state: ChannelState,
    stats: ChannelStats,
}

impl ChannelWorker {
    async fn run(mut self) -> ChannelReport {
        let started = Instant::now();
        let outcome = self.backfill().await;
        self.stats.elapsed = started.elapsed();

        ChannelReport {
            channel: self.channel,
            outcome,
            stats: self.stats,
        }
    }

    fn transition(&mut self, next: ChannelState) {
        debug!(from = ?self.state, to = ?next, "상태 전이");
        self.state = next;
    }

    fn fail(
        &mut self,
        error: ChannelError,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ChannelOutcome {
        self.transition(ChannelState::Failed);
        error!(error = %error, from = %from, to = %to, "채널 실패");
        ChannelOutcome::Failed {
            error: error.to_string(),
            from,
            to,
        }
    }

    async fn backfill(&mut self) -> ChannelOutcome {
        let c = self.coordinator.clone();
        let end = c.channel_end(&self.channel, self.now);

        let cursor = match read_cursor(c.store.as_ref(), &self.channel).await {
            Ok(cursor) => cursor,
            Err(e) => {
                let floor = c.registry.floor_start();
                return self.fail(ChannelError::Cursor(e), floor, end);
            }
        };

        let start = match cursor {
            Some(cursor) => cursor.covered_to,
            None => {
                self.transition(ChannelState::Discovering);
                match c.registry.product_start(&self.channel.product, self.now).await {
                    Ok(start) => start,
                    Err(e) => {
                        let floor = c.registry.floor_start();
                        return self.fail(ChannelError::Discovery(e), floor, end);
                    }
                }
            }
        };
        let start = self.channel.granularity.align_down(start);

        self.transition(ChannelState::Planning);
        let windows = c.planner.plan(&self.channel, start, end);
        self.stats.windows_planned = windows.len();
        info!(
            start = %start,
            end = %end,
            windows = windows.len(),
            resumed = cursor.is_some(),
            "백필 계획"
        );

        for window in &windows {
            // 진행 중인 조회/쓰기는 끝까지 마치고 윈도우 사이에서만 중단
            if c.cancel.is_cancelled() {
                self.transition(ChannelState::Interrupted);
                return ChannelOutcome::Interrupted {
                    from: window.start,
                    to: end,
                };
            }

            self.transition(ChannelState::Fetching);
            let candles = match self.fetch_with_retry(window).await {
                Ok(candles) => candles,
                Err(e) => return self.fail(e, window.start, end),
            };
            self.stats.fetched += candles.len();

            self.transition(ChannelState::Writing);
            match c.reconciler.write(&self.channel, candles).await {
                Ok(written) => self.stats.written += written,
                Err(e) => return self.fail(ChannelError::Write(e), window.start, end),
            }
            self.stats.windows_done += 1;
        }

        self.transition(ChannelState::Done);
        ChannelOutcome::Done
    }

    /// 일시적 실패는 같은 윈도우를 `max_attempts`까지 재시도합니다.
    async fn fetch_with_retry(&mut self, window: &FetchWindow) -> Result<Vec<Candle>, ChannelError> {
        let fetch = &self.coordinator.fetch;
        let max_attempts = fetch.max_attempts.max(1);

        let mut attempt = 1;
        loop {
            match self.coordinator.fetcher.fetch(window).await {
                Ok(candles) => return Ok(candles),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = fetch.retry_delay(attempt);
                    warn!(
                        window_start = %window.start,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "윈도우 조회 재시도"
                    );
                    self.stats.retries += 1;
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    return Err(ChannelError::Fetch {
                        error,
                        attempts: attempt,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DiscoveryConfig, Granularity, ProductId};
    use candle_data::{DataError, MemoryStore, ProductStartStore};
    use candle_exchange::{ExchangeError, RateLimiter, SimulatedExchange};
    use chrono::{Duration, NaiveDate, TimeZone};

    struct Harness {
        exchange: Arc<SimulatedExchange>,
        store: Arc<MemoryStore>,
        coordinator: BackfillCoordinator,
    }

    fn eth() -> ProductId {
        ProductId::new("ETH-USD").unwrap()
    }

    fn listing() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap()
    }

    async fn harness(end: DateTime<Utc>, fetch: FetchConfig, channels: &[Channel]) -> Harness {
        let exchange = Arc::new(SimulatedExchange::new().with_listing(eth(), listing()));
        let store = Arc::new(MemoryStore::new());
        let limiter = Arc::new(RateLimiter::new(10_000, std::time::Duration::from_secs(1)));
        let registry = Arc::new(SeriesRegistry::new(
            store.clone(),
            store.clone(),
            exchange.clone(),
            limiter.clone(),
            DiscoveryConfig {
                floor: NaiveDate::from_ymd_opt(2019, 1, 1).unwrap(),
                max_attempts: 1,
            },
        ));
        registry.init_tables(channels, false).await.unwrap();

        let coordinator = BackfillCoordinator::new(
            registry,
            store.clone(),
            Fetcher::new(exchange.clone(), limiter),
            Reconciler::new(store.clone(), 5),
            fetch,
            &BackfillConfig { end: Some(end) },
            CancellationToken::new(),
        );
        Harness {
            exchange,
            store,
            coordinator,
        }
    }

    fn fast_fetch() -> FetchConfig {
        FetchConfig {
            retry_backoff_ms: 1,
            ..FetchConfig::default()
        }
    }

    #[tokio::test]
    async fn test_channel_end_is_aligned() {
        let channel = Channel::new(eth(), Granularity::OneHour);
        let h = harness(listing(), fast_fetch(), std::slice::from_ref(&channel)).await;
        let coordinator = BackfillCoordinator {
            end: None,
            ..h.coordinator
        };

        let now = Utc.with_ymd_and_hms(2024, 3, 15, 12, 34, 56).unwrap();
        assert_eq!(
            coordinator.channel_end(&channel, now),
            Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried_on_same_window() {
        let channel = Channel::new(eth(), Granularity::OneHour);
        let end = listing() + Duration::hours(24);
        let h = harness(end, fast_fetch(), std::slice::from_ref(&channel)).await;
        h.store.save_start(&eth(), listing()).await.unwrap();

        h.exchange.fail_next(ExchangeError::RateLimited);
        h.exchange.fail_next(ExchangeError::Timeout("slow".into()));

        let report = h.coordinator.run(std::slice::from_ref(&channel)).await;
        let channel_report = report.get(&channel).unwrap();

        assert!(channel_report.is_done());
        assert_eq!(channel_report.stats.retries, 2);
        assert_eq!(channel_report.stats.written, 24);

        let requests = h.exchange.requests_for(&eth(), Granularity::OneHour);
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|r| r.start == listing()));
    }

    #[tokio::test]
    async fn test_permanent_error_fails_only_that_channel() {
        let btc = ProductId::new("BTC-USD").unwrap();
        let broken = Channel::new(btc.clone(), Granularity::OneHour);
        let daily = Channel::new(eth(), Granularity::OneDay);
        let channels = vec![broken.clone(), daily.clone()];
        let end = listing() + Duration::days(3);
        let h = harness(end, fast_fetch(), &channels).await;
        h.store.save_start(&eth(), listing()).await.unwrap();
        h.store.save_start(&btc, listing()).await.unwrap();
        h.exchange.break_product(
            btc,
            ExchangeError::ApiError {
                code: 400,
                message: "bad request".into(),
            },
        );

        let report = h.coordinator.run(&channels).await;

        let failed = report.get(&broken).unwrap();
        match &failed.outcome {
            ChannelOutcome::Failed { from, to, .. } => {
                assert_eq!(*from, listing());
                assert_eq!(*to, end);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(report.get(&daily).unwrap().is_done());
        assert_eq!(report.done_channels(), vec![daily.clone()]);
        assert_eq!(h.store.count(&daily.table_name()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_fails_with_range() {
        let channel = Channel::new(eth(), Granularity::OneDay);
        let end = listing() + Duration::days(2);
        let fetch = FetchConfig {
            max_attempts: 2,
            ..fast_fetch()
        };
        let h = harness(end, fetch, std::slice::from_ref(&channel)).await;
        h.store.save_start(&eth(), listing()).await.unwrap();
        h.exchange.fail_next(ExchangeError::NetworkError("reset".into()));
        h.exchange.fail_next(ExchangeError::NetworkError("reset".into()));

        let report = h.coordinator.run(std::slice::from_ref(&channel)).await;
        let channel_report = report.get(&channel).unwrap();

        assert!(matches!(
            channel_report.outcome,
            ChannelOutcome::Failed { from, .. } if from == listing()
        ));
        assert_eq!(h.store.count(&channel.table_name()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_reports_interrupted() {
        let channel = Channel::new(eth(), Granularity::OneHour);
        let end = listing() + Duration::hours(5);
        let h = harness(end, fast_fetch(), std::slice::from_ref(&channel)).await;
        h.store.save_start(&eth(), listing()).await.unwrap();
        h.coordinator.cancel.cancel();

        let report = h.coordinator.run(std::slice::from_ref(&channel)).await;
        assert_eq!(
            report.get(&channel).unwrap().outcome,
            ChannelOutcome::Interrupted {
                from: listing(),
                to: end
            }
        );
        assert!(h.exchange.requests_for(&eth(), Granularity::OneHour).is_empty());
    }

    #[tokio::test]
    async fn test_resume_starts_at_cursor() {
        let channel = Channel::new(eth(), Granularity::OneHour);
        let end = listing() + Duration::hours(10);
        let h = harness(end, fast_fetch(), std::slice::from_ref(&channel)).await;

        let stored: Vec<_> = (0..4)
            .map(|i| SimulatedExchange::candle_at(Granularity::OneHour, listing() + Duration::hours(i)))
            .collect();
        h.store.insert(&channel.table_name(), &stored).await.unwrap();

        let report = h.coordinator.run(std::slice::from_ref(&channel)).await;
        let channel_report = report.get(&channel).unwrap();

        assert!(channel_report.is_done());
        // 커서 캔들은 다시 받지만 저장되지 않음
        assert_eq!(channel_report.stats.written, 6);
        let requests = h.exchange.requests_for(&eth(), Granularity::OneHour);
        assert_eq!(requests[0].start, listing() + Duration::hours(3));
        assert_eq!(h.store.count(&channel.table_name()).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_storage_error_marks_channel_failed() {
        let channel = Channel::new(eth(), Granularity::OneDay);
        let end = listing() + Duration::days(2);
        let h = harness(end, fast_fetch(), std::slice::from_ref(&channel)).await;
        h.store.save_start(&eth(), listing()).await.unwrap();
        h.store
            .fail_next_insert(DataError::QueryError("disk full".into()))
            .await;

        let report = h.coordinator.run(std::slice::from_ref(&channel)).await;
        assert!(report.failed().any(|r| r.channel == channel));
        assert_eq!(h.store.count(&channel.table_name()).await.unwrap(), 0);
    }
}
