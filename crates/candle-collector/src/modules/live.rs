//! 실시간 캔들 수신.
//!
//! 백필이 끝난 채널에 대해서만 구독을 시작합니다. 수신한 캔들은 백필과 같은
//! reconciler를 거치므로 중복 전달이나 백필과의 겹침이 있어도 한 번만 저장됩니다.

use super::reconciler::Reconciler;
use candle_core::{channel_span, Candle, Channel};
use candle_data::CandleStore;
use candle_exchange::CandleFeed;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

/// 채널별 실시간 수신 통계.
#[derive(Debug, Clone, Serialize)]
pub struct LiveStats {
    pub channel: Channel,
    /// 받은 캔들 수
    pub received: usize,
    /// 새로 저장된 캔들 수
    pub written: usize,
    /// 쓰기 실패 수
    pub errors: usize,
}

/// 실행 중인 구독 태스크 묶음.
pub struct LiveHandle {
    tasks: JoinSet<LiveStats>,
}

impl LiveHandle {
    /// 구독 중인 채널 수.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// 구독이 없는지 여부.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// 모든 구독이 끝날 때까지 대기합니다.
    pub async fn wait(mut self) -> Vec<LiveStats> {
        let mut stats = Vec::with_capacity(self.tasks.len());
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(s) => stats.push(s),
                Err(e) => error!(error = %e, "실시간 수신 태스크 비정상 종료"),
            }
        }
        stats.sort_by(|a, b| a.channel.cmp(&b.channel));
        stats
    }
}

/// 채널 구독 관리자.
pub struct LiveListener {
    feed: Arc<dyn CandleFeed>,
    store: Arc<dyn CandleStore>,
    reconciler: Reconciler,
    cancel: CancellationToken,
}

impl LiveListener {
    /// 새 listener 생성.
    pub fn new(
        feed: Arc<dyn CandleFeed>,
        store: Arc<dyn CandleStore>,
        reconciler: Reconciler,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            feed,
            store,
            reconciler,
            cancel,
        }
    }

    /// 채널들의 구독을 시작합니다.
    ///
    /// 각 채널은 저장된 가장 최근 캔들 이후부터 받습니다. 저장된 캔들이 없으면
    /// `fallback`을 캔들 경계로 내림한 시각을 기준으로 합니다. 구독에 실패한 채널은
    /// 로그를 남기고 건너뜁니다.
    pub async fn arm(&self, channels: &[Channel], fallback: DateTime<Utc>) -> LiveHandle {
        let mut tasks = JoinSet::new();

        for channel in channels {
            let anchor = match self.store.select_extreme(&channel.table_name(), true).await {
                Ok(Some(latest)) => latest,
                Ok(None) => channel.granularity.align_down(fallback),
                Err(e) => {
                    error!(channel = %channel, error = %e, "커서 조회 실패, 구독 건너뜀");
                    continue;
                }
            };

            let rx = match self
                .feed
                .watch(&channel.product, channel.granularity, anchor)
                .await
            {
                Ok(rx) => rx,
                Err(e) => {
                    error!(channel = %channel, error = %e, "구독 실패");
                    continue;
                }
            };

            info!(channel = %channel, from = %anchor, "실시간 수신 시작");
            let span = channel_span!("live", channel);
            tasks.spawn(
                receive(
                    channel.clone(),
                    rx,
                    self.reconciler.clone(),
                    self.cancel.clone(),
                )
                .instrument(span),
            );
        }

        LiveHandle { tasks }
    }
}

async fn receive(
    channel: Channel,
    mut rx: mpsc::Receiver<Candle>,
    reconciler: Reconciler,
    cancel: CancellationToken,
) -> LiveStats {
    let mut stats = LiveStats {
        channel: channel.clone(),
        received: 0,
        written: 0,
        errors: 0,
    };

    loop {
        let candle = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("종료 신호 수신");
                break;
            }
            next = rx.recv() => match next {
                Some(candle) => candle,
                None => {
                    warn!("피드 종료");
                    break;
                }
            },
        };

        stats.received += 1;
        match reconciler.write(&channel, vec![candle]).await {
            Ok(written) => stats.written += written,
            Err(e) => {
                // 한 캔들의 쓰기 실패로 구독을 끊지 않음
                stats.errors += 1;
                error!(error = %e, "실시간 캔들 저장 실패");
            }
        }
    }

    info!(
        received = stats.received,
        written = stats.written,
        errors = stats.errors,
        "실시간 수신 종료"
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Granularity, ProductId, CANDLE_TABLE_PREFIX};
    use candle_data::{DataError, MemoryStore};
    use candle_exchange::SimulatedExchange;
    use chrono::{Duration, TimeZone};

    fn eth() -> ProductId {
        ProductId::new("ETH-USD").unwrap()
    }

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap() + Duration::minutes(minute)
    }

    async fn setup(
        channel: &Channel,
    ) -> (Arc<SimulatedExchange>, Arc<MemoryStore>, CancellationToken, LiveListener) {
        let exchange = Arc::new(SimulatedExchange::new().with_listing(eth(), at(0)));
        let store = Arc::new(MemoryStore::new());
        store.ensure_template().await.unwrap();
        store
            .create_like(&channel.table_name(), CANDLE_TABLE_PREFIX)
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let listener = LiveListener::new(
            exchange.clone(),
            store.clone(),
            Reconciler::new(store.clone(), 5),
            cancel.clone(),
        );
        (exchange, store, cancel, listener)
    }

    #[tokio::test]
    async fn test_anchor_is_latest_stored_candle() {
        let channel = Channel::new(eth(), Granularity::OneMinute);
        let (exchange, store, cancel, listener) = setup(&channel).await;
        let stored: Vec<_> = (0..5)
            .map(|m| SimulatedExchange::candle_at(Granularity::OneMinute, at(m)))
            .collect();
        store.insert(&channel.table_name(), &stored).await.unwrap();

        let handle = listener.arm(std::slice::from_ref(&channel), at(100)).await;
        assert_eq!(handle.len(), 1);
        assert_eq!(
            exchange.watches(),
            vec![(eth(), Granularity::OneMinute, at(4))]
        );

        cancel.cancel();
        handle.wait().await;
    }

    #[tokio::test]
    async fn test_empty_table_uses_aligned_fallback() {
        let channel = Channel::new(eth(), Granularity::FiveMinutes);
        let (exchange, _store, cancel, listener) = setup(&channel).await;

        let handle = listener
            .arm(std::slice::from_ref(&channel), at(7) + Duration::seconds(30))
            .await;
        assert_eq!(exchange.watches()[0].2, at(5));

        cancel.cancel();
        handle.wait().await;
    }

    #[tokio::test]
    async fn test_redelivered_candle_is_stored_once() {
        let channel = Channel::new(eth(), Granularity::OneMinute);
        let (exchange, store, cancel, listener) = setup(&channel).await;
        let handle = listener.arm(std::slice::from_ref(&channel), at(0)).await;

        let candle = SimulatedExchange::candle_at(Granularity::OneMinute, at(1));
        assert_eq!(exchange.push(&eth(), Granularity::OneMinute, candle.clone()).await, 1);
        assert_eq!(exchange.push(&eth(), Granularity::OneMinute, candle.clone()).await, 1);
        let next = SimulatedExchange::candle_at(Granularity::OneMinute, at(2));
        exchange.push(&eth(), Granularity::OneMinute, next).await;

        exchange.close_feeds();
        let stats = handle.wait().await;

        assert_eq!(stats[0].received, 3);
        assert_eq!(stats[0].written, 2);
        assert_eq!(stats[0].errors, 0);
        assert_eq!(store.snapshot(&channel.table_name()).await.len(), 2);
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_write_failure_keeps_listening() {
        let channel = Channel::new(eth(), Granularity::OneMinute);
        let (exchange, store, _cancel, listener) = setup(&channel).await;
        let handle = listener.arm(std::slice::from_ref(&channel), at(0)).await;

        store
            .fail_next_insert(DataError::QueryError("connection reset".into()))
            .await;
        for m in 1..=2 {
            let candle = SimulatedExchange::candle_at(Granularity::OneMinute, at(m));
            exchange.push(&eth(), Granularity::OneMinute, candle).await;
        }

        exchange.close_feeds();
        let stats = handle.wait().await;

        assert_eq!(stats[0].errors, 1);
        assert_eq!(stats[0].written, 1);
        assert_eq!(store.snapshot(&channel.table_name()).await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_product_is_skipped() {
        let channel = Channel::new(eth(), Granularity::OneMinute);
        let (_exchange, _store, _cancel, listener) = setup(&channel).await;
        let unknown = Channel::new(ProductId::new("DOGE-USD").unwrap(), Granularity::OneMinute);

        let handle = listener
            .arm(&[unknown, channel.clone()], at(0))
            .await;
        assert_eq!(handle.len(), 1);
    }
}
