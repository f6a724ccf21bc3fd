//! 수집 파이프라인 조립.
//!
//! 설정과 외부 의존성(거래소, 저장소)을 받아 registry, coordinator, listener를
//! 구성하고 CLI 명령 단위의 작업을 제공합니다.

use super::backfill::BackfillCoordinator;
use super::cursor::read_cursor;
use super::fetcher::Fetcher;
use super::live::{LiveHandle, LiveListener};
use super::reconciler::Reconciler;
use super::registry::{channels, SeriesRegistry};
use crate::error::Result;
use crate::stats::BackfillReport;
use candle_core::{AppConfig, Channel, Cursor, ProductId};
use candle_data::{CandleStore, ProductStartStore};
use candle_exchange::{CandleFeed, CandleSource, RateLimiter};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 채널 저장 상태.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatus {
    pub channel: Channel,
    pub table_exists: bool,
    pub rows: u64,
    pub cursor: Option<Cursor>,
}

/// 설정된 모든 채널의 수집기.
pub struct Collector {
    config: AppConfig,
    channels: Vec<Channel>,
    store: Arc<dyn CandleStore>,
    registry: Arc<SeriesRegistry>,
    coordinator: BackfillCoordinator,
    listener: LiveListener,
    cancel: CancellationToken,
}

impl Collector {
    /// 새 collector 생성.
    ///
    /// `limiter`는 탐색과 백필 조회가 함께 사용합니다.
    pub fn new(
        config: AppConfig,
        store: Arc<dyn CandleStore>,
        starts: Arc<dyn ProductStartStore>,
        source: Arc<dyn CandleSource>,
        feed: Arc<dyn CandleFeed>,
        limiter: Arc<RateLimiter>,
        cancel: CancellationToken,
    ) -> Self {
        let channels = channels(&config.collector);
        let registry = Arc::new(SeriesRegistry::new(
            store.clone(),
            starts,
            source.clone(),
            limiter.clone(),
            config.discovery.clone(),
        ));
        let reconciler = Reconciler::new(store.clone(), config.reconcile.max_conflict_rounds);
        let coordinator = BackfillCoordinator::new(
            registry.clone(),
            store.clone(),
            Fetcher::new(source, limiter),
            reconciler.clone(),
            config.fetch.clone(),
            &config.backfill,
            cancel.clone(),
        );
        let listener = LiveListener::new(feed, store.clone(), reconciler, cancel.clone());

        Self {
            config,
            channels,
            store,
            registry,
            coordinator,
            listener,
            cancel,
        }
    }

    /// 수집 대상 채널 목록.
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// 테이블 준비. `reset`이면 채널 데이터와 상품 시작일을 모두 지웁니다.
    pub async fn init(&self, reset: bool) -> Result<()> {
        self.registry.init_tables(&self.channels, reset).await
    }

    /// 모든 채널 백필.
    pub async fn backfill(&self) -> Result<BackfillReport> {
        self.init(false).await?;
        let report = self.coordinator.run(&self.channels).await;
        report.log_summary("백필");
        Ok(report)
    }

    /// 백필이 완료된 채널의 실시간 수신을 시작합니다.
    pub async fn arm_live(&self, report: &BackfillReport) -> LiveHandle {
        let done = report.done_channels();
        let skipped = self.channels.len() - done.len();
        if skipped > 0 {
            warn!(skipped = skipped, "백필이 끝나지 않은 채널은 실시간 수신에서 제외");
        }

        let fallback = self.config.backfill.end.unwrap_or_else(Utc::now);
        self.listener.arm(&done, fallback).await
    }

    /// 백필 후 실시간 수신. 종료 신호를 받을 때까지 실행됩니다.
    pub async fn run(&self) -> Result<BackfillReport> {
        let report = self.backfill().await?;

        if !self.config.live.enabled {
            info!("실시간 수신 비활성화");
            return Ok(report);
        }
        if self.cancel.is_cancelled() {
            return Ok(report);
        }

        let handle = self.arm_live(&report).await;
        if handle.is_empty() {
            warn!("실시간 수신할 채널 없음");
            return Ok(report);
        }

        info!(channels = handle.len(), "실시간 수신 중");
        for stats in handle.wait().await {
            info!(
                channel = %stats.channel,
                received = stats.received,
                written = stats.written,
                errors = stats.errors,
                "실시간 수신 통계"
            );
        }
        Ok(report)
    }

    /// 상품 시작일 탐색 (저장된 값이 있으면 그대로 사용).
    ///
    /// 상품들은 동시에 탐색하며 요청 속도는 공유 limiter가 제한합니다.
    /// 실패한 상품은 로그만 남기고 결과에서 제외합니다.
    pub async fn discover(&self, products: &[ProductId]) -> Result<Vec<(ProductId, DateTime<Utc>)>> {
        self.init(false).await?;

        let now = Utc::now();
        let results = join_all(
            products
                .iter()
                .map(|product| self.registry.product_start(product, now)),
        )
        .await;

        let mut found = Vec::with_capacity(products.len());
        for (product, result) in products.iter().zip(results) {
            match result {
                Ok(start) => {
                    info!(product = %product, start = %start, "상품 시작일");
                    found.push((product.clone(), start));
                }
                Err(e) => error!(product = %product, error = %e, "시작일 탐색 실패"),
            }
        }
        Ok(found)
    }

    /// 채널별 저장 상태 조회.
    pub async fn status(&self) -> Result<Vec<ChannelStatus>> {
        let mut statuses = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            let table = channel.table_name();
            let table_exists = self.store.has_table(&table).await?;
            let (rows, cursor) = if table_exists {
                (
                    self.store.count(&table).await?,
                    read_cursor(self.store.as_ref(), channel).await?,
                )
            } else {
                (0, None)
            };
            statuses.push(ChannelStatus {
                channel: channel.clone(),
                table_exists,
                rows,
                cursor,
            });
        }
        Ok(statuses)
    }

    /// 채널 테이블과 상품 시작일 초기화.
    pub async fn reset(&self) -> Result<()> {
        warn!(channels = self.channels.len(), "채널 데이터 초기화");
        self.init(true).await
    }
}
