//! 채널 등록과 상품 시작일 탐색.
//!
//! 저장된 데이터가 없는 상품은 거래소가 데이터를 가진 가장 이른 날짜를 모르므로
//! 하한 날짜(floor)와 현재 사이를 일 단위 이분 탐색으로 찾습니다.
//! 찾은 시작일은 `products` 테이블에 저장되어 상품당 한 번만 탐색합니다.
//! 탐색 실패도 프로세스가 끝나거나 reset할 때까지 기억하므로, 실패한 상품의
//! 채널들이 각자 탐색을 반복하지 않습니다.

use crate::error::{CollectorError, Result};
use candle_core::{
    sort_dedup_candles, Candle, Channel, CollectorSection, DiscoveryConfig, Granularity, ProductId,
    CANDLE_TABLE_PREFIX,
};
use candle_data::{CandleStore, ProductStartStore};
use candle_exchange::{CandleSource, RateLimiter};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

/// 설정의 상품 × 해상도 조합으로 채널 목록 생성.
pub fn channels(collector: &CollectorSection) -> Vec<Channel> {
    let mut channels = Vec::with_capacity(collector.products.len() * collector.granularities.len());
    for product in &collector.products {
        for granularity in &collector.granularities {
            let channel = Channel::new(product.clone(), *granularity);
            if !channels.contains(&channel) {
                channels.push(channel);
            }
        }
    }
    channels
}

fn midnight(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(NaiveTime::MIN).and_utc()
}

/// 상품별 탐색 결과. 실패는 사유 문자열로 보관합니다.
type Discovered = std::result::Result<DateTime<Utc>, String>;

/// 하루치 탐색 결과.
enum Probe {
    Found(Vec<Candle>),
    Empty,
    /// 모든 시도가 실패함 (빈 결과로 취급)
    Failed,
}

/// 채널 저장 위치와 상품 시작일을 관리하는 registry.
pub struct SeriesRegistry {
    store: Arc<dyn CandleStore>,
    starts: Arc<dyn ProductStartStore>,
    source: Arc<dyn CandleSource>,
    limiter: Arc<RateLimiter>,
    discovery: DiscoveryConfig,
    /// 상품별 진행 중/완료된 탐색 (같은 상품의 채널들이 공유)
    known: Mutex<HashMap<ProductId, Arc<OnceCell<Discovered>>>>,
}

impl SeriesRegistry {
    /// 새 registry 생성.
    pub fn new(
        store: Arc<dyn CandleStore>,
        starts: Arc<dyn ProductStartStore>,
        source: Arc<dyn CandleSource>,
        limiter: Arc<RateLimiter>,
        discovery: DiscoveryConfig,
    ) -> Self {
        Self {
            store,
            starts,
            source,
            limiter,
            discovery,
            known: Mutex::new(HashMap::new()),
        }
    }

    /// 탐색 하한 날짜의 자정.
    pub fn floor_start(&self) -> DateTime<Utc> {
        midnight(self.discovery.floor)
    }

    /// 템플릿 테이블과 채널 테이블을 준비합니다.
    ///
    /// `reset`이면 채널 테이블을 삭제 후 다시 만들고 저장된 상품 시작일도 지웁니다.
    pub async fn init_tables(&self, channels: &[Channel], reset: bool) -> Result<()> {
        self.store.ensure_template().await?;
        self.starts.ensure_products_table().await?;

        if reset {
            self.starts.clear_starts().await?;
            self.known.lock().await.clear();
        }

        for channel in channels {
            let table = channel.table_name();
            if reset {
                self.store.drop_table(&table).await?;
            }
            let exists = self.store.has_table(&table).await?;
            info!(table = %table, exists = exists, "채널 테이블 확인");
            if !exists {
                self.store.create_like(&table, CANDLE_TABLE_PREFIX).await?;
            }
        }
        Ok(())
    }

    /// 상품의 첫 데이터 시각.
    ///
    /// 프로세스 내 캐시 → `products` 테이블 → 거래소 탐색 순서로 확인하며,
    /// 새로 탐색한 값은 저장합니다. 같은 상품을 동시에 요청하면 탐색은 한 번만 실행됩니다.
    ///
    /// 탐색이 실패한 상품은 이후 호출에서 거래소를 다시 조회하지 않고
    /// `DiscoveryFailed`를 반환합니다. 저장소 에러는 기억하지 않습니다.
    pub async fn product_start(&self, product: &ProductId, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let cell = {
            let mut known = self.known.lock().await;
            Arc::clone(known.entry(product.clone()).or_default())
        };

        match cell
            .get_or_try_init(|| self.load_or_discover(product, now))
            .await?
        {
            Ok(start) => Ok(*start),
            Err(reason) => Err(CollectorError::DiscoveryFailed {
                product: product.clone(),
                reason: reason.clone(),
            }),
        }
    }

    async fn load_or_discover(&self, product: &ProductId, now: DateTime<Utc>) -> Result<Discovered> {
        if let Some(saved) = self.starts.load_start(product).await? {
            debug!(product = %product, start = %saved, "저장된 시작일 사용");
            return Ok(Ok(saved));
        }
        match self.find_earliest_available(product, now).await {
            Ok(found) => {
                self.starts.save_start(product, found).await?;
                Ok(Ok(found))
            }
            Err(e @ (CollectorError::DiscoveryExhausted { .. } | CollectorError::Config(_))) => {
                warn!(product = %product, error = %e, "시작일 탐색 실패, 이번 실행에서는 재탐색하지 않음");
                Ok(Err(e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// 거래소가 데이터를 가진 가장 이른 시각을 이분 탐색으로 찾습니다.
    ///
    /// 하한 날짜에 이미 데이터가 있으면 그 날의 첫 캔들 시각을, 아니면 데이터가 있는
    /// 첫 날짜의 자정을 반환합니다. 실패한 탐색 요청은 빈 결과로 취급하며, 모든
    /// 요청이 실패한 경우에만 `DiscoveryExhausted`를 반환합니다.
    pub async fn find_earliest_available(
        &self,
        product: &ProductId,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let mut left = self.discovery.floor;
        let mut right = now.date_naive();
        if left >= right {
            return Err(CollectorError::Config(format!(
                "discovery floor {} must be before {}",
                left, right
            )));
        }

        let mut probes = 0u32;
        let mut failed = 0u32;

        probes += 1;
        match self.probe(product, left).await {
            Probe::Found(candles) => {
                let first = candles[0].open_time;
                info!(product = %product, start = %first, "하한 날짜에 데이터 존재");
                return Ok(first);
            }
            Probe::Empty => {}
            Probe::Failed => failed += 1,
        }

        while (right - left).num_days() > 1 {
            let mid = left + Duration::days((right - left).num_days() / 2);
            debug!(
                product = %product,
                left = %left,
                right = %right,
                days = (right - left).num_days(),
                "시작일 이분 탐색"
            );

            probes += 1;
            match self.probe(product, mid).await {
                Probe::Found(_) => right = mid,
                Probe::Empty => left = mid,
                Probe::Failed => {
                    failed += 1;
                    left = mid;
                }
            }
        }

        if failed == probes {
            return Err(CollectorError::DiscoveryExhausted {
                product: product.clone(),
                probes,
            });
        }

        let start = midnight(right);
        info!(product = %product, start = %start, probes = probes, failed = failed, "상품 시작일 탐색 완료");
        Ok(start)
    }

    /// `day` 하루치 일봉 조회. 실패하면 설정된 횟수까지 재시도합니다.
    async fn probe(&self, product: &ProductId, day: NaiveDate) -> Probe {
        let start = midnight(day);
        let end = start + Duration::days(1);

        for attempt in 1..=self.discovery.max_attempts.max(1) {
            self.limiter.acquire().await;
            match self
                .source
                .get_candles(product, Granularity::OneDay, start, end)
                .await
            {
                Ok(mut candles) => {
                    candles.retain(|c| c.open_time >= start && c.open_time < end);
                    if candles.is_empty() {
                        return Probe::Empty;
                    }
                    sort_dedup_candles(&mut candles);
                    return Probe::Found(candles);
                }
                Err(e) => {
                    warn!(
                        product = %product,
                        day = %day,
                        attempt = attempt,
                        error = %e,
                        "탐색 요청 실패"
                    );
                }
            }
        }
        Probe::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_data::MemoryStore;
    use candle_exchange::{ExchangeError, SimulatedExchange};
    use chrono::TimeZone;

    fn eth() -> ProductId {
        ProductId::new("ETH-USD").unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 30, 0).unwrap()
    }

    fn registry(exchange: Arc<SimulatedExchange>, floor: NaiveDate) -> (Arc<MemoryStore>, SeriesRegistry) {
        let store = Arc::new(MemoryStore::new());
        let limiter = Arc::new(RateLimiter::new(10_000, std::time::Duration::from_secs(1)));
        let discovery = DiscoveryConfig {
            floor,
            max_attempts: 2,
        };
        let registry = SeriesRegistry::new(store.clone(), store.clone(), exchange, limiter, discovery);
        (store, registry)
    }

    #[tokio::test]
    async fn test_discovery_finds_listing_day_for_any_floor() {
        let listing = date(2020, 6, 1);
        let exchange = Arc::new(SimulatedExchange::new().with_listing(eth(), midnight(listing)));

        for floor in [
            date(2015, 1, 1),
            date(2019, 1, 1),
            date(2020, 3, 17),
            date(2020, 5, 30),
            date(2020, 5, 31),
        ] {
            let (_, registry) = registry(exchange.clone(), floor);
            let found = registry.find_earliest_available(&eth(), now()).await.unwrap();
            assert_eq!(found, midnight(listing), "floor {}", floor);
        }
    }

    #[tokio::test]
    async fn test_fast_path_when_floor_has_data() {
        let exchange = Arc::new(
            SimulatedExchange::new().with_listing(eth(), midnight(date(2016, 5, 18))),
        );
        let (_, registry) = registry(exchange.clone(), date(2020, 6, 1));

        let found = registry.find_earliest_available(&eth(), now()).await.unwrap();
        assert_eq!(found, midnight(date(2020, 6, 1)));
        assert_eq!(exchange.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_probe_errors_count_as_empty() {
        let listing = date(2020, 6, 1);
        let exchange = Arc::new(SimulatedExchange::new().with_listing(eth(), midnight(listing)));
        // 하한 날짜 탐색이 두 번 모두 실패
        exchange.fail_next(ExchangeError::NetworkError("reset".into()));
        exchange.fail_next(ExchangeError::NetworkError("reset".into()));

        let (_, registry) = registry(exchange.clone(), date(2019, 1, 1));
        let found = registry.find_earliest_available(&eth(), now()).await.unwrap();
        assert_eq!(found, midnight(listing));
    }

    #[tokio::test]
    async fn test_all_probes_failing_is_exhausted() {
        let exchange = Arc::new(SimulatedExchange::new().with_listing(eth(), midnight(date(2020, 6, 1))));
        exchange.break_product(eth(), ExchangeError::ProductNotFound("NotFound".into()));

        let (_, registry) = registry(exchange, date(2019, 1, 1));
        let err = registry.find_earliest_available(&eth(), now()).await.unwrap_err();
        assert!(matches!(err, CollectorError::DiscoveryExhausted { .. }));
    }

    #[tokio::test]
    async fn test_failed_discovery_is_not_repeated() {
        let exchange = Arc::new(SimulatedExchange::new().with_listing(eth(), midnight(date(2020, 6, 1))));
        exchange.break_product(eth(), ExchangeError::NetworkError("reset".into()));
        let (store, registry) = registry(exchange.clone(), date(2019, 1, 1));
        let registry = Arc::new(registry);

        // 같은 상품의 채널 여럿이 동시에 요청
        let mut handles = Vec::new();
        for _ in 0..3 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move { registry.product_start(&eth(), now()).await }));
        }
        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert!(matches!(err, CollectorError::DiscoveryFailed { .. }));
        }
        let searched = exchange.requests_for(&eth(), Granularity::OneDay).len();
        assert!(searched > 0);

        // 이후 요청도 거래소를 다시 조회하지 않음
        let err = registry.product_start(&eth(), now()).await.unwrap_err();
        assert!(err.to_string().contains("ETH-USD"));
        assert_eq!(exchange.requests_for(&eth(), Granularity::OneDay).len(), searched);
        assert_eq!(store.load_start(&eth()).await.unwrap(), None);

        // reset 후에는 다시 탐색
        registry.init_tables(&[], true).await.unwrap();
        assert!(registry.product_start(&eth(), now()).await.is_err());
        assert!(exchange.requests_for(&eth(), Granularity::OneDay).len() > searched);
    }

    #[tokio::test]
    async fn test_floor_not_before_now_is_config_error() {
        let exchange = Arc::new(SimulatedExchange::new().with_listing(eth(), midnight(date(2020, 6, 1))));
        let (_, registry) = registry(exchange, date(2024, 3, 15));

        let err = registry.find_earliest_available(&eth(), now()).await.unwrap_err();
        assert!(matches!(err, CollectorError::Config(_)));
    }

    #[tokio::test]
    async fn test_product_start_is_discovered_once_and_persisted() {
        let listing = midnight(date(2020, 6, 1));
        let exchange = Arc::new(SimulatedExchange::new().with_listing(eth(), listing));
        let (store, registry) = registry(exchange.clone(), date(2019, 1, 1));
        let registry = Arc::new(registry);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.product_start(&eth(), now()).await.unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), listing);
        }

        let probes = exchange.requests().len();
        assert_eq!(store.load_start(&eth()).await.unwrap(), Some(listing));

        // 새 registry도 저장된 값을 사용하므로 거래소를 다시 조회하지 않음
        let limiter = Arc::new(RateLimiter::new(10_000, std::time::Duration::from_secs(1)));
        let again = SeriesRegistry::new(
            store.clone(),
            store.clone(),
            exchange.clone(),
            limiter,
            DiscoveryConfig::default(),
        );
        assert_eq!(again.product_start(&eth(), now()).await.unwrap(), listing);
        assert_eq!(exchange.requests().len(), probes);
    }

    #[tokio::test]
    async fn test_init_tables_and_reset() {
        let exchange = Arc::new(SimulatedExchange::new());
        let (store, registry) = registry(exchange, date(2019, 1, 1));
        let channel = Channel::new(eth(), Granularity::OneHour);
        let table = channel.table_name();

        registry.init_tables(std::slice::from_ref(&channel), false).await.unwrap();
        assert!(store.has_table(&table).await.unwrap());

        let row = SimulatedExchange::candle_at(Granularity::OneHour, midnight(date(2020, 6, 1)));
        store.insert(&table, &[row]).await.unwrap();
        store.save_start(&eth(), midnight(date(2020, 6, 1))).await.unwrap();

        // reset 없이 다시 초기화해도 데이터 유지
        registry.init_tables(std::slice::from_ref(&channel), false).await.unwrap();
        assert_eq!(store.count(&table).await.unwrap(), 1);

        registry.init_tables(std::slice::from_ref(&channel), true).await.unwrap();
        assert_eq!(store.count(&table).await.unwrap(), 0);
        assert_eq!(store.load_start(&eth()).await.unwrap(), None);
    }

    #[test]
    fn test_channels_expand_products_and_granularities() {
        let collector = CollectorSection {
            products: vec![eth(), ProductId::new("BTC-USD").unwrap()],
            granularities: vec![Granularity::OneMinute, Granularity::OneDay],
        };
        let list = channels(&collector);
        assert_eq!(list.len(), 4);
        assert_eq!(list[0], Channel::new(eth(), Granularity::OneMinute));
        assert_eq!(list[3].table_name(), "candle_btc_usd_86400");
    }
}
