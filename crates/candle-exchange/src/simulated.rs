//! 시뮬레이션 거래소.
//!
//! 상장일 이후의 모든 캔들을 시각으로부터 결정적으로 생성합니다.
//! 수집 파이프라인의 통합 테스트에 사용합니다.
//!
//! - 요청 구간은 양 끝을 포함하며 구간 내 캔들 수가 `max_records`를 넘으면 400 에러
//! - 일회성/상품별 장애 주입
//! - 모든 조회 요청 기록
//! - 실시간 피드는 `push`로 직접 캔들을 보냄

use crate::traits::{CandleFeed, CandleSource, ExchangeResult};
use crate::ExchangeError;
use async_trait::async_trait;
use candle_core::{Candle, Granularity, ProductId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{error, trace};

/// 거래소 요청당 기본 최대 레코드 수.
pub const DEFAULT_MAX_RECORDS: u32 = 300;

/// 기록된 조회 요청.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandleRequest {
    pub product: ProductId,
    pub granularity: Granularity,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

struct Watcher {
    product: ProductId,
    granularity: Granularity,
    from: DateTime<Utc>,
    tx: mpsc::Sender<Candle>,
}

#[derive(Default)]
struct SimState {
    /// 상품별 첫 캔들 시각
    listings: HashMap<ProductId, DateTime<Utc>>,
    /// 다음 요청들에 순서대로 반환할 에러
    pending_failures: VecDeque<ExchangeError>,
    /// 상품별 고정 에러
    broken: HashMap<ProductId, ExchangeError>,
    requests: Vec<CandleRequest>,
    watchers: Vec<Watcher>,
}

/// 결정적 캔들을 생성하는 가상 거래소.
pub struct SimulatedExchange {
    max_records: u32,
    /// 이 시각 이후 캔들은 아직 존재하지 않음
    available_until: Option<DateTime<Utc>>,
    buffer: usize,
    state: Mutex<SimState>,
}

impl Default for SimulatedExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedExchange {
    /// 상장 상품이 없는 거래소 생성.
    pub fn new() -> Self {
        Self {
            max_records: DEFAULT_MAX_RECORDS,
            available_until: None,
            buffer: 256,
            state: Mutex::new(SimState::default()),
        }
    }

    /// 상품 상장 (첫 캔들 시각 지정).
    pub fn with_listing(self, product: ProductId, first_candle: DateTime<Utc>) -> Self {
        self.lock().listings.insert(product, first_candle);
        self
    }

    /// 요청당 최대 레코드 수 변경.
    pub fn with_max_records(mut self, max_records: u32) -> Self {
        self.max_records = max_records;
        self
    }

    /// 데이터가 존재하는 마지막 시각(제외) 지정.
    pub fn with_available_until(mut self, until: DateTime<Utc>) -> Self {
        self.available_until = Some(until);
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("SimulatedExchange Mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// 다음 요청 하나를 주어진 에러로 실패시킴. 여러 번 호출하면 순서대로 소진됩니다.
    pub fn fail_next(&self, err: ExchangeError) {
        self.lock().pending_failures.push_back(err);
    }

    /// 특정 상품의 모든 요청을 주어진 에러로 실패시킴.
    pub fn break_product(&self, product: ProductId, err: ExchangeError) {
        self.lock().broken.insert(product, err);
    }

    /// 지금까지 받은 조회 요청 목록.
    pub fn requests(&self) -> Vec<CandleRequest> {
        self.lock().requests.clone()
    }

    /// 특정 채널에 대한 조회 요청 목록.
    pub fn requests_for(&self, product: &ProductId, granularity: Granularity) -> Vec<CandleRequest> {
        self.lock()
            .requests
            .iter()
            .filter(|r| &r.product == product && r.granularity == granularity)
            .cloned()
            .collect()
    }

    /// 활성 구독의 (상품, 해상도, 시작 시각) 목록.
    pub fn watches(&self) -> Vec<(ProductId, Granularity, DateTime<Utc>)> {
        self.lock()
            .watchers
            .iter()
            .filter(|w| !w.tx.is_closed())
            .map(|w| (w.product.clone(), w.granularity, w.from))
            .collect()
    }

    /// 시각으로부터 결정적으로 캔들 생성.
    pub fn candle_at(granularity: Granularity, open_time: DateTime<Utc>) -> Candle {
        let bucket = open_time.timestamp() / granularity.as_secs();
        let base = Decimal::from(1_000 + bucket.rem_euclid(50));
        let volume = Decimal::from(1 + bucket.rem_euclid(7));

        Candle::new(
            open_time,
            base,
            base + Decimal::from(2),
            base - Decimal::ONE,
            base + Decimal::ONE,
            volume,
        )
    }

    /// 구독 중인 수신자에게 캔들 전달.
    ///
    /// 전달된 구독 수를 반환합니다.
    pub async fn push(&self, product: &ProductId, granularity: Granularity, candle: Candle) -> usize {
        let senders: Vec<_> = {
            let mut state = self.lock();
            state.watchers.retain(|w| !w.tx.is_closed());
            state
                .watchers
                .iter()
                .filter(|w| &w.product == product && w.granularity == granularity)
                .map(|w| w.tx.clone())
                .collect()
        };

        let mut delivered = 0;
        for tx in senders {
            if tx.send(candle.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// 모든 구독 종료.
    pub fn close_feeds(&self) {
        self.lock().watchers.clear();
    }
}

#[async_trait]
impl CandleSource for SimulatedExchange {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn get_candles(
        &self,
        product: &ProductId,
        granularity: Granularity,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ExchangeResult<Vec<Candle>> {
        let listed = {
            let mut state = self.lock();
            state.requests.push(CandleRequest {
                product: product.clone(),
                granularity,
                start,
                end,
            });

            if let Some(err) = state.pending_failures.pop_front() {
                return Err(err);
            }
            if let Some(err) = state.broken.get(product) {
                return Err(err.clone());
            }
            match state.listings.get(product) {
                Some(listed) => *listed,
                None => return Err(ExchangeError::ProductNotFound("NotFound".to_string())),
            }
        };

        if end < start {
            return Err(ExchangeError::ApiError {
                code: 400,
                message: "start must be before end".to_string(),
            });
        }

        let step = granularity.as_secs();
        let requested = (end - start).num_seconds() / step + 1;
        if requested > i64::from(self.max_records) {
            return Err(ExchangeError::ApiError {
                code: 400,
                message: "granularity too small for the requested time range".to_string(),
            });
        }

        // 구간 내 첫 캔들 경계
        let first = {
            let aligned = granularity.align_down(start.max(listed));
            if aligned < start.max(listed) {
                aligned + granularity.duration()
            } else {
                aligned
            }
        };

        let mut candles = Vec::new();
        let mut at = first;
        while at <= end {
            if self.available_until.is_some_and(|until| at >= until) {
                break;
            }
            candles.push(Self::candle_at(granularity, at));
            at += granularity.duration();
        }

        trace!(
            product = %product,
            granularity = %granularity,
            count = candles.len(),
            "시뮬레이션 캔들 생성"
        );

        // 실제 거래소처럼 최신순
        candles.reverse();
        Ok(candles)
    }
}

#[async_trait]
impl CandleFeed for SimulatedExchange {
    async fn watch(
        &self,
        product: &ProductId,
        granularity: Granularity,
        from: DateTime<Utc>,
    ) -> ExchangeResult<mpsc::Receiver<Candle>> {
        let mut state = self.lock();
        if !state.listings.contains_key(product) {
            return Err(ExchangeError::ProductNotFound(product.to_string()));
        }

        let (tx, rx) = mpsc::channel(self.buffer);
        state.watchers.push(Watcher {
            product: product.clone(),
            granularity,
            from,
            tx,
        });
        Ok(rx)
    }
}
