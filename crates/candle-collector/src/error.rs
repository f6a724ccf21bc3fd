//! 에러 타입 정의.

use candle_core::{CoreError, ProductId};
use candle_data::DataError;
use candle_exchange::ExchangeError;
use thiserror::Error;

/// Collector 에러 타입
#[derive(Debug, Error)]
pub enum CollectorError {
    /// 설정 에러
    #[error("Configuration error: {0}")]
    Config(String),

    /// 저장소 에러
    #[error("Storage error: {0}")]
    Storage(#[from] DataError),

    /// 거래소 에러
    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    /// 모든 탐색 요청이 실패함
    #[error("Discovery exhausted for {product}: all {probes} probes failed")]
    DiscoveryExhausted { product: ProductId, probes: u32 },

    /// 이번 실행에서 이미 실패한 탐색 (재탐색하지 않음)
    #[error("Discovery failed for {product}: {reason}")]
    DiscoveryFailed { product: ProductId, reason: String },
}

impl From<CoreError> for CollectorError {
    fn from(err: CoreError) -> Self {
        Self::Config(err.to_string())
    }
}

/// 윈도우 조회 실패.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// 같은 윈도우를 다시 시도할 수 있음 (네트워크, 타임아웃, 요청 한도, 5xx)
    #[error("Transient fetch error: {0}")]
    Transient(ExchangeError),

    /// 다시 시도해도 실패함 (상품 없음, 잘못된 요청, 파싱 실패)
    #[error("Permanent fetch error: {0}")]
    Permanent(ExchangeError),
}

impl FetchError {
    /// 재시도 가능 여부
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

impl From<ExchangeError> for FetchError {
    fn from(err: ExchangeError) -> Self {
        if err.is_retryable() {
            FetchError::Transient(err)
        } else {
            FetchError::Permanent(err)
        }
    }
}

/// 배치 쓰기 실패.
///
/// 고유 제약 충돌은 Reconciler 내부에서 해소되므로 여기에 나타나지 않습니다.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// 충돌 이외의 저장소 에러
    #[error("Write failed: {0}")]
    Storage(DataError),

    /// 충돌 해소 재시도 한도 초과
    #[error("Unique conflicts persisted after {rounds} rounds")]
    ConflictRoundsExceeded { rounds: u32 },
}

/// 채널 단위 실패 원인.
///
/// 한 채널의 실패는 다른 채널에 영향을 주지 않습니다.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// 시작일 탐색 실패
    #[error("Discovery failed: {0}")]
    Discovery(CollectorError),

    /// 윈도우 조회 실패
    #[error("{error} (after {attempts} attempts)")]
    Fetch { error: FetchError, attempts: u32 },

    /// 쓰기 실패
    #[error("{0}")]
    Write(#[from] ReconcileError),

    /// 커서 조회 실패
    #[error("Cursor read failed: {0}")]
    Cursor(DataError),
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, CollectorError>;
