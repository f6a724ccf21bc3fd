//! 거래소 캔들 데이터 소스.
//!
//! 이 크레이트는 다음을 제공합니다:
//! - `CandleSource` / `CandleFeed` trait: 윈도우 조회와 실시간 수신 인터페이스
//! - Coinbase Exchange REST 커넥터
//! - 폴링 기반 실시간 캔들 피드
//! - 시뮬레이션 거래소 (테스트용)
//! - 모든 채널이 공유하는 요청 rate limiter

pub mod connector;
pub mod error;
pub mod rate_limit;
pub mod simulated;
pub mod stream;
pub mod traits;

pub use connector::coinbase::{CoinbaseClient, CoinbaseConfig};
pub use error::*;
pub use rate_limit::RateLimiter;
pub use simulated::{CandleRequest, SimulatedExchange};
pub use stream::PollingCandleFeed;
pub use traits::*;
