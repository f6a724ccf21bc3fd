//! 캔들 백필 및 실시간 수집기.
//!
//! 이 crate는 수집 파이프라인과 이를 실행하는 바이너리를 제공합니다:
//! - 채널 등록 및 상품 시작일 탐색 (`SeriesRegistry`)
//! - 조회 윈도우 분할 (`WindowPlanner`)
//! - rate limit 하의 윈도우 조회 (`Fetcher`)
//! - 고유 제약 충돌 해소 쓰기 (`Reconciler`)
//! - 채널별 백필 상태 기계 (`BackfillCoordinator`)
//! - 백필 이후 실시간 수신 (`LiveListener`)

pub mod error;
pub mod modules;
pub mod stats;

pub use error::{ChannelError, CollectorError, FetchError, ReconcileError, Result};
pub use modules::*;
pub use stats::{BackfillReport, ChannelOutcome, ChannelReport, ChannelStats};
