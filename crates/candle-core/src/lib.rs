//! # Candle Core
//!
//! 캔들 수집 파이프라인의 핵심 도메인 모델 및 타입을 제공합니다.
//!
//! 이 크레이트는 워크스페이스 전반에서 사용되는 기본 타입을 제공합니다:
//! - 캔들 해상도(`Granularity`)와 상품 식별자(`ProductId`)
//! - 채널(상품 × 해상도)과 저장 커서
//! - 캔들 레코드
//! - 설정 관리
//! - 로깅 인프라

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod types;

pub use config::*;
pub use domain::*;
pub use error::*;
pub use logging::*;
pub use types::*;
