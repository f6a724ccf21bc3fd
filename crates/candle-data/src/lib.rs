//! 캔들 데이터 저장.
//!
//! 이 crate는 다음을 제공합니다:
//! - 채널별 캔들 테이블 저장소 trait (`CandleStore`)
//! - 상품 시작일 저장소 trait (`ProductStartStore`)
//! - PostgreSQL 구현
//! - 인메모리 구현 (테스트용)

pub mod error;
pub mod storage;

pub use error::{DataError, Result};
pub use storage::memory::MemoryStore;
pub use storage::postgres::{Database, PgCandleStore};
pub use storage::{validate_identifier, CandleStore, ProductStartStore, PRODUCTS_TABLE};
