//! 워크스페이스 전반에서 사용되는 공통 타입.

mod granularity;
mod product;

pub use granularity::*;
pub use product::*;

/// 금융 정밀도를 위한 가격 타입.
pub type Price = rust_decimal::Decimal;

/// 거래량 타입.
pub type Volume = rust_decimal::Decimal;
