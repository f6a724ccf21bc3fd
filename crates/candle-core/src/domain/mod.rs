//! 도메인 모델.

pub mod candle;
pub mod channel;

pub use candle::*;
pub use channel::*;
