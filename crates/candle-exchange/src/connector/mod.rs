//! 거래소 커넥터.

pub mod coinbase;

pub use coinbase::*;
