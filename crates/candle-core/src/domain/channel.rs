//! 수집 채널과 저장 커서.
//!
//! 채널은 (상품, 해상도) 한 쌍이며 자신만의 저장 테이블과 커서를 가집니다.

use crate::types::{Granularity, ProductId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 캔들 테이블 이름 접두사.
pub const CANDLE_TABLE_PREFIX: &str = "candle";

/// 수집 채널 (상품 × 해상도).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Channel {
    /// 거래 상품
    pub product: ProductId,
    /// 캔들 해상도
    pub granularity: Granularity,
}

impl Channel {
    /// 새 채널을 생성합니다.
    pub fn new(product: ProductId, granularity: Granularity) -> Self {
        Self {
            product,
            granularity,
        }
    }

    /// 이 채널의 저장 테이블 이름 (예: `candle_eth_usd_60`).
    pub fn table_name(&self) -> String {
        format!(
            "{}_{}_{}",
            CANDLE_TABLE_PREFIX,
            self.product.table_fragment(),
            self.granularity.as_secs()
        )
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.product, self.granularity)
    }
}

/// 채널에 이미 저장된 연속 구간.
///
/// 항상 저장소 조회 결과로부터 만들어지며 메모리에 따로 보관하지 않습니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// 가장 오래된 저장 캔들의 시작 시간
    pub covered_from: DateTime<Utc>,
    /// 가장 최근 저장 캔들의 시작 시간
    pub covered_to: DateTime<Utc>,
}

impl Cursor {
    /// 저장소의 양 끝 값에서 커서를 만듭니다.
    ///
    /// 둘 중 하나라도 없으면 저장된 데이터가 없는 것으로 봅니다.
    pub fn from_extremes(
        oldest: Option<DateTime<Utc>>,
        newest: Option<DateTime<Utc>>,
    ) -> Option<Self> {
        match (oldest, newest) {
            (Some(covered_from), Some(covered_to)) => Some(Self {
                covered_from,
                covered_to,
            }),
            _ => None,
        }
    }
}
