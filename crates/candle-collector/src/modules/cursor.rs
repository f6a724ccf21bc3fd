//! 채널 커서 조회.
//!
//! 커서는 별도로 저장하지 않고 매번 채널 테이블의 양 끝 시각으로부터 계산합니다.
//! 쓰기가 성공해야만 커서가 전진하므로 중단 후 재시작해도 안전합니다.

use candle_core::{Channel, Cursor};
use candle_data::{CandleStore, Result};

/// 채널의 현재 커서. 저장된 캔들이 없으면 `None`.
pub async fn read_cursor(store: &dyn CandleStore, channel: &Channel) -> Result<Option<Cursor>> {
    let table = channel.table_name();
    let oldest = store.select_extreme(&table, false).await?;
    let newest = store.select_extreme(&table, true).await?;
    Ok(Cursor::from_extremes(oldest, newest))
}
