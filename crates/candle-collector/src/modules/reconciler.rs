//! 고유 제약 충돌을 해소하는 배치 쓰기.
//!
//! 같은 시각의 캔들이 이미 저장되어 있으면 배치 삽입 전체가 실패합니다.
//! 이때 저장소에서 배치 구간을 다시 읽어 없는 캔들만 골라 재시도합니다.
//! 같은 배치를 여러 번 써도 결과가 같습니다.

use crate::error::ReconcileError;
use candle_core::{sort_dedup_candles, Candle, Channel};
use candle_data::CandleStore;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// 채널 배치 writer.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn CandleStore>,
    max_conflict_rounds: u32,
}

impl Reconciler {
    /// 새 reconciler 생성.
    pub fn new(store: Arc<dyn CandleStore>, max_conflict_rounds: u32) -> Self {
        Self {
            store,
            max_conflict_rounds: max_conflict_rounds.max(1),
        }
    }

    /// 캔들 배치를 채널 테이블에 씁니다. 새로 저장된 행 수를 반환합니다.
    ///
    /// 빈 배치는 저장소를 건드리지 않습니다.
    #[instrument(skip(self, channel, records), fields(channel = %channel, count = records.len()))]
    pub async fn write(
        &self,
        channel: &Channel,
        records: Vec<Candle>,
    ) -> Result<usize, ReconcileError> {
        if records.is_empty() {
            return Ok(0);
        }

        let table = channel.table_name();
        let mut pending = records;
        sort_dedup_candles(&mut pending);

        let mut rounds = 0;
        loop {
            let err = match self.store.insert(&table, &pending).await {
                Ok(inserted) => {
                    if rounds > 0 {
                        info!(
                            channel = %channel,
                            inserted = inserted,
                            rounds = rounds,
                            "충돌 해소 후 누락분 저장"
                        );
                    }
                    return Ok(inserted);
                }
                Err(e) if e.is_unique_violation() => e,
                Err(e) => return Err(ReconcileError::Storage(e)),
            };

            if rounds >= self.max_conflict_rounds {
                return Err(ReconcileError::ConflictRoundsExceeded { rounds });
            }
            rounds += 1;

            let (Some(first), Some(last)) = (pending.first(), pending.last()) else {
                return Ok(0);
            };
            let stored = self
                .store
                .select_range(&table, first.open_time, last.open_time)
                .await
                .map_err(ReconcileError::Storage)?;
            let stored_times: HashSet<_> = stored.iter().map(|c| c.open_time).collect();

            let before = pending.len();
            pending.retain(|c| !stored_times.contains(&c.open_time));

            debug!(
                channel = %channel,
                error = %err,
                stored = stored.len(),
                batch = before,
                missing = pending.len(),
                "고유 제약 충돌, 누락분 계산"
            );

            // 저장된 행 수가 배치와 같고 모든 시각이 존재하면 이미 반영된 배치
            if pending.is_empty() {
                return Ok(0);
            }
        }
    }
}
