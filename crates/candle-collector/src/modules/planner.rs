//! 조회 윈도우 분할.
//!
//! 거래소는 요청당 최대 `M`개의 캔들을 반환합니다. 경계 포함 여부에 따라 한 개가
//! 더 포함될 수 있으므로 윈도우 길이는 `(M - 1) × 해상도`로 잡습니다.

use candle_core::Channel;
use chrono::{DateTime, Duration, Utc};

/// 한 번의 거래소 호출로 조회할 구간 `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchWindow {
    pub channel: Channel,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// 구간을 윈도우로 나누는 planner.
#[derive(Debug, Clone, Copy)]
pub struct WindowPlanner {
    max_records: u32,
}

impl WindowPlanner {
    /// 요청당 최대 레코드 수 `max_records`(M)로 생성. 2 미만은 2로 취급합니다.
    pub fn new(max_records: u32) -> Self {
        Self {
            max_records: max_records.max(2),
        }
    }

    /// 채널의 윈도우 최대 길이.
    pub fn window_len(&self, channel: &Channel) -> Duration {
        channel.granularity.duration() * (self.max_records as i32 - 1)
    }

    /// `[start, end)`를 오래된 순서의 윈도우로 분할합니다.
    ///
    /// 윈도우들은 빈틈이나 겹침 없이 구간을 정확히 덮습니다. 마지막 윈도우만
    /// 최대 길이보다 짧을 수 있습니다. `end <= start`이면 빈 목록입니다.
    pub fn plan(
        &self,
        channel: &Channel,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<FetchWindow> {
        if end <= start {
            return Vec::new();
        }

        let len = self.window_len(channel);
        let total = end - start;
        let full = total.num_seconds() / len.num_seconds();
        let has_remainder = total.num_seconds() % len.num_seconds() > 0;

        let mut windows = Vec::with_capacity(full as usize + usize::from(has_remainder));
        let mut cursor = start;
        for _ in 0..full {
            let next = cursor + len;
            windows.push(FetchWindow {
                channel: channel.clone(),
                start: cursor,
                end: next,
            });
            cursor = next;
        }
        if cursor < end {
            windows.push(FetchWindow {
                channel: channel.clone(),
                start: cursor,
                end,
            });
        }
        windows
    }
}
