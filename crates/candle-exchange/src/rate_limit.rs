//! 거래소 요청 rate limiter.
//!
//! 프로세스 전체의 모든 거래소 요청(백필 조회, 시작일 탐색, 실시간 폴링)이
//! 하나의 limiter를 공유합니다. k번째 요청은 `start + k * interval / requests`
//! 시각에 통과하므로(첫 요청도 한 간격을 기다림) K개의 요청은
//! `ceil(K / requests)`개 구간보다 빨리 끝나지 않습니다.

use candle_core::RateLimitConfig;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// 고정 간격 요청 게이트.
#[derive(Debug)]
pub struct RateLimiter {
    requests: u32,
    interval: Duration,
    spacing: Duration,
    /// 마지막으로 내준 슬롯
    last_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// `interval`당 최대 `requests`개를 허용하는 limiter 생성.
    ///
    /// `requests`가 0이면 1로 취급합니다.
    pub fn new(requests: u32, interval: Duration) -> Self {
        let requests = requests.max(1);
        let nanos = interval.as_nanos().div_ceil(requests as u128);
        let spacing = Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX));

        Self {
            requests,
            interval,
            spacing,
            last_slot: Mutex::new(None),
        }
    }

    /// 설정에서 limiter 생성.
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.requests, config.interval())
    }

    /// 구간당 허용 요청 수.
    pub fn requests(&self) -> u32 {
        self.requests
    }

    /// 기준 구간 길이.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// 요청 슬롯을 하나 얻을 때까지 대기합니다.
    ///
    /// 대기 중인 호출자는 도착 순서대로 통과합니다. 통과가 허용된 시각을 반환합니다.
    pub async fn acquire(&self) -> Instant {
        // 대기하는 동안 잠금을 유지해야 뒤에 온 호출자가 앞지르지 못함
        let mut last = self.last_slot.lock().await;
        let now = Instant::now();
        let base = match *last {
            Some(at) if at > now => at,
            _ => now,
        };
        let slot = base + self.spacing;
        *last = Some(slot);

        trace!(wait_ms = (slot - now).as_millis() as u64, "rate limiter 대기");
        tokio::time::sleep_until(slot).await;
        slot
    }
}
