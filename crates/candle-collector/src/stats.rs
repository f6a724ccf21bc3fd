//! 수집 통계 구조체.

use candle_core::Channel;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// 채널 백필 통계
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChannelStats {
    /// 계획된 윈도우 수
    pub windows_planned: usize,
    /// 완료된 윈도우 수 (조회 + 쓰기)
    pub windows_done: usize,
    /// 거래소에서 받은 캔들 수
    pub fetched: usize,
    /// 새로 저장된 캔들 수
    pub written: usize,
    /// 일시적 실패 후 재시도 횟수
    pub retries: usize,
    /// 소요 시간
    #[serde(skip)]
    pub elapsed: Duration,
}

impl ChannelStats {
    /// 새 통계 객체 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 이미 저장되어 있어 건너뛴 캔들 수
    pub fn skipped(&self) -> usize {
        self.fetched.saturating_sub(self.written)
    }
}

/// 채널 백필 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ChannelOutcome {
    /// 종료 시각까지 모두 저장됨
    Done,
    /// 복구 불가능한 에러로 중단. `[from, to)` 구간이 저장되지 않음
    Failed {
        error: String,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
    /// 종료 신호로 중단. `[from, to)` 구간이 남아 있음
    Interrupted {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
}

/// 채널별 보고
#[derive(Debug, Clone, Serialize)]
pub struct ChannelReport {
    pub channel: Channel,
    pub outcome: ChannelOutcome,
    pub stats: ChannelStats,
}

impl ChannelReport {
    /// 백필 완료 여부
    pub fn is_done(&self) -> bool {
        matches!(self.outcome, ChannelOutcome::Done)
    }

    /// 결과 로그 출력
    pub fn log(&self) {
        let stats = &self.stats;
        match &self.outcome {
            ChannelOutcome::Done => tracing::info!(
                channel = %self.channel,
                windows = stats.windows_done,
                fetched = stats.fetched,
                written = stats.written,
                skipped = stats.skipped(),
                retries = stats.retries,
                elapsed = format!("{:.1}s", stats.elapsed.as_secs_f64()),
                "채널 백필 완료"
            ),
            ChannelOutcome::Failed { error, from, to } => tracing::error!(
                channel = %self.channel,
                error = %error,
                failed_from = %from,
                failed_to = %to,
                windows = stats.windows_done,
                written = stats.written,
                "채널 백필 실패"
            ),
            ChannelOutcome::Interrupted { from, to } => tracing::warn!(
                channel = %self.channel,
                remaining_from = %from,
                remaining_to = %to,
                windows = stats.windows_done,
                written = stats.written,
                "채널 백필 중단"
            ),
        }
    }
}

/// 전체 백필 보고
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackfillReport {
    pub channels: Vec<ChannelReport>,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl BackfillReport {
    /// 완료된 채널 목록
    pub fn done_channels(&self) -> Vec<Channel> {
        self.channels
            .iter()
            .filter(|r| r.is_done())
            .map(|r| r.channel.clone())
            .collect()
    }

    /// 실패한 채널 보고
    pub fn failed(&self) -> impl Iterator<Item = &ChannelReport> {
        self.channels
            .iter()
            .filter(|r| matches!(r.outcome, ChannelOutcome::Failed { .. }))
    }

    /// 채널 보고 조회
    pub fn get(&self, channel: &Channel) -> Option<&ChannelReport> {
        self.channels.iter().find(|r| &r.channel == channel)
    }

    /// 저장된 총 캔들 수
    pub fn total_written(&self) -> usize {
        self.channels.iter().map(|r| r.stats.written).sum()
    }

    /// 통계 요약 로그 출력
    pub fn log_summary(&self, operation: &str) {
        for report in &self.channels {
            report.log();
        }

        let done = self.channels.iter().filter(|r| r.is_done()).count();
        let failed = self.failed().count();
        let interrupted = self.channels.len() - done - failed;

        tracing::info!(
            operation = operation,
            total = self.channels.len(),
            done = done,
            failed = failed,
            interrupted = interrupted,
            total_written = self.total_written(),
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "수집 완료"
        );
    }
}
