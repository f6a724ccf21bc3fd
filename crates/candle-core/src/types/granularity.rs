//! 캔들 해상도(granularity) 정의.
//!
//! 거래소가 제공하는 고정된 캔들 간격 집합을 초 단위로 표현합니다.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// 캔들 해상도.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Granularity {
    /// 1분봉
    OneMinute,
    /// 5분봉
    FiveMinutes,
    /// 15분봉
    FifteenMinutes,
    /// 1시간봉
    OneHour,
    /// 6시간봉
    SixHours,
    /// 일봉
    OneDay,
}

impl Granularity {
    /// 지원하는 모든 해상도 (짧은 순).
    pub const ALL: [Granularity; 6] = [
        Granularity::OneMinute,
        Granularity::FiveMinutes,
        Granularity::FifteenMinutes,
        Granularity::OneHour,
        Granularity::SixHours,
        Granularity::OneDay,
    ];

    /// 초 단위 값을 반환합니다.
    pub fn as_secs(&self) -> i64 {
        match self {
            Granularity::OneMinute => 60,
            Granularity::FiveMinutes => 300,
            Granularity::FifteenMinutes => 900,
            Granularity::OneHour => 3_600,
            Granularity::SixHours => 21_600,
            Granularity::OneDay => 86_400,
        }
    }

    /// 캔들 한 개의 기간을 반환합니다.
    pub fn duration(&self) -> Duration {
        Duration::seconds(self.as_secs())
    }

    /// 로그에 쓰는 짧은 라벨.
    pub fn label(&self) -> &'static str {
        match self {
            Granularity::OneMinute => "1m",
            Granularity::FiveMinutes => "5m",
            Granularity::FifteenMinutes => "15m",
            Granularity::OneHour => "1hr",
            Granularity::SixHours => "6hr",
            Granularity::OneDay => "1d",
        }
    }

    /// 초 단위 값에서 해상도를 찾습니다.
    pub fn from_secs(secs: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|g| g.as_secs() == secs)
    }

    /// 라벨에서 해상도를 찾습니다.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "1m" => Some(Granularity::OneMinute),
            "5m" => Some(Granularity::FiveMinutes),
            "15m" => Some(Granularity::FifteenMinutes),
            "1h" | "1hr" => Some(Granularity::OneHour),
            "6h" | "6hr" => Some(Granularity::SixHours),
            "1d" => Some(Granularity::OneDay),
            _ => None,
        }
    }

    /// 주어진 시각을 캔들 경계로 내림합니다.
    ///
    /// 아직 형성 중인 캔들의 시작 시각을 반환하므로, 이 값을 구간의 끝으로 쓰면
    /// 닫힌 캔들만 포함됩니다.
    pub fn align_down(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let secs = at.timestamp();
        let aligned = secs - secs.rem_euclid(self.as_secs());
        DateTime::from_timestamp(aligned, 0).unwrap_or(at)
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(secs) = trimmed.parse::<i64>() {
            return Self::from_secs(secs).ok_or_else(|| format!("Invalid granularity: {}", s));
        }
        Self::from_label(trimmed).ok_or_else(|| format!("Invalid granularity: {}", s))
    }
}

impl Serialize for Granularity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_secs())
    }
}

/// 설정 파일에서는 초 단위 숫자와 라벨을 모두 허용합니다.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawGranularity {
    Secs(i64),
    Label(String),
}

impl<'de> Deserialize<'de> for Granularity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawGranularity::deserialize(deserializer)? {
            RawGranularity::Secs(secs) => Granularity::from_secs(secs)
                .ok_or_else(|| serde::de::Error::custom(format!("Invalid granularity: {}", secs))),
            RawGranularity::Label(label) => label.parse().map_err(serde::de::Error::custom),
        }
    }
}
