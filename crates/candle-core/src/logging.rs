//! 수집기 로그 초기화.
//!
//! 출력 형식(`pretty`, `json`, `compact`)과 필터를 한 곳에서 정합니다.
//! 채널 작업은 `channel_span!`으로 감싸 product/granularity 필드가 모든 이벤트에 붙습니다.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{
    filter::{Directive, ParseError},
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// 출력 형식. 설정 파일에서는 소문자 이름을 씁니다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    /// 로그 수집기로 보낼 때
    Json,
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            other => Err(format!("log format must be pretty, json or compact (got `{}`)", other)),
        }
    }
}

/// HTTP/DB 의존성의 기본 레벨. 사용자가 직접 지정한 대상은 건드리지 않습니다.
const QUIET_TARGETS: &[(&str, &str)] = &[
    ("sqlx", "warn"),
    ("hyper", "warn"),
    ("hyper_util", "warn"),
    ("reqwest", "warn"),
    ("rustls", "warn"),
];

/// `init_logging` 입력.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// `EnvFilter` 문법 (예: "info", "candle_collector=debug")
    pub level: String,
    pub format: LogFormat,
    /// span 종료 시 소요 시간 출력 (채널 백필 span 단위)
    pub span_timing: bool,
}

impl LogConfig {
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Default::default()
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// span 소요 시간 출력 여부를 설정합니다.
    pub fn with_span_timing(mut self, enabled: bool) -> Self {
        self.span_timing = enabled;
        self
    }
}

/// 레벨 문자열에서 필터를 만듭니다.
///
/// 레벨 문자열에 없는 의존성 대상은 `QUIET_TARGETS`의 레벨로 낮춥니다.
pub fn build_filter(level: &str) -> Result<EnvFilter, ParseError> {
    let level = if level.trim().is_empty() { "info" } else { level };
    let mut filter = EnvFilter::try_new(level)?;
    for (target, quiet) in QUIET_TARGETS {
        let mentioned = level
            .split(',')
            .any(|d| d.trim().split('=').next() == Some(*target));
        if !mentioned {
            filter = filter.add_directive(format!("{}={}", target, quiet).parse::<Directive>()?);
        }
    }
    Ok(filter)
}

/// 전역 subscriber 설치. 프로세스당 한 번만 성공합니다.
///
/// `RUST_LOG`가 비어 있지 않으면 `config.level` 대신 사용합니다.
///
/// ```no_run
/// use candle_core::logging::{init_logging, LogConfig, LogFormat};
///
/// init_logging(LogConfig::new("info,candle_collector=debug").with_format(LogFormat::Json))
///     .expect("logging");
/// ```
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(env) if !env.trim().is_empty() => build_filter(&env)?,
        _ => build_filter(&config.level)?,
    };

    let span_events = if config.span_timing {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = match config.format {
        LogFormat::Pretty => fmt::layer().pretty().with_span_events(span_events).boxed(),
        // 채널 span 필드(product, granularity)를 매 이벤트에 포함
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_span_events(span_events)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(false)
            .with_span_events(span_events)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()?;

    tracing::info!(format = ?config.format, level = %config.level, "로깅 초기화");
    Ok(())
}

/// 채널 컨텍스트 필드가 포함된 span을 생성하는 매크로.
#[macro_export]
macro_rules! channel_span {
    ($name:expr, $channel:expr) => {
        tracing::info_span!(
            $name,
            product = %$channel.product,
            granularity = %$channel.granularity
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parses_config_names() {
        assert_eq!(" Pretty ".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert!("xml".parse::<LogFormat>().unwrap_err().contains("xml"));
    }

    #[test]
    fn test_span_timing_off_by_default() {
        let config = LogConfig::new("warn").with_format(LogFormat::Compact);
        assert_eq!(config.level, "warn");
        assert_eq!(config.format, LogFormat::Compact);
        assert!(!config.span_timing);
        assert!(config.with_span_timing(true).span_timing);
    }

    #[test]
    fn test_filter_quiets_dependencies() {
        let filter = build_filter("info").unwrap().to_string();
        assert!(filter.contains("sqlx=warn"));
        assert!(filter.contains("reqwest=warn"));
    }

    #[test]
    fn test_filter_keeps_explicit_dependency_level() {
        let filter = build_filter("info,sqlx=debug").unwrap().to_string();
        assert!(filter.contains("sqlx=debug"));
        assert!(!filter.contains("sqlx=warn"));
    }

    #[test]
    fn test_filter_rejects_garbage() {
        assert!(build_filter("info,sqlx=loud").is_err());
    }
}
