//! Coinbase Exchange 커넥터.
//!
//! 공개 REST API의 과거 캔들 엔드포인트만 사용합니다. 인증이 필요 없습니다.
//!
//! `GET /products/{product_id}/candles?granularity=&start=&end=`
//! 응답은 `[time, low, high, open, close, volume]` 배열의 목록이며 최신순입니다.

use crate::traits::{CandleSource, ExchangeResult};
use crate::ExchangeError;
use async_trait::async_trait;
use candle_core::{Candle, ExchangeConfig, Granularity, ProductId};
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error, warn};

// ============================================================================
// 설정
// ============================================================================

/// Coinbase 클라이언트 설정.
#[derive(Debug, Clone)]
pub struct CoinbaseConfig {
    /// REST API 기본 URL
    pub rest_base_url: String,
    /// 요청 타임아웃 (초)
    pub timeout_secs: u64,
    /// User-Agent 헤더 (Coinbase는 User-Agent 없는 요청을 거부함)
    pub user_agent: String,
}

impl Default for CoinbaseConfig {
    fn default() -> Self {
        Self::from_settings(&ExchangeConfig::default())
    }
}

impl CoinbaseConfig {
    /// 애플리케이션 설정에서 생성.
    pub fn from_settings(settings: &ExchangeConfig) -> Self {
        Self {
            rest_base_url: settings.rest_base_url.trim_end_matches('/').to_string(),
            timeout_secs: settings.timeout_secs,
            user_agent: settings.user_agent.clone(),
        }
    }

    /// 기본 URL 변경 (테스트 서버 등).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.rest_base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

// ============================================================================
// 응답 타입
// ============================================================================

/// 캔들 배열 한 행: `[time, low, high, open, close, volume]`.
#[derive(Debug, Deserialize)]
struct CoinbaseCandle(
    i64,
    serde_json::Number,
    serde_json::Number,
    serde_json::Number,
    serde_json::Number,
    serde_json::Number,
);

#[derive(Debug, Deserialize)]
struct CoinbaseError {
    message: String,
}

// ============================================================================
// 클라이언트
// ============================================================================

/// Coinbase Exchange REST 클라이언트.
pub struct CoinbaseClient {
    config: CoinbaseConfig,
    client: Client,
}

impl CoinbaseClient {
    /// 새 클라이언트 생성.
    pub fn new(config: CoinbaseConfig) -> ExchangeResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| {
                ExchangeError::NetworkError(format!("HTTP 클라이언트 생성 실패: {}", e))
            })?;

        Ok(Self { config, client })
    }

    /// 설정 반환.
    pub fn config(&self) -> &CoinbaseConfig {
        &self.config
    }

    fn build_query(params: &[(&str, String)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }

    fn format_time(at: DateTime<Utc>) -> String {
        // `+00:00` 대신 `Z`를 써야 쿼리 문자열에서 인코딩 문제가 없음
        at.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// 공개 API 요청.
    async fn public_get<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> ExchangeResult<T> {
        let url = format!("{}{}", self.config.rest_base_url, endpoint);
        let query = Self::build_query(params);

        let full_url = if query.is_empty() {
            url
        } else {
            format!("{}?{}", url, query)
        };

        debug!("GET {}", full_url);

        let response = self.client.get(&full_url).send().await?;

        self.handle_response(response).await
    }

    async fn handle_response<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
    ) -> ExchangeResult<T> {
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            serde_json::from_str(&body).map_err(|e| {
                error!("Failed to parse response: {} - Body: {}", e, body);
                ExchangeError::ParseError(e.to_string())
            })
        } else {
            let message = serde_json::from_str::<CoinbaseError>(&body)
                .map(|e| e.message)
                .unwrap_or(body);
            Err(Self::map_status(status, message))
        }
    }

    /// HTTP 상태 코드를 ExchangeError로 매핑.
    fn map_status(status: StatusCode, message: String) -> ExchangeError {
        match status {
            StatusCode::TOO_MANY_REQUESTS => ExchangeError::RateLimited,
            StatusCode::NOT_FOUND => ExchangeError::ProductNotFound(message),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                ExchangeError::Unauthorized(message)
            }
            StatusCode::REQUEST_TIMEOUT => ExchangeError::Timeout(message),
            s if s.is_server_error() => ExchangeError::ServerError {
                status: s.as_u16(),
                message,
            },
            s => ExchangeError::ApiError {
                code: s.as_u16() as i32,
                message,
            },
        }
    }

    fn parse_decimal(value: &serde_json::Number) -> ExchangeResult<Decimal> {
        let raw = value.to_string();
        Decimal::from_str(&raw)
            .or_else(|_| Decimal::from_scientific(&raw))
            .map_err(|e| ExchangeError::ParseError(format!("잘못된 숫자 '{}': {}", raw, e)))
    }

    fn parse_candle(row: CoinbaseCandle) -> ExchangeResult<Candle> {
        let CoinbaseCandle(time, low, high, open, close, volume) = row;
        let open_time = DateTime::from_timestamp(time, 0)
            .ok_or_else(|| ExchangeError::ParseError(format!("잘못된 타임스탬프: {}", time)))?;

        Ok(Candle::new(
            open_time,
            Self::parse_decimal(&open)?,
            Self::parse_decimal(&high)?,
            Self::parse_decimal(&low)?,
            Self::parse_decimal(&close)?,
            Self::parse_decimal(&volume)?,
        ))
    }
}

#[async_trait]
impl CandleSource for CoinbaseClient {
    fn name(&self) -> &str {
        "coinbase"
    }

    async fn get_candles(
        &self,
        product: &ProductId,
        granularity: Granularity,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ExchangeResult<Vec<Candle>> {
        let endpoint = format!("/products/{}/candles", product.as_str());
        let params = [
            ("granularity", granularity.as_secs().to_string()),
            ("start", Self::format_time(start)),
            ("end", Self::format_time(end)),
        ];

        let rows: Vec<CoinbaseCandle> = self.public_get(&endpoint, &params).await?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            let candle = Self::parse_candle(row)?;
            if !candle.is_well_formed() {
                warn!(
                    product = %product,
                    open_time = %candle.open_time,
                    "비정상 캔들 무시"
                );
                continue;
            }
            candles.push(candle);
        }

        debug!(
            product = %product,
            granularity = %granularity,
            count = candles.len(),
            "캔들 조회 완료"
        );
        Ok(candles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn client_for(server: &mockito::ServerGuard) -> CoinbaseClient {
        let config = CoinbaseConfig::default().with_base_url(server.url());
        CoinbaseClient::new(config).unwrap()
    }

    fn product() -> ProductId {
        ProductId::new("ETH-USD").unwrap()
    }

    #[tokio::test]
    async fn test_get_candles_parses_rows() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/products/ETH-USD/candles")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("granularity".into(), "60".into()),
                mockito::Matcher::UrlEncoded("start".into(), "2020-06-01T00:00:00Z".into()),
                mockito::Matcher::UrlEncoded("end".into(), "2020-06-01T00:02:00Z".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("[[1590969660,230.1,231.5,230.5,231.0,12.5],[1590969600,229.0,230.9,229.5,230.5,0.00001234]]")
            .create_async()
            .await;

        let client = client_for(&server);
        let start = Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2020, 6, 1, 0, 2, 0).unwrap();
        let candles = client
            .get_candles(&product(), Granularity::OneMinute, start, end)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(candles.len(), 2);

        let newest = &candles[0];
        assert_eq!(newest.open_time, Utc.timestamp_opt(1590969660, 0).unwrap());
        assert_eq!(newest.low, dec!(230.1));
        assert_eq!(newest.high, dec!(231.5));
        assert_eq!(newest.open, dec!(230.5));
        assert_eq!(newest.close, dec!(231.0));
        assert_eq!(newest.volume, dec!(12.5));

        assert_eq!(candles[1].volume, dec!(0.00001234));
    }

    #[tokio::test]
    async fn test_error_status_mapping() {
        let mut server = mockito::Server::new_async().await;
        let _rate = server
            .mock("GET", "/products/ETH-USD/candles")
            .match_query(mockito::Matcher::Any)
            .with_status(429)
            .with_body(r#"{"message":"Public rate limit exceeded"}"#)
            .create_async()
            .await;
        let _missing = server
            .mock("GET", "/products/FOO-BAR/candles")
            .match_query(mockito::Matcher::Any)
            .with_status(404)
            .with_body(r#"{"message":"NotFound"}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let at = Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap();

        let err = client
            .get_candles(&product(), Granularity::OneMinute, at, at)
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::RateLimited));
        assert!(err.is_retryable());

        let foo = ProductId::new("FOO-BAR").unwrap();
        let err = client
            .get_candles(&foo, Granularity::OneMinute, at, at)
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::ProductNotFound(ref m) if m == "NotFound"));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_server_error_is_retryable_and_bad_request_is_not() {
        let mut server = mockito::Server::new_async().await;
        let _bad = server
            .mock("GET", "/products/ETH-USD/candles")
            .match_query(mockito::Matcher::UrlEncoded("granularity".into(), "60".into()))
            .with_status(400)
            .with_body(r#"{"message":"granularity too small for the requested time range"}"#)
            .create_async()
            .await;
        let _down = server
            .mock("GET", "/products/ETH-USD/candles")
            .match_query(mockito::Matcher::UrlEncoded("granularity".into(), "300".into()))
            .with_status(503)
            .with_body("upstream unavailable")
            .create_async()
            .await;

        let client = client_for(&server);
        let at = Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap();

        let err = client
            .get_candles(&product(), Granularity::OneMinute, at, at)
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::ApiError { code: 400, .. }));
        assert!(!err.is_retryable());

        let err = client
            .get_candles(&product(), Granularity::FiveMinutes, at, at)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExchangeError::ServerError { status: 503, ref message } if message == "upstream unavailable"
        ));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_malformed_body_is_parse_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/products/ETH-USD/candles")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"{"unexpected":"shape"}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let at = Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap();
        let err = client
            .get_candles(&product(), Granularity::OneMinute, at, at)
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::ParseError(_)));
    }
}
