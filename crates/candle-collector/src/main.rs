//! Candle collector CLI.

use anyhow::Context;
use candle_collector::Collector;
use candle_core::{init_logging, AppConfig, LogConfig, ProductId};
use candle_data::{Database, PgCandleStore};
use candle_exchange::{CoinbaseClient, CoinbaseConfig, PollingCandleFeed, RateLimiter};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "candle-collector")]
#[command(about = "Candle backfill-and-reconcile collector", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 설정 파일 경로 (기본: config/default.toml, 없으면 무시)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 로그 레벨 (trace, debug, info, warn, error). 설정 파일보다 우선
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// 백필 후 실시간 수신 (종료 신호까지 실행)
    Run,

    /// 백필만 실행
    Backfill,

    /// 상품 시작일 탐색
    Discover {
        /// 대상 상품 (쉼표로 구분, 예: "ETH-USD,BTC-USD"). 기본은 설정의 상품 목록
        #[arg(long)]
        products: Option<String>,
    },

    /// 채널별 저장 상태 출력
    Status,

    /// 채널 테이블과 상품 시작일 초기화
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();
    let config = AppConfig::load(cli.config.as_deref()).context("설정 로드 실패")?;

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    init_logging(
        LogConfig::new(level)
            .with_format(config.logging.format)
            .with_span_timing(config.logging.span_timing),
    )
        .map_err(|e| anyhow::anyhow!("로깅 초기화 실패: {}", e))?;

    tracing::info!("Candle Collector 시작");
    tracing::debug!(
        products = ?config.collector.products,
        granularities = ?config.collector.granularities,
        "설정 로드 완료"
    );

    // DB 연결
    let db = Database::connect(&config.database).await?;
    let store = Arc::new(PgCandleStore::new(&db));
    tracing::info!("데이터베이스 연결 성공");

    // 거래소
    let client = Arc::new(CoinbaseClient::new(CoinbaseConfig::from_settings(
        &config.exchange,
    ))?);
    let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
    let feed = Arc::new(PollingCandleFeed::new(
        client.clone(),
        limiter.clone(),
        &config.live,
        config.fetch.max_records_per_request,
    ));

    // 종료 신호
    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("종료 신호 수신, 진행 중인 윈도우를 마치고 종료합니다");
            signal.cancel();
        }
    });

    let collector = Collector::new(
        config.clone(),
        store.clone(),
        store,
        client,
        feed,
        limiter,
        cancel,
    );

    match cli.command {
        Commands::Run => {
            collector.run().await?;
        }
        Commands::Backfill => {
            collector.backfill().await?;
        }
        Commands::Discover { products } => {
            let products = match products {
                Some(list) => list
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ProductId::new)
                    .collect::<Result<Vec<_>, _>>()?,
                None => config.collector.products.clone(),
            };
            let found = collector.discover(&products).await?;
            tracing::info!(requested = products.len(), found = found.len(), "시작일 탐색 완료");
        }
        Commands::Status => {
            for status in collector.status().await? {
                match status.cursor {
                    Some(cursor) => tracing::info!(
                        channel = %status.channel,
                        rows = status.rows,
                        covered_from = %cursor.covered_from,
                        covered_to = %cursor.covered_to,
                        "채널 상태"
                    ),
                    None => tracing::info!(
                        channel = %status.channel,
                        table_exists = status.table_exists,
                        "채널 상태: 저장된 데이터 없음"
                    ),
                }
            }
        }
        Commands::Reset => {
            collector.reset().await?;
        }
    }

    db.pool().close().await;
    tracing::info!("Candle Collector 종료");

    Ok(())
}
