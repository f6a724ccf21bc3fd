//! 데이터 모듈 오류 타입.

use thiserror::Error;

/// 데이터 관련 오류.
#[derive(Debug, Error)]
pub enum DataError {
    /// 데이터베이스 연결 오류
    #[error("Database connection error: {0}")]
    ConnectionError(String),

    /// 쿼리 실행 오류
    #[error("Query error: {0}")]
    QueryError(String),

    /// 시각 키 고유 제약 위반 (배치 전체가 반영되지 않음)
    #[error("Unique violation: {0}")]
    UniqueViolation(String),

    /// 테이블 없음
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// 허용되지 않는 테이블 이름
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// 잘못된 데이터 형식
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// 연결 풀 소진
    #[error("Connection pool exhausted")]
    PoolExhausted,
}

impl DataError {
    /// 고유 제약 위반인지 확인.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, DataError::UniqueViolation(_))
    }
}

impl From<sqlx::Error> for DataError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => DataError::PoolExhausted,
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().unwrap_or_default();
                match code.as_ref() {
                    // PostgreSQL 고유 제약 조건 위반
                    "23505" => DataError::UniqueViolation(db_err.message().to_string()),
                    "42P01" => DataError::TableNotFound(db_err.message().to_string()),
                    "23514" => DataError::InvalidData(db_err.message().to_string()),
                    _ => DataError::QueryError(db_err.message().to_string()),
                }
            }
            _ => DataError::QueryError(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DataError>;
