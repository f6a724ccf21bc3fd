//! 거래 상품 식별자.
//!
//! 거래소 상품은 `BASE-QUOTE` 형식(예: `ETH-USD`)으로 식별됩니다.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 거래 상품 식별자 (예: `ETH-USD`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProductId(String);

impl ProductId {
    /// 문자열을 검증하여 상품 식별자를 생성합니다.
    ///
    /// 대소문자는 무시하며 내부적으로 대문자로 저장합니다.
    pub fn new(raw: &str) -> CoreResult<Self> {
        let upper = raw.trim().to_uppercase();
        let mut parts = upper.split('-');
        let (base, quote) = match (parts.next(), parts.next(), parts.next()) {
            (Some(base), Some(quote), None) => (base, quote),
            _ => {
                return Err(CoreError::InvalidInput(format!(
                    "상품 식별자는 BASE-QUOTE 형식이어야 합니다: {}",
                    raw
                )))
            }
        };

        let valid = |part: &str| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric());
        if !valid(base) || !valid(quote) {
            return Err(CoreError::InvalidInput(format!(
                "상품 식별자에 허용되지 않는 문자가 있습니다: {}",
                raw
            )));
        }

        Ok(Self(upper))
    }

    /// 원본 문자열을 반환합니다.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 기준 자산 (예: ETH).
    pub fn base(&self) -> &str {
        self.0.split('-').next().unwrap_or_default()
    }

    /// 호가 자산 (예: USD).
    pub fn quote(&self) -> &str {
        self.0.split('-').nth(1).unwrap_or_default()
    }

    /// 테이블 이름에 쓰이는 형태 (예: `eth_usd`).
    pub fn table_fragment(&self) -> String {
        self.0.to_lowercase().replace('-', "_")
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ProductId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ProductId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<ProductId> for String {
    fn from(value: ProductId) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_parse() {
        let product: ProductId = "eth-usd".parse().unwrap();
        assert_eq!(product.as_str(), "ETH-USD");
        assert_eq!(product.base(), "ETH");
        assert_eq!(product.quote(), "USD");
        assert_eq!(product.table_fragment(), "eth_usd");
    }

    #[test]
    fn test_product_rejects_malformed() {
        assert!(ProductId::new("ETHUSD").is_err());
        assert!(ProductId::new("ETH-").is_err());
        assert!(ProductId::new("ETH-USD-X").is_err());
        assert!(ProductId::new("ETH-US;D").is_err());
    }
}
