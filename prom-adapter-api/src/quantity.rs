use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum QuantityParseError {
    #[error("quantity {0:?} has no numeric part")]
    MissingNumber(String),
    #[error("quantity {0:?} has an unknown suffix {1:?}")]
    UnknownSuffix(String, String),
}

/// Parsing and construction helpers for `resource::Quantity`.
///
/// Covers the suffixes the adapter actually meets: decimal SI (`m`, `k`, `M`,
/// `G`, `T`) and binary SI (`Ki`, `Mi`, `Gi`, `Ti`).
pub trait QuantityExt: Sized {
    fn to_f64(&self) -> Result<f64, QuantityParseError>;

    /// Parse a memory-style quantity into whole bytes.
    fn to_memory(&self) -> Result<i64, QuantityParseError> {
        self.to_f64().map(|v| v as i64)
    }

    /// A quantity of `milli` thousandths, e.g. `from_milli(1500)` is `"1500m"`.
    fn from_milli(milli: i64) -> Self;
}

impl QuantityExt for Quantity {
    fn to_f64(&self) -> Result<f64, QuantityParseError> {
        let s = self.0.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit() && c != '.' && c != '-' && c != '+' && c != 'e')
            .unwrap_or(s.len());
        let (number, suffix) = s.split_at(split);
        let number: f64 = number
            .parse()
            .map_err(|_| QuantityParseError::MissingNumber(s.to_string()))?;
        let multiplier = match suffix {
            "" => 1.0,
            "m" => 1e-3,
            "k" => 1e3,
            "M" => 1e6,
            "G" => 1e9,
            "T" => 1e12,
            "Ki" => 1024.0,
            "Mi" => 1024.0 * 1024.0,
            "Gi" => 1024.0 * 1024.0 * 1024.0,
            "Ti" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
            other => {
                return Err(QuantityParseError::UnknownSuffix(
                    s.to_string(),
                    other.to_string(),
                ))
            }
        };
        Ok(number * multiplier)
    }

    fn from_milli(milli: i64) -> Self {
        Self(format!("{milli}m"))
    }
}
