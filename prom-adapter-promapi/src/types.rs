use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};

/// A time-series selector or full query expression, already rendered to
/// Prometheus syntax.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Selector(pub String);

impl Selector {
    pub fn new(selector: impl ToString) -> Self {
        Self(selector.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One time-series: metric name plus label/value pairs.
///
/// On the wire this is a flat label map with the name under `__name__`;
/// deserialization splits the name out. A grouped query result may carry no
/// `__name__` at all, in which case `name` is empty.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Series {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

impl Series {
    pub fn new(name: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            labels: BTreeMap::new(),
        }
    }

    pub fn label(mut self, name: impl ToString, value: impl ToString) -> Self {
        self.labels.insert(name.to_string(), value.to_string());
        self
    }
}

impl<'de> Deserialize<'de> for Series {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut labels = BTreeMap::<String, String>::deserialize(deserializer)?;
        let name = labels.remove("__name__").unwrap_or_default();
        Ok(Self { name, labels })
    }
}

/// A `(timestamp, value)` pair; the API encodes it as `[unix_seconds, "value"]`
/// with the value as a string so `NaN`, `+Inf` and `-Inf` survive JSON.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplePair {
    pub timestamp: f64,
    pub value: f64,
}

impl<'de> Deserialize<'de> for SamplePair {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct PairVisitor;

        impl<'de> Visitor<'de> for PairVisitor {
            type Value = SamplePair;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a [timestamp, value] pair")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let timestamp: f64 = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let raw: String = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                let value = raw
                    .parse()
                    .map_err(|_| de::Error::custom(format!("invalid sample value {raw:?}")))?;
                Ok(SamplePair { timestamp, value })
            }
        }

        deserializer.deserialize_seq(PairVisitor)
    }
}

/// One entry of an instant-vector result.
#[derive(Clone, Debug, Deserialize)]
pub struct Sample {
    pub metric: Series,
    pub value: SamplePair,
}

/// One entry of a matrix result.
#[derive(Clone, Debug, Deserialize)]
pub struct RangeSeries {
    pub metric: Series,
    pub values: Vec<SamplePair>,
}

/// A decoded query result, by backend result type.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
pub enum QueryResult {
    Scalar(SamplePair),
    Vector(Vec<Sample>),
    Matrix(Vec<RangeSeries>),
}

impl QueryResult {
    /// The vector samples, if this is a vector result.
    pub fn as_vector(&self) -> Option<&[Sample]> {
        match self {
            Self::Vector(samples) => Some(samples),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn series_splits_name_label() {
        let raw = serde_json::json!({
            "__name__": "container_some_usage",
            "namespace": "n",
            "pod": "p1",
        });

        let series: Series = serde_json::from_value(raw).unwrap();
        assert_eq!(series.name, "container_some_usage");
        assert_eq!(series.labels.get("pod").map(String::as_str), Some("p1"));
        assert!(!series.labels.contains_key("__name__"));
    }

    #[test]
    fn series_without_name_is_empty() {
        let raw = serde_json::json!({"pod": "p1"});
        let series: Series = serde_json::from_value(raw).unwrap();
        assert_eq!(series.name, "");
    }

    #[test]
    fn sample_pair_parses_special_values() {
        let pair: SamplePair = serde_json::from_value(serde_json::json!([1700000000.0, "NaN"]))
            .unwrap();
        assert!(pair.value.is_nan());

        let pair: SamplePair =
            serde_json::from_value(serde_json::json!([1700000000.5, "-5"])).unwrap();
        assert_eq!(pair.value, -5.0);
        assert_eq!(pair.timestamp, 1700000000.5);
    }

    #[test]
    fn vector_result_decodes() {
        let raw = serde_json::json!({
            "resultType": "vector",
            "result": [
                {"metric": {"__name__": "up", "job": "api"}, "value": [1.0, "1"]},
            ],
        });

        let result: QueryResult = serde_json::from_value(raw).unwrap();
        let samples = result.as_vector().unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].metric.name, "up");
        assert_eq!(samples[0].value.value, 1.0);
    }

    #[test]
    fn scalar_result_decodes() {
        let raw = serde_json::json!({"resultType": "scalar", "result": [9.0, "42"]});
        let result: QueryResult = serde_json::from_value(raw).unwrap();
        assert!(matches!(
            result,
            QueryResult::Scalar(SamplePair { value, .. }) if value == 42.0
        ));
    }

    #[test]
    fn matrix_result_decodes() {
        let raw = serde_json::json!({
            "resultType": "matrix",
            "result": [
                {"metric": {"__name__": "up"}, "values": [[1.0, "1"], [2.0, "0"]]},
            ],
        });

        let result: QueryResult = serde_json::from_value(raw).unwrap();
        match result {
            QueryResult::Matrix(series) => assert_eq!(series[0].values.len(), 2),
            other => panic!("expected matrix, got {other:?}"),
        }
    }
}
