use std::fmt::{self, Debug};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use url::Url;

use crate::error::Error;
use crate::types::{QueryResult, Selector, Series};
use crate::QueryBackend;

const SERIES_PATH: &str = "/api/v1/series";
const QUERY_PATH: &str = "/api/v1/query";
const QUERY_RANGE_PATH: &str = "/api/v1/query_range";

/// HTTP statuses for which the backend still sends a parseable error body.
const PARSEABLE_ERROR_STATUSES: [u16; 3] = [400, 422, 503];

/// HTTP verb used for query requests. `GET` encodes parameters in the URL,
/// `POST` form-encodes them in the body.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HttpVerb {
    #[default]
    Get,
    Post,
}

impl FromStr for HttpVerb {
    type Err = String;

    fn from_str(verb: &str) -> Result<Self, Self::Err> {
        match verb {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            other => Err(format!("invalid query verb {other:?}, expected GET or POST")),
        }
    }
}

/// Client for the Prometheus HTTP API.
pub struct Client {
    base_url: Url,
    verb: HttpVerb,
    timeout: Option<Duration>,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    status: String,
    data: Option<T>,
    #[serde(default, rename = "errorType")]
    error_type: String,
    #[serde(default)]
    error: String,
}

impl Client {
    /// Create a client against `base_url` using `GET` and no deadline.
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            verb: HttpVerb::Get,
            timeout: None,
            http: reqwest::Client::new(),
        }
    }

    /// Use `verb` for query requests.
    pub fn verb(self, verb: HttpVerb) -> Self {
        Self { verb, ..self }
    }

    /// Apply `timeout` to every request and forward it to the backend as the
    /// `timeout` query parameter, so the backend can abort server-side too.
    pub fn timeout(self, timeout: impl Into<Option<Duration>>) -> Self {
        Self {
            timeout: timeout.into(),
            ..self
        }
    }

    /// Host/port of the backend, used as the `server` metric label.
    pub fn server(&self) -> String {
        let host = self.base_url.host_str().unwrap_or("unknown");
        match self.base_url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> Url {
        // Url::join would drop a path prefix on the base URL.
        let mut url = self.base_url.clone();
        let joined = format!("{}{path}", url.path().trim_end_matches('/'));
        url.set_path(&joined);
        url
    }

    async fn send<T>(&self, path: &str, mut params: Vec<(String, String)>) -> Result<T, Error>
    where
        T: serde::de::DeserializeOwned,
    {
        if let Some(timeout) = self.timeout {
            params.push(("timeout".to_string(), format!("{}s", timeout.as_secs_f64())));
        }

        let url = self.endpoint(path);
        let request = match self.verb {
            HttpVerb::Get => self.http.get(url).query(&params),
            HttpVerb::Post => self.http.post(url).form(&params),
        };
        let request = match self.timeout {
            Some(timeout) => request.timeout(timeout),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status().as_u16();

        if !response.status().is_success() && !PARSEABLE_ERROR_STATUSES.contains(&status) {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::BadResponse { status, message });
        }

        let body: ApiResponse<T> = response.json().await.map_err(|err| Error::BadResponse {
            status,
            message: err.to_string(),
        })?;

        match body.status.as_str() {
            "success" => body.data.ok_or(Error::BadResponse {
                status,
                message: "success response without data".to_string(),
            }),
            "error" => Err(Error::from_api(status, &body.error_type, body.error)),
            other => Err(Error::BadResponse {
                status,
                message: format!("unknown response status {other:?}"),
            }),
        }
    }
}

fn unix(ts: DateTime<Utc>) -> String {
    format!("{}.{:03}", ts.timestamp(), ts.timestamp_subsec_millis())
}

#[async_trait]
impl QueryBackend for Client {
    async fn series(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        selectors: &[Selector],
    ) -> Result<Vec<Series>, Error> {
        let mut params = vec![
            ("start".to_string(), unix(start)),
            ("end".to_string(), unix(end)),
        ];
        for selector in selectors {
            params.push(("match[]".to_string(), selector.0.clone()));
        }
        self.send(SERIES_PATH, params).await
    }

    async fn query(&self, at: DateTime<Utc>, expr: &str) -> Result<QueryResult, Error> {
        let params = vec![
            ("query".to_string(), expr.to_string()),
            ("time".to_string(), unix(at)),
        ];
        self.send(QUERY_PATH, params).await
    }

    async fn query_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
        expr: &str,
    ) -> Result<QueryResult, Error> {
        let params = vec![
            ("query".to_string(), expr.to_string()),
            ("start".to_string(), unix(start)),
            ("end".to_string(), unix(end)),
            ("step".to_string(), format!("{}s", step.as_secs_f64())),
        ];
        self.send(QUERY_RANGE_PATH, params).await
    }
}

impl Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.base_url.as_str())
            .field("verb", &self.verb)
            .field("timeout", &self.timeout)
            .field("http", &"<reqwest::Client>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verb_parses_from_flag_values() {
        assert_eq!("GET".parse::<HttpVerb>().unwrap(), HttpVerb::Get);
        assert_eq!("POST".parse::<HttpVerb>().unwrap(), HttpVerb::Post);
        assert!("PUT".parse::<HttpVerb>().is_err());
    }

    #[test]
    fn endpoint_keeps_base_path_prefix() {
        let client = Client::new(Url::parse("http://prom.example:9090/prom").unwrap());
        let url = client.endpoint(QUERY_PATH);
        assert_eq!(url.as_str(), "http://prom.example:9090/prom/api/v1/query");
    }

    #[test]
    fn server_label_includes_port() {
        let client = Client::new(Url::parse("http://prom.example:9090").unwrap());
        assert_eq!(client.server(), "prom.example:9090");
    }

    #[test]
    fn unix_renders_millis() {
        let ts = DateTime::from_timestamp(1_700_000_000, 250_000_000).unwrap();
        assert_eq!(unix(ts), "1700000000.250");
    }

    #[test]
    fn error_envelope_decodes() {
        let raw = r#"{"status":"error","errorType":"bad_data","error":"bad matcher"}"#;
        let body: ApiResponse<Vec<Series>> = serde_json::from_str(raw).unwrap();
        assert_eq!(body.status, "error");
        assert_eq!(body.error_type, "bad_data");
        assert!(body.data.is_none());
    }
}
