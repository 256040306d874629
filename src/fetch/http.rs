use crate::error::{LookupError, Result};
use crate::types::{json_value_to_term_value, TermValue};
use reqwest::header::ACCEPT;
use serde_json::{Map, Value};
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

/// Terms served as JSON by a REST endpoint.
///
/// Without a `path` the body must be a top-level JSON array. With one, the
/// body is an object and the dotted path selects the values.
#[derive(Debug, Clone)]
pub struct HttpSource {
    url: String,
    path: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(url: &str, path: Option<&str>, timeout: Duration) -> Result<Self> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| LookupError::Config(format!("invalid lookup url [{}]: {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(LookupError::Config(format!(
                "lookup url [{}] must use http or https",
                url
            )));
        }
        if let Some(p) = path {
            if p.is_empty() || p.split('.').any(str::is_empty) {
                return Err(LookupError::Config(format!("invalid lookup path [{}]", p)));
            }
        }

        // No idle connections are kept: every fetch dials the endpoint anew
        // and nothing outlives the response.
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| LookupError::Config(format!("cannot build HTTP client: {}", e)))?;

        Ok(HttpSource {
            url: url.to_string(),
            path: path.map(str::to_string),
            timeout,
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn fetch(&self) -> Result<Vec<TermValue>> {
        let start = Instant::now();
        let response = self
            .client
            .get(&self.url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LookupError::Transport(format!(
                "[{}] answered with status {}",
                self.url, status
            )));
        }

        let body = response.bytes().await.map_err(|e| self.classify(e))?;
        let terms = match &self.path {
            None => parse_array_body(&body, &self.url)?,
            Some(path) => parse_path_body(&body, path, &self.url)?,
        };

        tracing::debug!(
            "[HTTP] fetched {} terms from {} in {:?}",
            terms.len(),
            self.url,
            start.elapsed()
        );
        Ok(terms)
    }

    /// Everything reqwest reports is transport-level, including a body cut
    /// short mid-read. Format errors come only from parsing the JSON.
    fn classify(&self, e: reqwest::Error) -> LookupError {
        if e.is_timeout() {
            LookupError::Timeout {
                url: self.url.clone(),
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            LookupError::Transport(format!("error reading terms from [{}]: {}", self.url, e))
        }
    }
}

impl PartialEq for HttpSource {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url && self.path == other.path && self.timeout == other.timeout
    }
}

impl Eq for HttpSource {}

impl Hash for HttpSource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.hash(state);
        self.path.hash(state);
        self.timeout.hash(state);
    }
}

fn parse_array_body(body: &[u8], url: &str) -> Result<Vec<TermValue>> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| LookupError::Format(format!("invalid JSON from [{}]: {}", url, e)))?;
    let Value::Array(items) = value else {
        return Err(LookupError::Format(format!(
            "body from [{}] is not an array",
            url
        )));
    };

    let mut terms = Vec::with_capacity(items.len());
    for item in &items {
        match item {
            Value::Null => continue,
            Value::Array(_) | Value::Object(_) => {
                return Err(LookupError::Format(format!(
                    "array from [{}] holds a non-scalar element",
                    url
                )))
            }
            scalar => terms.extend(json_value_to_term_value(scalar)),
        }
    }
    Ok(terms)
}

fn parse_path_body(body: &[u8], path: &str, url: &str) -> Result<Vec<TermValue>> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| LookupError::Format(format!("invalid JSON from [{}]: {}", url, e)))?;
    let Value::Object(root) = value else {
        return Err(LookupError::Format(format!(
            "body from [{}] is not an object, cannot apply path [{}]",
            url, path
        )));
    };

    Ok(extract_raw_values(path, &root)
        .into_iter()
        .filter_map(json_value_to_term_value)
        .collect())
}

/// Collect every value reachable through a dotted `path`.
///
/// Object keys may themselves contain dots, so at each level progressively
/// longer key candidates are tried (`a`, then `a.b`, ...). Arrays met on the
/// way are walked element by element, and an array at the end of the path is
/// flattened one level.
pub(crate) fn extract_raw_values<'a>(path: &str, root: &'a Map<String, Value>) -> Vec<&'a Value> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    extract_from_map(&segments, root, &mut out);
    out
}

fn extract_from_map<'a>(segments: &[&str], map: &'a Map<String, Value>, out: &mut Vec<&'a Value>) {
    let mut key = String::new();
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            key.push('.');
        }
        key.push_str(segment);

        if let Some(value) = map.get(&key) {
            let rest = &segments[i + 1..];
            if rest.is_empty() {
                match value {
                    Value::Array(items) => out.extend(items.iter()),
                    other => out.push(other),
                }
            } else {
                extract_from_value(rest, value, out);
            }
        }
    }
}

fn extract_from_value<'a>(segments: &[&str], value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Object(map) => extract_from_map(segments, map, out),
        Value::Array(items) => {
            for item in items {
                extract_from_value(segments, item, out);
            }
        }
        _ => {}
    }
}
