use crate::Error;
use serde::Deserialize;
use std::time::Duration;
use topology_core::{
    LabelSet, Matrix, QueryMetrics, QueryRange, Sample, SamplePair, SampleStream, Vector,
};
use tracing::{debug, trace};

/// A client for the Prometheus HTTP API.
#[derive(Clone, Debug)]
pub struct Prometheus {
    http: reqwest::Client,
    base: String,
}

/// The standard response envelope.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    status: String,
    #[serde(default)]
    data: Option<Data>,
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
enum Data {
    Vector(Vec<RawSample>),
    Matrix(Vec<RawStream>),
    #[allow(dead_code)]
    Scalar(RawPoint),
    #[allow(dead_code)]
    String(RawPoint),
}

#[derive(Debug, Deserialize)]
struct RawSample {
    #[serde(default)]
    metric: LabelSet,
    value: RawPoint,
}

#[derive(Debug, Deserialize)]
struct RawStream {
    #[serde(default)]
    metric: LabelSet,
    #[serde(default)]
    values: Vec<RawPoint>,
}

/// A `[<unix seconds>, "<value>"]` pair.
#[derive(Debug, Deserialize)]
struct RawPoint(f64, String);

// === impl Prometheus ===

impl Prometheus {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, Error> {
        let base = url.trim_end_matches('/');
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(Error::InvalidUrl(url.to_string()));
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base: base.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.base
    }

    /// Evaluates an instant query at `time` (unix seconds).
    pub async fn instant(&self, query: &str, time: i64) -> Result<Vector, Error> {
        if query.is_empty() {
            return Err(Error::EmptyQuery);
        }
        let params = [("query", query.to_string()), ("time", time.to_string())];
        self.get("/api/v1/query", &params)
            .await?
            .into_vector(query)
    }

    /// Evaluates a range query.
    pub async fn range(&self, query: &str, range: QueryRange) -> Result<Matrix, Error> {
        if query.is_empty() {
            return Err(Error::EmptyQuery);
        }
        let params = [
            ("query", query.to_string()),
            ("start", range.start.to_string()),
            ("end", range.end.to_string()),
            ("step", range.step.to_string()),
        ];
        self.get("/api/v1/query_range", &params)
            .await?
            .into_matrix(query)
    }

    async fn get(&self, path: &str, params: &[(&str, String)]) -> Result<Data, Error> {
        trace!(%path, ?params, "Querying");
        let rsp = self
            .http
            .get(format!("{}{path}", self.base))
            .query(params)
            .send()
            .await?;
        let status = rsp.status().as_u16();
        let body = rsp.bytes().await?;
        decode(status, &body)
    }
}

#[async_trait::async_trait]
impl QueryMetrics for Prometheus {
    async fn query(&self, query: &str, time: i64) -> anyhow::Result<Vector> {
        Ok(self.instant(query, time).await?)
    }

    async fn query_range(&self, query: &str, range: QueryRange) -> anyhow::Result<Matrix> {
        Ok(self.range(query, range).await?)
    }
}

/// Decodes a response body. The API reports query errors in the envelope, usually with a 4xx or
/// 5xx status; any other non-JSON body is reported with its status.
fn decode(status: u16, body: &[u8]) -> Result<Data, Error> {
    let envelope = match serde_json::from_slice::<Envelope>(body) {
        Ok(envelope) => envelope,
        Err(error) if (200..300).contains(&status) => return Err(error.into()),
        Err(_) => {
            return Err(Error::Status {
                status,
                message: String::from_utf8_lossy(body).into_owned(),
            })
        }
    };

    match envelope {
        Envelope {
            status: outcome,
            data: Some(data),
            ..
        } if outcome == "success" => Ok(data),
        Envelope {
            status: outcome,
            error_type,
            error,
            ..
        } => {
            debug!(status, %outcome, ?error_type, "Query failed");
            Err(Error::Query {
                kind: error_type.unwrap_or(outcome),
                message: error.unwrap_or_default(),
            })
        }
    }
}

// === impl Data ===

impl Data {
    fn kind(&self) -> &'static str {
        match self {
            Self::Vector(_) => "vector",
            Self::Matrix(_) => "matrix",
            Self::Scalar(_) => "scalar",
            Self::String(_) => "string",
        }
    }

    fn into_vector(self, query: &str) -> Result<Vector, Error> {
        match self {
            Self::Vector(samples) => samples
                .into_iter()
                .map(|RawSample { metric, value }| -> Result<Sample, Error> {
                    let SamplePair { timestamp, value } = value.parse()?;
                    Ok(Sample {
                        metric,
                        value,
                        timestamp,
                    })
                })
                .collect(),
            data => Err(Error::UnexpectedResult {
                expected: "vector",
                found: data.kind(),
                query: query.to_string(),
            }),
        }
    }

    fn into_matrix(self, query: &str) -> Result<Matrix, Error> {
        match self {
            Self::Matrix(streams) => streams
                .into_iter()
                .map(|RawStream { metric, values }| -> Result<SampleStream, Error> {
                    let values = values
                        .iter()
                        .map(RawPoint::parse)
                        .collect::<Result<_, _>>()?;
                    Ok(SampleStream { metric, values })
                })
                .collect(),
            data => Err(Error::UnexpectedResult {
                expected: "matrix",
                found: data.kind(),
                query: query.to_string(),
            }),
        }
    }
}

// === impl RawPoint ===

impl RawPoint {
    /// Timestamps are truncated to whole seconds. Values may be `NaN` or `±Inf`.
    fn parse(&self) -> Result<SamplePair, Error> {
        let value = self
            .1
            .parse::<f64>()
            .map_err(|_| Error::SampleValue(self.1.clone()))?;
        Ok(SamplePair {
            timestamp: self.0 as i64,
            value,
        })
    }
}
