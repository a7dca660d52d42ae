//! Traffic samples and their classification.

use crate::identity::NodeLabels;
use serde::{ser::SerializeTuple, Serialize};
use std::collections::BTreeMap;

pub type LabelSet = BTreeMap<String, String>;

/// A single labeled value from an instant query.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sample {
    pub metric: LabelSet,
    pub value: f64,
    pub timestamp: i64,
}

/// The result of an instant query.
pub type Vector = Vec<Sample>;

/// A single point of a range query series.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SamplePair {
    pub timestamp: i64,
    pub value: f64,
}

/// A labeled, time-ordered series from a range query.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleStream {
    pub metric: LabelSet,
    pub values: Vec<SamplePair>,
}

/// The result of a range query.
pub type Matrix = Vec<SampleStream>;

/// Groups HTTP response codes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ResponseClass {
    Success,
    Redirect,
    ClientError,
    ServerError,
    Other,
}

/// Request counts bucketed by response class.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RequestCount {
    pub http_2xx: i32,
    pub http_3xx: i32,
    pub http_4xx: i32,
    pub http_5xx: i32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Reporter {
    Source,
    Destination,
    Other,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SecurityPolicy {
    MutualTls,
    None,
    Other,
}

/// The fields of a sample needed to fold it into a graph.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TrafficSample<'a> {
    pub source: NodeLabels<'a>,
    pub destination: NodeLabels<'a>,
    pub response_code: &'a str,
    pub value: f64,
    pub has_tls: bool,
}

/// Response code assigned to destination-reported mTLS samples, which are kept for their
/// security information but must not count as requests.
pub const FILTERED_RESPONSE_CODE: &str = "000";

// === impl Sample ===

impl Sample {
    pub fn new(metric: LabelSet, value: f64) -> Self {
        Self {
            metric,
            value,
            timestamp: 0,
        }
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.metric.get(name).map(String::as_str)
    }
}

// === impl SamplePair ===

/// Encodes as `[timestamp, value]`, reporting NaN as zero.
impl Serialize for SamplePair {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let value = if self.value.is_nan() { 0.0 } else { self.value };
        let mut tup = serializer.serialize_tuple(2)?;
        tup.serialize_element(&self.timestamp)?;
        tup.serialize_element(&value)?;
        tup.end()
    }
}

// === impl ResponseClass ===

impl ResponseClass {
    pub fn from_code(code: &str) -> Self {
        match code.as_bytes().first() {
            Some(b'2') => Self::Success,
            Some(b'3') => Self::Redirect,
            Some(b'4') => Self::ClientError,
            Some(b'5') => Self::ServerError,
            _ => Self::Other,
        }
    }

    #[inline]
    pub fn is_error(self) -> bool {
        matches!(self, Self::ClientError | Self::ServerError)
    }
}

// === impl RequestCount ===

impl RequestCount {
    /// Sums a request-count-by-response-code vector into buckets. Samples without a response code
    /// are ignored.
    pub fn from_vector(vector: &[Sample]) -> Self {
        let mut counts = Self::default();
        for sample in vector {
            let code = match sample.label("response_code") {
                Some(code) if !code.is_empty() => code,
                _ => continue,
            };
            let n = sample.value as i32;
            match ResponseClass::from_code(code) {
                ResponseClass::Success => counts.http_2xx += n,
                ResponseClass::Redirect => counts.http_3xx += n,
                ResponseClass::ClientError => counts.http_4xx += n,
                ResponseClass::ServerError => counts.http_5xx += n,
                ResponseClass::Other => {}
            }
        }
        counts
    }
}

// === impl Reporter ===

impl Reporter {
    fn from_label(value: &str) -> Self {
        match value {
            "source" => Self::Source,
            "destination" => Self::Destination,
            _ => Self::Other,
        }
    }
}

// === impl SecurityPolicy ===

impl SecurityPolicy {
    fn from_label(value: &str) -> Self {
        match value {
            "mutual_tls" => Self::MutualTls,
            "none" => Self::None,
            _ => Self::Other,
        }
    }
}

// === impl TrafficSample ===

impl<'a> TrafficSample<'a> {
    const REQUIRED: [&'static str; 10] = [
        "source_workload_namespace",
        "source_workload",
        "source_app",
        "source_version",
        "destination_service_namespace",
        "destination_service_name",
        "destination_workload",
        "destination_app",
        "destination_version",
        "response_code",
    ];

    /// Extracts the graph-relevant fields of a sample.
    ///
    /// Fails with the name of the first missing required label.
    ///
    /// Samples reported by the destination over a secured connection duplicate the
    /// source-reported sample for the same request, so their value is zeroed and their response
    /// code replaced with [`FILTERED_RESPONSE_CODE`].
    pub fn classify(sample: &'a Sample) -> Result<Self, &'static str> {
        let mut labels = [""; 10];
        for (value, name) in labels.iter_mut().zip(Self::REQUIRED) {
            *value = sample.label(name).ok_or(name)?;
        }
        let [src_ns, src_wl, src_app, src_ver, dst_ns, dst_svc, dst_wl, dst_app, dst_ver, code] =
            labels;

        let policy = sample
            .label("connection_security_policy")
            .map(SecurityPolicy::from_label);
        let reporter = sample.label("reporter").map(Reporter::from_label);

        let (value, response_code) = match (reporter, policy) {
            (Some(Reporter::Destination), Some(p)) if p != SecurityPolicy::None => {
                (0.0, FILTERED_RESPONSE_CODE)
            }
            _ => (sample.value, code),
        };

        Ok(Self {
            source: NodeLabels {
                namespace: src_ns,
                workload: src_wl,
                app: src_app,
                version: src_ver,
                service: "",
            },
            destination: NodeLabels {
                namespace: dst_ns,
                workload: dst_wl,
                app: dst_app,
                version: dst_ver,
                service: dst_svc,
            },
            response_code,
            value,
            has_tls: policy == Some(SecurityPolicy::MutualTls),
        })
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        ResponseClass::from_code(self.response_code).is_error()
    }
}
