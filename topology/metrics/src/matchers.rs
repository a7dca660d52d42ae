/// A PromQL label-matcher list, e.g. `{reporter="source",destination_workload="reviews-v1"}`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Matchers(Vec<String>);

/// Matches responses with a 4xx or 5xx code.
const ERROR_CODES: &str = "[5|4].*";

// === impl Matchers ===

impl Matchers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, name: &str, value: &str) -> Self {
        self.push(name, "=", value)
    }

    pub fn with_not(self, name: &str, value: &str) -> Self {
        self.push(name, "!=", value)
    }

    pub fn with_re(self, name: &str, pattern: &str) -> Self {
        self.push(name, "=~", pattern)
    }

    /// Adds `name="value"` when `value` is non-empty.
    pub fn with_if_set(self, name: &str, value: &str) -> Self {
        if value.is_empty() {
            self
        } else {
            self.with(name, value)
        }
    }

    /// Restricts the matchers to error responses.
    pub fn errors(&self) -> Self {
        self.clone().with_re("response_code", ERROR_CODES)
    }

    fn push(mut self, name: &str, op: &str, value: &str) -> Self {
        let value = value.replace('\\', "\\\\").replace('"', "\\\"");
        self.0.push(format!("{name}{op}\"{value}\""));
        self
    }
}

impl std::fmt::Display for Matchers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{}}}", self.0.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_selectors() {
        let m = Matchers::new()
            .with("reporter", "source")
            .with_not("source_workload", "unknown")
            .with_if_set("destination_workload", "")
            .with_if_set("destination_service_name", "reviews");
        assert_eq!(
            m.to_string(),
            r#"{reporter="source",source_workload!="unknown",destination_service_name="reviews"}"#
        );
        assert_eq!(
            m.errors().to_string(),
            r#"{reporter="source",source_workload!="unknown",destination_service_name="reviews",response_code=~"[5|4].*"}"#
        );
    }

    #[test]
    fn escapes_values() {
        let m = Matchers::new().with("app", r#"a"b\c"#);
        assert_eq!(m.to_string(), r#"{app="a\"b\\c"}"#);
    }

    #[test]
    fn empty_selector() {
        assert_eq!(Matchers::new().to_string(), "{}");
    }
}
