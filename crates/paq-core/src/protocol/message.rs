/// One decoded protocol unit: status code, free-text reason, header map.
///
/// Headers are kept in arrival order but lookup is case-insensitive and
/// order-independent; duplicate keys resolve to the first occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub code: u16,
    pub reason: String,
    headers: Vec<(String, String)>,
}

impl Message {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            headers: Vec::new(),
        }
    }

    /// Append a header field. Builder-style so request construction chains.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.push((key.into(), value.into()));
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Header parsed as a boolean; `default` when absent or unrecognized.
    /// Accepts true/false, yes/no, 1/0 like the original method contract.
    pub fn header_bool(&self, key: &str, default: bool) -> bool {
        match self.header(key).map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes") || v == "1" => true,
            Some(v) if v.eq_ignore_ascii_case("false") || v.eq_ignore_ascii_case("no") || v == "0" => false,
            _ => default,
        }
    }

    pub fn header_u64(&self, key: &str) -> Option<u64> {
        self.header(key).and_then(|v| v.trim().parse().ok())
    }

    /// Serialize to the wire format, including the terminating blank line.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = String::new();
        out.push_str(&format!("{} {}\n", self.code, self.reason));
        for (k, v) in &self.headers {
            out.push_str(&format!("{k}: {v}\n"));
        }
        out.push('\n');
        out.into_bytes()
    }

    pub(super) fn push_parsed(&mut self, key: String, value: String) {
        self.headers.push((key, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let m = Message::new(201, "URI Done").with("IMS-Hit", "true");
        assert_eq!(m.header("ims-hit"), Some("true"));
        assert_eq!(m.header("size"), None);
    }

    #[test]
    fn header_bool_variants() {
        let m = Message::new(400, "URI Failure")
            .with("Transient", "yes")
            .with("Other", "maybe");
        assert!(m.header_bool("Transient", false));
        assert!(!m.header_bool("Missing", false));
        // unrecognized value falls back to the default
        assert!(m.header_bool("Other", true));
    }

    #[test]
    fn encode_has_status_headers_and_blank_line() {
        let m = Message::new(600, "URI Acquire")
            .with("URI", "http://example.org/a.deb")
            .with("FileName", "/tmp/a.deb");
        let wire = String::from_utf8(m.encode()).unwrap();
        assert_eq!(
            wire,
            "600 URI Acquire\nURI: http://example.org/a.deb\nFileName: /tmp/a.deb\n\n"
        );
    }
}
