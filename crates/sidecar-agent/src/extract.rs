//! Content extraction contract.
//!
//! Turning fetched HTML into something an LLM can digest (readability
//! heuristics, metadata, structured data) lives outside this crate; the
//! agent only needs a function from raw page content to a summary block.

/// Reduces a fetched page to a text block for the follow-up prompt.
pub trait ContentExtractor: Send + Sync {
    fn extract(&self, html: &str, url: &str) -> String;
}

/// Fallback extractor: serializes the raw content with its source URL,
/// truncated so one large page cannot blow the context window on its own.
pub struct RawExtractor {
    max_len: usize,
}

impl RawExtractor {
    pub fn new() -> Self {
        Self { max_len: 20_000 }
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }
}

impl Default for RawExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentExtractor for RawExtractor {
    fn extract(&self, html: &str, url: &str) -> String {
        let mut end = self.max_len.min(html.len());
        while end > 0 && !html.is_char_boundary(end) {
            end -= 1;
        }
        let content = &html[..end];
        serde_json::to_string_pretty(&serde_json::json!({
            "url": url,
            "content": content,
        }))
        .unwrap_or_else(|_| format!("{{\"url\": \"{url}\"}}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_extractor_serializes_url_and_content() {
        let extracted = RawExtractor::new().extract("<p>hello</p>", "http://x");
        let json: serde_json::Value = serde_json::from_str(&extracted).unwrap();
        assert_eq!(json["url"], "http://x");
        assert_eq!(json["content"], "<p>hello</p>");
    }

    #[test]
    fn raw_extractor_truncates_large_pages() {
        let html = "z".repeat(100_000);
        let extracted = RawExtractor::new().with_max_len(100).extract(&html, "http://big");
        let json: serde_json::Value = serde_json::from_str(&extracted).unwrap();
        assert_eq!(json["content"].as_str().unwrap().len(), 100);
    }
}
