//! Server-sent event framing.
//!
//! Two framings exist across the supported vendors:
//!
//! - OpenAI and Grok emit `data: {json}` lines plus a `[DONE]` terminator.
//!   Each network read is scanned line-by-line as it arrives; lines without
//!   the data prefix are discarded.
//! - DeepSeek separates events with a blank line, and a frame may span
//!   several reads, so [`FrameDecoder`] buffers until a full `\n\n`
//!   separator is seen before splitting the frame into its `data:` lines.
//!
//! Decoders only extract payload strings; JSON parsing (and skipping of
//! malformed payloads) stays with the per-vendor adapters.

const DONE_MARKER: &str = "[DONE]";

/// Extract `data: ` payloads from one decoded chunk, dropping the stream
/// terminator. Stateless: lines are taken as they appear in this chunk.
pub fn scan_data_lines(chunk: &str) -> Vec<&str> {
    chunk
        .split('\n')
        .filter_map(|line| line.strip_prefix("data: "))
        .filter(|payload| !payload.contains(DONE_MARKER))
        .collect()
}

/// Blank-line-delimited SSE decoder for vendors whose frames span reads.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: String,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one decoded chunk; returns the payloads of every frame that is
    /// now complete. Partial trailing frames stay buffered.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buf.push_str(chunk);

        let mut payloads = Vec::new();
        while let Some(idx) = self.buf.find("\n\n") {
            let frame = self.buf[..idx].trim().to_string();
            self.buf.drain(..idx + 2);

            for line in frame.split('\n') {
                let Some(rest) = line.strip_prefix("data:") else {
                    continue;
                };
                let payload = rest.trim();
                if payload == DONE_MARKER {
                    break;
                }
                payloads.push(payload.to_string());
            }
        }
        payloads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_keeps_only_data_lines() {
        let chunk = "event: ping\ndata: {\"a\":1}\nretry: 100\ndata: {\"b\":2}\n";
        assert_eq!(scan_data_lines(chunk), vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[test]
    fn scan_drops_done_terminator() {
        let chunk = "data: {\"a\":1}\ndata: [DONE]\n";
        assert_eq!(scan_data_lines(chunk), vec!["{\"a\":1}"]);
    }

    #[test]
    fn scan_of_plain_text_yields_nothing() {
        assert!(scan_data_lines("not an sse line\nanother\n").is_empty());
    }

    #[test]
    fn frame_decoder_flushes_on_blank_line() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push("data: {\"a\":1}\n").is_empty());
        assert_eq!(decoder.push("\n"), vec!["{\"a\":1}".to_string()]);
    }

    #[test]
    fn frame_decoder_buffers_partial_frames_across_reads() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push("data: {\"te").is_empty());
        assert!(decoder.push("xt\":\"hi\"}").is_empty());
        assert_eq!(
            decoder.push("\n\ndata: {\"text\":\"there\"}\n\n"),
            vec!["{\"text\":\"hi\"}".to_string(), "{\"text\":\"there\"}".to_string()]
        );
    }

    #[test]
    fn frame_decoder_splits_multi_line_frames() {
        let mut decoder = FrameDecoder::new();
        let payloads = decoder.push("event: delta\ndata: {\"a\":1}\ndata: {\"b\":2}\n\n");
        assert_eq!(payloads, vec!["{\"a\":1}".to_string(), "{\"b\":2}".to_string()]);
    }

    #[test]
    fn frame_decoder_stops_frame_at_done() {
        let mut decoder = FrameDecoder::new();
        let payloads = decoder.push("data: [DONE]\ndata: {\"a\":1}\n\n");
        assert!(payloads.is_empty());
    }

    #[test]
    fn frame_decoder_accepts_prefix_without_space() {
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.push("data:{\"a\":1}\n\n"), vec!["{\"a\":1}".to_string()]);
    }
}
