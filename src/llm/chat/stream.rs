//! Turns a streamed completion body into the final reply text.
//!
//! Bytes are decoded to UTF-8 fragments by [`decode_stream`], then fed to a
//! [`DeltaAccumulator`] which splits `data: `-framed lines and collects
//! `choices[0].delta.content`. A malformed line is logged and skipped; it
//! never costs the content collected before or after it.

use futures::stream::{ self, Stream, StreamExt };
use log::{ debug, warn };
use serde_json::Value;

/// Returned instead of an empty reply when the stream carried no content.
pub const FALLBACK_REPLY: &str = "Sorry, I didn't receive a valid reply.";

const DATA_PREFIX: &str = "data: ";
const DONE_MARKER: &str = "[DONE]";

/// Incremental UTF-8 decoder.
///
/// A multi-byte character split across two chunks is held back until the
/// rest of it arrives. Invalid sequences decode to U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            // incomplete sequence at the end, wait for more bytes
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flushes whatever is still buffered; a truncated character becomes U+FFFD.
    pub fn finish(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }
}

/// Lazily decodes a byte-chunk source into text fragments.
///
/// The stream ends when the source does, or right after the first source
/// error is passed through. Empty fragments are never yielded.
pub fn decode_stream<S, B, E>(source: S) -> impl Stream<Item = Result<String, E>>
    where S: Stream<Item = Result<B, E>>, B: AsRef<[u8]>
{
    let source = Box::pin(source);
    stream::unfold(Some((source, Utf8Decoder::new())), |state| async move {
        let (mut source, mut decoder) = state?;
        loop {
            match source.next().await {
                Some(Ok(chunk)) => {
                    let text = decoder.decode(chunk.as_ref());
                    if !text.is_empty() {
                        return Some((Ok(text), Some((source, decoder))));
                    }
                }
                Some(Err(e)) => {
                    return Some((Err(e), None));
                }
                None => {
                    let tail = decoder.finish();
                    return if tail.is_empty() { None } else { Some((Ok(tail), None)) };
                }
            }
        }
    })
}

const CONTENT_POINTER: &str = "/choices/0/delta/content";

/// Reads `choices[0].delta.content`; the shape of anything else in the
/// chunk, sibling choices included, is not looked at.
fn delta_content(chunk: &Value) -> Option<&str> {
    chunk
        .pointer(CONTENT_POINTER)
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
}

/// Collects content deltas from `data: `-framed lines.
///
/// Text may be fed in arbitrary fragments: only complete lines are parsed,
/// and the unterminated remainder is handled by [`finish`](Self::finish).
/// The result is the same as splitting the whole body on `\n` at the end.
#[derive(Debug, Default)]
pub struct DeltaAccumulator {
    line_buffer: String,
    content: String,
    skipped: usize,
}

impl DeltaAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, fragment: &str) {
        self.line_buffer.push_str(fragment);
        while let Some(pos) = self.line_buffer.find('\n') {
            let line: String = self.line_buffer.drain(..=pos).collect();
            self.process_line(&line[..pos]);
        }
    }

    /// Number of `data: ` lines dropped because they were not valid JSON.
    pub fn skipped_lines(&self) -> usize {
        self.skipped
    }

    pub fn finish(mut self) -> String {
        let rest = std::mem::take(&mut self.line_buffer);
        self.process_line(&rest);
        if self.content.is_empty() {
            FALLBACK_REPLY.to_string()
        } else {
            self.content
        }
    }

    fn process_line(&mut self, line: &str) {
        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            return;
        };
        if payload.trim() == DONE_MARKER {
            debug!("Stream signalled completion");
            return;
        }
        match serde_json::from_str::<Value>(payload) {
            Ok(chunk) => {
                if let Some(delta) = delta_content(&chunk) {
                    self.content.push_str(delta);
                }
            }
            Err(e) => {
                self.skipped += 1;
                warn!("Error parsing response chunk: {} for data: {}", e, payload);
            }
        }
    }
}

/// Whole-body convenience over [`DeltaAccumulator`].
pub fn accumulate_body(body: &str) -> String {
    let mut acc = DeltaAccumulator::new();
    acc.feed(body);
    acc.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta_line(content: &str) -> String {
        format!(
            "data: {}\n",
            serde_json::json!({ "choices": [{ "delta": { "content": content } }] })
        )
    }

    #[test]
    fn concatenates_deltas_in_line_order() {
        let parts = ["The", " quick", " brown", " fox"];
        let body: String = parts
            .iter()
            .map(|p| delta_line(p))
            .collect();
        assert_eq!(accumulate_body(&body), "The quick brown fox");
    }

    #[test]
    fn hi_there_scenario() {
        let body =
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\
             data: {\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\n";
        assert_eq!(accumulate_body(body), "Hi there");
    }

    #[test]
    fn malformed_line_is_skipped_without_losing_neighbours() {
        let body = format!(
            "{}data: {{\"choices\": [ oops\n{}",
            delta_line("before"),
            delta_line(" after")
        );
        let mut acc = DeltaAccumulator::new();
        acc.feed(&body);
        assert_eq!(acc.skipped_lines(), 1);
        assert_eq!(acc.finish(), "before after");
    }

    #[test]
    fn no_content_yields_fallback() {
        assert_eq!(accumulate_body(""), FALLBACK_REPLY);
        let body =
            ": keep-alive\n\
             data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\
             data: {\"choices\":[{\"delta\":{\"content\":\"\"}}]}\n\
             data: {\"choices\":[]}\n\
             data: [DONE]\n";
        assert_eq!(accumulate_body(body), FALLBACK_REPLY);
    }

    #[test]
    fn ignores_lines_without_data_prefix() {
        let body = format!(
            "event: message\nid: 3\ndata:{{\"no\":\"space\"}}\n{}",
            delta_line("ok")
        );
        assert_eq!(accumulate_body(&body), "ok");
    }

    #[test]
    fn final_line_without_newline_is_processed() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}";
        assert_eq!(accumulate_body(body), "tail");
    }

    #[test]
    fn only_first_choice_counts() {
        let body =
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}},{\"delta\":{\"content\":\"b\"}}]}\n";
        assert_eq!(accumulate_body(body), "a");
    }

    #[test]
    fn irregular_sibling_choices_do_not_hide_the_first() {
        let body =
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}},null]}\n\
             data: {\"choices\":[{\"delta\":{\"content\":\" there\"}},{\"delta\":\"x\"}]}\n";
        let mut acc = DeltaAccumulator::new();
        acc.feed(body);
        assert_eq!(acc.skipped_lines(), 0);
        assert_eq!(acc.finish(), "Hi there");
    }

    #[test]
    fn non_string_content_is_ignored() {
        let body =
            "data: {\"choices\":[{\"delta\":{\"content\":42}}]}\n\
             data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}],\"usage\":null}\n";
        assert_eq!(accumulate_body(body), "ok");
    }

    #[test]
    fn line_split_across_fragments_still_parses() {
        let body = format!("{}{}", delta_line("Hello"), delta_line(", world"));
        for split in 0..body.len() {
            if !body.is_char_boundary(split) {
                continue;
            }
            let mut acc = DeltaAccumulator::new();
            acc.feed(&body[..split]);
            acc.feed(&body[split..]);
            assert_eq!(acc.finish(), "Hello, world", "split at {split}");
        }
    }

    #[test]
    fn crlf_framing_is_tolerated() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\r\n\r\n";
        assert_eq!(accumulate_body(body), "x");
    }

    #[test]
    fn decoder_holds_back_split_multibyte_character() {
        let bytes = "héllo ⚡️".as_bytes();
        let mut decoder = Utf8Decoder::new();
        let mut out = String::new();
        for byte in bytes {
            out.push_str(&decoder.decode(std::slice::from_ref(byte)));
        }
        out.push_str(&decoder.finish());
        assert_eq!(out, "héllo ⚡️");
    }

    #[test]
    fn decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::new();
        let out = decoder.decode(b"ok\xFFok");
        assert_eq!(out, "ok\u{FFFD}ok");
    }

    #[test]
    fn decoder_flushes_truncated_tail_lossily() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(&[0xE2, 0x9A]), "");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }

    #[tokio::test]
    async fn decode_stream_yields_fragments_until_source_ends() {
        let chunks: Vec<Result<Vec<u8>, std::io::Error>> = vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"caf".to_vec()),
            Ok(vec![0xC3]),
            Ok(vec![0xA9]),
            Ok(b"\"}}]}\n".to_vec())
        ];
        let fragments: Vec<String> = decode_stream(stream::iter(chunks))
            .map(|f| f.unwrap())
            .collect().await;
        assert!(fragments.iter().all(|f| !f.is_empty()));
        assert_eq!(accumulate_body(&fragments.concat()), "café");
    }

    #[tokio::test]
    async fn decode_stream_stops_after_source_error() {
        let chunks: Vec<Result<&[u8], &str>> = vec![
            Ok(b"first".as_slice()),
            Err("connection reset"),
            Ok(b"never".as_slice())
        ];
        let items: Vec<Result<String, &str>> = decode_stream(stream::iter(chunks)).collect().await;
        assert_eq!(items, vec![Ok("first".to_string()), Err("connection reset")]);
    }
}
