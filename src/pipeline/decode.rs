//! Streaming decoder (bytes -> ordered text deltas + final aggregate).
//!
//! Framing is shared; what a payload *means* is supplied by the adapter as a
//! line parser. Three framings are understood:
//! - SSE `data:` lines, optionally terminated by a sentinel payload (`[DONE]`)
//! - NDJSON, one object per line, completion flagged inside the object
//! - typed SSE, `event:` lines naming the meaning of the following `data:` line

use crate::error::{Error, ProviderError};
use crate::types::{ChatResponse, Usage};
use crate::Result;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Characters per token used when the vendor reports no usable usage.
pub const CHARS_PER_TOKEN: usize = 4;

const MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

/// Wire framing of a vendor stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFormat {
    /// `data: <json>` lines; an optional sentinel payload ends the stream.
    Sse { sentinel: Option<&'static str> },
    /// One JSON object per line, no prefix.
    Ndjson,
    /// `event: <type>` + `data: <json>` pairs.
    TypedSse,
}

/// What one decoded line contributed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamLine {
    pub delta: Option<String>,
    /// Partial usage; non-zero fields overwrite what was seen so far.
    pub usage: Option<Usage>,
    pub finish_reason: Option<String>,
    /// Vendor error envelope received mid-stream: `(code, message)`.
    pub error: Option<(Option<String>, String)>,
    pub done: bool,
}

impl StreamLine {
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            delta: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn done() -> Self {
        Self {
            done: true,
            ..Default::default()
        }
    }
}

/// Line-at-a-time decoder state. Feed raw lines in arrival order, then
/// [`LineDecoder::finish`].
pub struct LineDecoder<P> {
    provider: &'static str,
    format: StreamFormat,
    parse: P,
    event: Option<String>,
    content: String,
    usage: Usage,
    finish_reason: Option<String>,
    done: bool,
}

impl<P> LineDecoder<P>
where
    P: Fn(Option<&str>, &str) -> Option<StreamLine>,
{
    pub fn new(provider: &'static str, format: StreamFormat, parse: P) -> Self {
        Self {
            provider,
            format,
            parse,
            event: None,
            content: String::new(),
            usage: Usage::default(),
            finish_reason: None,
            done: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Decode one line. Returns the text delta it carried, if any.
    ///
    /// Lines that do not parse as the expected envelope yield `Ok(None)`.
    pub fn feed_line(&mut self, raw: &str) -> Result<Option<String>> {
        if self.done {
            return Ok(None);
        }
        let line = raw.trim();
        if line.is_empty() || line.starts_with(':') {
            return Ok(None);
        }

        let payload = match self.format {
            StreamFormat::Ndjson => line,
            StreamFormat::Sse { sentinel } => {
                let Some(data) = sse_data(line) else {
                    return Ok(None);
                };
                if sentinel.map_or(false, |s| data == s) {
                    self.done = true;
                    return Ok(None);
                }
                data
            }
            StreamFormat::TypedSse => {
                if let Some(name) = line.strip_prefix("event:") {
                    self.event = Some(name.trim().to_string());
                    return Ok(None);
                }
                let Some(data) = sse_data(line) else {
                    return Ok(None);
                };
                data
            }
        };

        let Some(parsed) = (self.parse)(self.event.as_deref(), payload) else {
            trace!(provider = self.provider, "skipping undecodable stream line");
            return Ok(None);
        };

        if let Some((code, message)) = parsed.error {
            let mut err = ProviderError::new(self.provider, message);
            if let Some(code) = code {
                err = err.with_code(code);
            }
            return Err(Error::Provider(err));
        }
        if let Some(u) = parsed.usage {
            merge_usage(&mut self.usage, u);
        }
        if parsed.finish_reason.is_some() {
            self.finish_reason = parsed.finish_reason;
        }
        if parsed.done {
            self.done = true;
        }
        match parsed.delta {
            Some(d) if !d.is_empty() => {
                self.content.push_str(&d);
                Ok(Some(d))
            }
            _ => Ok(None),
        }
    }

    /// Aggregate response; estimates completion tokens when none were reported.
    pub fn finish(self) -> ChatResponse {
        let mut usage = self.usage;
        if usage.completion_tokens == 0 {
            usage.completion_tokens = estimate_tokens(&self.content);
        }
        usage.total_tokens = usage
            .total_tokens
            .max(usage.prompt_tokens + usage.completion_tokens);
        ChatResponse {
            content: self.content,
            tool_calls: Vec::new(),
            usage,
            finish_reason: self.finish_reason,
            responses_output: None,
        }
    }
}

fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(|d| d.trim_start())
}

fn merge_usage(into: &mut Usage, from: Usage) {
    if from.prompt_tokens > 0 {
        into.prompt_tokens = from.prompt_tokens;
    }
    if from.completion_tokens > 0 {
        into.completion_tokens = from.completion_tokens;
    }
    if from.total_tokens > 0 {
        into.total_tokens = from.total_tokens;
    }
}

/// Deterministic token estimate: characters / [`CHARS_PER_TOKEN`], rounded up.
pub fn estimate_tokens(text: &str) -> u64 {
    let chars = text.chars().count();
    ((chars + CHARS_PER_TOKEN - 1) / CHARS_PER_TOKEN) as u64
}

/// Drive a byte stream through a [`LineDecoder`], invoking `on_chunk` for
/// every delta the moment it is parsed.
///
/// Returns at end-of-input or at the first terminal marker. A read failure on
/// the underlying stream is fatal; a cancelled scope yields `Error::Cancelled`.
pub async fn decode_stream<S, P>(
    provider: &'static str,
    format: StreamFormat,
    parse: P,
    input: S,
    on_chunk: &mut (dyn for<'s> FnMut(&'s str) + Send),
    cancel: &CancellationToken,
) -> Result<ChatResponse>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
    P: Fn(Option<&str>, &str) -> Option<StreamLine>,
{
    let mut decoder = LineDecoder::new(provider, format, parse);
    let mut lines = FramedRead::new(
        StreamReader::new(input),
        LinesCodec::new_with_max_length(MAX_LINE_BYTES),
    );

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            next = lines.next() => next,
        };
        match next {
            None => break,
            Some(Ok(line)) => {
                if let Some(delta) = decoder.feed_line(&line)? {
                    on_chunk(&delta);
                }
                if decoder.is_done() {
                    break;
                }
            }
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                trace!(provider, "skipping oversized stream line");
            }
            Some(Err(LinesCodecError::Io(e))) => {
                return Err(Error::Provider(
                    ProviderError::new(provider, "stream read error").with_source(e),
                ));
            }
        }
    }

    Ok(decoder.finish())
}
