//! Bounded Server-Sent-Events parsing for upstream provider streams.
//!
//! Produces the `data:` payload of each event. A terminal `[DONE]` sentinel
//! ends the stream. Line and event sizes are capped so a misbehaving
//! upstream cannot grow buffers without bound.

use futures_util::TryStreamExt;
use futures_util::stream::{self, BoxStream};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio_util::io::StreamReader;

use crate::{ConduitError, Result};

const MAX_LINE_BYTES: usize = 256 * 1024;
const MAX_EVENT_BYTES: usize = 4 * 1024 * 1024;

/// Streams the `data:` payloads of an SSE response body. The stream ends
/// at EOF or at a `[DONE]` sentinel event.
pub fn sse_data_stream(response: reqwest::Response) -> BoxStream<'static, Result<String>> {
    let bytes = response.bytes_stream().map_err(std::io::Error::other);
    let reader = BufReader::new(StreamReader::new(bytes));
    Box::pin(stream::try_unfold(reader, |mut reader| async move {
        match next_event(&mut reader).await? {
            Some(data) => Ok(Some((data, reader))),
            None => Ok(None),
        }
    }))
}

/// Reads lines until a blank line terminates the pending event, joining
/// multiple `data:` lines with `\n` per the SSE framing rules.
async fn next_event<R>(reader: &mut R) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut event = String::new();
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = (&mut *reader)
            .take(MAX_LINE_BYTES as u64 + 1)
            .read_until(b'\n', &mut line)
            .await?;
        if line.len() > MAX_LINE_BYTES {
            return Err(ConduitError::InvalidResponse(format!(
                "sse line exceeds {MAX_LINE_BYTES} bytes"
            )));
        }
        if read == 0 {
            // EOF. An unterminated trailing event is still delivered.
            if event.is_empty() || event == "[DONE]" {
                return Ok(None);
            }
            return Ok(Some(event));
        }

        let text = std::str::from_utf8(&line)
            .map_err(|err| ConduitError::InvalidResponse(format!("invalid sse utf-8: {err}")))?;
        let text = text.trim_end_matches(['\r', '\n']);

        if text.is_empty() {
            if event.is_empty() {
                continue;
            }
            if event == "[DONE]" {
                return Ok(None);
            }
            return Ok(Some(event));
        }

        if let Some(payload) = text.strip_prefix("data:") {
            let payload = payload.strip_prefix(' ').unwrap_or(payload);
            if event.len() + payload.len() + 1 > MAX_EVENT_BYTES {
                return Err(ConduitError::InvalidResponse(format!(
                    "sse event exceeds {MAX_EVENT_BYTES} bytes"
                )));
            }
            if !event.is_empty() {
                event.push('\n');
            }
            event.push_str(payload);
        }
        // Comment lines and non-data fields (event:, id:, retry:) are skipped.
    }
}
