pub mod flowise;
pub mod openai;

use futures::{Stream, StreamExt};
use log::{debug, error};
use reqwest::{Response, StatusCode};
use std::error::Error as StdError;
use std::io::Write;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned {status}: {body}")]
    Status {
        url: String,
        status: StatusCode,
        body: String,
    },
}

/// Outcome of decoding one line of a data-prefixed event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataLine {
    /// The line carried an incremental text fragment.
    Token(String),
    /// End-of-stream sentinel; stop reading.
    Done,
    /// Nothing to emit for this line.
    Skip,
}

/// Rejects non-2xx responses, logging the status and whatever body the
/// server sent along with it.
pub(crate) async fn check_status(url: &str, resp: Response) -> Result<Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    error!("{} returned {}: {}", url, status, body);
    Err(ClientError::Status {
        url: url.to_string(),
        status,
        body,
    })
}

/// Turns an open streaming response into a lazy stream of text fragments,
/// decoded line by line with the given parser. The body is pumped by a
/// spawned task and consumed exactly once.
pub fn fragment_stream(
    resp: Response,
    parse: fn(&str) -> DataLine,
) -> Pin<Box<dyn Stream<Item = Result<String, Box<dyn StdError + Send + Sync>>> + Send>> {
    let (tx, rx) = mpsc::channel(32);
    tokio::spawn(async move {
        pump_lines(Box::pin(resp.bytes_stream()), parse, tx).await;
    });
    Box::pin(ReceiverStream::new(rx))
}

/// Prints each fragment to stdout the moment it arrives and returns the
/// full concatenation once the stream is exhausted.
pub async fn print_fragment_stream(
    resp: Response,
    parse: fn(&str) -> DataLine,
) -> Result<String, Box<dyn StdError + Send + Sync>> {
    let mut fragments = fragment_stream(resp, parse);
    let mut collected = String::new();
    let mut out = std::io::stdout();
    while let Some(next) = fragments.next().await {
        let token = next?;
        write!(out, "{}", token)?;
        out.flush()?;
        collected.push_str(&token);
    }
    println!();
    Ok(collected)
}

/// Carves the byte stream into lines and feeds each through the parser.
/// Network chunks do not respect line boundaries, so the trailing partial
/// line is buffered until its newline arrives; a final unterminated line is
/// flushed at end of stream.
async fn pump_lines<S, B, E>(
    mut body: S,
    parse: fn(&str) -> DataLine,
    tx: mpsc::Sender<Result<String, Box<dyn StdError + Send + Sync>>>,
) where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: StdError + Send + Sync + 'static,
{
    let mut buf: Vec<u8> = Vec::new();
    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = tx.send(Err(Box::new(e) as _)).await;
                return;
            }
        };
        buf.extend_from_slice(chunk.as_ref());
        while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = buf.drain(..=pos).collect();
            let line = decode_line(&raw);
            debug!("stream line: {}", line);
            match parse(&line) {
                DataLine::Token(token) => {
                    if tx.send(Ok(token)).await.is_err() {
                        return;
                    }
                }
                DataLine::Done => return,
                DataLine::Skip => {}
            }
        }
    }
    if !buf.is_empty() {
        if let DataLine::Token(token) = parse(&decode_line(&buf)) {
            let _ = tx.send(Ok(token)).await;
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    while end > 0 && (raw[end - 1] == b'\n' || raw[end - 1] == b'\r') {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Runs the line pump over in-memory byte chunks and collects every
    /// emitted fragment.
    pub async fn collect_fragments(chunks: Vec<&str>, parse: fn(&str) -> DataLine) -> Vec<String> {
        let owned: Vec<Result<Vec<u8>, std::io::Error>> =
            chunks.into_iter().map(|c| Ok(c.as_bytes().to_vec())).collect();
        let body = futures::stream::iter(owned);
        let (tx, mut rx) = mpsc::channel(32);
        pump_lines(Box::pin(body), parse, tx).await;
        let mut out = Vec::new();
        while let Some(item) = rx.recv().await {
            out.push(item.expect("unexpected stream error"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::testing::collect_fragments;
    use super::*;

    fn parse_plain(line: &str) -> DataLine {
        match line.strip_prefix("data: ") {
            Some("[DONE]") => DataLine::Done,
            Some(payload) if !payload.is_empty() => DataLine::Token(payload.to_string()),
            _ => DataLine::Skip,
        }
    }

    #[tokio::test]
    async fn test_emits_fragments_in_line_order() {
        let fragments =
            collect_fragments(vec!["data: one\ndata: two\n", "data: three\n"], parse_plain).await;
        assert_eq!(fragments, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_reassembles_line_split_across_chunks() {
        let fragments =
            collect_fragments(vec!["data: hel", "lo\ndata: [DONE]\n"], parse_plain).await;
        assert_eq!(fragments, vec!["hello"]);
    }

    #[tokio::test]
    async fn test_stops_at_done_sentinel() {
        let fragments = collect_fragments(
            vec!["data: before\ndata: [DONE]\ndata: after\n"],
            parse_plain,
        )
        .await;
        assert_eq!(fragments, vec!["before"]);
    }

    #[tokio::test]
    async fn test_skips_unprefixed_and_empty_lines() {
        let fragments = collect_fragments(
            vec!["\n", ": keep-alive\n", "event: ping\n", "data: ok\n"],
            parse_plain,
        )
        .await;
        assert_eq!(fragments, vec!["ok"]);
    }

    #[tokio::test]
    async fn test_flushes_trailing_unterminated_line() {
        let fragments = collect_fragments(vec!["data: tail"], parse_plain).await;
        assert_eq!(fragments, vec!["tail"]);
    }

    #[tokio::test]
    async fn test_strips_carriage_returns() {
        let fragments = collect_fragments(vec!["data: crlf\r\n"], parse_plain).await;
        assert_eq!(fragments, vec!["crlf"]);
    }
}
