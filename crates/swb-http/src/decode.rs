//! Incremental UTF-8 decoding of a chunked body
//!
//! Network chunks may split a multi-byte character. The decoder emits every
//! complete character as soon as it arrives and holds back an incomplete
//! trailing sequence until the next chunk completes it.

use futures::stream::{Stream, StreamExt};
use swb_core::{BackendError, TextStream};

const REPLACEMENT: char = '\u{FFFD}';

/// Streaming UTF-8 decoder
#[derive(Debug, Default)]
pub(crate) struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Decode a chunk, returning every complete character
    ///
    /// Invalid sequences decode to U+FFFD.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    // Prefix is valid by construction.
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(REPLACEMENT);
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }

    /// Flush what is left at end of stream
    pub(crate) fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

/// Adapt a byte stream into a text stream
pub(crate) fn text_stream<S, B>(body: S) -> TextStream
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]>,
{
    let state = Some((Box::pin(body), Utf8Decoder::default()));
    futures::stream::unfold(state, |state| async move {
        let (mut body, mut decoder) = state?;
        match body.next().await {
            Some(Ok(bytes)) => {
                let text = decoder.push(bytes.as_ref());
                Some((Ok(text), Some((body, decoder))))
            }
            Some(Err(e)) => Some((Err(BackendError::Transport(e.to_string())), None)),
            None => {
                let rest = decoder.finish();
                if rest.is_empty() {
                    None
                } else {
                    Some((Ok(rest), None))
                }
            }
        }
    })
    .boxed()
}
