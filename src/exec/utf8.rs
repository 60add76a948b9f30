// src/exec/utf8.rs

//! Incremental UTF-8 decoding for streamed process output.
//!
//! A poll may land in the middle of a multi-byte character. The decoder keeps
//! an incomplete trailing sequence (at most three bytes) until the next chunk
//! arrives, and replaces genuinely invalid bytes with U+FFFD.

#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return every complete character decoded so far.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut out = String::new();
        let mut consumed = 0;

        loop {
            let rest = &self.pending[consumed..];
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    consumed = self.pending.len();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&rest[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            consumed += valid + bad;
                        }
                        None => {
                            // Truncated sequence at the end; wait for more.
                            consumed += valid;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..consumed);
        out
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
