//! Framing for the game server console.
//!
//! Decodes stdout into lines and encodes console commands for stdin.
//! Server output is not guaranteed to be valid UTF-8, so lines are decoded
//! lossily instead of failing the whole stream.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Lines longer than this are truncated; the excess is discarded up to the next newline.
pub const MAX_LINE_LEN: usize = 8 * 1024;

#[derive(Debug, Default)]
pub struct ConsoleCodec {
    /// Set while skipping the remainder of an over-long line.
    discarding: bool,
}

impl ConsoleCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

impl Decoder for ConsoleCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match src.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    let line = src.split_to(pos + 1);
                    if self.discarding {
                        self.discarding = false;
                        continue;
                    }
                    let end = pos.min(MAX_LINE_LEN);
                    return Ok(Some(decode_line(&line[..end])));
                }
                None if src.len() > MAX_LINE_LEN => {
                    if self.discarding {
                        src.clear();
                        return Ok(None);
                    }
                    let line = src.split_to(MAX_LINE_LEN);
                    src.clear();
                    self.discarding = true;
                    return Ok(Some(decode_line(&line)));
                }
                None => return Ok(None),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() || self.discarding {
            src.clear();
            return Ok(None);
        }
        let rest = src.split_to(src.len());
        Ok(Some(decode_line(&rest)))
    }
}

impl Encoder<String> for ConsoleCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = item.trim_end_matches(['\r', '\n']);
        dst.reserve(line.len() + 1);
        dst.put_slice(line.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}
