//! Text wire encoding for frames.
//!
//! ```text
//! COMMAND EOL
//! (name:value EOL)*
//! EOL
//! body NUL (EOL)*
//! ```
//!
//! EOL is `\n` or `\r\n`. Header names and values escape `\`, LF, CR and `:`
//! as `\\`, `\n`, `\r` and `\c`. A `content-length` header delimits the body
//! exactly (so bodies may contain NUL); without it the body ends at the first
//! NUL.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::FrameError;
use crate::frame::{header, Command, Frame};

/// Returns `true` for a transport message that carries only heart-beat EOLs.
#[must_use]
pub fn is_heartbeat(raw: &[u8]) -> bool {
    !raw.is_empty() && raw.iter().all(|b| *b == b'\n' || *b == b'\r')
}

pub(crate) fn encode(frame: &Frame) -> Bytes {
    let mut buf = BytesMut::with_capacity(64 + frame.body().len());

    buf.put_slice(frame.command().as_str().as_bytes());
    buf.put_u8(b'\n');

    if let Some(destination) = frame.destination() {
        put_header(&mut buf, header::DESTINATION, destination);
    }
    if let (Some(name), Some(id)) = (frame.command().subscription_header(), frame.subscription()) {
        put_header(&mut buf, name, id);
    }
    for (name, value) in frame.extra_headers() {
        put_header(&mut buf, name, value);
    }
    if !frame.body().is_empty() {
        put_header(&mut buf, header::CONTENT_LENGTH, &frame.body().len().to_string());
    }

    buf.put_u8(b'\n');
    buf.put_slice(frame.body());
    buf.put_u8(0);
    buf.freeze()
}

fn put_header(buf: &mut BytesMut, name: &str, value: &str) {
    escape_into(buf, name);
    buf.put_u8(b':');
    escape_into(buf, value);
    buf.put_u8(b'\n');
}

fn escape_into(buf: &mut BytesMut, text: &str) {
    for byte in text.bytes() {
        match byte {
            b'\\' => buf.put_slice(b"\\\\"),
            b'\n' => buf.put_slice(b"\\n"),
            b'\r' => buf.put_slice(b"\\r"),
            b':' => buf.put_slice(b"\\c"),
            other => buf.put_u8(other),
        }
    }
}

pub(crate) fn decode(raw: &[u8]) -> Result<Frame, FrameError> {
    let mut cursor = Cursor::new(raw);
    cursor.skip_eols();
    if cursor.is_empty() {
        return Err(FrameError::malformed("empty frame"));
    }

    let command_line = cursor
        .line()
        .ok_or_else(|| FrameError::malformed("unterminated command line"))?;
    let command_name = std::str::from_utf8(command_line)
        .map_err(|_| FrameError::malformed("command is not valid UTF-8"))?;
    let command = Command::from_wire(command_name)
        .ok_or_else(|| FrameError::malformed(format!("unknown command {command_name:?}")))?;

    let mut headers = Vec::new();
    loop {
        let line = cursor
            .line()
            .ok_or_else(|| FrameError::malformed("headers are not terminated by a blank line"))?;
        if line.is_empty() {
            break;
        }
        headers.push(parse_header(line)?);
    }

    let content_length = headers
        .iter()
        .find(|(name, _)| name == header::CONTENT_LENGTH)
        .map(|(_, value)| {
            value.parse::<usize>().map_err(|_| {
                FrameError::malformed(format!("invalid content-length {value:?}"))
            })
        })
        .transpose()?;

    let rest = cursor.remaining();
    let (body, after) = match content_length {
        Some(len) => {
            if rest.len() <= len || rest[len] != 0 {
                return Err(FrameError::malformed(
                    "body shorter than content-length or not NUL-terminated",
                ));
            }
            (&rest[..len], &rest[len + 1..])
        }
        None => {
            let nul = rest
                .iter()
                .position(|b| *b == 0)
                .ok_or_else(|| FrameError::malformed("missing NUL terminator"))?;
            (&rest[..nul], &rest[nul + 1..])
        }
    };

    if !after.iter().all(|b| *b == b'\n' || *b == b'\r') {
        return Err(FrameError::malformed("trailing data after NUL terminator"));
    }

    Frame::from_parts(command, headers, Bytes::copy_from_slice(body))
}

fn parse_header(line: &[u8]) -> Result<(String, String), FrameError> {
    let text = std::str::from_utf8(line)
        .map_err(|_| FrameError::malformed("header is not valid UTF-8"))?;
    let (name, value) = text
        .split_once(':')
        .ok_or_else(|| FrameError::malformed(format!("header without ':' {text:?}")))?;
    Ok((unescape(name)?, unescape(value)?))
}

fn unescape(text: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            Some(other) => {
                return Err(FrameError::malformed(format!(
                    "undefined escape sequence \\{other}"
                )))
            }
            None => return Err(FrameError::malformed("dangling escape at end of header")),
        }
    }
    Ok(out)
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    fn skip_eols(&mut self) {
        while let Some(b'\n' | b'\r') = self.buf.get(self.pos) {
            self.pos += 1;
        }
    }

    /// Next line without its EOL, or `None` if no EOL follows.
    fn line(&mut self) -> Option<&'a [u8]> {
        let rest = self.remaining();
        let end = rest.iter().position(|b| *b == b'\n')?;
        self.pos += end + 1;
        let line = &rest[..end];
        Some(line.strip_suffix(b"\r").unwrap_or(line))
    }
}
