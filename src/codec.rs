// STOMP 1.2 wire codec - separates the incremental frame parser and the
// serializer from the connection/subscription logic that uses them.
//
// The parser is a restartable state machine: it can be fed byte chunks of
// any size, in any split, and still yields exactly the frames the whole
// stream would have produced. This is what lets `StompCodec` sit behind
// `tokio_util::codec::Framed` over a plain `TcpStream`.

use crate::frame::{Command, Frame, Headers};
use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Codec-level failures. Most malformed input is handled leniently (an
/// unrecognized command resets the parser rather than erroring, matching
/// how brokers in the wild occasionally send vendor extension frames) -
/// these variants are reserved for input that can't be recovered from.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame header is not valid UTF-8")]
    InvalidUtf8,

    #[error("unrecognized STOMP command {0:?}")]
    UnknownCommand(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
enum ParseState {
    SeekingCommand,
    Discarding,
    ReadingHeaders {
        command: Command,
        headers: Headers,
        content_length: Option<usize>,
    },
    ReadingBody {
        command: Command,
        headers: Headers,
        body: Vec<u8>,
        remaining: Option<usize>,
    },
}

/// Incremental STOMP frame parser.
///
/// Push bytes in via whatever buffer you have (a socket read, a WebSocket
/// text message, a test fixture) and pull frames out with [`Self::parse`].
/// The parser never blocks or rewinds: bytes it has consumed are gone,
/// and a frame is only returned once it is fully available.
#[derive(Debug)]
pub struct FrameParser {
    state: ParseState,
    strict_unknown_commands: bool,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    pub fn new() -> Self {
        Self {
            state: ParseState::SeekingCommand,
            strict_unknown_commands: false,
        }
    }

    /// When set, an unrecognized command mid-stream is a fatal
    /// [`CodecError::UnknownCommand`] instead of a silent reset.
    pub fn with_strict_unknown_commands(mut self, strict: bool) -> Self {
        self.strict_unknown_commands = strict;
        self
    }

    /// Pulls every frame obtainable from `buf` right now, leaving any
    /// trailing partial frame buffered in `self` for the next call.
    pub fn parse_frames_from_chunk(&mut self, buf: &mut BytesMut) -> Result<Vec<Frame>, CodecError> {
        let mut frames = Vec::new();
        while let Some(frame) = self.parse(buf)? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Attempts to parse a single frame out of `buf`, consuming whatever
    /// bytes it uses. Returns `Ok(None)` when `buf` holds only a partial
    /// frame; the remaining state survives until more bytes arrive.
    pub fn parse(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
        loop {
            let state = std::mem::replace(&mut self.state, ParseState::SeekingCommand);
            match state {
                ParseState::SeekingCommand => match find_byte(buf, b'\n') {
                    None => {
                        self.state = ParseState::SeekingCommand;
                        return Ok(None);
                    }
                    Some(nl) => {
                        let line = take_line(buf, nl);
                        if line.is_empty() {
                            self.state = ParseState::SeekingCommand;
                            return Ok(Some(Frame::Heartbeat));
                        }
                        let text = String::from_utf8_lossy(&line).into_owned();
                        match Command::from_str(&text) {
                            Some(command) => {
                                self.state = ParseState::ReadingHeaders {
                                    command,
                                    headers: Headers::new(),
                                    content_length: None,
                                };
                            }
                            None if self.strict_unknown_commands => {
                                return Err(CodecError::UnknownCommand(text));
                            }
                            None => {
                                tracing::debug!(command = %text, "discarding frame with unrecognized command");
                                self.state = ParseState::Discarding;
                            }
                        }
                    }
                },
                ParseState::Discarding => match find_byte(buf, 0) {
                    None => {
                        buf.clear();
                        self.state = ParseState::Discarding;
                        return Ok(None);
                    }
                    Some(nul) => {
                        buf.advance(nul + 1);
                        self.state = ParseState::SeekingCommand;
                    }
                },
                ParseState::ReadingHeaders {
                    command,
                    mut headers,
                    mut content_length,
                } => {
                    let nl = find_byte(buf, b'\n');
                    let nul = find_byte(buf, 0);
                    match (nl, nul) {
                        (nl, Some(nul_pos)) if nl.is_none_or(|nl_pos| nul_pos < nl_pos) => {
                            buf.advance(nul_pos + 1);
                            self.state = ParseState::SeekingCommand;
                        }
                        (Some(nl_pos), _) => {
                            let line = take_line(buf, nl_pos);
                            if line.is_empty() {
                                self.state = ParseState::ReadingBody {
                                    command,
                                    headers,
                                    body: Vec::new(),
                                    remaining: content_length,
                                };
                            } else {
                                if let Some((name, value)) =
                                    parse_header_line(&line, command.skips_header_escaping())?
                                {
                                    if headers.get(&name).is_none() {
                                        if name == "content-length" {
                                            match value.parse::<usize>() {
                                                Ok(len) => content_length = Some(len),
                                                Err(_) => tracing::warn!(
                                                    value = %value,
                                                    "ignoring unparsable content-length header"
                                                ),
                                            }
                                        }
                                        headers.push(name, value);
                                    }
                                }
                                self.state = ParseState::ReadingHeaders {
                                    command,
                                    headers,
                                    content_length,
                                };
                            }
                        }
                        (None, _) => {
                            self.state = ParseState::ReadingHeaders {
                                command,
                                headers,
                                content_length,
                            };
                            return Ok(None);
                        }
                    }
                }
                ParseState::ReadingBody {
                    command,
                    headers,
                    mut body,
                    remaining,
                } => match remaining {
                    Some(len) => {
                        let need = len.saturating_sub(body.len());
                        let avail = buf.len().min(need);
                        if avail > 0 {
                            body.extend_from_slice(&buf[..avail]);
                            buf.advance(avail);
                        }
                        if body.len() < len || buf.is_empty() {
                            self.state = ParseState::ReadingBody {
                                command,
                                headers,
                                body,
                                remaining,
                            };
                            return Ok(None);
                        }
                        buf.advance(1); // terminating NUL
                        self.state = ParseState::SeekingCommand;
                        return Ok(Some(Frame::Command { command, headers, body }));
                    }
                    None => match find_byte(buf, 0) {
                        Some(nul_pos) => {
                            body.extend_from_slice(&buf[..nul_pos]);
                            buf.advance(nul_pos + 1);
                            self.state = ParseState::SeekingCommand;
                            return Ok(Some(Frame::Command { command, headers, body }));
                        }
                        None => {
                            body.extend_from_slice(&buf[..]);
                            buf.clear();
                            self.state = ParseState::ReadingBody {
                                command,
                                headers,
                                body,
                                remaining,
                            };
                            return Ok(None);
                        }
                    },
                },
            }
        }
    }
}

fn find_byte(buf: &BytesMut, target: u8) -> Option<usize> {
    buf.iter().position(|&b| b == target)
}

fn take_line(buf: &mut BytesMut, nl_pos: usize) -> Vec<u8> {
    let mut line = buf.split_to(nl_pos).to_vec();
    buf.advance(1); // consume the '\n'
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    line
}

fn parse_header_line(line: &[u8], skip_escaping: bool) -> Result<Option<(String, String)>, CodecError> {
    let Some(colon) = line.iter().position(|&b| b == b':') else {
        tracing::warn!("ignoring header line with no ':' separator");
        return Ok(None);
    };
    let (name_bytes, rest) = line.split_at(colon);
    let value_bytes = &rest[1..];
    if skip_escaping {
        let name = String::from_utf8(name_bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)?;
        let value = String::from_utf8(value_bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)?;
        Ok(Some((name, value)))
    } else {
        Ok(Some((unescape(name_bytes)?, unescape(value_bytes)?)))
    }
}

fn unescape(bytes: &[u8]) -> Result<String, CodecError> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() {
            match bytes[i + 1] {
                b'n' => out.push(b'\n'),
                b'c' => out.push(b':'),
                b'\\' => out.push(b'\\'),
                other => {
                    out.push(b'\\');
                    out.push(other);
                }
            }
            i += 2;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| CodecError::InvalidUtf8)
}

fn escape_into(s: &str, buf: &mut BytesMut) {
    for ch in s.chars() {
        match ch {
            '\n' => buf.extend_from_slice(b"\\n"),
            ':' => buf.extend_from_slice(b"\\c"),
            '\\' => buf.extend_from_slice(b"\\\\"),
            '\r' => {}
            other => {
                let mut tmp = [0u8; 4];
                buf.extend_from_slice(other.encode_utf8(&mut tmp).as_bytes());
            }
        }
    }
}

/// Serializes `frame` onto the end of `buf`.
pub fn encode_frame(frame: &Frame, buf: &mut BytesMut) {
    match frame {
        Frame::Heartbeat => buf.put_u8(b'\n'),
        Frame::Command { command, headers, body } => {
            buf.extend_from_slice(command.as_str().as_bytes());
            buf.put_u8(b'\n');
            for (name, value) in headers.sorted() {
                if command.skips_header_escaping() {
                    buf.extend_from_slice(name.as_bytes());
                    buf.put_u8(b':');
                    buf.extend_from_slice(value.as_bytes());
                } else {
                    escape_into(name, buf);
                    buf.put_u8(b':');
                    escape_into(value, buf);
                }
                buf.put_u8(b'\n');
            }
            buf.put_u8(b'\n');
            buf.extend_from_slice(body);
            buf.put_u8(0);
        }
    }
}

/// `tokio_util::codec` adapter so the parser composes with `Framed` over
/// any `AsyncRead + AsyncWrite` transport.
#[derive(Debug, Default)]
pub struct StompCodec {
    parser: FrameParser,
}

impl StompCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strict_unknown_commands(strict: bool) -> Self {
        Self {
            parser: FrameParser::new().with_strict_unknown_commands(strict),
        }
    }
}

impl Decoder for StompCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
        self.parser.parse(src)
    }
}

impl Encoder<Frame> for StompCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), CodecError> {
        encode_frame(&item, dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(input: &[u8]) -> Vec<Frame> {
        let mut parser = FrameParser::new();
        let mut buf = BytesMut::from(input);
        parser.parse_frames_from_chunk(&mut buf).unwrap()
    }

    #[test]
    fn round_trips_a_send_frame() {
        let frame = Frame::with_body(Command::Send, b"Hi!".to_vec())
            .header("destination", "DLQ")
            .header("content-length", "3");
        let mut buf = BytesMut::new();
        encode_frame(&frame, &mut buf);
        assert_eq!(
            &buf[..],
            b"SEND\ncontent-length:3\ndestination:DLQ\n\nHi!\x00"
        );

        let frames = parse_all(&buf);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].get_header("destination"), Some("DLQ"));
        assert_eq!(frames[0].body(), b"Hi!");
    }

    #[test]
    fn parses_heartbeats_and_a_connected_frame_split_across_arbitrary_chunks() {
        let whole = b"\n\n\nCONNECTED\nserver:some server\nversion:1.2\n\n\x00";
        let mut parser = FrameParser::new();
        let mut all_frames = Vec::new();
        // Feed the input in deliberately awkward chunk boundaries.
        for chunk in whole.chunks(3) {
            let mut buf = BytesMut::from(chunk);
            all_frames.extend(parser.parse_frames_from_chunk(&mut buf).unwrap());
        }
        assert_eq!(all_frames.len(), 4);
        assert_eq!(all_frames[0], Frame::Heartbeat);
        assert_eq!(all_frames[1], Frame::Heartbeat);
        assert_eq!(all_frames[2], Frame::Heartbeat);
        match &all_frames[3] {
            Frame::Command { command, headers, .. } => {
                assert_eq!(*command, Command::Connected);
                assert_eq!(headers.get("version"), Some("1.2"));
                assert_eq!(headers.get("server"), Some("some server"));
            }
            other => panic!("expected CONNECTED, got {other:?}"),
        }
    }

    #[test]
    fn escapes_and_unescapes_reserved_header_characters() {
        let frame = Frame::new(Command::Send)
            .header("funky:na\\me", "line\nbreak")
            .header("content-length", "0");
        let mut buf = BytesMut::new();
        encode_frame(&frame, &mut buf);
        let frames = parse_all(&buf);
        assert_eq!(frames[0].get_header("funky:na\\me"), Some("line\nbreak"));
    }

    #[test]
    fn first_occurrence_of_a_repeated_header_wins() {
        let raw = b"MESSAGE\nfoo:first\nfoo:second\ncontent-length:0\n\n\x00";
        let frames = parse_all(raw);
        assert_eq!(frames[0].get_header("foo"), Some("first"));
    }

    #[test]
    fn unrecognized_command_resets_the_parser_by_default() {
        let raw = b"BOGUS\nheader:value\n\n\x00SEND\ndestination:X\ncontent-length:0\n\n\x00";
        let frames = parse_all(raw);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command(), Some(Command::Send));
    }

    #[test]
    fn unrecognized_command_is_fatal_in_strict_mode() {
        let mut parser = FrameParser::new().with_strict_unknown_commands(true);
        let mut buf = BytesMut::from(&b"BOGUS\n\n\x00"[..]);
        assert!(matches!(parser.parse(&mut buf), Err(CodecError::UnknownCommand(_))));
    }

    #[test]
    fn connect_frame_headers_are_not_escaped() {
        let frame = Frame::new(Command::Connect).header("login", "a:b");
        let mut buf = BytesMut::new();
        encode_frame(&frame, &mut buf);
        assert_eq!(&buf[..], b"CONNECT\nlogin:a:b\n\n\x00");
    }
}
