// Wire codec for the line protocol
// Frame layout: TYPE|CONTENT|LAT|LON|TIMESTAMP followed by a line terminator

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;
use crate::models::{Message, MessageType};

pub const FIELD_DELIMITER: char = '|';

/// Number of mandatory fields in a message frame
pub const MIN_FIELDS: usize = 5;

/// Upper bound on an unterminated line held in the receive buffer
pub const MAX_PENDING_BYTES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineTerminator {
    Cr,
    Lf,
    #[default]
    CrLf,
}

impl LineTerminator {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            LineTerminator::Cr => b"\r",
            LineTerminator::Lf => b"\n",
            LineTerminator::CrLf => b"\r\n",
        }
    }
}

impl fmt::Display for LineTerminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LineTerminator::Cr => "cr",
            LineTerminator::Lf => "lf",
            LineTerminator::CrLf => "crlf",
        })
    }
}

impl FromStr for LineTerminator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cr" => Ok(LineTerminator::Cr),
            "lf" => Ok(LineTerminator::Lf),
            "crlf" => Ok(LineTerminator::CrLf),
            other => Err(format!("unknown line terminator '{}' (expected cr, lf or crlf)", other)),
        }
    }
}

/// Render a message as a wire line without terminator.
///
/// Content is written as-is; callers must keep `|` and line breaks out of it
/// (see [`crate::models::validate_content`]).
pub fn encode_line(message: &Message) -> String {
    // f64 Display always uses '.', independent of locale
    format!(
        "{}{d}{}{d}{}{d}{}{d}{}",
        message.message_type().as_str(),
        message.content(),
        message.latitude(),
        message.longitude(),
        message.timestamp(),
        d = FIELD_DELIMITER
    )
}

pub fn encode(message: &Message, terminator: LineTerminator) -> Vec<u8> {
    let mut bytes = encode_line(message).into_bytes();
    bytes.extend_from_slice(terminator.as_bytes());
    bytes
}

/// Parse one wire line into a message.
///
/// Fields beyond the fifth are ignored. The decoded message gets a fresh id
/// and a zero hop count since neither travels on the wire.
pub fn decode(line: &str) -> Result<Message, ParseError> {
    let parts: Vec<&str> = line.trim().split(FIELD_DELIMITER).collect();
    if parts.len() < MIN_FIELDS {
        return Err(ParseError::TooFewFields {
            expected: MIN_FIELDS,
            found: parts.len(),
        });
    }

    let message_type: MessageType = parts[0].parse()?;
    let latitude = parse_coordinate("latitude", parts[2])?;
    let longitude = parse_coordinate("longitude", parts[3])?;
    let timestamp = parts[4]
        .trim()
        .parse::<i64>()
        .map_err(|_| ParseError::BadNumber {
            field: "timestamp",
            value: parts[4].to_string(),
        })?;

    Ok(Message::with_timestamp(message_type, parts[1], timestamp).with_location(latitude, longitude))
}

fn parse_coordinate(field: &'static str, value: &str) -> Result<f64, ParseError> {
    match value.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(ParseError::BadNumber {
            field,
            value: value.to_string(),
        }),
    }
}

/// One unit pulled out of the receive buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Line(String),
    /// Leading `MAX_PENDING_BYTES` of a line that outgrew the buffer; the rest
    /// of that line is dropped up to its terminator
    Overflow(String),
}

/// Accumulates transport chunks and yields complete lines in arrival order.
///
/// Any of CR, LF or CRLF ends a line on input; empty lines are skipped.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    pending: Vec<u8>,
    discarding: bool,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every frame it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        for &byte in chunk {
            if byte == b'\r' || byte == b'\n' {
                if self.discarding {
                    debug!("Oversized line terminated, resuming");
                    self.discarding = false;
                } else if !self.pending.is_empty() {
                    frames.push(Frame::Line(String::from_utf8_lossy(&self.pending).into_owned()));
                    self.pending.clear();
                }
                continue;
            }
            if self.discarding {
                continue;
            }
            self.pending.push(byte);
            if self.pending.len() >= MAX_PENDING_BYTES {
                warn!("Discarding unterminated line of {} bytes", self.pending.len());
                frames.push(Frame::Overflow(String::from_utf8_lossy(&self.pending).into_owned()));
                self.pending.clear();
                self.discarding = true;
            }
        }
        if !self.pending.is_empty() {
            debug!("Holding {} bytes of partial frame", self.pending.len());
        }
        frames
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.discarding = false;
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && !self.discarding
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(items: &[&str]) -> Vec<Frame> {
        items.iter().map(|l| Frame::Line(l.to_string())).collect()
    }

    fn sample() -> Message {
        Message::with_timestamp(MessageType::Emergency, "Need help", 1_700_000_000_000)
            .with_location(37.774900, -122.419400)
    }

    #[test]
    fn test_encode_reference_frame() {
        assert_eq!(encode_line(&sample()), "EMERGENCY|Need help|37.7749|-122.4194|1700000000000");
        assert_eq!(
            encode(&sample(), LineTerminator::CrLf),
            b"EMERGENCY|Need help|37.7749|-122.4194|1700000000000\r\n".to_vec()
        );
        assert!(encode(&sample(), LineTerminator::Lf).ends_with(b"0\n"));
        assert!(encode(&sample(), LineTerminator::Cr).ends_with(b"0\r"));
    }

    #[test]
    fn test_decode_reference_frame() {
        let original = sample();
        let decoded = decode("EMERGENCY|Need help|37.7749|-122.4194|1700000000000").unwrap();
        assert_eq!(decoded.message_type(), original.message_type());
        assert_eq!(decoded.content(), original.content());
        assert_eq!(decoded.latitude(), original.latitude());
        assert_eq!(decoded.longitude(), original.longitude());
        assert_eq!(decoded.timestamp(), original.timestamp());
        assert_eq!(decoded.hop_count(), 0);
        assert_ne!(decoded.id(), original.id());
    }

    #[test]
    fn test_round_trip_keeps_payload() {
        let cases = [
            Message::with_timestamp(MessageType::Regular, "hello there", 0),
            Message::with_timestamp(MessageType::Sos, "sos", 1).with_location(-89.999999, 179.5),
            Message::with_timestamp(MessageType::Relay, "fwd", 42).with_location(0.1 + 0.2, -0.000001),
        ];
        for msg in cases {
            let bytes = encode(&msg, LineTerminator::Lf);
            let decoded = decode(std::str::from_utf8(&bytes).unwrap()).unwrap();
            assert_eq!(decoded.message_type(), msg.message_type());
            assert_eq!(decoded.content(), msg.content());
            assert_eq!(decoded.timestamp(), msg.timestamp());
            assert!((decoded.latitude() - msg.latitude()).abs() < 1e-9);
            assert!((decoded.longitude() - msg.longitude()).abs() < 1e-9);
        }
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            decode("REGULAR|hi|1|2"),
            Err(ParseError::TooFewFields { expected: 5, found: 4 })
        );
        assert_eq!(decode("PING|hi|1|2|3"), Err(ParseError::UnknownType("PING".to_string())));
        assert_eq!(decode("Regular|hi|1|2|3"), Err(ParseError::UnknownType("Regular".to_string())));
        assert!(matches!(
            decode("SOS|hi|north|2|3"),
            Err(ParseError::BadNumber { field: "latitude", .. })
        ));
        assert!(matches!(
            decode("SOS|hi|1|NaN|3"),
            Err(ParseError::BadNumber { field: "longitude", .. })
        ));
        assert!(matches!(
            decode("SOS|hi|1|2|soon"),
            Err(ParseError::BadNumber { field: "timestamp", .. })
        ));
        assert!(matches!(decode(""), Err(ParseError::TooFewFields { .. })));
    }

    #[test]
    fn test_decode_ignores_extra_fields() {
        let msg = decode("RELAY|hop|1.5|2.5|99|ABC123|1").unwrap();
        assert_eq!(msg.message_type(), MessageType::Relay);
        assert_eq!(msg.timestamp(), 99);
    }

    #[test]
    fn test_frame_buffer_reassembles_split_chunks() {
        let mut buffer = FrameBuffer::new();
        assert!(buffer.push(b"SOS|trap").is_empty());
        assert_eq!(buffer.pending_len(), 8);
        assert!(buffer.push(b"ped|1|2|").is_empty());

        let frames = buffer.push(b"3\r\nREGULAR|ok|0|0|4\r\nEMER");
        assert_eq!(frames, lines(&["SOS|trapped|1|2|3", "REGULAR|ok|0|0|4"]));
        assert_eq!(buffer.pending_len(), 4);

        buffer.clear();
        assert!(buffer.is_empty());
        assert!(buffer.push(b"\n").is_empty());
    }

    #[test]
    fn test_frame_buffer_accepts_any_line_ending() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(b"a\rb\nc\r\n\r\nd");
        assert_eq!(frames, lines(&["a", "b", "c"]));
        assert_eq!(buffer.push(b"\r"), lines(&["d"]));
    }

    #[test]
    fn test_frame_buffer_bounds_partial_line() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&vec![b'x'; MAX_PENDING_BYTES + 10]);
        assert_eq!(frames.len(), 1);
        assert!(matches!(&frames[0], Frame::Overflow(line) if line.len() == MAX_PENDING_BYTES));
        assert_eq!(buffer.pending_len(), 0);
        assert!(!buffer.is_empty());

        // the tail of the oversized line never becomes a frame
        assert!(buffer.push(b"xxxx\r\n").is_empty());
        assert!(buffer.is_empty());
        assert_eq!(buffer.push(b"REGULAR|ok|0|0|4\n"), lines(&["REGULAR|ok|0|0|4"]));
    }

    #[test]
    fn test_overflow_tail_cannot_smuggle_a_frame() {
        let mut buffer = FrameBuffer::new();
        let mut chunk = b"REGULAR|".to_vec();
        chunk.resize(MAX_PENDING_BYTES, b'x');
        chunk.extend_from_slice(b"SOS|injected|1|2|3\nSOS|real|5|6|7\n");

        let frames = buffer.push(&chunk);
        assert_eq!(frames.len(), 2);
        assert!(matches!(&frames[0], Frame::Overflow(line) if line.starts_with("REGULAR|")));
        match &frames[1] {
            Frame::Line(line) => assert_eq!(decode(line).unwrap().content(), "real"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_terminator_parsing() {
        assert_eq!("CRLF".parse::<LineTerminator>(), Ok(LineTerminator::CrLf));
        assert_eq!(" lf ".parse::<LineTerminator>(), Ok(LineTerminator::Lf));
        assert!("nl".parse::<LineTerminator>().is_err());
        assert_eq!(LineTerminator::default(), LineTerminator::CrLf);
        assert_eq!(LineTerminator::Cr.to_string(), "cr");
    }
}
