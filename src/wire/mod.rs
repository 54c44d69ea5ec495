//! Lichat wire codec.
//!
//! An update travels as one S-expression frame terminated by a NUL byte:
//!
//! ```text
//! (message :id 12 :clock 3900000000 :from "alice" :channel "lobby" :text "hi")\0
//! ```
//!
//! The first element names the kind; the rest are keyword/value pairs.
//! [`Decoder`] buffers raw bytes and yields updates only for complete frames.
//! A frame that fails to parse is skipped up to its delimiter, so one bad
//! frame never corrupts the ones after it. A frame that outgrows the size
//! limit without a delimiter is fatal since there is no safe place to resume.

pub mod printer;
pub mod reader;
pub mod symbol;
pub mod value;

use bytes::{Buf, BytesMut};
use tracing::warn;

use crate::error::ProtocolError;
use crate::update::{Kind, Update};
use printer::print_value;
use reader::read_value;
use symbol::kw;
use value::Value;

/// Frame delimiter.
pub const DELIMITER: u8 = 0;

/// Default upper bound on a single frame, delimiter excluded.
pub const DEFAULT_MAX_FRAME: usize = 16 * 1024 * 1024;

/// Encode one update as a complete, delimited frame.
pub fn encode(update: &Update) -> Vec<u8> {
    let mut out = String::new();
    out.push('(');
    out.push_str(update.kind().name());

    let mut pair = |key: &str, value: &Value| {
        out.push(' ');
        print_value(&Value::Symbol(kw(key)), &mut out);
        out.push(' ');
        print_value(value, &mut out);
    };
    if let Some(id) = update.id() {
        pair("id", &Value::from(id));
    }
    if let Some(clock) = update.clock() {
        pair("clock", &Value::from(clock));
    }
    if let Some(from) = update.from() {
        pair("from", &Value::from(from));
    }
    for (key, value) in update.fields() {
        pair(key.name(), value);
    }

    out.push(')');
    let mut bytes = out.into_bytes();
    bytes.push(DELIMITER);
    bytes
}

/// Decode one frame body (without its delimiter) into an update.
pub fn decode(frame: &[u8]) -> Result<Update, ProtocolError> {
    let text = std::str::from_utf8(frame)
        .map_err(|e| ProtocolError::MalformedFrame(format!("invalid UTF-8: {}", e)))?;
    let items = match read_value(text)? {
        Value::List(items) => items,
        other => {
            return Err(ProtocolError::MalformedFrame(format!(
                "expected an update list, got {:?}",
                other
            )))
        }
    };

    let mut items = items.into_iter();
    let head = items
        .next()
        .and_then(|v| v.as_symbol())
        .ok_or_else(|| ProtocolError::MalformedFrame("update does not start with a symbol".into()))?;
    let kind =
        Kind::from_symbol(head).ok_or_else(|| ProtocolError::UnknownKind(head.name().to_string()))?;

    let mut update = Update::new(kind);
    while let Some(key) = items.next() {
        let key = key
            .as_symbol()
            .filter(|s| s.is_keyword())
            .ok_or_else(|| ProtocolError::MalformedFrame(format!("expected a keyword, got {:?}", key)))?;
        let value = items.next().ok_or_else(|| {
            ProtocolError::MalformedFrame(format!("field {} has no value", key))
        })?;
        let well_typed = match key.name() {
            "id" | "clock" => value.as_u64().is_some(),
            "from" => value.as_str().is_some(),
            _ => true,
        };
        if !well_typed {
            return Err(ProtocolError::MalformedFrame(format!(
                "field {} has an invalid value {:?}",
                key, value
            )));
        }
        update.set_field(key, value);
    }
    Ok(update)
}

/// Incremental frame decoder. Never parses a partial frame.
#[derive(Debug)]
pub struct Decoder {
    buf: BytesMut,
    /// Prefix of `buf` already known to hold no delimiter.
    scanned: usize,
    max_frame: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME)
    }
}

impl Decoder {
    pub fn new(max_frame: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            scanned: 0,
            max_frame,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes held back waiting for a delimiter.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Whether a delimited frame is waiting to be decoded.
    pub fn has_frame(&self) -> bool {
        self.buf[self.scanned..].contains(&DELIMITER)
    }

    /// Next complete frame, decoded. `None` means more bytes are needed.
    pub fn next_update(&mut self) -> Option<Result<Update, ProtocolError>> {
        loop {
            let found = self.buf[self.scanned..].iter().position(|b| *b == DELIMITER);
            let Some(end) = found.map(|offset| self.scanned + offset) else {
                self.scanned = self.buf.len();
                if self.buf.len() > self.max_frame {
                    self.buf.clear();
                    self.scanned = 0;
                    return Some(Err(ProtocolError::FrameTooLarge {
                        limit: self.max_frame,
                    }));
                }
                return None;
            };
            let frame = self.buf.split_to(end);
            self.buf.advance(1);
            self.scanned = 0;
            if frame.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            if frame.len() > self.max_frame {
                return Some(Err(ProtocolError::MalformedFrame(format!(
                    "frame of {} bytes exceeds the {} byte limit",
                    frame.len(),
                    self.max_frame
                ))));
            }
            return Some(decode(&frame));
        }
    }

    /// Lazily decode every complete frame currently buffered.
    pub fn updates(&mut self) -> Updates<'_> {
        Updates { decoder: self }
    }

    /// Decode everything buffered, logging and skipping bad frames. Stops at
    /// the first fatal error and returns it alongside what was decoded.
    pub fn drain(&mut self) -> (Vec<Update>, Option<ProtocolError>) {
        let mut updates = Vec::new();
        for result in self.updates() {
            match result {
                Ok(update) => updates.push(update),
                Err(e @ ProtocolError::FrameTooLarge { .. }) => return (updates, Some(e)),
                Err(e) => warn!(error = %e, "skipping bad frame"),
            }
        }
        (updates, None)
    }
}

/// Iterator over complete frames in a [`Decoder`].
#[derive(Debug)]
pub struct Updates<'a> {
    decoder: &'a mut Decoder,
}

impl Iterator for Updates<'_> {
    type Item = Result<Update, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decoder.next_update()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::symbol::li;

    fn round_trip(update: &Update) -> Update {
        let bytes = encode(update);
        assert_eq!(bytes.last(), Some(&DELIMITER));
        decode(&bytes[..bytes.len() - 1]).unwrap()
    }

    #[test]
    fn encodes_lichat_text() {
        let update = Update::new(Kind::Message)
            .with_id(12)
            .with_clock(3_900_000_000)
            .with_from("alice")
            .with("channel", "lobby")
            .with("text", "say \"hi\"");
        let bytes = encode(&update);
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            "(message :id 12 :clock 3900000000 :from \"alice\" :channel \"lobby\" :text \"say \\\"hi\\\"\")\0"
        );
    }

    #[test]
    fn representative_kinds_round_trip() {
        let updates = vec![
            Update::new(Kind::Connect)
                .with_id(1)
                .with_from("alice")
                .with("password", "pw")
                .with("version", "2.0")
                .with("extensions", vec!["shirakumo-channel-trees", "shirakumo-emotes"]),
            Update::new(Kind::Join).with_id(2).with_from("bob").with("channel", "#x"),
            Update::new(Kind::SetChannelInfo)
                .with("channel", "lobby")
                .with("key", kw("topic"))
                .with("text", "welcome"),
            Update::new(Kind::Permissions).with("channel", "lobby").with(
                "permissions",
                Value::List(vec![Value::List(vec![
                    Value::Symbol(li("join")),
                    Value::from(true),
                ])]),
            ),
            Update::new(Kind::Pause).with("channel", "lobby").with("by", 30u64),
            Update::new(Kind::Data)
                .with("channel", "lobby")
                .with("content-type", "image/png")
                .with("filename", "a.png")
                .with("payload", "aGVsbG8="),
            Update::new(Kind::UserInfo)
                .with("target", "carol")
                .with("registered", false)
                .with("connections", 2u64),
            Update::new(Kind::NoSuchChannel)
                .with_id(99)
                .with("update-id", 7u64)
                .with("text", "gone"),
            Update::new(Kind::Disconnect),
        ];
        for update in &updates {
            assert_eq!(&round_trip(update), update);
        }
    }

    #[test]
    fn decode_errors_are_specific() {
        assert_eq!(
            decode(b"(frobnicate :id 1)"),
            Err(ProtocolError::UnknownKind("frobnicate".into()))
        );
        assert!(matches!(
            decode(b"(message :id)"),
            Err(ProtocolError::MalformedFrame(_))
        ));
        assert!(matches!(
            decode(b"(message id 1)"),
            Err(ProtocolError::MalformedFrame(_))
        ));
        assert!(matches!(decode(b"\"text\""), Err(ProtocolError::MalformedFrame(_))));
        assert!(matches!(decode(&[0xff, 0xfe]), Err(ProtocolError::MalformedFrame(_))));
        assert!(matches!(
            decode(b"(message :id \"x\" :channel \"a\" :text \"b\")"),
            Err(ProtocolError::MalformedFrame(_))
        ));
        assert!(matches!(decode(b"(ping :clock -5)"), Err(ProtocolError::MalformedFrame(_))));
        assert!(matches!(decode(b"(ping :from 12)"), Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn negative_numbers_round_trip() {
        let update = Update::new(Kind::Message)
            .with("channel", "lobby")
            .with("text", "hi")
            .with("x", -1.5f64)
            .with("y", -3i64);
        assert_eq!(round_trip(&update), update);
    }

    #[test]
    fn decoder_waits_for_delimiter() {
        let mut decoder = Decoder::default();
        let frame = encode(&Update::new(Kind::Ping).with_id(5));
        let (head, tail) = frame.split_at(4);

        decoder.push(head);
        assert!(!decoder.has_frame());
        assert!(decoder.next_update().is_none());
        assert_eq!(decoder.buffered(), 4);

        decoder.push(tail);
        assert!(decoder.has_frame());
        let update = decoder.next_update().unwrap().unwrap();
        assert_eq!(update.kind(), Kind::Ping);
        assert_eq!(update.id(), Some(5));
        assert!(decoder.next_update().is_none());
    }

    #[test]
    fn decoder_handles_frames_arriving_in_small_chunks() {
        let mut decoder = Decoder::default();
        let mut bytes = encode(&Update::new(Kind::Ping).with_id(1));
        bytes.extend(encode(&Update::new(Kind::Pong).with_id(2)));

        let mut kinds = Vec::new();
        for chunk in bytes.chunks(3) {
            decoder.push(chunk);
            while let Some(result) = decoder.next_update() {
                kinds.push(result.unwrap().kind());
            }
        }
        assert_eq!(kinds, vec![Kind::Ping, Kind::Pong]);
        assert_eq!(decoder.buffered(), 0);
        assert!(!decoder.has_frame());
    }

    #[test]
    fn decoder_skips_bad_frame_and_resyncs() {
        let mut decoder = Decoder::default();
        decoder.push(b"(message :text \"unterminated)\0");
        decoder.push(b"(frobnicate)\0\n\0");
        decoder.push(&encode(&Update::new(Kind::Pong).with_id(1)));

        let results: Vec<_> = decoder.updates().collect();
        assert_eq!(results.len(), 3);
        assert!(matches!(results[0], Err(ProtocolError::MalformedFrame(_))));
        assert!(matches!(results[1], Err(ProtocolError::UnknownKind(_))));
        assert_eq!(results[2].as_ref().unwrap().kind(), Kind::Pong);
    }

    #[test]
    fn decoder_drain_reports_oversized_frames() {
        let mut decoder = Decoder::new(16);
        decoder.push(&encode(&Update::new(Kind::Ping)));
        decoder.push(&[b'x'; 32]);
        let (updates, fatal) = decoder.drain();
        assert_eq!(updates.len(), 1);
        assert_eq!(fatal, Some(ProtocolError::FrameTooLarge { limit: 16 }));
        assert_eq!(decoder.buffered(), 0);
    }
}
