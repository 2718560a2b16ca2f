// Newline-delimited framing over TCP.
//
// One message per line, `\n` terminated. `read_line` / `write_line` move raw
// text; `encode` / `decode` convert between `Envelope` and its single-line
// JSON form. Keeping the two apart lets the relay forward a line verbatim
// after inspecting it.
//
// `MAX_LINE_SIZE` bounds how much a single read may buffer, so a peer that
// never sends a newline cannot grow memory without limit.

use std::io::{self, BufRead, Read, Write};

use crate::message::Envelope;

/// Maximum accepted line length in bytes, including the terminator.
pub const MAX_LINE_SIZE: usize = 64 * 1024;

/// Why an inbound line could not be turned into an `Envelope`.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("empty line")]
    Empty,
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialize an envelope to one JSON line, terminator included.
///
/// JSON string escaping turns any newline inside the payload into `\n`, so
/// the result always occupies exactly one line.
pub fn encode(envelope: &Envelope) -> String {
    // Serializing a struct of a unit enum and a String cannot fail.
    let mut line = serde_json::to_string(envelope).unwrap_or_default();
    line.push('\n');
    line
}

/// Parse one line (with or without its terminator) into an envelope.
pub fn decode(line: &str) -> Result<Envelope, ParseError> {
    let line = strip_terminator(line);
    if line.trim().is_empty() {
        return Err(ParseError::Empty);
    }
    Ok(serde_json::from_str(line)?)
}

/// Write `line` followed by `\n` and flush.
///
/// Returns `InvalidInput` if `line` contains a newline, since the peer would
/// read it as two messages.
pub fn write_line<W: Write>(writer: &mut W, line: &str) -> io::Result<()> {
    let line = strip_terminator(line);
    if line.contains('\n') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "line contains an embedded newline",
        ));
    }
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()
}

/// Read one line without its terminator.
///
/// Returns `Ok(None)` on a clean end-of-stream. A final line without a
/// terminator is still returned. Returns `InvalidData` if the line exceeds
/// `MAX_LINE_SIZE` or is not UTF-8.
pub fn read_line<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    let mut buf = String::new();
    let n = reader
        .by_ref()
        .take(MAX_LINE_SIZE as u64 + 1)
        .read_line(&mut buf)?;
    if n == 0 {
        return Ok(None);
    }
    if n > MAX_LINE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("line too long: more than {MAX_LINE_SIZE} bytes"),
        ));
    }
    let len = strip_terminator(&buf).len();
    buf.truncate(len);
    Ok(Some(buf))
}

fn strip_terminator(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;
    use std::io::Cursor;

    #[test]
    fn encode_matches_wire_shape() {
        let line = encode(&Envelope::movement("1,6:1,4"));
        assert_eq!(line, "{\"Type\":\"MOVE\",\"Payload\":\"1,6:1,4\"}\n");
    }

    #[test]
    fn encode_escapes_embedded_newline() {
        let line = encode(&Envelope::join("two\nlines"));
        assert_eq!(line.matches('\n').count(), 1);
        assert!(line.ends_with('\n'));
        assert_eq!(decode(&line).unwrap().payload, "two\nlines");
    }

    #[test]
    fn decode_accepts_crlf() {
        let env = decode("{\"Type\":\"LEAVE\",\"Payload\":\"\"}\r\n").unwrap();
        assert_eq!(env.kind, MessageKind::Leave);
    }

    #[test]
    fn decode_missing_payload_defaults_to_empty() {
        let env = decode("{\"Type\":\"LEAVE\"}").unwrap();
        assert_eq!(env, Envelope::leave());
    }

    #[test]
    fn decode_rejects_empty_line() {
        assert!(matches!(decode(""), Err(ParseError::Empty)));
        assert!(matches!(decode("   \r\n"), Err(ParseError::Empty)));
    }

    #[test]
    fn decode_rejects_malformed_json() {
        assert!(matches!(decode("{\"Type\":"), Err(ParseError::Json(_))));
        assert!(matches!(decode("white"), Err(ParseError::Json(_))));
    }

    #[test]
    fn decode_rejects_unknown_kind() {
        let err = decode("{\"Type\":\"CHAT\",\"Payload\":\"hi\"}").unwrap_err();
        assert!(matches!(err, ParseError::Json(_)));
    }

    #[test]
    fn read_line_strips_terminators_and_reports_eof() {
        let mut cursor = Cursor::new(b"white\r\nsecond\nlast".to_vec());
        assert_eq!(read_line(&mut cursor).unwrap().as_deref(), Some("white"));
        assert_eq!(read_line(&mut cursor).unwrap().as_deref(), Some("second"));
        assert_eq!(read_line(&mut cursor).unwrap().as_deref(), Some("last"));
        assert_eq!(read_line(&mut cursor).unwrap(), None);
    }

    #[test]
    fn read_line_rejects_oversized_line() {
        let mut cursor = Cursor::new(vec![b'a'; MAX_LINE_SIZE + 10]);
        let err = read_line(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn read_line_accepts_line_at_limit() {
        let mut data = vec![b'a'; MAX_LINE_SIZE - 1];
        data.push(b'\n');
        let mut cursor = Cursor::new(data);
        let line = read_line(&mut cursor).unwrap().unwrap();
        assert_eq!(line.len(), MAX_LINE_SIZE - 1);
    }

    #[test]
    fn write_line_appends_single_newline() {
        let mut buf = Vec::new();
        write_line(&mut buf, "black").unwrap();
        write_line(&mut buf, "{\"Type\":\"LEAVE\",\"Payload\":\"\"}\n").unwrap();
        assert_eq!(buf, b"black\n{\"Type\":\"LEAVE\",\"Payload\":\"\"}\n");
    }

    #[test]
    fn write_line_rejects_embedded_newline() {
        let mut buf = Vec::new();
        let err = write_line(&mut buf, "one\ntwo").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(buf.is_empty());
    }
}
