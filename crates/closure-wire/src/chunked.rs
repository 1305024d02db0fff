//! HTTP/1.1 chunked transfer-encoding decoder
//!
//! Works on a fully buffered body. Chunk boundaries are independent of how
//! the bytes arrived from the socket. Trailers after the terminating
//! zero-size chunk are not consumed.

use crate::error::ChunkedError;

const CRLF: &[u8] = b"\r\n";

/// Longest hex size accepted; 16 digits already covers a u64.
const MAX_SIZE_DIGITS: usize = 16;

/// Decode a chunked body into its payload bytes.
///
/// Stops at the zero-size chunk, or cleanly at the end of the buffer when
/// the peer closed the connection without sending one.
pub fn decode(raw: &[u8]) -> Result<Vec<u8>, ChunkedError> {
    let mut out = Vec::with_capacity(raw.len());
    let mut pos = 0;

    while pos < raw.len() {
        let line_len = find_crlf(&raw[pos..])
            .ok_or(ChunkedError::UnterminatedSizeLine { offset: pos })?;
        let line = &raw[pos..pos + line_len];
        let size = parse_size(line).ok_or_else(|| ChunkedError::InvalidSize {
            line: String::from_utf8_lossy(line).into_owned(),
            offset: pos,
        })?;
        pos += line_len + CRLF.len();

        if size == 0 {
            break;
        }

        let available = raw.len() - pos;
        if size > available {
            return Err(ChunkedError::Truncated {
                offset: pos,
                declared: size,
                available,
            });
        }
        out.extend_from_slice(&raw[pos..pos + size]);
        pos += size;

        match &raw[pos..] {
            [] | [b'\r'] => break,
            [b'\r', b'\n', ..] => pos += CRLF.len(),
            _ => return Err(ChunkedError::MissingTerminator { offset: pos }),
        }
    }

    Ok(out)
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(CRLF.len()).position(|w| w == CRLF)
}

/// Parse a chunk-size line, ignoring any `;name=value` extensions.
fn parse_size(line: &[u8]) -> Option<usize> {
    let digits = match line.iter().position(|&b| b == b';') {
        Some(i) => &line[..i],
        None => line,
    };
    let digits = std::str::from_utf8(digits).ok()?.trim();
    if digits.is_empty()
        || digits.len() > MAX_SIZE_DIGITS
        || !digits.bytes().all(|b| b.is_ascii_hexdigit())
    {
        return None;
    }
    usize::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encode(data: &[u8], chunk_size: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in data.chunks(chunk_size.max(1)) {
            out.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
            out.extend_from_slice(chunk);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"0\r\n\r\n");
        out
    }

    #[test]
    fn test_decode_single_chunk() {
        let body = decode(b"5\r\nhello\r\n0\r\n\r\n").unwrap();
        assert_eq!(body, b"hello");
    }

    #[test]
    fn test_decode_multiple_chunks() {
        let body = decode(b"4\r\nWiki\r\n5\r\npedia\r\nE\r\n in\r\n\r\nchunks.\r\n0\r\n\r\n").unwrap();
        assert_eq!(body, b"Wikipedia in\r\n\r\nchunks.");
    }

    #[test]
    fn test_decode_empty_input() {
        assert_eq!(decode(b"").unwrap(), b"");
    }

    #[test]
    fn test_decode_zero_chunk_only() {
        assert_eq!(decode(b"0\r\n\r\n").unwrap(), b"");
    }

    #[test]
    fn test_decode_ignores_trailer_after_last_chunk() {
        let body = decode(b"3\r\nabc\r\n0\r\nX-Trailer: yes\r\n\r\n").unwrap();
        assert_eq!(body, b"abc");
    }

    #[test]
    fn test_decode_without_terminating_chunk() {
        let body = decode(b"3\r\nabc\r\n2\r\nde\r\n").unwrap();
        assert_eq!(body, b"abcde");
    }

    #[test]
    fn test_decode_stops_at_buffer_end_after_chunk_data() {
        let body = decode(b"3\r\nabc").unwrap();
        assert_eq!(body, b"abc");
    }

    #[test]
    fn test_decode_uppercase_hex_and_extensions() {
        let body = decode(b"A;name=value\r\n0123456789\r\n0\r\n\r\n").unwrap();
        assert_eq!(body, b"0123456789");
    }

    #[test]
    fn test_decode_chunk_containing_crlf() {
        let body = decode(b"6\r\n\r\n\r\n\r\n\r\n0\r\n\r\n").unwrap();
        assert_eq!(body, b"\r\n\r\n\r\n");
    }

    #[test]
    fn test_decode_rejects_invalid_size() {
        let err = decode(b"zz\r\nabc\r\n").unwrap_err();
        assert!(matches!(err, ChunkedError::InvalidSize { offset: 0, .. }));
    }

    #[test]
    fn test_decode_rejects_truncated_chunk() {
        let err = decode(b"10\r\nshort").unwrap_err();
        assert_eq!(
            err,
            ChunkedError::Truncated {
                offset: 4,
                declared: 16,
                available: 5
            }
        );
    }

    #[test]
    fn test_decode_rejects_unterminated_size_line() {
        let err = decode(b"3\r\nabc\r\n5").unwrap_err();
        assert_eq!(err, ChunkedError::UnterminatedSizeLine { offset: 8 });
    }

    #[test]
    fn test_decode_rejects_missing_chunk_terminator() {
        let err = decode(b"3\r\nabcX\r\n0\r\n\r\n").unwrap_err();
        assert_eq!(err, ChunkedError::MissingTerminator { offset: 6 });
    }

    #[test]
    fn test_decode_rejects_oversized_size_line() {
        let err = decode(b"fffffffffffffffff\r\n").unwrap_err();
        assert!(matches!(err, ChunkedError::InvalidSize { .. }));
    }

    proptest! {
        #[test]
        fn test_round_trip(data in proptest::collection::vec(any::<u8>(), 0..4096), chunk_size in 1usize..700) {
            let framed = encode(&data, chunk_size);
            prop_assert_eq!(decode(&framed).unwrap(), data);
        }
    }
}
