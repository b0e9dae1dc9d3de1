//! Test cases and the generator's length-prefixed "ammo" record format.
//!
//! A record is a header line `<payload-len> <marker>` followed by exactly
//! `payload-len` bytes and a newline:
//!
//! ```text
//! 4 test
//! test
//! ```

use std::io::{BufRead, Read, Write};

use crate::error::{PbenchError, Result};

/// One compiled request plus its position in the source list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub index: usize,
    /// Label reported by the generator for samples of this case.
    pub marker: String,
    pub payload: Vec<u8>,
}

impl TestCase {
    pub fn new(index: usize, marker: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            index,
            marker: sanitize_marker(&marker.into()),
            payload: payload.into(),
        }
    }

    /// Write this case as an ammo record.
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        writeln!(out, "{} {}", self.payload.len(), self.marker)?;
        out.write_all(&self.payload)?;
        out.write_all(b"\n")?;
        Ok(())
    }
}

/// Markers are single tokens on the header line.
fn sanitize_marker(marker: &str) -> String {
    let cleaned: String = marker
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Read every ammo record from `reader`, numbering them in order.
pub fn read_test_cases<R: BufRead>(mut reader: R) -> Result<Vec<TestCase>> {
    let mut cases = Vec::new();
    let mut header = String::new();

    loop {
        header.clear();
        if reader.read_line(&mut header)? == 0 {
            break;
        }
        let line = header.trim_end_matches(&['\r', '\n'][..]);
        if line.trim().is_empty() {
            continue;
        }

        let mut parts = line.splitn(2, ' ');
        let len_token = parts.next().unwrap_or_default();
        let len: u64 = len_token.parse().map_err(|_| {
            PbenchError::InvalidTestCase(format!(
                "record {} has a malformed length '{}'",
                cases.len(),
                len_token
            ))
        })?;
        let marker = parts.next().unwrap_or("").trim();

        // Declared lengths are untrusted, so read at most `len` bytes
        let mut payload = Vec::new();
        let read = reader.by_ref().take(len).read_to_end(&mut payload)?;
        if read as u64 != len {
            return Err(PbenchError::InvalidTestCase(format!(
                "record {} is truncated, expected {} bytes",
                cases.len(),
                len
            )));
        }

        // Swallow the record terminator
        let mut terminator = String::new();
        reader.read_line(&mut terminator)?;
        if !terminator.trim().is_empty() {
            return Err(PbenchError::InvalidTestCase(format!(
                "record {} is longer than its declared {} bytes",
                cases.len(),
                len
            )));
        }

        let marker = if marker.is_empty() {
            format!("case_{}", cases.len())
        } else {
            marker.to_string()
        };
        cases.push(TestCase::new(cases.len(), marker, payload));
    }

    Ok(cases)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_single_record() {
        let cases = read_test_cases(Cursor::new("4 test\ntest\n")).unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].index, 0);
        assert_eq!(cases[0].marker, "test");
        assert_eq!(cases[0].payload, b"test");
    }

    #[test]
    fn test_read_multiline_payload() {
        let payload = "GET / HTTP/1.1\r\nHost: a\r\n\r\n";
        let data = format!("{} root\n{}\n3 x\nabc\n", payload.len(), payload);
        let cases = read_test_cases(Cursor::new(data)).unwrap();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].payload, payload.as_bytes());
        assert_eq!(cases[1].index, 1);
        assert_eq!(cases[1].marker, "x");
    }

    #[test]
    fn test_missing_marker_gets_default() {
        let cases = read_test_cases(Cursor::new("2\nab\n")).unwrap();
        assert_eq!(cases[0].marker, "case_0");
    }

    #[test]
    fn test_truncated_record_fails() {
        let err = read_test_cases(Cursor::new("10 x\nabc\n")).unwrap_err();
        assert!(matches!(err, PbenchError::InvalidTestCase(_)));
    }

    #[test]
    fn test_oversized_declared_length_fails() {
        let err = read_test_cases(Cursor::new("18446744073709551615 x\nabc\n")).unwrap_err();
        assert!(matches!(err, PbenchError::InvalidTestCase(_)));
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn test_bad_length_fails() {
        let err = read_test_cases(Cursor::new("four x\nabcd\n")).unwrap_err();
        assert!(matches!(err, PbenchError::InvalidTestCase(_)));
    }

    #[test]
    fn test_write_then_read_back() {
        let case = TestCase::new(0, "my label", "hello");
        assert_eq!(case.marker, "my_label");
        let mut buf = Vec::new();
        case.write_to(&mut buf).unwrap();
        assert_eq!(buf, b"5 my_label\nhello\n");
        let back = read_test_cases(Cursor::new(buf)).unwrap();
        assert_eq!(back, vec![case]);
    }
}
