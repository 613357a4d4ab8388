//! Attribute-level escape translation for the COPY text format.

use crate::error::CodecError;
use crate::value::RawValue;

use super::NULL_SEQ;

/// Unescapes one column's bytes into `out`.
///
/// Recognised sequences: `\b \f \n \r \t \v`, one to three octal digits,
/// `\x` followed by one or two hex digits, and `\c` for any other byte `c`
/// (which covers `\\` and an escaped delimiter). A backslash at the very end
/// of the column is rejected.
pub fn decode_attr(raw: &[u8], out: &mut Vec<u8>) -> Result<(), CodecError> {
    out.reserve(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let c = raw[i];
        if c != b'\\' {
            out.push(c);
            i += 1;
            continue;
        }

        let Some(&next) = raw.get(i + 1) else {
            return Err(CodecError::MalformedEscape { offset: i });
        };
        i += 2;
        match next {
            b'0'..=b'7' => {
                let mut val = u16::from(next - b'0');
                for _ in 0..2 {
                    match raw.get(i) {
                        Some(&d @ b'0'..=b'7') => {
                            val = (val << 3) + u16::from(d - b'0');
                            i += 1;
                        }
                        _ => break,
                    }
                }
                out.push((val & 0xff) as u8);
            }
            b'x' => match raw.get(i).copied().and_then(hex_value) {
                Some(hi) => {
                    i += 1;
                    let mut val = hi;
                    if let Some(lo) = raw.get(i).copied().and_then(hex_value) {
                        val = (val << 4) + lo;
                        i += 1;
                    }
                    out.push(val);
                }
                None => out.push(b'x'),
            },
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'v' => out.push(0x0b),
            other => out.push(other),
        }
    }
    Ok(())
}

/// Escapes `value` into `out` so that [`decode_attr`] restores it.
///
/// NULL becomes `\N`. A real value spelled `\N` becomes `\\N` because every
/// backslash is doubled. Control bytes without a mnemonic are written once
/// as `\` followed by the byte itself.
pub fn encode_attr(value: &RawValue, delimiter: u8, out: &mut Vec<u8>) {
    if value.is_null {
        out.extend_from_slice(NULL_SEQ);
        return;
    }
    out.reserve(value.data.len());
    for &b in &value.data {
        match b {
            b'\\' => out.extend_from_slice(b"\\\\"),
            0x08 => out.extend_from_slice(b"\\b"),
            0x0c => out.extend_from_slice(b"\\f"),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\t' => out.extend_from_slice(b"\\t"),
            0x0b => out.extend_from_slice(b"\\v"),
            d if d == delimiter || d < 0x20 || d == 0x7f => {
                out.push(b'\\');
                out.push(d);
            }
            _ => out.push(b),
        }
    }
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pgcopy::DELIMITER;

    fn decode(raw: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        decode_attr(raw, &mut out).unwrap();
        out
    }

    fn encode(value: &RawValue) -> Vec<u8> {
        let mut out = Vec::new();
        encode_attr(value, DELIMITER, &mut out);
        out
    }

    macro_rules! decode_test {
        ($name:ident, $raw:expr, $expected:expr) => {
            #[test]
            fn $name() {
                assert_eq!(decode($raw), $expected.to_vec());
            }
        };
    }

    decode_test!(test_decode_plain, b"123", b"123");
    decode_test!(test_decode_backslash, b"\\\\", b"\\");
    decode_test!(test_decode_control_mnemonics, b"\\b\\f\\n\\r\\t\\v", b"\x08\x0c\n\r\t\x0b");
    decode_test!(test_decode_escaped_terminator, b"\\\\.", b"\\.");
    decode_test!(test_decode_escaped_delimiter, b"hello\\\tnoname", b"hello\tnoname");
    decode_test!(test_decode_null_text, b"\\\\N", b"\\N");
    decode_test!(test_decode_octal_cyrillic, b"\\320\\275\\320\\260", "на".as_bytes());
    decode_test!(test_decode_hex_cyrillic, b"\\xD0\\xBd\\xD0\\xB0", "на".as_bytes());
    decode_test!(test_decode_short_octal, b"\\1x", b"\x01x");
    decode_test!(test_decode_single_hex_digit, b"\\x9z", b"\x09z");
    decode_test!(test_decode_x_without_digits, b"\\xz", b"xz");
    decode_test!(test_decode_unknown_escape, b"\\q", b"q");
    decode_test!(test_decode_utf8_passthrough, "здравствуйте".as_bytes(), "здравствуйте".as_bytes());

    #[test]
    fn test_decode_lone_backslash() {
        let mut out = Vec::new();
        assert_eq!(
            decode_attr(b"abc\\", &mut out),
            Err(CodecError::MalformedEscape { offset: 3 })
        );
    }

    #[test]
    fn test_encode_null() {
        assert_eq!(encode(&RawValue::null()), b"\\N");
    }

    #[test]
    fn test_encode_null_text_is_distinct() {
        assert_eq!(encode(&RawValue::from("\\N")), b"\\\\N");
    }

    #[test]
    fn test_encode_control_byte_written_once() {
        assert_eq!(encode(&RawValue::new(vec![b'a', 0x01, b'b'])), b"a\\\x01b");
        assert_eq!(encode(&RawValue::new(vec![0x7f])), b"\\\x7f");
    }

    #[test]
    fn test_encode_custom_delimiter() {
        let mut out = Vec::new();
        encode_attr(&RawValue::from("a,b"), b',', &mut out);
        assert_eq!(out, b"a\\,b");
    }

    #[test]
    fn test_escape_symmetry() {
        let values = [
            RawValue::null(),
            RawValue::from(""),
            RawValue::from("\\N"),
            RawValue::from("tab\there\nnewline\\slash"),
            RawValue::new((0u8..=255).collect::<Vec<u8>>()),
            RawValue::from("日本語 and ascii"),
        ];
        for value in values {
            let encoded = encode(&value);
            if value.is_null {
                assert_eq!(encoded, NULL_SEQ);
                continue;
            }
            assert_eq!(decode(&encoded), value.data, "value {value:?}");
        }
    }
}
