//! PostgreSQL `COPY ... TO STDOUT` text format.
//!
//! A table stream is a sequence of newline-terminated rows. Columns are
//! separated by a delimiter byte (tab by default), NULL is written as `\N`
//! and the stream ends with the terminator line `\.`.
//!
//! [`Row`] splits a line into column byte ranges without copying them and
//! unescapes a column only when it is first read. Encoding copies every
//! column that was not overridden straight from the original line, so an
//! untouched row is reproduced byte for byte.

pub mod escape;
pub mod row;

use std::io::{self, Write};

pub use escape::{decode_attr, encode_attr};
pub use row::{Row, Slot};

/// Default column delimiter.
pub const DELIMITER: u8 = b'\t';

/// Text form of SQL NULL.
pub const NULL_SEQ: &[u8] = b"\\N";

/// End-of-data marker line.
pub const TERMINATOR: &[u8] = b"\\.";

/// Strips one trailing `\n` from a line read with `read_until`.
pub fn trim_newline(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\n").unwrap_or(line)
}

/// True if `line` (without its newline) is the end-of-data marker.
pub fn is_terminator(line: &[u8]) -> bool {
    trim_newline(line) == TERMINATOR
}

/// Writes the end-of-data marker followed by the blank line a dump file
/// carries after each table.
pub fn complete_dump<W: Write>(writer: &mut W) -> io::Result<()> {
    writer.write_all(TERMINATOR)?;
    writer.write_all(b"\n\n")
}
