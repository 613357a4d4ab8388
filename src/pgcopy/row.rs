//! One COPY row with lazily decoded columns.

use std::ops::Range;
use std::sync::Arc;

use crate::error::CodecError;
use crate::value::RawValue;

use super::escape::{decode_attr, encode_attr};
use super::{DELIMITER, NULL_SEQ, trim_newline};

/// State of one column in a [`Row`].
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    /// Untouched bytes of the original line.
    Raw(Range<usize>),
    /// Read at least once; the original bytes are still valid for encoding.
    Decoded { range: Range<usize>, value: RawValue },
    /// Replaced by a transformer; re-escaped on encode.
    Overridden(RawValue),
    /// Owned by another view of the same row.
    Detached,
}

impl Slot {
    /// The unescaped value, once the slot holds one.
    pub fn value(&self) -> Option<&RawValue> {
        match self {
            Slot::Decoded { value, .. } | Slot::Overridden(value) => Some(value),
            Slot::Raw(_) | Slot::Detached => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Width {
    Fixed(usize),
    Dynamic,
}

/// A decoded COPY line.
///
/// The line is kept in a shared buffer so [`Row::detach`] can hand parts of
/// the row to other threads without copying. The buffer is reused by the
/// next [`Row::decode`] once every detached part has been attached back.
#[derive(Debug, Clone)]
pub struct Row {
    raw: Arc<Vec<u8>>,
    slots: Vec<Slot>,
    width: Width,
    delimiter: u8,
}

impl Row {
    /// A row that must have exactly `columns` columns.
    pub fn new(columns: usize) -> Self {
        Self {
            raw: Arc::new(Vec::new()),
            slots: Vec::with_capacity(columns),
            width: Width::Fixed(columns),
            delimiter: DELIMITER,
        }
    }

    /// A row that takes its width from each decoded line, used when the
    /// column list is not known in advance (custom query output).
    pub fn dynamic() -> Self {
        Self {
            raw: Arc::new(Vec::new()),
            slots: Vec::new(),
            width: Width::Dynamic,
            delimiter: DELIMITER,
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Splits `line` into columns. A trailing newline is ignored.
    pub fn decode(&mut self, line: &[u8]) -> Result<(), CodecError> {
        let line = trim_newline(line);
        match Arc::get_mut(&mut self.raw) {
            Some(buf) => {
                buf.clear();
                buf.extend_from_slice(line);
            }
            None => self.raw = Arc::new(line.to_vec()),
        }

        self.slots.clear();
        if !(line.is_empty() && self.width == Width::Fixed(0)) {
            let mut start = 0;
            let mut i = 0;
            while i < line.len() {
                match line[i] {
                    b'\\' => i += 2,
                    b if b == self.delimiter => {
                        self.slots.push(Slot::Raw(start..i));
                        i += 1;
                        start = i;
                    }
                    _ => i += 1,
                }
            }
            self.slots.push(Slot::Raw(start..line.len()));
        }

        if let Width::Fixed(expected) = self.width
            && expected != self.slots.len()
        {
            return Err(CodecError::ColumnCountMismatch {
                expected,
                actual: self.slots.len(),
            });
        }
        Ok(())
    }

    /// Drops the current line, keeping the buffer for the next decode.
    pub fn clear(&mut self) {
        if let Some(buf) = Arc::get_mut(&mut self.raw) {
            buf.clear();
        } else {
            self.raw = Arc::new(Vec::new());
        }
        self.slots.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, idx: usize) -> Option<&Slot> {
        self.slots.get(idx)
    }

    /// True if any column was overridden since the last decode.
    pub fn is_modified(&self) -> bool {
        self.slots.iter().any(|s| matches!(s, Slot::Overridden(_)))
    }

    /// Returns column `idx`, unescaping it on first access.
    pub fn get_column(&mut self, idx: usize) -> Result<&RawValue, CodecError> {
        let len = self.slots.len();
        let slot = self
            .slots
            .get_mut(idx)
            .ok_or(CodecError::IndexOutOfRange { idx, len })?;

        if let Slot::Raw(range) = slot {
            let range = range.clone();
            let bytes = &self.raw[range.clone()];
            let value = if bytes == NULL_SEQ {
                RawValue::null()
            } else {
                let mut data = Vec::new();
                decode_attr(bytes, &mut data)?;
                RawValue::new(data)
            };
            *slot = Slot::Decoded { range, value };
        }
        slot.value().ok_or(CodecError::ColumnDetached { idx })
    }

    /// Overrides column `idx`.
    pub fn set_column(&mut self, idx: usize, value: RawValue) -> Result<(), CodecError> {
        let len = self.slots.len();
        let slot = self
            .slots
            .get_mut(idx)
            .ok_or(CodecError::IndexOutOfRange { idx, len })?;
        if *slot == Slot::Detached {
            return Err(CodecError::ColumnDetached { idx });
        }
        *slot = Slot::Overridden(value);
        Ok(())
    }

    /// Appends the encoded row to `out`, without a line terminator.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        if !self.is_modified() && !self.slots.contains(&Slot::Detached) {
            out.extend_from_slice(&self.raw);
            return Ok(());
        }
        for (idx, slot) in self.slots.iter().enumerate() {
            if idx > 0 {
                out.push(self.delimiter);
            }
            match slot {
                Slot::Raw(range) | Slot::Decoded { range, .. } => {
                    out.extend_from_slice(&self.raw[range.clone()])
                }
                Slot::Overridden(value) => encode_attr(value, self.delimiter, out),
                Slot::Detached => return Err(CodecError::ColumnDetached { idx }),
            }
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(self.raw.len());
        self.encode_into(&mut out)?;
        Ok(out)
    }

    /// Moves the listed columns into a new row that shares this row's
    /// buffer. The columns are left detached here until [`Row::attach`].
    pub fn detach(&mut self, columns: &[usize]) -> Result<Row, CodecError> {
        let len = self.slots.len();
        let mut slots = vec![Slot::Detached; len];
        for &idx in columns {
            let slot = self
                .slots
                .get_mut(idx)
                .ok_or(CodecError::IndexOutOfRange { idx, len })?;
            if *slot == Slot::Detached {
                return Err(CodecError::ColumnDetached { idx });
            }
            slots[idx] = std::mem::replace(slot, Slot::Detached);
        }
        Ok(Row {
            raw: Arc::clone(&self.raw),
            slots,
            width: self.width,
            delimiter: self.delimiter,
        })
    }

    /// Moves every column owned by `part` back into this row.
    pub fn attach(&mut self, part: Row) -> Result<(), CodecError> {
        if part.slots.len() != self.slots.len() {
            return Err(CodecError::ColumnCountMismatch {
                expected: self.slots.len(),
                actual: part.slots.len(),
            });
        }
        for (idx, slot) in part.slots.into_iter().enumerate() {
            if slot != Slot::Detached {
                self.slots[idx] = slot;
            }
        }
        Ok(())
    }
}
