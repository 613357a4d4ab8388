use std::collections::BTreeMap;

use base64::{Engine, prelude::BASE64_STANDARD};
use serde::{Deserialize, Serialize};

use crate::cmd::definition::{ColumnMapping, JsonDataFormat};
use crate::error::CmdError;
use crate::value::RawValue;

use super::{CmdRowDriver, missing};

/// One column on the wire: `{"d": data, "n": is_null}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Attr {
    #[serde(default)]
    d: Option<String>,
    #[serde(default)]
    n: bool,
}

impl Attr {
    fn pack(value: &RawValue, format: JsonDataFormat, name: &str) -> Result<Self, CmdError> {
        if value.is_null {
            return Ok(Self {
                d: Some(String::new()),
                n: true,
            });
        }
        let d = match format {
            JsonDataFormat::Text => value
                .as_str()
                .ok_or_else(|| {
                    CmdError::Protocol(format!(
                        "column '{name}' is not valid UTF-8, use the bytes data format"
                    ))
                })?
                .to_string(),
            JsonDataFormat::Bytes => BASE64_STANDARD.encode(value.as_bytes()),
        };
        Ok(Self { d: Some(d), n: false })
    }

    fn unpack(&self, format: JsonDataFormat, name: &str) -> Result<RawValue, CmdError> {
        if self.n {
            return Ok(RawValue::null());
        }
        let d = self.d.as_deref().unwrap_or_default();
        match format {
            JsonDataFormat::Text => Ok(RawValue::from(d)),
            JsonDataFormat::Bytes => BASE64_STANDARD
                .decode(d)
                .map(RawValue::from)
                .map_err(|e| CmdError::Protocol(format!("column '{name}': invalid base64: {e}"))),
        }
    }
}

/// `[{"d":..,"n":..}, ...]` ordered by mapping position.
pub struct JsonByIndexDriver {
    format: JsonDataFormat,
    attrs: Vec<Attr>,
}

impl JsonByIndexDriver {
    pub fn new(format: JsonDataFormat) -> Self {
        Self {
            format,
            attrs: Vec::new(),
        }
    }
}

impl CmdRowDriver for JsonByIndexDriver {
    fn clear(&mut self) {
        self.attrs.clear();
    }

    fn set_column(&mut self, mapping: &ColumnMapping, value: &RawValue) -> Result<(), CmdError> {
        let attr = Attr::pack(value, self.format, &mapping.column.name)?;
        if self.attrs.len() <= mapping.position {
            self.attrs.resize_with(mapping.position + 1, || Attr {
                d: Some(String::new()),
                n: true,
            });
        }
        self.attrs[mapping.position] = attr;
        Ok(())
    }

    fn get_column(&self, mapping: &ColumnMapping) -> Result<RawValue, CmdError> {
        self.attrs
            .get(mapping.position)
            .ok_or_else(|| missing(mapping))?
            .unpack(self.format, &mapping.column.name)
    }

    fn encode(&mut self) -> Result<Vec<u8>, CmdError> {
        Ok(serde_json::to_vec(&self.attrs)?)
    }

    fn decode(&mut self, line: &[u8]) -> Result<(), CmdError> {
        self.attrs = serde_json::from_slice(line)?;
        Ok(())
    }
}

/// `{"column": {"d":..,"n":..}, ...}`.
pub struct JsonByNameDriver {
    format: JsonDataFormat,
    attrs: BTreeMap<String, Attr>,
}

impl JsonByNameDriver {
    pub fn new(format: JsonDataFormat) -> Self {
        Self {
            format,
            attrs: BTreeMap::new(),
        }
    }
}

impl CmdRowDriver for JsonByNameDriver {
    fn clear(&mut self) {
        self.attrs.clear();
    }

    fn set_column(&mut self, mapping: &ColumnMapping, value: &RawValue) -> Result<(), CmdError> {
        let name = &mapping.column.name;
        self.attrs
            .insert(name.clone(), Attr::pack(value, self.format, name)?);
        Ok(())
    }

    fn get_column(&self, mapping: &ColumnMapping) -> Result<RawValue, CmdError> {
        let name = &mapping.column.name;
        self.attrs
            .get(name)
            .ok_or_else(|| missing(mapping))?
            .unpack(self.format, name)
    }

    fn encode(&mut self) -> Result<Vec<u8>, CmdError> {
        Ok(serde_json::to_vec(&self.attrs)?)
    }

    fn decode(&mut self, line: &[u8]) -> Result<(), CmdError> {
        self.attrs = serde_json::from_slice(line)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Column;

    fn mapping(name: &str, position: usize) -> ColumnMapping {
        ColumnMapping {
            column: Column::new(name, "text"),
            position,
        }
    }

    #[test]
    fn test_by_index_encode() {
        let mut d = JsonByIndexDriver::new(JsonDataFormat::Text);
        d.set_column(&mapping("b", 1), &RawValue::from("x\"y")).unwrap();
        d.set_column(&mapping("a", 0), &RawValue::null()).unwrap();
        let line = String::from_utf8(d.encode().unwrap()).unwrap();
        assert_eq!(line, r#"[{"d":"","n":true},{"d":"x\"y","n":false}]"#);
    }

    #[test]
    fn test_by_index_gap_is_null() {
        let mut d = JsonByIndexDriver::new(JsonDataFormat::Text);
        d.set_column(&mapping("c", 2), &RawValue::from("v")).unwrap();
        let line = String::from_utf8(d.encode().unwrap()).unwrap();
        assert!(line.starts_with(r#"[{"d":"","n":true},{"d":"","n":true},"#));
    }

    #[test]
    fn test_by_index_decode_accepts_missing_data() {
        let mut d = JsonByIndexDriver::new(JsonDataFormat::Text);
        d.decode(br#"[{"n":true},{"d":null},{"d":"z"}]"#).unwrap();
        assert_eq!(d.get_column(&mapping("a", 0)).unwrap(), RawValue::null());
        assert_eq!(d.get_column(&mapping("b", 1)).unwrap(), RawValue::from(""));
        assert_eq!(d.get_column(&mapping("c", 2)).unwrap(), RawValue::from("z"));
        assert!(matches!(
            d.get_column(&mapping("d", 3)),
            Err(CmdError::Protocol(_))
        ));
    }

    #[test]
    fn test_bytes_format_uses_base64() {
        let mut d = JsonByIndexDriver::new(JsonDataFormat::Bytes);
        d.set_column(&mapping("a", 0), &RawValue::new(vec![0xff, 0x00])).unwrap();
        assert_eq!(d.encode().unwrap(), br#"[{"d":"/wA=","n":false}]"#.to_vec());

        d.decode(br#"[{"d":"aGk=","n":false}]"#).unwrap();
        assert_eq!(d.get_column(&mapping("a", 0)).unwrap(), RawValue::from("hi"));

        d.decode(br#"[{"d":"***","n":false}]"#).unwrap();
        assert!(d.get_column(&mapping("a", 0)).is_err());
    }

    #[test]
    fn test_text_format_rejects_invalid_utf8() {
        let mut d = JsonByIndexDriver::new(JsonDataFormat::Text);
        let err = d
            .set_column(&mapping("a", 0), &RawValue::new(vec![0xff]))
            .unwrap_err();
        assert!(matches!(err, CmdError::Protocol(_)));
    }

    #[test]
    fn test_by_name() {
        let mut d = JsonByNameDriver::new(JsonDataFormat::Text);
        d.set_column(&mapping("name", 7), &RawValue::from("Bob")).unwrap();
        assert_eq!(d.encode().unwrap(), br#"{"name":{"d":"Bob","n":false}}"#.to_vec());

        d.decode(br#"{"name":{"d":"BOB"},"extra":{"d":"x"}}"#).unwrap();
        assert_eq!(d.get_column(&mapping("name", 0)).unwrap(), RawValue::from("BOB"));
        assert!(d.get_column(&mapping("email", 0)).is_err());
    }

    #[test]
    fn test_malformed_json() {
        let mut d = JsonByNameDriver::new(JsonDataFormat::Text);
        assert!(matches!(d.decode(b"{not json"), Err(CmdError::Json(_))));
    }
}
