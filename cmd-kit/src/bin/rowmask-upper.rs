//! Toolkit transformer that uppercases the text columns it receives.
//!
//! Configure it as a `Cmd` transformer:
//!   {"name": "Cmd", "params": {"executable": "rowmask-upper", "launch": "toolkit"}}

use std::process;

use rowmask::cmd::{ColumnSets, Meta, TransformerDefinition};
use rowmask::{Severity, TableDriver, TypeRegistry, ValidationWarning, ValidationWarnings, Value};
use rowmask_cmd_kit::{CmdRow, Runner, ToolkitError};

const TEXT_TYPES: &[&str] = &["text", "varchar", "character varying", "bpchar", "char", "name"];

fn main() {
    let definition = TransformerDefinition {
        name: "Upper".to_string(),
        description: "Uppercase text columns".to_string(),
        ..TransformerDefinition::default()
    };

    if let Err(e) = Runner::new(definition).with_validator(validate).run(upper) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn upper(row: &mut CmdRow) -> Result<(), ToolkitError> {
    let names: Vec<String> = row.columns().map(str::to_string).collect();
    for name in names {
        if row.get(&name).is_some_and(|v| v.is_null) {
            continue;
        }
        if let Ok(Value::Text(s)) = row.value(&name) {
            row.set_value(&name, &Value::Text(s.to_uppercase()))?;
        }
    }
    Ok(())
}

/// Warns about affected columns that are left alone because they are not
/// text.
fn validate(meta: &Meta) -> ValidationWarnings {
    let Ok((driver, _)) = TableDriver::new(
        meta.table.clone(),
        &TypeRegistry::postgres(),
        &Default::default(),
    ) else {
        return ValidationWarnings::new();
    };
    let Ok(sets) = ColumnSets::resolve(&driver, &meta.columns) else {
        return ValidationWarnings::new();
    };
    sets.affected
        .iter()
        .filter(|m| !TEXT_TYPES.contains(&m.column.type_name.as_str()))
        .map(|m| {
            ValidationWarning::new()
                .with_severity(Severity::Info)
                .with_msg("column is not text and passes unchanged")
                .add_meta("ColumnName", m.column.name.as_str())
                .add_meta("TypeName", m.column.type_name.as_str())
        })
        .collect()
}
