//! Mode dispatch and the row loop of a toolkit transformer.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use clap::Parser;
use rowmask::cmd::driver::new_driver;
use rowmask::cmd::{CmdProto, ColumnSets, Meta, TransformerDefinition};
use rowmask::logging;
use rowmask::{Severity, TableDriver, TypeRegistry, ValidationWarning, ValidationWarnings};
use tracing::{debug, info};

use crate::args::{Mode, ToolkitArgs};
use crate::error::ToolkitError;
use crate::row::CmdRow;

/// Extra checks run in `--validate` mode after the built-in ones.
pub type Validator = Box<dyn Fn(&Meta) -> ValidationWarnings>;

/// Entry point of a toolkit transformer binary.
pub struct Runner {
    definition: TransformerDefinition,
    validator: Option<Validator>,
}

impl Runner {
    pub fn new(definition: TransformerDefinition) -> Self {
        Self {
            definition,
            validator: None,
        }
    }

    /// Installs a validation hook and advertises `--validate` support.
    pub fn with_validator(
        mut self,
        validator: impl Fn(&Meta) -> ValidationWarnings + 'static,
    ) -> Self {
        self.definition.validate = true;
        self.validator = Some(Box::new(validator));
        self
    }

    pub fn definition(&self) -> &TransformerDefinition {
        &self.definition
    }

    /// Parses the process arguments, sets up logging and runs the selected
    /// mode against stdin and stdout.
    pub fn run<F, E>(self, row_fn: F) -> Result<(), ToolkitError>
    where
        F: FnMut(&mut CmdRow) -> Result<(), E>,
        E: fmt::Display,
    {
        let args = ToolkitArgs::parse();
        logging::init(&args.log_level, args.log_format);
        self.run_with(&args, io::stdin().lock(), io::stdout().lock(), row_fn)
    }

    pub fn run_with<R, W, F, E>(
        &self,
        args: &ToolkitArgs,
        input: R,
        mut output: W,
        row_fn: F,
    ) -> Result<(), ToolkitError>
    where
        R: BufRead,
        W: Write,
        F: FnMut(&mut CmdRow) -> Result<(), E>,
        E: fmt::Display,
    {
        match args.mode() {
            Mode::PrintDefinition => {
                serde_json::to_writer(&mut output, &self.definition)?;
                output.write_all(b"\n")?;
                output.flush()?;
            }
            Mode::Validate => {
                let meta = args.meta.as_ref().ok_or(ToolkitError::MissingMeta("validate"))?;
                let mut warnings = check_meta(meta);
                if let Some(validator) = &self.validator {
                    warnings.extend(validator(meta));
                }
                for w in warnings.iter() {
                    serde_json::to_writer(&mut output, w)?;
                    output.write_all(b"\n")?;
                }
                output.flush()?;
            }
            Mode::Transform => {
                let meta = args.meta.as_ref().ok_or(ToolkitError::MissingMeta("transform"))?;
                let rows = transform_stream(input, output, meta, row_fn)?;
                info!(transformer = %self.definition.name, rows, "transform finished");
            }
        }
        Ok(())
    }
}

/// Checks that the metadata describes a usable table and column layout.
pub fn check_meta(meta: &Meta) -> ValidationWarnings {
    match resolve(meta) {
        Ok((_, _, warnings)) => warnings,
        Err(e) => std::iter::once(
            ValidationWarning::new()
                .with_severity(Severity::Error)
                .with_msg(e.to_string())
                .add_meta("SchemaName", meta.table.schema.as_str())
                .add_meta("TableName", meta.table.name.as_str()),
        )
        .collect(),
    }
}

fn resolve(
    meta: &Meta,
) -> Result<(Arc<TableDriver>, ColumnSets, ValidationWarnings), ToolkitError> {
    let (driver, warnings) =
        TableDriver::new(meta.table.clone(), &TypeRegistry::postgres(), &HashMap::new())?;
    let sets = ColumnSets::resolve(&driver, &meta.columns)?;
    CmdProto::new(&meta.driver, sets.transferring.clone(), sets.affected.clone())?;
    Ok((Arc::new(driver), sets, warnings))
}

/// Transforms payload lines from `input` until it closes.
///
/// Each line is decoded with the driver named in `meta`, its transferring
/// columns are handed to `row_fn`, and the affected columns are encoded
/// back as one line. Output is flushed after every row since the parent
/// waits for each reply. Returns the number of rows processed.
pub fn transform_stream<R, W, F, E>(
    mut input: R,
    mut output: W,
    meta: &Meta,
    mut row_fn: F,
) -> Result<u64, ToolkitError>
where
    R: BufRead,
    W: Write,
    F: FnMut(&mut CmdRow) -> Result<(), E>,
    E: fmt::Display,
{
    let (driver, sets, warnings) = resolve(meta)?;
    warnings.log(&meta.table.name);
    let mut wire = new_driver(&meta.driver);
    let mut row = CmdRow::new(driver);
    let mut line = Vec::new();
    let mut rows = 0u64;

    loop {
        line.clear();
        if input.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        rows += 1;

        wire.decode(&line)?;
        row.clear();
        for m in &sets.transferring {
            row.set(&m.column.name, wire.get_column(m)?)?;
        }
        row_fn(&mut row).map_err(|e| ToolkitError::Transform {
            line: rows,
            reason: e.to_string(),
        })?;

        wire.clear();
        for m in &sets.affected {
            let value = row
                .get(&m.column.name)
                .ok_or_else(|| ToolkitError::MissingColumn(m.column.name.clone()))?;
            wire.set_column(m, value)?;
        }
        let mut reply = wire.encode()?;
        reply.push(b'\n');
        output.write_all(&reply)?;
        output.flush()?;
    }

    debug!(rows, "input closed");
    Ok(rows)
}
