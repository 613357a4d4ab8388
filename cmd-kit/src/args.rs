//! Command line every toolkit transformer accepts.

use clap::{ArgGroup, Parser};
use rowmask::cmd::Meta;
use rowmask::logging::LogFormat;

/// Run as a rowmask command transformer.
#[derive(Debug, Clone, Parser)]
#[command(group(
    ArgGroup::new("mode")
        .required(true)
        .args(["print_definition", "validate", "transform"])
))]
pub struct ToolkitArgs {
    /// Print the transformer definition as JSON and exit
    #[arg(long)]
    pub print_definition: bool,

    /// Check the metadata and print warnings as JSON lines
    #[arg(long)]
    pub validate: bool,

    /// Transform rows from stdin to stdout
    #[arg(long)]
    pub transform: bool,

    /// Table, column and driver metadata (JSON)
    #[arg(long, value_parser = parse_meta)]
    pub meta: Option<Meta>,

    /// Log level, overridden by RUST_LOG
    #[arg(long, default_value = "warn")]
    pub log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// What the process was asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    PrintDefinition,
    Validate,
    Transform,
}

impl ToolkitArgs {
    pub fn mode(&self) -> Mode {
        if self.print_definition {
            Mode::PrintDefinition
        } else if self.validate {
            Mode::Validate
        } else {
            Mode::Transform
        }
    }
}

fn parse_meta(s: &str) -> Result<Meta, serde_json::Error> {
    serde_json::from_str(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    const META: &str = r#"{"table":{"schema":"public","name":"t","columns":[{"name":"a","type_name":"text"}]}}"#;

    #[test]
    fn test_transform_mode() {
        let args = ToolkitArgs::try_parse_from(["upper", "--transform", "--meta", META]).unwrap();
        assert_eq!(args.mode(), Mode::Transform);
        let meta = args.meta.unwrap();
        assert_eq!(meta.table.columns[0].name, "a");
        assert_eq!(args.log_level, "warn");
    }

    #[test]
    fn test_print_definition_needs_no_meta() {
        let args = ToolkitArgs::try_parse_from(["upper", "--print-definition"]).unwrap();
        assert_eq!(args.mode(), Mode::PrintDefinition);
        assert!(args.meta.is_none());
    }

    #[test]
    fn test_mode_is_required_and_exclusive() {
        assert!(ToolkitArgs::try_parse_from(["upper"]).is_err());
        assert!(ToolkitArgs::try_parse_from(["upper", "--validate", "--transform"]).is_err());
    }

    #[test]
    fn test_bad_meta() {
        assert!(ToolkitArgs::try_parse_from(["upper", "--transform", "--meta", "{"]).is_err());
    }
}
