//! Builds transformers from configuration.

use std::sync::Arc;

use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::cmd::{CmdSettings, CmdTransformer};
use crate::config::{ReplaceParams, SetNullParams, TableConfig, TransformerConfig, WhenConfig};
use crate::error::{ConfigError, TransformError};
use crate::record::Record;
use crate::table::TableDriver;

use super::{Condition, Replace, SetNull, Transformer, TransformerContext};

/// Builds the configured transformers of a table, in order.
///
/// Command transformers with `preflight_validation` run the validation
/// sub-protocol here; a warning of severity `error` aborts the build.
pub fn build_transformers(
    config: &TableConfig,
    driver: &Arc<TableDriver>,
    cancel: &CancelToken,
) -> Result<Vec<TransformerContext>, ConfigError> {
    let mut contexts = Vec::with_capacity(config.transformers.len());
    for tc in &config.transformers {
        let transformer = build_one(tc, driver, cancel)?;
        for column in transformer.declared_columns() {
            if driver.index_of(column).is_none() {
                return Err(ConfigError::UnknownColumn(column.clone()));
            }
        }
        debug!(
            transformer = transformer.name(),
            columns = ?transformer.declared_columns(),
            "transformer built"
        );
        let mut ctx = TransformerContext::new(transformer);
        if let Some(when) = &tc.when {
            ctx = ctx.with_when(build_condition(when, driver)?);
        }
        contexts.push(ctx);
    }
    Ok(contexts)
}

fn build_one(
    tc: &TransformerConfig,
    driver: &Arc<TableDriver>,
    cancel: &CancelToken,
) -> Result<Box<dyn Transformer>, ConfigError> {
    match tc.name.as_str() {
        SetNull::NAME => {
            let p: SetNullParams = tc.params()?;
            Ok(Box::new(SetNull::new(driver, &p.column)?))
        }
        Replace::NAME => {
            let p: ReplaceParams = tc.params()?;
            Ok(Box::new(Replace::new(
                driver,
                &p.column,
                p.value.as_deref(),
                p.validate,
            )?))
        }
        CmdTransformer::NAME => {
            let settings: CmdSettings = tc.params()?;
            let t = CmdTransformer::new(Arc::clone(driver), settings)?;
            if t.settings().preflight_validation {
                preflight(&t, cancel)?;
            }
            Ok(Box::new(t))
        }
        other => Err(ConfigError::UnknownTransformer(other.to_string())),
    }
}

fn preflight(t: &CmdTransformer, cancel: &CancelToken) -> Result<(), ConfigError> {
    let warnings = t.validate(cancel).map_err(|source| ConfigError::Validation {
        transformer: t.name().to_string(),
        source,
    })?;
    warnings.log(t.name());
    if warnings.is_fatal() {
        return Err(ConfigError::FatalValidation {
            transformer: t.name().to_string(),
            warnings,
        });
    }
    info!(transformer = t.name(), warnings = warnings.len(), "validation passed");
    Ok(())
}

/// Compiles a structural predicate into a [`Condition`].
pub fn build_condition(when: &WhenConfig, driver: &TableDriver) -> Result<Condition, ConfigError> {
    let idx = driver
        .index_of(&when.column)
        .ok_or_else(|| ConfigError::UnknownColumn(when.column.clone()))?;
    if when.equals.is_none() && when.is_null.is_none() {
        return Err(ConfigError::InvalidParameter {
            transformer: "when".to_string(),
            parameter: when.column.clone(),
            reason: "either 'equals' or 'is_null' is required".to_string(),
        });
    }
    let equals = when.equals.clone().map(String::into_bytes);
    let is_null = when.is_null;
    Ok(Box::new(move |record: &mut Record| -> Result<bool, TransformError> {
        let value = record.get_raw_by_idx(idx)?;
        if let Some(expected) = is_null
            && value.is_null != expected
        {
            return Ok(false);
        }
        if let Some(expected) = &equals {
            return Ok(!value.is_null && value.data == *expected);
        }
        Ok(true)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{record_with, users_driver};

    fn config(transformers: serde_json::Value) -> TableConfig {
        let json = serde_json::json!({
            "schema": "public",
            "name": "users",
            "columns": [
                {"name": "id", "type_name": "int4"},
                {"name": "name", "type_name": "text"},
                {"name": "email", "type_name": "text"}
            ],
            "transformers": transformers,
        });
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_builds_in_order() {
        let config = config(serde_json::json!([
            {"name": "SetNull", "params": {"column": "email"}},
            {"name": "Replace", "params": {"column": "name", "value": "x"}, "when": {"column": "id", "equals": "1"}},
            {"name": "Cmd", "params": {"executable": "cat", "driver": {"name": "text"}, "columns": [{"name": "name"}]}}
        ]));
        let contexts = build_transformers(&config, &users_driver(), &CancelToken::new()).unwrap();
        let names: Vec<&str> = contexts.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["SetNull", "Replace", "Cmd(cat)"]);
        assert!(contexts[0].when.is_none());
        assert!(contexts[1].when.is_some());
    }

    #[test]
    fn test_unknown_transformer() {
        let config = config(serde_json::json!([{"name": "Hash"}]));
        let err = build_transformers(&config, &users_driver(), &CancelToken::new())
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::UnknownTransformer(name) if name == "Hash"));
    }

    #[test]
    fn test_cmd_config_errors() {
        let config = config(serde_json::json!([
            {"name": "Cmd", "params": {"executable": "cat", "driver": {"name": "csv"},
             "columns": [{"name": "id", "position": 0}, {"name": "name", "position": 0}]}}
        ]));
        let err = build_transformers(&config, &users_driver(), &CancelToken::new())
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::ConflictingColumnMapping { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_preflight_validation() {
        let config = config(serde_json::json!([
            {"name": "Cmd", "params": {
                "executable": "sh",
                "args": ["-c", "echo '{\"msg\":\"unsupported\",\"severity\":\"error\"}'", "sh"],
                "preflight_validation": true
            }}
        ]));
        let err = build_transformers(&config, &users_driver(), &CancelToken::new())
            .err()
            .unwrap();
        match err {
            ConfigError::FatalValidation { transformer, warnings } => {
                assert_eq!(transformer, "Cmd(sh)");
                assert_eq!(warnings.fatal_count(), 1);
            }
            other => panic!("unexpected error: {other}"),
        }

        let config = self::config(serde_json::json!([
            {"name": "Cmd", "params": {
                "executable": "sh",
                "args": ["-c", "echo '{\"msg\":\"just so you know\"}'", "sh"],
                "preflight_validation": true
            }}
        ]));
        assert!(build_transformers(&config, &users_driver(), &CancelToken::new()).is_ok());
    }

    #[test]
    fn test_condition() {
        let driver = users_driver();
        let equals = build_condition(
            &WhenConfig {
                column: "name".to_string(),
                equals: Some("bob".to_string()),
                is_null: None,
            },
            &driver,
        )
        .unwrap();
        let not_null = build_condition(
            &WhenConfig {
                column: "email".to_string(),
                equals: None,
                is_null: Some(false),
            },
            &driver,
        )
        .unwrap();

        let mut record = record_with(b"1\tbob\t\\N");
        assert!(equals(&mut record).unwrap());
        assert!(!not_null(&mut record).unwrap());
        record.set_row(b"1\talice\ta@b").unwrap();
        assert!(!equals(&mut record).unwrap());
        assert!(not_null(&mut record).unwrap());
    }

    #[test]
    fn test_condition_requires_a_test() {
        let when = WhenConfig {
            column: "name".to_string(),
            equals: None,
            is_null: None,
        };
        assert!(build_condition(&when, &users_driver()).is_err());
    }
}
