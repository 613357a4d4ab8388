//! Shared fixtures for unit tests.

use std::collections::HashMap;
use std::sync::Arc;

use crate::record::Record;
use crate::table::{Column, Table, TableDriver};
use crate::types::TypeRegistry;

/// `public.users (id int4, name text, email text)`.
pub fn users_table() -> Table {
    Table::new(
        "public",
        "users",
        vec![
            Column::new("id", "int4"),
            Column::new("name", "text"),
            Column::new("email", "text"),
        ],
    )
}

pub fn driver_for(table: Table) -> Arc<TableDriver> {
    let (driver, _) = TableDriver::new(table, &TypeRegistry::postgres(), &HashMap::new()).unwrap();
    Arc::new(driver)
}

pub fn users_driver() -> Arc<TableDriver> {
    driver_for(users_table())
}

/// A `users` record holding `line`.
pub fn record_with(line: &[u8]) -> Record {
    let mut record = Record::new(users_driver());
    record.set_row(line).unwrap();
    record
}

pub fn encoded(record: &Record) -> String {
    let mut out = Vec::new();
    record.encode_into(&mut out).unwrap();
    String::from_utf8(out).unwrap()
}
