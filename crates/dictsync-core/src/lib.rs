//! Core domain model for the text-value dictionary sync job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "dictsync-core";

/// One incoming dictionary entry as read from the source files.
///
/// `sort_order` is carried as `i32` on the ingest side; the target table
/// stores it as `i16` (see [`TableRow`]). The narrowing happens once, when
/// the insert set is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecord {
    pub name: String,
    pub value: String,
    pub sort_order: i32,
}

/// One persisted row of the target table, exactly the four stored columns
/// in storage order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRow {
    pub name: String,
    pub value: String,
    pub sort_order: i16,
    pub dt_created: DateTime<Utc>,
}

/// Transient aggregate of all values observed for one name in a batch.
///
/// Downstream logic only consumes the set of distinct names; the collected
/// values mirror the original aggregation and feed the run summary counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameValueGroup {
    pub name: String,
    pub values: Vec<String>,
}

/// Fully-qualified target table name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_ref_displays_qualified_name() {
        let table = TableRef::new("gold", "l2_data_dictionary_text_values_v2");
        assert_eq!(table.to_string(), "gold.l2_data_dictionary_text_values_v2");
    }

    #[test]
    fn table_row_serializes_columns_in_storage_order() {
        let row = TableRow {
            name: "A".into(),
            value: "x".into(),
            sort_order: 1,
            dt_created: DateTime::parse_from_rfc3339("2026-02-24T12:00:00Z")
                .expect("ts")
                .with_timezone(&Utc),
        };
        let json = serde_json::to_string(&row).expect("serialize");
        let name_pos = json.find("\"name\"").expect("name");
        let value_pos = json.find("\"value\"").expect("value");
        let order_pos = json.find("\"sort_order\"").expect("sort_order");
        let created_pos = json.find("\"dt_created\"").expect("dt_created");
        assert!(name_pos < value_pos && value_pos < order_pos && order_pos < created_pos);
    }
}
