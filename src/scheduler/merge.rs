//! Per-unit result payloads and their disjoint-union merge.
//!
//! Workers report category tables with flat keys of the form
//! `"<category>_<year-offset>"`. Those keys are parsed once into a
//! `CategoryKey` at the edge, so merging works on `(category, year)` pairs
//! and never on string suffixes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FanoutError, WorkerError};

/// Wire field holding the per-job fiscal total.
pub const FISCAL_TOTALS_FIELD: &str = "fiscal_tots";

/// The six category tables a worker reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TableName {
    #[serde(rename = "mX_dec")]
    BaseDecile,
    #[serde(rename = "mY_dec")]
    UserDecile,
    #[serde(rename = "df_dec")]
    DiffDecile,
    #[serde(rename = "mX_bin")]
    BaseBin,
    #[serde(rename = "mY_bin")]
    UserBin,
    #[serde(rename = "df_bin")]
    DiffBin,
}

impl TableName {
    pub const ALL: [TableName; 6] = [
        TableName::BaseDecile,
        TableName::UserDecile,
        TableName::DiffDecile,
        TableName::BaseBin,
        TableName::UserBin,
        TableName::DiffBin,
    ];

    /// Field name used on the wire.
    pub fn wire_name(&self) -> &'static str {
        match self {
            TableName::BaseDecile => "mX_dec",
            TableName::UserDecile => "mY_dec",
            TableName::DiffDecile => "df_dec",
            TableName::BaseBin => "mX_bin",
            TableName::UserBin => "mY_bin",
            TableName::DiffBin => "df_bin",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            TableName::BaseDecile => "Base plan tax vars, weighted avg per AGI decile",
            TableName::UserDecile => "User plan tax vars, weighted avg per AGI decile",
            TableName::DiffDecile => "Difference between Base and User plans by AGI decile",
            TableName::BaseBin => "Base plan tax vars, weighted avg per income bin",
            TableName::UserBin => "User plan tax vars, weighted avg per income bin",
            TableName::DiffBin => "Difference between Base and User plans by income bin",
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Row key of a category table: category plus year offset.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CategoryKey {
    pub category: String,
    pub year: u32,
}

impl CategoryKey {
    pub fn new(category: impl Into<String>, year: u32) -> Self {
        Self {
            category: category.into(),
            year,
        }
    }

    /// Parses a wire key such as `"0-10_3"`; the suffix after the last `_` is the year.
    ///
    /// Zero-padded years (`"all_01"`) are rejected so `wire_key` reproduces the input.
    pub fn parse(wire_key: &str) -> Option<Self> {
        let (category, year) = wire_key.rsplit_once('_')?;
        if category.is_empty() || year.is_empty() || !year.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if year.len() > 1 && year.starts_with('0') {
            return None;
        }
        let year = year.parse().ok()?;
        Some(Self::new(category, year))
    }

    /// The flat wire form, `"<category>_<year>"`.
    pub fn wire_key(&self) -> String {
        format!("{}_{}", self.category, self.year)
    }
}

impl fmt::Display for CategoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.category, self.year)
    }
}

/// Rows of one category table.
pub type CategoryTable = BTreeMap<CategoryKey, Vec<Value>>;

/// Result payload of one job.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResult {
    pub tables: BTreeMap<TableName, CategoryTable>,
    pub fiscal_total: Value,
}

impl RawResult {
    /// Parses a worker's JSON result.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError::Parse` if a table or the fiscal total is missing,
    /// a row key has no numeric year suffix, or a row is not a list.
    pub fn from_json(value: Value) -> Result<Self, WorkerError> {
        let Value::Object(mut object) = value else {
            return Err(WorkerError::Parse("result payload is not an object".to_string()));
        };

        let mut tables = BTreeMap::new();
        for name in TableName::ALL {
            let raw_table = object
                .remove(name.wire_name())
                .ok_or_else(|| WorkerError::Parse(format!("missing table '{}'", name)))?;
            tables.insert(name, parse_table(name, raw_table)?);
        }

        let fiscal_total = object.remove(FISCAL_TOTALS_FIELD).ok_or_else(|| {
            WorkerError::Parse(format!("missing field '{}'", FISCAL_TOTALS_FIELD))
        })?;

        Ok(Self {
            tables,
            fiscal_total,
        })
    }

    /// Parses raw bytes of a worker response body.
    pub fn from_slice(body: &[u8]) -> Result<Self, WorkerError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| WorkerError::Parse(format!("invalid JSON: {}", e)))?;
        Self::from_json(value)
    }

    /// Re-encodes the payload in the wire shape.
    pub fn to_json(&self) -> Value {
        let mut object = tables_to_wire(&self.tables);
        object.insert(FISCAL_TOTALS_FIELD.to_string(), self.fiscal_total.clone());
        Value::Object(object)
    }
}

fn parse_table(name: TableName, raw: Value) -> Result<CategoryTable, WorkerError> {
    let Value::Object(rows) = raw else {
        return Err(WorkerError::Parse(format!("table '{}' is not an object", name)));
    };

    let mut table = CategoryTable::new();
    for (wire_key, row) in rows {
        let key = CategoryKey::parse(&wire_key).ok_or_else(|| {
            WorkerError::Parse(format!(
                "table '{}' has key '{}' without a canonical year suffix",
                name, wire_key
            ))
        })?;
        let Value::Array(values) = row else {
            return Err(WorkerError::Parse(format!(
                "row '{}' of table '{}' is not a list",
                wire_key, name
            )));
        };
        table.insert(key, values);
    }
    Ok(table)
}

fn tables_to_wire(tables: &BTreeMap<TableName, CategoryTable>) -> serde_json::Map<String, Value> {
    tables
        .iter()
        .map(|(name, table)| {
            let rows = table
                .iter()
                .map(|(key, values)| (key.wire_key(), Value::Array(values.clone())))
                .collect();
            (name.wire_name().to_string(), Value::Object(rows))
        })
        .collect()
}

/// Union of all per-job results of a request.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedResult {
    tables: BTreeMap<TableName, CategoryTable>,
    fiscal_totals: Vec<Value>,
}

impl Default for MergedResult {
    fn default() -> Self {
        Self::new()
    }
}

impl MergedResult {
    /// Creates an empty result with all six tables present.
    pub fn new() -> Self {
        Self {
            tables: TableName::ALL
                .iter()
                .map(|name| (*name, CategoryTable::new()))
                .collect(),
            fiscal_totals: Vec::new(),
        }
    }

    /// Merges results in submission order.
    pub fn from_results(results: impl IntoIterator<Item = RawResult>) -> Result<Self, FanoutError> {
        let mut merged = Self::new();
        for raw in results {
            merged.merge(raw)?;
        }
        Ok(merged)
    }

    /// Unions one job's rows into the accumulator and appends its fiscal total.
    ///
    /// A key already present with the same values is accepted as-is; the same
    /// key with different values is a `MergeConflict`. The accumulator is left
    /// untouched when an error is returned.
    pub fn merge(&mut self, raw: RawResult) -> Result<(), FanoutError> {
        for (name, table) in &raw.tables {
            let Some(existing) = self.tables.get(name) else {
                continue;
            };
            for (key, values) in table {
                if let Some(current) = existing.get(key) {
                    if current != values {
                        return Err(FanoutError::MergeConflict {
                            table: name.wire_name().to_string(),
                            key: key.wire_key(),
                        });
                    }
                }
            }
        }

        for (name, table) in raw.tables {
            self.tables.entry(name).or_default().extend(table);
        }
        self.fiscal_totals.push(raw.fiscal_total);
        Ok(())
    }

    pub fn table(&self, name: TableName) -> Option<&CategoryTable> {
        self.tables.get(&name)
    }

    /// Fiscal totals, one per unit in submission order.
    pub fn fiscal_totals(&self) -> &[Value] {
        &self.fiscal_totals
    }

    /// Number of units merged so far.
    pub fn num_years(&self) -> usize {
        self.fiscal_totals.len()
    }

    /// Calendar years covered, starting at `start_year`.
    pub fn result_years(&self, start_year: i32) -> Vec<i32> {
        (0..self.fiscal_totals.len() as i32)
            .map(|offset| start_year + offset)
            .collect()
    }

    /// Flat wire shape: six tables keyed `"<category>_<year>"` plus the `fiscal_tots` list.
    pub fn to_wire(&self) -> Value {
        let mut object = tables_to_wire(&self.tables);
        object.insert(
            FISCAL_TOTALS_FIELD.to_string(),
            Value::Array(self.fiscal_totals.clone()),
        );
        Value::Object(object)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use serde_json::json;

    use super::*;

    /// Builds a worker payload for `year` with the given decile categories.
    pub(crate) fn sample_payload(year: u32, categories: &[&str], total: &str) -> Value {
        let mut tables = serde_json::Map::new();
        for name in TableName::ALL {
            let rows: serde_json::Map<String, Value> = categories
                .iter()
                .map(|c| {
                    (
                        format!("{}_{}", c, year),
                        json!([format!("{}-{}-{}", name, c, year), "1.5%"]),
                    )
                })
                .collect();
            tables.insert(name.wire_name().to_string(), Value::Object(rows));
        }
        tables.insert(FISCAL_TOTALS_FIELD.to_string(), json!(total));
        Value::Object(tables)
    }

    pub(crate) fn sample_result(year: u32, categories: &[&str], total: &str) -> RawResult {
        RawResult::from_json(sample_payload(year, categories, total)).expect("valid payload")
    }

    #[test]
    fn test_category_key_parse() {
        assert_eq!(CategoryKey::parse("0-10n_3"), Some(CategoryKey::new("0-10n", 3)));
        assert_eq!(
            CategoryKey::parse("less_than_10_12"),
            Some(CategoryKey::new("less_than_10", 12))
        );
        assert_eq!(CategoryKey::parse("totals"), None);
        assert_eq!(CategoryKey::parse("_4"), None);
        assert_eq!(CategoryKey::parse("all_"), None);
        assert_eq!(CategoryKey::parse("all_-1"), None);
        assert_eq!(CategoryKey::parse("all_0"), Some(CategoryKey::new("all", 0)));
        assert_eq!(CategoryKey::parse("all_10"), Some(CategoryKey::new("all", 10)));
        assert_eq!(CategoryKey::parse("all_01"), None);
        assert_eq!(CategoryKey::parse("all_00"), None);
        assert_eq!(CategoryKey::new("all", 9).wire_key(), "all_9");
    }

    #[test]
    fn test_raw_result_parse() {
        let raw = sample_result(2, &["0-10", "all"], "123.4");

        assert_eq!(raw.tables.len(), 6);
        let deciles = &raw.tables[&TableName::BaseDecile];
        assert_eq!(deciles.len(), 2);
        assert!(deciles.contains_key(&CategoryKey::new("all", 2)));
        assert_eq!(raw.fiscal_total, json!("123.4"));
    }

    #[test]
    fn test_raw_result_missing_table() {
        let mut payload = sample_payload(0, &["all"], "1");
        payload
            .as_object_mut()
            .expect("object")
            .remove("df_bin");

        let err = RawResult::from_json(payload).unwrap_err();
        assert!(matches!(err, WorkerError::Parse(ref m) if m.contains("df_bin")));
    }

    #[test]
    fn test_raw_result_rejects_unsuffixed_key() {
        let mut payload = sample_payload(0, &["all"], "1");
        payload["mX_dec"]["totals"] = json!([1]);

        assert!(matches!(
            RawResult::from_json(payload),
            Err(WorkerError::Parse(_))
        ));
    }

    #[test]
    fn test_raw_result_rejects_zero_padded_year() {
        let mut payload = sample_payload(1, &["all"], "1");
        payload["mY_bin"]["all_01"] = json!([2]);

        assert!(matches!(
            RawResult::from_json(payload),
            Err(WorkerError::Parse(ref m)) if m.contains("all_01")
        ));
    }

    #[test]
    fn test_merged_wire_keys_match_worker_keys() {
        let merged = MergedResult::from_results(vec![
            sample_result(0, &["all"], "0"),
            sample_result(10, &["all"], "10"),
        ])
        .expect("merge");

        let wire = merged.to_wire();
        let mut keys: Vec<&String> = wire["mX_dec"].as_object().expect("object").keys().collect();
        keys.sort();
        assert_eq!(keys, vec!["all_0", "all_10"]);
    }

    #[test]
    fn test_merge_disjoint_years() {
        let merged = MergedResult::from_results(vec![
            sample_result(0, &["0-10", "all"], "10"),
            sample_result(1, &["0-10", "all"], "11"),
            sample_result(2, &["0-10", "all"], "12"),
        ])
        .expect("disjoint merge");

        assert_eq!(merged.fiscal_totals(), &[json!("10"), json!("11"), json!("12")]);
        for name in TableName::ALL {
            let table = merged.table(name).expect("table present");
            assert_eq!(table.len(), 6);
            assert_eq!(
                table[&CategoryKey::new("all", 1)],
                vec![json!(format!("{}-all-1", name)), json!("1.5%")]
            );
        }
    }

    #[test]
    fn test_merge_conflict_is_fatal() {
        let mut merged = MergedResult::new();
        merged
            .merge(sample_result(0, &["all"], "10"))
            .expect("first merge");

        let mut clash = sample_result(0, &["all"], "99");
        clash
            .tables
            .get_mut(&TableName::DiffDecile)
            .expect("table")
            .insert(CategoryKey::new("all", 0), vec![json!("other")]);

        let err = merged.merge(clash).unwrap_err();
        assert!(matches!(
            err,
            FanoutError::MergeConflict { ref table, ref key } if table == "df_dec" && key == "all_0"
        ));
        // Rejected payload left no trace.
        assert_eq!(merged.fiscal_totals().len(), 1);
    }

    #[test]
    fn test_merge_identical_duplicate_is_idempotent() {
        let mut merged = MergedResult::new();
        merged.merge(sample_result(0, &["all"], "10")).expect("merge");
        merged.merge(sample_result(0, &["all"], "10")).expect("same rows again");

        assert_eq!(merged.table(TableName::UserBin).expect("table").len(), 1);
        assert_eq!(merged.fiscal_totals().len(), 2);
    }

    #[test]
    fn test_result_years_and_wire_shape() {
        let merged = MergedResult::from_results(vec![
            sample_result(0, &["all"], "10"),
            sample_result(1, &["all"], "11"),
        ])
        .expect("merge");

        assert_eq!(merged.result_years(2015), vec![2015, 2016]);

        let wire = merged.to_wire();
        assert_eq!(wire["fiscal_tots"], json!(["10", "11"]));
        assert_eq!(wire["mX_bin"]["all_1"][0], json!("mX_bin-all-1"));
        assert_eq!(wire.as_object().expect("object").len(), 7);
    }

    #[test]
    fn test_raw_result_wire_round_trip() {
        let payload = sample_payload(4, &["0-10", "90-100"], "3.2");
        let raw = RawResult::from_json(payload.clone()).expect("parse");
        assert_eq!(raw.to_json(), payload);
    }
}
