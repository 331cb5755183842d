//! Fetched row representation: the "rows as maps" half of C3's fetch
//! contract.

use sqlx::{Column, Row};

/// A single decoded column value. Distinct from [`crate::value::Value`],
/// which is the bind-side tagged variant — this is the read side, wide
/// enough to hold what `sqlx::Any` can decode without a schema hint.
#[derive(Debug, Clone, PartialEq)]
pub enum RowValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
    Null,
}

/// A fetched row, column name to decoded value.
///
/// Backed by an ordered vector of pairs rather than a `BTreeMap`: a
/// `BTreeMap` would re-sort columns alphabetically, breaking
/// `fetch_column`'s "first selected column" contract for any multi-column
/// result (`SELECT name, id FROM t` must hand back `name`, not `id`, as the
/// first/only column `fetch_column` returns).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowMap(Vec<(String, RowValue)>);

impl RowMap {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends `(name, value)`, preserving the order columns were decoded in.
    pub fn insert(&mut self, name: String, value: RowValue) {
        self.0.push((name, value));
    }

    pub fn get(&self, name: &str) -> Option<&RowValue> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RowValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Consumes the row, yielding its values in column order; `fetch_column`
    /// takes the first of these as "the" selected column's value.
    pub fn into_values(self) -> impl Iterator<Item = RowValue> {
        self.0.into_iter().map(|(_, v)| v)
    }
}

/// Decodes a driver row into a [`RowMap`], probing column types in order
/// since `sqlx::Any` erases the underlying driver's static type information.
pub(crate) fn decode_row(row: &sqlx::any::AnyRow) -> RowMap {
    let mut map = RowMap::new();
    for (idx, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), decode_value(row, idx));
    }
    map
}

fn decode_value(row: &sqlx::any::AnyRow, idx: usize) -> RowValue {
    if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
        return RowValue::Int(v);
    }
    if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
        return RowValue::Float(v);
    }
    if let Ok(Some(v)) = row.try_get::<Option<bool>, _>(idx) {
        return RowValue::Bool(v);
    }
    if let Ok(Some(v)) = row.try_get::<Option<String>, _>(idx) {
        return RowValue::Str(v);
    }
    if let Ok(Some(v)) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return RowValue::Bytes(v);
    }
    RowValue::Null
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_insertion_order_for_first_column_lookup() {
        let mut row = RowMap::new();
        row.insert("name".to_string(), RowValue::Str("ada".to_string()));
        row.insert("id".to_string(), RowValue::Int(7));

        // "id" sorts before "name" alphabetically; a BTreeMap-backed RowMap
        // would return it first and break `fetch_column`'s contract.
        assert_eq!(row.into_values().next(), Some(RowValue::Str("ada".to_string())));
    }

    #[test]
    fn get_looks_up_by_name_regardless_of_order() {
        let mut row = RowMap::new();
        row.insert("b".to_string(), RowValue::Int(2));
        row.insert("a".to_string(), RowValue::Int(1));
        assert_eq!(row.get("a"), Some(&RowValue::Int(1)));
        assert_eq!(row.get("b"), Some(&RowValue::Int(2)));
        assert_eq!(row.get("missing"), None);
    }
}
