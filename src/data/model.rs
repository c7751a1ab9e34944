use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::error::{InspectorError, Result};

// ---------------------------------------------------------------------------
// MetadataValue – a single cell or table metadata entry
// ---------------------------------------------------------------------------

/// A dynamically-typed scalar, used for table metadata and for reading
/// individual cells out of a typed column.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::String(s) => write!(f, "{s}"),
            MetadataValue::Integer(i) => write!(f, "{i}"),
            MetadataValue::Float(v) => write!(f, "{v:.4}"),
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::Null => write!(f, ""),
        }
    }
}

impl MetadataValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Float(v) => Some(*v),
            MetadataValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Columns
// ---------------------------------------------------------------------------

/// Element type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Float,
    String,
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnKind::Integer => "integer",
            ColumnKind::Float => "float",
            ColumnKind::String => "string",
        };
        f.write_str(name)
    }
}

/// Homogeneously typed column storage.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Integer(Vec<i64>),
    Float(Vec<f64>),
    String(Vec<String>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Integer(v) => v.len(),
            ColumnData::Float(v) => v.len(),
            ColumnData::String(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> ColumnKind {
        match self {
            ColumnData::Integer(_) => ColumnKind::Integer,
            ColumnData::Float(_) => ColumnKind::Float,
            ColumnData::String(_) => ColumnKind::String,
        }
    }

    /// Cell at `row` as a [`MetadataValue`]; `Null` past the end.
    pub fn value(&self, row: usize) -> MetadataValue {
        match self {
            ColumnData::Integer(v) => v.get(row).map_or(MetadataValue::Null, |x| MetadataValue::Integer(*x)),
            ColumnData::Float(v) => v.get(row).map_or(MetadataValue::Null, |x| MetadataValue::Float(*x)),
            ColumnData::String(v) => v
                .get(row)
                .map_or(MetadataValue::Null, |x| MetadataValue::String(x.clone())),
        }
    }

    /// New column holding the rows at `indices`, in that order.
    pub fn take(&self, indices: &[usize]) -> ColumnData {
        match self {
            ColumnData::Integer(v) => ColumnData::Integer(indices.iter().map(|&i| v[i]).collect()),
            ColumnData::Float(v) => ColumnData::Float(indices.iter().map(|&i| v[i]).collect()),
            ColumnData::String(v) => ColumnData::String(indices.iter().map(|&i| v[i].clone()).collect()),
        }
    }
}

/// A named column plus its filter eligibility.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
    /// Whether filter predicates may target this column.
    pub filterable: bool,
}

/// The upper-case naming convention that marks filterable columns and
/// filter-argument keys: at least one cased character and no lower-case ones.
pub fn follows_filter_convention(name: &str) -> bool {
    let mut has_cased = false;
    for c in name.chars() {
        if c.is_lowercase() {
            return false;
        }
        if c.is_uppercase() {
            has_cased = true;
        }
    }
    has_cased
}

// ---------------------------------------------------------------------------
// Table – ordered named columns of equal length plus metadata
// ---------------------------------------------------------------------------

/// Column-oriented table. All columns share the same length; row order is
/// insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
    /// Case-sensitive metadata entries.
    pub meta: BTreeMap<String, MetadataValue>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows (zero for a table without columns).
    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, |c| c.data.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn contains_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Integer column contents, if `name` exists and is integer-typed.
    pub fn int_column(&self, name: &str) -> Option<&[i64]> {
        match self.column(name).map(|c| &c.data) {
            Some(ColumnData::Integer(v)) => Some(v),
            _ => None,
        }
    }

    /// Float column contents, if `name` exists and is float-typed.
    pub fn float_column(&self, name: &str) -> Option<&[f64]> {
        match self.column(name).map(|c| &c.data) {
            Some(ColumnData::Float(v)) => Some(v),
            _ => None,
        }
    }

    /// Add a column, or replace a same-named one in place.
    ///
    /// Filter eligibility defaults to the upper-case naming convention; use
    /// [`Table::set_filterable`] to override it.
    pub fn add_column(&mut self, name: impl Into<String>, data: ColumnData) -> Result<()> {
        let name = name.into();
        let existing = self.columns.iter().position(|c| c.name == name);
        let other_columns = self.columns.len() - usize::from(existing.is_some());
        if other_columns > 0 && data.len() != self.len() {
            return Err(InspectorError::validation(format!(
                "column {name} has {} rows but the table has {}",
                data.len(),
                self.len()
            )));
        }

        let filterable = follows_filter_convention(&name);
        let column = Column { name, data, filterable };
        match existing {
            Some(i) => self.columns[i] = column,
            None => self.columns.push(column),
        }
        Ok(())
    }

    /// Builder-style [`Table::add_column`].
    pub fn with_column(mut self, name: impl Into<String>, data: ColumnData) -> Result<Self> {
        self.add_column(name, data)?;
        Ok(self)
    }

    /// Remove and return a column.
    pub fn remove_column(&mut self, name: &str) -> Option<Column> {
        let i = self.columns.iter().position(|c| c.name == name)?;
        Some(self.columns.remove(i))
    }

    pub fn set_filterable(&mut self, name: &str, filterable: bool) -> Result<()> {
        let column = self
            .columns
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| InspectorError::validation(format!("no column named {name}")))?;
        column.filterable = filterable;
        Ok(())
    }

    /// New table with the rows at `indices`, in that order. Metadata and
    /// column flags are carried over.
    pub fn take(&self, indices: &[usize]) -> Table {
        Table {
            columns: self
                .columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    data: c.data.take(indices),
                    filterable: c.filterable,
                })
                .collect(),
            meta: self.meta.clone(),
        }
    }

    /// New table with the rows where `mask` is true, preserving order.
    pub fn select(&self, mask: &[bool]) -> Table {
        let indices: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter(|(_, keep)| **keep)
            .map(|(i, _)| i)
            .collect();
        self.take(&indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn naming_convention() {
        assert!(follows_filter_convention("TARGETID"));
        assert!(follows_filter_convention("TARGET_RA"));
        assert!(follows_filter_convention("A1"));
        assert!(!follows_filter_convention("format"));
        assert!(!follows_filter_convention("Z_err"));
        assert!(!follows_filter_convention("123"));
        assert!(!follows_filter_convention(""));
    }

    #[test]
    fn columns_must_share_length() {
        let mut table = Table::new()
            .with_column("A", ColumnData::Integer(vec![1, 2, 3]))
            .unwrap();
        let err = table.add_column("B", ColumnData::Float(vec![1.0])).unwrap_err();
        assert!(matches!(err, InspectorError::Validation(_)));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn replacing_a_column_keeps_position() {
        let mut table = Table::new()
            .with_column("A", ColumnData::Integer(vec![1, 2]))
            .unwrap()
            .with_column("B", ColumnData::Integer(vec![3, 4]))
            .unwrap();
        table.add_column("A", ColumnData::String(vec!["x".into(), "y".into()])).unwrap();
        assert_eq!(table.column_names(), vec!["A", "B"]);
        assert_eq!(table.column("A").unwrap().data.kind(), ColumnKind::String);

        // a single-column table may change length when replaced
        let mut single = Table::new().with_column("A", ColumnData::Integer(vec![1])).unwrap();
        single.add_column("A", ColumnData::Integer(vec![1, 2, 3])).unwrap();
        assert_eq!(single.len(), 3);
    }

    #[test]
    fn filterable_defaults_follow_names() {
        let mut table = Table::new()
            .with_column("Z", ColumnData::Float(vec![0.5]))
            .unwrap()
            .with_column("note", ColumnData::String(vec!["x".into()]))
            .unwrap();
        assert!(table.column("Z").unwrap().filterable);
        assert!(!table.column("note").unwrap().filterable);

        table.set_filterable("Z", false).unwrap();
        assert!(!table.column("Z").unwrap().filterable);
        assert!(table.set_filterable("missing", true).is_err());
    }

    #[test]
    fn select_preserves_order_and_meta() {
        let mut table = Table::new()
            .with_column("A", ColumnData::Integer((0..5).collect()))
            .unwrap();
        table.meta.insert("SPECPROD".into(), MetadataValue::String("iron".into()));

        let picked = table.select(&[false, true, false, true, true]);
        assert_eq!(picked.int_column("A").unwrap(), &[1, 3, 4]);
        assert_eq!(picked.meta, table.meta);

        let reordered = table.take(&[4, 0, 4]);
        assert_eq!(reordered.int_column("A").unwrap(), &[4, 0, 4]);
    }
}
