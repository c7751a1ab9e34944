use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::model::{follows_filter_convention, ColumnData, Table};
use crate::error::{InspectorError, Result};

// ---------------------------------------------------------------------------
// Raw filter arguments
// ---------------------------------------------------------------------------

/// Raw key → tokens mapping, as collected from query parameters.
/// Keys following the upper-case convention are filter columns; everything
/// else is treated as an unrelated option and ignored.
pub type FilterArgs = BTreeMap<String, Vec<String>>;

// ---------------------------------------------------------------------------
// Predicates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    Ne,
}

impl Operator {
    fn holds(self, ordering: Option<std::cmp::Ordering>) -> bool {
        use std::cmp::Ordering::*;
        match (self, ordering) {
            // unordered (NaN) only satisfies `ne`
            (Operator::Ne, None) => true,
            (_, None) => false,
            (Operator::Eq, Some(o)) => o == Equal,
            (Operator::Ne, Some(o)) => o != Equal,
            (Operator::Lt, Some(o)) => o == Less,
            (Operator::Le, Some(o)) => o != Greater,
            (Operator::Gt, Some(o)) => o == Greater,
            (Operator::Ge, Some(o)) => o != Less,
        }
    }
}

impl FromStr for Operator {
    type Err = InspectorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "eq" => Ok(Operator::Eq),
            "lt" => Ok(Operator::Lt),
            "le" => Ok(Operator::Le),
            "gt" => Ok(Operator::Gt),
            "ge" => Ok(Operator::Ge),
            "ne" => Ok(Operator::Ne),
            other => Err(InspectorError::filter(format!("Unrecognized operator {other}"))),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operator::Eq => "eq",
            Operator::Lt => "lt",
            Operator::Le => "le",
            Operator::Gt => "gt",
            Operator::Ge => "ge",
            Operator::Ne => "ne",
        };
        f.write_str(name)
    }
}

/// One `column <op> value` condition. The value stays textual until it is
/// cast to the target column's type at evaluation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub column: String,
    pub operator: Operator,
    pub value: String,
}

impl Predicate {
    /// Parse an `"op:value"` token, or a bare `"value"` meaning `eq`.
    /// Only the first `:` separates operator from value.
    pub fn parse(column: &str, token: &str) -> Result<Self> {
        let (operator, value) = match token.split_once(':') {
            Some((op, value)) => (op.parse()?, value),
            None => (Operator::Eq, token),
        };
        Ok(Predicate {
            column: column.to_string(),
            operator,
            value: value.to_string(),
        })
    }

    /// AND this predicate into `keep`.
    fn apply_to(&self, data: &ColumnData, keep: &mut [bool]) -> Result<()> {
        let cast_error = || {
            InspectorError::filter(format!(
                "Filter value '{}' for column {} is not a valid {}",
                self.value,
                self.column,
                data.kind()
            ))
        };

        match data {
            ColumnData::Integer(values) => {
                let target: i64 = self.value.trim().parse().map_err(|_| cast_error())?;
                and_into(keep, values.iter().map(|v| self.operator.holds(v.partial_cmp(&target))));
            }
            ColumnData::Float(values) => {
                let target: f64 = self.value.trim().parse().map_err(|_| cast_error())?;
                and_into(keep, values.iter().map(|v| self.operator.holds(v.partial_cmp(&target))));
            }
            ColumnData::String(values) => {
                let target = self.value.as_str();
                and_into(
                    keep,
                    values.iter().map(|v| self.operator.holds(Some(v.as_str().cmp(target)))),
                );
            }
        }
        Ok(())
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.column, self.operator, self.value)
    }
}

fn and_into(keep: &mut [bool], passes: impl Iterator<Item = bool>) {
    for (k, pass) in keep.iter_mut().zip(passes) {
        *k &= pass;
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Turn raw arguments into a typed predicate list.
///
/// Keys outside the upper-case convention are skipped. Every token of a
/// conforming key becomes one predicate; all of them are ANDed together.
pub fn predicates_from_args(args: &FilterArgs) -> Result<Vec<Predicate>> {
    let mut predicates = Vec::new();
    for (column, tokens) in args {
        if !follows_filter_convention(column) {
            continue;
        }
        for token in tokens {
            predicates.push(Predicate::parse(column, token)?);
        }
    }
    Ok(predicates)
}

/// Keep the rows of `table` that satisfy every predicate.
///
/// Row order, all columns and the table metadata are preserved. A predicate
/// naming a missing or non-filterable column is an error.
pub fn apply(table: &Table, predicates: &[Predicate]) -> Result<Table> {
    if predicates.is_empty() {
        return Ok(table.clone());
    }

    let mut keep = vec![true; table.len()];
    for predicate in predicates {
        let column = table.column(&predicate.column).ok_or_else(|| {
            InspectorError::filter(format!(
                "Filter column \"{}\" not in {:?}",
                predicate.column,
                table.column_names()
            ))
        })?;
        if !column.filterable {
            return Err(InspectorError::filter(format!(
                "Column \"{}\" cannot be used as a filter",
                predicate.column
            )));
        }
        predicate.apply_to(&column.data, &mut keep)?;
    }

    Ok(table.select(&keep))
}

/// Parse `args` and apply the resulting predicates to `table`.
pub fn filter_table(table: &Table, args: &FilterArgs) -> Result<Table> {
    let predicates = predicates_from_args(args)?;
    apply(table, &predicates)
}
