//! Structured query filters.
//!
//! A [`Filter`] is a conjunction of `(field, operator, value)` conditions.
//! Fields map to a fixed set of columns and values are always bound as
//! parameters, so caller input never becomes SQL text.
use rusqlite::types::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterField {
    SourceId,
    SourceType,
    SourcePath,
    ChunkId,
}

impl FilterField {
    fn column(self) -> &'static str {
        match self {
            FilterField::SourceId => "c.source_id",
            FilterField::SourceType => "s.source_type",
            FilterField::SourcePath => "s.source_path",
            FilterField::ChunkId => "c.chunk_id",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    NotEq,
}

impl FilterOp {
    fn sql(self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::NotEq => "!=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    Text(String),
    Integer(i64),
}

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        FilterValue::Text(s.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(s: String) -> Self {
        FilterValue::Text(s)
    }
}

impl From<i64> for FilterValue {
    fn from(n: i64) -> Self {
        FilterValue::Integer(n)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub field: FilterField,
    pub op: FilterOp,
    pub value: FilterValue,
}

/// All conditions must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn field_eq(self, field: FilterField, value: impl Into<FilterValue>) -> Self {
        self.with(field, FilterOp::Eq, value)
    }

    #[must_use]
    pub fn field_ne(self, field: FilterField, value: impl Into<FilterValue>) -> Self {
        self.with(field, FilterOp::NotEq, value)
    }

    #[must_use]
    pub fn with(mut self, field: FilterField, op: FilterOp, value: impl Into<FilterValue>) -> Self {
        self.conditions.push(Condition {
            field,
            op,
            value: value.into(),
        });
        self
    }

    #[must_use]
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// SQL clauses (joined by `AND`) and their bound values, in order.
    ///
    /// Column aliases assume `chunks c JOIN sources s`.
    pub(crate) fn to_sql(&self) -> (Vec<String>, Vec<Value>) {
        self.conditions
            .iter()
            .map(|c| {
                let clause = format!("{} {} ?", c.field.column(), c.op.sql());
                let value = match &c.value {
                    FilterValue::Text(s) => Value::Text(s.clone()),
                    FilterValue::Integer(n) => Value::Integer(*n),
                };
                (clause, value)
            })
            .unzip()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter() {
        let (clauses, values) = Filter::new().to_sql();
        assert!(clauses.is_empty());
        assert!(values.is_empty());
    }

    #[test]
    fn test_values_are_bound_not_inlined() {
        let hostile = "x' OR '1'='1";
        let filter = Filter::new()
            .field_eq(FilterField::SourceType, "file")
            .field_ne(FilterField::SourceId, hostile)
            .field_eq(FilterField::ChunkId, 3_i64);

        let (clauses, values) = filter.to_sql();
        assert_eq!(
            clauses,
            vec!["s.source_type = ?", "c.source_id != ?", "c.chunk_id = ?"]
        );
        assert!(clauses.iter().all(|c| !c.contains(hostile)));
        assert_eq!(
            values,
            vec![
                Value::Text("file".into()),
                Value::Text(hostile.into()),
                Value::Integer(3)
            ]
        );
    }
}
