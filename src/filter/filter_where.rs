use chrono::{DateTime, NaiveDate};
use serde_json::Value;

use crate::access::{Comparator, Comparison, Predicate};

use super::error::FilterError;

/// Translates between the JSON where-clause, the predicate tree and SQL.
///
/// Parsing: `{ field: value }` is implicit equality, `{ field: { $op: value } }`
/// applies an operator, and `$and` / `$or` take arrays of nested clauses.
/// Several keys in one object are ANDed.
///
/// Rendering: every value is bound as a text parameter. Numbers, booleans and
/// date-like values in ordering comparisons are cast on the parameter side;
/// everything else compares the column as text.
pub struct FilterWhere {
    table: String,
    params: Vec<String>,
}

impl FilterWhere {
    pub fn parse(where_data: &Value, max_depth: u32) -> Result<Predicate, FilterError> {
        Self::parse_node(where_data, 0, max_depth)
    }

    fn parse_node(where_data: &Value, depth: u32, max_depth: u32) -> Result<Predicate, FilterError> {
        if depth > max_depth {
            return Err(FilterError::NestingTooDeep(max_depth));
        }
        let obj = match where_data {
            Value::Null => return Ok(Predicate::all()),
            Value::Object(obj) => obj,
            _ => return Err(FilterError::InvalidWhereClause("WHERE must be an object".to_string())),
        };

        let mut conditions = Vec::new();
        for (key, value) in obj {
            if key.starts_with('$') {
                conditions.push(Self::parse_logical_operator(key, value, depth, max_depth)?);
            } else {
                conditions.extend(Self::parse_field_condition(key, value)?);
            }
        }

        Ok(match conditions.len() {
            1 => conditions.remove(0),
            _ => Predicate::And(conditions),
        })
    }

    fn parse_logical_operator(op: &str, value: &Value, depth: u32, max_depth: u32) -> Result<Predicate, FilterError> {
        let arr = value
            .as_array()
            .ok_or_else(|| FilterError::InvalidOperatorData(format!("{} requires array", op)))?;
        let children = arr
            .iter()
            .map(|v| Self::parse_node(v, depth + 1, max_depth))
            .collect::<Result<Vec<_>, _>>()?;
        match op {
            "$and" => Ok(Predicate::And(children)),
            "$or" => Ok(Predicate::Or(children)),
            _ => Err(FilterError::UnsupportedOperator(op.to_string())),
        }
    }

    fn parse_field_condition(field: &str, value: &Value) -> Result<Vec<Predicate>, FilterError> {
        Self::validate_identifier(field)?;
        match value {
            Value::Object(ops) if ops.keys().all(|k| k.starts_with('$')) => ops
                .iter()
                .map(|(op, data)| {
                    let comparator = Self::map_operator(op)?;
                    Self::validate_operand(op, comparator, data)?;
                    Ok(Predicate::compare(field, comparator, data.clone()))
                })
                .collect(),
            Value::Object(_) | Value::Array(_) => Err(FilterError::InvalidOperatorData(format!(
                "Implicit equality on '{}' needs a scalar value",
                field
            ))),
            // Implicit equality: { field: value }
            scalar => Ok(vec![Predicate::eq(field, scalar.clone())]),
        }
    }

    fn map_operator(op_key: &str) -> Result<Comparator, FilterError> {
        Ok(match op_key {
            "$eq" => Comparator::Equal,
            "$ne" | "$neq" => Comparator::NotEqual,
            "$gt" => Comparator::GreaterThan,
            "$gte" => Comparator::GreaterThanOrEqual,
            "$lt" => Comparator::LessThan,
            "$lte" => Comparator::LessThanOrEqual,
            "$like" => Comparator::Like,
            "$ilike" => Comparator::LikeIgnoreCase,
            "$in" => Comparator::In,
            other => return Err(FilterError::UnsupportedOperator(other.to_string())),
        })
    }

    fn validate_operand(op: &str, comparator: Comparator, data: &Value) -> Result<(), FilterError> {
        match (comparator, data) {
            (Comparator::In, Value::Array(values)) if values.iter().all(is_scalar) => Ok(()),
            (Comparator::In, _) => Err(FilterError::InvalidOperatorData(format!("{} requires array of scalars", op))),
            (_, value) if is_scalar(value) => Ok(()),
            _ => Err(FilterError::InvalidOperatorData(format!("{} requires a scalar value", op))),
        }
    }

    fn validate_identifier(name: &str) -> Result<(), FilterError> {
        let mut chars = name.chars();
        let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if valid {
            Ok(())
        } else {
            Err(FilterError::InvalidColumn(format!("Invalid column name format: {}", name)))
        }
    }

    /// Render a predicate into a WHERE body. `table` qualifies unaliased paths;
    /// parameter numbering continues after `starting_param_index`.
    pub fn generate(
        predicate: &Predicate,
        table: &str,
        starting_param_index: usize,
    ) -> Result<(String, Vec<String>), FilterError> {
        let mut filter_where = Self { table: table.to_string(), params: Vec::new() };
        let sql = filter_where.render(predicate, starting_param_index)?;
        Ok((sql, filter_where.params))
    }

    fn render(&mut self, predicate: &Predicate, offset: usize) -> Result<String, FilterError> {
        match predicate {
            Predicate::Compare(cmp) => self.render_comparison(cmp, offset),
            Predicate::And(children) if children.is_empty() => Ok("TRUE".to_string()),
            Predicate::Or(children) if children.is_empty() => Ok("FALSE".to_string()),
            Predicate::And(children) => self.render_group(children, " AND ", offset),
            Predicate::Or(children) => self.render_group(children, " OR ", offset),
        }
    }

    fn render_group(&mut self, children: &[Predicate], joiner: &str, offset: usize) -> Result<String, FilterError> {
        let parts = children
            .iter()
            .map(|child| self.render(child, offset))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(format!("({})", parts.join(joiner)))
    }

    fn render_comparison(&mut self, cmp: &Comparison, offset: usize) -> Result<String, FilterError> {
        let column = self.column(&cmp.path)?;

        if cmp.value.is_null() {
            return match cmp.comparator {
                Comparator::Equal => Ok(format!("{} IS NULL", column)),
                Comparator::NotEqual => Ok(format!("{} IS NOT NULL", column)),
                other => Err(FilterError::InvalidOperatorData(format!("{} cannot compare with null", other.as_str()))),
            };
        }

        let sql = match cmp.comparator {
            Comparator::Equal => self.binary(&column, "=", &cmp.value, false, offset)?,
            Comparator::NotEqual => self.binary(&column, "<>", &cmp.value, false, offset)?,
            Comparator::GreaterThan => self.binary(&column, ">", &cmp.value, true, offset)?,
            Comparator::GreaterThanOrEqual => self.binary(&column, ">=", &cmp.value, true, offset)?,
            Comparator::LessThan => self.binary(&column, "<", &cmp.value, true, offset)?,
            Comparator::LessThanOrEqual => self.binary(&column, "<=", &cmp.value, true, offset)?,
            Comparator::Like => format!("{}::text LIKE {}", column, self.param(text(&cmp.value)?, offset)),
            Comparator::LikeIgnoreCase => format!("{}::text ILIKE {}", column, self.param(text(&cmp.value)?, offset)),
            Comparator::StartsWith => {
                let pattern = format!("{}%", escape_like(&text(&cmp.value)?));
                format!("{}::text LIKE {}", column, self.param(pattern, offset))
            }
            Comparator::In => {
                let values = match &cmp.value {
                    Value::Array(values) => values.clone(),
                    single => vec![single.clone()],
                };
                if values.is_empty() {
                    return Ok("FALSE".to_string());
                }
                let numeric = values.iter().all(Value::is_number);
                let mut params = Vec::with_capacity(values.len());
                for value in &values {
                    let placeholder = self.param(text(value)?, offset);
                    params.push(if numeric { format!("{}::numeric", placeholder) } else { placeholder });
                }
                let lhs = if numeric { column } else { format!("{}::text", column) };
                format!("{} IN ({})", lhs, params.join(", "))
            }
        };
        Ok(sql)
    }

    fn binary(&mut self, column: &str, op: &str, value: &Value, ordering: bool, offset: usize) -> Result<String, FilterError> {
        let cast = match value {
            Value::Number(_) => Some("numeric"),
            Value::Bool(_) => Some("boolean"),
            Value::String(s) if ordering && DateTime::parse_from_rfc3339(s).is_ok() => Some("timestamptz"),
            Value::String(s) if ordering && NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() => Some("date"),
            _ => None,
        };
        let placeholder = self.param(text(value)?, offset);
        Ok(match cast {
            Some(cast) => format!("{} {} {}::{}", column, op, placeholder, cast),
            None => format!("{}::text {} {}", column, op, placeholder),
        })
    }

    /// `field` is read from the root table, `alias.field` from a joined one
    fn column(&self, path: &str) -> Result<String, FilterError> {
        match path.split_once('.') {
            None => {
                Self::validate_identifier(path)?;
                Ok(format!("\"{}\".\"{}\"", self.table, path))
            }
            Some((alias, field)) => {
                Self::validate_identifier(alias)?;
                Self::validate_identifier(field)?;
                Ok(format!("\"{}\".\"{}\"", alias, field))
            }
        }
    }

    fn param(&mut self, value: String, offset: usize) -> String {
        self.params.push(value);
        format!("${}", offset + self.params.len())
    }
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

fn text(value: &Value) -> Result<String, FilterError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(FilterError::InvalidOperatorData(format!("Cannot bind {}", other))),
    }
}

fn escape_like(value: &str) -> String {
    value.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_implicit_equality_and_operators() {
        let predicate = FilterWhere::parse(&json!({"name": "Bob", "age": {"$gte": 21, "$lt": 65}}), 10).unwrap();
        assert_eq!(
            predicate,
            Predicate::And(vec![
                Predicate::compare("age", Comparator::GreaterThanOrEqual, 21),
                Predicate::compare("age", Comparator::LessThan, 65),
                Predicate::eq("name", "Bob"),
            ])
        );
    }

    #[test]
    fn parses_logical_operators() {
        let predicate = FilterWhere::parse(&json!({"$or": [{"status": "open"}, {"priority": {"$in": [1, 2]}}]}), 10).unwrap();
        assert_eq!(
            predicate,
            Predicate::Or(vec![
                Predicate::eq("status", "open"),
                Predicate::compare("priority", Comparator::In, json!([1, 2])),
            ])
        );
    }

    #[test]
    fn empty_or_null_where_is_unconstrained() {
        assert!(FilterWhere::parse(&Value::Null, 10).unwrap().is_unconstrained());
        assert!(FilterWhere::parse(&json!({}), 10).unwrap().is_unconstrained());
    }

    #[test]
    fn rejects_deep_nesting() {
        let deep = json!({"$and": [{"$and": [{"$and": [{"a": 1}]}]}]});
        assert_eq!(FilterWhere::parse(&deep, 2).unwrap_err(), FilterError::NestingTooDeep(2));
        assert!(FilterWhere::parse(&deep, 3).is_ok());
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(FilterWhere::parse(&json!("1=1"), 10), Err(FilterError::InvalidWhereClause(_))));
        assert!(matches!(FilterWhere::parse(&json!({"a": {"$regex": "x"}}), 10), Err(FilterError::UnsupportedOperator(_))));
        assert!(matches!(FilterWhere::parse(&json!({"a; drop": 1}), 10), Err(FilterError::InvalidColumn(_))));
        assert!(matches!(FilterWhere::parse(&json!({"a": {"$in": 3}}), 10), Err(FilterError::InvalidOperatorData(_))));
        // dotted paths are reserved for declared joins
        assert!(matches!(FilterWhere::parse(&json!({"f.owner": 1}), 10), Err(FilterError::InvalidColumn(_))));
    }

    #[test]
    fn renders_parameterized_sql() {
        let predicate = Predicate::And(vec![
            Predicate::eq("created_by", "7"),
            Predicate::Or(vec![
                Predicate::compare("age", Comparator::GreaterThan, 21),
                Predicate::eq("deleted_at", Value::Null),
            ]),
        ]);
        let (sql, params) = FilterWhere::generate(&predicate, "notes", 0).unwrap();
        assert_eq!(
            sql,
            r#"("notes"."created_by"::text = $1 AND ("notes"."age" > $2::numeric OR "notes"."deleted_at" IS NULL))"#
        );
        assert_eq!(params, vec!["7".to_string(), "21".to_string()]);
    }

    #[test]
    fn renders_joined_paths_with_alias() {
        let (sql, _) = FilterWhere::generate(&Predicate::eq("f.owner", "7"), "native", 0).unwrap();
        assert_eq!(sql, r#""f"."owner"::text = $1"#);
    }

    #[test]
    fn renders_ordering_on_timestamps_and_like_escaping() {
        let predicate = Predicate::And(vec![
            Predicate::compare("created_at", Comparator::GreaterThan, "2024-02-14T12:00:00Z"),
            Predicate::compare("name", Comparator::StartsWith, "50%_"),
        ]);
        let (sql, params) = FilterWhere::generate(&predicate, "t", 2).unwrap();
        assert_eq!(sql, r#"("t"."created_at" > $3::timestamptz AND "t"."name"::text LIKE $4)"#);
        assert_eq!(params[1], "50\\%\\_%");
    }

    #[test]
    fn empty_groups_render_as_constants() {
        assert_eq!(FilterWhere::generate(&Predicate::all(), "t", 0).unwrap().0, "TRUE");
        assert_eq!(FilterWhere::generate(&Predicate::Or(vec![]), "t", 0).unwrap().0, "FALSE");
        let (sql, params) = FilterWhere::generate(&Predicate::compare("id", Comparator::In, json!([])), "t", 0).unwrap();
        assert_eq!((sql.as_str(), params.len()), ("FALSE", 0));
    }
}
