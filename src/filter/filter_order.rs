use serde_json::Value;

use super::types::{FilterOrderInfo, SortDirection};
use super::error::FilterError;

pub struct FilterOrder;

impl FilterOrder {
    pub fn validate_and_parse(order: &Value) -> Result<Vec<FilterOrderInfo>, FilterError> {
        match order {
            Value::Null => Ok(vec![]),
            Value::String(s) => Self::parse_order_string(s),
            Value::Array(arr) => {
                // Expect array of strings like ["created_at desc", "name asc"]
                let mut out = Vec::new();
                for v in arr {
                    match v {
                        Value::String(s) => out.extend(Self::parse_order_string(s)?),
                        other => return Err(FilterError::InvalidOperatorData(format!("Invalid order entry: {}", other))),
                    }
                }
                Ok(out)
            }
            Value::Object(obj) => {
                // { "created_at": "desc", "name": "asc" }
                let mut out = Vec::new();
                for (k, v) in obj {
                    let sort = Self::parse_direction(v.as_str().unwrap_or("asc"))?;
                    out.push(FilterOrderInfo { column: k.clone(), sort });
                }
                Ok(out)
            }
            other => Err(FilterError::InvalidOperatorData(format!("Invalid order: {}", other))),
        }
    }

    fn parse_order_string(s: &str) -> Result<Vec<FilterOrderInfo>, FilterError> {
        // split on commas, then each token into column and direction
        let mut out = Vec::new();
        for part in s.split(',') {
            let trimmed = part.trim();
            if trimmed.is_empty() { continue; }
            let mut it = trimmed.split_whitespace();
            if let Some(col) = it.next() {
                let sort = Self::parse_direction(it.next().unwrap_or("asc"))?;
                out.push(FilterOrderInfo { column: col.to_string(), sort });
            }
        }
        Ok(out)
    }

    fn parse_direction(dir: &str) -> Result<SortDirection, FilterError> {
        match dir.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(FilterError::InvalidOperatorData(format!("Invalid sort direction: {}", other))),
        }
    }

    /// Columns are qualified with the root table so joins cannot make them ambiguous
    pub fn generate(table: &str, infos: &[FilterOrderInfo]) -> String {
        if infos.is_empty() { return String::new(); }
        let parts: Vec<String> = infos
            .iter()
            .map(|i| format!("\"{}\".\"{}\" {}", table, i.column, i.sort.to_sql()))
            .collect();
        format!("ORDER BY {}", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_all_order_forms() {
        let from_string = FilterOrder::validate_and_parse(&json!("created_at desc, name")).unwrap();
        let from_array = FilterOrder::validate_and_parse(&json!(["created_at desc", "name asc"])).unwrap();
        assert_eq!(from_string, from_array);
        assert_eq!(from_string[0].sort, SortDirection::Desc);

        let from_object = FilterOrder::validate_and_parse(&json!({"name": "desc"})).unwrap();
        assert_eq!(from_object, vec![FilterOrderInfo { column: "name".into(), sort: SortDirection::Desc }]);
    }

    #[test]
    fn rejects_unknown_direction() {
        assert!(FilterOrder::validate_and_parse(&json!("name sideways")).is_err());
    }
}
