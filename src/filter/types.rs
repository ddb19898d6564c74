use serde::{Deserialize, Serialize};

use crate::access::JoinKind;

/// Request body of a find: everything is optional
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterData {
    pub select: Option<Vec<String>>,
    #[serde(rename = "where", alias = "where_clause")]
    pub where_clause: Option<serde_json::Value>,
    pub order: Option<serde_json::Value>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Validated select / order / paging options of a query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    pub select: Vec<String>,
    pub order: Vec<FilterOrderInfo>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn to_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterOrderInfo {
    pub column: String,
    pub sort: SortDirection,
}

/// A join resolved to concrete tables and columns
#[derive(Debug, Clone, PartialEq)]
pub struct JoinSpec {
    pub kind: JoinKind,
    pub table: String,
    pub alias: String,
    pub local_column: String,
    pub foreign_column: String,
}

#[derive(Debug, Clone)]
pub struct SqlResult {
    pub query: String,
    /// Positional parameters, bound as text and cast in the query
    pub params: Vec<String>,
}
