use crate::access::{JoinKind, Predicate};

use super::error::FilterError;
use super::filter_order::FilterOrder;
use super::filter_where::FilterWhere;
use super::types::{FilterData, JoinSpec, QueryOptions, SqlResult};

pub struct Filter {
    table_name: String,
    predicate: Predicate,
    joins: Vec<JoinSpec>,
    options: QueryOptions,
    max_limit: Option<i64>,
}

impl Filter {
    pub fn new(table_name: impl Into<String>) -> Result<Self, FilterError> {
        let table_name = table_name.into();
        Self::validate_name(&table_name).map_err(FilterError::InvalidTableName)?;
        Ok(Self {
            table_name,
            predicate: Predicate::all(),
            joins: vec![],
            options: QueryOptions::default(),
            max_limit: crate::config::CONFIG.filter.max_limit,
        })
    }

    /// Split request data into the caller's base predicate and the query options
    pub fn parse(data: FilterData, max_depth: u32) -> Result<(Predicate, QueryOptions), FilterError> {
        let predicate = match &data.where_clause {
            Some(where_data) => FilterWhere::parse(where_data, max_depth)?,
            None => Predicate::all(),
        };

        let select = data.select.unwrap_or_default();
        Self::validate_select_columns(&select)?;
        let order = match &data.order {
            Some(order) => FilterOrder::validate_and_parse(order)?,
            None => vec![],
        };
        for info in &order {
            Self::validate_name(&info.column).map_err(FilterError::InvalidColumn)?;
        }
        if let Some(limit) = data.limit {
            if limit < 0 { return Err(FilterError::InvalidLimit("Limit must be non-negative".to_string())); }
        }
        if let Some(offset) = data.offset {
            if offset < 0 { return Err(FilterError::InvalidOffset("Offset must be non-negative".to_string())); }
        }

        Ok((predicate, QueryOptions { select, order, limit: data.limit, offset: data.offset }))
    }

    pub fn max_limit(&mut self, max_limit: Option<i64>) -> &mut Self {
        self.max_limit = max_limit;
        self
    }

    pub fn options(&mut self, options: QueryOptions) -> Result<&mut Self, FilterError> {
        Self::validate_select_columns(&options.select)?;
        self.options = options;
        Ok(self)
    }

    pub fn predicate(&mut self, predicate: Predicate) -> &mut Self {
        self.predicate = predicate;
        self
    }

    pub fn join(&mut self, join: JoinSpec) -> Result<&mut Self, FilterError> {
        for name in [&join.table, &join.alias, &join.local_column, &join.foreign_column] {
            Self::validate_name(name).map_err(FilterError::InvalidColumn)?;
        }
        if !self.joins.iter().any(|j| j.alias == join.alias) {
            self.joins.push(join);
        }
        Ok(self)
    }

    /// Limit actually applied after capping to the configured maximum
    pub fn effective_limit(&self) -> Option<i64> {
        match (self.options.limit, self.max_limit) {
            (Some(limit), Some(max)) if limit > max => {
                if crate::config::CONFIG.filter.debug_logging {
                    tracing::warn!("Limit {} exceeds max {}, capping to max", limit, max);
                }
                Some(max)
            }
            (None, Some(max)) => Some(max),
            (limit, _) => limit,
        }
    }

    pub fn to_sql(&self) -> Result<SqlResult, FilterError> {
        let (where_clause, params) = FilterWhere::generate(&self.predicate, &self.table_name, 0)?;

        let query = [
            format!("SELECT {}", self.build_select_clause()),
            format!("FROM \"{}\"", self.table_name),
            self.build_join_clause(),
            format!("WHERE {}", where_clause),
            FilterOrder::generate(&self.table_name, &self.options.order),
            self.build_limit_clause(),
        ].into_iter().filter(|s| !s.is_empty()).collect::<Vec<_>>().join(" ");

        Ok(SqlResult { query, params })
    }

    fn validate_name(name: &str) -> Result<(), String> {
        let mut chars = name.chars();
        let valid = matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
            && chars.all(|c| c.is_alphanumeric() || c == '_');
        if valid { Ok(()) } else { Err(format!("Invalid name format: {}", name)) }
    }

    fn validate_select_columns(columns: &[String]) -> Result<(), FilterError> {
        for column in columns {
            if column == "*" { continue; }
            Self::validate_name(column).map_err(FilterError::InvalidColumn)?;
        }
        Ok(())
    }

    fn build_select_clause(&self) -> String {
        let select = &self.options.select;
        if select.is_empty() || select.iter().any(|c| c == "*") {
            format!("\"{}\".*", self.table_name)
        } else {
            select.iter().map(|c| format!("\"{}\".\"{}\"", self.table_name, c)).collect::<Vec<_>>().join(", ")
        }
    }

    fn build_join_clause(&self) -> String {
        self.joins
            .iter()
            .map(|j| {
                let kind = match j.kind {
                    JoinKind::Inner => "INNER JOIN",
                    JoinKind::Left => "LEFT JOIN",
                };
                format!(
                    "{} \"{}\" AS \"{}\" ON \"{}\".\"{}\" = \"{}\".\"{}\"",
                    kind, j.table, j.alias, j.alias, j.foreign_column, self.table_name, j.local_column
                )
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn build_limit_clause(&self) -> String {
        match (self.effective_limit(), self.options.offset) {
            (Some(l), Some(o)) => format!("LIMIT {} OFFSET {}", l, o),
            (Some(l), None) => format!("LIMIT {}", l),
            (None, Some(o)) => format!("OFFSET {}", o),
            (None, None) => String::new(),
        }
    }
}
