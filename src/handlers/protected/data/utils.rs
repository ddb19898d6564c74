use serde_json::{Map, Value};

use crate::access::{Caller, CallSite, Predicate, RecordShape};
use crate::app::AppState;
use crate::database::RecordQuery;
use crate::error::ApiError;
use crate::filter::{Filter, FilterData, QueryOptions};

/// Parse request filter data and check every referenced column against the
/// record type behind the resource.
pub fn parse_filter(
    state: &AppState,
    shape: &RecordShape,
    filter_data: FilterData,
) -> Result<(Predicate, QueryOptions), ApiError> {
    let (base, options) = Filter::parse(filter_data, state.max_nested_depth)?;

    let unknown = base
        .comparisons()
        .into_iter()
        .map(|cmp| cmp.path.as_str())
        .chain(options.select.iter().map(String::as_str).filter(|c| *c != "*"))
        .chain(options.order.iter().map(|o| o.column.as_str()))
        .find(|column| !shape.has_field(column));
    if let Some(column) = unknown {
        return Err(ApiError::bad_request(format!("Unknown field '{}' on {}", column, shape.name)));
    }

    Ok((base, options))
}

/// Build the restricted query for one call site
pub fn restricted_query(
    state: &AppState,
    site: &CallSite,
    caller: &Caller,
    filter_data: FilterData,
) -> Result<RecordQuery, ApiError> {
    let registry = state.resolver.registry();
    let shape = registry.record_for(&site.resource)?;
    let (base, options) = parse_filter(state, shape, filter_data)?;

    let predicate = state.resolver.resolve_for(site, caller, base)?;
    Ok(RecordQuery::new(registry, shape, predicate, options)?)
}

/// Add the owner column to an explicit projection so the per-row owner
/// check can read it. Returns the columns the caller did not ask for.
fn with_owner_column(shape: &RecordShape, options: &mut QueryOptions) -> Vec<String> {
    let projected = !options.select.is_empty() && !options.select.iter().any(|c| c == "*");
    match &shape.owner {
        Some(owner) if projected && !shape.field_access.is_empty() && !options.select.contains(&owner.field) => {
            options.select.push(owner.field.clone());
            vec![owner.field.clone()]
        }
        _ => Vec::new(),
    }
}

/// Run a find through the access layer: restrict, execute, then strip the
/// fields the caller may not see.
pub async fn find_records(
    state: &AppState,
    site: &CallSite,
    caller: &Caller,
    filter_data: FilterData,
) -> Result<Vec<Map<String, Value>>, ApiError> {
    let shape = state.resolver.registry().record_for(&site.resource)?;
    let mut query = restricted_query(state, site, caller, filter_data)?;
    let added = with_owner_column(shape, &mut query.options);
    let rows = state.store.find(&query).await?;

    rows.into_iter()
        .map(|row| -> Result<Map<String, Value>, ApiError> {
            let mut row = state.resolver.filter_record(&site.resource, row, caller)?;
            for column in &added {
                row.remove(column);
            }
            Ok(row)
        })
        .collect()
}
