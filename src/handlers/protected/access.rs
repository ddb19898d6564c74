use axum::extract::{Extension, Path, State};
use axum::Json;
use serde_json::{json, Value};

use crate::access::{Caller, CallSite};
use crate::app::AppState;
use crate::database::RecordQuery;
use crate::error::ApiError;
use crate::filter::FilterData;
use crate::middleware::{ApiResponse, ApiResult};

use super::data::utils;

/// POST /api/access/explain/:resource/:operation
///
/// Shows where the restriction for a call site came from, the effective
/// predicate and the SQL it renders to. Nothing is executed. Callers need
/// the configured explain right.
pub async fn explain(
    State(state): State<AppState>,
    Path((resource, operation)): Path<(String, String)>,
    Extension(caller): Extension<Caller>,
    Json(filter_data): Json<FilterData>,
) -> ApiResult<Value> {
    if let Some(right) = state.explain_right.as_deref() {
        if !caller.rights.contains(right) {
            return Err(ApiError::forbidden(format!("Explaining access requires the {} right", right)));
        }
    }

    let site = CallSite::new(resource, operation);
    let registry = state.resolver.registry();
    let shape = registry.record_for(&site.resource)?;
    let (base, options) = utils::parse_filter(&state, shape, filter_data)?;

    let explanation = state.resolver.explain(&site, &caller, base)?;
    let query = RecordQuery::new(registry, shape, explanation.predicate.clone(), options)?;
    let sql = query.to_sql()?;

    Ok(ApiResponse::success(json!({
        "explanation": explanation,
        "sql": sql.query,
        "params": sql.params,
    })))
}
