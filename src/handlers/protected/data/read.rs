use axum::extract::{Extension, Path, State};
use serde_json::{json, Map, Value};

use crate::access::{Caller, CallSite};
use crate::app::AppState;
use crate::error::ApiError;
use crate::filter::FilterData;
use crate::middleware::{ApiResponse, ApiResult};

use super::utils;

/// GET /api/data/:resource/:id - one record, 404 when absent or restricted away
pub async fn read(
    State(state): State<AppState>,
    Path((resource, id)): Path<(String, String)>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<Map<String, Value>> {
    let filter_data = FilterData {
        where_clause: Some(json!({ "id": id.as_str() })),
        limit: Some(1),
        ..Default::default()
    };

    let site = CallSite::new(resource, "read");
    let record = utils::find_records(&state, &site, &caller, filter_data)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::not_found(format!("Record '{}' not found in {}", id, site.resource)))?;

    Ok(ApiResponse::success(record))
}
