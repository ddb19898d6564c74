use axum::extract::{Extension, Path, Query, State};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::access::{Caller, CallSite};
use crate::app::AppState;
use crate::filter::FilterData;
use crate::middleware::{ApiResponse, ApiResult};

use super::utils;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    /// Order spec, e.g. `order=name desc`
    pub order: Option<String>,
}

/// GET /api/data/:resource - list records visible to the caller
pub async fn list(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    Query(query): Query<ListQuery>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<Vec<Map<String, Value>>> {
    let filter_data = FilterData {
        order: query.order.map(Value::String),
        limit: query.limit,
        offset: query.offset,
        ..Default::default()
    };

    let site = CallSite::new(resource, "list");
    let records = utils::find_records(&state, &site, &caller, filter_data).await?;
    Ok(ApiResponse::success(records))
}
