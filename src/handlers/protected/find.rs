use axum::extract::{Extension, Path, State};
use axum::Json;
use serde_json::{Map, Value};

use crate::access::{Caller, CallSite};
use crate::app::AppState;
use crate::filter::FilterData;
use crate::middleware::{ApiResponse, ApiResult};

use super::data::utils;

/// POST /api/find/:resource - filtered find, restricted for the caller
pub async fn find_post(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    Extension(caller): Extension<Caller>,
    Json(filter_data): Json<FilterData>,
) -> ApiResult<Vec<Map<String, Value>>> {
    let site = CallSite::new(resource, "find");
    let records = utils::find_records(&state, &site, &caller, filter_data).await?;
    Ok(ApiResponse::success(records))
}
