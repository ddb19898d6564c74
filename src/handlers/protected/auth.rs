use axum::extract::Extension;

use crate::access::Caller;
use crate::middleware::{ApiResponse, ApiResult};

/// GET /api/auth/whoami - the caller as seen by the access layer
pub async fn whoami(Extension(caller): Extension<Caller>) -> ApiResult<Caller> {
    Ok(ApiResponse::success(caller))
}
