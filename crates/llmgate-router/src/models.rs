use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use llmgate_catalog::ModelRecord;

use crate::{ApiError, GatewayState};

#[derive(Debug, Deserialize)]
pub struct ModelsQuery {
    pub gateway: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ModelsListBody {
    pub data: Vec<ModelRecord>,
    pub total: usize,
    pub returned: usize,
}

pub async fn models_list(
    State(state): State<GatewayState>,
    Query(query): Query<ModelsQuery>,
) -> Response {
    let gateway = query.gateway.as_deref().unwrap_or("all");
    match state.engine.models(gateway).await {
        Ok(data) => {
            let total = data.len();
            Json(ModelsListBody { returned: total, total, data }).into_response()
        }
        Err(err) => ApiError(err).into_response(),
    }
}

/// `/catalog/model/{gateway}/{*model}`. The wildcard keeps literal
/// slashes in model ids; URL-encoded ids resolve to the same record.
pub async fn model_get(
    State(state): State<GatewayState>,
    Path((gateway, model)): Path<(String, String)>,
) -> Response {
    let decoded = urlencoding::decode(&model)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| model.clone());
    match state.engine.find_model(&gateway, &decoded).await {
        Ok(record) => Json(record).into_response(),
        Err(err) => ApiError(err).into_response(),
    }
}
