//! One-shot dictionary lookup.

use axum::Json;
use axum::extract::State;
use serde_json::Value;

use jimaku_pipeline::dictionary::DictionaryQuery;

use crate::error::HttpError;
use crate::state::AppState;

/// `POST /api/v1/subtitle/dictionary/query` - stateless LLM lookup for
/// a token. Degraded lookups still answer 200 with an `error` field.
pub async fn query(
    State(state): State<AppState>,
    Json(request): Json<DictionaryQuery>,
) -> Result<Json<Value>, HttpError> {
    if request.word.trim().is_empty() {
        return Err(HttpError::BadRequest("word must not be empty".to_string()));
    }

    tracing::info!(word = %request.word, "dictionary query");
    let result = state.dictionary.query(&request).await;
    Ok(Json(result))
}
