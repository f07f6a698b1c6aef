use axum::{extract::Path, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use service::FlashMap;

use crate::errors::ApiError;
use crate::middleware::Flash;

#[derive(Debug, Deserialize)]
pub struct QueueInput {
    pub message: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Debug, Serialize)]
pub struct MessageOutput {
    pub category: String,
    pub message: String,
    pub partial: bool,
}

#[derive(Debug, Serialize)]
pub struct AllOutput {
    pub messages: FlashMap,
    pub partial: bool,
}

pub async fn queue(
    flash: Flash,
    Path(category): Path<String>,
    Json(input): Json<QueueInput>,
) -> Result<StatusCode, ApiError> {
    flash.queue_fmt(&category, &input.message, &input.args).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn read(flash: Flash, Path(category): Path<String>) -> Result<Json<MessageOutput>, ApiError> {
    let message = flash.read(&category).await?;
    Ok(Json(MessageOutput { category, message, partial: false }))
}

pub async fn read_all(flash: Flash) -> Result<Json<AllOutput>, ApiError> {
    let messages = flash.read_all().await?;
    Ok(Json(AllOutput { messages, partial: false }))
}
