use axum::Json;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "artifact_gov_server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
