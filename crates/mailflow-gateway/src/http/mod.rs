pub mod auth_routes;
pub mod emails;
pub mod kb;
pub mod misc;
pub mod monitor;

use axum::Json;

/// Uniform success envelope.
pub fn ok(data: serde_json::Value) -> Json<serde_json::Value> {
    let mut body = serde_json::Map::new();
    body.insert("success".to_string(), serde_json::Value::Bool(true));
    if let serde_json::Value::Object(map) = data {
        body.extend(map);
    } else if !data.is_null() {
        body.insert("data".to_string(), data);
    }
    Json(serde_json::Value::Object(body))
}
