use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde_json::{Map, Value, json};
use tower_http::cors::CorsLayer;

use lib_common::{MetricsSnapshot, MqttAmbassador, QoS};

/// Value of the `service` field in the health report.
const SERVICE_NAME: &str = "mqtt_ambassador";

pub fn router(ambassador: MqttAmbassador) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(get_metrics))
        .route("/publish/{*topic}", post(publish_message))
        .layer(CorsLayer::permissive())
        .with_state(ambassador)
}

async fn health_check(State(ambassador): State<MqttAmbassador>) -> Json<Value> {
    let metrics = ambassador.metrics();
    let status = if metrics.is_healthy() { "healthy" } else { "unhealthy" };
    Json(json!({
        "status": status,
        "service": SERVICE_NAME,
        "metrics": metrics,
    }))
}

async fn get_metrics(State(ambassador): State<MqttAmbassador>) -> Json<MetricsSnapshot> {
    Json(ambassador.metrics())
}

/// Publishes the JSON object body on `topic` through the ambassador.
async fn publish_message(
    State(ambassador): State<MqttAmbassador>,
    Path(topic): Path<String>,
    Json(payload): Json<Map<String, Value>>,
) -> Json<Value> {
    let body = Value::Object(payload).to_string();
    let published = ambassador.publish(&topic, body.as_bytes(), QoS::AtMostOnce).await;
    Json(json!({ "published": published, "topic": topic }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use lib_common::{AmbassadorSettings, MemoryTransport};
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn publish(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_follows_successful_connections() {
        let transport = Arc::new(MemoryTransport::new());
        let settings = AmbassadorSettings {
            event_log_path: None,
            ..AmbassadorSettings::default()
        };
        let ambassador = MqttAmbassador::new(&settings, transport.clone());

        let (_, body) = call(router(ambassador.clone()), get("/health")).await;
        assert_eq!(body["status"], "unhealthy");
        assert_eq!(body["service"], "mqtt_ambassador");
        assert_eq!(body["metrics"]["circuit_state"], "CLOSED");

        assert!(ambassador.connect().await);
        let (_, body) = call(router(ambassador.clone()), get("/health")).await;
        assert_eq!(body["status"], "healthy");
        ambassador.disconnect().await;
    }

    #[tokio::test]
    async fn publish_reports_the_outcome() {
        let transport = Arc::new(MemoryTransport::new());
        let settings = AmbassadorSettings {
            event_log_path: None,
            ..AmbassadorSettings::default()
        };
        let ambassador = MqttAmbassador::new(&settings, transport.clone());

        let (status, body) = call(
            router(ambassador.clone()),
            publish("/publish/alertas/general", r#"{"tipo":"sismo"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"published": false, "topic": "alertas/general"}));

        assert!(ambassador.connect().await);
        let (_, body) = call(
            router(ambassador.clone()),
            publish("/publish/alertas/general", r#"{"tipo":"sismo"}"#),
        )
        .await;
        assert_eq!(body["published"], true);
        assert_eq!(transport.published()[0].payload, br#"{"tipo":"sismo"}"#.to_vec());

        let (_, metrics) = call(router(ambassador.clone()), get("/metrics")).await;
        assert_eq!(metrics["messages_sent"], 1);
        ambassador.disconnect().await;
    }
}
