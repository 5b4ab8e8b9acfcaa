use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;

use crate::relay_logic::downstream::ws_handler;
use crate::relay_logic::error::AppError;
use crate::relay_logic::state::AppState;
use lib_common::pipeline::list_alerts;
use lib_common::{AlertFilter, SortOrder, StoredAlert};

/// Largest page `/alertas` hands out.
const MAX_LIMIT: i64 = 100;

/// Query string of `GET /alertas`.
#[derive(Debug, Default, Deserialize)]
pub struct AlertQuery {
    pub region: Option<String>,
    pub tipo: Option<String>,
    pub mensaje: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub order: Option<String>,
}

impl AlertQuery {
    fn into_filter(self) -> Result<AlertFilter, AppError> {
        if let Some(limit) = self.limit {
            if !(1..=MAX_LIMIT).contains(&limit) {
                return Err(AppError::Invalid(format!("limit debe estar entre 1 y {MAX_LIMIT}.")));
            }
        }
        if let Some(offset) = self.offset {
            if offset < 0 {
                return Err(AppError::Invalid("offset no puede ser negativo.".to_string()));
            }
        }
        Ok(AlertFilter {
            region: self.region,
            tipo: self.tipo,
            mensaje: self.mensaje,
            limit: self.limit,
            offset: self.offset,
            order: self.order.as_deref().map(SortOrder::parse).unwrap_or_default(),
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/alertas", get(get_alertas))
        .route("/alertas/region/{region}", get(get_alertas_por_region))
        .route("/alertas/tipo/{tipo}", get(get_alertas_por_tipo))
        .route("/instancia", get(get_instancia))
        .route("/quien-soy", get(quien_soy))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn query_or_not_found(state: &AppState, filter: AlertFilter, detail: String) -> Result<Json<Vec<StoredAlert>>, AppError> {
    let alerts = list_alerts(state.store.as_ref(), &filter).await?;
    if alerts.is_empty() {
        return Err(AppError::NotFound(detail));
    }
    Ok(Json(alerts))
}

async fn get_alertas(State(state): State<AppState>, Query(query): Query<AlertQuery>) -> Result<Json<Vec<StoredAlert>>, AppError> {
    let filter = query.into_filter()?;
    query_or_not_found(&state, filter, "No se encontraron alertas con los filtros dados.".to_string()).await
}

async fn get_alertas_por_region(State(state): State<AppState>, Path(region): Path<String>) -> Result<Json<Vec<StoredAlert>>, AppError> {
    let detail = format!("No se encontraron alertas para la región: {region}");
    query_or_not_found(&state, AlertFilter::by_region(region), detail).await
}

async fn get_alertas_por_tipo(State(state): State<AppState>, Path(tipo): Path<String>) -> Result<Json<Vec<StoredAlert>>, AppError> {
    let detail = format!("No se encontraron alertas del tipo: {tipo}");
    query_or_not_found(&state, AlertFilter::by_tipo(tipo), detail).await
}

async fn get_instancia(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "instancia": state.instance }))
}

async fn quien_soy(State(state): State<AppState>) -> Json<Value> {
    let servidor = state.backend_name.as_deref().unwrap_or("Desconocido");
    Json(json!({ "servidor": servidor }))
}
