use axum::extract::State;
use axum::Json;

use crate::app_state::AppState;
use crate::models::request::{StrategyInfo, TemplateInfo};
use crate::services::templates;

/// GET /api/v1/models: registered matcher strategies.
pub async fn list_models(State(state): State<AppState>) -> Json<Vec<StrategyInfo>> {
    Json(state.orchestrator.strategies())
}

/// GET /api/v1/chord-templates: the template library in canonical order.
pub async fn list_chord_templates() -> Json<Vec<TemplateInfo>> {
    let templates = templates::library()
        .templates()
        .iter()
        .map(|t| TemplateInfo {
            symbol: t.symbol(),
            root: t.root.name().to_string(),
            quality: t.quality.to_string(),
            extensions: t.extensions.iter().map(|e| e.to_string()).collect(),
        })
        .collect();
    Json(templates)
}
