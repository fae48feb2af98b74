//! Thin HTTP surface over the matchup engine. Rendering, identity, and
//! persistence live elsewhere; this layer only parses query parameters and
//! maps the engine's error taxonomy onto status codes.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::engine::{MatchupEngine, MatchupError, MatchupRequest, MatchupResult};
use crate::models::Role;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<MatchupEngine>,
}

/// Create the API router
pub fn create_router(engine: Arc<MatchupEngine>) -> Router {
    let state = AppState { engine };

    Router::new()
        .route("/health", get(health_check))
        .route("/api/matchups", get(get_matchups))
        .route("/api/matchups/seasons", get(get_matchup_seasons))
        .with_state(state)
}

// ===== Route Handlers =====

/// Health check endpoint
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Full matchup: annotated timeline plus verified summary stats
async fn get_matchups(
    State(state): State<AppState>,
    Query(params): Query<MatchupQuery>,
) -> Result<Json<MatchupResult>, ApiError> {
    let req = MatchupRequest {
        player_id: params.player_id,
        opponent_id: params.opponent_id,
        role: params.role(),
        seasons: params.season_list(),
    };
    let result = state.engine.compute_matchup(&req).await?;
    Ok(Json(result))
}

/// Seasons with matchup data for the pairing
async fn get_matchup_seasons(
    State(state): State<AppState>,
    Query(params): Query<SeasonsQuery>,
) -> Result<Json<SeasonsResponse>, ApiError> {
    let seasons = state
        .engine
        .available_seasons(params.player_id, params.opponent_id, params.role())
        .await?;
    Ok(Json(SeasonsResponse { seasons }))
}

// ===== Request/Response Types =====

#[derive(Deserialize)]
struct MatchupQuery {
    player_id: u64,
    opponent_id: u64,
    role: Option<String>,
    /// Comma-separated years, e.g. "2023,2024"
    seasons: Option<String>,
}

impl MatchupQuery {
    fn role(&self) -> Role {
        self.role.as_deref().map(Role::parse).unwrap_or(Role::Batter)
    }

    fn season_list(&self) -> Vec<i32> {
        self.seasons
            .as_deref()
            .unwrap_or("")
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect()
    }
}

#[derive(Deserialize)]
struct SeasonsQuery {
    player_id: u64,
    opponent_id: u64,
    role: Option<String>,
}

impl SeasonsQuery {
    fn role(&self) -> Role {
        self.role.as_deref().map(Role::parse).unwrap_or(Role::Batter)
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct SeasonsResponse {
    seasons: Vec<i32>,
}

// ===== Error Handling =====

#[derive(Debug)]
struct ApiError(MatchupError);

impl From<MatchupError> for ApiError {
    fn from(err: MatchupError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            MatchupError::DatasetTooLarge { .. } | MatchupError::InvalidRequest(_) => {
                (StatusCode::BAD_REQUEST, self.0.to_string())
            }
            MatchupError::NoDataFound { .. } => (StatusCode::NOT_FOUND, self.0.to_string()),
            MatchupError::Fetch(err) => {
                tracing::error!("Upstream fetch error: {}", err);
                (StatusCode::BAD_GATEWAY, self.0.to_string())
            }
        };

        let body = Json(json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_season_list_parsing() {
        let query = MatchupQuery {
            player_id: 1,
            opponent_id: 2,
            role: Some("pitcher".to_string()),
            seasons: Some("2023, 2024,bogus".to_string()),
        };
        assert_eq!(query.season_list(), vec![2023, 2024]);
        assert_eq!(query.role(), Role::Pitcher);

        let empty = MatchupQuery {
            player_id: 1,
            opponent_id: 2,
            role: None,
            seasons: None,
        };
        assert!(empty.season_list().is_empty());
        assert_eq!(empty.role(), Role::Batter);
    }

    #[test]
    fn test_error_status_mapping() {
        let err: ApiError = MatchupError::NoDataFound {
            detail: "nothing".to_string(),
        }
        .into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let err: ApiError = MatchupError::DatasetTooLarge {
            rows: 300_001,
            max_rows: 300_000,
        }
        .into();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
