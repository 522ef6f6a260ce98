//! JSON HTTP surface over the review engine.
//!
//! The caller's identity comes from the `X-User` header, set by the
//! authenticating proxy in front of this service. Admin routes require
//! `X-Api-Key`.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::auth::Capability;
use crate::engine::ReviewEngine;
use crate::error::ReviewError;
use crate::lock::MAX_LOCK_TTL_SECS;
use crate::metrics::MetricsReport;
use crate::model::{
    AcceptedTranslation, Lock, SubmitResult, SuggestionId, UnitKey, UnitSnapshot, VotePolarity,
    VoteResult,
};
use crate::retry::RetryConfig;
use crate::security::api_key_matches;

const USER_HEADER: &str = "x-user";
const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ReviewEngine>,
    pub api_key: Option<String>,
}

pub fn router(state: AppState) -> Router {
    let unit = "/units/:project/:component/:language/:string_id";

    Router::new()
        .route("/health", get(health))
        .route(unit, get(get_unit))
        .route(&format!("{unit}/suggestions"), post(add_suggestion))
        .route(&format!("{unit}/translation"), post(save_translation))
        .route(
            &format!("{unit}/lock"),
            post(acquire_lock).put(renew_lock).delete(release_lock),
        )
        .route(&format!("{unit}/edit"), post(begin_edit))
        .route(&format!("{unit}/heartbeat"), post(heartbeat))
        .route("/suggestions/:id", delete(withdraw_suggestion))
        .route("/suggestions/:id/votes", post(cast_vote))
        .route("/suggestions/:id/accept", post(accept_suggestion))
        .route("/admin/stats", get(stats))
        .route("/admin/sweep", post(sweep))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ==================== Errors ====================

#[derive(Debug)]
pub enum ApiError {
    Review(ReviewError),
    MissingUser,
    Unauthorized,
}

impl From<ReviewError> for ApiError {
    fn from(e: ReviewError) -> Self {
        Self::Review(e)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    holder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    required: Option<Capability>,
}

fn status_for(e: &ReviewError) -> StatusCode {
    match e {
        ReviewError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
        ReviewError::NotFound { .. } => StatusCode::NOT_FOUND,
        ReviewError::DuplicateSuggestion { .. }
        | ReviewError::DuplicateVote { .. }
        | ReviewError::NotLocked { .. } => StatusCode::CONFLICT,
        ReviewError::LockHeld { .. } | ReviewError::LockHeldByOther { .. } => StatusCode::LOCKED,
        ReviewError::InvalidLockDuration { .. }
        | ReviewError::InvalidThreshold { .. }
        | ReviewError::InvalidConfiguration(_) => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::Review(e) => {
                let (holder, expires_at) = match &e {
                    ReviewError::LockHeld { holder, expires_at }
                    | ReviewError::LockHeldByOther { holder, expires_at } => {
                        (Some(holder.clone()), Some(*expires_at))
                    }
                    _ => (None, None),
                };
                let required = match &e {
                    ReviewError::PermissionDenied { required, .. } => Some(*required),
                    _ => None,
                };
                (
                    status_for(&e),
                    ErrorBody {
                        error: e.code(),
                        message: e.to_string(),
                        holder,
                        expires_at,
                        required,
                    },
                )
            }
            Self::MissingUser => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    error: "missing_user",
                    message: format!("the {} header is required", USER_HEADER),
                    holder: None,
                    expires_at: None,
                    required: None,
                },
            ),
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    error: "unauthorized",
                    message: "invalid or missing API key".to_string(),
                    holder: None,
                    expires_at: None,
                    required: None,
                },
            ),
        };
        (status, Json(body)).into_response()
    }
}

fn actor(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(ApiError::MissingUser)
}

fn require_api_key(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let provided = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
    if api_key_matches(state.api_key.as_deref(), provided) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

// ==================== Request Bodies ====================

#[derive(Debug, Deserialize)]
pub struct TextBody {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct VoteBody {
    pub polarity: VotePolarity,
}

#[derive(Debug, Default, Deserialize)]
pub struct LockBody {
    /// Lock lifetime; `LOCK_TIME` when absent
    pub ttl_secs: Option<u64>,
    /// Retry with backoff while someone else holds the lock
    #[serde(default)]
    pub wait: bool,
}

impl LockBody {
    /// Requested lifetime, `None` for the configured default.
    /// Values above [`MAX_LOCK_TTL_SECS`] are rejected.
    fn ttl(&self) -> Result<Option<Duration>, ReviewError> {
        match self.ttl_secs {
            None | Some(0) => Ok(None),
            Some(secs) => i64::try_from(secs)
                .ok()
                .filter(|secs| *secs <= MAX_LOCK_TTL_SECS)
                .and_then(Duration::try_seconds)
                .map(Some)
                .ok_or(ReviewError::InvalidLockDuration {
                    max_secs: MAX_LOCK_TTL_SECS,
                }),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SweepResponse {
    pub expired: usize,
}

// ==================== Handlers ====================

async fn health() -> &'static str {
    "OK"
}

async fn get_unit(State(state): State<AppState>, Path(unit): Path<UnitKey>) -> Json<UnitSnapshot> {
    Json(state.engine.unit_snapshot(&unit))
}

async fn add_suggestion(
    State(state): State<AppState>,
    Path(unit): Path<UnitKey>,
    headers: HeaderMap,
    Json(body): Json<TextBody>,
) -> Result<(StatusCode, Json<SubmitResult>), ApiError> {
    let user = actor(&headers)?;
    let result = state.engine.add_suggestion(&unit, &user, &body.text)?;
    Ok((StatusCode::CREATED, Json(result)))
}

async fn save_translation(
    State(state): State<AppState>,
    Path(unit): Path<UnitKey>,
    headers: HeaderMap,
    Json(body): Json<TextBody>,
) -> Result<Json<AcceptedTranslation>, ApiError> {
    let user = actor(&headers)?;
    Ok(Json(state.engine.save_translation(&unit, &user, &body.text)?))
}

async fn acquire_lock(
    State(state): State<AppState>,
    Path(unit): Path<UnitKey>,
    headers: HeaderMap,
    body: Option<Json<LockBody>>,
) -> Result<Json<Lock>, ApiError> {
    let user = actor(&headers)?;
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let ttl = body.ttl()?;

    let lock = if body.wait {
        state
            .engine
            .acquire_lock_waiting(&unit, &user, ttl, &RetryConfig::lock_wait())
            .await?
    } else {
        state.engine.acquire_lock(&unit, &user, ttl)?
    };
    Ok(Json(lock))
}

async fn renew_lock(
    State(state): State<AppState>,
    Path(unit): Path<UnitKey>,
    headers: HeaderMap,
    body: Option<Json<LockBody>>,
) -> Result<Json<Lock>, ApiError> {
    let user = actor(&headers)?;
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let ttl = body.ttl()?;
    Ok(Json(state.engine.renew_lock(&unit, &user, ttl)?))
}

async fn release_lock(
    State(state): State<AppState>,
    Path(unit): Path<UnitKey>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let user = actor(&headers)?;
    state.engine.release_lock(&unit, &user)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn begin_edit(
    State(state): State<AppState>,
    Path(unit): Path<UnitKey>,
    headers: HeaderMap,
) -> Result<Json<Option<Lock>>, ApiError> {
    let user = actor(&headers)?;
    Ok(Json(state.engine.begin_edit(&unit, &user)?))
}

async fn heartbeat(
    State(state): State<AppState>,
    Path(unit): Path<UnitKey>,
    headers: HeaderMap,
) -> Result<Json<Option<Lock>>, ApiError> {
    let user = actor(&headers)?;
    Ok(Json(state.engine.heartbeat(&unit, &user)?))
}

async fn cast_vote(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
    Json(body): Json<VoteBody>,
) -> Result<Json<VoteResult>, ApiError> {
    let user = actor(&headers)?;
    Ok(Json(
        state
            .engine
            .cast_vote(SuggestionId(id), &user, body.polarity)?,
    ))
}

async fn accept_suggestion(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> Result<Json<AcceptedTranslation>, ApiError> {
    let user = actor(&headers)?;
    Ok(Json(state.engine.accept_suggestion(SuggestionId(id), &user)?))
}

async fn withdraw_suggestion(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let user = actor(&headers)?;
    state.engine.withdraw_suggestion(SuggestionId(id), &user)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<MetricsReport>, ApiError> {
    require_api_key(&state, &headers)?;
    Ok(Json(state.engine.metrics().report()))
}

async fn sweep(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SweepResponse>, ApiError> {
    require_api_key(&state, &headers)?;
    Ok(Json(SweepResponse {
        expired: state.engine.sweep_expired_locks(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAuthorizer;
    use crate::components::{ComponentRegistry, ComponentVotingConfig};
    use crate::model::ComponentKey;
    use axum::http::HeaderValue;

    fn state(auto_accept: bool) -> AppState {
        let component = ComponentKey::new("demo", "ui");
        let registry = ComponentRegistry::new().with_component(
            component.clone(),
            ComponentVotingConfig::new(true, auto_accept, 2).unwrap(),
        );
        let auth = StaticAuthorizer::new()
            .with_grant(&component, "alice", Capability::Vote)
            .with_grant(&component, "bob", Capability::Vote)
            .with_grant(&component, "bob", Capability::SaveDirect);

        AppState {
            engine: Arc::new(ReviewEngine::new(registry, Arc::new(auth))),
            api_key: Some("test-api-key".to_string()),
        }
    }

    fn unit() -> UnitKey {
        UnitKey::new("demo", "ui", "de", "greeting")
    }

    fn as_user(user: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_HEADER, HeaderValue::from_str(user).unwrap());
        headers
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .expect("Should read body");
        serde_json::from_slice(&bytes).expect("Should be JSON")
    }

    // ==================== Error Mapping Tests ====================

    #[tokio::test]
    async fn test_lock_held_maps_to_423_with_holder() {
        let expires_at = Utc::now();
        let response = ApiError::from(ReviewError::LockHeld {
            holder: "alice".to_string(),
            expires_at,
        })
        .into_response();

        assert_eq!(response.status(), StatusCode::LOCKED);
        let body = body_json(response).await;
        assert_eq!(body["error"], "lock_held");
        assert_eq!(body["holder"], "alice");
        assert!(body.get("expires_at").is_some());
    }

    #[tokio::test]
    async fn test_permission_denied_maps_to_403_with_capability() {
        let response = ApiError::from(ReviewError::PermissionDenied {
            user: "bob".to_string(),
            required: Capability::OverrideSuggestionState,
            detail: "nope",
        })
        .into_response();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = body_json(response).await;
        assert_eq!(body["required"], "override_suggestion_state");
        assert!(body.get("holder").is_none());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&ReviewError::not_found("suggestion", 1)),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&ReviewError::NotLocked { unit: unit() }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&ReviewError::InvalidThreshold { threshold: 0 }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    // ==================== Identity Tests ====================

    #[test]
    fn test_actor_requires_header() {
        assert!(matches!(actor(&HeaderMap::new()), Err(ApiError::MissingUser)));
        assert!(matches!(actor(&as_user("  ")), Err(ApiError::MissingUser)));
        assert_eq!(actor(&as_user("alice")).unwrap(), "alice");
    }

    #[test]
    fn test_admin_requires_api_key() {
        let state = state(false);
        assert!(require_api_key(&state, &HeaderMap::new()).is_err());

        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("test-api-key"));
        assert!(require_api_key(&state, &headers).is_ok());
    }

    // ==================== Handler Tests ====================

    #[tokio::test]
    async fn test_suggest_vote_and_read_back() {
        let state = state(true);

        let (status, Json(submitted)) = add_suggestion(
            State(state.clone()),
            Path(unit()),
            as_user("alice"),
            Json(TextBody {
                text: "Hallo".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert!(!submitted.accepted);

        let Json(vote) = cast_vote(
            State(state.clone()),
            Path(submitted.id.0),
            as_user("bob"),
            Json(VoteBody {
                polarity: VotePolarity::For,
            }),
        )
        .await
        .unwrap();
        assert_eq!(vote.promoted, Some(submitted.id));

        let Json(snapshot) = get_unit(State(state), Path(unit())).await;
        assert_eq!(snapshot.accepted.unwrap().text, "Hallo");
    }

    #[tokio::test]
    async fn test_direct_save_denied_under_auto_accept() {
        let state = state(true);
        let err = save_translation(
            State(state),
            Path(unit()),
            as_user("bob"),
            Json(TextBody {
                text: "Servus".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_lock_conflict_over_http() {
        let state = state(false);

        let Json(lock) = acquire_lock(State(state.clone()), Path(unit()), as_user("alice"), None)
            .await
            .unwrap();
        assert_eq!(lock.holder, "alice");

        let err = acquire_lock(
            State(state.clone()),
            Path(unit()),
            as_user("bob"),
            Some(Json(LockBody {
                ttl_secs: Some(30),
                wait: false,
            })),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::LOCKED);

        let status = release_lock(State(state), Path(unit()), as_user("alice"))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[test]
    fn test_lock_body_ttl() {
        let body: LockBody = serde_json::from_str(r#"{"ttl_secs": 30}"#).unwrap();
        assert_eq!(body.ttl(), Ok(Some(Duration::seconds(30))));
        assert!(!body.wait);

        let zero = LockBody {
            ttl_secs: Some(0),
            wait: false,
        };
        assert_eq!(zero.ttl(), Ok(None));
    }

    #[tokio::test]
    async fn test_oversized_ttl_rejected_without_locking() {
        let state = state(false);

        for ttl_secs in [u64::MAX, 100_000_000_000_000, MAX_LOCK_TTL_SECS as u64 + 1] {
            let err = acquire_lock(
                State(state.clone()),
                Path(unit()),
                as_user("alice"),
                Some(Json(LockBody {
                    ttl_secs: Some(ttl_secs),
                    wait: false,
                })),
            )
            .await
            .unwrap_err();

            let response = err.into_response();
            assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
            assert_eq!(body_json(response).await["error"], "invalid_lock_duration");
        }

        // Nothing was locked, so another user gets the unit normally
        assert!(state.engine.lock_status(&unit()).is_none());
        let Json(lock) = acquire_lock(State(state), Path(unit()), as_user("bob"), None)
            .await
            .unwrap();
        assert_eq!(lock.holder, "bob");
    }

    #[tokio::test]
    async fn test_renew_with_oversized_ttl_keeps_lock() {
        let state = state(false);
        let Json(lock) = acquire_lock(State(state.clone()), Path(unit()), as_user("alice"), None)
            .await
            .unwrap();

        let err = renew_lock(
            State(state.clone()),
            Path(unit()),
            as_user("alice"),
            Some(Json(LockBody {
                ttl_secs: Some(u64::MAX),
                wait: false,
            })),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(state.engine.lock_status(&unit()), Some(lock));
    }
}
