use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::{middleware::auth::AuthenticatedOperator, AppState};
use crate::error::{AppError, Result};
use crate::models::{
    AuditEntry, AuditFilter, CodeStatus, OperationType, Outcome, Page, Pagination, Principal,
};
use crate::services::code_minter::parse_code;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub message: &'static str,
    pub code: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub message: &'static str,
    pub status: CodeStatus,
}

#[derive(Debug, Deserialize)]
pub struct DeactivateRequest {
    pub code: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeactivateResponse {
    pub message: &'static str,
    pub code: String,
    pub deactivated_at: DateTime<Utc>,
    pub deactivated_by: Principal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deactivation_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaginationParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct LogsParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub operation: Option<OperationType>,
    pub outcome: Option<Outcome>,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub logs: Vec<AuditEntry>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
pub struct DeactivationsResponse {
    pub deactivations: Vec<CodeStatus>,
    pub pagination: Pagination,
}

/// Mints a new promo code
async fn generate(State(state): State<AppState>) -> Result<(StatusCode, Json<GenerateResponse>)> {
    let promo = state.lifecycle.generate().await?;

    Ok((
        StatusCode::CREATED,
        Json(GenerateResponse {
            message: "Promo code generated successfully",
            code: promo.code,
            created_at: promo.created_at,
        }),
    ))
}

async fn status(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<StatusResponse>> {
    let status = state.lifecycle.status(&code).await?;

    Ok(Json(StatusResponse {
        message: "Promo code status retrieved successfully",
        status,
    }))
}

/// Retires a code on behalf of the calling cashier
async fn deactivate(
    State(state): State<AppState>,
    AuthenticatedOperator(principal): AuthenticatedOperator,
    payload: std::result::Result<Json<DeactivateRequest>, JsonRejection>,
) -> Result<Json<DeactivateResponse>> {
    let Json(request) = payload.map_err(|e| AppError::Validation(e.body_text()))?;

    let stamp = state
        .lifecycle
        .deactivate(&request.code, &principal, request.reason.as_deref())
        .await?;

    Ok(Json(DeactivateResponse {
        message: "Promo code deactivated successfully",
        code: parse_code(&request.code).unwrap_or(request.code),
        deactivated_at: stamp.deactivated_at,
        deactivated_by: stamp.deactivated_by,
        deactivation_reason: stamp.deactivation_reason,
    }))
}

async fn logs(
    State(state): State<AppState>,
    params: std::result::Result<Query<LogsParams>, QueryRejection>,
) -> Result<Json<LogsResponse>> {
    let Query(params) = params.map_err(|e| AppError::Validation(e.body_text()))?;

    let filter = AuditFilter {
        operation: params.operation,
        outcome: params.outcome,
    };
    let (logs, pagination) = state
        .lifecycle
        .audit_log(filter, Page::new(params.page, params.limit))
        .await?;

    Ok(Json(LogsResponse { logs, pagination }))
}

async fn deactivations(
    State(state): State<AppState>,
    params: std::result::Result<Query<PaginationParams>, QueryRejection>,
) -> Result<Json<DeactivationsResponse>> {
    let Query(params) = params.map_err(|e| AppError::Validation(e.body_text()))?;

    let (deactivations, pagination) = state
        .lifecycle
        .deactivation_history(Page::new(params.page, params.limit))
        .await?;

    Ok(Json(DeactivationsResponse {
        deactivations,
        pagination,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/promo/generate", post(generate))
        .route("/api/promo/status/:code", get(status))
        .route("/api/promo/deactivate", post(deactivate))
        .route("/api/promo/logs", get(logs))
        .route("/api/promo/deactivations", get(deactivations))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{
        middleware::auth::{HEADER_OPERATOR_ID, HEADER_OPERATOR_USERNAME},
        router as app_router,
    };
    use crate::db::memory::{InMemoryAuditLog, InMemoryLedgerStore};
    use crate::services::LifecycleService;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request},
        Router,
    };
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        let lifecycle = LifecycleService::new(
            Arc::new(InMemoryLedgerStore::new()),
            Arc::new(InMemoryAuditLog::new()),
        );
        app_router(AppState::new(lifecycle))
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn generate_request() -> Request<Body> {
        Request::post("/api/promo/generate")
            .body(Body::empty())
            .unwrap()
    }

    fn status_request(code: &str) -> Request<Body> {
        Request::get(format!("/api/promo/status/{code}"))
            .body(Body::empty())
            .unwrap()
    }

    fn deactivate_request(operator: &str, body: Value) -> Request<Body> {
        Request::post("/api/promo/deactivate")
            .header(header::CONTENT_TYPE, "application/json")
            .header(HEADER_OPERATOR_ID, operator)
            .header(HEADER_OPERATOR_USERNAME, format!("{operator}-name"))
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_full_lifecycle_over_http() {
        let app = app();

        let (status, body) = send(&app, generate_request()).await;
        assert_eq!(status, StatusCode::CREATED);
        let code = body["code"].as_str().unwrap().to_string();

        let (status, body) = send(&app, status_request(&code)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"]["code"], code.as_str());
        assert_eq!(body["status"]["isActive"], true);

        let (status, body) = send(
            &app,
            deactivate_request("P1", json!({ "code": code, "reason": "refund" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deactivatedBy"]["id"], "P1");

        let (status, body) = send(&app, status_request(&code)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"]["isActive"], false);
        assert_eq!(body["status"]["deactivatedBy"]["id"], "P1");
        assert_eq!(body["status"]["deactivationReason"], "refund");

        let (status, body) = send(&app, deactivate_request("P2", json!({ "code": code }))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "already_deactivated");
        assert_eq!(body["deactivatedBy"]["id"], "P1");
    }

    #[tokio::test]
    async fn test_unknown_code_is_404() {
        let (status, body) = send(&app(), status_request("does-not-exist")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn test_deactivate_unknown_code_is_404() {
        let (status, _) = send(
            &app(),
            deactivate_request("P1", json!({ "code": "67e55044-10b1-426f-9247-bb680e5fe0c8" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_deactivate_requires_operator_headers() {
        let request = Request::post("/api/promo/deactivate")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "code": "x" }).to_string()))
            .unwrap();

        let (status, body) = send(&app(), request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorized");
    }

    #[tokio::test]
    async fn test_deactivate_rejects_bad_payloads() {
        let app = app();

        let (status, body) = send(&app, deactivate_request("P1", json!({ "reason": "x" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation");

        let (status, body) =
            send(&app, deactivate_request("P1", json!({ "code": "SUMMER2024" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_code");
    }

    #[tokio::test]
    async fn test_empty_code_is_rejected_and_audited() {
        let app = app();

        let (status, body) = send(&app, deactivate_request("P1", json!({ "code": "  " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_code");

        let (_, body) = send(
            &app,
            Request::get("/api/promo/logs?operation=deactivate")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(body["pagination"]["total"], 1);
        assert_eq!(body["logs"][0]["outcome"], "failure");
    }

    #[tokio::test]
    async fn test_huge_page_number_is_clamped() {
        let app = app();

        for path in [
            "/api/promo/logs?page=9223372036854775807",
            "/api/promo/deactivations?page=9223372036854775807",
        ] {
            let (status, body) =
                send(&app, Request::get(path).body(Body::empty()).unwrap()).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["pagination"]["total"], 0);
        }
    }

    #[tokio::test]
    async fn test_logs_and_deactivations_are_paginated() {
        let app = app();
        let (_, body) = send(&app, generate_request()).await;
        let code = body["code"].as_str().unwrap().to_string();
        send(&app, deactivate_request("P1", json!({ "code": code }))).await;
        send(&app, status_request("does-not-exist")).await;

        let (status, body) = send(
            &app,
            Request::get("/api/promo/logs?outcome=failure&limit=10")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pagination"]["total"], 1);
        assert_eq!(body["logs"][0]["operationType"], "status_query");

        let (status, body) = send(
            &app,
            Request::get("/api/promo/deactivations")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deactivations"][0]["code"], code.as_str());
        assert_eq!(body["pagination"]["limit"], 50);
    }

    #[tokio::test]
    async fn test_logs_reject_unknown_filter() {
        let (status, _) = send(
            &app(),
            Request::get("/api/promo/logs?operation=refund")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_reports_ledger() {
        let (status, body) = send(
            &app(),
            Request::get("/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["dependencies"]["ledger"]["status"], "healthy");
    }
}
