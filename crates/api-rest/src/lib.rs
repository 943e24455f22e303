//! # API REST
//!
//! REST API for the care plan engine.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - Caller resolution, error mapping and CORS
//!
//! Staff endpoints require the `x-user-id` header (see `api_shared::auth`). Patient portal
//! endpoints are authorized by the access token in the path alone, and failures are counted per
//! client address.

#![warn(rust_2018_idioms)]

pub mod dto;
pub mod error;
mod handlers;
pub mod startup;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::routing::{get, post, put};
use axum::Router;
use careplan_core::scope::Actor;
use careplan_core::CareEngine;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::error::ApiError;
use handlers::*;

/// Application state shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<CareEngine>,
}

/// The resolved staff member making the request.
pub struct Caller(pub Actor);

#[axum::async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(api_shared::USER_ID_HEADER)
            .and_then(|v| v.to_str().ok());
        let actor = api_shared::resolve_caller(&state.engine, header)?;
        Ok(Caller(actor))
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        create_tenant,
        list_tenants,
        set_review_mode,
        tenant_audit,
        create_user,
        list_users,
        create_care_plan,
        list_care_plans,
        get_care_plan,
        delete_care_plan,
        process_care_plan,
        approve_care_plan,
        interpreter_approve,
        request_changes,
        send_care_plan,
        resend_care_plan,
        complete_care_plan,
        complete_due,
        care_plan_audit,
        care_plan_billing,
        list_check_ins,
        schedule_check_in,
        due_check_ins,
        open_alerts,
        resolve_alert,
        report_summary,
        report_csv,
        portal_view,
        portal_respond,
    ),
    components(schemas(
        api_shared::HealthRes,
        error::ErrorBody,
        error::ErrorDetail,
        dto::CreateTenantReq,
        dto::ReviewModeReq,
        dto::CreateUserReq,
        dto::CreateCarePlanReq,
        dto::ProcessReq,
        dto::ApproveReq,
        dto::InterpreterApproveReq,
        dto::RequestChangesReq,
        dto::SendReq,
        dto::ScheduleCheckInReq,
        dto::CheckInAnswerReq,
    ))
)]
pub struct ApiDoc;

/// Build the full router, including Swagger UI at `/swagger-ui`.
pub fn router(engine: Arc<CareEngine>) -> Router {
    let state = AppState { engine };

    Router::new()
        .route("/health", get(health))
        .route("/tenants", get(list_tenants).post(create_tenant))
        .route("/tenants/:id/review-mode", put(set_review_mode))
        .route("/tenants/:id/audit", get(tenant_audit))
        .route("/users", get(list_users).post(create_user))
        .route("/care-plans", get(list_care_plans).post(create_care_plan))
        .route("/care-plans/complete-due", post(complete_due))
        .route(
            "/care-plans/:id",
            get(get_care_plan).delete(delete_care_plan),
        )
        .route("/care-plans/:id/process", post(process_care_plan))
        .route("/care-plans/:id/approve", post(approve_care_plan))
        .route(
            "/care-plans/:id/interpreter-approve",
            post(interpreter_approve),
        )
        .route("/care-plans/:id/request-changes", post(request_changes))
        .route("/care-plans/:id/send", post(send_care_plan))
        .route("/care-plans/:id/resend", post(resend_care_plan))
        .route("/care-plans/:id/complete", post(complete_care_plan))
        .route("/care-plans/:id/audit", get(care_plan_audit))
        .route("/care-plans/:id/billing", get(care_plan_billing))
        .route(
            "/care-plans/:id/check-ins",
            get(list_check_ins).post(schedule_check_in),
        )
        .route("/check-ins/due", get(due_check_ins))
        .route("/check-ins/:id/resolve-alert", post(resolve_alert))
        .route("/alerts", get(open_alerts))
        .route("/reports/summary", get(report_summary))
        .route("/reports/export.csv", get(report_csv))
        .route("/portal/:token", get(portal_view))
        .route(
            "/portal/:token/check-ins/:check_in_id",
            post(portal_respond),
        )
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the REST API on `addr` until the process stops.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails while running.
pub async fn serve(addr: &str, engine: Arc<CareEngine>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("-- Care plan REST API listening on {}", listener.local_addr()?);
    axum::serve(
        listener,
        router(engine).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
