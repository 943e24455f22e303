//! REST handlers.
//!
//! Engine calls take partition mutexes and may call blocking collaborators, so every handler runs
//! its engine call through [`run`] on the blocking pool.

use std::net::SocketAddr;
use std::str::FromStr;

use axum::extract::{ConnectInfo, Path as AxumPath, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json};
use careplan_core::audit::AuditLogEntry;
use careplan_core::care_plan::CarePlan;
use careplan_core::check_in::CheckIn;
use careplan_core::repositories::billing::BillingReport;
use careplan_core::repositories::care_plans::SendOutcome;
use careplan_core::repositories::portal::PortalView;
use careplan_core::repositories::reporting::ReportSummary;
use careplan_core::status::CarePlanStatus;
use careplan_core::tenant::{Tenant, User};
use careplan_core::{CareEngine, CarePlanResult};
use careplan_ids::{CarePlanId, CheckInId, TenantId};
use careplan_types::LanguageCode;

use crate::dto::{
    ApproveReq, CheckInAnswerReq, CreateCarePlanReq, CreateTenantReq, CreateUserReq,
    DueCheckInsQuery, InterpreterApproveReq, ListCarePlansQuery, ProcessReq, RequestChangesReq,
    ReviewModeReq, ScheduleCheckInReq, SendReq,
};
use crate::error::{ApiError, ErrorBody};
use crate::{AppState, Caller};
use api_shared::{HealthRes, HealthService};

/// Run `f` against the engine on the blocking pool.
async fn run<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&CareEngine) -> CarePlanResult<T> + Send + 'static,
{
    let engine = state.engine.clone();
    Ok(tokio::task::spawn_blocking(move || f(&engine)).await??)
}

// ============================================================================
// HEALTH
// ============================================================================

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for monitoring and load balancers.
#[axum::debug_handler]
pub(crate) async fn health(State(_state): State<AppState>) -> Json<HealthRes> {
    Json(HealthService::check_health())
}

// ============================================================================
// DIRECTORY
// ============================================================================

#[utoipa::path(
    post,
    path = "/tenants",
    request_body = CreateTenantReq,
    responses(
        (status = 201, description = "Tenant created"),
        (status = 401, description = "Unknown caller", body = ErrorBody),
        (status = 403, description = "Caller is not a super admin", body = ErrorBody)
    )
)]
#[axum::debug_handler]
pub(crate) async fn create_tenant(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Json(req): Json<CreateTenantReq>,
) -> Result<(StatusCode, Json<Tenant>), ApiError> {
    let tenant = run(&state, move |engine| {
        engine.directory.provision_tenant(&actor, req.into())
    })
    .await?;
    Ok((StatusCode::CREATED, Json(tenant)))
}

#[utoipa::path(
    get,
    path = "/tenants",
    responses(
        (status = 200, description = "Tenants visible to the caller"),
        (status = 401, description = "Unknown caller", body = ErrorBody)
    )
)]
#[axum::debug_handler]
pub(crate) async fn list_tenants(
    State(state): State<AppState>,
    Caller(actor): Caller,
) -> Result<Json<Vec<Tenant>>, ApiError> {
    run(&state, move |engine| engine.directory.tenants(&actor))
        .await
        .map(Json)
}

#[utoipa::path(
    put,
    path = "/tenants/{id}/review-mode",
    params(("id" = String, Path, description = "Tenant id")),
    request_body = ReviewModeReq,
    responses(
        (status = 200, description = "Review mode updated"),
        (status = 403, description = "Caller may not manage this tenant", body = ErrorBody)
    )
)]
#[axum::debug_handler]
pub(crate) async fn set_review_mode(
    State(state): State<AppState>,
    Caller(actor): Caller,
    AxumPath(id): AxumPath<TenantId>,
    Json(req): Json<ReviewModeReq>,
) -> Result<Json<Tenant>, ApiError> {
    run(&state, move |engine| {
        engine
            .directory
            .set_interpreter_review_mode(&actor, id, req.mode)
    })
    .await
    .map(Json)
}

#[utoipa::path(
    get,
    path = "/tenants/{id}/audit",
    params(("id" = String, Path, description = "Tenant id")),
    responses(
        (status = 200, description = "The tenant's full audit log in sequence order"),
        (status = 403, description = "Caller may not manage this tenant", body = ErrorBody)
    )
)]
#[axum::debug_handler]
pub(crate) async fn tenant_audit(
    State(state): State<AppState>,
    Caller(actor): Caller,
    AxumPath(id): AxumPath<TenantId>,
) -> Result<Json<Vec<AuditLogEntry>>, ApiError> {
    run(&state, move |engine| engine.care_plans.tenant_audit(&actor, id))
        .await
        .map(Json)
}

#[utoipa::path(
    post,
    path = "/users",
    request_body = CreateUserReq,
    responses(
        (status = 201, description = "User created"),
        (status = 400, description = "Invalid membership, email or language", body = ErrorBody),
        (status = 403, description = "Caller may not add users to this tenant", body = ErrorBody)
    )
)]
#[axum::debug_handler]
pub(crate) async fn create_user(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Json(req): Json<CreateUserReq>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let user = run(&state, move |engine| engine.directory.add_user(&actor, req.into())).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

#[utoipa::path(
    get,
    path = "/users",
    responses(
        (status = 200, description = "Users of the caller's tenant, or all users for super admins"),
        (status = 403, description = "Caller may not manage users", body = ErrorBody)
    )
)]
#[axum::debug_handler]
pub(crate) async fn list_users(
    State(state): State<AppState>,
    Caller(actor): Caller,
) -> Result<Json<Vec<User>>, ApiError> {
    run(&state, move |engine| engine.directory.users(&actor))
        .await
        .map(Json)
}

// ============================================================================
// CARE PLANS
// ============================================================================

#[utoipa::path(
    post,
    path = "/care-plans",
    request_body = CreateCarePlanReq,
    responses(
        (status = 201, description = "Draft created"),
        (status = 400, description = "Empty title or source content", body = ErrorBody),
        (status = 403, description = "Caller is not a clinician", body = ErrorBody)
    )
)]
#[axum::debug_handler]
pub(crate) async fn create_care_plan(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Json(req): Json<CreateCarePlanReq>,
) -> Result<(StatusCode, Json<CarePlan>), ApiError> {
    let plan = run(&state, move |engine| {
        engine.care_plans.create_draft(&actor, req.into())
    })
    .await?;
    Ok((StatusCode::CREATED, Json(plan)))
}

#[utoipa::path(
    get,
    path = "/care-plans",
    params(ListCarePlansQuery),
    responses(
        (status = 200, description = "Care plans visible to the caller, oldest first"),
        (status = 400, description = "Unknown status filter", body = ErrorBody)
    )
)]
#[axum::debug_handler]
pub(crate) async fn list_care_plans(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Query(query): Query<ListCarePlansQuery>,
) -> Result<Json<Vec<CarePlan>>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(CarePlanStatus::from_str)
        .transpose()?;
    run(&state, move |engine| engine.care_plans.list(&actor, status))
        .await
        .map(Json)
}

#[utoipa::path(
    get,
    path = "/care-plans/{id}",
    params(("id" = String, Path, description = "Care plan id")),
    responses(
        (status = 200, description = "The care plan"),
        (status = 403, description = "Plan belongs to another tenant or language", body = ErrorBody),
        (status = 404, description = "No such plan", body = ErrorBody)
    )
)]
#[axum::debug_handler]
pub(crate) async fn get_care_plan(
    State(state): State<AppState>,
    Caller(actor): Caller,
    AxumPath(id): AxumPath<CarePlanId>,
) -> Result<Json<CarePlan>, ApiError> {
    run(&state, move |engine| engine.care_plans.get(&actor, id))
        .await
        .map(Json)
}

#[utoipa::path(
    delete,
    path = "/care-plans/{id}",
    params(("id" = String, Path, description = "Care plan id")),
    responses(
        (status = 204, description = "Plan deleted"),
        (status = 409, description = "Plan has reached the patient", body = ErrorBody)
    )
)]
#[axum::debug_handler]
pub(crate) async fn delete_care_plan(
    State(state): State<AppState>,
    Caller(actor): Caller,
    AxumPath(id): AxumPath<CarePlanId>,
) -> Result<StatusCode, ApiError> {
    run(&state, move |engine| engine.care_plans.delete(&actor, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/care-plans/{id}/process",
    params(("id" = String, Path, description = "Care plan id")),
    request_body = ProcessReq,
    responses(
        (status = 200, description = "Plan simplified and translated, now pending review"),
        (status = 409, description = "Plan is not a draft or changed during processing", body = ErrorBody),
        (status = 502, description = "Text processor failed; plan left unchanged", body = ErrorBody)
    )
)]
#[axum::debug_handler]
pub(crate) async fn process_care_plan(
    State(state): State<AppState>,
    Caller(actor): Caller,
    AxumPath(id): AxumPath<CarePlanId>,
    Json(req): Json<ProcessReq>,
) -> Result<Json<CarePlan>, ApiError> {
    let language = LanguageCode::new(&req.target_language)
        .map_err(careplan_core::CarePlanError::from)?;
    run(&state, move |engine| {
        engine.care_plans.process(&actor, id, &language)
    })
    .await
    .map(Json)
}

#[utoipa::path(
    post,
    path = "/care-plans/{id}/approve",
    params(("id" = String, Path, description = "Care plan id")),
    request_body = ApproveReq,
    responses(
        (status = 200, description = "Plan approved or routed to interpreter review"),
        (status = 409, description = "Wrong state, or the review policy forbids the route", body = ErrorBody)
    )
)]
#[axum::debug_handler]
pub(crate) async fn approve_care_plan(
    State(state): State<AppState>,
    Caller(actor): Caller,
    AxumPath(id): AxumPath<CarePlanId>,
    Json(req): Json<ApproveReq>,
) -> Result<Json<CarePlan>, ApiError> {
    let request: careplan_core::review_policy::ApprovalRequest = req.into();
    run(&state, move |engine| {
        engine.care_plans.approve(&actor, id, &request)
    })
    .await
    .map(Json)
}

#[utoipa::path(
    post,
    path = "/care-plans/{id}/interpreter-approve",
    params(("id" = String, Path, description = "Care plan id")),
    request_body = InterpreterApproveReq,
    responses(
        (status = 200, description = "Interpreter edits stored, plan interpreter_approved"),
        (status = 403, description = "Caller is not qualified for the plan language", body = ErrorBody)
    )
)]
#[axum::debug_handler]
pub(crate) async fn interpreter_approve(
    State(state): State<AppState>,
    Caller(actor): Caller,
    AxumPath(id): AxumPath<CarePlanId>,
    Json(req): Json<InterpreterApproveReq>,
) -> Result<Json<CarePlan>, ApiError> {
    run(&state, move |engine| {
        engine
            .care_plans
            .interpreter_approve(&actor, id, req.into())
    })
    .await
    .map(Json)
}

#[utoipa::path(
    post,
    path = "/care-plans/{id}/request-changes",
    params(("id" = String, Path, description = "Care plan id")),
    request_body = RequestChangesReq,
    responses(
        (status = 200, description = "Plan returned to pending review with notes"),
        (status = 400, description = "Empty notes", body = ErrorBody)
    )
)]
#[axum::debug_handler]
pub(crate) async fn request_changes(
    State(state): State<AppState>,
    Caller(actor): Caller,
    AxumPath(id): AxumPath<CarePlanId>,
    Json(req): Json<RequestChangesReq>,
) -> Result<Json<CarePlan>, ApiError> {
    run(&state, move |engine| {
        engine
            .care_plans
            .interpreter_request_changes(&actor, id, &req.notes)
    })
    .await
    .map(Json)
}

#[utoipa::path(
    post,
    path = "/care-plans/{id}/send",
    params(("id" = String, Path, description = "Care plan id")),
    request_body = SendReq,
    responses(
        (status = 200, description = "Plan sent; `notified` reports delivery separately"),
        (status = 400, description = "Invalid patient details", body = ErrorBody),
        (status = 409, description = "Plan is not approved", body = ErrorBody)
    )
)]
#[axum::debug_handler]
pub(crate) async fn send_care_plan(
    State(state): State<AppState>,
    Caller(actor): Caller,
    AxumPath(id): AxumPath<CarePlanId>,
    Json(req): Json<SendReq>,
) -> Result<Json<SendOutcome>, ApiError> {
    let details = req.into_details()?;
    run(&state, move |engine| engine.care_plans.send(&actor, id, details))
        .await
        .map(Json)
}

#[utoipa::path(
    post,
    path = "/care-plans/{id}/resend",
    params(("id" = String, Path, description = "Care plan id")),
    responses(
        (status = 200, description = "New access link issued; the previous one no longer works"),
        (status = 409, description = "Plan is not sent", body = ErrorBody)
    )
)]
#[axum::debug_handler]
pub(crate) async fn resend_care_plan(
    State(state): State<AppState>,
    Caller(actor): Caller,
    AxumPath(id): AxumPath<CarePlanId>,
) -> Result<Json<SendOutcome>, ApiError> {
    run(&state, move |engine| engine.care_plans.resend(&actor, id))
        .await
        .map(Json)
}

#[utoipa::path(
    post,
    path = "/care-plans/{id}/complete",
    params(("id" = String, Path, description = "Care plan id")),
    responses(
        (status = 200, description = "Plan completed"),
        (status = 409, description = "Not sent, or the completion policy is not yet met", body = ErrorBody)
    )
)]
#[axum::debug_handler]
pub(crate) async fn complete_care_plan(
    State(state): State<AppState>,
    Caller(actor): Caller,
    AxumPath(id): AxumPath<CarePlanId>,
) -> Result<Json<CarePlan>, ApiError> {
    run(&state, move |engine| engine.care_plans.mark_completed(&actor, id))
        .await
        .map(Json)
}

#[utoipa::path(
    post,
    path = "/care-plans/complete-due",
    responses(
        (status = 200, description = "Ids of the plans the completion policy closed"),
        (status = 403, description = "Caller may not manage tenants", body = ErrorBody)
    )
)]
#[axum::debug_handler]
pub(crate) async fn complete_due(
    State(state): State<AppState>,
    Caller(actor): Caller,
) -> Result<Json<Vec<CarePlanId>>, ApiError> {
    run(&state, move |engine| engine.care_plans.complete_due(&actor))
        .await
        .map(Json)
}

#[utoipa::path(
    get,
    path = "/care-plans/{id}/audit",
    params(("id" = String, Path, description = "Care plan id")),
    responses(
        (status = 200, description = "The plan's audit entries in commit order")
    )
)]
#[axum::debug_handler]
pub(crate) async fn care_plan_audit(
    State(state): State<AppState>,
    Caller(actor): Caller,
    AxumPath(id): AxumPath<CarePlanId>,
) -> Result<Json<Vec<AuditLogEntry>>, ApiError> {
    run(&state, move |engine| engine.care_plans.audit_trail(&actor, id))
        .await
        .map(Json)
}

#[utoipa::path(
    get,
    path = "/care-plans/{id}/billing",
    params(("id" = String, Path, description = "Care plan id")),
    responses(
        (status = 200, description = "TCM eligibility with the timestamps it was derived from"),
        (status = 403, description = "Caller may not view reports", body = ErrorBody)
    )
)]
#[axum::debug_handler]
pub(crate) async fn care_plan_billing(
    State(state): State<AppState>,
    Caller(actor): Caller,
    AxumPath(id): AxumPath<CarePlanId>,
) -> Result<Json<BillingReport>, ApiError> {
    run(&state, move |engine| engine.billing.eligibility(&actor, id))
        .await
        .map(Json)
}

// ============================================================================
// CHECK-INS
// ============================================================================

#[utoipa::path(
    get,
    path = "/care-plans/{id}/check-ins",
    params(("id" = String, Path, description = "Care plan id")),
    responses(
        (status = 200, description = "The plan's check-ins ordered by attempt")
    )
)]
#[axum::debug_handler]
pub(crate) async fn list_check_ins(
    State(state): State<AppState>,
    Caller(actor): Caller,
    AxumPath(id): AxumPath<CarePlanId>,
) -> Result<Json<Vec<CheckIn>>, ApiError> {
    run(&state, move |engine| engine.check_ins.check_ins(&actor, id))
        .await
        .map(Json)
}

#[utoipa::path(
    post,
    path = "/care-plans/{id}/check-ins",
    params(("id" = String, Path, description = "Care plan id")),
    request_body = ScheduleCheckInReq,
    responses(
        (status = 201, description = "Check-in scheduled"),
        (status = 400, description = "Wrong patient or attempt number", body = ErrorBody),
        (status = 409, description = "Plan has not been sent", body = ErrorBody)
    )
)]
#[axum::debug_handler]
pub(crate) async fn schedule_check_in(
    State(state): State<AppState>,
    Caller(actor): Caller,
    AxumPath(id): AxumPath<CarePlanId>,
    Json(req): Json<ScheduleCheckInReq>,
) -> Result<(StatusCode, Json<CheckIn>), ApiError> {
    let check_in = run(&state, move |engine| {
        engine.check_ins.schedule(&actor, id, req.into())
    })
    .await?;
    Ok((StatusCode::CREATED, Json(check_in)))
}

#[utoipa::path(
    get,
    path = "/check-ins/due",
    params(DueCheckInsQuery),
    responses(
        (status = 200, description = "Unanswered check-ins whose scheduled time has passed")
    )
)]
#[axum::debug_handler]
pub(crate) async fn due_check_ins(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Query(query): Query<DueCheckInsQuery>,
) -> Result<Json<Vec<CheckIn>>, ApiError> {
    run(&state, move |engine| {
        let now = query
            .before
            .unwrap_or_else(|| engine.context().clock().now());
        engine.check_ins.due_check_ins(&actor, now)
    })
    .await
    .map(Json)
}

#[utoipa::path(
    get,
    path = "/alerts",
    responses(
        (status = 200, description = "Unresolved alerts, most recent first")
    )
)]
#[axum::debug_handler]
pub(crate) async fn open_alerts(
    State(state): State<AppState>,
    Caller(actor): Caller,
) -> Result<Json<Vec<CheckIn>>, ApiError> {
    run(&state, move |engine| engine.check_ins.open_alerts(&actor))
        .await
        .map(Json)
}

#[utoipa::path(
    post,
    path = "/check-ins/{id}/resolve-alert",
    params(("id" = String, Path, description = "Check-in id")),
    responses(
        (status = 200, description = "Alert resolved (unchanged if it already was)"),
        (status = 400, description = "Check-in has no alert", body = ErrorBody)
    )
)]
#[axum::debug_handler]
pub(crate) async fn resolve_alert(
    State(state): State<AppState>,
    Caller(actor): Caller,
    AxumPath(id): AxumPath<CheckInId>,
) -> Result<Json<CheckIn>, ApiError> {
    run(&state, move |engine| engine.check_ins.resolve_alert(&actor, id))
        .await
        .map(Json)
}

// ============================================================================
// REPORTS
// ============================================================================

#[utoipa::path(
    get,
    path = "/reports/summary",
    responses(
        (status = 200, description = "Status counts, response rate, open alerts and CPT counts")
    )
)]
#[axum::debug_handler]
pub(crate) async fn report_summary(
    State(state): State<AppState>,
    Caller(actor): Caller,
) -> Result<Json<ReportSummary>, ApiError> {
    run(&state, move |engine| engine.reporting.summary(&actor))
        .await
        .map(Json)
}

#[utoipa::path(
    get,
    path = "/reports/export.csv",
    responses(
        (status = 200, description = "One CSV row per care plan", body = String, content_type = "text/csv")
    )
)]
#[axum::debug_handler]
pub(crate) async fn report_csv(
    State(state): State<AppState>,
    Caller(actor): Caller,
) -> Result<impl IntoResponse, ApiError> {
    let csv = run(&state, move |engine| engine.reporting.export_csv(&actor)).await?;
    Ok(([(header::CONTENT_TYPE, "text/csv; charset=utf-8")], csv))
}

// ============================================================================
// PATIENT PORTAL
// ============================================================================

#[utoipa::path(
    get,
    path = "/portal/{token}",
    params(("token" = String, Path, description = "Patient access token")),
    responses(
        (status = 200, description = "Patient-facing plan content and open check-ins"),
        (status = 401, description = "Token invalid, expired, or source locked out", body = ErrorBody)
    )
)]
#[axum::debug_handler]
pub(crate) async fn portal_view(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    AxumPath(token): AxumPath<String>,
) -> Result<Json<PortalView>, ApiError> {
    let source = addr.ip().to_string();
    run(&state, move |engine| engine.portal.view(&source, &token))
        .await
        .map(Json)
}

#[utoipa::path(
    post,
    path = "/portal/{token}/check-ins/{check_in_id}",
    params(
        ("token" = String, Path, description = "Patient access token"),
        ("check_in_id" = String, Path, description = "Check-in id")
    ),
    request_body = CheckInAnswerReq,
    responses(
        (status = 200, description = "Response recorded"),
        (status = 401, description = "Token invalid for this check-in", body = ErrorBody),
        (status = 409, description = "Check-in already answered", body = ErrorBody)
    )
)]
#[axum::debug_handler]
pub(crate) async fn portal_respond(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    AxumPath((token, check_in_id)): AxumPath<(String, CheckInId)>,
    Json(req): Json<CheckInAnswerReq>,
) -> Result<Json<CheckIn>, ApiError> {
    let source = addr.ip().to_string();
    run(&state, move |engine| {
        engine
            .check_ins
            .record_response(&source, &token, check_in_id, req.response, req.notes)
    })
    .await
    .map(Json)
}
