//! Machine API endpoints.
//!
//! Agents register their machine once and look it up by hardware id on
//! later boots. The component view exposes what the reconciler sees.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use fleetsync_id::{MachineId, TenantId};
use fleetsync_reconcile::{load_snapshot, Component, ReconcileError, SnapshotDigest};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, FieldError};
use crate::api::request_context::RequestContext;
use crate::db::{MachineRecord, NewMachine};
use crate::state::AppState;

const MAX_HOSTNAME_LEN: usize = 255;
const MAX_HARDWARE_ID_LEN: usize = 255;

/// Machine routes: /v1/machines
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(lookup_machine).post(register_machine))
        .route("/{machine_id}", get(get_machine))
        .route("/{machine_id}/components", get(list_components))
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterMachineRequest {
    #[serde(default)]
    pub hostname: Option<String>,

    #[serde(default)]
    pub mac_address: Option<String>,

    #[serde(default, alias = "mobuId")]
    pub hardware_id: Option<String>,

    /// `fkCompany` renames the field only; the value is a `tnt_` id.
    #[serde(default, alias = "fkCompany")]
    pub tenant_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterMachineResponse {
    pub success: bool,
    pub machine_id: MachineId,
    pub created: bool,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupQuery {
    pub hardware_id: Option<String>,
    pub tenant_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LookupResponse {
    pub exists: bool,
    pub machine: Option<MachineRecord>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentsResponse {
    pub machine_id: MachineId,
    pub digest: String,
    pub items: Vec<Component>,
}

// =============================================================================
// Validation
// =============================================================================

fn required<'a>(
    value: &'a Option<String>,
    field: &str,
    max_len: usize,
    errors: &mut Vec<FieldError>,
) -> &'a str {
    let value = value.as_deref().map(str::trim).unwrap_or_default();
    if value.is_empty() {
        errors.push(FieldError::new(field, format!("{field} is required")));
    } else if value.len() > max_len {
        errors.push(FieldError::new(
            field,
            format!("{field} cannot exceed {max_len} characters"),
        ));
    }
    value
}

fn parse_tenant_id(raw: &str) -> Option<TenantId> {
    raw.parse().ok()
}

impl RegisterMachineRequest {
    fn validate(&self) -> Result<NewMachine, Vec<FieldError>> {
        let mut errors = Vec::new();

        let hostname = required(&self.hostname, "hostname", MAX_HOSTNAME_LEN, &mut errors);
        let mac_address = required(&self.mac_address, "macAddress", 64, &mut errors);
        let hardware_id =
            required(&self.hardware_id, "hardwareId", MAX_HARDWARE_ID_LEN, &mut errors);
        let tenant = required(&self.tenant_id, "tenantId", 64, &mut errors);

        let tenant_id = parse_tenant_id(tenant);
        if tenant_id.is_none() && !tenant.is_empty() {
            errors.push(FieldError::new("tenantId", "tenantId is not a valid tenant id"));
        }

        match tenant_id {
            Some(tenant_id) if errors.is_empty() => Ok(NewMachine {
                tenant_id,
                hostname: hostname.to_string(),
                mac_address: mac_address.to_string(),
                hardware_id: hardware_id.to_string(),
            }),
            _ => Err(errors),
        }
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Register a machine, or return the existing registration.
///
/// POST /v1/machines
async fn register_machine(
    State(state): State<AppState>,
    ctx: RequestContext,
    body: Result<Json<RegisterMachineRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id;

    let Json(req) = body.map_err(|e| ApiError::from(e).with_request_id(request_id.clone()))?;

    let machine = req.validate().map_err(|details| {
        ApiError::bad_request("invalid_machine", "Machine registration is invalid")
            .with_details(details)
            .with_request_id(request_id.clone())
    })?;

    let registration = state
        .db()
        .machine_store()
        .register(&machine)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, request_id = %request_id, "Failed to register machine");
            ApiError::storage(&e, "Failed to register machine").with_request_id(request_id.clone())
        })?;

    let record = registration.record();
    let (status, message) = if registration.is_created() {
        tracing::info!(
            machine_id = %record.machine_id,
            tenant_id = %record.tenant_id,
            hostname = %record.hostname,
            "Machine registered"
        );
        (StatusCode::CREATED, "Machine registered")
    } else {
        (StatusCode::OK, "Machine already registered")
    };

    Ok((
        status,
        Json(RegisterMachineResponse {
            success: true,
            machine_id: record.machine_id,
            created: registration.is_created(),
            message: message.to_string(),
        }),
    ))
}

/// Look up a machine by hardware id within a tenant.
///
/// GET /v1/machines?hardwareId=...&tenantId=...
async fn lookup_machine(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<LookupQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id;

    let hardware_id = query
        .hardware_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            ApiError::bad_request("invalid_query", "hardwareId is required")
                .with_request_id(request_id.clone())
        })?;

    let tenant_id = query
        .tenant_id
        .as_deref()
        .map(str::trim)
        .and_then(parse_tenant_id)
        .ok_or_else(|| {
            ApiError::bad_request("invalid_query", "tenantId must be a valid tenant id")
                .with_request_id(request_id.clone())
        })?;

    let machine = state
        .db()
        .machine_store()
        .find_by_hardware_id(tenant_id, hardware_id)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, request_id = %request_id, "Failed to look up machine");
            ApiError::storage(&e, "Failed to look up machine").with_request_id(request_id.clone())
        })?;

    Ok(Json(LookupResponse {
        exists: machine.is_some(),
        machine,
    }))
}

/// GET /v1/machines/{machine_id}
async fn get_machine(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(machine_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id;
    let machine_id = parse_machine_id(&machine_id, &request_id)?;

    let machine = state
        .db()
        .machine_store()
        .get(machine_id)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, request_id = %request_id, machine_id = %machine_id, "Failed to get machine");
            ApiError::storage(&e, "Failed to get machine").with_request_id(request_id.clone())
        })?;

    match machine {
        Some(machine) => Ok(Json(machine)),
        None => Err(ApiError::not_found(
            "machine_not_found",
            format!("Machine {machine_id} not found"),
        )
        .with_request_id(request_id)),
    }
}

/// All stored components of a machine, live and inactive.
///
/// GET /v1/machines/{machine_id}/components
async fn list_components(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(machine_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id;
    let machine_id = parse_machine_id(&machine_id, &request_id)?;

    let snapshot = load_snapshot(&state.db().component_store(), machine_id)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, request_id = %request_id, machine_id = %machine_id, "Failed to load components");
            let err = match &e {
                ReconcileError::StoreUnavailable(source) if source.is_unavailable() => {
                    ApiError::service_unavailable("store_unavailable", "Component store unavailable")
                }
                _ => ApiError::internal("internal_error", "Failed to load components"),
            };
            err.with_request_id(request_id.clone())
        })?;

    let items = snapshot.into_rows();
    Ok(Json(ComponentsResponse {
        machine_id,
        digest: SnapshotDigest::of(&items).to_string(),
        items,
    }))
}

fn parse_machine_id(raw: &str, request_id: &str) -> Result<MachineId, ApiError> {
    raw.parse().map_err(|_| {
        ApiError::bad_request("invalid_machine_id", "Invalid machine ID format")
            .with_request_id(request_id.to_string())
    })
}
