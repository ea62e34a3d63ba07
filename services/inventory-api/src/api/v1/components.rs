//! Component sync endpoint.
//!
//! Agents post their full component list; the reconciler brings the stored
//! rows for that machine in line with it in a single transaction.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use fleetsync_id::{MachineId, TenantId};
use fleetsync_reconcile::{
    description_from_json, ComponentStore, ReconcileError, ReconcileRequest,
    ReconciliationResult, Reconciler, ReportedComponent,
};
use serde::{Deserialize, Serialize};

use crate::api::request_context::RequestContext;
use crate::state::AppState;

/// Component routes: /v1/components
pub fn routes() -> Router<AppState> {
    Router::new().route("/sync", post(sync_components))
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// A machine's full component report.
///
/// Every field is optional at the wire level so that missing fields surface
/// as sync failures rather than extractor rejections.
///
/// `fkServer` and `fkCompany` are accepted as field names only; their values
/// must still be prefixed ids (`mach_…`, `tnt_…`), not legacy integer keys.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncComponentsRequest {
    #[serde(default, alias = "fkServer")]
    pub machine_id: Option<String>,

    #[serde(default, alias = "fkCompany")]
    pub tenant_id: Option<String>,

    #[serde(default)]
    pub components: Option<Vec<ReportedComponentBody>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReportedComponentBody {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default, rename = "type")]
    pub kind: Option<String>,

    /// Any scalar; coerced to text.
    #[serde(default)]
    pub description: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
#[serde(rename_all = "camelCase")]
pub struct SyncSuccess {
    pub success: bool,
    pub message: String,
    #[serde(flatten)]
    pub counts: SyncCounts,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
#[serde(rename_all = "camelCase")]
pub struct SyncCounts {
    pub machine_id: String,
    pub tenant_id: String,
    pub inserted: usize,
    pub updated: usize,
    pub reactivated: usize,
    pub deactivated: usize,
    pub unchanged: usize,
}

impl From<&ReconciliationResult> for SyncCounts {
    fn from(result: &ReconciliationResult) -> Self {
        Self {
            machine_id: result.machine_id.to_string(),
            tenant_id: result.tenant_id.to_string(),
            inserted: result.inserted,
            updated: result.updated,
            reactivated: result.reactivated,
            deactivated: result.deactivated,
            unchanged: result.unchanged,
        }
    }
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
#[serde(rename_all = "camelCase")]
pub struct SyncFailure {
    pub success: bool,
    pub message: String,
    pub error_detail: String,
    pub code: String,
    pub retryable: bool,
    pub request_id: String,
}

// =============================================================================
// Validation
// =============================================================================

fn invalid(message: impl Into<String>) -> ReconcileError {
    ReconcileError::Validation(message.into())
}

impl SyncComponentsRequest {
    /// Check required fields and convert into a reconciler request.
    pub fn validate(self) -> Result<ReconcileRequest, ReconcileError> {
        let machine_id: MachineId = match self.machine_id.as_deref().map(str::trim) {
            None | Some("") => return Err(invalid("machineId is required")),
            Some(raw) => raw
                .parse()
                .map_err(|e| invalid(format!("machineId is not a valid machine id: {e}")))?,
        };

        let tenant_id: TenantId = match self.tenant_id.as_deref().map(str::trim) {
            None | Some("") => return Err(invalid("tenantId is required")),
            Some(raw) => raw
                .parse()
                .map_err(|e| invalid(format!("tenantId is not a valid tenant id: {e}")))?,
        };

        let Some(bodies) = self.components else {
            return Err(invalid("components is required"));
        };

        let mut components = Vec::with_capacity(bodies.len());
        for (i, body) in bodies.into_iter().enumerate() {
            let name = match body.name {
                Some(name) if !name.trim().is_empty() => name,
                _ => return Err(invalid(format!("components[{i}].name is required"))),
            };
            let Some(kind) = body.kind else {
                return Err(invalid(format!("components[{i}].type is required")));
            };
            let description =
                description_from_json(body.description.as_ref()).map_err(|e| match e {
                    ReconcileError::Validation(msg) => {
                        invalid(format!("components[{i}].description: {msg}"))
                    }
                    other => other,
                })?;

            components.push(ReportedComponent {
                name,
                kind,
                description,
            });
        }

        Ok(ReconcileRequest {
            machine_id,
            tenant_id,
            components,
        })
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Reconcile a machine's reported components.
///
/// POST /v1/components/sync
async fn sync_components(
    State(state): State<AppState>,
    ctx: RequestContext,
    body: Result<Json<SyncComponentsRequest>, JsonRejection>,
) -> Response {
    let reconciler = state.reconciler();
    run_sync(&reconciler, &ctx.request_id, body).await
}

/// Validate, reconcile, and render the outcome.
///
/// The reconciler carries the deadline; expiry before the transaction opens
/// renders as 503, expiry inside it as 500 after the rollback.
pub(crate) async fn run_sync<S: ComponentStore>(
    reconciler: &Reconciler<S>,
    request_id: &str,
    body: Result<Json<SyncComponentsRequest>, JsonRejection>,
) -> Response {
    let outcome = match body {
        Ok(Json(body)) => match body.validate() {
            Ok(request) => reconciler.reconcile(&request).await,
            Err(e) => Err(e),
        },
        Err(rejection) => Err(invalid(rejection.body_text())),
    };

    match outcome {
        Ok(result) => {
            let message = format!(
                "Sync complete for machine {} (tenant {})",
                result.machine_id, result.tenant_id
            );
            let body = SyncSuccess {
                success: true,
                message,
                counts: SyncCounts::from(&result),
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(err) => failure_response(&err, request_id),
    }
}

fn failure_response(err: &ReconcileError, request_id: &str) -> Response {
    let (status, message) = match err {
        ReconcileError::Validation(_) => (StatusCode::BAD_REQUEST, "Invalid sync request"),
        ReconcileError::StoreUnavailable(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Component store unavailable; no changes were applied",
        ),
        ReconcileError::Failed { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Component sync failed; no changes were applied",
        ),
        ReconcileError::Internal(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "Component sync failed")
        }
    };

    if status.is_server_error() {
        tracing::error!(request_id = %request_id, code = err.code(), error = %err, "Component sync failed");
    } else {
        tracing::warn!(request_id = %request_id, error = %err, "Rejected component sync request");
    }

    let body = SyncFailure {
        success: false,
        message: message.to_string(),
        error_detail: err.to_string(),
        code: err.code().to_string(),
        retryable: err.is_retryable(),
        request_id: request_id.to_string(),
    };
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::to_bytes;
    use fleetsync_reconcile::DeactivationPolicy;
    use fleetsync_testing::{component, MemoryComponentStore};
    use rstest::rstest;
    use serde_json::{json, Value};

    use super::*;

    fn parse(body: Value) -> SyncComponentsRequest {
        serde_json::from_value(body).unwrap()
    }

    async fn sync(store: &MemoryComponentStore, body: Value) -> (StatusCode, Value) {
        let reconciler = Reconciler::new(store.clone())
            .with_policy(DeactivationPolicy::SkipInactive)
            .with_timeout(Duration::from_secs(5));
        let response = run_sync(&reconciler, "req_test", Ok(Json(parse(body)))).await;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_validate_accepts_legacy_field_names() {
        let machine = MachineId::new();
        let tenant = TenantId::new();
        let request = parse(json!({
            "fkServer": machine.to_string(),
            "fkCompany": tenant.to_string(),
            "components": [
                {"name": "cpu", "type": "x86", "description": 8},
                {"name": "ram", "type": "ddr4", "description": ""},
            ],
        }))
        .validate()
        .unwrap();

        assert_eq!(request.machine_id, machine);
        assert_eq!(request.tenant_id, tenant);
        assert_eq!(request.components[0].description.as_deref(), Some("8"));
        assert_eq!(request.components[1].description, None);
    }

    #[rstest]
    #[case::missing_machine(json!({"tenantId": "TENANT", "components": []}), "machineId is required")]
    #[case::bad_machine(json!({"machineId": "cmp_01ARZ3NDEKTSV4RRFFQ69G5FAV", "tenantId": "TENANT", "components": []}), "machineId is not a valid")]
    #[case::missing_tenant(json!({"machineId": "MACHINE", "components": []}), "tenantId is required")]
    #[case::missing_components(json!({"machineId": "MACHINE", "tenantId": "TENANT"}), "components is required")]
    #[case::empty_name(json!({"machineId": "MACHINE", "tenantId": "TENANT", "components": [{"name": " ", "type": "x"}]}), "components[0].name is required")]
    #[case::missing_type(json!({"machineId": "MACHINE", "tenantId": "TENANT", "components": [{"name": "cpu"}]}), "components[0].type is required")]
    #[case::object_description(json!({"machineId": "MACHINE", "tenantId": "TENANT", "components": [{"name": "cpu", "type": "x", "description": {"a": 1}}]}), "components[0].description")]
    fn test_validate_rejects(#[case] body: Value, #[case] expected: &str) {
        let text = body
            .to_string()
            .replace("MACHINE", &MachineId::new().to_string())
            .replace("TENANT", &TenantId::new().to_string());
        let err = parse(serde_json::from_str(&text).unwrap()).validate().unwrap_err();

        assert!(matches!(err, ReconcileError::Validation(_)));
        assert!(err.to_string().contains(expected), "{err}");
    }

    #[tokio::test]
    async fn test_sync_reports_counts() {
        let machine = MachineId::new();
        let tenant = TenantId::new();
        let store = MemoryComponentStore::with_rows(vec![
            component(machine, "cpu", "x86", None, true),
            component(machine, "gpu", "nvidia", None, true),
        ]);

        let (status, body) = sync(
            &store,
            json!({
                "machineId": machine.to_string(),
                "tenantId": tenant.to_string(),
                "components": [
                    {"name": "cpu", "type": "x86", "description": null},
                    {"name": "ram", "type": "ddr4", "description": "16GB"},
                ],
            }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["inserted"], 1);
        assert_eq!(body["updated"], 0);
        assert_eq!(body["deactivated"], 1);
        assert_eq!(body["unchanged"], 1);
        assert_eq!(body["machineId"], machine.to_string());
        assert_eq!(
            body["message"],
            format!("Sync complete for machine {machine} (tenant {tenant})")
        );
    }

    #[tokio::test]
    async fn test_validation_failure_is_400_without_store_access() {
        let store = MemoryComponentStore::new();
        let (status, body) = sync(&store, json!({"components": []})).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "validation_error");
        assert_eq!(body["requestId"], "req_test");
        assert_eq!(store.stats().loads, 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_is_503() {
        let store = MemoryComponentStore::new();
        store.fail_loads();
        let (status, body) = sync(
            &store,
            json!({
                "machineId": MachineId::new().to_string(),
                "tenantId": TenantId::new().to_string(),
                "components": [{"name": "cpu", "type": "x86"}],
            }),
        )
        .await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], "store_unavailable");
        assert_eq!(body["retryable"], true);
    }

    #[tokio::test]
    async fn test_failed_mutation_is_500_and_rolled_back() {
        let machine = MachineId::new();
        let store = MemoryComponentStore::with_rows(vec![component(machine, "gpu", "nvidia", None, true)]);
        store.fail_on_mutation(2);

        let (status, body) = sync(
            &store,
            json!({
                "machineId": machine.to_string(),
                "tenantId": TenantId::new().to_string(),
                "components": [{"name": "ram", "type": "ddr4"}],
            }),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "reconciliation_failed");
        assert!(body["errorDetail"]
            .as_str()
            .unwrap()
            .contains("insert component 'ram'"));
        assert!(store.find(machine, "gpu").unwrap().active);
        assert!(store.find(machine, "ram").is_none());
    }

    #[tokio::test]
    async fn test_deadline_rolls_back_stalled_sync() {
        let machine = MachineId::new();
        let store = MemoryComponentStore::with_rows(vec![component(machine, "gpu", "nvidia", None, true)]);
        store.stall_on_mutation(1);
        let reconciler = Reconciler::new(store.clone()).with_timeout(Duration::from_millis(50));

        let body = parse(json!({
            "machineId": machine.to_string(),
            "tenantId": TenantId::new().to_string(),
            "components": [],
        }));
        let response = run_sync(&reconciler, "req_t", Ok(Json(body))).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: SyncFailure = serde_json::from_slice(&bytes).unwrap();
        assert!(body.error_detail.contains("timeout"));

        assert!(store.find(machine, "gpu").unwrap().active);
        assert_eq!(store.stats().abandoned, 1);
    }

    #[tokio::test]
    async fn test_deadline_before_transaction_is_503() {
        let store = MemoryComponentStore::new();
        store.stall_loads();
        let reconciler = Reconciler::new(store.clone()).with_timeout(Duration::from_millis(50));

        let body = parse(json!({
            "machineId": MachineId::new().to_string(),
            "tenantId": TenantId::new().to_string(),
            "components": [{"name": "cpu", "type": "x86"}],
        }));
        let response = run_sync(&reconciler, "req_t", Ok(Json(body))).await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: SyncFailure = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.code, "store_unavailable");
        assert!(body.retryable);
        assert_eq!(store.stats().begins, 0);
    }

    #[test]
    fn test_legacy_aliases_require_prefixed_ids() {
        let err = serde_json::from_value::<SyncComponentsRequest>(json!({
            "fkServer": 42,
            "fkCompany": 7,
            "components": [],
        }));
        assert!(err.is_err());
    }
}
