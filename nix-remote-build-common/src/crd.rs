use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The single first-class persistent entity the proxy and the reconciler communicate
/// through. `spec` is written once by the proxy; `status` is owned entirely by the
/// reconciler and never touched by anything else.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "nixbuild.dev",
    version = "v1alpha1",
    kind = "WorkerRecord",
    plural = "workerrecords",
    namespaced,
    status = "WorkerRecordStatus",
    shortname = "wr"
)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRecordSpec {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<WorkerResources>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkerResources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_request: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_limit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_request: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum WorkerPhase {
    Pending,
    Creating,
    Running,
    Completed,
    Failed,
}

impl Default for WorkerPhase {
    fn default() -> Self {
        WorkerPhase::Pending
    }
}

impl WorkerPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerPhase::Completed | WorkerPhase::Failed)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRecordStatus {
    #[serde(default)]
    pub phase: WorkerPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "podIP")]
    pub pod_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub conditions: Vec<WorkerCondition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkerCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    pub last_transition_time: Time,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// The finalizer name applied to every `WorkerRecord` until its owned container is gone.
pub const CLEANUP_FINALIZER: &str = "cleanup";

pub const API_GROUP: &str = "nixbuild.dev";
pub const API_VERSION: &str = "v1alpha1";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_serializes_with_external_field_names() {
        let spec = WorkerRecordSpec {
            session_id: "abc123".to_string(),
            image: None,
            resources: None,
            timeout_seconds: Some(600),
            node_selector: None,
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["sessionId"], "abc123");
        assert_eq!(value["timeoutSeconds"], 600);
        assert!(value.get("session_id").is_none());
    }

    #[test]
    fn status_serializes_pod_ip_with_external_casing() {
        let status = WorkerRecordStatus {
            phase: WorkerPhase::Running,
            pod_name: Some("nix-builder-abc123".to_string()),
            pod_ip: Some("10.0.0.42".to_string()),
            ..Default::default()
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["podIP"], "10.0.0.42");
        assert_eq!(value["podName"], "nix-builder-abc123");
        assert!(value.get("pod_ip").is_none());
    }
}
