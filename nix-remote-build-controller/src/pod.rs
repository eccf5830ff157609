use k8s_openapi::api::core::v1::Pod;
use kube::api::ObjectMeta;
use kube::api::OwnerReference;
use kube::{Api, Client, ResourceExt};
use nix_remote_build_common::crd::{WorkerRecord, WorkerResources};
use nix_remote_build_common::session::worker_container_name;
use serde_json::json;

use crate::config::ControllerConfig;

/// Translates the declarative `cpu`/`memory` request and limit strings into the cluster's
/// standard `ResourceRequirements` shape. Any field left unset in the spec is simply absent
/// from the manifest rather than defaulted, matching the CRD's "optional" contract.
fn resource_requirements(resources: &WorkerResources) -> serde_json::Value {
    let mut requests = serde_json::Map::new();
    let mut limits = serde_json::Map::new();

    if let Some(cpu) = &resources.cpu_request {
        requests.insert("cpu".to_string(), json!(cpu));
    }
    if let Some(memory) = &resources.memory_request {
        requests.insert("memory".to_string(), json!(memory));
    }
    if let Some(cpu) = &resources.cpu_limit {
        limits.insert("cpu".to_string(), json!(cpu));
    }
    if let Some(memory) = &resources.memory_limit {
        limits.insert("memory".to_string(), json!(memory));
    }

    json!({ "requests": requests, "limits": limits })
}

/// Builds (but does not submit) the Pod manifest for a `WorkerRecord`, the same
/// `serde_json::from_value(json!({...}))` idiom used to construct typed k8s objects
/// throughout the benchmark harness this controller's reconcile loop is modeled on.
pub fn build_pod(config: &ControllerConfig, record: &WorkerRecord) -> anyhow::Result<Pod> {
    let session_id = &record.spec.session_id;
    let name = worker_container_name(session_id);
    let image = record
        .spec
        .image
        .clone()
        .unwrap_or_else(|| config.builder_image.clone());

    let owner = OwnerReference {
        api_version: "nixbuild.dev/v1alpha1".to_string(),
        kind: "WorkerRecord".to_string(),
        name: record.name_any(),
        uid: record.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    };

    let mut volume_mounts = vec![json!({
        "name": "authorized-keys",
        "mountPath": "/home/nixbld/.ssh/authorized_keys",
        "subPath": "public",
        "readOnly": true,
    })];
    let mut volumes = vec![json!({
        "name": "authorized-keys",
        "secret": {
            "secretName": config.ssh_key_secret,
            "defaultMode": 0o644,
            "items": [{ "key": "authorized_keys", "path": "public" }],
        },
    })];

    if let Some(config_map) = &config.nix_config_map {
        volume_mounts.push(json!({
            "name": "nix-config",
            "mountPath": "/etc/nix/nix.conf",
            "subPath": "nix.conf",
            "readOnly": true,
        }));
        volumes.push(json!({
            "name": "nix-config",
            "configMap": { "name": config_map },
        }));
    }

    let resources = record.spec.resources.as_ref().map(resource_requirements);

    let mut pod: Pod = serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": name,
            "namespace": record.namespace(),
            "labels": {
                "app": "nix-builder",
                "nixbuild.dev/session-id": session_id,
                "nixbuild.dev/build-request": record.name_any(),
            },
        },
        "spec": {
            "restartPolicy": "Never",
            "activeDeadlineSeconds": record.spec.timeout_seconds,
            "nodeSelector": record.spec.node_selector,
            "containers": [{
                "name": "nix-builder",
                "image": image,
                "ports": [{ "containerPort": config.remote_port }],
                "volumeMounts": volume_mounts,
                "resources": resources,
            }],
            "volumes": volumes,
        },
    }))?;

    pod.metadata = ObjectMeta {
        owner_references: Some(vec![owner]),
        ..pod.metadata
    };

    Ok(pod)
}

pub async fn get(client: &Client, namespace: &str, name: &str) -> kube::Result<Option<Pod>> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    pods.get_opt(name).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix_remote_build_common::crd::WorkerRecordSpec;

    fn sample_record() -> WorkerRecord {
        let mut record = WorkerRecord::new(
            "build-abc123",
            WorkerRecordSpec {
                session_id: "abc123".to_string(),
                image: None,
                resources: None,
                timeout_seconds: Some(600),
                node_selector: None,
            },
        );
        record.metadata.namespace = Some("default".to_string());
        record
    }

    #[test]
    fn pod_name_is_deterministic_from_session_id() {
        let config = ControllerConfig::default();
        let record = sample_record();
        let pod = build_pod(&config, &record).expect("pod manifest builds");
        assert_eq!(pod.metadata.name.as_deref(), Some("nix-builder-abc123"));
    }

    #[test]
    fn pod_carries_session_labels() {
        let config = ControllerConfig::default();
        let record = sample_record();
        let pod = build_pod(&config, &record).expect("pod manifest builds");
        let labels = pod.metadata.labels.expect("labels present");
        assert_eq!(labels.get("nixbuild.dev/session-id"), Some(&"abc123".to_string()));
    }

    #[test]
    fn spec_resources_flow_into_container_requirements() {
        let config = ControllerConfig::default();
        let mut record = sample_record();
        record.spec.resources = Some(WorkerResources {
            cpu_request: Some("500m".to_string()),
            cpu_limit: Some("2".to_string()),
            memory_request: Some("256Mi".to_string()),
            memory_limit: Some("1Gi".to_string()),
        });
        let pod = build_pod(&config, &record).expect("pod manifest builds");
        let containers = pod.spec.expect("pod spec").containers;
        let resources = containers[0].resources.as_ref().expect("resources set");
        let requests = resources.requests.as_ref().expect("requests set");
        assert_eq!(requests.get("cpu").unwrap().0, "500m");
        let limits = resources.limits.as_ref().expect("limits set");
        assert_eq!(limits.get("memory").unwrap().0, "1Gi");
    }

    #[test]
    fn nix_config_map_adds_second_volume() {
        let mut config = ControllerConfig::default();
        config.nix_config_map = Some("nix-conf".to_string());
        let record = sample_record();
        let pod = build_pod(&config, &record).expect("pod manifest builds");
        let volumes = pod.spec.expect("pod spec").volumes.expect("volumes");
        assert_eq!(volumes.len(), 2);
    }
}
