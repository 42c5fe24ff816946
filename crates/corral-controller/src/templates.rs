//! Workload and cleanup job manifests for a replica

use crate::error::Result;
use corral_core::k8s_openapi::api::batch::v1::JobSpec;
use corral_core::k8s_openapi::api::core::v1::{
    Affinity, Container, HostPathVolumeSource, PodAffinityTerm, PodAntiAffinity, PodSpec,
    PodTemplateSpec, SecurityContext, Volume, VolumeMount, WeightedPodAffinityTerm,
};
use corral_core::k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use corral_core::{new_controller_ref, Job, ObjectMeta, Pod, Replica};
use std::collections::BTreeMap;

/// Label carrying the volume a replica workload belongs to
pub const VOLUME_REPLICA_LABEL: &str = "longhorn-volume-replica";
/// Address the replica process listens on
pub const REPLICA_LISTEN_ADDRESS: &str = "0.0.0.0:9502";
/// Mount point of the replica data directory inside containers
pub const VOLUME_MOUNT_PATH: &str = "/volume";
/// Topology key used to spread replicas of one volume across hosts
pub const HOSTNAME_TOPOLOGY_KEY: &str = "kubernetes.io/hostname";

const VOLUME_NAME: &str = "volume";
const CLEANUP_SCRIPT: &str = "sleep 1 && rm -f /volume/*";

/// Host directory holding the data of replica `name`
pub fn replica_volume_directory(data_directory: &str, name: &str) -> String {
    format!("{}/replicas/{}", data_directory.trim_end_matches('/'), name)
}

fn volume_label(replica: &Replica) -> BTreeMap<String, String> {
    BTreeMap::from([(
        VOLUME_REPLICA_LABEL.to_string(),
        replica.spec.volume_name.clone(),
    )])
}

fn data_volume(replica: &Replica, data_directory: &str) -> Volume {
    Volume {
        name: VOLUME_NAME.to_string(),
        host_path: Some(HostPathVolumeSource {
            path: replica_volume_directory(data_directory, replica.name()),
            type_: None,
        }),
        ..Default::default()
    }
}

fn data_mount() -> VolumeMount {
    VolumeMount {
        name: VOLUME_NAME.to_string(),
        mount_path: VOLUME_MOUNT_PATH.to_string(),
        ..Default::default()
    }
}

/// Command line of the replica process
pub fn replica_command(replica: &Replica) -> Vec<String> {
    let mut cmd: Vec<String> = vec![
        "launch".into(),
        "replica".into(),
        "--listen".into(),
        REPLICA_LISTEN_ADDRESS.into(),
        "--size".into(),
        replica.spec.volume_size.clone(),
    ];
    if let Some((from, name)) = replica.restore_source() {
        cmd.extend([
            "--restore-from".to_string(),
            from.to_string(),
            "--restore-name".to_string(),
            name.to_string(),
        ]);
    }
    cmd.push(VOLUME_MOUNT_PATH.to_string());
    cmd
}

/// Pod running the replica process, controlled by the replica
///
/// The first placement is left to the scheduler with a soft preference to
/// keep replicas of the same volume on different hosts. Once `nodeID` is
/// known the pod is pinned there, since the data lives on that host.
pub fn pod_template(replica: &Replica, data_directory: &str) -> Result<Pod> {
    let labels = volume_label(replica);

    let mut spec = PodSpec {
        restart_policy: Some("Never".to_string()),
        containers: vec![Container {
            name: replica.name().to_string(),
            image: Some(replica.spec.engine_image.clone()),
            command: Some(replica_command(replica)),
            security_context: Some(SecurityContext {
                privileged: Some(true),
                ..Default::default()
            }),
            volume_mounts: Some(vec![data_mount()]),
            ..Default::default()
        }],
        volumes: Some(vec![data_volume(replica, data_directory)]),
        ..Default::default()
    };

    if replica.is_placed() {
        spec.node_name = Some(replica.spec.node_id.clone());
    } else {
        spec.affinity = Some(Affinity {
            pod_anti_affinity: Some(PodAntiAffinity {
                preferred_during_scheduling_ignored_during_execution: Some(vec![
                    WeightedPodAffinityTerm {
                        weight: 100,
                        pod_affinity_term: PodAffinityTerm {
                            label_selector: Some(LabelSelector {
                                match_labels: Some(labels.clone()),
                                ..Default::default()
                            }),
                            topology_key: HOSTNAME_TOPOLOGY_KEY.to_string(),
                            ..Default::default()
                        },
                    },
                ]),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    Ok(Pod {
        metadata: ObjectMeta {
            name: Some(replica.name().to_string()),
            namespace: Some(replica.namespace().to_string()),
            labels: Some(labels),
            owner_references: Some(vec![new_controller_ref(replica)?]),
            ..Default::default()
        },
        spec: Some(spec),
        status: None,
    })
}

/// One-shot job wiping the replica data directory on its node
pub fn cleanup_job(replica: &Replica, data_directory: &str) -> Result<Job> {
    let pod_name = format!("cleanup-{}", replica.name());

    Ok(Job {
        metadata: ObjectMeta {
            name: Some(replica.name().to_string()),
            namespace: Some(replica.namespace().to_string()),
            owner_references: Some(vec![new_controller_ref(replica)?]),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(1),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    name: Some(pod_name.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    node_name: Some(replica.spec.node_id.clone()),
                    restart_policy: Some("Never".to_string()),
                    containers: vec![Container {
                        name: pod_name,
                        image: Some(replica.spec.engine_image.clone()),
                        command: Some(vec!["/bin/bash".to_string(), "-c".to_string()]),
                        args: Some(vec![CLEANUP_SCRIPT.to_string()]),
                        volume_mounts: Some(vec![data_mount()]),
                        ..Default::default()
                    }],
                    volumes: Some(vec![data_volume(replica, data_directory)]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    })
}
