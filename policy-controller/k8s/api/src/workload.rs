//! Converts `batch/v1` Job specs into the policy's workload model.

use crate::Quantity;
use k8s_openapi::api::{batch::v1::JobSpec, core::v1};
use sandbox_policy_controller_core::{
    quantity,
    workload::{
        Capabilities, Container, ContainerPort, EnvFromSource, EnvSource, EnvVar, EnvVarSource,
        PodSpec, ResourceList, Resources, RestartPolicy, SecurityContext, UnknownRestartPolicy,
        Volume, VolumeDevice, VolumeMount, VolumeSource,
    },
    WorkloadSpec,
};
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("job template is missing a pod spec")]
    MissingPodSpec,

    #[error(transparent)]
    RestartPolicy(#[from] UnknownRestartPolicy),

    #[error("container {container:?} has an invalid {resource} quantity: {source}")]
    Quantity {
        container: String,
        resource: &'static str,
        #[source]
        source: quantity::ParseError,
    },
}

/// Decodes a Job spec into a [`WorkloadSpec`].
///
/// `name` is the Job's name, if it has one.
pub fn decode(name: Option<String>, spec: JobSpec) -> Result<WorkloadSpec, DecodeError> {
    let pod = spec.template.spec.ok_or(DecodeError::MissingPodSpec)?;
    Ok(WorkloadSpec {
        name,
        active_deadline_seconds: spec.active_deadline_seconds,
        backoff_limit: spec.backoff_limit,
        parallelism: spec.parallelism,
        completions: spec.completions,
        pod: decode_pod(pod)?,
    })
}

fn decode_pod(pod: v1::PodSpec) -> Result<PodSpec, DecodeError> {
    let restart_policy = pod
        .restart_policy
        .as_deref()
        .map(str::parse::<RestartPolicy>)
        .transpose()?
        .unwrap_or_default();

    // `serviceAccount` is the deprecated alias of `serviceAccountName`.
    let service_account_name = pod
        .service_account_name
        .filter(|sa| !sa.is_empty())
        .or(pod.service_account)
        .unwrap_or_default();

    let sysctls = pod
        .security_context
        .and_then(|sc| sc.sysctls)
        .into_iter()
        .flatten()
        .map(|sysctl| sysctl.name)
        .collect();

    let containers = pod
        .containers
        .into_iter()
        .map(decode_container)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(PodSpec {
        runtime_class_name: pod.runtime_class_name,
        host_network: pod.host_network.unwrap_or(false),
        host_ipc: pod.host_ipc.unwrap_or(false),
        host_pid: pod.host_pid.unwrap_or(false),
        service_account_name,
        restart_policy,
        sysctls,
        volumes: pod
            .volumes
            .into_iter()
            .flatten()
            .map(decode_volume)
            .collect(),
        containers,
    })
}

fn decode_volume(volume: v1::Volume) -> Volume {
    let source = if volume.secret.is_some() {
        VolumeSource::Secret
    } else {
        let kind = if volume.empty_dir.is_some() {
            "emptyDir"
        } else if volume.host_path.is_some() {
            "hostPath"
        } else if volume.config_map.is_some() {
            "configMap"
        } else if volume.persistent_volume_claim.is_some() {
            "persistentVolumeClaim"
        } else if volume.projected.is_some() {
            "projected"
        } else if volume.downward_api.is_some() {
            "downwardAPI"
        } else if volume.csi.is_some() {
            "csi"
        } else if volume.ephemeral.is_some() {
            "ephemeral"
        } else if volume.nfs.is_some() {
            "nfs"
        } else {
            "an unrecognized source"
        };
        VolumeSource::Other(kind.to_string())
    };

    Volume {
        name: volume.name,
        source,
    }
}

fn decode_container(container: v1::Container) -> Result<Container, DecodeError> {
    let resources = container.resources.unwrap_or_default();
    let requests = resource_list(&container.name, resources.requests)?;
    let limits = resource_list(&container.name, resources.limits)?;

    Ok(Container {
        security_context: container.security_context.map(|sc| SecurityContext {
            run_as_non_root: sc.run_as_non_root,
            allow_privilege_escalation: sc.allow_privilege_escalation,
            privileged: sc.privileged,
            capabilities: sc.capabilities.map(|caps| Capabilities {
                add: caps.add.unwrap_or_default(),
                drop: caps.drop.unwrap_or_default(),
            }),
        }),
        ports: container
            .ports
            .into_iter()
            .flatten()
            .map(|port| ContainerPort {
                name: port.name,
                container_port: port.container_port,
            })
            .collect(),
        env_from: container
            .env_from
            .into_iter()
            .flatten()
            .map(|env| EnvFromSource {
                source: if env.config_map_ref.is_some() {
                    EnvSource::ConfigMap
                } else if env.secret_ref.is_some() {
                    EnvSource::Secret
                } else {
                    EnvSource::Unknown
                },
                prefix: env.prefix,
            })
            .collect(),
        env: container
            .env
            .into_iter()
            .flatten()
            .map(|env| EnvVar {
                name: env.name,
                value: env.value,
                value_from: env.value_from.map(|src| {
                    if src.config_map_key_ref.is_some() {
                        EnvVarSource::ConfigMapKey
                    } else if src.secret_key_ref.is_some() {
                        EnvVarSource::SecretKey
                    } else if src.field_ref.is_some() {
                        EnvVarSource::Field
                    } else if src.resource_field_ref.is_some() {
                        EnvVarSource::ResourceField
                    } else {
                        EnvVarSource::Unknown
                    }
                }),
            })
            .collect(),
        volume_devices: container
            .volume_devices
            .into_iter()
            .flatten()
            .map(|dev| VolumeDevice {
                name: dev.name,
                device_path: dev.device_path,
            })
            .collect(),
        volume_mounts: container
            .volume_mounts
            .into_iter()
            .flatten()
            .map(|mount| VolumeMount {
                name: mount.name,
                mount_path: mount.mount_path,
            })
            .collect(),
        resources: Resources { requests, limits },
        name: container.name,
    })
}

fn resource_list(
    container: &str,
    list: Option<BTreeMap<String, Quantity>>,
) -> Result<ResourceList, DecodeError> {
    let mut list = list.unwrap_or_default();
    let mut take = |resource: &'static str| {
        list.remove(resource)
            .map(|Quantity(q)| {
                q.parse().map_err(|source| DecodeError::Quantity {
                    container: container.to_string(),
                    resource,
                    source,
                })
            })
            .transpose()
    };

    Ok(ResourceList {
        cpu: take("cpu")?,
        memory: take("memory")?,
    })
}
