//! The subset of a Job's specification that the sandbox policy inspects.

use crate::Quantity;

/// A batch workload under admission review.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkloadSpec {
    /// The workload's name, when known. Used only to describe violations.
    pub name: Option<String>,
    pub active_deadline_seconds: Option<i64>,
    pub backoff_limit: Option<i32>,
    pub parallelism: Option<i32>,
    pub completions: Option<i32>,
    pub pod: PodSpec,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PodSpec {
    pub runtime_class_name: Option<String>,
    pub host_network: bool,
    pub host_ipc: bool,
    pub host_pid: bool,
    pub service_account_name: String,
    pub restart_policy: RestartPolicy,

    /// Names of the kernel parameters set by the pod's security context.
    pub sysctls: Vec<String>,
    pub volumes: Vec<Volume>,
    pub containers: Vec<Container>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum RestartPolicy {
    #[default]
    Always,
    OnFailure,
    Never,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Volume {
    pub name: String,
    pub source: VolumeSource,
}

/// Describes what backs a volume.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VolumeSource {
    Secret,

    /// Any other volume source, named by its field in the pod spec (e.g. `hostPath`).
    Other(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Container {
    pub name: String,
    pub security_context: Option<SecurityContext>,
    pub ports: Vec<ContainerPort>,
    pub env_from: Vec<EnvFromSource>,
    pub env: Vec<EnvVar>,
    pub volume_devices: Vec<VolumeDevice>,
    pub volume_mounts: Vec<VolumeMount>,
    pub resources: Resources,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SecurityContext {
    pub run_as_non_root: Option<bool>,
    pub allow_privilege_escalation: Option<bool>,
    pub privileged: Option<bool>,
    pub capabilities: Option<Capabilities>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub add: Vec<String>,
    pub drop: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContainerPort {
    pub name: Option<String>,
    pub container_port: i32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvFromSource {
    pub prefix: Option<String>,
    pub source: EnvSource,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EnvSource {
    ConfigMap,
    Secret,
    Unknown,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnvVar {
    pub name: String,
    pub value: Option<String>,
    pub value_from: Option<EnvVarSource>,
}

/// Where an environment variable's value is resolved from at runtime.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EnvVarSource {
    ConfigMapKey,
    SecretKey,
    Field,
    ResourceField,
    Unknown,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VolumeDevice {
    pub name: String,
    pub device_path: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Resources {
    pub requests: ResourceList,
    pub limits: ResourceList,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceList {
    pub cpu: Option<Quantity>,
    pub memory: Option<Quantity>,
}

// === impl WorkloadSpec ===

impl WorkloadSpec {
    /// Returns the workload's name, or `<unnamed>`.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }
}

// === impl RestartPolicy ===

impl RestartPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Always => "Always",
            Self::OnFailure => "OnFailure",
            Self::Never => "Never",
        }
    }
}

impl std::fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RestartPolicy {
    type Err = UnknownRestartPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Always" => Ok(Self::Always),
            "OnFailure" => Ok(Self::OnFailure),
            "Never" => Ok(Self::Never),
            _ => Err(UnknownRestartPolicy(s.to_string())),
        }
    }
}

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown restart policy: {0:?}")]
pub struct UnknownRestartPolicy(pub String);

