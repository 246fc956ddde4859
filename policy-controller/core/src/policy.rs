//! The sandbox admission policy.
//!
//! A workload is checked against a fixed, ordered table of rules. Evaluation
//! stops at the first violated rule and the verdict carries that rule's
//! message; later rules are not evaluated.

use crate::{
    workload::{Container, RestartPolicy, VolumeSource, WorkloadSpec},
    Quantity,
};
use anyhow::{bail, ensure, Context, Result};
use std::{fmt, str::FromStr};


/// Process-wide policy parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyConfig {
    /// The RuntimeClass every workload must run under.
    pub expected_runtime_class: String,
    pub volumes: VolumePolicy,
}

/// Controls which pod volumes are admitted.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum VolumePolicy {
    /// No volumes of any kind may be declared.
    #[default]
    DenyAll,

    /// Only secret-backed volumes may be declared.
    SecretsOnly,
}

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid volume policy {0:?}: expected 'deny-all' or 'secrets-only'")]
pub struct InvalidVolumePolicy(String);

/// The outcome of evaluating a workload.
#[derive(Clone, Debug, PartialEq, Eq)]
#[must_use]
pub struct Verdict(Option<Violation>);

/// The first rule a workload failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    pub rule: RuleId,
    pub reason: String,
}

/// Identifies a rule in the policy table.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RuleId {
    ActiveDeadline,
    BackoffLimit,
    Parallelism,
    Completions,
    RuntimeClass,
    HostNamespaces,
    ServiceAccount,
    RestartPolicy,
    Sysctls,
    ContainerSecurityContext,
    ContainerRunAsNonRoot,
    ContainerPrivilegeEscalation,
    ContainerPrivileged,
    ContainerCapabilities,
    ContainerPorts,
    ContainerEnvFrom,
    ContainerEnvValueFrom,
    ContainerVolumeDevices,
    ContainerVolumeMounts,
    ContainerCpu,
    ContainerMemory,
    Volumes,
}

type WorkloadCheck = fn(&WorkloadSpec, &PolicyConfig) -> Result<()>;
type ContainerCheck = fn(&Container) -> Result<()>;

/// Checked, in order, before any container is inspected.
const WORKLOAD_RULES: &[(RuleId, WorkloadCheck)] = &[
    (RuleId::ActiveDeadline, active_deadline),
    (RuleId::BackoffLimit, backoff_limit),
    (RuleId::Parallelism, parallelism),
    (RuleId::Completions, completions),
    (RuleId::RuntimeClass, runtime_class),
    (RuleId::HostNamespaces, host_namespaces),
    (RuleId::ServiceAccount, service_account),
    (RuleId::RestartPolicy, restart_policy),
    (RuleId::Sysctls, sysctls),
];

/// Checked, in order, against each container in declaration order.
const CONTAINER_RULES: &[(RuleId, ContainerCheck)] = &[
    (RuleId::ContainerSecurityContext, security_context),
    (RuleId::ContainerRunAsNonRoot, run_as_non_root),
    (RuleId::ContainerPrivilegeEscalation, privilege_escalation),
    (RuleId::ContainerPrivileged, privileged),
    (RuleId::ContainerCapabilities, capabilities),
    (RuleId::ContainerPorts, ports),
    (RuleId::ContainerEnvFrom, env_from),
    (RuleId::ContainerEnvValueFrom, env_value_from),
    (RuleId::ContainerVolumeDevices, volume_devices),
    (RuleId::ContainerVolumeMounts, volume_mounts),
    (RuleId::ContainerCpu, cpu),
    (RuleId::ContainerMemory, memory),
];

/// Checked after every container has passed.
const POD_RULES: &[(RuleId, WorkloadCheck)] = &[(RuleId::Volumes, volumes)];

/// Evaluates `workload` against the sandbox policy.
///
/// The result depends only on the arguments: evaluating the same workload
/// under the same configuration always yields the same verdict.
pub fn evaluate(workload: &WorkloadSpec, config: &PolicyConfig) -> Verdict {
    let workload_checks = WORKLOAD_RULES
        .iter()
        .map(|&(rule, check)| (rule, check(workload, config)));

    let container_checks = workload.pod.containers.iter().flat_map(|container| {
        CONTAINER_RULES.iter().map(move |&(rule, check)| {
            let res = check(container).with_context(|| format!("container {:?}", container.name));
            (rule, res)
        })
    });

    let pod_checks = POD_RULES
        .iter()
        .map(|&(rule, check)| (rule, check(workload, config)));

    // The chain is lazy, so no rule after the first violation is evaluated.
    workload_checks
        .chain(container_checks)
        .chain(pod_checks)
        .find_map(|(rule, res)| {
            res.err().map(|error| Violation {
                rule,
                reason: format!("{error:#}"),
            })
        })
        .map_or_else(Verdict::allow, Verdict::from)
}

// === Workload rules ===

fn active_deadline(workload: &WorkloadSpec, _: &PolicyConfig) -> Result<()> {
    ensure!(
        matches!(workload.active_deadline_seconds, Some(secs) if secs != 0),
        "activeDeadlineSeconds must be set"
    );
    Ok(())
}

fn backoff_limit(workload: &WorkloadSpec, _: &PolicyConfig) -> Result<()> {
    ensure!(
        workload.backoff_limit == Some(1),
        "backoffLimit must be set to 1"
    );
    Ok(())
}

fn parallelism(workload: &WorkloadSpec, _: &PolicyConfig) -> Result<()> {
    if let Some(n) = workload.parallelism {
        ensure!(n == 1, "parallelism must not be used (found {n})");
    }
    Ok(())
}

fn completions(workload: &WorkloadSpec, _: &PolicyConfig) -> Result<()> {
    if let Some(n) = workload.completions {
        ensure!(n == 1, "completions must not be used (found {n})");
    }
    Ok(())
}

fn runtime_class(workload: &WorkloadSpec, config: &PolicyConfig) -> Result<()> {
    let expected = &config.expected_runtime_class;
    match workload.pod.runtime_class_name.as_deref() {
        Some(class) if class == expected => Ok(()),
        Some(class) => bail!(
            "wrong runtimeClassName {class:?} is set for job {}, must be {expected:?}",
            workload.display_name(),
        ),
        None => bail!(
            "runtimeClassName is not set for job {}, must be {expected:?}",
            workload.display_name(),
        ),
    }
}

fn host_namespaces(workload: &WorkloadSpec, _: &PolicyConfig) -> Result<()> {
    let pod = &workload.pod;
    ensure!(!pod.host_network, "hostNetwork must be false");
    ensure!(!pod.host_ipc, "hostIPC must be false");
    ensure!(!pod.host_pid, "hostPID must be false");
    Ok(())
}

fn service_account(workload: &WorkloadSpec, _: &PolicyConfig) -> Result<()> {
    ensure!(
        workload.pod.service_account_name.is_empty(),
        "serviceAccountName must not be set"
    );
    Ok(())
}

fn restart_policy(workload: &WorkloadSpec, _: &PolicyConfig) -> Result<()> {
    let policy = workload.pod.restart_policy;
    ensure!(
        policy == RestartPolicy::Never,
        "job is not allowed to restart: restartPolicy must be Never, not {policy}"
    );
    Ok(())
}

fn sysctls(workload: &WorkloadSpec, _: &PolicyConfig) -> Result<()> {
    ensure!(workload.pod.sysctls.is_empty(), "sysctls must be empty");
    Ok(())
}

fn volumes(workload: &WorkloadSpec, config: &PolicyConfig) -> Result<()> {
    let volumes = &workload.pod.volumes;
    match config.volumes {
        VolumePolicy::DenyAll => {
            ensure!(
                volumes.is_empty(),
                "volumes must not be declared ({} found)",
                volumes.len()
            );
        }
        VolumePolicy::SecretsOnly => {
            for volume in volumes {
                if let VolumeSource::Other(kind) = &volume.source {
                    bail!(
                        "volume {:?} must be backed by a secret, not {kind}",
                        volume.name
                    );
                }
            }
        }
    }
    Ok(())
}

// === Container rules ===

fn security_context(container: &Container) -> Result<()> {
    ensure!(
        container.security_context.is_some(),
        "securityContext must be set"
    );
    Ok(())
}

fn run_as_non_root(container: &Container) -> Result<()> {
    let sc = container.security_context.as_ref();
    ensure!(
        sc.and_then(|sc| sc.run_as_non_root) == Some(true),
        "runAsNonRoot must be set to true"
    );
    Ok(())
}

fn privilege_escalation(container: &Container) -> Result<()> {
    let sc = container.security_context.as_ref();
    ensure!(
        sc.and_then(|sc| sc.allow_privilege_escalation) == Some(false),
        "allowPrivilegeEscalation must be set to false"
    );
    Ok(())
}

fn privileged(container: &Container) -> Result<()> {
    let sc = container.security_context.as_ref();
    ensure!(
        sc.and_then(|sc| sc.privileged) == Some(false),
        "privileged must be set to false"
    );
    Ok(())
}

fn capabilities(container: &Container) -> Result<()> {
    let Some(caps) = container
        .security_context
        .as_ref()
        .and_then(|sc| sc.capabilities.as_ref())
    else {
        bail!("capabilities must be set and drop 'all'");
    };
    ensure!(
        matches!(caps.drop.as_slice(), [only] if only == "all"),
        "capabilities must drop 'all' and nothing else (found {:?})",
        caps.drop
    );
    ensure!(
        caps.add.is_empty(),
        "capabilities must not be added (found {:?})",
        caps.add
    );
    Ok(())
}

fn ports(container: &Container) -> Result<()> {
    ensure!(container.ports.is_empty(), "ports must not be declared");
    Ok(())
}

fn env_from(container: &Container) -> Result<()> {
    ensure!(container.env_from.is_empty(), "envFrom must not be used");
    Ok(())
}

fn env_value_from(container: &Container) -> Result<()> {
    if let Some(env) = container.env.iter().find(|env| env.value_from.is_some()) {
        bail!("env {:?} must not use valueFrom", env.name);
    }
    Ok(())
}

fn volume_devices(container: &Container) -> Result<()> {
    ensure!(
        container.volume_devices.is_empty(),
        "volumeDevices are not supported"
    );
    Ok(())
}

fn volume_mounts(container: &Container) -> Result<()> {
    ensure!(
        container.volume_mounts.is_empty(),
        "volumeMounts are not supported"
    );
    Ok(())
}

fn cpu(container: &Container) -> Result<()> {
    let res = &container.resources;
    guaranteed("cpu", res.requests.cpu.as_ref(), res.limits.cpu.as_ref())
}

fn memory(container: &Container) -> Result<()> {
    let res = &container.resources;
    guaranteed(
        "memory",
        res.requests.memory.as_ref(),
        res.limits.memory.as_ref(),
    )
}

/// Requires that a resource's requests and limits are set, non-zero, and equal.
fn guaranteed(
    resource: &str,
    requests: Option<&Quantity>,
    limits: Option<&Quantity>,
) -> Result<()> {
    let (Some(requests), Some(limits)) = (requests, limits) else {
        bail!("{resource} requests and limits must be set");
    };
    ensure!(
        !requests.is_zero() && !limits.is_zero(),
        "{resource} requests and limits must be set"
    );
    ensure!(
        requests == limits,
        "{resource} requests ({requests}) must be equal to limits ({limits})"
    );
    Ok(())
}

// === impl PolicyConfig ===

impl PolicyConfig {
    pub fn new(expected_runtime_class: impl Into<String>) -> Self {
        Self {
            expected_runtime_class: expected_runtime_class.into(),
            volumes: VolumePolicy::default(),
        }
    }

    pub fn with_volumes(self, volumes: VolumePolicy) -> Self {
        Self { volumes, ..self }
    }

    #[inline]
    pub fn evaluate(&self, workload: &WorkloadSpec) -> Verdict {
        evaluate(workload, self)
    }
}

// === impl VolumePolicy ===

impl VolumePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DenyAll => "deny-all",
            Self::SecretsOnly => "secrets-only",
        }
    }
}

impl fmt::Display for VolumePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VolumePolicy {
    type Err = InvalidVolumePolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deny-all" => Ok(Self::DenyAll),
            "secrets-only" => Ok(Self::SecretsOnly),
            s => Err(InvalidVolumePolicy(s.to_string())),
        }
    }
}

// === impl Verdict ===

impl Verdict {
    pub fn allow() -> Self {
        Self(None)
    }

    #[inline]
    pub fn is_allowed(&self) -> bool {
        self.0.is_none()
    }

    /// The message of the violated rule, if the workload was denied.
    pub fn reason(&self) -> Option<&str> {
        self.0.as_ref().map(|v| v.reason.as_str())
    }

    pub fn rule(&self) -> Option<RuleId> {
        self.0.as_ref().map(|v| v.rule)
    }

    pub fn into_violation(self) -> Option<Violation> {
        self.0
    }
}

impl From<Violation> for Verdict {
    fn from(violation: Violation) -> Self {
        Self(Some(violation))
    }
}

// === impl RuleId ===

impl RuleId {
    /// Every rule, in evaluation order.
    pub const ALL: [RuleId; 22] = [
        Self::ActiveDeadline,
        Self::BackoffLimit,
        Self::Parallelism,
        Self::Completions,
        Self::RuntimeClass,
        Self::HostNamespaces,
        Self::ServiceAccount,
        Self::RestartPolicy,
        Self::Sysctls,
        Self::ContainerSecurityContext,
        Self::ContainerRunAsNonRoot,
        Self::ContainerPrivilegeEscalation,
        Self::ContainerPrivileged,
        Self::ContainerCapabilities,
        Self::ContainerPorts,
        Self::ContainerEnvFrom,
        Self::ContainerEnvValueFrom,
        Self::ContainerVolumeDevices,
        Self::ContainerVolumeMounts,
        Self::ContainerCpu,
        Self::ContainerMemory,
        Self::Volumes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ActiveDeadline => "active-deadline",
            Self::BackoffLimit => "backoff-limit",
            Self::Parallelism => "parallelism",
            Self::Completions => "completions",
            Self::RuntimeClass => "runtime-class",
            Self::HostNamespaces => "host-namespaces",
            Self::ServiceAccount => "service-account",
            Self::RestartPolicy => "restart-policy",
            Self::Sysctls => "sysctls",
            Self::ContainerSecurityContext => "container-security-context",
            Self::ContainerRunAsNonRoot => "container-run-as-non-root",
            Self::ContainerPrivilegeEscalation => "container-privilege-escalation",
            Self::ContainerPrivileged => "container-privileged",
            Self::ContainerCapabilities => "container-capabilities",
            Self::ContainerPorts => "container-ports",
            Self::ContainerEnvFrom => "container-env-from",
            Self::ContainerEnvValueFrom => "container-env-value-from",
            Self::ContainerVolumeDevices => "container-volume-devices",
            Self::ContainerVolumeMounts => "container-volume-mounts",
            Self::ContainerCpu => "container-cpu",
            Self::ContainerMemory => "container-memory",
            Self::Volumes => "volumes",
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
