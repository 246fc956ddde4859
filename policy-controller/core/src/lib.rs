#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod policy;
pub mod quantity;
pub mod workload;

pub use self::{
    policy::{evaluate, PolicyConfig, RuleId, Verdict, Violation, VolumePolicy},
    quantity::Quantity,
    workload::WorkloadSpec,
};

/// The namespace that is always exempt from the sandbox policy.
pub const KUBE_SYSTEM_NAMESPACE: &str = "kube-system";

/// The status reason attached to denied admission responses.
pub const DENIED_STATUS_REASON: &str = "Unauthorized";
