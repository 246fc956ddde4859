#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use sandbox_policy_controller_core as core;
pub use sandbox_policy_controller_k8s_api as k8s;

mod admission;
mod args;
mod metrics;
mod route;

pub use self::{
    admission::{Admission, DecodeFailure},
    args::Args,
    metrics::AdmissionMetrics,
};
