#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod workload;

pub use self::workload::DecodeError;
pub use k8s_openapi::{
    api::batch::v1::{Job, JobSpec},
    apimachinery::pkg::api::resource::Quantity,
};
