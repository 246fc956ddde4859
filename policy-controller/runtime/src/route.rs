use crate::{core::KUBE_SYSTEM_NAMESPACE, k8s::Job};
use k8s_openapi::Resource;
use kube::core::admission::Operation;

/// Determines whether an admission request is subject to the policy.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Route {
    Evaluate,
    Bypass(Bypass),
}

/// Why a request is admitted without evaluation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Bypass {
    /// The request targets the `kube-system` namespace.
    KubeSystem,

    /// The request is not the creation of a `batch` Job.
    OutOfScope,
}

pub(crate) fn classify(
    group: &str,
    kind: &str,
    operation: &Operation,
    namespace: Option<&str>,
) -> Route {
    if namespace == Some(KUBE_SYSTEM_NAMESPACE) {
        return Route::Bypass(Bypass::KubeSystem);
    }

    if group != Job::GROUP || kind != Job::KIND || !matches!(operation, Operation::Create) {
        return Route::Bypass(Bypass::OutOfScope);
    }

    Route::Evaluate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluates_job_creation() {
        assert_eq!(
            classify("batch", "Job", &Operation::Create, Some("default")),
            Route::Evaluate
        );
        assert_eq!(
            classify("batch", "Job", &Operation::Create, None),
            Route::Evaluate
        );
    }

    #[test]
    fn bypasses_kube_system() {
        assert_eq!(
            classify("batch", "Job", &Operation::Create, Some("kube-system")),
            Route::Bypass(Bypass::KubeSystem)
        );
        assert_eq!(
            classify("", "Pod", &Operation::Delete, Some("kube-system")),
            Route::Bypass(Bypass::KubeSystem)
        );
    }

    #[test]
    fn bypasses_other_resources() {
        for (group, kind) in [
            ("", "Pod"),
            ("apps", "Job"),
            ("batch", "CronJob"),
            ("batch", "job"),
        ] {
            assert_eq!(
                classify(group, kind, &Operation::Create, Some("default")),
                Route::Bypass(Bypass::OutOfScope),
                "{group}/{kind}"
            );
        }
    }

    #[test]
    fn bypasses_other_operations() {
        for op in [Operation::Update, Operation::Delete, Operation::Connect] {
            assert_eq!(
                classify("batch", "Job", &op, Some("default")),
                Route::Bypass(Bypass::OutOfScope),
                "{op:?}"
            );
        }
    }
}
