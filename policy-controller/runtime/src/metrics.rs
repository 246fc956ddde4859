use crate::core::RuleId;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

/// Counts admission reviews by outcome and denials by rule.
#[derive(Clone, Debug)]
pub struct AdmissionMetrics {
    reviews: Family<OutcomeLabels, Counter>,
    denials: Family<RuleLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct OutcomeLabels {
    outcome: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct RuleLabels {
    rule: &'static str,
}

// === impl AdmissionMetrics ===

impl AdmissionMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let reviews = Family::<OutcomeLabels, Counter>::default();
        reg.register(
            "reviews",
            "Total number of admission reviews handled, by outcome",
            reviews.clone(),
        );

        let denials = Family::<RuleLabels, Counter>::default();
        reg.register(
            "denials",
            "Total number of Jobs denied, by the first rule they violated",
            denials.clone(),
        );

        Self { reviews, denials }
    }

    pub(crate) fn allowed(&self) {
        self.outcome("allowed");
    }

    pub(crate) fn denied(&self, rule: RuleId) {
        self.outcome("denied");
        self.denials
            .get_or_create(&RuleLabels {
                rule: rule.as_str(),
            })
            .inc();
    }

    pub(crate) fn bypassed(&self) {
        self.outcome("bypassed");
    }

    pub(crate) fn decode_error(&self) {
        self.outcome("decode_error");
    }

    pub(crate) fn invalid(&self) {
        self.outcome("invalid");
    }

    fn outcome(&self, outcome: &'static str) {
        self.reviews.get_or_create(&OutcomeLabels { outcome }).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(reg: &Registry) -> String {
        let mut buf = String::new();
        prometheus_client::encoding::text::encode(&mut buf, reg).expect("metrics must encode");
        buf
    }

    #[test]
    fn counts_outcomes_and_rules() {
        let mut prom = Registry::default();
        let metrics =
            AdmissionMetrics::register(prom.sub_registry_with_prefix("sandbox_admission"));

        metrics.allowed();
        metrics.allowed();
        metrics.bypassed();
        metrics.denied(RuleId::ContainerCpu);

        let text = encode(&prom);
        assert!(
            text.contains(r#"sandbox_admission_reviews_total{outcome="allowed"} 2"#),
            "{text}"
        );
        assert!(
            text.contains(r#"sandbox_admission_reviews_total{outcome="bypassed"} 1"#),
            "{text}"
        );
        assert!(
            text.contains(r#"sandbox_admission_reviews_total{outcome="denied"} 1"#),
            "{text}"
        );
        assert!(
            text.contains(r#"sandbox_admission_denials_total{rule="container-cpu"} 1"#),
            "{text}"
        );
        assert!(!text.contains(r#"outcome="invalid""#), "{text}");
    }
}
