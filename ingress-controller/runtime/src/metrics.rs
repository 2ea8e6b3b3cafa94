use prometheus_client::{
    encoding::{EncodeLabelSet, EncodeLabelValue},
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

/// Counters for admission verdicts and reconcile outcomes.
#[derive(Clone, Debug)]
pub(crate) struct Metrics {
    admission_verdicts: Family<AdmissionLabels, Counter>,
    reconciles: Family<ReconcileLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct AdmissionLabels {
    kind: String,
    verdict: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ReconcileLabels {
    outcome: ReconcileOutcome,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub(crate) enum ReconcileOutcome {
    Success,
    Requeued,
    Dropped,
}

impl Metrics {
    pub(crate) fn register(registry: &mut Registry) -> Self {
        let admission_verdicts = Family::<AdmissionLabels, Counter>::default();
        registry.register(
            "admission_verdicts",
            "Admission review verdicts by object kind",
            admission_verdicts.clone(),
        );

        let reconciles = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "reconciles",
            "EventSource reconcile outcomes",
            reconciles.clone(),
        );

        Self {
            admission_verdicts,
            reconciles,
        }
    }

    pub(crate) fn observe_admission(&self, kind: &str, allowed: bool) {
        self.admission_verdicts
            .get_or_create(&AdmissionLabels {
                kind: kind.to_string(),
                verdict: if allowed { "allowed" } else { "denied" },
            })
            .inc();
    }

    pub(crate) fn observe_reconcile(&self, outcome: ReconcileOutcome) {
        self.reconciles
            .get_or_create(&ReconcileLabels { outcome })
            .inc();
    }
}
