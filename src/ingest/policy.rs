//! Metric namespace classification for BIRTH handling.

use crate::config::IngestConfig;
use crate::ingest::SkipReason;

/// How a BIRTH metric name is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricClass {
    /// Relation is pre-created.
    Visible,
    Internal,
    Sequence,
    /// Outside every visible namespace.
    Unlisted,
}

impl MetricClass {
    /// Reason to skip a metric of this class, `None` for visible metrics.
    pub fn skip_reason(self) -> Option<SkipReason> {
        match self {
            Self::Visible => None,
            Self::Internal => Some(SkipReason::Internal),
            Self::Sequence => Some(SkipReason::SequenceMetric),
            Self::Unlisted => Some(SkipReason::NotVisible),
        }
    }
}

/// Namespace prefixes deciding which BIRTH metrics get relations.
///
/// Internal prefixes and the sequence metric take precedence over visible
/// prefixes. An empty visible list makes every other metric visible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespacePolicy {
    visible_prefixes: Vec<String>,
    internal_prefixes: Vec<String>,
    sequence_metric: String,
}

impl Default for NamespacePolicy {
    fn default() -> Self {
        Self::from_config(&IngestConfig::default())
    }
}

impl NamespacePolicy {
    pub fn new(
        visible_prefixes: Vec<String>,
        internal_prefixes: Vec<String>,
        sequence_metric: impl Into<String>,
    ) -> Self {
        Self {
            visible_prefixes,
            internal_prefixes,
            sequence_metric: sequence_metric.into(),
        }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(
            config.visible_prefixes.clone(),
            config.internal_prefixes.clone(),
            config.sequence_metric.clone(),
        )
    }

    pub fn classify(&self, metric_name: &str) -> MetricClass {
        if metric_name == self.sequence_metric {
            return MetricClass::Sequence;
        }
        if self
            .internal_prefixes
            .iter()
            .any(|p| metric_name.starts_with(p.as_str()))
        {
            return MetricClass::Internal;
        }
        if self.visible_prefixes.is_empty()
            || self
                .visible_prefixes
                .iter()
                .any(|p| metric_name.starts_with(p.as_str()))
        {
            return MetricClass::Visible;
        }
        MetricClass::Unlisted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_classification() {
        let policy = NamespacePolicy::default();
        assert_eq!(policy.classify("Inputs/Temperature"), MetricClass::Visible);
        assert_eq!(policy.classify("bdSeq"), MetricClass::Sequence);
        assert_eq!(policy.classify("Node Control/Rebirth"), MetricClass::Internal);
        assert_eq!(policy.classify("Device Control/Reboot"), MetricClass::Internal);
        assert_eq!(policy.classify("Properties/Hardware"), MetricClass::Internal);
        assert_eq!(policy.classify("Outputs/Relay"), MetricClass::Unlisted);
        assert_eq!(policy.classify("temperature"), MetricClass::Unlisted);
    }

    #[test]
    fn test_empty_visible_list_admits_everything_else() {
        let policy = NamespacePolicy::new(vec![], vec!["Properties/".to_string()], "bdSeq");
        assert_eq!(policy.classify("temperature"), MetricClass::Visible);
        assert_eq!(policy.classify("Properties/FW"), MetricClass::Internal);
        assert_eq!(policy.classify("bdSeq"), MetricClass::Sequence);
    }

    #[test]
    fn test_skip_reasons() {
        assert_eq!(MetricClass::Visible.skip_reason(), None);
        assert_eq!(MetricClass::Sequence.skip_reason(), Some(SkipReason::SequenceMetric));
        assert_eq!(MetricClass::Unlisted.skip_reason(), Some(SkipReason::NotVisible));
    }
}
