use std::collections::BTreeMap;

use crate::{
    datagram::Datagram,
    proto::{Label, Sample, TimeSeries, WriteRequest, LABEL_NAME},
};

/// Identity scheme of the process emitting metrics.
///
/// Exactly one scheme is used at a time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Identity {
    /// A process identified by the host it runs on and its process ID.
    Host {
        /// Host name.
        host: String,

        /// Process ID.
        pid: u32,
    },

    /// A process identified by its deployment and the slot it occupies within it.
    Deployment {
        /// Deployment name.
        deployment: String,

        /// Slot within the deployment.
        slot: String,
    },
}

/// Labels attached to every time series written by a sink.
///
/// Labels with empty values are omitted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DefaultLabels {
    application: String,
    subsystem: String,
    identity: Option<Identity>,
}

impl DefaultLabels {
    /// Creates a new `DefaultLabels` with the given application and subsystem, and no identity.
    pub fn new<A, S>(application: A, subsystem: S) -> Self
    where
        A: Into<String>,
        S: Into<String>,
    {
        DefaultLabels { application: application.into(), subsystem: subsystem.into(), identity: None }
    }

    /// Identifies the process by host and process ID.
    #[must_use]
    pub fn with_host<H>(mut self, host: H, pid: u32) -> Self
    where
        H: Into<String>,
    {
        self.identity = Some(Identity::Host { host: host.into(), pid });
        self
    }

    /// Identifies the process by deployment and slot.
    #[must_use]
    pub fn with_deployment<D, S>(mut self, deployment: D, slot: S) -> Self
    where
        D: Into<String>,
        S: Into<String>,
    {
        self.identity = Some(Identity::Deployment { deployment: deployment.into(), slot: slot.into() });
        self
    }

    fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("application", self.application.clone()), ("subsystem", self.subsystem.clone())];
        match &self.identity {
            Some(Identity::Host { host, pid }) => {
                pairs.push(("host", host.clone()));
                pairs.push(("pid", itoa::Buffer::new().format(*pid).to_string()));
            }
            Some(Identity::Deployment { deployment, slot }) => {
                pairs.push(("deployment", deployment.clone()));
                pairs.push(("slot", slot.clone()));
            }
            None => {}
        }

        pairs.retain(|(_, value)| !value.is_empty());
        pairs
    }
}

/// Converts aggregated datagrams into a remote write request.
///
/// Every datagram becomes one time series with a single sample. Its labels are built from, in order of increasing
/// precedence:
///
/// - the default labels
/// - every `name:value` tag, split at the first colon (tags without a colon are ignored)
/// - `__name__`, set to the sanitized metric name
#[derive(Clone, Debug, Default)]
pub struct Serializer {
    default_labels: Vec<(&'static str, String)>,
}

impl Serializer {
    /// Creates a new `Serializer`.
    pub fn new(default_labels: &DefaultLabels) -> Self {
        Serializer { default_labels: default_labels.pairs() }
    }

    /// Builds a write request where every sample is stamped with `timestamp_ms`.
    pub fn serialize(&self, datagrams: &[Datagram], timestamp_ms: i64) -> WriteRequest {
        let timeseries = datagrams
            .iter()
            .map(|datagram| TimeSeries {
                labels: self.labels(datagram),
                samples: vec![Sample { value: datagram.value(), timestamp: timestamp_ms }],
            })
            .collect();

        WriteRequest { timeseries, metadata: Vec::new() }
    }

    fn labels(&self, datagram: &Datagram) -> Vec<Label> {
        let mut labels = BTreeMap::new();
        for (name, value) in &self.default_labels {
            labels.insert((*name).to_string(), value.clone());
        }

        for (name, value) in datagram.tags().iter().filter_map(|tag| tag_label(tag)) {
            if name != LABEL_NAME {
                labels.insert(name, value.to_string());
            }
        }

        labels.insert(LABEL_NAME.to_string(), sanitize_metric_name(datagram.name()));

        labels.into_iter().map(|(name, value)| Label { name, value }).collect()
    }
}

/// Splits a `name:value` tag into a sanitized label name and its value.
fn tag_label(tag: &str) -> Option<(String, &str)> {
    let (name, value) = tag.split_once(':')?;
    if name.is_empty() || value.is_empty() {
        return None;
    }

    Some((sanitize_metric_name(name), value))
}

/// Sanitizes a name so that it is a valid Prometheus metric or label name.
///
/// Every character outside of `[A-Za-z0-9_]` is replaced with an underscore, and a leading digit is prefixed with one.
pub fn sanitize_metric_name(name: &str) -> String {
    let mut sanitized = String::with_capacity(name.len() + 1);
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        sanitized.push('_');
    }

    sanitized.extend(name.chars().map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' }));
    sanitized
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use prost::Message as _;

    use super::{sanitize_metric_name, DefaultLabels, Serializer};
    use crate::{
        aggregator::Aggregator,
        datagram::Datagram,
        proto::{WriteRequest, LABEL_NAME},
    };

    fn labels_of(serializer: &Serializer, line: &str) -> Vec<(String, String)> {
        let request = serializer.serialize(&[Datagram::parse(line).unwrap()], 0);
        request.timeseries[0].labels.iter().map(|label| (label.name.clone(), label.value.clone())).collect()
    }

    fn pairs(expected: &[(&str, &str)]) -> Vec<(String, String)> {
        expected.iter().map(|(name, value)| ((*name).to_string(), (*value).to_string())).collect()
    }

    #[test]
    fn sanitizes_names() {
        assert_eq!(sanitize_metric_name("foo"), "foo");
        assert_eq!(sanitize_metric_name("fo|o"), "fo_o");
        assert_eq!(sanitize_metric_name("fo@o"), "fo_o");
        assert_eq!(sanitize_metric_name("fo:o"), "fo_o");
        assert_eq!(sanitize_metric_name("foo.sum_95"), "foo_sum_95");
        assert_eq!(sanitize_metric_name("1xx"), "_1xx");
    }

    #[test]
    fn labels_from_tags() {
        let serializer = Serializer::default();
        assert_eq!(
            labels_of(&serializer, "foo:1|c|#lab1:1,plain,class:Module1::Module2"),
            pairs(&[(LABEL_NAME, "foo"), ("class", "Module1::Module2"), ("lab1", "1")])
        );
    }

    #[test]
    fn tag_labels_override_defaults_but_not_the_name() {
        let defaults = DefaultLabels::new("web", "checkout").with_host("web-1", 42);
        let serializer = Serializer::new(&defaults);
        assert_eq!(
            labels_of(&serializer, "foo.bar:1|g|#subsystem:payments,__name__:nope"),
            pairs(&[
                (LABEL_NAME, "foo_bar"),
                ("application", "web"),
                ("host", "web-1"),
                ("pid", "42"),
                ("subsystem", "payments"),
            ])
        );
    }

    #[test]
    fn deployment_identity() {
        let defaults = DefaultLabels::new("web", "").with_deployment("prod", "3");
        let serializer = Serializer::new(&defaults);
        assert_eq!(
            labels_of(&serializer, "foo:1|c"),
            pairs(&[(LABEL_NAME, "foo"), ("application", "web"), ("deployment", "prod"), ("slot", "3")])
        );
    }

    #[test]
    fn survives_encoding() {
        let packet = "foo:1|c|#a:b,plain\nfoo:2|c|#a:b,plain\nbar:5|g\nbaz:3|ms|#host:abc\nbaz:12|ms|#host:abc";
        let aggregation = Aggregator::new(vec![95.0], vec![10.0]).aggregate(packet);
        let serializer = Serializer::new(&DefaultLabels::new("web", "checkout"));
        let body = serializer.serialize(&aggregation.datagrams, 1_700_000_000_000).encode_compressed().unwrap();

        let decompressed = snap::raw::Decoder::new().decompress_vec(&body).unwrap();
        let decoded = WriteRequest::decode(decompressed.as_slice()).unwrap();
        let actual = decoded
            .timeseries
            .iter()
            .map(|series| {
                assert_eq!(series.samples.len(), 1);
                assert_eq!(series.samples[0].timestamp, 1_700_000_000_000);
                let labels = series.labels.iter().map(|l| (l.name.clone(), l.value.clone())).collect::<Vec<_>>();
                (labels, series.samples[0].value)
            })
            .collect::<Vec<_>>();

        let expected = aggregation
            .datagrams
            .iter()
            .map(|datagram| {
                let mut labels = BTreeMap::from([
                    ("application".to_string(), "web".to_string()),
                    ("subsystem".to_string(), "checkout".to_string()),
                    (LABEL_NAME.to_string(), sanitize_metric_name(datagram.name())),
                ]);
                for (name, value) in datagram.tags().iter().filter_map(|tag| tag.split_once(':')) {
                    labels.insert(name.to_string(), value.to_string());
                }
                (labels.into_iter().collect::<Vec<_>>(), datagram.value())
            })
            .collect::<Vec<_>>();

        assert_eq!(actual, expected);
        assert_eq!(
            actual[0],
            (pairs(&[(LABEL_NAME, "foo_total"), ("a", "b"), ("application", "web"), ("subsystem", "checkout")]), 3.0)
        );
        assert!(actual.iter().any(|(labels, _)| labels.contains(&("le".to_string(), "+Inf".to_string()))));
    }
}
