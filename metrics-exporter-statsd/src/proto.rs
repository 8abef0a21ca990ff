//! Prometheus remote write message types.
//!
//! Only the subset of `prompb` needed to push samples is defined here.

/// Special label for the name of a metric.
pub const LABEL_NAME: &str = "__name__";

/// Content type of a remote write request body, before compression.
pub const CONTENT_TYPE: &str = "application/x-protobuf";

/// Content encoding of a remote write request body.
pub const CONTENT_ENCODING: &str = "snappy";

/// Header carrying the remote write protocol version.
pub const HEADER_NAME_REMOTE_WRITE_VERSION: &str = "X-Prometheus-Remote-Write-Version";

/// Remote write protocol version spoken by this crate.
pub const REMOTE_WRITE_VERSION_01: &str = "0.1.0";

/// A write request.
///
/// .proto:
/// ```protobuf
/// message WriteRequest {
///   repeated TimeSeries timeseries = 1;
///   reserved  2;
///   repeated MetricMetadata metadata = 3;
/// }
/// ```
#[derive(prost::Message, Clone, PartialEq)]
pub struct WriteRequest {
    /// Time series to write.
    #[prost(message, repeated, tag = "1")]
    pub timeseries: Vec<TimeSeries>,

    /// Metric metadata. Never populated by this crate, but kept so that decoded requests round-trip.
    #[prost(message, repeated, tag = "3")]
    pub metadata: Vec<MetricMetadata>,
}

impl WriteRequest {
    /// Sorts the labels and samples of every series, as remote write receivers expect.
    fn sorted(mut self) -> Self {
        for series in &mut self.timeseries {
            series.sort_labels_and_samples();
        }
        self
    }

    /// Encodes this write request as a protobuf message.
    pub fn encode_proto3(self) -> Vec<u8> {
        prost::Message::encode_to_vec(&self.sorted())
    }

    /// Encodes this write request as a snappy-compressed protobuf message.
    ///
    /// Remote write endpoints only accept the raw (unframed) snappy format.
    ///
    /// # Errors
    ///
    /// If compression fails, an error is returned.
    pub fn encode_compressed(self) -> Result<Vec<u8>, snap::Error> {
        snap::raw::Encoder::new().compress_vec(&self.encode_proto3())
    }
}

/// A time series.
///
/// .proto:
/// ```protobuf
/// message TimeSeries {
///   repeated Label labels   = 1;
///   repeated Sample samples = 2;
/// }
/// ```
#[derive(prost::Message, Clone, PartialEq)]
pub struct TimeSeries {
    /// Labels identifying the series, including [`LABEL_NAME`].
    #[prost(message, repeated, tag = "1")]
    pub labels: Vec<Label>,

    /// Samples of the series.
    #[prost(message, repeated, tag = "2")]
    pub samples: Vec<Sample>,
}

impl TimeSeries {
    /// Sorts labels by name, and samples by timestamp.
    pub fn sort_labels_and_samples(&mut self) {
        self.labels.sort_by(|a, b| a.name.cmp(&b.name));
        self.samples.sort_by_key(|sample| sample.timestamp);
    }

    /// Returns the value of the label with the given name, if present.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.iter().find(|label| label.name == name).map(|label| label.value.as_str())
    }
}

/// A label.
///
/// .proto:
/// ```protobuf
/// message Label {
///   string name  = 1;
///   string value = 2;
/// }
/// ```
#[derive(prost::Message, Clone, Hash, PartialEq, Eq)]
pub struct Label {
    /// Label name.
    #[prost(string, tag = "1")]
    pub name: String,

    /// Label value.
    #[prost(string, tag = "2")]
    pub value: String,
}

/// A sample.
///
/// .proto:
/// ```protobuf
/// message Sample {
///   double value    = 1;
///   int64 timestamp = 2;
/// }
/// ```
#[derive(prost::Message, Clone, PartialEq)]
pub struct Sample {
    /// Sample value.
    #[prost(double, tag = "1")]
    pub value: f64,

    /// Timestamp, in milliseconds since the Unix epoch.
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
}

/// Metadata describing a metric family.
///
/// .proto:
/// ```protobuf
/// message MetricMetadata {
///   MetricType type = 1;
///   string metric_family_name = 2;
///   string help = 4;
///   string unit = 5;
/// }
/// ```
#[derive(prost::Message, Clone, PartialEq)]
pub struct MetricMetadata {
    /// Metric type, as the numeric value of the `MetricType` enum.
    #[prost(int32, tag = "1")]
    pub r#type: i32,

    /// Name of the metric family.
    #[prost(string, tag = "2")]
    pub metric_family_name: String,

    /// Help text.
    #[prost(string, tag = "4")]
    pub help: String,

    /// Unit.
    #[prost(string, tag = "5")]
    pub unit: String,
}
