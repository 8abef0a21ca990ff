use std::{fmt, str::FromStr};

use thiserror::Error;

/// Values at or above this magnitude are always rendered as floating-point, since they can no longer be represented
/// exactly as integers.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Metric type of a datagram.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetricType {
    /// Counter (`c`).
    Counter,

    /// Gauge (`g`).
    Gauge,

    /// Timing (`ms`).
    Timing,

    /// Histogram (`h`).
    Histogram,

    /// Set (`s`).
    Set,

    /// Distribution (`d`).
    Distribution,
}

impl MetricType {
    /// Returns the wire representation of the metric type.
    pub const fn as_str(self) -> &'static str {
        match self {
            MetricType::Counter => "c",
            MetricType::Gauge => "g",
            MetricType::Timing => "ms",
            MetricType::Histogram => "h",
            MetricType::Set => "s",
            MetricType::Distribution => "d",
        }
    }

    fn from_wire(s: &str) -> Option<Self> {
        match s {
            "c" => Some(MetricType::Counter),
            "g" => Some(MetricType::Gauge),
            "ms" => Some(MetricType::Timing),
            "h" => Some(MetricType::Histogram),
            "s" => Some(MetricType::Set),
            "d" => Some(MetricType::Distribution),
            _ => None,
        }
    }

    const fn renders_as_float(self) -> bool {
        matches!(self, MetricType::Timing | MetricType::Histogram | MetricType::Distribution)
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that could occur while parsing a datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The metric name was empty or contained a reserved character.
    #[error("invalid metric name '{0}'")]
    InvalidName(String),

    /// The datagram had no `:` separating the name from the value.
    #[error("missing metric value")]
    MissingValue,

    /// The metric value was empty, contained a reserved character, or was not a finite number.
    #[error("invalid metric value '{0}'")]
    InvalidValue(String),

    /// The datagram had no `|` separating the value from the metric type.
    #[error("missing metric type")]
    MissingType,

    /// The metric type was not one of the supported types.
    #[error("unknown metric type '{0}'")]
    UnknownType(String),

    /// The sample rate was not a finite, non-negative number.
    #[error("invalid sample rate '{0}'")]
    InvalidSampleRate(String),

    /// The tag list was empty or contained an empty tag.
    #[error("invalid tags '{0}'")]
    InvalidTags(String),

    /// A section following the metric type was duplicated, out of order, or not recognized.
    #[error("unexpected section '{0}'")]
    UnexpectedSection(String),
}

/// Identity of a datagram for aggregation purposes: its name and its sorted tags.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DatagramKey {
    name: String,
    tags: Vec<String>,
}

impl DatagramKey {
    /// Returns the metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the tags, sorted.
    pub fn tags(&self) -> &[String] {
        &self.tags
    }
}

/// A single metric sample in the StatsD wire format: `name:value|type[|@sample_rate][|#tag1,tag2,...]`.
#[derive(Clone, Debug, PartialEq)]
pub struct Datagram {
    name: String,
    metric_type: MetricType,
    value: f64,
    set_member: Option<String>,
    sample_rate: Option<f64>,
    tags: Vec<String>,
}

impl Datagram {
    /// Creates a new `Datagram` with no sample rate and no tags.
    pub fn new<N>(name: N, metric_type: MetricType, value: f64) -> Self
    where
        N: Into<String>,
    {
        Datagram { name: name.into(), metric_type, value, set_member: None, sample_rate: None, tags: Vec::new() }
    }

    /// Sets the sample rate.
    #[must_use]
    pub fn with_sample_rate(mut self, sample_rate: Option<f64>) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Sets the tags.
    #[must_use]
    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Parses a single datagram line.
    ///
    /// A trailing line ending is ignored.
    ///
    /// # Errors
    ///
    /// If the line is not a well-formed datagram, an error describing the first problem found is returned.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim_end_matches(|c: char| c == '\n' || c == '\r');
        let mut sections = line.split('|');

        let head = sections.next().unwrap_or_default();
        let (name, raw_value) = head.split_once(':').ok_or(ParseError::MissingValue)?;
        if name.is_empty() || name.contains('@') {
            return Err(ParseError::InvalidName(name.to_string()));
        }

        // Set members are identifiers, not necessarily numbers.
        let is_set = sections.clone().next() == Some(MetricType::Set.as_str());
        let (value, set_member) = match parse_value(raw_value) {
            Ok(value) => (value, None),
            Err(_) if is_set && is_set_member(raw_value) => (f64::NAN, Some(raw_value.to_string())),
            Err(e) => return Err(e),
        };

        let raw_type = sections.next().ok_or(ParseError::MissingType)?;
        let metric_type = MetricType::from_wire(raw_type)
            .ok_or_else(|| ParseError::UnknownType(raw_type.to_string()))?;

        let mut sample_rate = None;
        let mut tags = None;
        for section in sections {
            if let Some(raw_rate) = section.strip_prefix('@') {
                if sample_rate.is_some() || tags.is_some() {
                    return Err(ParseError::UnexpectedSection(section.to_string()));
                }
                sample_rate = Some(parse_sample_rate(raw_rate)?);
            } else if let Some(raw_tags) = section.strip_prefix('#') {
                if tags.is_some() {
                    return Err(ParseError::UnexpectedSection(section.to_string()));
                }
                tags = Some(parse_tags(raw_tags)?);
            } else {
                return Err(ParseError::UnexpectedSection(section.to_string()));
            }
        }

        Ok(Datagram {
            name: name.to_string(),
            metric_type,
            value,
            set_member,
            sample_rate,
            tags: tags.unwrap_or_default(),
        })
    }

    /// Returns the metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the metric type.
    pub fn metric_type(&self) -> MetricType {
        self.metric_type
    }

    /// Returns the metric value.
    ///
    /// Set members that are not numbers have a value of NaN. See [`set_member`](Datagram::set_member).
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Returns the member of a set datagram whose value is not a number, such as `alice` in `users:alice|s`.
    pub fn set_member(&self) -> Option<&str> {
        self.set_member.as_deref()
    }

    /// Returns the sample rate, if one was given.
    pub fn sample_rate(&self) -> Option<f64> {
        self.sample_rate
    }

    /// Returns the tags, in their original order.
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Returns the aggregation key of this datagram.
    pub fn key(&self) -> DatagramKey {
        let mut tags = self.tags.clone();
        tags.sort_unstable();
        DatagramKey { name: self.name.clone(), tags }
    }
}

impl FromStr for Datagram {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Datagram::parse(s)
    }
}

impl fmt::Display for Datagram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        f.write_str(":")?;
        if let Some(member) = &self.set_member {
            f.write_str(member)?;
        } else if self.metric_type.renders_as_float() {
            f.write_str(ryu::Buffer::new().format(self.value))?;
        } else {
            f.write_str(&format_number(self.value))?;
        }
        f.write_str("|")?;
        f.write_str(self.metric_type.as_str())?;

        // A sample rate of 1.0 is implied, so only write it when it's lower.
        if let Some(sample_rate) = self.sample_rate.filter(|rate| *rate < 1.0) {
            f.write_str("|@")?;
            f.write_str(ryu::Buffer::new().format(sample_rate))?;
        }

        if !self.tags.is_empty() {
            f.write_str("|#")?;
            f.write_str(&self.tags.join(","))?;
        }

        Ok(())
    }
}

/// Formats a number as an integer when it has no fractional part, or as the shortest round-tripping float otherwise.
pub(crate) fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < MAX_EXACT_INTEGER {
        itoa::Buffer::new().format(value as i64).to_string()
    } else {
        ryu::Buffer::new().format(value).to_string()
    }
}

fn parse_value(raw: &str) -> Result<f64, ParseError> {
    let invalid = || ParseError::InvalidValue(raw.to_string());
    if raw.is_empty() || raw.contains(|c: char| c == ':' || c == '@') {
        return Err(invalid());
    }

    raw.parse::<f64>().ok().filter(|value| value.is_finite()).ok_or_else(invalid)
}

fn is_set_member(raw: &str) -> bool {
    !raw.is_empty() && !raw.contains(|c: char| c == ':' || c == '@' || c.is_whitespace())
}

fn parse_sample_rate(raw: &str) -> Result<f64, ParseError> {
    raw.parse::<f64>()
        .ok()
        .filter(|rate| rate.is_finite() && *rate >= 0.0)
        .ok_or_else(|| ParseError::InvalidSampleRate(raw.to_string()))
}

fn parse_tags(raw: &str) -> Result<Vec<String>, ParseError> {
    let tags = raw.split(',').map(str::to_string).collect::<Vec<_>>();
    if tags.iter().any(String::is_empty) {
        return Err(ParseError::InvalidTags(raw.to_string()));
    }

    Ok(tags)
}

#[cfg(test)]
mod tests {
    use super::{format_number, Datagram, MetricType, ParseError};

    #[test]
    fn parses_full_datagram() {
        let datagram = Datagram::parse("fo_o:10|s|@0.01|#foo,bar:baz").unwrap();
        assert_eq!(datagram.name(), "fo_o");
        assert_eq!(datagram.metric_type(), MetricType::Set);
        assert!((datagram.value() - 10.0).abs() < f64::EPSILON);
        assert_eq!(datagram.sample_rate(), Some(0.01));
        assert_eq!(datagram.tags(), &["foo".to_string(), "bar:baz".to_string()][..]);
    }

    #[test]
    fn parses_every_metric_type() {
        let cases = [
            ("a:1|c", MetricType::Counter),
            ("a:1|g", MetricType::Gauge),
            ("a:1|ms", MetricType::Timing),
            ("a:1|h", MetricType::Histogram),
            ("a:1|s", MetricType::Set),
            ("a:1|d", MetricType::Distribution),
        ];

        for (line, expected) in cases {
            assert_eq!(Datagram::parse(line).unwrap().metric_type(), expected, "{line}");
        }
    }

    #[test]
    fn set_members_need_not_be_numbers() {
        let datagram = Datagram::parse("users:alice|s|#route:index").unwrap();
        assert_eq!(datagram.metric_type(), MetricType::Set);
        assert_eq!(datagram.set_member(), Some("alice"));
        assert!(datagram.value().is_nan());
        assert_eq!(datagram.to_string(), "users:alice|s|#route:index");

        assert_eq!(Datagram::parse("users:42|s").unwrap().set_member(), None);
        assert_eq!(Datagram::parse("users:alice|c"), Err(ParseError::InvalidValue("alice".to_string())));
        assert_eq!(Datagram::parse("users:ali@ce|s"), Err(ParseError::InvalidValue("ali@ce".to_string())));
    }

    #[test]
    fn tag_values_may_contain_colons() {
        let datagram = Datagram::parse("foo:1|c|#class:Module1::Module2").unwrap();
        assert_eq!(datagram.tags(), &["class:Module1::Module2".to_string()][..]);
    }

    #[test]
    fn rejects_malformed_datagrams() {
        let cases = [
            ("bar::1|c", ParseError::InvalidValue(":1".to_string())),
            ("bar|c", ParseError::MissingValue),
            (":1|c", ParseError::InvalidName(String::new())),
            ("b@r:1|c", ParseError::InvalidName("b@r".to_string())),
            ("bar:1", ParseError::MissingType),
            ("bar:abc|c", ParseError::InvalidValue("abc".to_string())),
            ("bar:inf|g", ParseError::InvalidValue("inf".to_string())),
            ("bar:1|x", ParseError::UnknownType("x".to_string())),
            ("bar:1|c|@abc", ParseError::InvalidSampleRate("abc".to_string())),
            ("bar:1|c|#a,,b", ParseError::InvalidTags("a,,b".to_string())),
            ("bar:1|c|#a|@0.5", ParseError::UnexpectedSection("@0.5".to_string())),
            ("bar:1|c|T12345", ParseError::UnexpectedSection("T12345".to_string())),
        ];

        for (line, expected) in cases {
            assert_eq!(Datagram::parse(line), Err(expected), "{line}");
        }
    }

    #[test]
    fn ignores_trailing_line_ending() {
        let datagram: Datagram = "foo:1|c\r\n".parse().unwrap();
        assert_eq!(datagram.to_string(), "foo:1|c");
    }

    #[test]
    fn renders_canonical_form() {
        let cases = [
            (Datagram::new("foo.total", MetricType::Counter, 14.0), "foo.total:14|c"),
            (Datagram::new("foo", MetricType::Gauge, 2.5), "foo:2.5|g"),
            (Datagram::new("foo.sum", MetricType::Timing, 950.0), "foo.sum:950.0|ms"),
            (
                Datagram::new("foo", MetricType::Counter, 1.0).with_sample_rate(Some(0.1)),
                "foo:1|c|@0.1",
            ),
            (
                Datagram::new("foo", MetricType::Counter, 1.0).with_sample_rate(Some(1.0)),
                "foo:1|c",
            ),
            (
                Datagram::new("foo.bucket", MetricType::Counter, 3.0).with_tags(["host:abc", "le:10"]),
                "foo.bucket:3|c|#host:abc,le:10",
            ),
        ];

        for (datagram, expected) in cases {
            assert_eq!(datagram.to_string(), expected);
        }
    }

    #[test]
    fn key_ignores_tag_order() {
        let a = Datagram::parse("foo:1|c|#b,a").unwrap();
        let b = Datagram::parse("foo:2|c|#a,b").unwrap();
        let c = Datagram::parse("foo:2|c|#a,c").unwrap();

        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
        assert_eq!(a.key().tags(), &["a".to_string(), "b".to_string()][..]);
    }

    #[test]
    fn formats_numbers() {
        assert_eq!(format_number(90.0), "90");
        assert_eq!(format_number(-95.0), "-95");
        assert_eq!(format_number(99.9), "99.9");
        assert_eq!(format_number(0.5), "0.5");
    }
}
