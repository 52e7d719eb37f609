use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// One structured log event as handed over by the host framework.
///
/// Records are read-only once built; [`crate::document::to_document`]
/// turns them into the stored BSON shape.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub logger: String,
    pub level: String,
    pub stack_trace: Option<String>,
    /// Descriptor of the user code location that emitted the event.
    pub frame: Option<String>,
    /// Index of the user frame in the captured stack, `0` when unknown.
    pub frame_number: u32,
    pub error: Option<FieldValue>,
    pub template: String,
    pub parameters: Vec<FieldValue>,
    pub formatted_message: String,
    pub properties: BTreeMap<String, FieldValue>,
}

impl LogRecord {
    /// Build a record stamped with the current time.
    ///
    /// The formatted message is rendered from `template` and `parameters`
    /// with [`render_template`].
    pub fn new(
        logger: impl Into<String>,
        level: impl Into<String>,
        template: impl Into<String>,
        parameters: Vec<FieldValue>,
    ) -> Self {
        let template = template.into();
        let formatted_message = render_template(&template, &parameters);
        LogRecord {
            timestamp: Utc::now(),
            logger: logger.into(),
            level: level.into(),
            stack_trace: None,
            frame: None,
            frame_number: 0,
            error: None,
            template,
            parameters,
            formatted_message,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<FieldValue>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Closed set of value kinds a log field can carry.
///
/// `Text` holds values that are only known through their textual
/// rendering (`Debug` output, oversized integers, foreign types).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
    Str(String),
    Timestamp(DateTime<Utc>),
    Array(Vec<FieldValue>),
    Map(BTreeMap<String, FieldValue>),
    Text(String),
}

impl FieldValue {
    /// Capture an error together with its `source()` chain.
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        let mut map = BTreeMap::new();
        map.insert("message".to_string(), FieldValue::Str(error.to_string()));

        let mut sources = Vec::new();
        let mut next = error.source();
        while let Some(source) = next {
            sources.push(FieldValue::Str(source.to_string()));
            next = source.source();
        }
        if !sources.is_empty() {
            map.insert("sources".to_string(), FieldValue::Array(sources));
        }
        FieldValue::Map(map)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => Ok(()),
            FieldValue::Bool(v) => write!(f, "{}", v),
            FieldValue::I64(v) => write!(f, "{}", v),
            FieldValue::U64(v) => write!(f, "{}", v),
            FieldValue::F64(v) => write!(f, "{}", v),
            FieldValue::Str(v) | FieldValue::Text(v) => f.write_str(v),
            FieldValue::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
            FieldValue::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            FieldValue::Map(map) => {
                f.write_str("{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::I64(i64::from(v))
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::I64(v)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::U64(u64::from(v))
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::U64(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::F64(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(v)
    }
}

impl From<Vec<FieldValue>> for FieldValue {
    fn from(v: Vec<FieldValue>) -> Self {
        FieldValue::Array(v)
    }
}

impl From<BTreeMap<String, FieldValue>> for FieldValue {
    fn from(v: BTreeMap<String, FieldValue>) -> Self {
        FieldValue::Map(v)
    }
}

impl From<serde_json::Value> for FieldValue {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => FieldValue::Null,
            serde_json::Value::Bool(b) => FieldValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    FieldValue::I64(i)
                } else if let Some(u) = n.as_u64() {
                    FieldValue::U64(u)
                } else if let Some(f) = n.as_f64() {
                    FieldValue::F64(f)
                } else {
                    FieldValue::Text(n.to_string())
                }
            }
            serde_json::Value::String(s) => FieldValue::Str(s),
            serde_json::Value::Array(items) => {
                FieldValue::Array(items.into_iter().map(FieldValue::from).collect())
            }
            serde_json::Value::Object(map) => FieldValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, FieldValue::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Render a positional message template.
///
/// `{N}` is replaced with the display form of `parameters[N]`; `{{` and
/// `}}` produce literal braces. Placeholders that are not a valid index
/// are copied through untouched.
pub fn render_template(template: &str, parameters: &[FieldValue]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find(&['{', '}'][..]) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") {
            out.push('{');
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with("}}") {
            out.push('}');
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with('{') {
            if let Some(end) = tail.find('}') {
                let inner = &tail[1..end];
                if let Some(value) = inner.parse::<usize>().ok().and_then(|i| parameters.get(i)) {
                    out.push_str(&value.to_string());
                    rest = &tail[end + 1..];
                    continue;
                }
            }
        }

        // Lone brace or unresolved placeholder: keep the character as is.
        out.push_str(&tail[..1]);
        rest = &tail[1..];
    }

    out.push_str(rest);
    out
}
