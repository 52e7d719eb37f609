//! Mapping of [`LogRecord`]s to the stored document shape.
//!
//! Every field is optional: absent, empty or zero sources produce no field
//! at all rather than a null placeholder.

use bson::{Bson, DateTime as BsonDateTime, Document};

use crate::record::{FieldValue, LogRecord};

pub const FIELD_DATE: &str = "date";
pub const FIELD_LOGGER: &str = "logger";
pub const FIELD_LEVEL: &str = "lvl";
pub const FIELD_TRACE: &str = "trace";
pub const FIELD_FRAME: &str = "frame";
pub const FIELD_FRAME_NUMBER: &str = "frameNb";
pub const FIELD_ERROR: &str = "ex";
pub const FIELD_DATA: &str = "data";
pub const FIELD_MESSAGE: &str = "msg";

/// Convert a batch of records, keeping their order.
pub fn to_documents(records: &[LogRecord], use_formatted_message: bool) -> Vec<Document> {
    records
        .iter()
        .map(|record| to_document(record, use_formatted_message))
        .collect()
}

/// Convert one record into a document.
///
/// With `use_formatted_message` the `msg` field is the rendered message
/// string; otherwise it is the array `[template, param0, param1, ...]`.
pub fn to_document(record: &LogRecord, use_formatted_message: bool) -> Document {
    let mut doc = Document::new();

    doc.insert(
        FIELD_DATE,
        BsonDateTime::from_millis(record.timestamp.timestamp_millis()),
    );
    add_str(&mut doc, FIELD_LOGGER, &record.logger);
    add_str(&mut doc, FIELD_LEVEL, &record.level);
    add_opt_str(&mut doc, FIELD_TRACE, record.stack_trace.as_deref());
    add_opt_str(&mut doc, FIELD_FRAME, record.frame.as_deref());
    if record.frame_number != 0 {
        doc.insert(FIELD_FRAME_NUMBER, int_to_bson(i64::from(record.frame_number)));
    }
    if let Some(error) = &record.error {
        add_value(&mut doc, FIELD_ERROR, error);
    }
    if !record.properties.is_empty() {
        let data: Document = record
            .properties
            .iter()
            .map(|(key, value)| (key.clone(), to_bson(value)))
            .collect();
        doc.insert(FIELD_DATA, data);
    }

    if use_formatted_message {
        add_str(&mut doc, FIELD_MESSAGE, &record.formatted_message);
    } else {
        let mut msg = Vec::with_capacity(record.parameters.len() + 1);
        msg.push(Bson::String(record.template.clone()));
        msg.extend(record.parameters.iter().map(to_bson));
        doc.insert(FIELD_MESSAGE, msg);
    }

    doc
}

fn add_str(doc: &mut Document, name: &str, value: &str) {
    if !value.is_empty() {
        doc.insert(name, value);
    }
}

fn add_opt_str(doc: &mut Document, name: &str, value: Option<&str>) {
    if let Some(value) = value {
        add_str(doc, name, value);
    }
}

/// Top-level values skip nulls and empty containers.
fn add_value(doc: &mut Document, name: &str, value: &FieldValue) {
    let empty = match value {
        FieldValue::Null => true,
        FieldValue::Str(s) | FieldValue::Text(s) => s.is_empty(),
        FieldValue::Array(items) => items.is_empty(),
        FieldValue::Map(map) => map.is_empty(),
        _ => false,
    };
    if !empty {
        doc.insert(name, to_bson(value));
    }
}

/// Map a field value to its native BSON form, degrading to a string where
/// BSON has no lossless representation.
pub fn to_bson(value: &FieldValue) -> Bson {
    match value {
        FieldValue::Null => Bson::Null,
        FieldValue::Bool(v) => Bson::Boolean(*v),
        FieldValue::I64(v) => int_to_bson(*v),
        FieldValue::U64(v) => match i64::try_from(*v) {
            Ok(v) => int_to_bson(v),
            Err(_) => Bson::String(v.to_string()),
        },
        FieldValue::F64(v) => Bson::Double(*v),
        FieldValue::Str(v) | FieldValue::Text(v) => Bson::String(v.clone()),
        FieldValue::Timestamp(v) => Bson::DateTime(BsonDateTime::from_millis(v.timestamp_millis())),
        FieldValue::Array(items) => Bson::Array(items.iter().map(to_bson).collect()),
        FieldValue::Map(map) => Bson::Document(
            map.iter()
                .map(|(key, value)| (key.clone(), to_bson(value)))
                .collect(),
        ),
    }
}

fn int_to_bson(v: i64) -> Bson {
    match i32::try_from(v) {
        Ok(small) => Bson::Int32(small),
        Err(_) => Bson::Int64(v),
    }
}
