//! Record <-> Arrow conversion.
//!
//! Column types are inferred from the non-null values seen in each field:
//!
//! | values                              | Arrow type                  |
//! |-------------------------------------|-----------------------------|
//! | booleans only                       | `Boolean`                   |
//! | integers that fit `i64`             | `Int64`                     |
//! | integers, at least one above `i64`  | `UInt64` (none negative)    |
//! | non-integral numbers only           | `Float64`                   |
//! | strings only                        | `Utf8`                      |
//! | objects, arrays, or mixed kinds     | `Utf8` of compact JSON      |
//!
//! Integers and floats in one column count as mixed kinds: `1` and `1.0`
//! are different JSON values and only the JSON column keeps them apart.
//! | nothing but nulls                   | `Utf8`, all null            |
//!
//! JSON columns are tagged with [`JSON_FIELD_KEY`] field metadata so the
//! reverse conversion can restore the original values.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, BooleanBuilder, Float64Builder, Int64Builder, RecordBatch,
    StringBuilder, TimestampMicrosecondArray, UInt64Builder,
};
use arrow::datatypes::{
    DataType, Field, Float64Type, Int64Type, Schema, TimeUnit, TimestampMicrosecondType,
    TimestampMillisecondType, TimestampNanosecondType, TimestampSecondType, UInt64Type,
};
use arrow::util::display::{ArrayFormatter, FormatOptions};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Number, Value};
use snafu::prelude::*;

use super::{
    ArrowSnafu, ConversionError, InvalidTimestampSnafu, JSON_FIELD_KEY, JsonSnafu,
    MissingTimestampSnafu, schema_metadata,
};
use crate::record::{Metadata, Record, TIMESTAMP_FIELD, parse_timestamp};

/// Timezone attached to every timestamp column this crate builds.
pub(crate) const UTC_TZ: &str = "UTC";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Boolean,
    Int64,
    UInt64,
    Float64,
    Utf8,
    Json,
}

impl ColumnKind {
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(Self::Boolean),
            Value::Number(n) if n.is_i64() => Some(Self::Int64),
            Value::Number(n) if n.is_u64() => Some(Self::UInt64),
            Value::Number(_) => Some(Self::Float64),
            Value::String(_) => Some(Self::Utf8),
            Value::Array(_) | Value::Object(_) => Some(Self::Json),
        }
    }

    fn merge(self, other: Self) -> Self {
        match (self, other) {
            (a, b) if a == b => a,
            _ => Self::Json,
        }
    }
}

/// Kind of a column after it also holds `value`. A column whose integers are
/// all non-negative widens to `UInt64` instead of degrading to JSON.
fn widen(
    current: Option<ColumnKind>,
    kind: ColumnKind,
    value: &Value,
    all_unsigned: bool,
) -> ColumnKind {
    match (current, kind) {
        (None, k) => k,
        (Some(ColumnKind::Int64), ColumnKind::UInt64) if all_unsigned => ColumnKind::UInt64,
        (Some(ColumnKind::UInt64), ColumnKind::Int64) if value.is_u64() => ColumnKind::UInt64,
        (Some(k), other) => k.merge(other),
    }
}

/// Union of record fields in first-seen order, with the inferred kind of each.
fn infer_columns(records: &[Record]) -> Vec<(String, Option<ColumnKind>)> {
    let mut columns: Vec<(String, Option<ColumnKind>)> = Vec::new();
    // Per column: no negative integer seen so far.
    let mut unsigned: Vec<bool> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for record in records {
        for (name, value) in record {
            let slot = *index.entry(name.as_str()).or_insert_with(|| {
                columns.push((name.clone(), None));
                unsigned.push(true);
                columns.len() - 1
            });
            if name == TIMESTAMP_FIELD {
                continue;
            }
            if let Some(kind) = ColumnKind::of(value) {
                let current = columns[slot].1;
                columns[slot].1 = Some(widen(current, kind, value, unsigned[slot]));
                unsigned[slot] &= !value.as_i64().is_some_and(|v| v < 0);
            }
        }
    }

    if !index.contains_key(TIMESTAMP_FIELD) {
        columns.insert(0, (TIMESTAMP_FIELD.to_string(), None));
    }
    columns
}

fn timestamp_array(records: &[Record]) -> Result<ArrayRef, ConversionError> {
    let mut micros = Vec::with_capacity(records.len());
    for (row, record) in records.iter().enumerate() {
        let raw = record
            .get(TIMESTAMP_FIELD)
            .filter(|v| !v.is_null())
            .context(MissingTimestampSnafu {
                row,
                column: TIMESTAMP_FIELD,
            })?;
        let ts = parse_timestamp(raw).context(InvalidTimestampSnafu {
            row,
            value: raw.to_string(),
        })?;
        micros.push(ts.timestamp_micros());
    }
    Ok(Arc::new(
        TimestampMicrosecondArray::from(micros).with_timezone(UTC_TZ),
    ))
}

fn value_array(records: &[Record], name: &str, kind: Option<ColumnKind>) -> ArrayRef {
    let cells = records.iter().map(|r| r.get(name).filter(|v| !v.is_null()));

    match kind {
        Some(ColumnKind::Boolean) => {
            let mut b = BooleanBuilder::with_capacity(records.len());
            cells.for_each(|v| b.append_option(v.and_then(Value::as_bool)));
            Arc::new(b.finish())
        }
        Some(ColumnKind::Int64) => {
            let mut b = Int64Builder::with_capacity(records.len());
            cells.for_each(|v| b.append_option(v.and_then(Value::as_i64)));
            Arc::new(b.finish())
        }
        Some(ColumnKind::UInt64) => {
            let mut b = UInt64Builder::with_capacity(records.len());
            cells.for_each(|v| b.append_option(v.and_then(Value::as_u64)));
            Arc::new(b.finish())
        }
        Some(ColumnKind::Float64) => {
            let mut b = Float64Builder::with_capacity(records.len());
            cells.for_each(|v| b.append_option(v.and_then(Value::as_f64)));
            Arc::new(b.finish())
        }
        Some(ColumnKind::Utf8) => {
            let mut b = StringBuilder::new();
            cells.for_each(|v| b.append_option(v.and_then(Value::as_str)));
            Arc::new(b.finish())
        }
        Some(ColumnKind::Json) => {
            let mut b = StringBuilder::new();
            cells.for_each(|v| b.append_option(v.map(Value::to_string)));
            Arc::new(b.finish())
        }
        None => {
            let mut b = StringBuilder::new();
            cells.for_each(|_| b.append_null());
            Arc::new(b.finish())
        }
    }
}

fn field_for(name: &str, kind: Option<ColumnKind>) -> Field {
    match kind {
        Some(ColumnKind::Boolean) => Field::new(name, DataType::Boolean, true),
        Some(ColumnKind::Int64) => Field::new(name, DataType::Int64, true),
        Some(ColumnKind::UInt64) => Field::new(name, DataType::UInt64, true),
        Some(ColumnKind::Float64) => Field::new(name, DataType::Float64, true),
        Some(ColumnKind::Json) => Field::new(name, DataType::Utf8, true).with_metadata(
            HashMap::from([(JSON_FIELD_KEY.to_string(), "true".to_string())]),
        ),
        Some(ColumnKind::Utf8) | None => Field::new(name, DataType::Utf8, true),
    }
}

pub(super) fn records_to_batch(
    records: &[Record],
    metadata: &Metadata,
) -> Result<RecordBatch, ConversionError> {
    let columns = infer_columns(records);

    let mut fields = Vec::with_capacity(columns.len());
    let mut arrays = Vec::with_capacity(columns.len());
    for (name, kind) in &columns {
        if name == TIMESTAMP_FIELD {
            fields.push(Field::new(
                TIMESTAMP_FIELD,
                DataType::Timestamp(TimeUnit::Microsecond, Some(UTC_TZ.into())),
                false,
            ));
            arrays.push(timestamp_array(records)?);
        } else {
            fields.push(field_for(name, *kind));
            arrays.push(value_array(records, name, *kind));
        }
    }

    let schema = Schema::new(fields).with_metadata(schema_metadata(metadata)?);
    RecordBatch::try_new(Arc::new(schema), arrays).context(ArrowSnafu)
}

fn timestamp_at(array: &dyn Array, unit: TimeUnit, row: usize) -> Option<DateTime<Utc>> {
    match unit {
        TimeUnit::Second => Utc
            .timestamp_opt(array.as_primitive::<TimestampSecondType>().value(row), 0)
            .single(),
        TimeUnit::Millisecond => Utc
            .timestamp_millis_opt(array.as_primitive::<TimestampMillisecondType>().value(row))
            .single(),
        TimeUnit::Microsecond => {
            Utc.timestamp_micros(array.as_primitive::<TimestampMicrosecondType>().value(row))
                .single()
        }
        TimeUnit::Nanosecond => Some(Utc.timestamp_nanos(
            array.as_primitive::<TimestampNanosecondType>().value(row),
        )),
    }
}

fn cell_value(
    field: &Field,
    array: &dyn Array,
    row: usize,
) -> Result<Option<Value>, ConversionError> {
    if array.is_null(row) {
        return Ok(None);
    }

    let value = match field.data_type() {
        DataType::Timestamp(unit, _) => timestamp_at(array, *unit, row)
            .map(|ts| Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))),
        DataType::Boolean => Some(Value::Bool(array.as_boolean().value(row))),
        DataType::Int64 => Some(Value::from(array.as_primitive::<Int64Type>().value(row))),
        DataType::UInt64 => Some(Value::from(array.as_primitive::<UInt64Type>().value(row))),
        DataType::Float64 => {
            Number::from_f64(array.as_primitive::<Float64Type>().value(row)).map(Value::Number)
        }
        DataType::Utf8 => {
            let raw = array.as_string::<i32>().value(row);
            if field.metadata().contains_key(JSON_FIELD_KEY) {
                Some(serde_json::from_str(raw).context(JsonSnafu {
                    column: field.name(),
                })?)
            } else {
                Some(Value::String(raw.to_string()))
            }
        }
        _ => {
            let formatter =
                ArrayFormatter::try_new(array, &FormatOptions::default()).context(ArrowSnafu)?;
            Some(Value::String(formatter.value(row).to_string()))
        }
    };
    Ok(value)
}

pub(super) fn batch_to_records(batch: &RecordBatch) -> Result<Vec<Record>, ConversionError> {
    let schema = batch.schema_ref();
    let mut records = Vec::with_capacity(batch.num_rows());

    for row in 0..batch.num_rows() {
        let mut record = Record::new();
        for (field, column) in schema.fields().iter().zip(batch.columns()) {
            if let Some(value) = cell_value(field, column.as_ref(), row)? {
                record.insert(field.name().clone(), value);
            }
        }
        records.push(record);
    }

    Ok(records)
}
