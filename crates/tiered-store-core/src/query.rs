//! Time-range and column filtering over a [`Table`].
//!
//! Bounds are whole calendar days in UTC, inclusive at both ends: `start` is
//! moved back to midnight of its day and `end` forward to midnight of the day
//! after. Rows are then kept iff `start_norm <= ts < end_norm`, so a stored
//! timestamp of `2024-01-02T18:30Z` matches a query ending on `2024-01-02`.
//!
//! Row selection is vectorized: each bound is compared against the timestamp
//! column as a 1-element [`Scalar`] of the column's own type (unit and
//! timezone included), the comparisons are combined into one boolean mask,
//! and the mask is applied with `filter_record_batch`. Null mask slots drop
//! the row, so null timestamps never match a bounded query.
//!
//! A bound outside the range of a nanosecond column is clamped: past the far
//! end it keeps every row on its side, past the near end it keeps none.

use arrow::{
    array::{Array, ArrayRef, AsArray, BooleanArray, PrimitiveArray, Scalar},
    compute::{
        filter_record_batch, is_not_null,
        kernels::{boolean as boolean_kernels, cmp as cmp_kernels},
    },
    datatypes::{
        ArrowTimestampType, DataType, TimeUnit, TimestampMicrosecondType,
        TimestampMillisecondType, TimestampNanosecondType, TimestampSecondType,
    },
    error::ArrowError,
};
use chrono::{DateTime, NaiveDate, Utc};
use snafu::prelude::*;

use crate::record::TIMESTAMP_FIELD;
use crate::table::{ConversionError, Table};

/// Errors raised while filtering a table.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum QueryError {
    /// An Arrow compute kernel failed.
    #[snafu(display("Arrow error while filtering: {source}"))]
    Arrow {
        /// Underlying Arrow error.
        source: ArrowError,
    },

    /// The timestamp column's type cannot be compared against time bounds.
    #[snafu(display("Unsupported type for timestamp column {column}: {datatype}"))]
    UnsupportedTimeType {
        /// Name of the timestamp column.
        column: String,
        /// The column's Arrow type.
        datatype: DataType,
    },

    /// Column projection failed.
    #[snafu(display("Column projection failed: {source}"))]
    Projection {
        /// Underlying conversion error.
        source: ConversionError,
    },
}

/// A request for a subset of a dataset's rows and columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    /// First day to include; time-of-day is ignored.
    pub start: Option<DateTime<Utc>>,
    /// Last day to include; time-of-day is ignored.
    pub end: Option<DateTime<Utc>>,
    /// Columns to keep in addition to the timestamp column.
    pub columns: Option<Vec<String>>,
}

impl Query {
    /// A query matching every row and column.
    pub fn all() -> Self {
        Self::default()
    }

    /// All rows from the day of `start` through the day of `end`.
    pub fn between_dates(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: Some(start.and_time(chrono::NaiveTime::MIN).and_utc()),
            end: Some(end.and_time(chrono::NaiveTime::MIN).and_utc()),
            columns: None,
        }
    }

    /// Set the first included day.
    pub fn with_start(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    /// Set the last included day.
    pub fn with_end(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }

    /// Restrict the result to `columns` plus the timestamp column.
    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Inclusive lower bound after day normalization.
    pub fn start_bound(&self) -> Option<DateTime<Utc>> {
        self.start.map(start_of_day)
    }

    /// Exclusive upper bound after day normalization.
    ///
    /// `None` also when `end` falls on the last representable day.
    pub fn end_bound(&self) -> Option<DateTime<Utc>> {
        self.end.and_then(start_of_next_day)
    }
}

/// Midnight UTC of `ts`'s day.
pub fn start_of_day(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.date_naive().and_time(chrono::NaiveTime::MIN).and_utc()
}

/// Midnight UTC of the day after `ts`'s day.
pub fn start_of_next_day(ts: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let next = ts.date_naive().succ_opt()?;
    Some(next.and_time(chrono::NaiveTime::MIN).and_utc())
}

/// Apply `query` to `table`, returning a new table.
///
/// Projection runs first so the row mask only has to be applied to the
/// surviving columns. An empty or inverted day range yields an empty table.
pub fn filter(table: &Table, query: &Query) -> Result<Table, QueryError> {
    let projected = match &query.columns {
        Some(columns) => table.project(columns).context(ProjectionSnafu)?,
        None => table.clone(),
    };

    let (start, end) = (query.start_bound(), query.end_bound());
    if start.is_none() && end.is_none() {
        return Ok(projected);
    }

    let column = projected.timestamp_column();
    let mask = match column.data_type() {
        DataType::Timestamp(TimeUnit::Second, _) => {
            time_mask::<TimestampSecondType>(column, start, end)?
        }
        DataType::Timestamp(TimeUnit::Millisecond, _) => {
            time_mask::<TimestampMillisecondType>(column, start, end)?
        }
        DataType::Timestamp(TimeUnit::Microsecond, _) => {
            time_mask::<TimestampMicrosecondType>(column, start, end)?
        }
        DataType::Timestamp(TimeUnit::Nanosecond, _) => {
            time_mask::<TimestampNanosecondType>(column, start, end)?
        }
        other => {
            return UnsupportedTimeTypeSnafu {
                column: TIMESTAMP_FIELD,
                datatype: other.clone(),
            }
            .fail();
        }
    };

    let batch = filter_record_batch(projected.batch(), &mask).context(ArrowSnafu)?;
    Ok(projected.with_batch(batch))
}

/// A day bound expressed in a column's time unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnBound {
    /// Compare against this many units since the Unix epoch.
    At(i64),
    /// Outside the column's range on the side that keeps every row.
    Open,
    /// Outside the column's range on the side that drops every row.
    Unsatisfiable,
}

/// Convert `ts` to `unit`. Only nanoseconds can overflow `i64` within
/// chrono's range; an overflowing bound is clamped by its direction.
fn column_bound(unit: TimeUnit, ts: DateTime<Utc>, lower: bool) -> ColumnBound {
    let value = match unit {
        TimeUnit::Second => Some(ts.timestamp()),
        TimeUnit::Millisecond => Some(ts.timestamp_millis()),
        TimeUnit::Microsecond => Some(ts.timestamp_micros()),
        TimeUnit::Nanosecond => ts.timestamp_nanos_opt(),
    };
    match value {
        Some(v) => ColumnBound::At(v),
        None if (ts.timestamp() < 0) == lower => ColumnBound::Open,
        None => ColumnBound::Unsatisfiable,
    }
}

/// Boolean mask of rows with `start <= ts < end` for a timestamp column of
/// type `T`. A missing bound is not checked.
fn time_mask<T: ArrowTimestampType>(
    column: &ArrayRef,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<BooleanArray, QueryError>
where
    PrimitiveArray<T>: From<Vec<i64>>,
{
    let ts_arr = column
        .as_primitive_opt::<T>()
        .with_context(|| UnsupportedTimeTypeSnafu {
            column: TIMESTAMP_FIELD,
            datatype: column.data_type().clone(),
        })?;

    // Bounds must carry the column's timezone or the kernels reject them.
    let tz = match ts_arr.data_type() {
        DataType::Timestamp(_, tz) => tz.clone(),
        _ => None,
    };

    let mut masks = Vec::with_capacity(2);
    for (bound, lower) in [(start, true), (end, false)] {
        let Some(ts) = bound else { continue };
        let value = match column_bound(T::UNIT, ts, lower) {
            ColumnBound::At(value) => value,
            ColumnBound::Open => continue,
            ColumnBound::Unsatisfiable => {
                return Ok(BooleanArray::from(vec![false; ts_arr.len()]));
            }
        };
        let scalar =
            Scalar::new(PrimitiveArray::<T>::from(vec![value]).with_timezone_opt(tz.clone()));
        let mask = if lower {
            cmp_kernels::gt_eq(ts_arr, &scalar)
        } else {
            cmp_kernels::lt(ts_arr, &scalar)
        };
        masks.push(mask.context(ArrowSnafu)?);
    }

    match masks.as_slice() {
        [] => is_not_null(ts_arr).context(ArrowSnafu),
        [mask] => Ok(mask.clone()),
        [ge, lt, ..] => boolean_kernels::and(ge, lt).context(ArrowSnafu),
    }
}
