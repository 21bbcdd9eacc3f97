//! Conversion from Arrow RecordBatches to dataset columns.
//!
//! Integer and floating point arrays keep their numeric kind. Booleans, dates
//! and timestamps become typed cells carrying their ClickHouse type name.
//! Binary is hex encoded and decimals are rendered as exact text.

use anyhow::{Context, Result, anyhow};
use arrow::array::*;
use arrow::datatypes::{
    DataType, Date32Type, Date64Type, Decimal128Type, Decimal256Type, Float16Type, Float32Type,
    Float64Type, Int8Type, Int16Type, Int32Type, Int64Type, TimeUnit, TimestampMicrosecondType,
    TimestampMillisecondType, TimestampNanosecondType, TimestampSecondType, UInt8Type, UInt16Type,
    UInt32Type, UInt64Type, i256,
};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, NaiveDate, Utc};

use crate::dataset::{Cell, ColumnBuilder};

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Append every column of `batch` to the matching builder
pub fn append_record_batch(batch: &RecordBatch, builders: &mut [ColumnBuilder]) -> Result<()> {
    if batch.num_columns() != builders.len() {
        return Err(anyhow!(
            "Record batch has {} columns, expected {}",
            batch.num_columns(),
            builders.len()
        ));
    }

    for (col_idx, builder) in builders.iter_mut().enumerate() {
        let array = batch.column(col_idx);
        append_array(array.as_ref(), builder).with_context(|| {
            format!(
                "Failed to convert column {} ({:?})",
                col_idx,
                array.data_type()
            )
        })?;
    }

    Ok(())
}

/// Push one cell per array slot, nulls included
fn append_array(array: &dyn Array, builder: &mut ColumnBuilder) -> Result<()> {
    match array.data_type() {
        DataType::Boolean => {
            let arr = as_boolean_array(array);
            push_each(arr.len(), |i| arr.is_null(i), builder, |i| {
                Ok(typed("Bool", arr.value(i).to_string()))
            })?;
        }
        DataType::Int8 => push_ints::<Int8Type>(array, builder)?,
        DataType::Int16 => push_ints::<Int16Type>(array, builder)?,
        DataType::Int32 => push_ints::<Int32Type>(array, builder)?,
        DataType::Int64 => push_ints::<Int64Type>(array, builder)?,
        DataType::UInt8 => push_ints::<UInt8Type>(array, builder)?,
        DataType::UInt16 => push_ints::<UInt16Type>(array, builder)?,
        DataType::UInt32 => push_ints::<UInt32Type>(array, builder)?,
        DataType::UInt64 => {
            let arr = as_primitive_array::<UInt64Type>(array);
            push_each(arr.len(), |i| arr.is_null(i), builder, |i| {
                let v = arr.value(i);
                Ok(i64::try_from(v)
                    .map(Cell::Int)
                    .unwrap_or_else(|_| Cell::Text(v.to_string())))
            })?;
        }
        DataType::Float16 => {
            let arr = as_primitive_array::<Float16Type>(array);
            push_each(arr.len(), |i| arr.is_null(i), builder, |i| {
                Ok(Cell::Float(arr.value(i).to_f64()))
            })?;
        }
        DataType::Float32 => {
            let arr = as_primitive_array::<Float32Type>(array);
            push_each(arr.len(), |i| arr.is_null(i), builder, |i| {
                // Go through the shortest decimal form so 0.1f32 stays 0.1
                let v = arr.value(i);
                Ok(Cell::Float(v.to_string().parse().unwrap_or(v as f64)))
            })?;
        }
        DataType::Float64 => {
            let arr = as_primitive_array::<Float64Type>(array);
            push_each(arr.len(), |i| arr.is_null(i), builder, |i| {
                Ok(Cell::Float(arr.value(i)))
            })?;
        }
        DataType::Utf8 => {
            let arr = as_string_array(array);
            push_each(arr.len(), |i| arr.is_null(i), builder, |i| {
                Ok(Cell::Text(arr.value(i).to_string()))
            })?;
        }
        DataType::LargeUtf8 => {
            let arr = as_largestring_array(array);
            push_each(arr.len(), |i| arr.is_null(i), builder, |i| {
                Ok(Cell::Text(arr.value(i).to_string()))
            })?;
        }
        DataType::Binary => {
            let arr = as_generic_binary_array::<i32>(array);
            push_each(arr.len(), |i| arr.is_null(i), builder, |i| {
                Ok(Cell::Text(hex::encode(arr.value(i))))
            })?;
        }
        DataType::LargeBinary => {
            let arr = as_generic_binary_array::<i64>(array);
            push_each(arr.len(), |i| arr.is_null(i), builder, |i| {
                Ok(Cell::Text(hex::encode(arr.value(i))))
            })?;
        }
        DataType::Date32 => {
            let arr = as_primitive_array::<Date32Type>(array);
            let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).context("Invalid epoch")?;
            push_each(arr.len(), |i| arr.is_null(i), builder, |i| {
                let date = epoch
                    .checked_add_signed(chrono::Duration::days(arr.value(i) as i64))
                    .context("Invalid date")?;
                Ok(typed("Date", date.format("%Y-%m-%d").to_string()))
            })?;
        }
        DataType::Date64 => {
            let arr = as_primitive_array::<Date64Type>(array);
            push_each(arr.len(), |i| arr.is_null(i), builder, |i| {
                let datetime =
                    DateTime::from_timestamp_millis(arr.value(i)).context("Invalid date")?;
                Ok(typed("Date", datetime.format("%Y-%m-%d").to_string()))
            })?;
        }
        DataType::Timestamp(unit, _) => push_timestamps(array, unit, builder)?,
        DataType::Decimal128(_, scale) => {
            let arr = as_primitive_array::<Decimal128Type>(array);
            let scale = (*scale).max(0) as u32;
            push_each(arr.len(), |i| arr.is_null(i), builder, |i| {
                Ok(Cell::Text(format_decimal128(arr.value(i), scale)))
            })?;
        }
        DataType::Decimal256(_, scale) => {
            let arr = as_primitive_array::<Decimal256Type>(array);
            let scale = (*scale).max(0) as u32;
            push_each(arr.len(), |i| arr.is_null(i), builder, |i| {
                Ok(Cell::Text(format_decimal256(arr.value(i), scale)))
            })?;
        }
        other => {
            return Err(anyhow!("Unsupported array type for conversion: {:?}", other));
        }
    }

    Ok(())
}

fn typed(type_name: &'static str, text: String) -> Cell {
    Cell::Typed { type_name, text }
}

fn push_each(
    len: usize,
    is_null: impl Fn(usize) -> bool,
    builder: &mut ColumnBuilder,
    cell: impl Fn(usize) -> Result<Cell>,
) -> Result<()> {
    for i in 0..len {
        builder.push(if is_null(i) { Cell::Null } else { cell(i)? });
    }
    Ok(())
}

/// Signed and small unsigned integer arrays, all of which fit in i64
fn push_ints<T: ArrowPrimitiveType>(array: &dyn Array, builder: &mut ColumnBuilder) -> Result<()>
where
    T::Native: Into<i64>,
{
    let arr = as_primitive_array::<T>(array);
    push_each(arr.len(), |i| arr.is_null(i), builder, |i| {
        Ok(Cell::Int(arr.value(i).into()))
    })
}

fn push_timestamps(array: &dyn Array, unit: &TimeUnit, builder: &mut ColumnBuilder) -> Result<()> {
    let to_cell = |datetime: Option<DateTime<Utc>>| -> Result<Cell> {
        let datetime = datetime.context("Invalid timestamp")?;
        Ok(typed("DateTime", datetime.format(DATETIME_FORMAT).to_string()))
    };

    match unit {
        TimeUnit::Second => {
            let arr = as_primitive_array::<TimestampSecondType>(array);
            push_each(arr.len(), |i| arr.is_null(i), builder, |i| {
                to_cell(DateTime::from_timestamp(arr.value(i), 0))
            })
        }
        TimeUnit::Millisecond => {
            let arr = as_primitive_array::<TimestampMillisecondType>(array);
            push_each(arr.len(), |i| arr.is_null(i), builder, |i| {
                to_cell(DateTime::from_timestamp_millis(arr.value(i)))
            })
        }
        TimeUnit::Microsecond => {
            let arr = as_primitive_array::<TimestampMicrosecondType>(array);
            push_each(arr.len(), |i| arr.is_null(i), builder, |i| {
                to_cell(DateTime::from_timestamp_micros(arr.value(i)))
            })
        }
        TimeUnit::Nanosecond => {
            let arr = as_primitive_array::<TimestampNanosecondType>(array);
            push_each(arr.len(), |i| arr.is_null(i), builder, |i| {
                to_cell(Some(DateTime::from_timestamp_nanos(arr.value(i))))
            })
        }
    }
}

/// Format a Decimal128 value with the given scale
fn format_decimal128(value: i128, scale: u32) -> String {
    if scale == 0 {
        return value.to_string();
    }

    let divisor = 10_i128.pow(scale);
    let sign = if value < 0 { "-" } else { "" };
    let int_part = (value / divisor).unsigned_abs();
    let frac_part = (value % divisor).unsigned_abs();

    format!(
        "{}{}.{:0width$}",
        sign,
        int_part,
        frac_part,
        width = scale as usize
    )
}

/// Format a Decimal256 value with the given scale. There is no native
/// integer this wide, so the point is placed into the digit string.
fn format_decimal256(value: i256, scale: u32) -> String {
    let text = value.to_string();
    if scale == 0 {
        return text;
    }

    let (sign, digits) = match text.strip_prefix('-') {
        Some(digits) => ("-", digits),
        None => ("", text.as_str()),
    };
    let scale = scale as usize;
    let padded = format!("{:0>width$}", digits, width = scale + 1);
    let (int_part, frac_part) = padded.split_at(padded.len() - scale);

    format!("{}{}.{}", sign, int_part, frac_part)
}
