use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use arrow::array::{
    Array, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array, UInt8Array,
};
use arrow::datatypes::DataType;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::model::Sample;

/// Raw numeric columns before the sample schema is applied.
pub type ColumnTable = BTreeMap<String, Vec<f64>>;

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load an event sample from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.parquet` – one scalar column per variable (recommended)
/// * `.json`    – `[{ "signal": 1, "m": 91.2, "NN": 0.83, ... }, ...]`
/// * `.csv`     – header row, one column per variable
///
/// Numeric and boolean columns are kept; anything else is ignored.
/// `weight_column` names the per-row weight, if the file carries one.
pub fn load_sample(path: &Path, weight_column: Option<&str>) -> Result<Sample> {
    let columns = load_columns(path)?;
    let sample = Sample::from_columns(columns, weight_column)
        .with_context(|| format!("building sample from {}", path.display()))?;
    log::info!(
        "Loaded {} events with features {:?} from {}",
        sample.len(),
        sample.feature_names(),
        path.display()
    );
    Ok(sample)
}

/// Read the numeric columns of a file without interpreting them.
pub fn load_columns(path: &Path) -> Result<ColumnTable> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "parquet" | "pq" => load_parquet(path),
        "json" => load_json(path),
        "csv" => load_csv(path),
        other => bail!("Unsupported file extension: .{other}"),
    }
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Expected JSON schema (records-oriented, `df.to_json(orient='records')`):
///
/// ```json
/// [
///   { "signal": 0, "train": 1, "m": 84.1, "pt": 412.0, "NN": 0.21 },
///   ...
/// ]
/// ```
///
/// A key missing from a row, or `null`, reads as NaN.
fn load_json(path: &Path) -> Result<ColumnTable> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;

    let records = root
        .as_array()
        .context("Expected top-level JSON array")?;

    // Pass 1: decide which keys are numeric everywhere they appear.
    let mut numeric: BTreeMap<String, bool> = BTreeMap::new();
    for (i, rec) in records.iter().enumerate() {
        let obj = rec
            .as_object()
            .with_context(|| format!("Row {i} is not a JSON object"))?;
        for (key, val) in obj {
            let ok = json_to_f64(val).is_some();
            numeric
                .entry(key.clone())
                .and_modify(|n| *n &= ok)
                .or_insert(ok);
        }
    }

    let mut table: ColumnTable = numeric
        .iter()
        .filter(|(_, ok)| **ok)
        .map(|(k, _)| (k.clone(), Vec::with_capacity(records.len())))
        .collect();
    for (key, ok) in &numeric {
        if !ok {
            log::debug!("JSON column '{key}' is not numeric, ignoring");
        }
    }

    // Pass 2: fill.
    for rec in records {
        // Objects were checked in pass 1.
        let Some(obj) = rec.as_object() else { continue };
        for (key, values) in table.iter_mut() {
            values.push(obj.get(key).and_then(json_to_f64).unwrap_or(f64::NAN));
        }
    }

    Ok(table)
}

fn json_to_f64(val: &JsonValue) -> Option<f64> {
    match val {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        JsonValue::Null => Some(f64::NAN),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// CSV layout:  header row with column names, one value per cell.
/// Empty cells read as NaN; a column with any non-numeric cell is ignored.
fn load_csv(path: &Path) -> Result<ColumnTable> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut values: Vec<Vec<f64>> = vec![Vec::new(); headers.len()];
    let mut numeric = vec![true; headers.len()];

    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        if record.len() != headers.len() {
            bail!(
                "CSV row {row_no}: {} fields but {} headers",
                record.len(),
                headers.len()
            );
        }
        for (col_idx, cell) in record.iter().enumerate() {
            if !numeric[col_idx] {
                continue;
            }
            match parse_cell(cell) {
                Some(v) => values[col_idx].push(v),
                None => {
                    log::debug!(
                        "CSV column '{}' has non-numeric cell '{cell}' (row {row_no}), ignoring column",
                        headers[col_idx]
                    );
                    numeric[col_idx] = false;
                    values[col_idx].clear();
                }
            }
        }
    }

    Ok(headers
        .into_iter()
        .zip(values)
        .zip(numeric)
        .filter(|(_, ok)| *ok)
        .map(|(pair, _)| pair)
        .collect())
}

fn parse_cell(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return Some(f64::NAN);
    }
    if let Ok(f) = s.parse::<f64>() {
        return Some(f);
    }
    match s {
        "true" | "True" => Some(1.0),
        "false" | "False" => Some(0.0),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load a Parquet file of per-event scalars.
///
/// Float, integer and boolean columns are read; list or string columns
/// are skipped. Nulls read as NaN.
///
/// Works with files written by both **Pandas** (`df.to_parquet()`) and
/// **Polars** (`df.write_parquet()`).
fn load_parquet(path: &Path) -> Result<ColumnTable> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .context("reading parquet metadata")?;
    let reader = builder.build().context("building parquet reader")?;

    let mut table = ColumnTable::new();

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();

        for (col_idx, field) in schema.fields().iter().enumerate() {
            let Some(values) = extract_f64_column(batch.column(col_idx)) else {
                log::debug!(
                    "Parquet column '{}' has type {:?}, ignoring",
                    field.name(),
                    field.data_type()
                );
                continue;
            };
            table
                .entry(field.name().clone())
                .or_default()
                .extend(values);
        }
    }

    Ok(table)
}

// -- Parquet / Arrow helpers --

/// Convert a scalar numeric Arrow column to `f64`, or `None` for other types.
fn extract_f64_column(col: &Arc<dyn Array>) -> Option<Vec<f64>> {
    fn collect<I: Iterator<Item = Option<f64>>>(it: I) -> Vec<f64> {
        it.map(|v| v.unwrap_or(f64::NAN)).collect()
    }

    let any = col.as_any();
    let values = match col.data_type() {
        DataType::Float64 => collect(any.downcast_ref::<Float64Array>()?.iter()),
        DataType::Float32 => collect(
            any.downcast_ref::<Float32Array>()?
                .iter()
                .map(|v| v.map(f64::from)),
        ),
        DataType::Int64 => collect(
            any.downcast_ref::<Int64Array>()?
                .iter()
                .map(|v| v.map(|i| i as f64)),
        ),
        DataType::Int32 => collect(
            any.downcast_ref::<Int32Array>()?
                .iter()
                .map(|v| v.map(f64::from)),
        ),
        DataType::UInt8 => collect(
            any.downcast_ref::<UInt8Array>()?
                .iter()
                .map(|v| v.map(f64::from)),
        ),
        DataType::Boolean => collect(
            any.downcast_ref::<BooleanArray>()?
                .iter()
                .map(|v| v.map(|b| if b { 1.0 } else { 0.0 })),
        ),
        _ => return None,
    };
    Some(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    use arrow::datatypes::{Field, Schema};
    use arrow::record_batch::RecordBatch;
    use parquet::arrow::ArrowWriter;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("mass_sculpt_{}_{name}", std::process::id()))
    }

    #[test]
    fn csv_skips_text_columns() {
        let path = temp_path("events.csv");
        std::fs::write(
            &path,
            "signal,m,NN,sample\n1,125.0,0.9,higgs\n0,80.5,,qcd\n0,60.0,0.1,qcd\n",
        )
        .unwrap();
        let sample = load_sample(&path, None).unwrap();
        assert_eq!(sample.len(), 3);
        assert_eq!(sample.feature_names(), vec!["NN", "m"]);
        assert!(sample.column("NN").unwrap()[1].is_nan());
        assert!(!sample.has_column("sample"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn json_records_with_bools_and_weights() {
        let path = temp_path("events.json");
        std::fs::write(
            &path,
            r#"[{"signal": true, "m": 90.0, "weight": 2.0, "run": "A"},
                {"signal": false, "m": 70.0, "weight": 0.5, "run": "B"}]"#,
        )
        .unwrap();
        let sample = load_sample(&path, Some("weight")).unwrap();
        assert_eq!(sample.signal(), &[true, false]);
        assert_eq!(sample.weights().unwrap(), &[2.0, 0.5]);
        assert_eq!(sample.feature_names(), vec!["m"]);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn parquet_scalar_columns() {
        let path = temp_path("events.parquet");
        let schema = Arc::new(Schema::new(vec![
            Field::new("signal", DataType::Int64, false),
            Field::new("m", DataType::Float32, false),
            Field::new("train", DataType::Boolean, false),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int64Array::from(vec![1, 0, 0])),
                Arc::new(Float32Array::from(vec![120.0, 75.0, 55.5])),
                Arc::new(BooleanArray::from(vec![true, false, true])),
            ],
        )
        .unwrap();
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = ArrowWriter::try_new(file, schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let sample = load_sample(&path, None).unwrap();
        assert_eq!(sample.len(), 3);
        assert_eq!(sample.train(), &[true, false, true]);
        assert_eq!(sample.column("m").unwrap()[2], 55.5);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn unknown_extension_fails() {
        assert!(load_columns(Path::new("events.h5")).is_err());
    }
}
