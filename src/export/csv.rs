//! CSV rendering of sample sequences.
//!
//! Each cell holds the JSON text of its value (`9.81`, `1718800496789`), so
//! files open the same way in spreadsheets and in JSON-aware tooling.
//! Integral readings print without a fraction (`9`, not `9.0`), the way a
//! browser dashboard would serialize them. A cell without a value is written
//! as `""`.

use crate::core::Sample;
use crate::export::ExportError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Column names, in file order.
pub const HEADERS: [&str; 11] = [
    "elapsedMs",
    "timestamp",
    "accelX",
    "accelY",
    "accelZ",
    "gyroX",
    "gyroY",
    "gyroZ",
    "magX",
    "magY",
    "magZ",
];

/// One flattened output row.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRow {
    cells: Vec<Option<Value>>,
}

impl ExportRow {
    /// Build a row from cells in `HEADERS` order. Short rows are padded
    /// with empty cells.
    fn from_cells(mut cells: Vec<Option<Value>>) -> Self {
        cells.resize(HEADERS.len(), None);
        Self { cells }
    }

    fn render_cells(&self) -> impl Iterator<Item = String> + '_ {
        self.cells.iter().map(|cell| {
            let value = match cell {
                Some(Value::Null) | None => Value::String(String::new()),
                Some(value) => value.clone(),
            };
            value.to_string()
        })
    }
}

impl From<&Sample> for ExportRow {
    fn from(sample: &Sample) -> Self {
        let mut cells = Vec::with_capacity(HEADERS.len());
        cells.push(Some(Value::from(sample.elapsed_ms)));
        cells.push(Some(Value::from(sample.timestamp.timestamp_millis())));
        for axis in sample.accel.iter().chain(&sample.gyro).chain(&sample.mag) {
            cells.push(Some(reading(*axis)));
        }
        Self::from_cells(cells)
    }
}

/// Largest magnitude below which every integral f64 is exact as an i64.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// JSON value of one reading. Non-finite values become `null`, which renders
/// as an empty cell.
fn reading(value: f64) -> Value {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < MAX_EXACT_INTEGER {
        // -0.0 also lands here and prints as `0`.
        Value::from(value as i64)
    } else {
        Value::from(value)
    }
}

/// Write a header and the given rows to `writer`.
pub fn write_rows<W, I>(writer: W, rows: I) -> Result<(), ExportError>
where
    W: Write,
    I: IntoIterator<Item = ExportRow>,
{
    let mut csv = ::csv::WriterBuilder::new()
        .quote_style(::csv::QuoteStyle::Never)
        .terminator(::csv::Terminator::Any(b'\n'))
        .from_writer(writer);

    csv.write_record(HEADERS)?;
    for row in rows {
        csv.write_record(row.render_cells())?;
    }
    csv.flush()?;
    Ok(())
}

/// Write samples to `path`, creating parent directories as needed.
pub fn write_file(path: &Path, samples: &[Sample]) -> Result<PathBuf, ExportError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let file = File::create(path)?;
    write_rows(file, samples.iter().map(ExportRow::from))?;
    Ok(path.to_path_buf())
}

/// File name for a device's automatic export fired at `at`:
/// `device_<id>_<ISO 8601 with ':' and '.' replaced by '-'>.csv`.
pub fn auto_export_filename(device_id: &str, at: DateTime<Utc>) -> String {
    let stamp = at
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!("device_{}_{}.csv", sanitize(device_id), stamp)
}

/// Keep device ids from escaping the export directory.
fn sanitize(device_id: &str) -> String {
    device_id
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::tests::sample;
    use chrono::TimeZone;

    fn render(samples: &[Sample]) -> String {
        let mut buf = Vec::new();
        write_rows(&mut buf, samples.iter().map(ExportRow::from)).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_render_header_and_rows() {
        let samples = vec![sample("A", 0), sample("A", 1)];
        let text = render(&samples);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "elapsedMs,timestamp,accelX,accelY,accelZ,gyroX,gyroY,gyroZ,magX,magY,magZ"
        );

        let cells: Vec<&str> = lines[2].split(',').collect();
        assert_eq!(cells.len(), HEADERS.len());
        assert_eq!(cells[0], "1");
        assert_eq!(cells[1], samples[1].timestamp.timestamp_millis().to_string());
        assert_eq!(cells[2], "1");
        assert_eq!(cells[3], "1.1");
    }

    #[test]
    fn test_reading_cells() {
        assert_eq!(reading(0.0).to_string(), "0");
        assert_eq!(reading(-0.0).to_string(), "0");
        assert_eq!(reading(9.0).to_string(), "9");
        assert_eq!(reading(-12.0).to_string(), "-12");
        assert_eq!(reading(9.81).to_string(), "9.81");
        assert_eq!(reading(-0.5).to_string(), "-0.5");
        assert_eq!(reading(f64::NAN), Value::Null);
        assert_eq!(reading(1e300).to_string(), "1e300");
    }

    #[test]
    fn test_missing_cells_render_empty() {
        let row = ExportRow::from_cells(vec![Some(Value::from(5)), None, Some(Value::Null)]);
        let mut buf = Vec::new();
        write_rows(&mut buf, vec![row]).unwrap();

        let text = String::from_utf8(buf).unwrap();
        let data = text.lines().nth(1).unwrap();
        assert_eq!(data, r#"5,"","","","","","","","","","""#);
    }

    #[test]
    fn test_empty_export_is_header_only() {
        let text = render(&[]);
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn test_auto_export_filename() {
        let at = Utc.with_ymd_and_hms(2024, 6, 19, 12, 34, 56).unwrap()
            + chrono::Duration::milliseconds(789);
        assert_eq!(
            auto_export_filename("ESP1", at),
            "device_ESP1_2024-06-19T12-34-56-789Z.csv"
        );
        assert_eq!(
            auto_export_filename("../x", at),
            "device_.._x_2024-06-19T12-34-56-789Z.csv"
        );
    }

    #[test]
    fn test_write_file_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.csv");
        let written = write_file(&path, &[sample("A", 3)]).unwrap();

        assert_eq!(written, path);
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("elapsedMs,"));
        assert_eq!(content.lines().count(), 2);
    }
}
