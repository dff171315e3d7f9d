//! Trajectory log emission.
//!
//! One row per `(tick, vehicle)`, appended in processing order. The schema is
//! fixed; downstream aggregation tooling depends on the column names:
//!
//! ```text
//! time,vehicle_id,x,y,speed,waiting_time,lane_id,violation_type
//! ```

use crate::decision::ViolationType;
use serde::Serialize;
use std::io::Write;
use thiserror::Error;
use trajgen_env::{KinematicsSnapshot, LaneId, VehicleId};

pub const CSV_HEADER: [&str; 8] = [
    "time",
    "vehicle_id",
    "x",
    "y",
    "speed",
    "waiting_time",
    "lane_id",
    "violation_type",
];

/// Errors writing the trajectory log. Fatal to a run.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One row of the trajectory log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrajectoryRow {
    pub time: u64,
    pub vehicle_id: VehicleId,
    pub x: f64,
    pub y: f64,
    pub speed: f64,
    pub waiting_time: f64,
    pub lane_id: LaneId,
    pub violation_type: ViolationType,
}

impl TrajectoryRow {
    pub fn new(
        tick: u64,
        vehicle: &VehicleId,
        snapshot: &KinematicsSnapshot,
        violation_type: ViolationType,
    ) -> Self {
        Self {
            time: tick,
            vehicle_id: vehicle.clone(),
            x: snapshot.position.x,
            y: snapshot.position.y,
            speed: snapshot.speed,
            waiting_time: snapshot.waiting_time,
            lane_id: snapshot.lane_id.clone(),
            violation_type,
        }
    }
}

/// Append-only destination for trajectory rows.
pub trait TrajectorySink {
    fn write_row(&mut self, row: &TrajectoryRow) -> Result<(), SinkError>;

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl<K: TrajectorySink + ?Sized> TrajectorySink for Box<K> {
    fn write_row(&mut self, row: &TrajectoryRow) -> Result<(), SinkError> {
        (**self).write_row(row)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        (**self).flush()
    }
}

/// CSV writer with a header row.
///
/// Floats use Rust's shortest round-trip form (`12.5`, `0.0`, `1e16`).
/// Very large or small magnitudes therefore print as `1e16` rather than
/// the `1e+16` other CSV writers emit; compare parsed values, not text.
pub struct CsvSink<W: Write> {
    out: W,
    header_written: bool,
}

impl<W: Write> CsvSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            header_written: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_header(&mut self) -> Result<(), SinkError> {
        writeln!(self.out, "{}", CSV_HEADER.join(","))?;
        self.header_written = true;
        Ok(())
    }
}

impl<W: Write> TrajectorySink for CsvSink<W> {
    fn write_row(&mut self, row: &TrajectoryRow) -> Result<(), SinkError> {
        if !self.header_written {
            self.write_header()?;
        }
        writeln!(
            self.out,
            "{},{},{:?},{:?},{:?},{:?},{},{}",
            row.time,
            csv_field(row.vehicle_id.as_str()),
            row.x,
            row.y,
            row.speed,
            row.waiting_time,
            csv_field(row.lane_id.as_str()),
            row.violation_type.label(),
        )?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        if !self.header_written {
            self.write_header()?;
        }
        self.out.flush()?;
        Ok(())
    }
}

/// Quotes a field if it contains a separator, quote, or line break.
fn csv_field(value: &str) -> std::borrow::Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\"")).into()
    } else {
        value.into()
    }
}

/// One JSON object per line.
pub struct JsonLinesSink<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> TrajectorySink for JsonLinesSink<W> {
    fn write_row(&mut self, row: &TrajectoryRow) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.out, row)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.out.flush()?;
        Ok(())
    }
}

/// In-memory sink, mostly for tests.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub rows: Vec<TrajectoryRow>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TrajectorySink for MemorySink {
    fn write_row(&mut self, row: &TrajectoryRow) -> Result<(), SinkError> {
        self.rows.push(row.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(vehicle: &str, label: ViolationType) -> TrajectoryRow {
        TrajectoryRow {
            time: 3,
            vehicle_id: VehicleId::from(vehicle),
            x: 12.5,
            y: 0.0,
            speed: 7.25,
            waiting_time: 0.0,
            lane_id: LaneId::new("E1_0"),
            violation_type: label,
        }
    }

    #[test]
    fn test_csv_header_and_row() {
        let mut sink = CsvSink::new(Vec::new());
        sink.write_row(&row("morning_cars.0", ViolationType::None)).unwrap();
        sink.write_row(&row("morning_bikes.2", ViolationType::SpeedSurge)).unwrap();
        sink.flush().unwrap();

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "time,vehicle_id,x,y,speed,waiting_time,lane_id,violation_type");
        assert_eq!(lines[1], "3,morning_cars.0,12.5,0.0,7.25,0.0,E1_0,none");
        assert_eq!(lines[2], "3,morning_bikes.2,12.5,0.0,7.25,0.0,E1_0,speed_surge");
    }

    #[test]
    fn test_csv_extreme_floats_parse_back() {
        let mut sink = CsvSink::new(Vec::new());
        let mut r = row("v", ViolationType::None);
        r.x = 1e16;
        r.y = 1e-7;
        sink.write_row(&r).unwrap();

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let fields: Vec<&str> = text.lines().nth(1).unwrap().split(',').collect();
        assert!(!fields[2].contains('+'));
        assert_eq!(fields[2].parse::<f64>().unwrap(), 1e16);
        assert_eq!(fields[3].parse::<f64>().unwrap(), 1e-7);
    }

    #[test]
    fn test_csv_empty_log_still_has_header() {
        let mut sink = CsvSink::new(Vec::new());
        sink.flush().unwrap();
        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn test_csv_quotes_awkward_ids() {
        let mut sink = CsvSink::new(Vec::new());
        sink.write_row(&row("odd,\"id\"", ViolationType::None)).unwrap();
        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert!(text.lines().nth(1).unwrap().starts_with("3,\"odd,\"\"id\"\"\",12.5"));
    }

    #[test]
    fn test_json_lines() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.write_row(&row("v", ViolationType::WrongWayShort)).unwrap();
        let text = String::from_utf8(sink.into_inner()).unwrap();

        let value: serde_json::Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(value["vehicle_id"], "v");
        assert_eq!(value["violation_type"], "wrong_way_short");
        assert_eq!(value["lane_id"], "E1_0");
    }
}
