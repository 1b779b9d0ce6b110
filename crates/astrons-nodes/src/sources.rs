//! Message sources: randomized traffic, CSV-driven schedules, and periodic
//! position reports.

use astrons_core::{AttrValue, Message};
use astrons_engine::{
    BuildError, BuildSpec, BuiltNode, NodeBehavior, NodeCtx, NodeError, Param, StepOutput,
    StepResult,
};
use rand::Rng;

/// Emits messages with randomized sizes at randomized intervals.
#[derive(Debug)]
pub struct RandomDataSource {
    random_size_min: Param,
    random_size_max: Param,
    random_delay_min: Param,
    random_delay_max: Param,
    single_pulse: bool,
    active: bool,
    max_messages: Option<u64>,
    sent: u64,
}

pub fn random_data_source(spec: &BuildSpec<'_>) -> Result<BuiltNode, BuildError> {
    Ok(BuiltNode::new(Box::new(RandomDataSource {
        random_size_min: spec.param_f64("random_size_min", 10.0),
        random_size_max: spec.param_f64("random_size_max", 100.0),
        random_delay_min: spec.param_f64("random_delay_min", 1.0),
        random_delay_max: spec.param_f64("random_delay_max", 10.0),
        single_pulse: spec.config.flag("single_pulse").unwrap_or(false),
        active: spec.config.flag("start_node_active").unwrap_or(true),
        max_messages: spec.config.i64("max_messages").map(|n| n.max(0) as u64),
        sent: 0,
    })))
}

impl NodeBehavior for RandomDataSource {
    fn step(
        &mut self,
        ctx: &mut NodeCtx<'_>,
        _input: Option<Message>,
    ) -> Result<StepResult, NodeError> {
        if !self.active {
            return Ok(StepResult::Stop);
        }
        if let Some(max) = self.max_messages {
            if self.sent >= max {
                return Ok(StepResult::Stop);
            }
        }

        let size_lo = self.random_size_min.get(ctx) as i64;
        let size_hi = self.random_size_max.get(ctx) as i64;
        let delay_lo = self.random_delay_min.get(ctx);
        let delay_hi = self.random_delay_max.get(ctx);

        let size = if size_hi > size_lo {
            ctx.rng().gen_range(size_lo..=size_hi)
        } else {
            size_lo
        };
        let cooldown = if delay_hi > delay_lo {
            ctx.rng().gen_range(delay_lo..delay_hi)
        } else {
            delay_lo.max(0.0)
        };

        let mut msg = ctx.new_message();
        let size_key = ctx.size_key().to_string();
        msg.set(size_key, size);
        self.sent += 1;
        if self.single_pulse {
            self.active = false;
        }

        ctx.trace(
            &msg.id().to_string(),
            &format!(
                "Random Data Msg # |{}| sent. Cooling down |{:.6}| SimSeconds",
                self.sent, cooldown
            ),
        );
        Ok(StepResult::Continue(StepOutput::send(cooldown, 0.0, msg)))
    }
}

/// Replays rows from a CSV file as messages.
///
/// The configured `file_keys` name, in order: the ID column, the release
/// sim-time column, and the size column. The release time lands on the
/// message under `time_delay` for a downstream KeyDelayTime to act on.
#[derive(Debug)]
pub struct FileDataSource {
    rows: Vec<(String, f64, f64)>,
    next: usize,
}

const DEFAULT_FILE_KEYS: [&str; 3] = [
    "Collect_ID",
    "Collect_Start_Seconds_After_Sim_Epoch",
    "File_Size_Gbits",
];

pub fn file_data_source(spec: &BuildSpec<'_>) -> Result<BuiltNode, BuildError> {
    let file_name = spec.require_str("file_name")?;
    let delimiter = spec
        .config
        .str("delimiter")
        .and_then(|d| d.bytes().next())
        .unwrap_or(b',');
    let file_keys: Vec<String> = match spec.config.list("file_keys") {
        Some(list) if !list.is_empty() => list.iter().map(|v| v.to_string()).collect(),
        _ => DEFAULT_FILE_KEYS.iter().map(|k| k.to_string()).collect(),
    };
    if file_keys.len() != 3 {
        return Err(spec.bad_value("file_keys", "must name exactly 3 columns (id, time, size)"));
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .from_path(&file_name)
        .map_err(|e| spec.bad_value("file_name", &format!("could not be read: {}", e)))?;

    let headers = reader
        .headers()
        .map_err(|e| spec.bad_value("file_name", &format!("has no header row: {}", e)))?
        .clone();
    let mut indices = [0usize; 3];
    for (slot, key) in indices.iter_mut().zip(&file_keys) {
        *slot = headers
            .iter()
            .position(|h| h == key.as_str())
            .ok_or_else(|| spec.bad_value("file_keys", &format!("column '{}' not found", key)))?;
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|e| spec.bad_value("file_name", &format!("bad row: {}", e)))?;
        let id = record.get(indices[0]).unwrap_or("").to_string();
        let at: f64 = record
            .get(indices[1])
            .and_then(|v| v.trim().parse().ok())
            .ok_or_else(|| spec.bad_value("file_keys", "time column is not numeric"))?;
        let size: f64 = record
            .get(indices[2])
            .and_then(|v| v.trim().parse().ok())
            .ok_or_else(|| spec.bad_value("file_keys", "size column is not numeric"))?;
        rows.push((id, at, size));
    }

    Ok(BuiltNode::new(Box::new(FileDataSource { rows, next: 0 })))
}

impl NodeBehavior for FileDataSource {
    fn step(
        &mut self,
        ctx: &mut NodeCtx<'_>,
        _input: Option<Message>,
    ) -> Result<StepResult, NodeError> {
        let Some((id, at, size)) = self.rows.get(self.next).cloned() else {
            return Ok(StepResult::Stop);
        };
        self.next += 1;

        let mut msg = Message::with_id(id);
        msg.set("time_delay", at);
        let size_key = ctx.size_key().to_string();
        msg.set(size_key, size);
        ctx.trace(
            &msg.id().to_string(),
            &format!("Processed line #|{}| release at |{}|", self.next, at),
        );
        Ok(StepResult::Continue(StepOutput::send(0.0, 0.0, msg)))
    }
}

/// Periodically reports the owning platform's geodetic position.
#[derive(Debug)]
pub struct PositionReport {
    frequency: f64,
}

pub fn position_report(spec: &BuildSpec<'_>) -> Result<BuiltNode, BuildError> {
    Ok(BuiltNode::new(Box::new(PositionReport {
        frequency: spec.config.f64("frequency").unwrap_or(10.0),
    })))
}

impl NodeBehavior for PositionReport {
    fn step(
        &mut self,
        ctx: &mut NodeCtx<'_>,
        _input: Option<Message>,
    ) -> Result<StepResult, NodeError> {
        let Some((geo, _velocity)) = ctx.location() else {
            ctx.trace_node("This node does not belong to a meta node with a propagator.");
            return Ok(StepResult::Stop);
        };

        let mut msg = ctx.new_message();
        let size_key = ctx.size_key().to_string();
        msg.set(size_key, 0.0);
        msg.set(
            "position",
            AttrValue::List(vec![
                AttrValue::Float(geo.lat_deg),
                AttrValue::Float(geo.lon_deg),
                AttrValue::Float(geo.alt_km),
            ]),
        );
        ctx.trace(
            &msg.id().to_string(),
            &format!(
                "Position -- [{:.4}, {:.4}, {:.3}]",
                geo.lat_deg, geo.lon_deg, geo.alt_km
            ),
        );
        Ok(StepResult::Continue(StepOutput::send(
            self.frequency,
            self.frequency,
            msg,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Collector;
    use astrons_core::{keys, Config, SimTime};
    use astrons_engine::Simulation;
    use std::io::Write;

    fn build_spec<'a>(label: &'a str, tag: &'a str, config: &'a Config) -> BuildSpec<'a> {
        BuildSpec {
            label,
            type_tag: tag,
            config,
        }
    }

    #[test]
    fn test_random_source_respects_max_messages() {
        let mut config = Config::new();
        config.insert("max_messages", 5i64);
        config.insert("random_delay_min", 1.0);
        config.insert("random_delay_max", 2.0);
        let spec = build_spec("Gen", "randomdatasource", &config);

        let mut b = Simulation::builder(0);
        let src = b.add_node(
            "Gen",
            "RandomDataSource",
            config.clone(),
            random_data_source(&spec).unwrap().behavior,
            None,
        );
        let (collector, seen) = Collector::new();
        let sink = b.add_node("Sink", "Collector", Config::new(), Box::new(collector), None);
        b.connect(src, sink, None);

        let mut sim = b.build();
        sim.run_until(SimTime::from_secs(1000.0)).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 5);
        // sizes fall in the default [10, 100] range
        for (_, msg) in seen.iter() {
            let size = msg.size(keys::DEFAULT_SIZE);
            assert!((10.0..=100.0).contains(&size), "size {}", size);
        }
        // distinct reproducible IDs
        let ids: std::collections::HashSet<&str> = seen.iter().map(|(_, m)| m.id()).collect();
        assert_eq!(ids.len(), 5);
    }

    #[test]
    fn test_single_pulse_emits_once() {
        let mut config = Config::new();
        config.insert("single_pulse", true);
        let spec = build_spec("Gen", "randomdatasource", &config);

        let mut b = Simulation::builder(0);
        let src = b.add_node(
            "Gen",
            "RandomDataSource",
            config.clone(),
            random_data_source(&spec).unwrap().behavior,
            None,
        );
        let (collector, seen) = Collector::new();
        let sink = b.add_node("Sink", "Collector", Config::new(), Box::new(collector), None);
        b.connect(src, sink, None);

        let mut sim = b.build();
        sim.run_until(SimTime::from_secs(1000.0)).unwrap();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_file_source_replays_rows() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "Collect_ID,Collect_Start_Seconds_After_Sim_Epoch,File_Size_Gbits"
        )
        .unwrap();
        writeln!(file, "pass-1,5.0,12.5").unwrap();
        writeln!(file, "pass-2,30.0,40.0").unwrap();
        file.flush().unwrap();

        let mut config = Config::new();
        config.insert("file_name", file.path().to_str().unwrap());
        let spec = build_spec("Ops", "filedatasource", &config);

        let mut b = Simulation::builder(0);
        let src = b.add_node(
            "Ops",
            "FileDataSource",
            config.clone(),
            file_data_source(&spec).unwrap().behavior,
            None,
        );
        let (collector, seen) = Collector::new();
        let sink = b.add_node("Sink", "Collector", Config::new(), Box::new(collector), None);
        b.connect(src, sink, None);

        let mut sim = b.build();
        sim.run_until(SimTime::from_secs(100.0)).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].1.id(), "pass-1");
        assert_eq!(seen[0].1.get("time_delay").unwrap().as_f64(), Some(5.0));
        assert_eq!(seen[1].1.size(keys::DEFAULT_SIZE), 40.0);
    }

    #[test]
    fn test_file_source_missing_file_is_fatal() {
        let mut config = Config::new();
        config.insert("file_name", "/definitely/not/here.csv");
        let spec = build_spec("Ops", "filedatasource", &config);
        assert!(file_data_source(&spec).is_err());
    }

    #[test]
    fn test_file_source_requires_file_name() {
        let config = Config::new();
        let spec = build_spec("Ops", "filedatasource", &config);
        let err = file_data_source(&spec).unwrap_err();
        assert!(err.to_string().contains("file_name"));
    }

    #[test]
    fn test_position_report_without_propagator_stops() {
        let config = Config::new();
        let spec = build_spec("Beacon", "positionreport", &config);

        let mut b = Simulation::builder(0);
        let src = b.add_node(
            "Beacon",
            "PositionReport",
            config.clone(),
            position_report(&spec).unwrap().behavior,
            None,
        );
        let (collector, seen) = Collector::new();
        let sink = b.add_node("Sink", "Collector", Config::new(), Box::new(collector), None);
        b.connect(src, sink, None);

        let mut sim = b.build();
        sim.run_until(SimTime::from_secs(100.0)).unwrap();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_position_report_with_propagator() {
        let geo = crate::geopoint::GeoPoint::new(19.82, -155.47, 4.2);
        let config = Config::new();
        let spec = build_spec("Beacon", "positionreport", &config);

        let mut b = Simulation::builder(0);
        let meta = b.add_meta("Hawaii", None, Some(Box::new(geo)));
        let src = b.add_node(
            "Beacon",
            "PositionReport",
            config.clone(),
            position_report(&spec).unwrap().behavior,
            Some(meta),
        );
        let (collector, seen) = Collector::new();
        let sink = b.add_node("Sink", "Collector", Config::new(), Box::new(collector), None);
        b.connect(src, sink, None);

        let mut sim = b.build();
        sim.run_until(SimTime::from_secs(35.0)).unwrap();

        let seen = seen.lock().unwrap();
        // reports at t = 10, 20, 30 (R = Δ = frequency)
        assert_eq!(seen.len(), 3);
        let position = seen[0].1.get("position").unwrap().as_list().unwrap();
        assert_eq!(position[0].as_f64(), Some(19.82));
    }
}
