//! Simulation output: per-entity log files and the end-of-run JSON report.
//!
//! Log lines follow the `time;entity;code;level message` format. Every
//! entity (system, each node, the controller) owns one logger that can
//! write to a file under `./output/`, echo to the console, both, or
//! neither.

use anyhow::Context;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::scheduler::Time;
use crate::simulation::types::{NodeKind, Performance};

pub struct EntityLogger {
    entity: String,
    file: Option<BufWriter<File>>,
    print: bool,
}

impl EntityLogger {
    /// Logger that drops everything.
    pub fn disabled(entity: &str) -> Self {
        Self {
            entity: entity.to_string(),
            file: None,
            print: false,
        }
    }

    pub fn new(dir: &Path, entity: &str, write: bool, print: bool) -> anyhow::Result<Self> {
        let file = if write {
            let path = dir.join(format!("log_{entity}.txt"));
            let file = File::create(&path)
                .with_context(|| format!("failed to create log file {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            writeln!(
                writer,
                "# {} simulation log, started {}",
                entity,
                chrono::Local::now().to_rfc3339()
            )?;
            Some(writer)
        } else {
            None
        };
        Ok(Self {
            entity: entity.to_string(),
            file,
            print,
        })
    }

    /// Emit one `time;entity;code;level message` line.
    pub fn log(&mut self, time: Time, code: &str, level: u8, message: &str) {
        if self.file.is_none() && !self.print {
            return;
        }
        let line = format!("{time:.9};{};{code};L{level} {message}", self.entity);
        if let Some(file) = &mut self.file {
            let _ = writeln!(file, "{line}");
        }
        if self.print {
            println!("{line}");
        }
    }

    pub fn flush(&mut self) {
        if let Some(file) = &mut self.file {
            let _ = file.flush();
        }
    }
}

/// The loggers of one simulation run.
pub struct SimulationLogs {
    pub system: EntityLogger,
    pub nodes: Vec<EntityLogger>,
    pub controller: EntityLogger,
}

impl SimulationLogs {
    /// Create loggers under `./output/` for the given node codes.
    pub fn create(
        node_codes: &[String],
        write_system: bool,
        write_nodes: bool,
        print_system: bool,
        print_nodes: bool,
    ) -> anyhow::Result<Self> {
        let dir = PathBuf::from("./output");
        if write_system || write_nodes {
            fs::create_dir_all(&dir).context("failed to create ./output")?;
        }
        let system = EntityLogger::new(&dir, "system", write_system, print_system)?;
        let controller = EntityLogger::new(&dir, "controller", write_system, print_system)?;
        let nodes = node_codes
            .iter()
            .map(|code| EntityLogger::new(&dir, &format!("node_{code}"), write_nodes, print_nodes))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self {
            system,
            nodes,
            controller,
        })
    }

    /// Silent set (tests, library use).
    pub fn disabled(num_nodes: usize) -> Self {
        Self {
            system: EntityLogger::disabled("system"),
            nodes: (0..num_nodes)
                .map(|i| EntityLogger::disabled(&format!("node_{i}")))
                .collect(),
            controller: EntityLogger::disabled("controller"),
        }
    }

    pub fn flush(&mut self) {
        self.system.flush();
        self.controller.flush();
        for node in &mut self.nodes {
            node.flush();
        }
    }
}

/// Per-node slice of the final report.
#[derive(Debug, Serialize)]
pub struct NodeReport {
    pub code: String,
    pub kind: NodeKind,
    pub wlan: String,
    pub performance: Performance,
    /// Histogram indexed by loss-reason code.
    pub loss_reasons: Vec<u64>,
}

/// End-of-run statistics document written to the script-output path.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub simulation_code: String,
    pub generated_at: String,
    pub simulation_time: Time,
    pub random_seed: u64,
    pub events_processed: u64,
    pub wall_seconds: f64,
    pub events_per_second: f64,
    pub nodes: Vec<NodeReport>,
}

impl SimulationReport {
    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let json = serde_json::to_string_pretty(self).context("failed to serialize report")?;
        fs::write(path, json)
            .with_context(|| format!("failed to write report {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_logger_is_a_no_op() {
        let mut logger = EntityLogger::disabled("node_X");
        logger.log(1.25, "TXS", 2, "should vanish");
        logger.flush();
    }

    #[test]
    fn report_serializes_with_all_sections() {
        let report = SimulationReport {
            simulation_code: "SIM_TEST".into(),
            generated_at: chrono::Local::now().to_rfc3339(),
            simulation_time: 10.0,
            random_seed: 42,
            events_processed: 1000,
            wall_seconds: 0.5,
            events_per_second: 2000.0,
            nodes: vec![NodeReport {
                code: "AP_A".into(),
                kind: NodeKind::Ap,
                wlan: "A".into(),
                performance: Performance::default(),
                loss_reasons: vec![0; 11],
            }],
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"simulation_code\":\"SIM_TEST\""));
        assert!(json.contains("\"code\":\"AP_A\""));
        assert!(json.contains("\"loss_reasons\""));
    }
}
