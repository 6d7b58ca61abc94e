//! HTML dashboard of recent runs.
//!
//! Rendered with tera from `<template_dir>/index.html` when one is
//! installed, or from the built-in table below, into `<log_root>/index.html`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use tera::{Context, Tera};
use tracing::{debug, info};

use crate::error::LedgerError;
use crate::pipeline::{Stage, StageStatus};
use crate::storage::ledger::CompressedRunStatus;

const BUILTIN_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{{ title }}</title>
<style>
.text-success { color: #198754; }
.text-warning { color: #b58105; }
.text-error { color: #dc3545; }
td, th { padding: 0.2em 0.8em; text-align: left; }
</style>
</head>
<body>
<h1>{{ title }}</h1>
<p>Last updated {{ modified }}</p>
<table>
<thead><tr><th>MJD</th>{% for stage in stages %}<th>{{ stage }}</th>{% endfor %}<th>Report</th></tr></thead>
<tbody>
{% for row in rows %}<tr><td>{{ row.date }}</td>{% for cell in row.cells %}<td class="{{ cell.color }}" title="{{ cell.timestamp }}">{{ cell.status }}</td>{% endfor %}<td>{{ row.logfile }}</td></tr>
{% endfor %}</tbody>
</table>
</body>
</html>
"#;

#[derive(Debug, Serialize)]
struct Cell {
    status: String,
    color: String,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct Row {
    date: u32,
    logfile: String,
    cells: Vec<Cell>,
}

/// CSS class per status.
pub fn status_colors() -> BTreeMap<StageStatus, &'static str> {
    BTreeMap::from([
        (StageStatus::Failure, "text-error"),
        (StageStatus::Incomplete, "text-warning"),
        (StageStatus::Success, "text-success"),
    ])
}

/// Renders the multi-run status page for one observatory and mode.
#[derive(Debug, Clone)]
pub struct Dashboard {
    log_root: PathBuf,
    observatory: String,
    mode: Option<String>,
    template_dir: Option<PathBuf>,
}

impl Dashboard {
    pub fn new(log_root: impl Into<PathBuf>, observatory: &str, mode: Option<&str>) -> Self {
        Self {
            log_root: log_root.into(),
            observatory: observatory.to_string(),
            mode: mode.map(String::from),
            template_dir: None,
        }
    }

    pub fn with_template_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.template_dir = dir;
        self
    }

    pub fn output_path(&self) -> PathBuf {
        self.log_root.join("index.html")
    }

    pub fn title(&self) -> String {
        match &self.mode {
            Some(mode) => format!(
                "{} {} Data Transfer Status",
                self.observatory.to_uppercase(),
                mode.to_uppercase()
            ),
            None => format!("{} Data Transfer Status", self.observatory.to_uppercase()),
        }
    }

    fn template(&self) -> Result<String, LedgerError> {
        if let Some(dir) = &self.template_dir {
            let path = dir.join("index.html");
            if path.exists() {
                debug!("Using template {}", path.display());
                return Ok(std::fs::read_to_string(path)?);
            }
        }
        Ok(BUILTIN_TEMPLATE.to_string())
    }

    pub fn context(&self, histories: &[CompressedRunStatus]) -> Context {
        let colors = status_colors();
        let rows: Vec<Row> = histories
            .iter()
            .map(|run| Row {
                date: run.date.value(),
                logfile: run.logfile.clone().unwrap_or_default(),
                cells: Stage::ALL
                    .into_iter()
                    .map(|stage| match run.latest(stage) {
                        Some(entry) => Cell {
                            status: entry.status.to_string(),
                            color: colors.get(&entry.status).copied().unwrap_or("").to_string(),
                            timestamp: entry.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                        },
                        None => Cell {
                            status: String::new(),
                            color: String::new(),
                            timestamp: String::new(),
                        },
                    })
                    .collect(),
            })
            .collect();
        let color_names: BTreeMap<&str, &str> =
            colors.iter().map(|(status, class)| (status.as_str(), *class)).collect();
        let stages: Vec<&str> = Stage::ALL.iter().map(Stage::as_str).collect();

        let mut context = Context::new();
        context.insert("title", &self.title());
        context.insert("stages", &stages);
        context.insert("colors", &color_names);
        context.insert("modified", &Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string());
        context.insert("histories", histories);
        context.insert("rows", &rows);
        context.insert("observatory", &self.observatory);
        context.insert("mode", &self.mode.clone().unwrap_or_default());
        context
    }

    pub fn render(&self, histories: &[CompressedRunStatus]) -> Result<String, LedgerError> {
        let template = self.template()?;
        Ok(Tera::one_off(&template, &self.context(histories), true)?)
    }

    /// Renders and writes `index.html`, returning its path.
    pub fn write(&self, histories: &[CompressedRunStatus]) -> Result<PathBuf, LedgerError> {
        let html = self.render(histories)?;
        std::fs::create_dir_all(&self.log_root)?;
        let path = self.output_path();
        std::fs::write(&path, html)?;
        info!("UPDATE {}", path.display());
        Ok(path)
    }
}

/// Directory holding a custom `index.html`, from `TRANSFER_TEMPLATE_DIR`.
pub fn template_dir_from_env() -> Option<PathBuf> {
    std::env::var_os("TRANSFER_TEMPLATE_DIR").map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Mjd;
    use crate::storage::ledger::{compress, HistoryEntry, RunStatus};
    use tempfile::TempDir;

    fn sample() -> Vec<CompressedRunStatus> {
        let status = RunStatus {
            date: Mjd(60000),
            history: vec![
                HistoryEntry {
                    stage: Stage::Download,
                    status: StageStatus::Success,
                    timestamp: Utc::now(),
                },
                HistoryEntry {
                    stage: Stage::Verify,
                    status: StageStatus::Failure,
                    timestamp: Utc::now(),
                },
            ],
            logfile: Some("2023-02-24.12:00:01.log".to_string()),
        };
        vec![compress(&status)]
    }

    #[test]
    fn test_title() {
        let dashboard = Dashboard::new("/tmp/atlogs", "apo", Some("mos"));
        assert_eq!(dashboard.title(), "APO MOS Data Transfer Status");
        let dashboard = Dashboard::new("/tmp/atlogs", "lco", None);
        assert_eq!(dashboard.title(), "LCO Data Transfer Status");
    }

    #[test]
    fn test_builtin_render() {
        let dashboard = Dashboard::new("/tmp/atlogs", "apo", Some("mos"));
        let html = dashboard.render(&sample()).unwrap();
        assert!(html.contains("APO MOS Data Transfer Status"));
        assert!(html.contains("<td>60000</td>"));
        assert!(html.contains("class=\"text-success\""));
        assert!(html.contains("class=\"text-error\""));
        assert!(html.contains("2023-02-24.12:00:01.log"));
    }

    #[test]
    fn test_custom_template_and_write() {
        let temp = TempDir::new().unwrap();
        let templates = temp.path().join("templates");
        std::fs::create_dir_all(&templates).unwrap();
        std::fs::write(
            templates.join("index.html"),
            "{{ observatory }}:{% for run in histories %}{{ run.date }};{% endfor %}",
        )
        .unwrap();

        let log_root = temp.path().join("atlogs");
        let dashboard =
            Dashboard::new(&log_root, "lco", Some("lvm")).with_template_dir(Some(templates));
        let path = dashboard.write(&sample()).unwrap();
        assert_eq!(path, log_root.join("index.html"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "lco:60000;");
    }
}
