use anyhow::Result;
use serde_json::Value as JsonValue;
use std::io::{self, IsTerminal, Write};

use crate::driver::RunReport;
use crate::event::{DrawInstruction, RunEvent, Severity};
use crate::stats::{Lane, RunStats};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Narrated run output; data commands fall back to YAML.
    Text,
    Yaml,
    Json,
    Raw,
}

pub fn emit_data(fmt: &OutputFormat, data: &JsonValue) -> Result<()> {
    let mut out = io::stdout().lock();
    write_data(&mut out, fmt, data)?;
    out.flush()?;
    Ok(())
}

pub fn write_data<W: Write>(out: &mut W, fmt: &OutputFormat, data: &JsonValue) -> Result<()> {
    match fmt {
        OutputFormat::Text | OutputFormat::Yaml => {
            let s = serde_yaml::to_string(data)?;
            writeln!(out, "{}", s.trim_end())?;
        }
        OutputFormat::Json => {
            let s = serde_json::to_string_pretty(data)?;
            writeln!(out, "{}", s)?;
        }
        OutputFormat::Raw => {
            if let Some(s) = data.as_str() {
                writeln!(out, "{}", s)?;
            } else {
                writeln!(out, "{}", serde_json::to_string(data)?)?;
            }
        }
    }
    Ok(())
}

pub fn emit_error(err: &anyhow::Error) -> Result<()> {
    let mut map = serde_json::Map::new();
    map.insert("error".into(), JsonValue::String(err.to_string()));
    let causes: Vec<JsonValue> = err.chain().skip(1).map(|c| JsonValue::String(c.to_string())).collect();
    if !causes.is_empty() {
        map.insert("caused_by".into(), JsonValue::Array(causes));
    }
    let s = serde_yaml::to_string(&JsonValue::Object(map))?;
    let _ = writeln!(io::stderr(), "{}", s.trim_end());
    Ok(())
}

const BAR_WIDTH: usize = 30;

/// Presents the event stream of one run.
///
/// Text mode prints narration and draws bars; JSON mode prints one object per
/// event followed by the report; YAML mode prints only the final report.
pub struct Renderer<W: Write> {
    out: W,
    fmt: OutputFormat,
    color: bool,
    interactive: bool,
    progress_open: bool,
}

impl Renderer<io::Stdout> {
    pub fn stdout(fmt: OutputFormat, color: bool) -> Self {
        let interactive = io::stdout().is_terminal();
        Renderer::new(io::stdout(), fmt, color, interactive)
    }
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W, fmt: OutputFormat, color: bool, interactive: bool) -> Self {
        Self {
            out,
            fmt,
            color,
            interactive,
            progress_open: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn event(&mut self, ev: &RunEvent) -> Result<()> {
        match self.fmt {
            OutputFormat::Json => {
                writeln!(self.out, "{}", serde_json::to_string(ev)?)?;
            }
            OutputFormat::Text | OutputFormat::Raw => self.text_event(ev)?,
            OutputFormat::Yaml => {}
        }
        self.out.flush()?;
        Ok(())
    }

    pub fn finish(&mut self, report: &RunReport) -> Result<()> {
        match self.fmt {
            OutputFormat::Json => {
                let v = serde_json::json!({ "event": "report", "report": report });
                writeln!(self.out, "{}", serde_json::to_string(&v)?)?;
            }
            OutputFormat::Yaml => {
                let v = serde_json::to_value(report)?;
                write_data(&mut self.out, &OutputFormat::Yaml, &v)?;
            }
            OutputFormat::Text | OutputFormat::Raw => {
                self.close_progress()?;
                let line = stats_line(&report.stats);
                writeln!(self.out, "{}", line)?;
            }
        }
        self.out.flush()?;
        Ok(())
    }

    fn text_event(&mut self, ev: &RunEvent) -> Result<()> {
        match ev {
            RunEvent::Log(entry) => {
                self.close_progress()?;
                let line = self.paint(severity_code(entry.severity), &entry.line());
                writeln!(self.out, "{}", line)?;
            }
            // stat snapshots are summarized once the run is over
            RunEvent::Stats(_) => {}
            RunEvent::Draw(d) => self.draw(d)?,
        }
        Ok(())
    }

    fn draw(&mut self, d: &DrawInstruction) -> Result<()> {
        let line = match d {
            DrawInstruction::Progress {
                elapsed_secs, wait_secs, ..
            } => {
                if self.interactive {
                    write!(self.out, "\r\x1b[2K  Waiting: {:.1}s / {:?}s", elapsed_secs, wait_secs)?;
                    self.progress_open = true;
                }
                return Ok(());
            }
            // the narration line carries the attempt result
            DrawInstruction::Attempt { .. } => return Ok(()),
            DrawInstruction::Header { lane, title } => match lane {
                Lane::NoBackoff => self.paint("31;1", &format!("== {title} ==")),
                Lane::Backoff => self.paint("32;1", &format!("== {title} ==")),
                _ => self.paint("34;1", &format!("== {title} ==")),
            },
            DrawInstruction::LoadBar { lane, load } => {
                let bar = bar(*load as f64 / 100.0);
                let who = match lane {
                    Lane::Single => "Server".to_string(),
                    other => format!("Server ({other})"),
                };
                format!("  {who:<22} [{}] {load}%", self.paint(load_code(*load), &bar))
            }
            DrawInstruction::JitterSample {
                label,
                base_secs,
                jitter_secs,
                ..
            } => {
                let total = base_secs + jitter_secs;
                format!("  Sample {label}  [{}]", bar(total / (base_secs * 1.6)))
            }
            DrawInstruction::GraphPoint {
                index,
                wait_secs,
                max_wait_secs,
            } => {
                let ratio = if *max_wait_secs > 0.0 { wait_secs / max_wait_secs } else { 1.0 };
                format!("  #{:<3} [{}] {:?}s", index + 1, bar(ratio), wait_secs)
            }
            DrawInstruction::Summary { lane, text } => match lane {
                Some(Lane::NoBackoff) => self.paint("31", &format!("  >> {text}")),
                Some(_) => self.paint("32", &format!("  >> {text}")),
                None => format!("  >> {text}"),
            },
        };
        self.close_progress()?;
        writeln!(self.out, "{}", line)?;
        Ok(())
    }

    fn close_progress(&mut self) -> Result<()> {
        if self.progress_open {
            write!(self.out, "\r\x1b[2K")?;
            self.progress_open = false;
        }
        Ok(())
    }

    fn paint(&self, code: &str, s: &str) -> String {
        if self.color {
            format!("\x1b[{code}m{s}\x1b[0m")
        } else {
            s.to_string()
        }
    }
}

pub fn stats_line(stats: &RunStats) -> String {
    format!(
        "Clients: {} | Requests Sent: {} | Failed: {} | Total Wait: {:?}s | Server Load: {}% | Status: {}",
        stats.clients,
        stats.total_requests,
        stats.total_failures,
        round2(stats.total_wait_secs),
        stats.final_load,
        stats.status
    )
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn bar(ratio: f64) -> String {
    let filled = ((ratio.clamp(0.0, 1.0)) * BAR_WIDTH as f64).round() as usize;
    format!("{}{}", "#".repeat(filled), "-".repeat(BAR_WIDTH - filled))
}

fn severity_code(s: Severity) -> &'static str {
    match s {
        Severity::Info => "34",
        Severity::Success => "32",
        Severity::Warning => "33",
        Severity::Error => "31",
    }
}

fn load_code(load: u8) -> &'static str {
    if load > 80 {
        "31"
    } else if load > 50 {
        "33"
    } else {
        "32"
    }
}
