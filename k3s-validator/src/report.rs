//! Report rendering.
//!
//! Text output is produced in two parts: [`TextStreamObserver`] prints one
//! line per result while the run is in progress, and [`render_summary`]
//! closes the report once the suite is final. JSON and HTML are rendered once
//! from the final suite by [`render`].
//!
//! Rendering only reads the suite.

use std::io::{self, IsTerminal, Write};

use colored::Colorize;
use serde::Serialize;
use tracing::warn;

use k3s_validator_core::{
    ModuleOutcome, ModuleRecord, ReportFormat, ResultObserver, TestResult, TestStatus, TestSuite,
};

use crate::modules::PlanEntry;

/// Streams one line per result as the collector stores it.
pub struct TextStreamObserver {
    writer: Box<dyn Write + Send>,
    color: bool,
}

impl TextStreamObserver {
    /// Observer writing to stdout, colored when stdout is a terminal.
    pub fn stdout() -> Self {
        let color = io::stdout().is_terminal();
        Self::new(Box::new(io::stdout()), color)
    }

    pub fn new(writer: Box<dyn Write + Send>, color: bool) -> Self {
        Self { writer, color }
    }
}

impl ResultObserver for TextStreamObserver {
    fn on_result(&mut self, result: &TestResult) {
        let line = result_line(result, self.color);
        if let Err(e) = writeln!(self.writer, "{line}").and_then(|()| self.writer.flush()) {
            warn!(error = %e, "failed to stream result line");
        }
    }

    fn on_module(&mut self, record: &ModuleRecord) {
        let note = match &record.outcome {
            ModuleOutcome::Failed { reason } => format!("module {} aborted: {reason}", record.module),
            ModuleOutcome::Cancelled => format!("module {} cancelled", record.module),
            _ => return,
        };
        if let Err(e) = writeln!(self.writer, "       {}/{note}", record.category) {
            warn!(error = %e, "failed to stream module line");
        }
    }
}

/// `[PASS] core/dns internal-resolution: message`
pub fn result_line(result: &TestResult, color: bool) -> String {
    let label = format!("[{}]", result.status.label());
    let label = if color {
        match result.status {
            TestStatus::Pass => label.green().bold().to_string(),
            TestStatus::Fail => label.red().bold().to_string(),
            TestStatus::Warn => label.yellow().bold().to_string(),
            TestStatus::Skip => label.dimmed().to_string(),
        }
    } else {
        label
    };
    format!(
        "{label} {}/{} {}: {}",
        result.category, result.module, result.name, result.message
    )
}

/// Render the complete final report.
///
/// For [`ReportFormat::Text`] this is every result line followed by the
/// summary; use [`render_summary`] when the lines were already streamed.
///
/// # Errors
///
/// Propagates write and serialization failures.
pub fn render(suite: &TestSuite, format: ReportFormat, w: &mut dyn Write) -> io::Result<()> {
    match format {
        ReportFormat::Text => {
            for result in suite.results() {
                writeln!(w, "{}", result_line(result, false))?;
            }
            render_summary(suite, w)
        }
        ReportFormat::Json => render_json(suite, w),
        ReportFormat::Html => render_html(suite, w),
    }
}

/// Text summary. The last line always ends with `N failed.`
pub fn render_summary(suite: &TestSuite, w: &mut dyn Write) -> io::Result<()> {
    let modules = suite.modules();
    let count = |label: &str| {
        modules
            .iter()
            .filter(|m| m.outcome.as_str() == label)
            .count()
    };

    writeln!(w)?;
    writeln!(w, "=== {} summary ===", suite.name())?;
    if let Some(duration) = suite.duration() {
        writeln!(w, "Duration: {:.1}s", duration.as_secs_f64())?;
    }
    writeln!(
        w,
        "Modules: {} completed, {} aborted, {} missing, {} disabled, {} cancelled",
        count("completed"),
        count("failed"),
        suite.missing_modules(),
        count("disabled"),
        count("cancelled"),
    )?;

    let failures: Vec<&TestResult> = suite
        .results()
        .iter()
        .filter(|r| r.status == TestStatus::Fail)
        .collect();
    if !failures.is_empty() {
        writeln!(w, "Failures:")?;
        for result in failures {
            writeln!(w, "  {}", result_line(result, false))?;
        }
    }

    writeln!(
        w,
        "{} tests: {} passed, {} warned, {} skipped, {} failed.",
        suite.total(),
        suite.passed(),
        suite.warned(),
        suite.skipped(),
        suite.failed()
    )
}

#[derive(Serialize)]
struct JsonReport<'a> {
    success: bool,
    total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_ms: Option<u64>,
    #[serde(flatten)]
    suite: &'a TestSuite,
}

fn render_json(suite: &TestSuite, w: &mut dyn Write) -> io::Result<()> {
    let report = JsonReport {
        success: suite.is_success(),
        total: suite.total(),
        duration_ms: suite.duration().map(|d| d.as_millis() as u64),
        suite,
    };
    serde_json::to_writer_pretty(&mut *w, &report).map_err(io::Error::from)?;
    writeln!(w)
}

const HTML_STYLE: &str = "\
body{font-family:sans-serif;margin:2em;color:#222}\
table{border-collapse:collapse;width:100%}\
th,td{border:1px solid #ccc;padding:4px 8px;text-align:left;vertical-align:top}\
th{background:#f0f0f0}\
.pass{color:#1a7f37}.fail{color:#cf222e;font-weight:bold}\
.warn{color:#9a6700}.skip{color:#6e7781}\
.counters span{margin-right:1.5em}";

/// Document prologue up to and including the `<h1>`.
fn html_open(w: &mut dyn Write, title: &str) -> io::Result<()> {
    let title = escape_html(title);
    writeln!(w, "<!DOCTYPE html>")?;
    writeln!(w, "<html lang=\"en\">")?;
    writeln!(w, "<head>")?;
    writeln!(w, "<meta charset=\"utf-8\">")?;
    writeln!(w, "<title>{title} report</title>")?;
    writeln!(w, "<style>{HTML_STYLE}</style>")?;
    writeln!(w, "</head>")?;
    writeln!(w, "<body>")?;
    writeln!(w, "<h1>{title}</h1>")
}

fn render_html(suite: &TestSuite, w: &mut dyn Write) -> io::Result<()> {
    html_open(w, suite.name())?;
    writeln!(
        w,
        "<p>Started {}{}</p>",
        suite.started_at().to_rfc3339(),
        suite
            .duration()
            .map(|d| format!(", took {:.1}s", d.as_secs_f64()))
            .unwrap_or_default()
    )?;
    writeln!(
        w,
        "<p class=\"counters\"><span class=\"pass\">{} passed</span><span class=\"fail\">{} failed</span>\
         <span class=\"warn\">{} warned</span><span class=\"skip\">{} skipped</span><span>{} missing modules</span></p>",
        suite.passed(),
        suite.failed(),
        suite.warned(),
        suite.skipped(),
        suite.missing_modules()
    )?;

    writeln!(w, "<h2>Results</h2>")?;
    writeln!(w, "<table>")?;
    writeln!(
        w,
        "<tr><th>Status</th><th>Category</th><th>Module</th><th>Test</th><th>Message</th></tr>"
    )?;
    for result in suite.results() {
        writeln!(
            w,
            "<tr><td class=\"{}\">{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            result.status.as_str(),
            result.status.label(),
            result.category,
            escape_html(&result.module),
            escape_html(&result.name),
            escape_html(&result.message)
        )?;
    }
    writeln!(w, "</table>")?;

    writeln!(w, "<h2>Modules</h2>")?;
    writeln!(w, "<table>")?;
    writeln!(w, "<tr><th>Category</th><th>Module</th><th>Outcome</th><th>Duration</th></tr>")?;
    for record in suite.modules() {
        let outcome = match &record.outcome {
            ModuleOutcome::Failed { reason } => format!("failed: {}", escape_html(reason)),
            other => other.as_str().to_owned(),
        };
        writeln!(
            w,
            "<tr><td>{}</td><td>{}</td><td>{outcome}</td><td>{} ms</td></tr>",
            record.category,
            escape_html(&record.module),
            record.duration_ms
        )?;
    }
    writeln!(w, "</table>")?;
    writeln!(w, "</body>")?;
    writeln!(w, "</html>")
}

/// Escape text for HTML element and attribute content.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Dry-run plan: one entry per selected module, in the requested format.
///
/// # Errors
///
/// Propagates write and serialization failures.
pub fn render_plan(plan: &[PlanEntry], format: ReportFormat, w: &mut dyn Write) -> io::Result<()> {
    match format {
        ReportFormat::Text => render_plan_text(plan, w),
        ReportFormat::Json => {
            serde_json::to_writer_pretty(&mut *w, plan).map_err(io::Error::from)?;
            writeln!(w)
        }
        ReportFormat::Html => render_plan_html(plan, w),
    }
}

fn render_plan_html(plan: &[PlanEntry], w: &mut dyn Write) -> io::Result<()> {
    html_open(w, "k3s-validation plan")?;
    writeln!(w, "<p>{} modules</p>", plan.len())?;
    writeln!(w, "<table>")?;
    writeln!(w, "<tr><th>Category</th><th>Module</th><th>Status</th><th>Path</th></tr>")?;
    for entry in plan {
        let path = entry
            .path
            .as_ref()
            .map(|p| escape_html(&p.display().to_string()))
            .unwrap_or_default();
        writeln!(
            w,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{path}</td></tr>",
            entry.category,
            entry.module,
            entry.status.as_str()
        )?;
    }
    writeln!(w, "</table>")?;
    writeln!(w, "</body>")?;
    writeln!(w, "</html>")
}

fn render_plan_text(plan: &[PlanEntry], w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "Execution plan ({} modules):", plan.len())?;
    for entry in plan {
        match &entry.path {
            Some(path) => writeln!(
                w,
                "  {:<14} {:<22} {} ({})",
                entry.category.as_str(),
                entry.module,
                entry.status.as_str(),
                path.display()
            )?,
            None => writeln!(
                w,
                "  {:<14} {:<22} {}",
                entry.category.as_str(),
                entry.module,
                entry.status.as_str()
            )?,
        }
    }
    Ok(())
}
