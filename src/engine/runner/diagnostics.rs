use std::borrow::Cow;
use std::fmt::Write;
use std::time::{Duration, Instant};

use crate::engine::{TaskExecution, WaveExecution};

/// Timing of a finished batch.
///
/// Returned as part of every [`Report`](crate::Report). Slot `i` of
/// `execution_times` belongs to task `i` of the batch.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    /// Start and duration of every task, in submission order.
    pub execution_times: Vec<TaskExecution>,
    /// The waves the batch ran in. Unbounded and pooled batches run as a
    /// single wave.
    pub waves: Vec<WaveExecution>,
    /// Indices of the tasks that panicked.
    pub failed: Vec<usize>,
}

impl Diagnostics {
    /// Wall clock time from the first task starting to the last one ending.
    pub fn total_duration(&self) -> Duration {
        let start = self.execution_times.iter().map(|t| t.start).min();
        let end = self.execution_times.iter().map(TaskExecution::end).max();

        match (start, end) {
            (Some(start), Some(end)) => end.duration_since(start),
            _ => Duration::ZERO,
        }
    }

    /// The longest single task in each wave. For wave throttled batches the
    /// total duration is roughly the sum of these.
    pub fn wave_critical_paths(&self) -> Vec<Duration> {
        let mut paths = vec![Duration::ZERO; self.waves.len()];
        for exec in &self.execution_times {
            if let Some(path) = paths.get_mut(exec.wave) {
                *path = (*path).max(exec.duration);
            }
        }
        paths
    }
}

// WATERFALL

const ROW: f64 = 24.0;
/// Width of the label column left of the chart.
const GUTTER: f64 = 120.0;
const CHART: f64 = 800.0;
const MARGIN: f64 = 10.0;
const AXIS: f64 = 30.0;
/// Room for the duration text behind the last bar.
const TRAILER: f64 = 80.0;
const TICKS: u32 = 5;

const STYLE: &str = r#"
text { font-family: ui-monospace, Menlo, Consolas, monospace; font-size: 12px; }
.row { fill: #ffffff; }
.row.alt { fill: #f4f4f5; }
.task { fill: #0ea5e9; rx: 3; }
.task.wave-odd { fill: #14b8a6; }
.task.panicked { fill: #dc2626; }
.name { fill: #27272a; }
.took { fill: #71717a; font-size: 11px; }
.tick { stroke: #e4e4e7; stroke-width: 1; }
.tick-label { fill: #a1a1aa; font-size: 10px; }
.wave-edge { stroke: #ea580c; stroke-width: 1.5; stroke-dasharray: 6 3; }
"#;

/// Escapes `text` for use inside SVG markup.
fn escape(text: &str) -> Cow<'_, str> {
    if !text.contains(['<', '>', '&', '"', '\'']) {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len() + 16);
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

fn human(duration: Duration) -> String {
    if duration < Duration::from_millis(1) {
        format!("{}µs", duration.as_micros())
    } else {
        format!("{:.2}ms", duration.as_secs_f64() * 1000.0)
    }
}

/// Maps batch time onto the horizontal axis of the chart.
struct Scale {
    origin: Instant,
    span: Duration,
}

impl Scale {
    fn of(tasks: &[TaskExecution]) -> Option<Self> {
        let origin = tasks.iter().map(|t| t.start).min()?;
        let end = tasks.iter().map(TaskExecution::end).max()?;

        // a zero span would put every bar at infinity
        let span = end.duration_since(origin).max(Duration::from_micros(1));

        Some(Self { origin, span })
    }

    fn width(&self, duration: Duration) -> f64 {
        duration.as_secs_f64() / self.span.as_secs_f64() * CHART
    }

    fn x(&self, at: Instant) -> f64 {
        GUTTER + MARGIN + self.width(at.saturating_duration_since(self.origin))
    }
}

impl Diagnostics {
    /// Renders a waterfall chart of the batch as an SVG file.
    pub fn render_waterfall_to_file(
        &self,
        label: &str,
        path: impl AsRef<std::path::Path>,
    ) -> Result<(), std::io::Error> {
        std::fs::write(path, self.render_waterfall(label))
    }

    /// Renders a waterfall chart of the batch as an SVG string, one row per
    /// task in submission order. Wave boundaries are drawn as dashed vertical
    /// lines, bars alternate colour per wave and panicked tasks are drawn in
    /// red. Rows are labelled `{label}#{index}`.
    pub fn render_waterfall(&self, label: &str) -> String {
        let mut svg = String::with_capacity(512 + self.execution_times.len() * 400);
        // formatting into a String never fails
        let _ = self.write_waterfall(&mut svg, &escape(label));
        svg
    }

    fn write_waterfall(&self, svg: &mut String, label: &str) -> std::fmt::Result {
        let width = GUTTER + CHART + 3.0 * MARGIN + TRAILER;
        let height = AXIS + self.execution_times.len() as f64 * ROW + MARGIN;

        write!(
            svg,
            r#"<svg width="{width}" height="{height}" xmlns="http://www.w3.org/2000/svg"><style>{STYLE}</style><rect width="100%" height="100%" fill="white" />"#
        )?;

        match Scale::of(&self.execution_times) {
            Some(scale) => {
                self.write_ticks(svg, &scale)?;
                self.write_rows(svg, &scale, label)?;
                self.write_wave_edges(svg, &scale)?;
            }
            None => write!(
                svg,
                r#"<text x="{MARGIN}" y="{AXIS}" class="name">No tasks ran</text>"#
            )?,
        }

        svg.push_str("</svg>");
        Ok(())
    }

    fn write_ticks(&self, svg: &mut String, scale: &Scale) -> std::fmt::Result {
        for step in 0..=TICKS {
            let x = GUTTER + MARGIN + CHART * f64::from(step) / f64::from(TICKS);
            let at = scale.span * step / TICKS;

            write!(
                svg,
                r#"<line class="tick" x1="{x:.1}" y1="{AXIS}" x2="{x:.1}" y2="100%" /><text class="tick-label" x="{x:.1}" y="{y}" text-anchor="middle">{at}</text>"#,
                y = AXIS - 5.0,
                at = human(at),
            )?;
        }
        Ok(())
    }

    fn write_rows(&self, svg: &mut String, scale: &Scale, label: &str) -> std::fmt::Result {
        for (index, exec) in self.execution_times.iter().enumerate() {
            let top = AXIS + index as f64 * ROW;
            let middle = top + ROW / 2.0;

            let row = if index % 2 == 1 { "row alt" } else { "row" };
            let task = if self.failed.contains(&index) {
                "task panicked"
            } else if exec.wave % 2 == 1 {
                "task wave-odd"
            } else {
                "task"
            };

            let x = scale.x(exec.start);
            let w = scale.width(exec.duration).max(1.0);

            write!(
                svg,
                r#"<rect class="{row}" x="0" y="{top}" width="100%" height="{ROW}" />"#
            )?;
            write!(
                svg,
                r#"<text class="name" x="{MARGIN}" y="{middle}" dominant-baseline="middle">{label}#{index}</text>"#
            )?;
            write!(
                svg,
                r#"<rect class="{task}" x="{x:.1}" y="{y}" width="{w:.1}" height="{h}"><title>{label}#{index}, wave {wave}: {took:.2?}</title></rect>"#,
                y = top + 4.0,
                h = ROW - 8.0,
                wave = exec.wave,
                took = exec.duration,
            )?;
            write!(
                svg,
                r#"<text class="took" x="{x:.1}" y="{middle}" dominant-baseline="middle">{took}</text>"#,
                x = x + w + 5.0,
                took = human(exec.duration),
            )?;
        }
        Ok(())
    }

    /// Drawn last so the edges stay visible on top of the bars.
    fn write_wave_edges(&self, svg: &mut String, scale: &Scale) -> std::fmt::Result {
        // the first wave starts at the origin
        for wave in self.waves.iter().skip(1) {
            write!(
                svg,
                r#"<line class="wave-edge" x1="{x:.1}" y1="{AXIS}" x2="{x:.1}" y2="100%" />"#,
                x = scale.x(wave.start),
            )?;
        }
        Ok(())
    }
}
