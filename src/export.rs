// Tabular export: value transforms and delimited row assembly
//
// Columns are laid out in rank order regardless of the evaluation order
// used for a tick. A generator that is not due contributes empty cells so
// rows stay aligned; a tick where nothing is due produces no row.

use crate::config::{ExportTransform, GeneratorConfig};
use crate::error::{GeneratorError, GeneratorResult};

pub struct ExportPipeline {
    separator: String,
    precision: usize,
    export_date_time: bool,
    export_event_count: bool,
    export_lags: Vec<usize>,
    transform: ExportTransform,
    /// Exported series ids, ascending by rank
    columns: Vec<String>,
    counter: u64,
}

impl ExportPipeline {
    pub fn new(run: &GeneratorConfig, columns: Vec<String>) -> Self {
        Self {
            separator: run.separator.clone(),
            precision: run.decimal_precision,
            export_date_time: run.export_date_time,
            export_event_count: run.export_event_count,
            export_lags: run.export_lags.clone(),
            transform: run.export_transform,
            columns,
            counter: 0,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of cells each series contributes to a row.
    pub fn cells_per_series(&self) -> usize {
        1 + self.export_lags.len()
    }

    /// The deepest lag the configured transform reads at a given offset.
    pub fn max_lag_needed(&self) -> usize {
        let base = self.export_lags.iter().copied().max().unwrap_or(0);
        match self.transform {
            ExportTransform::Raw => base,
            ExportTransform::Difference { five_point: false } => base + 1,
            ExportTransform::Difference { five_point: true } => base + 4,
            ExportTransform::MovingAverage { window, offset } => {
                base + offset + window.saturating_sub(1)
            }
        }
    }

    /// Apply the configured transform at one lag offset. `fresh` is the
    /// value just produced by the generator's advance and takes the place
    /// of the lag-0 buffer read for the raw transform, so an outlier
    /// perturbation reaches the export even though the buffer keeps the
    /// raw value.
    pub fn transform_at<F>(
        &self,
        lag: usize,
        fresh: Option<f64>,
        lookup: F,
    ) -> GeneratorResult<Option<f64>>
    where
        F: Fn(usize) -> Option<f64>,
    {
        let need = |l: usize| -> GeneratorResult<f64> {
            lookup(l).ok_or_else(|| {
                GeneratorError::InsufficientHistory(format!(
                    "transform needs a value at lag {}",
                    l
                ))
            })
        };

        match self.transform {
            ExportTransform::Raw => {
                if lag == 0 {
                    Ok(fresh.or_else(|| lookup(0)))
                } else {
                    Ok(lookup(lag))
                }
            }
            ExportTransform::Difference { five_point: false } => {
                Ok(Some(need(lag)? - need(lag + 1)?))
            }
            ExportTransform::Difference { five_point: true } => {
                let v = (-need(lag)? + 8.0 * need(lag + 1)? - 8.0 * need(lag + 3)?
                    + need(lag + 4)?)
                    / 12.0;
                Ok(Some(v))
            }
            ExportTransform::MovingAverage { window, offset } => {
                if window == 0 {
                    return Ok(Some(0.0));
                }
                let mut sum = 0.0;
                for k in 0..window {
                    sum += need(lag + offset + k)?;
                }
                Ok(Some(sum / window as f64))
            }
        }
    }

    /// All cells one due series contributes: the main value plus one per
    /// configured additional lag.
    pub fn cells_for<F>(&self, fresh: f64, lookup: F) -> GeneratorResult<Vec<Option<f64>>>
    where
        F: Fn(usize) -> Option<f64>,
    {
        let mut cells = Vec::with_capacity(self.cells_per_series());
        cells.push(self.transform_at(0, Some(fresh), &lookup)?);
        for &lag in &self.export_lags {
            cells.push(self.transform_at(lag, None, &lookup)?);
        }
        Ok(cells)
    }

    /// Optional header row.
    pub fn render_header(&self) -> Option<String> {
        let mut fields = Vec::new();
        if self.export_date_time {
            fields.push("DateTime".to_string());
        }
        if self.export_event_count {
            fields.push("EventCount".to_string());
        }
        for id in &self.columns {
            fields.push(id.clone());
            for lag in &self.export_lags {
                fields.push(format!("{}-{}", id, lag));
            }
        }
        Some(fields.join(&self.separator))
    }

    /// Assemble one row from per-series cell groups aligned with
    /// `columns`. `None` marks a series that was not due. Returns `None`
    /// when no series contributed.
    pub fn render_row(
        &mut self,
        parts: &[Option<Vec<Option<f64>>>],
        timestamp: Option<&str>,
    ) -> Option<String> {
        if parts.iter().all(|p| p.is_none()) {
            return None;
        }
        self.counter += 1;

        let mut fields = Vec::new();
        if self.export_date_time {
            if let Some(ts) = timestamp {
                fields.push(ts.to_string());
            }
        }
        if self.export_event_count {
            fields.push(self.counter.to_string());
        }

        for part in parts {
            match part {
                Some(cells) => {
                    for cell in cells {
                        fields.push(match cell {
                            Some(v) => format!("{:.*}", self.precision, v),
                            None => String::new(),
                        });
                    }
                }
                None => {
                    for _ in 0..self.cells_per_series() {
                        fields.push(String::new());
                    }
                }
            }
        }

        Some(fields.join(&self.separator))
    }

    pub fn rows_written(&self) -> u64 {
        self.counter
    }
}
