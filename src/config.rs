// Configuration management for the data stream generator
//
// Run configuration is read from one or more TOML files: the generator
// section comes from the first file that carries one, series definitions
// accumulate across files (first id wins).

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Execution mode for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    /// Real-time streaming, one control loop for all series
    #[serde(rename = "stream1")]
    StreamSingle,
    /// Real-time streaming, one task per series
    #[serde(rename = "stream2")]
    StreamMulti,
    /// Batch generation bounded by a virtual date-time duration
    #[serde(rename = "generate1")]
    GenerateTimed,
    /// Batch generation bounded by an event count
    #[serde(rename = "generate2")]
    GenerateCounted,
}

impl RunMode {
    pub fn is_streaming(&self) -> bool {
        matches!(self, RunMode::StreamSingle | RunMode::StreamMulti)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Environment {
    Development,
    Production,
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Development
    }
}

/// Transform applied to exported values before rendering
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExportTransform {
    Raw,
    Difference {
        #[serde(default)]
        five_point: bool,
    },
    MovingAverage {
        window: usize,
        #[serde(default)]
        offset: usize,
    },
}

impl Default for ExportTransform {
    fn default() -> Self {
        ExportTransform::Raw
    }
}

/// Run-level generator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub environment: Environment,
    #[serde(rename = "type")]
    pub mode: RunMode,
    /// Negative seed means non-deterministic
    #[serde(default = "default_seed")]
    pub seed: i64,
    #[serde(default)]
    pub shuffle: bool,
    /// Global tick interval in milliseconds
    pub interval: u64,
    /// Streaming/timed runs: total milliseconds; counted runs: iterations
    pub duration: u64,
    #[serde(default = "default_datetime_format")]
    pub date_time_format: String,
    #[serde(default)]
    pub start_date_time: Option<String>,
    #[serde(default = "default_precision")]
    pub decimal_precision: usize,
    #[serde(default)]
    pub broker_url: Option<String>,
    #[serde(default)]
    pub output_file_path: Option<String>,
    #[serde(default = "default_separator")]
    pub separator: String,
    #[serde(default = "default_true")]
    pub export_id_as_header: bool,
    #[serde(default = "default_true")]
    pub export_date_time: bool,
    #[serde(default = "default_true")]
    pub export_event_count: bool,
    #[serde(default)]
    pub export_lags: Vec<usize>,
    #[serde(default)]
    pub export_transform: ExportTransform,
}

fn default_seed() -> i64 {
    -1
}

fn default_datetime_format() -> String {
    "%Y-%m-%d %H:%M:%S%.3f".to_string()
}

fn default_precision() -> usize {
    4
}

fn default_separator() -> String {
    ";".to_string()
}

fn default_true() -> bool {
    true
}

impl GeneratorConfig {
    /// Simulated start time; defaults to the first representable instant
    pub fn start_time(&self) -> Result<NaiveDateTime, ConfigError> {
        match &self.start_date_time {
            Some(raw) => NaiveDateTime::parse_from_str(raw, &self.date_time_format)
                .map_err(|e| ConfigError::Parse(format!("start_date_time '{}': {}", raw, e))),
            None => Ok(default_start_time()),
        }
    }

    /// Message group tag: randomized suffix in development, plain id in production
    pub fn group(&self) -> String {
        match self.environment {
            Environment::Development => {
                use rand::Rng;
                let suffix = rand::thread_rng().gen_range(1..10000);
                format!("{}_{}", self.id, suffix)
            }
            Environment::Production => self.id.clone(),
        }
    }
}

pub fn default_start_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// Cross-series contribution reference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverRef {
    pub id: String,
    /// AR coefficients applied to the driver's generated values
    #[serde(default)]
    pub p: Option<Vec<f64>>,
    /// MA coefficients applied to the driver's noise terms
    #[serde(default)]
    pub q: Option<Vec<f64>>,
}

/// Fields shared by every series kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesCommon {
    pub id: String,
    #[serde(default = "default_true")]
    pub export: bool,
    /// Warm-up steps before the run starts
    #[serde(default)]
    pub delay: usize,
    #[serde(default)]
    pub rank: i32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub topic: String,
    /// Per-series interval in milliseconds; falls back to the generator interval
    #[serde(default)]
    pub interval: Option<u64>,
    /// Cumulative probability threshold for the smaller perturbation
    #[serde(default)]
    pub outlier_ratio_1s: f64,
    /// Cumulative probability threshold for the larger perturbation
    #[serde(default)]
    pub outlier_ratio_2s: f64,
    #[serde(default)]
    pub drivers: Vec<DriverRef>,
}

impl SeriesCommon {
    pub fn interval_or(&self, fallback: u64) -> u64 {
        self.interval.unwrap_or(fallback)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArSeries {
    #[serde(flatten)]
    pub common: SeriesCommon,
    #[serde(default)]
    pub c: f64,
    #[serde(default)]
    pub mean: f64,
    #[serde(default)]
    pub std_dev: f64,
    pub p: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmaSeries {
    #[serde(flatten)]
    pub common: SeriesCommon,
    #[serde(default)]
    pub c: f64,
    #[serde(default)]
    pub mean: f64,
    #[serde(default)]
    pub std_dev: f64,
    pub p: Vec<f64>,
    pub q: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArimaSeries {
    #[serde(flatten)]
    pub common: SeriesCommon,
    #[serde(default)]
    pub c: f64,
    #[serde(default)]
    pub mean: f64,
    #[serde(default)]
    pub std_dev: f64,
    pub p: Vec<f64>,
    pub q: Vec<f64>,
    /// Integration order
    pub i: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeSeries {
    #[serde(flatten)]
    pub common: SeriesCommon,
    #[serde(default)]
    pub c: f64,
    #[serde(default)]
    pub mean: f64,
    #[serde(default)]
    pub std_dev: f64,
    #[serde(default)]
    pub arguments: Vec<String>,
    pub expression: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MecSeries {
    #[serde(flatten)]
    pub common: SeriesCommon,
    #[serde(default)]
    pub c: f64,
    #[serde(default)]
    pub mean: f64,
    #[serde(default)]
    pub std_dev: f64,
    #[serde(default)]
    pub arguments: Vec<String>,
    pub condition: String,
    pub expression: String,
    /// Evaluated when the condition does not hold
    pub expression_else: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemcSeries {
    #[serde(flatten)]
    pub common: SeriesCommon,
    #[serde(default)]
    pub c: f64,
    #[serde(default)]
    pub mean: f64,
    #[serde(default)]
    pub std_dev: f64,
    #[serde(default)]
    pub arguments: Vec<String>,
    pub conditions: Vec<String>,
    pub expressions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XfSeries {
    #[serde(flatten)]
    pub common: SeriesCommon,
    pub source_path: String,
    /// 0-based row to read (mutually exclusive with source_col)
    #[serde(default)]
    pub source_row: Option<usize>,
    /// 0-based column to read from every row (mutually exclusive with source_row)
    #[serde(default)]
    pub source_col: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XgSeries {
    #[serde(flatten)]
    pub common: SeriesCommon,
    pub source_broker: String,
    pub source_topic: String,
}

/// Closed set of series model kinds
#[derive(Debug, Clone)]
pub enum SeriesConfig {
    Ar(ArSeries),
    Arma(ArmaSeries),
    Arima(ArimaSeries),
    Me(MeSeries),
    Mec(MecSeries),
    Memc(MemcSeries),
    Xf(XfSeries),
    Xg(XgSeries),
}

impl SeriesConfig {
    pub fn common(&self) -> &SeriesCommon {
        match self {
            SeriesConfig::Ar(s) => &s.common,
            SeriesConfig::Arma(s) => &s.common,
            SeriesConfig::Arima(s) => &s.common,
            SeriesConfig::Me(s) => &s.common,
            SeriesConfig::Mec(s) => &s.common,
            SeriesConfig::Memc(s) => &s.common,
            SeriesConfig::Xf(s) => &s.common,
            SeriesConfig::Xg(s) => &s.common,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SeriesConfig::Ar(_) => "AR",
            SeriesConfig::Arma(_) => "ARMA",
            SeriesConfig::Arima(_) => "ARIMA",
            SeriesConfig::Me(_) => "ME",
            SeriesConfig::Mec(_) => "MEC",
            SeriesConfig::Memc(_) => "MEMC",
            SeriesConfig::Xf(_) => "XF",
            SeriesConfig::Xg(_) => "XG",
        }
    }

    pub fn id(&self) -> &str {
        &self.common().id
    }
}

/// Raw shape of one TOML configuration file
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    generator: Option<GeneratorConfig>,
    #[serde(default, alias = "AR")]
    ar: Vec<ArSeries>,
    #[serde(default, alias = "ARMA")]
    arma: Vec<ArmaSeries>,
    #[serde(default, alias = "ARIMA")]
    arima: Vec<ArimaSeries>,
    #[serde(default, alias = "ME")]
    me: Vec<MeSeries>,
    #[serde(default, alias = "MEC")]
    mec: Vec<MecSeries>,
    #[serde(default, alias = "MEMC")]
    memc: Vec<MemcSeries>,
    #[serde(default, alias = "XF")]
    xf: Vec<XfSeries>,
    #[serde(default, alias = "XG")]
    xg: Vec<XgSeries>,
}

impl ConfigFile {
    fn into_series(self) -> Vec<SeriesConfig> {
        let mut series = Vec::new();
        series.extend(self.ar.into_iter().map(SeriesConfig::Ar));
        series.extend(self.arma.into_iter().map(SeriesConfig::Arma));
        series.extend(self.arima.into_iter().map(SeriesConfig::Arima));
        series.extend(self.me.into_iter().map(SeriesConfig::Me));
        series.extend(self.mec.into_iter().map(SeriesConfig::Mec));
        series.extend(self.memc.into_iter().map(SeriesConfig::Memc));
        series.extend(self.xf.into_iter().map(SeriesConfig::Xf));
        series.extend(self.xg.into_iter().map(SeriesConfig::Xg));
        series
    }
}

/// Fully merged and validated run configuration
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub generator: GeneratorConfig,
    pub series: Vec<SeriesConfig>,
}

impl RunConfig {
    /// Load and merge one or more TOML configuration files
    pub fn load_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self, ConfigError> {
        if paths.is_empty() {
            return Err(ConfigError::MissingField("no configuration files given".into()));
        }

        let mut generator: Option<GeneratorConfig> = None;
        let mut series: Vec<SeriesConfig> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for path in paths {
            let content = fs::read_to_string(path)
                .map_err(|e| ConfigError::FileRead(format!("{}: {}", path.as_ref().display(), e)))?;
            let file: ConfigFile =
                toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

            if generator.is_none() {
                generator = file.generator.clone();
            }
            for s in file.into_series() {
                // first definition of an id wins across files
                if seen.insert(s.id().to_string()) {
                    series.push(s);
                }
            }
        }

        let generator = generator
            .ok_or_else(|| ConfigError::MissingField("[generator] section".to_string()))?;

        let config = RunConfig { generator, series };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_files(&[path])
    }

    /// Save a configuration to a TOML file (used by `init`)
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let mut file = ConfigFile {
            generator: Some(self.generator.clone()),
            ..ConfigFile::default()
        };
        for s in &self.series {
            match s.clone() {
                SeriesConfig::Ar(v) => file.ar.push(v),
                SeriesConfig::Arma(v) => file.arma.push(v),
                SeriesConfig::Arima(v) => file.arima.push(v),
                SeriesConfig::Me(v) => file.me.push(v),
                SeriesConfig::Mec(v) => file.mec.push(v),
                SeriesConfig::Memc(v) => file.memc.push(v),
                SeriesConfig::Xf(v) => file.xf.push(v),
                SeriesConfig::Xg(v) => file.xg.push(v),
            }
        }
        let content =
            toml::to_string_pretty(&file).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        fs::write(path, content).map_err(|e| ConfigError::FileWrite(e.to_string()))?;
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let g = &self.generator;

        if g.interval == 0 {
            return Err(ConfigError::Validation("interval must be greater than 0".into()));
        }
        if g.duration == 0 {
            return Err(ConfigError::Validation("duration must be greater than 0".into()));
        }
        if g.separator.is_empty() {
            return Err(ConfigError::Validation("separator must not be empty".into()));
        }
        g.start_time().map(|_| ())?;

        if g.mode.is_streaming() && g.broker_url.is_none() {
            return Err(ConfigError::MissingField("broker_url (required for streaming modes)".into()));
        }
        if !g.mode.is_streaming() && g.output_file_path.is_none() {
            return Err(ConfigError::MissingField(
                "output_file_path (required for generate modes)".into(),
            ));
        }

        if self.series.is_empty() {
            return Err(ConfigError::Validation("no series configured".into()));
        }

        let mut seen = HashSet::new();
        for s in &self.series {
            let c = s.common();
            if !seen.insert(c.id.clone()) {
                return Err(ConfigError::Validation(format!("duplicate series id '{}'", c.id)));
            }
            if c.interval_or(g.interval) == 0 {
                return Err(ConfigError::Validation(format!(
                    "series '{}': interval must be greater than 0",
                    c.id
                )));
            }
            if !(0.0..=1.0).contains(&c.outlier_ratio_1s)
                || !(0.0..=1.0).contains(&c.outlier_ratio_2s)
            {
                return Err(ConfigError::Validation(format!(
                    "series '{}': outlier ratios must lie in [0, 1]",
                    c.id
                )));
            }
            // ratio_1s is the cumulative (larger) threshold
            if c.outlier_ratio_1s < c.outlier_ratio_2s {
                return Err(ConfigError::Validation(format!(
                    "series '{}': outlier_ratio_1s must be >= outlier_ratio_2s",
                    c.id
                )));
            }

            match s {
                SeriesConfig::Ar(v) => {
                    if v.p.is_empty() {
                        return Err(ConfigError::Validation(format!(
                            "series '{}': AR coefficient vector p must not be empty",
                            c.id
                        )));
                    }
                }
                SeriesConfig::Arima(v) => {
                    if v.i == 0 {
                        return Err(ConfigError::Validation(format!(
                            "series '{}': integration order i must be at least 1",
                            c.id
                        )));
                    }
                }
                SeriesConfig::Memc(v) => {
                    if v.expressions.is_empty() {
                        return Err(ConfigError::Validation(format!(
                            "series '{}': MEMC needs at least one expression",
                            c.id
                        )));
                    }
                    if v.conditions.len() > v.expressions.len() {
                        return Err(ConfigError::Validation(format!(
                            "series '{}': more conditions than expressions",
                            c.id
                        )));
                    }
                }
                SeriesConfig::Xf(v) => match (v.source_row, v.source_col) {
                    (Some(_), Some(_)) => {
                        return Err(ConfigError::Validation(format!(
                            "series '{}': source_row and source_col are mutually exclusive",
                            c.id
                        )))
                    }
                    (None, None) => {
                        return Err(ConfigError::MissingField(format!(
                            "series '{}': one of source_row or source_col",
                            c.id
                        )))
                    }
                    _ => {}
                },
                SeriesConfig::Xg(_) => {
                    if !g.mode.is_streaming() {
                        return Err(ConfigError::Validation(format!(
                            "series '{}': XG series are only supported in streaming modes",
                            c.id
                        )));
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(String),

    #[error("Failed to write config file: {0}")]
    FileWrite(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Failed to serialize config: {0}")]
    Serialize(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Missing required configuration: {0}")]
    MissingField(String),
}
