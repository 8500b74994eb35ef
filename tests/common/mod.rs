// Common test utilities and helpers

#![allow(dead_code)]

use datastream_gen::config::{
    ArSeries, DriverRef, Environment, ExportTransform, GeneratorConfig, RunConfig, RunMode,
    SeriesCommon, SeriesConfig,
};
use std::path::PathBuf;
use tempfile::TempDir;

/// Create a batch-mode generator configuration with sensible defaults
pub fn create_test_generator(mode: RunMode) -> GeneratorConfig {
    GeneratorConfig {
        id: "testrun".to_string(),
        description: None,
        environment: Environment::Production,
        mode,
        seed: 42,
        shuffle: false,
        interval: 100,
        duration: 5,
        date_time_format: "%Y-%m-%d %H:%M:%S%.3f".to_string(),
        start_date_time: None,
        decimal_precision: 2,
        broker_url: Some("ws://localhost:9001".to_string()),
        output_file_path: Some("out.csv".to_string()),
        separator: ";".to_string(),
        export_id_as_header: true,
        export_date_time: true,
        export_event_count: true,
        export_lags: Vec::new(),
        export_transform: ExportTransform::Raw,
    }
}

pub fn create_series_common(id: &str, rank: i32, delay: usize) -> SeriesCommon {
    SeriesCommon {
        id: id.to_string(),
        export: true,
        delay,
        rank,
        title: String::new(),
        topic: format!("series/{}", id),
        interval: None,
        outlier_ratio_1s: 0.0,
        outlier_ratio_2s: 0.0,
        drivers: Vec::new(),
    }
}

/// A deterministic AR(1) series: no noise, constant 1.0, p = [0.5]
pub fn create_ar_series(id: &str, rank: i32) -> SeriesConfig {
    SeriesConfig::Ar(ArSeries {
        common: create_series_common(id, rank, 0),
        c: 1.0,
        mean: 0.0,
        std_dev: 0.0,
        p: vec![0.5],
    })
}

/// An AR series that mirrors another series through a driver term
pub fn create_driven_series(id: &str, rank: i32, driver_id: &str) -> SeriesConfig {
    let mut common = create_series_common(id, rank, 0);
    common.drivers = vec![DriverRef {
        id: driver_id.to_string(),
        p: Some(vec![1.0]),
        q: None,
    }];
    SeriesConfig::Ar(ArSeries {
        common,
        c: 0.0,
        mean: 0.0,
        std_dev: 0.0,
        p: vec![0.0],
    })
}

pub fn create_test_config(mode: RunMode) -> RunConfig {
    RunConfig {
        generator: create_test_generator(mode),
        series: vec![create_ar_series("a", 1), create_ar_series("b", 2)],
    }
}

/// Create a temporary directory and a path inside it for run output
pub fn create_temp_output() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let out_path = temp_dir.path().join("out.csv");
    (temp_dir, out_path)
}

/// Write TOML content into a temp directory and return its path
pub fn write_config_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).expect("Failed to write config file");
    path
}
