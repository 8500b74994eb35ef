// Pre-flight checks run after config load, before any generator is built

use std::collections::HashSet;
use std::path::Path;

use tracing::warn;

use crate::config::{ExportTransform, RunConfig, SeriesConfig};
use crate::error::{GeneratorError, GeneratorResult};
use crate::export::ExportPipeline;

/// Checks that would otherwise surface mid-run: unknown driver references,
/// missing source files and export transforms that read deeper into
/// history than a series' warm-up provides.
pub fn pre_flight(config: &RunConfig) -> GeneratorResult<()> {
    let known: HashSet<&str> = config.series.iter().map(|s| s.id()).collect();

    for series in &config.series {
        for driver in &series.common().drivers {
            if !known.contains(driver.id.as_str()) {
                // resolves to zero at runtime, but almost always a typo
                warn!(
                    "⚠️  Series '{}' drives from unknown series '{}'",
                    series.id(),
                    driver.id
                );
            }
        }

        if let SeriesConfig::Xf(xf) = series {
            if !Path::new(&xf.source_path).exists() {
                return Err(GeneratorError::SourceIo(format!(
                    "series '{}': source file '{}' not found",
                    series.id(),
                    xf.source_path
                )));
            }
        }
    }

    check_transform_depth(config)?;
    Ok(())
}

/// Non-raw transforms need every lag they read to be warmed up.
fn check_transform_depth(config: &RunConfig) -> GeneratorResult<()> {
    if matches!(config.generator.export_transform, ExportTransform::Raw) {
        return Ok(());
    }

    let pipeline = ExportPipeline::new(&config.generator, Vec::new());
    let needed = pipeline.max_lag_needed();

    for series in &config.series {
        let common = series.common();
        if common.export && common.delay < needed {
            return Err(GeneratorError::InsufficientHistory(format!(
                "series '{}': export transform reads up to lag {} but delay is {}",
                common.id, needed, common.delay
            )));
        }
    }
    Ok(())
}
