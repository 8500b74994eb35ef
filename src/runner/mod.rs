// Run orchestration: generator setup, global warm-up and the four
// execution modes.
//
// Streaming runs are paced against wall-clock time and stop on whichever
// comes first of the duration budget, a manual stop (Enter on stdin) or
// the virtual end time. Batch runs are synchronous loops over a virtual
// clock. Shutdown is strictly cooperative; a task that ignores the signal
// past the grace period is aborted and reported as a defect.

use std::collections::HashMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::time::Duration as StdDuration;

use chrono::{Duration, NaiveDateTime};
use futures_util::future::join_all;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tokio::io::AsyncBufReadExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::clients::{subscribe_series, PublishSink, WsSink};
use crate::config::{GeneratorConfig, RunConfig, RunMode, SeriesConfig};
use crate::core::generator::SeriesGenerator;
use crate::core::history::{self, SharedHistory};
use crate::error::{GeneratorError, GeneratorResult};
use crate::export::ExportPipeline;
use crate::progress::GenerationProgress;
use crate::validation;

/// How long tasks get to observe the shutdown signal before being aborted.
const SHUTDOWN_GRACE: StdDuration = StdDuration::from_secs(5);

#[derive(Debug, Default, Clone, Copy)]
pub struct RunSummary {
    pub ticks: u64,
    pub published: u64,
    pub rows_written: u64,
    pub cancelled: bool,
}

pub struct Orchestrator {
    run: GeneratorConfig,
    history: SharedHistory,
    generators: Vec<SeriesGenerator>,
    subscriptions: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
    rng: StdRng,
}

fn seed_rng(seed: i64, stream: u64) -> StdRng {
    if seed >= 0 {
        StdRng::seed_from_u64(seed as u64 ^ stream.wrapping_mul(0x9e3779b97f4a7c15))
    } else {
        StdRng::from_entropy()
    }
}

/// Drive one generator at its own pace until the virtual end time or the
/// shutdown signal, whichever comes first. Returns (ticks, published).
async fn stream_one<S: PublishSink>(
    g: &mut SeriesGenerator,
    sink: &mut S,
    end: NaiveDateTime,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> (u64, u64) {
    let interval = StdDuration::from_millis(g.interval_ms());
    let mut ticks = 0u64;
    let mut published = 0u64;

    while g.time() < end && !*shutdown_rx.borrow() {
        match g.advance() {
            Ok(value) => {
                ticks += 1;
                if g.export() {
                    let message = g.message(value);
                    match sink.publish(g.topic(), &message).await {
                        Ok(()) => published += 1,
                        Err(e) => warn!("⚠️  Publish on '{}' failed: {}", g.topic(), e),
                    }
                }
            }
            Err(e) => {
                error!("❌ Series '{}' aborted: {}", g.id(), e);
                break;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown_rx.changed() => {}
        }
    }

    (ticks, published)
}

impl Orchestrator {
    /// Validate, build all generators (each runs its own warm-up),
    /// establish XG subscriptions and run the global warm-up pass.
    pub async fn setup(config: RunConfig) -> GeneratorResult<Self> {
        validation::pre_flight(&config)?;

        let run = config.generator.clone();
        let group = run.group();
        let history = history::shared();
        let (shutdown, _) = watch::channel(false);

        let mut series = config.series;
        series.sort_by_key(|s| s.common().rank);

        info!("⚙️  Setting up {} series generators", series.len());
        let mut generators = Vec::with_capacity(series.len());
        let mut subscriptions = Vec::new();
        for (idx, s) in series.into_iter().enumerate() {
            if let SeriesConfig::Xg(xg) = &s {
                let handle = subscribe_series(
                    xg.common.id.clone(),
                    &xg.source_broker,
                    xg.source_topic.clone(),
                    history.clone(),
                    shutdown.subscribe(),
                )
                .await?;
                subscriptions.push(handle);
            }

            let rng = seed_rng(run.seed, idx as u64 + 1);
            generators.push(SeriesGenerator::new(
                s,
                &run,
                group.clone(),
                history.clone(),
                rng,
            )?);
        }

        let mut orchestrator = Self {
            rng: seed_rng(run.seed, 0),
            run,
            history,
            generators,
            subscriptions,
            shutdown,
        };
        orchestrator.initialize()?;
        Ok(orchestrator)
    }

    /// Global warm-up: advance every generator through the longest
    /// configured delay so cross-series drivers see populated history,
    /// then rewind all counters to the run start.
    fn initialize(&mut self) -> GeneratorResult<()> {
        let max_delay = self
            .generators
            .iter()
            .map(|g| g.config().common().delay)
            .max()
            .unwrap_or(0);
        let start = self.run.start_time()?;
        info!("🔥 Global warm-up over {} steps", max_delay);

        match self.run.mode {
            RunMode::GenerateCounted => {
                for _ in 0..max_delay {
                    for g in &mut self.generators {
                        g.advance()?;
                    }
                }
            }
            _ => {
                let step = Duration::milliseconds(self.run.interval as i64);
                let delay_time =
                    start + Duration::milliseconds(max_delay as i64 * self.run.interval as i64);
                let mut internal = start;
                while internal < delay_time {
                    for g in &mut self.generators {
                        if g.is_due(internal) {
                            g.advance()?;
                        }
                    }
                    internal += step;
                }
            }
        }

        for g in &mut self.generators {
            g.reset(start);
        }
        Ok(())
    }

    pub async fn run(&mut self) -> GeneratorResult<RunSummary> {
        info!(
            "🚀 Starting run '{}' ({} series)",
            self.run.id,
            self.generators.len()
        );

        let summary = match self.run.mode {
            RunMode::StreamSingle => {
                let url = self.broker_url()?;
                let mut sink = WsSink::connect(&url).await?;
                let controller = self.spawn_controller();
                let summary = self.stream_single(&mut sink).await;
                controller.abort();
                let _ = sink.close().await;
                summary
            }
            RunMode::StreamMulti => self.stream_multi().await,
            RunMode::GenerateTimed | RunMode::GenerateCounted => {
                let path = self.run.output_file_path.clone().ok_or_else(|| {
                    GeneratorError::ConfigMissing("output_file_path".to_string())
                })?;
                let file = fs::File::create(&path)?;
                let mut writer = BufWriter::new(file);
                let summary = if self.run.mode == RunMode::GenerateTimed {
                    self.generate_timed(&mut writer)
                } else {
                    self.generate_counted(&mut writer)
                };
                writer.flush()?;
                summary
            }
        };

        self.teardown().await;
        match &summary {
            Ok(s) if s.cancelled => info!("🛑 Run '{}' cancelled", self.run.id),
            Ok(s) => info!(
                "✅ Run '{}' complete: {} ticks, {} messages, {} rows",
                self.run.id, s.ticks, s.published, s.rows_written
            ),
            Err(e) => error!("❌ Run '{}' failed: {}", self.run.id, e),
        }
        summary
    }

    /// Signal all tasks and detach subscriptions.
    async fn teardown(&mut self) {
        let _ = self.shutdown.send(true);
        for handle in self.subscriptions.drain(..) {
            handle.abort();
        }
    }

    fn broker_url(&self) -> GeneratorResult<String> {
        self.run
            .broker_url
            .clone()
            .ok_or_else(|| GeneratorError::ConfigMissing("broker_url".to_string()))
    }

    /// Evaluation order for one tick: ascending rank, or a seeded shuffle.
    fn eval_order(&mut self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.generators.len()).collect();
        if self.run.shuffle {
            order.shuffle(&mut self.rng);
        }
        order
    }

    /// Stops the run on stdin input or when the wall-clock budget expires.
    fn spawn_controller(&self) -> JoinHandle<()> {
        let shutdown = self.shutdown.clone();
        let budget = StdDuration::from_millis(self.run.duration);
        tokio::spawn(async move {
            let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
            tokio::select! {
                _ = tokio::time::sleep(budget) => {
                    info!("⏰ Run duration budget reached");
                }
                _ = lines.next_line() => {
                    info!("🛑 Manual stop requested");
                }
            }
            let _ = shutdown.send(true);
        })
    }

    /// stream1: one control loop publishes for every due generator.
    async fn stream_single<S: PublishSink>(&mut self, sink: &mut S) -> GeneratorResult<RunSummary> {
        let start = self.run.start_time()?;
        let end = start + Duration::milliseconds(self.run.duration as i64);
        let interval = StdDuration::from_millis(self.run.interval);
        let mut shutdown_rx = self.shutdown.subscribe();

        let mut summary = RunSummary::default();
        let mut internal = start;

        while internal < end {
            if *shutdown_rx.borrow() {
                summary.cancelled = true;
                break;
            }

            for idx in self.eval_order() {
                let g = &mut self.generators[idx];
                if !g.is_due(internal) {
                    continue;
                }
                let value = g.advance()?;
                if g.export() {
                    let topic = g.topic().to_string();
                    let message = g.message(value);
                    match sink.publish(&topic, &message).await {
                        Ok(()) => summary.published += 1,
                        // no retry, the tick proceeds
                        Err(e) => warn!("⚠️  Publish on '{}' failed: {}", topic, e),
                    }
                }
            }

            summary.ticks += 1;
            internal += Duration::milliseconds(self.run.interval as i64);

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        summary.cancelled = true;
                        break;
                    }
                }
            }
        }

        Ok(summary)
    }

    /// stream2: one independent task per generator, each with its own sink
    /// connection and pace.
    async fn stream_multi(&mut self) -> GeneratorResult<RunSummary> {
        let url = self.broker_url()?;
        let start = self.run.start_time()?;
        let end = start + Duration::milliseconds(self.run.duration as i64);

        let mut tasks: Vec<JoinHandle<(u64, u64)>> = Vec::new();
        for mut g in self.generators.drain(..) {
            let url = url.clone();
            let mut shutdown_rx = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                let mut sink = match WsSink::connect(&url).await {
                    Ok(s) => s,
                    Err(e) => {
                        error!("❌ Series '{}' could not reach the broker: {}", g.id(), e);
                        return (0, 0);
                    }
                };
                let counts = stream_one(&mut g, &mut sink, end, &mut shutdown_rx).await;
                let _ = sink.close().await;
                counts
            }));
        }
        info!("🚦 {} streaming tasks started", tasks.len());

        let controller = self.spawn_controller();
        let budget = StdDuration::from_millis(self.run.duration) + SHUTDOWN_GRACE;

        let mut summary = RunSummary::default();
        match tokio::time::timeout(budget, join_all(tasks.iter_mut())).await {
            Ok(results) => {
                for result in results {
                    match result {
                        Ok((ticks, published)) => {
                            summary.ticks += ticks;
                            summary.published += published;
                        }
                        Err(e) => error!("❌ Streaming task panicked: {}", e),
                    }
                }
            }
            Err(_) => {
                // A loop that misses the signal for this long is a bug,
                // not a recovery path.
                error!(
                    "❌ Defect: streaming tasks ignored shutdown for {:?}, aborting",
                    SHUTDOWN_GRACE
                );
                for task in &tasks {
                    task.abort();
                }
            }
        }
        controller.abort();

        summary.cancelled = *self.shutdown.subscribe().borrow();
        Ok(summary)
    }

    /// generate1: virtual clock, one row per tick with at least one due
    /// exported series.
    fn generate_timed<W: Write>(&mut self, out: &mut W) -> GeneratorResult<RunSummary> {
        let start = self.run.start_time()?;
        let end = start + Duration::milliseconds(self.run.duration as i64);
        let step = Duration::milliseconds(self.run.interval as i64);
        let format = self.run.date_time_format.clone();

        let mut pipeline = self.build_pipeline();
        let columns = pipeline.columns().to_vec();
        if self.run.export_id_as_header {
            if let Some(header) = pipeline.render_header() {
                writeln!(out, "{}", header)?;
            }
        }

        let total_ticks = self.run.duration / self.run.interval;
        let progress = GenerationProgress::new(total_ticks);

        let mut summary = RunSummary::default();
        let mut internal = start;
        while internal < end {
            let mut produced: HashMap<String, Vec<Option<f64>>> = HashMap::new();
            for idx in self.eval_order() {
                let g = &mut self.generators[idx];
                if !g.is_due(internal) {
                    continue;
                }
                let value = g.advance()?;
                if g.export() {
                    let cells =
                        pipeline.cells_for(value, |lag| g.lagged_value(lag).ok().flatten())?;
                    produced.insert(g.id().to_string(), cells);
                }
            }

            let parts: Vec<Option<Vec<Option<f64>>>> =
                columns.iter().map(|id| produced.remove(id)).collect();
            let timestamp = internal.format(&format).to_string();
            if let Some(row) = pipeline.render_row(&parts, Some(&timestamp)) {
                writeln!(out, "{}", row)?;
            }

            summary.ticks += 1;
            progress.tick(pipeline.rows_written());
            internal += step;
        }

        summary.rows_written = pipeline.rows_written();
        progress.finish(summary.rows_written);
        Ok(summary)
    }

    /// generate2: exactly `duration` iterations, every generator advances
    /// each time regardless of its own interval.
    fn generate_counted<W: Write>(&mut self, out: &mut W) -> GeneratorResult<RunSummary> {
        let mut pipeline = self.build_pipeline();
        let columns = pipeline.columns().to_vec();
        if self.run.export_id_as_header {
            if let Some(header) = pipeline.render_header() {
                writeln!(out, "{}", header)?;
            }
        }

        let progress = GenerationProgress::new(self.run.duration);

        let mut summary = RunSummary::default();
        for _ in 0..self.run.duration {
            let mut produced: HashMap<String, Vec<Option<f64>>> = HashMap::new();
            for idx in self.eval_order() {
                let g = &mut self.generators[idx];
                let value = g.advance()?;
                if g.export() {
                    let cells =
                        pipeline.cells_for(value, |lag| g.lagged_value(lag).ok().flatten())?;
                    produced.insert(g.id().to_string(), cells);
                }
            }

            let parts: Vec<Option<Vec<Option<f64>>>> =
                columns.iter().map(|id| produced.remove(id)).collect();
            if let Some(row) = pipeline.render_row(&parts, None) {
                writeln!(out, "{}", row)?;
            }

            summary.ticks += 1;
            progress.tick(pipeline.rows_written());
        }

        summary.rows_written = pipeline.rows_written();
        progress.finish(summary.rows_written);
        Ok(summary)
    }

    /// Export columns: exported series ids ascending by rank.
    fn build_pipeline(&self) -> ExportPipeline {
        let mut exported: Vec<(i32, String)> = self
            .generators
            .iter()
            .filter(|g| g.export())
            .map(|g| (g.rank(), g.id().to_string()))
            .collect();
        exported.sort_by_key(|(rank, _)| *rank);
        let columns = exported.into_iter().map(|(_, id)| id).collect();

        // Counted rows carry no timestamp; drop the column so the header
        // stays aligned with the rows.
        let mut run = self.run.clone();
        if run.mode == RunMode::GenerateCounted {
            run.export_date_time = false;
        }
        ExportPipeline::new(&run, columns)
    }

    pub fn history(&self) -> &SharedHistory {
        &self.history
    }

    pub fn generators(&self) -> &[SeriesGenerator] {
        &self.generators
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ArSeries, Environment, ExportTransform, SeriesCommon};
    use crate::clients::MemorySink;
    use crate::types::Channel;

    fn run_config(mode: RunMode) -> GeneratorConfig {
        GeneratorConfig {
            id: "testrun".to_string(),
            description: None,
            environment: Environment::Production,
            mode,
            seed: 7,
            shuffle: false,
            interval: 10,
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

    fn ar(id: &str, rank: i32, delay: usize) -> SeriesConfig {
        SeriesConfig::Ar(ArSeries {
            common: SeriesCommon {
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
            },
            c: 1.0,
            mean: 0.0,
            std_dev: 0.0,
            p: vec![0.5],
        })
    }

    #[tokio::test]
    async fn test_setup_sorts_generators_by_rank() {
        let config = RunConfig {
            generator: run_config(RunMode::GenerateCounted),
            series: vec![ar("b", 2, 0), ar("a", 1, 0), ar("c", 3, 0)],
        };
        let orchestrator = Orchestrator::setup(config).await.unwrap();
        let ids: Vec<&str> = orchestrator.generators().iter().map(|g| g.id()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_global_warm_up_populates_history_and_resets() {
        let config = RunConfig {
            generator: run_config(RunMode::GenerateCounted),
            series: vec![ar("a", 1, 3), ar("b", 2, 5)],
        };
        let orchestrator = Orchestrator::setup(config).await.unwrap();

        let store = orchestrator.history().lock().unwrap();
        // own warm-up plus the global pass over the maximum delay
        assert_eq!(store.len("a", Channel::X), 3 + 5);
        assert_eq!(store.len("b", Channel::X), 5 + 5);
        drop(store);

        for g in orchestrator.generators() {
            assert_eq!(g.count(), 0);
        }
    }

    #[tokio::test]
    async fn test_generate_counted_writes_header_and_rows() {
        let config = RunConfig {
            generator: run_config(RunMode::GenerateCounted),
            series: vec![ar("a", 1, 0), ar("b", 2, 0)],
        };
        let mut orchestrator = Orchestrator::setup(config).await.unwrap();

        let mut out = Vec::new();
        let summary = orchestrator.generate_counted(&mut out).unwrap();
        assert_eq!(summary.ticks, 5);
        assert_eq!(summary.rows_written, 5);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 6);
        // counted rows carry no timestamp, so neither does the header
        assert_eq!(lines[0], "EventCount;a;b");
        assert!(lines[1].starts_with("1;"));
        assert_eq!(
            lines[0].split(';').count(),
            lines[1].split(';').count(),
        );
    }

    #[tokio::test]
    async fn test_timed_global_warm_up_runs_max_delay_steps() {
        let config = RunConfig {
            generator: run_config(RunMode::GenerateTimed),
            series: vec![ar("a", 1, 3), ar("b", 2, 5)],
        };
        let orchestrator = Orchestrator::setup(config).await.unwrap();

        // same pass length as counted mode: own warm-up plus max(delay)
        let store = orchestrator.history().lock().unwrap();
        assert_eq!(store.len("a", Channel::X), 3 + 5);
        assert_eq!(store.len("b", Channel::X), 5 + 5);
    }

    #[tokio::test]
    async fn test_stream_one_counts_ticks_and_messages() {
        let run = {
            let mut run = run_config(RunMode::StreamMulti);
            run.duration = 30;
            run.interval = 10;
            run
        };
        let store = history::shared();
        let mut generator = SeriesGenerator::new(
            ar("a", 1, 0),
            &run,
            "g".to_string(),
            store,
            seed_rng(run.seed, 1),
        )
        .unwrap();

        let start = run.start_time().unwrap();
        let end = start + Duration::milliseconds(run.duration as i64);
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let mut sink = MemorySink::new();
        let (ticks, published) = stream_one(&mut generator, &mut sink, end, &mut shutdown_rx).await;
        assert_eq!(ticks, 3);
        assert_eq!(published, 3);
        assert_eq!(sink.published.len(), 3);
    }

    #[tokio::test]
    async fn test_generate_timed_respects_virtual_clock() {
        let mut generator = run_config(RunMode::GenerateTimed);
        generator.duration = 50;
        generator.interval = 10;
        let config = RunConfig {
            generator,
            series: vec![ar("a", 1, 0)],
        };
        let mut orchestrator = Orchestrator::setup(config).await.unwrap();

        let mut out = Vec::new();
        let summary = orchestrator.generate_timed(&mut out).unwrap();
        assert_eq!(summary.ticks, 5);
        assert_eq!(summary.rows_written, 5);
    }

    #[tokio::test]
    async fn test_stream_single_publishes_to_memory_sink() {
        let mut generator = run_config(RunMode::StreamSingle);
        generator.duration = 30;
        generator.interval = 10;
        let config = RunConfig {
            generator,
            series: vec![ar("a", 1, 0)],
        };
        let mut orchestrator = Orchestrator::setup(config).await.unwrap();

        let mut sink = MemorySink::new();
        let summary = orchestrator.stream_single(&mut sink).await.unwrap();
        assert!(!summary.cancelled);
        assert_eq!(summary.published, 3);
        assert!(sink.published.iter().all(|f| f.topic == "series/a"));
    }

    #[tokio::test]
    async fn test_shutdown_signal_cancels_stream() {
        let mut generator = run_config(RunMode::StreamSingle);
        generator.duration = 10_000;
        generator.interval = 10;
        let config = RunConfig {
            generator,
            series: vec![ar("a", 1, 0)],
        };
        let mut orchestrator = Orchestrator::setup(config).await.unwrap();

        let shutdown = orchestrator.shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(StdDuration::from_millis(50)).await;
            let _ = shutdown.send(true);
        });

        let mut sink = MemorySink::new();
        let summary = orchestrator.stream_single(&mut sink).await.unwrap();
        assert!(summary.cancelled);
    }

    #[tokio::test]
    async fn test_deterministic_with_fixed_seed() {
        let build = || RunConfig {
            generator: GeneratorConfig {
                seed: 99,
                ..run_config(RunMode::GenerateCounted)
            },
            series: vec![ar("a", 1, 0)],
        };

        let mut first = Vec::new();
        Orchestrator::setup(build())
            .await
            .unwrap()
            .generate_counted(&mut first)
            .unwrap();

        let mut second = Vec::new();
        Orchestrator::setup(build())
            .await
            .unwrap()
            .generate_counted(&mut second)
            .unwrap();

        assert_eq!(first, second);
    }
}
