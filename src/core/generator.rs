// Per-series generation state machine
//
// A generator owns one series' counters and its model evaluator. It warms
// up at construction (drivers off, counters discarded afterwards) and then
// only ever advances. The shared history store is the single point of
// mutual exclusion; each advance holds its lock across the full
// read-modify-push sequence of one logical tick.

use chrono::{Duration, NaiveDateTime};
use rand::rngs::StdRng;
use tracing::{debug, warn};

use crate::config::{GeneratorConfig, SeriesConfig};
use crate::core::history::SharedHistory;
use crate::core::model::{ModelEvaluator, TickContext};
use crate::core::outlier::OutlierInjector;
use crate::error::{GeneratorError, GeneratorResult};
use crate::types::{Channel, Message};

pub struct SeriesGenerator {
    config: SeriesConfig,
    evaluator: ModelEvaluator,
    outlier: OutlierInjector,
    history: SharedHistory,
    rng: StdRng,

    start_time: NaiveDateTime,
    interval_ms: u64,
    date_time_format: String,
    group: String,

    time: NaiveDateTime,
    count: u64,
    iter: u64,
    drivers_active: bool,
    warmed: bool,
}

impl SeriesGenerator {
    /// Build a generator and run its warm-up pass.
    pub fn new(
        config: SeriesConfig,
        run: &GeneratorConfig,
        group: String,
        history: SharedHistory,
        rng: StdRng,
    ) -> GeneratorResult<Self> {
        let start_time = run.start_time()?;
        let common = config.common();
        let interval_ms = common.interval_or(run.interval);
        let outlier = OutlierInjector::new(common.outlier_ratio_1s, common.outlier_ratio_2s);

        history
            .lock()
            .map_err(|_| GeneratorError::Internal("history lock poisoned".into()))?
            .register(&common.id);

        let mut generator = Self {
            evaluator: ModelEvaluator::build(&config)?,
            outlier,
            interval_ms,
            date_time_format: run.date_time_format.clone(),
            group,
            history,
            rng,
            start_time,
            time: start_time,
            count: 0,
            iter: 0,
            drivers_active: false,
            warmed: false,
            config,
        };
        generator.warm_up()?;
        Ok(generator)
    }

    /// Populate history with `delay` values while drivers are off, then
    /// reset the counters to the run start.
    fn warm_up(&mut self) -> GeneratorResult<()> {
        let delay = self.config.common().delay;
        debug!("🔥 Warming up series '{}' ({} steps)", self.id(), delay);

        self.drivers_active = false;
        for _ in 0..delay {
            self.advance()?;
        }
        self.reset(self.start_time);
        self.drivers_active = true;
        self.warmed = true;
        Ok(())
    }

    /// Compute and record the next value, then move the counters forward.
    /// Expression faults degrade the tick's value to 0.0; fatal faults
    /// (missing source file, poisoned lock) propagate.
    pub fn advance(&mut self) -> GeneratorResult<f64> {
        let ctx = TickContext {
            elapsed_ms: (self.time - self.start_time).num_milliseconds(),
            count: self.count,
            iter: self.iter,
            interval_ms: self.interval_ms,
            drivers_active: self.drivers_active,
            delay: self.config.common().delay,
        };

        let value = {
            let mut store = self
                .history
                .lock()
                .map_err(|_| GeneratorError::Internal("history lock poisoned".into()))?;

            let raw = match self.evaluator.compute_next(&mut self.rng, &mut store, &ctx) {
                Ok(v) => v,
                Err(e) if !e.is_fatal() => {
                    warn!("⚠️  Series '{}' tick degraded: {}", self.config.id(), e);
                    0.0
                }
                Err(e) => return Err(e),
            };

            if self.config.common().export && self.warmed {
                self.outlier
                    .apply(&mut self.rng, &store, self.config.id(), raw)
            } else {
                raw
            }
        };

        self.iter += 1;
        self.count += 1;
        self.time += Duration::milliseconds(self.interval_ms as i64);
        Ok(value)
    }

    /// Rewind time and counters, keeping history intact.
    pub fn reset(&mut self, start: NaiveDateTime) {
        self.time = start;
        self.count = 0;
        self.iter = 0;
    }

    /// A generator is due once its own clock has not passed the global tick.
    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        self.time <= now
    }

    /// Lagged generated value, lag 0 = newest.
    pub fn lagged_value(&self, lag: usize) -> GeneratorResult<Option<f64>> {
        let store = self
            .history
            .lock()
            .map_err(|_| GeneratorError::Internal("history lock poisoned".into()))?;
        Ok(store.get(self.config.id(), Channel::X, lag))
    }

    /// Outbound message for a freshly generated value.
    pub fn message(&self, value: f64) -> Message {
        let common = self.config.common();
        Message {
            id: common.id.clone(),
            predecessor_source: None,
            group: self.group.clone(),
            rank: common.rank,
            title: common.title.clone(),
            timestamp: self.time.format(&self.date_time_format).to_string(),
            value,
        }
    }

    pub fn id(&self) -> &str {
        self.config.id()
    }

    pub fn config(&self) -> &SeriesConfig {
        &self.config
    }

    pub fn export(&self) -> bool {
        self.config.common().export
    }

    pub fn rank(&self) -> i32 {
        self.config.common().rank
    }

    pub fn topic(&self) -> &str {
        &self.config.common().topic
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn time(&self) -> NaiveDateTime {
        self.time
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}
