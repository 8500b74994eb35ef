// Per-series next-value computation
//
// One evaluator per series, dispatched over the configured model kind.
// Expressions and argument lists are compiled once at construction; a
// malformed expression degrades to the 0.0 sentinel instead of failing
// the whole run.

use std::fs;

use rand::rngs::StdRng;

use crate::config::{
    ArSeries, ArimaSeries, ArmaSeries, MeSeries, MecSeries, MemcSeries, SeriesConfig, XfSeries,
    XgSeries,
};
use crate::core::drivers::compute_driver_parts;
use crate::core::expression::{ArgumentSpec, CompiledExpression};
use crate::core::history::HistoryStore;
use crate::core::noise;
use crate::error::{GeneratorError, GeneratorResult};
use crate::types::{
    Channel, ID_EVENT_COUNT, ID_EVENT_ITERATOR, ID_TIME_ELAPSED, SOURCE_FILE_SEPARATOR,
};

/// Per-tick counter snapshot handed down by the owning generator.
#[derive(Debug, Clone, Copy)]
pub struct TickContext {
    /// Simulated milliseconds since the run's start time
    pub elapsed_ms: i64,
    pub count: u64,
    pub iter: u64,
    /// Effective emission interval of the series in milliseconds
    pub interval_ms: u64,
    /// False while the generator set warms up
    pub drivers_active: bool,
    /// Warm-up steps configured for the series
    pub delay: usize,
}

/// Evaluates the next raw value of one series against the shared history.
pub enum ModelEvaluator {
    Ar(ArSeries),
    Arma(ArmaSeries),
    Arima(ArimaSeries),
    Me {
        cfg: MeSeries,
        args: Vec<ArgumentSpec>,
        expression: CompiledExpression,
    },
    Mec {
        cfg: MecSeries,
        args: Vec<ArgumentSpec>,
        condition: CompiledExpression,
        expression: CompiledExpression,
        fallback: CompiledExpression,
    },
    Memc {
        cfg: MemcSeries,
        args: Vec<ArgumentSpec>,
        conditions: Vec<CompiledExpression>,
        expressions: Vec<CompiledExpression>,
    },
    Xf {
        cfg: XfSeries,
        loaded: bool,
    },
    Xg(XgSeries),
}

impl ModelEvaluator {
    /// Build an evaluator, compiling all expressions up front.
    pub fn build(config: &SeriesConfig) -> GeneratorResult<Self> {
        let evaluator = match config {
            SeriesConfig::Ar(c) => ModelEvaluator::Ar(c.clone()),
            SeriesConfig::Arma(c) => ModelEvaluator::Arma(c.clone()),
            SeriesConfig::Arima(c) => ModelEvaluator::Arima(c.clone()),
            SeriesConfig::Me(c) => ModelEvaluator::Me {
                args: ArgumentSpec::parse_all(&c.arguments)?,
                expression: CompiledExpression::compile(&c.expression),
                cfg: c.clone(),
            },
            SeriesConfig::Mec(c) => ModelEvaluator::Mec {
                args: ArgumentSpec::parse_all(&c.arguments)?,
                condition: CompiledExpression::compile(&c.condition),
                expression: CompiledExpression::compile(&c.expression),
                fallback: CompiledExpression::compile(&c.expression_else),
                cfg: c.clone(),
            },
            SeriesConfig::Memc(c) => ModelEvaluator::Memc {
                args: ArgumentSpec::parse_all(&c.arguments)?,
                conditions: c.conditions.iter().map(|s| CompiledExpression::compile(s)).collect(),
                expressions: c
                    .expressions
                    .iter()
                    .map(|s| CompiledExpression::compile(s))
                    .collect(),
                cfg: c.clone(),
            },
            SeriesConfig::Xf(c) => ModelEvaluator::Xf {
                cfg: c.clone(),
                loaded: false,
            },
            SeriesConfig::Xg(c) => ModelEvaluator::Xg(c.clone()),
        };
        Ok(evaluator)
    }

    /// Compute the next value, updating the series' history channels.
    /// Callers hold the store lock for the whole call.
    pub fn compute_next(
        &mut self,
        rng: &mut StdRng,
        store: &mut HistoryStore,
        ctx: &TickContext,
    ) -> GeneratorResult<f64> {
        match self {
            ModelEvaluator::Ar(c) => {
                let ar = lag_sum(store, &c.common.id, Channel::X, &c.p);
                let (ar_d, ma_d) =
                    compute_driver_parts(store, &c.common.drivers, ctx.drivers_active);

                let et = noise::gaussian(rng, c.mean, c.std_dev);
                let xt = c.c + et + ar + ar_d + ma_d;

                store.push(&c.common.id, Channel::E, et);
                store.push(&c.common.id, Channel::X, xt);
                Ok(xt)
            }
            ModelEvaluator::Arma(c) => {
                let ar = lag_sum(store, &c.common.id, Channel::X, &c.p);
                let ma = lag_sum(store, &c.common.id, Channel::E, &c.q);
                let (ar_d, ma_d) =
                    compute_driver_parts(store, &c.common.drivers, ctx.drivers_active);

                let et = noise::gaussian(rng, c.mean, c.std_dev);
                let xt = c.c + et + ar + ma + ar_d + ma_d;

                store.push(&c.common.id, Channel::E, et);
                store.push(&c.common.id, Channel::X, xt);
                Ok(xt)
            }
            ModelEvaluator::Arima(c) => {
                let ar = lag_sum(store, &c.common.id, Channel::X, &c.p);
                let ma = lag_sum(store, &c.common.id, Channel::E, &c.q);

                // Differenced value first, then integrate the last i + 1 of them.
                let et = noise::gaussian(rng, c.mean, c.std_dev);
                let dt = c.c + et + ar + ma;
                store.push(&c.common.id, Channel::E, et);
                store.push(&c.common.id, Channel::D, dt);

                let i_part = integrate(store.tail(&c.common.id, Channel::D, c.i + 1));
                let (ar_d, ma_d) =
                    compute_driver_parts(store, &c.common.drivers, ctx.drivers_active);

                let xt = i_part + ar_d + ma_d;
                store.push(&c.common.id, Channel::X, xt);
                Ok(xt)
            }
            ModelEvaluator::Me {
                cfg,
                args,
                expression,
            } => {
                let bindings = resolve_arguments(args, store, ctx);
                let part = expression.evaluate(&bindings)?;
                let (ar_d, ma_d) =
                    compute_driver_parts(store, &cfg.common.drivers, ctx.drivers_active);

                let et = noise::gaussian(rng, cfg.mean, cfg.std_dev);
                let xt = cfg.c + part + ar_d + ma_d + et;

                store.push(&cfg.common.id, Channel::X, xt);
                Ok(xt)
            }
            ModelEvaluator::Mec {
                cfg,
                args,
                condition,
                expression,
                fallback,
            } => {
                let bindings = resolve_arguments(args, store, ctx);
                let part = if condition.holds(&bindings)? {
                    expression.evaluate(&bindings)?
                } else {
                    fallback.evaluate(&bindings)?
                };
                let (ar_d, ma_d) =
                    compute_driver_parts(store, &cfg.common.drivers, ctx.drivers_active);

                let et = noise::gaussian(rng, cfg.mean, cfg.std_dev);
                let xt = cfg.c + part + ar_d + ma_d + et;

                store.push(&cfg.common.id, Channel::X, xt);
                Ok(xt)
            }
            ModelEvaluator::Memc {
                cfg,
                args,
                conditions,
                expressions,
            } => {
                let bindings = resolve_arguments(args, store, ctx);

                // Last expression is the default when no condition holds.
                let mut selected = expressions.len() - 1;
                for (i, condition) in conditions.iter().enumerate().take(expressions.len()) {
                    if condition.holds(&bindings)? {
                        selected = i;
                        break;
                    }
                }
                let part = expressions[selected].evaluate(&bindings)?;
                let (ar_d, ma_d) =
                    compute_driver_parts(store, &cfg.common.drivers, ctx.drivers_active);

                let et = noise::gaussian(rng, cfg.mean, cfg.std_dev);
                let xt = cfg.c + part + ar_d + ma_d + et;

                store.push(&cfg.common.id, Channel::X, xt);
                Ok(xt)
            }
            ModelEvaluator::Xf { cfg, loaded } => {
                if !*loaded {
                    *loaded = true;
                    let samples = load_source(cfg)?;
                    store.seed(&cfg.common.id, Channel::S, samples);
                }

                let sample_count = store.len(&cfg.common.id, Channel::S);
                let xt = if sample_count > 0 {
                    let idx = (ctx.count as usize + ctx.delay) % sample_count;
                    store.at(&cfg.common.id, Channel::S, idx).unwrap_or(0.0)
                } else {
                    0.0
                };

                store.push(&cfg.common.id, Channel::X, xt);
                Ok(xt)
            }
            // Values arrive through the subscription callback; the tick just
            // reflects whatever is newest.
            ModelEvaluator::Xg(c) => Ok(store.get(&c.common.id, Channel::X, 0).unwrap_or(0.0)),
        }
    }
}

/// Coefficient-weighted sum over a channel's most recent lags, bounded by
/// the shorter of the coefficient vector and the available history.
fn lag_sum(store: &HistoryStore, id: &str, channel: Channel, coeffs: &[f64]) -> f64 {
    let available = store.len(id, channel);
    coeffs
        .iter()
        .enumerate()
        .take(available)
        .filter_map(|(j, c)| store.get(id, channel, j).map(|v| c * v))
        .sum()
}

/// Repeated pairwise trapezoid collapse of a differenced window down to a
/// single integrated value.
fn integrate(mut values: Vec<f64>) -> f64 {
    while values.len() > 1 {
        values = values.windows(2).map(|w| w[0] + w[1] / 2.0).collect();
    }
    values.first().copied().unwrap_or(0.0)
}

/// Bind each argument name to its current value: the reserved counters
/// `t`, `c` and `i` resolve against the tick context (lag-shifted, floored
/// at zero), everything else reads the named series' generated values.
/// A lag deeper than the buffer clamps to the oldest entry.
fn resolve_arguments(
    specs: &[ArgumentSpec],
    store: &HistoryStore,
    ctx: &TickContext,
) -> Vec<(String, f64)> {
    specs
        .iter()
        .map(|spec| {
            let lag = spec.lag;
            let value = match spec.name.as_str() {
                ID_EVENT_COUNT => ctx.count.saturating_sub(lag as u64) as f64,
                ID_EVENT_ITERATOR => ctx.iter.saturating_sub(lag as u64) as f64,
                ID_TIME_ELAPSED => {
                    let ms = ctx.elapsed_ms - lag as i64 * ctx.interval_ms as i64;
                    ms.max(0) as f64
                }
                id => {
                    let len = store.len(id, Channel::X);
                    if len == 0 {
                        0.0
                    } else {
                        let clamped = lag.min(len - 1);
                        store.get(id, Channel::X, clamped).unwrap_or(0.0)
                    }
                }
            };
            (spec.raw.clone(), value)
        })
        .collect()
}

fn load_source(cfg: &XfSeries) -> GeneratorResult<Vec<f64>> {
    let content = fs::read_to_string(&cfg.source_path).map_err(|e| {
        GeneratorError::SourceIo(format!("'{}': {}", cfg.source_path, e))
    })?;

    let parse_line = |line: &str| -> GeneratorResult<Vec<f64>> {
        line.split(SOURCE_FILE_SEPARATOR)
            .map(|token| {
                token.trim().parse::<f64>().map_err(|e| {
                    GeneratorError::SourceParse(format!(
                        "'{}': value '{}': {}",
                        cfg.source_path,
                        token.trim(),
                        e
                    ))
                })
            })
            .collect()
    };

    match (cfg.source_row, cfg.source_col) {
        (Some(row), _) => {
            let line = content.lines().nth(row).ok_or_else(|| {
                GeneratorError::SourceParse(format!(
                    "'{}': row {} out of range",
                    cfg.source_path, row
                ))
            })?;
            parse_line(line)
        }
        (None, Some(col)) => content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|line| {
                let values = parse_line(line)?;
                values.get(col).copied().ok_or_else(|| {
                    GeneratorError::SourceParse(format!(
                        "'{}': column {} out of range",
                        cfg.source_path, col
                    ))
                })
            })
            .collect(),
        (None, None) => Err(GeneratorError::SourceParse(format!(
            "'{}': no row or column index given",
            cfg.source_path
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SeriesCommon;
    use rand::SeedableRng;
    use std::io::Write;

    fn common(id: &str) -> SeriesCommon {
        SeriesCommon {
            id: id.to_string(),
            export: true,
            delay: 0,
            rank: 0,
            title: String::new(),
            topic: String::new(),
            interval: None,
            outlier_ratio_1s: 0.0,
            outlier_ratio_2s: 0.0,
            drivers: Vec::new(),
        }
    }

    fn ctx() -> TickContext {
        TickContext {
            elapsed_ms: 0,
            count: 0,
            iter: 0,
            interval_ms: 100,
            drivers_active: true,
            delay: 0,
        }
    }

    fn noiseless_ar(id: &str, c: f64, p: Vec<f64>) -> SeriesConfig {
        SeriesConfig::Ar(ArSeries {
            common: common(id),
            c,
            mean: 0.0,
            std_dev: 0.0,
            p,
        })
    }

    #[test]
    fn test_ar_decay_without_noise() {
        let mut evaluator = ModelEvaluator::build(&noiseless_ar("a", 0.0, vec![0.5])).unwrap();
        let mut store = HistoryStore::new();
        let mut rng = StdRng::seed_from_u64(1);

        store.push("a", Channel::X, 10.0);

        let mut expected = 10.0;
        for _ in 0..3 {
            expected *= 0.5;
            let xt = evaluator.compute_next(&mut rng, &mut store, &ctx()).unwrap();
            assert!((xt - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_ar_pushes_both_channels() {
        let mut evaluator = ModelEvaluator::build(&noiseless_ar("a", 1.0, vec![0.5])).unwrap();
        let mut store = HistoryStore::new();
        let mut rng = StdRng::seed_from_u64(1);

        evaluator.compute_next(&mut rng, &mut store, &ctx()).unwrap();
        assert_eq!(store.len("a", Channel::X), 1);
        assert_eq!(store.len("a", Channel::E), 1);
    }

    #[test]
    fn test_arma_includes_ma_term() {
        let cfg = SeriesConfig::Arma(ArmaSeries {
            common: common("a"),
            c: 0.0,
            mean: 0.0,
            std_dev: 0.0,
            p: vec![1.0],
            q: vec![2.0],
        });
        let mut evaluator = ModelEvaluator::build(&cfg).unwrap();
        let mut store = HistoryStore::new();
        let mut rng = StdRng::seed_from_u64(1);

        store.push("a", Channel::X, 3.0);
        store.push("a", Channel::E, 0.5);

        let xt = evaluator.compute_next(&mut rng, &mut store, &ctx()).unwrap();
        assert!((xt - (3.0 + 2.0 * 0.5)).abs() < 1e-12);
    }

    #[test]
    fn test_arima_integrates_differenced_values() {
        // With no AR/MA feedback and c = 2.0 every differenced value is 2.0,
        // so the pairwise collapse of (2.0, 2.0) yields 2.0 + 2.0 / 2 = 3.0.
        let cfg = SeriesConfig::Arima(ArimaSeries {
            common: common("a"),
            c: 2.0,
            mean: 0.0,
            std_dev: 0.0,
            p: vec![0.0],
            q: vec![0.0],
            i: 1,
        });
        let mut evaluator = ModelEvaluator::build(&cfg).unwrap();
        let mut store = HistoryStore::new();
        let mut rng = StdRng::seed_from_u64(1);

        let first = evaluator.compute_next(&mut rng, &mut store, &ctx()).unwrap();
        assert!((first - 2.0).abs() < 1e-12);

        let second = evaluator.compute_next(&mut rng, &mut store, &ctx()).unwrap();
        assert!((second - 3.0).abs() < 1e-12);
        assert_eq!(store.len("a", Channel::D), 2);
    }

    #[test]
    fn test_me_expression_with_counter_argument() {
        let cfg = SeriesConfig::Me(MeSeries {
            common: common("m"),
            c: 1.0,
            mean: 0.0,
            std_dev: 0.0,
            arguments: vec!["c".to_string()],
            expression: "c * 3".to_string(),
        });
        let mut evaluator = ModelEvaluator::build(&cfg).unwrap();
        let mut store = HistoryStore::new();
        let mut rng = StdRng::seed_from_u64(1);

        let mut tick = ctx();
        tick.count = 4;
        let xt = evaluator.compute_next(&mut rng, &mut store, &tick).unwrap();
        assert!((xt - 13.0).abs() < 1e-12);
    }

    #[test]
    fn test_mec_picks_alternate_branch() {
        let cfg = SeriesConfig::Mec(MecSeries {
            common: common("m"),
            c: 0.0,
            mean: 0.0,
            std_dev: 0.0,
            arguments: vec!["c".to_string()],
            condition: "c > 10".to_string(),
            expression: "100".to_string(),
            expression_else: "-5".to_string(),
        });
        let mut evaluator = ModelEvaluator::build(&cfg).unwrap();
        let mut store = HistoryStore::new();
        let mut rng = StdRng::seed_from_u64(1);

        let mut tick = ctx();
        tick.count = 5;
        let low = evaluator.compute_next(&mut rng, &mut store, &tick).unwrap();
        assert!((low - -5.0).abs() < 1e-12);

        tick.count = 11;
        let high = evaluator.compute_next(&mut rng, &mut store, &tick).unwrap();
        assert!((high - 100.0).abs() < 1e-12);
    }

    #[test]
    fn test_memc_defaults_to_last_expression() {
        let cfg = SeriesConfig::Memc(MemcSeries {
            common: common("m"),
            c: 0.0,
            mean: 0.0,
            std_dev: 0.0,
            arguments: vec!["c".to_string()],
            conditions: vec!["c < 2".to_string(), "c < 4".to_string()],
            expressions: vec!["1".to_string(), "2".to_string(), "9".to_string()],
        });
        let mut evaluator = ModelEvaluator::build(&cfg).unwrap();
        let mut store = HistoryStore::new();
        let mut rng = StdRng::seed_from_u64(1);

        let mut tick = ctx();
        tick.count = 1;
        assert_eq!(
            evaluator.compute_next(&mut rng, &mut store, &tick).unwrap(),
            1.0
        );

        tick.count = 3;
        assert_eq!(
            evaluator.compute_next(&mut rng, &mut store, &tick).unwrap(),
            2.0
        );

        tick.count = 7;
        assert_eq!(
            evaluator.compute_next(&mut rng, &mut store, &tick).unwrap(),
            9.0
        );
    }

    #[test]
    fn test_xf_cycles_through_row_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "1.0;2.0;3.0").unwrap();

        let cfg = SeriesConfig::Xf(XfSeries {
            common: common("f"),
            source_path: path.to_string_lossy().to_string(),
            source_row: Some(0),
            source_col: None,
        });
        let mut evaluator = ModelEvaluator::build(&cfg).unwrap();
        let mut store = HistoryStore::new();
        let mut rng = StdRng::seed_from_u64(1);

        let mut tick = ctx();
        for expected in [1.0, 2.0, 3.0, 1.0] {
            let xt = evaluator.compute_next(&mut rng, &mut store, &tick).unwrap();
            assert_eq!(xt, expected);
            tick.count += 1;
        }
    }

    #[test]
    fn test_xf_reads_column_across_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "1.0;10.0").unwrap();
        writeln!(file, "2.0;20.0").unwrap();

        let cfg = SeriesConfig::Xf(XfSeries {
            common: common("f"),
            source_path: path.to_string_lossy().to_string(),
            source_row: None,
            source_col: Some(1),
        });
        let mut evaluator = ModelEvaluator::build(&cfg).unwrap();
        let mut store = HistoryStore::new();
        let mut rng = StdRng::seed_from_u64(1);

        let xt = evaluator.compute_next(&mut rng, &mut store, &ctx()).unwrap();
        assert_eq!(xt, 10.0);
        assert_eq!(store.values("f", Channel::S), vec![10.0, 20.0]);
    }

    #[test]
    fn test_xf_missing_file_is_fatal() {
        let cfg = SeriesConfig::Xf(XfSeries {
            common: common("f"),
            source_path: "/nonexistent/samples.csv".to_string(),
            source_row: Some(0),
            source_col: None,
        });
        let mut evaluator = ModelEvaluator::build(&cfg).unwrap();
        let mut store = HistoryStore::new();
        let mut rng = StdRng::seed_from_u64(1);

        let err = evaluator
            .compute_next(&mut rng, &mut store, &ctx())
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_xg_returns_latest_or_zero() {
        let cfg = SeriesConfig::Xg(XgSeries {
            common: common("g"),
            source_broker: "ws://localhost:9001".to_string(),
            source_topic: "upstream".to_string(),
        });
        let mut evaluator = ModelEvaluator::build(&cfg).unwrap();
        let mut store = HistoryStore::new();
        let mut rng = StdRng::seed_from_u64(1);

        assert_eq!(
            evaluator.compute_next(&mut rng, &mut store, &ctx()).unwrap(),
            0.0
        );

        store.push("g", Channel::X, 42.0);
        assert_eq!(
            evaluator.compute_next(&mut rng, &mut store, &ctx()).unwrap(),
            42.0
        );
    }

    #[test]
    fn test_lagged_series_argument_resolution() {
        let cfg = SeriesConfig::Me(MeSeries {
            common: common("m"),
            c: 0.0,
            mean: 0.0,
            std_dev: 0.0,
            arguments: vec!["u_1".to_string()],
            expression: "u_1 * 2".to_string(),
        });
        let mut evaluator = ModelEvaluator::build(&cfg).unwrap();
        let mut store = HistoryStore::new();
        let mut rng = StdRng::seed_from_u64(1);

        store.push("u", Channel::X, 5.0);
        store.push("u", Channel::X, 7.0);

        let xt = evaluator.compute_next(&mut rng, &mut store, &ctx()).unwrap();
        assert!((xt - 10.0).abs() < 1e-12);
    }
}
