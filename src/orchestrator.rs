//! Orchestrator: owns the shared client pool, partitions the request budget
//! across workers, runs the warmup pass, spawns and joins workers, and
//! prints the final report.
//!
//! Grounded on `original_source/main.go`'s top-level run sequence (warmup,
//! spawn, wait, printf report) and the teacher's task-spawning/`mpsc`
//! result-collection idiom from its own scenario executor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::client::{build_client, ClientConfig};
use crate::context::GlobalContext;
use crate::domain::{LoadStats, RequestItem, RunnerConfig};
use crate::errors::BuildError;
use crate::percentiles::LatencyRecorder;
use crate::variables::VariableStore;
use crate::worker::{self, CompiledItem, TokenBucket, WorkerConfig};

pub struct RunOutcome {
    pub stats: LoadStats,
    pub latencies: Arc<LatencyRecorder>,
    /// Wall-clock time from the first worker spawn to the last worker join,
    /// the denominator for throughput reporting (spec.md §4.8/§4.9) —
    /// distinct from `stats.total_duration`, which sums every individual
    /// request's own elapsed time across all concurrent workers.
    pub wall_time: Duration,
}

/// Split `total` units of work across `workers` tasks: `floor((total+1)/workers)`
/// per worker, remainder distributed to the *last* workers, and `workers`
/// reduced to `total` if there are more workers than units of work.
/// Mirrors `original_source/main.go`'s budget-partition loop.
pub fn partition_budget(total: u64, workers: usize) -> Vec<u64> {
    let total = total.max(1);
    let workers = (workers.max(1) as u64).min(total) as usize;

    let per_worker = (total + 1) / workers as u64;
    let mut budgets = vec![per_worker; workers];

    // floor((total+1)/workers) * workers is >= total in every case except
    // when it undershoots by up to `workers - 1`; settle the difference
    // against the last workers either way so the sum is exactly `total`.
    let assigned: i64 = per_worker as i64 * workers as i64;
    let mut diff = total as i64 - assigned;
    let mut i = workers;
    while diff != 0 && i > 0 {
        i -= 1;
        if diff > 0 {
            budgets[i] += 1;
            diff -= 1;
        } else {
            budgets[i] = budgets[i].saturating_sub(1);
            diff += 1;
        }
    }
    budgets
}

pub async fn run(
    runner: &RunnerConfig,
    items: Vec<RequestItem>,
    variables: Arc<VariableStore>,
    client_config: ClientConfig,
) -> Result<RunOutcome, BuildError> {
    let client = build_client(&ClientConfig {
        pool_config: crate::connection_pool::PoolConfig::new()
            .with_max_idle_per_host(runner.concurrency),
        ..client_config
    })?;

    let default_url = runner.default_endpoint.as_deref().unwrap_or("");
    let mut compiled = Vec::with_capacity(items.len());
    for item in &items {
        compiled.push(CompiledItem::compile(item, default_url, runner)?);
    }
    let compiled = Arc::new(compiled);
    let global = Arc::new(GlobalContext::new());
    if runner.reset_context {
        info!("reset_context set: starting with an empty global context");
    }

    if !runner.no_warm {
        info!("running warmup pass");
        if let Err(anomaly) = worker::warmup(
            &client,
            &compiled,
            &variables,
            &global,
            &runner.valid_status_codes_during_warmup,
        )
        .await
        {
            warn!(
                url = %anomaly.url,
                status = anomaly.status,
                "warmup produced an unexpected status code"
            );
        }
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, finishing in-flight requests then stopping");
                interrupted.store(true, Ordering::Relaxed);
            }
        });
    }

    let rate_limiter = runner.rate_limit_per_sec.map(|r| Arc::new(TokenBucket::new(r)));
    if let Some(bucket) = rate_limiter.clone() {
        let interrupted = interrupted.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            loop {
                tick.tick().await;
                if interrupted.load(Ordering::Relaxed) {
                    break;
                }
                bucket.refill();
            }
        });
    }

    // The global `-l` count budget (if any) is what `partition_budget` is
    // defined for; `total_rounds` applies identically to every worker and is
    // an independent stop condition (spec.md §4.7/§8 invariant 3).
    let request_budgets: Vec<Option<u64>> = match runner.request_budget {
        Some(l) => partition_budget(l, runner.concurrency)
            .into_iter()
            .map(Some)
            .collect(),
        None => vec![None; runner.concurrency],
    };
    let latencies = Arc::new(LatencyRecorder::new(runner.metric_sample_size));
    let deadline = runner
        .duration_in_seconds
        .map(|secs| std::time::Instant::now() + Duration::from_secs(secs));

    let start = Instant::now();
    let mut handles = Vec::with_capacity(request_budgets.len());
    for (task_id, request_budget) in request_budgets.into_iter().enumerate() {
        let client = client.clone();
        let config = WorkerConfig {
            task_id,
            total_rounds: runner.total_rounds,
            request_budget,
            items: compiled.clone(),
            variables: variables.clone(),
            global: global.clone(),
            rate_limiter: rate_limiter.clone(),
            interrupted: interrupted.clone(),
            deadline,
            log_requests: runner.log_requests,
            continue_on_assert_invalid: runner.continue_on_assert_invalid,
            latencies: latencies.clone(),
            skip_latency_recording: runner.benchmark_only || runner.no_stats,
        };
        handles.push(tokio::spawn(worker::run_worker(client, config)));
    }

    let mut total = LoadStats::default();
    for handle in handles {
        match handle.await {
            Ok(stats) => total.merge(&stats),
            Err(e) => warn!(error = %e, "worker task panicked"),
        }
    }
    let wall_time = start.elapsed();

    Ok(RunOutcome {
        stats: total,
        latencies,
        wall_time,
    })
}

/// Print the four-part summary: request counts, throughput, latency
/// percentiles, and the status-code breakdown, per spec.md §4.10. The
/// latency section is skipped when `benchmark_only` or `no_stats` is set;
/// the total-bytes figure is omitted when `no_size_stats` is set.
pub fn report(stats: &LoadStats, latencies: &LatencyRecorder, runner: &RunnerConfig, wall_time: Duration) {
    let total_secs = wall_time.as_secs_f64().max(f64::MIN_POSITIVE);
    println!("== summary ==");
    println!(
        "requests: {}  errors: {}  invalid: {}  skipped_invalid: {}",
        stats.num_requests, stats.num_errs, stats.num_invalid, stats.num_skipped_invalid
    );
    if runner.no_size_stats {
        println!("throughput: {:.2} req/s", stats.num_requests as f64 / total_secs);
    } else {
        println!(
            "throughput: {:.2} req/s  total bytes: {}",
            stats.num_requests as f64 / total_secs,
            stats.total_resp_size
        );
    }

    if !(runner.benchmark_only || runner.no_stats) {
        println!("== latency (us) ==");
        println!(
            "{:>8} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10}",
            "count", "min", "max", "mean", "p50", "p75", "p95", "p99", "p99.9"
        );
        println!("{}", latencies.stats().format_table_row());

        println!("== histogram ==");
        print!("{}", latencies.stats().format_histogram(&latencies.samples()));
    }

    println!("== status codes ==");
    let mut codes: Vec<_> = stats.status_counts.iter().collect();
    codes.sort_by_key(|(code, _)| **code);
    for (code, count) in codes {
        println!("  {} {}: {}", code, crate::errors::categorize_status_code(*code), count);
    }
}

/// Exit code per spec.md §7: 0 success, 1 if `assert_invalid` is set and any
/// assertion failure was seen, 2 if `assert_error` is set and any request
/// error was seen (2 takes priority over 1 when both occur).
pub fn exit_code(stats: &LoadStats, runner: &RunnerConfig) -> i32 {
    if runner.assert_error && stats.num_errs > 0 {
        2
    } else if runner.assert_invalid && stats.num_invalid > 0 {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_splits_evenly_when_divisible() {
        let budgets = partition_budget(10, 5);
        assert_eq!(budgets.iter().sum::<u64>(), 10);
        assert_eq!(budgets.len(), 5);
    }

    #[test]
    fn partition_gives_remainder_to_last_workers() {
        let budgets = partition_budget(11, 3);
        assert_eq!(budgets.iter().sum::<u64>(), 11);
        assert_eq!(budgets.len(), 3);
    }

    #[test]
    fn partition_reduces_worker_count_below_total() {
        let budgets = partition_budget(3, 10);
        assert_eq!(budgets.len(), 3);
        assert_eq!(budgets.iter().sum::<u64>(), 3);
    }

    #[test]
    fn exit_code_prioritizes_errors_over_invalid() {
        let mut stats = LoadStats::default();
        stats.num_errs = 1;
        stats.num_invalid = 1;
        let runner = RunnerConfig {
            assert_error: true,
            assert_invalid: true,
            ..RunnerConfig::default()
        };
        assert_eq!(exit_code(&stats, &runner), 2);
    }

    #[test]
    fn exit_code_is_zero_when_clean() {
        let runner = RunnerConfig {
            assert_error: true,
            assert_invalid: true,
            ..RunnerConfig::default()
        };
        assert_eq!(exit_code(&LoadStats::default(), &runner), 0);
    }

    #[test]
    fn exit_code_ignores_counts_when_flags_unset() {
        let mut stats = LoadStats::default();
        stats.num_errs = 1;
        stats.num_invalid = 1;
        assert_eq!(exit_code(&stats, &RunnerConfig::default()), 0);
    }
}
