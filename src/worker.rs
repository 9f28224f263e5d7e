//! Worker: runs one task's share of the request budget against the shared
//! HTTP client pool, round after round, applying rate limiting, register,
//! and assertion per spec.md §4.7.
//!
//! Grounded on the teacher's `run_worker` (checking the stop condition at
//! the top of the loop, reused scratch buffers) generalized from a
//! duration-bound single-request loop to a request-count-bound
//! `Vec<RequestItem>` round.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::conditions::{self, Condition};
use crate::context::{GlobalContext, ResponseContext};
use crate::domain::{LoadStats, RequestItem};
use crate::errors::WarmupAnomaly;
use crate::percentiles::LatencyRecorder;
use crate::register;
use crate::request_builder::{CompiledRequest, RequestScratch};
use crate::variables::VariableStore;

/// Token-bucket rate limiter shared by every worker. Refilled once per
/// second by the orchestrator; a burst of at most one second's worth of
/// requests can be taken at once.
pub struct TokenBucket {
    tokens: AtomicI64,
    rate_per_sec: i64,
}

impl TokenBucket {
    pub fn new(rate_per_sec: u64) -> Self {
        Self {
            tokens: AtomicI64::new(rate_per_sec as i64),
            rate_per_sec: rate_per_sec as i64,
        }
    }

    pub fn refill(&self) {
        self.tokens.store(self.rate_per_sec, Ordering::Relaxed);
    }

    /// Try to take one token. On failure the caller should back off briefly
    /// and retry, per spec.md §4.7.
    pub fn try_take(&self) -> bool {
        let mut current = self.tokens.load(Ordering::Relaxed);
        loop {
            if current <= 0 {
                return false;
            }
            match self.tokens.compare_exchange_weak(
                current,
                current - 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

/// Render a GlobalContext value for template substitution: strings unwrap to
/// their bare contents, everything else falls back to JSON representation.
fn value_to_plain_string(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A [`RequestItem`] with its templates pre-compiled once at load time.
pub struct CompiledItem {
    pub name: String,
    pub request: CompiledRequest,
    pub register: Vec<register::RegisterRule>,
    pub assert: Option<Condition>,
    pub skip_invalid_assert: bool,
    pub sleep_ms: Option<u64>,
    pub sleep_jitter_ms: Option<u64>,
    pub log_status_codes: Vec<u16>,
}

impl CompiledItem {
    pub fn compile(
        item: &RequestItem,
        default_url: &str,
        runner: &crate::domain::RunnerConfig,
    ) -> Result<Self, crate::errors::BuildError> {
        let assert = match (&item.assert, &item.assert_dsl) {
            (Some(a), Some(dsl)) => {
                let parsed = conditions::parse_dsl(dsl).unwrap_or_else(|e| {
                    warn!(error = %e, "assert_dsl failed to parse, treating as always-false");
                    Condition::Leaf {
                        path: "_never".into(),
                        op: crate::conditions::Op::Eq,
                        operand: serde_json::Value::Null,
                    }
                });
                Some(Condition::And(vec![a.clone(), parsed]))
            }
            (Some(a), None) => Some(a.clone()),
            (None, Some(dsl)) => conditions::parse_dsl(dsl).ok(),
            (None, None) => None,
        };

        let mut log_status_codes = item.log_status_codes.clone();
        log_status_codes.extend(runner.log_status_codes.iter().copied());

        Ok(Self {
            name: item.name.clone().unwrap_or_default(),
            request: CompiledRequest::compile_with_defaults(
                &item.request,
                default_url,
                runner.default_basic_auth.as_ref(),
                runner.disable_header_names_normalizing,
                runner.compress,
            )?,
            register: item.register.clone(),
            assert,
            skip_invalid_assert: item.skip_invalid_assert || runner.skip_invalid_assert,
            sleep_ms: item.sleep.as_ref().map(|s| s.sleep_in_ms),
            sleep_jitter_ms: item.sleep.as_ref().and_then(|s| s.jitter_in_ms),
            log_status_codes,
        })
    }
}

pub struct WorkerConfig {
    pub task_id: usize,
    /// Number of rounds (full passes over `items`) this worker runs.
    pub total_rounds: u64,
    /// This worker's share of the global `-l` request-count budget, if one
    /// was given. Checked independently of `total_rounds` (spec.md §4.7/§8
    /// invariant 3: round budget and count budget are separate stop
    /// conditions).
    pub request_budget: Option<u64>,
    pub items: Arc<Vec<CompiledItem>>,
    pub variables: Arc<VariableStore>,
    pub global: Arc<GlobalContext>,
    pub rate_limiter: Option<Arc<TokenBucket>>,
    pub interrupted: Arc<AtomicBool>,
    pub deadline: Option<Instant>,
    pub log_requests: bool,
    pub continue_on_assert_invalid: bool,
    pub latencies: Arc<LatencyRecorder>,
    pub skip_latency_recording: bool,
}

/// Run this worker's rounds: each round executes the entire item list once,
/// in order, stopping early if interrupted, once `deadline` (wall-clock
/// duration bound) has passed, or once `request_budget` requests have been
/// issued (spec.md §4.7 — round budget and count budget are independent
/// stop conditions).
pub async fn run_worker(client: reqwest::Client, config: WorkerConfig) -> LoadStats {
    let mut stats = LoadStats::default();
    let mut scratch = RequestScratch::default();
    let mut requests_issued: u64 = 0;

    let budget_exhausted =
        |issued: u64| config.request_budget.is_some_and(|budget| issued >= budget);

    'rounds: for _ in 0..config.total_rounds {
        if config.interrupted.load(Ordering::Relaxed) {
            break;
        }
        if config.deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        if budget_exhausted(requests_issued) {
            break;
        }

        for item in config.items.iter() {
            if config.interrupted.load(Ordering::Relaxed) {
                break 'rounds;
            }
            if config.deadline.is_some_and(|d| Instant::now() >= d) {
                break 'rounds;
            }

            // spec.md §4.7 step 4: invoke the client `execute_repeat_times`
            // times for this one occurrence in the item sequence.
            let mut fatal_invalid = false;
            'repeats: for _ in 0..item.request.execute_repeat_times() {
                if config.interrupted.load(Ordering::Relaxed) {
                    break 'rounds;
                }
                if config.deadline.is_some_and(|d| Instant::now() >= d) {
                    break 'rounds;
                }
                if budget_exhausted(requests_issued) {
                    break 'rounds;
                }

                if let Some(bucket) = &config.rate_limiter {
                    while !bucket.try_take() {
                        if config.interrupted.load(Ordering::Relaxed) {
                            break 'rounds;
                        }
                        sleep(Duration::from_millis(1)).await;
                    }
                }

                fatal_invalid = run_one(&client, item, &config, &mut scratch, &mut stats).await;
                requests_issued += 1;
                if fatal_invalid && !config.continue_on_assert_invalid {
                    break 'repeats;
                }
            }

            if let Some(ms) = item.sleep_ms {
                let jitter = item
                    .sleep_jitter_ms
                    .map(|j| rand::Rng::gen_range(&mut rand::thread_rng(), 0..=j))
                    .unwrap_or(0);
                sleep(Duration::from_millis(ms + jitter)).await;
            }

            // Invariant 8: a failing (non-skip-invalid) assertion aborts the
            // rest of this round unless continue_on_assert_invalid is set.
            if fatal_invalid && !config.continue_on_assert_invalid {
                continue 'rounds;
            }
        }
    }

    debug!(task_id = config.task_id, requests = stats.num_requests, "worker finished");
    stats
}

/// Executes one item. Returns `true` when a non-skip-invalid assertion
/// failure occurred, signaling the caller to abort the rest of this round
/// (spec.md §8 invariant 8).
async fn run_one(
    client: &reqwest::Client,
    item: &CompiledItem,
    config: &WorkerConfig,
    scratch: &mut RequestScratch,
    stats: &mut LoadStats,
) -> bool {
    let snapshot = config.global.snapshot();
    let variables = &config.variables;
    // GlobalContext is readable by templates "under the same name lookup as
    // variables" and is the baseline of the runtime context, which takes
    // precedence over declared variables (spec.md §3/§4.3 step 1).
    let request = match item.request.build(client, scratch, |name| {
        snapshot
            .get(name)
            .map(value_to_plain_string)
            .or_else(|| variables.resolve(name))
    }) {
        Ok(r) => r,
        Err(e) => {
            warn!(item = %item.name, error = %e, "failed to build request");
            stats.num_errs += 1;
            return false;
        }
    };

    let start = Instant::now();
    let result = client.execute(request).await;
    let elapsed = start.elapsed();

    let response = match result {
        Ok(resp) => resp,
        Err(e) => {
            warn!(item = %item.name, error = %e, "request failed");
            stats.num_errs += 1;
            return false;
        }
    };

    let status = response.status().as_u16();
    if config.log_requests || item.log_status_codes.contains(&status) {
        debug!(item = %item.name, status, "request completed");
    }
    *stats.status_counts.entry(status).or_insert(0) += 1;
    // Every completed response counts, independent of status, so
    // `status_counts` always sums to `num_requests` (spec.md §8 invariant 7).
    stats.num_requests += 1;

    let headers: std::collections::HashMap<String, String> = response
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
        .collect();

    let body = response.text().await.unwrap_or_default();
    let body_json = serde_json::from_str(&body).ok();

    let response_ctx = ResponseContext {
        status,
        headers,
        body,
        body_json,
        elapsed_ms: elapsed.as_millis() as u64,
    };

    if let Err(e) = register::apply_rules(&item.register, &response_ctx, &config.global) {
        warn!(item = %item.name, error = %e, "register rule failed");
    }

    let mut fatal_invalid = false;
    if let Some(assert) = &item.assert {
        let mut root = config.global.snapshot();
        if let Some(root_obj) = root.as_object_mut() {
            root_obj.insert("_ctx".to_string(), response_ctx.as_value());
        }
        if let Err(_failure) = conditions::evaluate(assert, &root) {
            if item.skip_invalid_assert {
                stats.num_skipped_invalid += 1;
            } else {
                stats.num_invalid += 1;
                fatal_invalid = true;
            }
        }
    }

    // Matches original_source/loader.go: only successful/redirect statuses
    // count toward response-size and duration aggregates.
    if matches!(status, 200 | 201 | 301 | 307) {
        if !config.skip_latency_recording {
            config.latencies.record(elapsed);
        }
        stats.total_resp_size += response_ctx.body.len() as u64 + 1;
        stats.total_duration += elapsed;
        if stats.counted_responses == 0 || elapsed < stats.min_request_time {
            stats.min_request_time = elapsed;
        }
        if elapsed > stats.max_request_time {
            stats.max_request_time = elapsed;
        }
        stats.counted_responses += 1;
    }

    fatal_invalid
}

/// Run a single synchronous warmup pass over `items`, returning the first
/// status code outside `valid_status_codes` encountered, if any.
pub async fn warmup(
    client: &reqwest::Client,
    items: &[CompiledItem],
    variables: &VariableStore,
    global: &GlobalContext,
    valid_status_codes: &[u16],
) -> Result<(), WarmupAnomaly> {
    let mut scratch = RequestScratch::default();
    for item in items {
        let snapshot = global.snapshot();
        let request = match item.request.build(client, &mut scratch, |name| {
            snapshot
                .get(name)
                .map(value_to_plain_string)
                .or_else(|| variables.resolve(name))
        }) {
            Ok(r) => r,
            Err(_) => continue,
        };
        let url = request.url().to_string();
        if let Ok(resp) = client.execute(request).await {
            let status = resp.status().as_u16();
            if !valid_status_codes.is_empty() && !valid_status_codes.contains(&status) {
                return Err(WarmupAnomaly {
                    url,
                    status,
                    expected: valid_status_codes.to_vec(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_bucket_exhausts_then_refills() {
        let bucket = TokenBucket::new(2);
        assert!(bucket.try_take());
        assert!(bucket.try_take());
        assert!(!bucket.try_take());
        bucket.refill();
        assert!(bucket.try_take());
    }

    #[test]
    fn token_bucket_zero_rate_never_takes() {
        let bucket = TokenBucket::new(0);
        assert!(!bucket.try_take());
    }

    #[test]
    fn value_to_plain_string_unwraps_json_strings() {
        assert_eq!(value_to_plain_string(&serde_json::json!("hello")), "hello");
        assert_eq!(value_to_plain_string(&serde_json::json!(42)), "42");
    }
}
