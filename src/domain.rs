//! Core data model: variables, request templates, runner configuration.
//!
//! Field names and per-kind semantics are grounded on the original Go
//! `domain.go` (`Variable`, `RequestTemplate`, `RunnerConfig`) this tool's
//! behavior is specified against.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A single named variable definition, resolved by [`crate::variables::VariableStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    #[serde(rename = "type")]
    pub kind: VariableKind,
    pub name: String,

    /// Static values to pick from, for `type: list`.
    #[serde(default)]
    pub data: Vec<serde_json::Value>,

    /// Path to a newline-delimited file, for `type: file`.
    #[serde(default)]
    pub path: Option<String>,

    /// Starting value for `sequence32`/`sequence64`/`range`. The YAML key is
    /// `from`, matching the spec's external field name for `range`.
    #[serde(default, rename = "from", alias = "start")]
    pub start: Option<i64>,

    /// Ending value (inclusive) for `type: range`. The YAML key is `to`.
    #[serde(default, rename = "to", alias = "end")]
    pub end: Option<i64>,

    /// `strftime`-style layout for `type: now_with_format`.
    #[serde(default)]
    pub format: Option<String>,

    /// String→string rewrite map applied as a simultaneous replacement over
    /// the generated value before it's returned, for any variable kind.
    #[serde(default)]
    pub replace: Option<HashMap<String, String>>,

    /// Element count for `int_array_bitmap` / `random_array`.
    #[serde(default)]
    pub size: Option<usize>,

    /// Inclusive lower bound for generated array elements.
    #[serde(default)]
    pub min: Option<i64>,

    /// Inclusive upper bound for generated array elements.
    #[serde(default)]
    pub max: Option<i64>,

    /// Wrap the rendered `random_array` in `[` `]`. Defaults to true.
    #[serde(default = "default_true")]
    pub enclosure: bool,
}

fn default_true() -> bool {
    true
}

/// The closed set of variable kinds. Matched explicitly rather than hidden
/// behind a trait: there is no plan for third-party-defined kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableKind {
    List,
    File,
    Sequence32,
    Sequence64,
    Uuid,
    NowLocal,
    NowUtc,
    NowUtcLite,
    NowWithFormat,
    NowUnix,
    NowUnixMs,
    NowUnixMicro,
    NowUnixNano,
    Range,
    IntArrayBitmap,
    RandomArray,
}

/// Header entries as declared in config: an ordered list of single-entry
/// maps, so the same header name may appear more than once and declaration
/// order determines override order (spec.md §3, §4.3 step 5).
#[derive(Debug, Clone, Default)]
pub struct OrderedHeaders(pub Vec<(String, String)>);

impl OrderedHeaders {
    pub fn iter(&self) -> std::slice::Iter<'_, (String, String)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a OrderedHeaders {
    type Item = &'a (String, String);
    type IntoIter = std::slice::Iter<'a, (String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<(String, String)> for OrderedHeaders {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        OrderedHeaders(iter.into_iter().collect())
    }
}

impl<'de> Deserialize<'de> for OrderedHeaders {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let maps: Vec<HashMap<String, String>> = Deserialize::deserialize(deserializer)?;
        let mut out = Vec::with_capacity(maps.len());
        for map in maps {
            out.extend(map);
        }
        Ok(OrderedHeaders(out))
    }
}

impl Serialize for OrderedHeaders {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeSeq;
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            let mut single = HashMap::with_capacity(1);
            single.insert(k.clone(), v.clone());
            seq.serialize_element(&single)?;
        }
        seq.end()
    }
}

/// A request body line or header value before placeholder substitution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestTemplate {
    #[serde(default)]
    pub method: Option<String>,
    pub url: String,
    /// Declared as an ordered list of single-entry maps in YAML (duplicates
    /// allowed); see [`OrderedHeaders`].
    #[serde(default)]
    pub headers: OrderedHeaders,
    #[serde(default)]
    pub body: Vec<String>,
    #[serde(default)]
    pub body_repeat_times: Option<usize>,
    #[serde(default)]
    pub disable_header_names_normalizing: bool,
    #[serde(default)]
    pub basic_auth: Option<BasicAuth>,
    #[serde(default)]
    pub compress: bool,

    /// Ordered `name -> variable name` bindings evaluated once per request,
    /// before the URL/header templates render. A binding's value is looked
    /// up via the Variable Store and takes precedence over a
    /// declared-variable placeholder of the same name.
    #[serde(default)]
    pub runtime_variables: indexmap::IndexMap<String, String>,

    /// Like `runtime_variables`, but re-evaluated on every body-repeat
    /// iteration so each repeated copy of the body can differ.
    #[serde(default)]
    pub runtime_body_line_variables: indexmap::IndexMap<String, String>,

    /// How many times to invoke the client for this one request, each
    /// invocation assessed independently by register/assert. Coerced to at
    /// least 1.
    #[serde(default)]
    pub execute_repeat_times: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// A single step in a request item's execution: request, optional register
/// and assertion, optional sleep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestItem {
    #[serde(default)]
    pub name: Option<String>,
    pub request: RequestTemplate,
    #[serde(default)]
    pub register: Vec<crate::register::RegisterRule>,
    #[serde(default)]
    pub assert: Option<crate::conditions::Condition>,
    #[serde(default)]
    pub assert_dsl: Option<String>,
    #[serde(default)]
    pub skip_invalid_assert: bool,
    #[serde(default)]
    pub sleep: Option<Sleep>,
    #[serde(default)]
    pub log_status_codes: Vec<u16>,
}

/// A pause between requests, expressed as a fixed or jittered duration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sleep {
    pub sleep_in_ms: u64,
    #[serde(default)]
    pub jitter_in_ms: Option<u64>,
}

/// Top-level runner configuration, loaded from the `runner` YAML key.
/// Field names match `original_source/domain.go`'s `config:"..."` tags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_total_rounds")]
    pub total_rounds: u64,
    #[serde(default = "default_workers")]
    pub concurrency: usize,
    #[serde(default)]
    pub duration_in_seconds: Option<u64>,
    #[serde(default)]
    pub rate_limit_per_sec: Option<u64>,
    #[serde(default)]
    pub valid_status_codes_during_warmup: Vec<u16>,
    #[serde(default)]
    pub no_warm: bool,

    /// Exit with status 1 if any invalid (failed-assertion) response was seen.
    #[serde(default)]
    pub assert_invalid: bool,
    /// Keep running after an invalid assertion instead of treating it as fatal.
    #[serde(default)]
    pub continue_on_assert_invalid: bool,
    /// Default for [`RequestItem::skip_invalid_assert`] when a step doesn't set it.
    #[serde(default)]
    pub skip_invalid_assert: bool,
    /// Exit with status 2 if any transport-level request error was seen.
    #[serde(default)]
    pub assert_error: bool,

    #[serde(default)]
    pub log_requests: bool,
    #[serde(default)]
    pub log_status_codes: Vec<u16>,

    #[serde(default = "default_sample_size")]
    pub metric_sample_size: usize,
    #[serde(default)]
    pub benchmark_only: bool,
    #[serde(default)]
    pub no_stats: bool,
    #[serde(default)]
    pub no_size_stats: bool,
    #[serde(default)]
    pub compress: bool,

    #[serde(default)]
    pub disable_header_names_normalizing: bool,
    /// Clear [`crate::context::GlobalContext`] at the start of this run.
    #[serde(default)]
    pub reset_context: bool,

    /// Scheme/host inherited by a request whose URL omits them.
    #[serde(default)]
    pub default_endpoint: Option<String>,
    #[serde(default)]
    pub default_basic_auth: Option<BasicAuth>,

    /// Global total-request-count budget (CLI `-l`, `None` = unlimited).
    /// Independent of `total_rounds`: partitioned across workers by
    /// [`crate::orchestrator::partition_budget`] and checked as its own stop
    /// condition alongside the round budget (spec.md §4.7/§8 invariant 3).
    #[serde(default)]
    pub request_budget: Option<u64>,
}

fn default_total_rounds() -> u64 {
    1
}

fn default_workers() -> usize {
    1
}

fn default_sample_size() -> usize {
    10_000
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            total_rounds: default_total_rounds(),
            concurrency: default_workers(),
            duration_in_seconds: None,
            rate_limit_per_sec: None,
            valid_status_codes_during_warmup: Vec::new(),
            no_warm: false,
            assert_invalid: false,
            continue_on_assert_invalid: false,
            skip_invalid_assert: false,
            assert_error: false,
            log_requests: false,
            log_status_codes: Vec::new(),
            metric_sample_size: default_sample_size(),
            benchmark_only: false,
            no_stats: false,
            no_size_stats: false,
            compress: false,
            disable_header_names_normalizing: false,
            reset_context: false,
            default_endpoint: None,
            default_basic_auth: None,
            request_budget: None,
        }
    }
}

/// Aggregate statistics collected by one worker and folded by the
/// orchestrator, mirroring `original_source/loader.go`'s `RequesterStats`.
#[derive(Debug, Clone, Default)]
pub struct LoadStats {
    pub total_resp_size: u64,
    pub total_duration: std::time::Duration,
    pub min_request_time: std::time::Duration,
    pub max_request_time: std::time::Duration,
    /// Every completed response, any status. Kept equal to the sum of
    /// `status_counts` (spec.md §8 invariant 7).
    pub num_requests: u64,
    /// The subset of `num_requests` whose status counts toward size/duration
    /// aggregates (200/201/301/307), used only to seed `min_request_time` on
    /// the first such response.
    pub counted_responses: u64,
    pub num_errs: u64,
    pub num_invalid: u64,
    pub num_skipped_invalid: u64,
    pub status_counts: HashMap<u16, u64>,
}

impl LoadStats {
    pub fn merge(&mut self, other: &LoadStats) {
        self.total_resp_size += other.total_resp_size;
        self.total_duration += other.total_duration;
        if other.counted_responses > 0 {
            if self.counted_responses == 0 || other.min_request_time < self.min_request_time {
                self.min_request_time = other.min_request_time;
            }
            if other.max_request_time > self.max_request_time {
                self.max_request_time = other.max_request_time;
            }
        }
        self.num_requests += other.num_requests;
        self.counted_responses += other.counted_responses;
        self.num_errs += other.num_errs;
        self.num_invalid += other.num_invalid;
        self.num_skipped_invalid += other.num_skipped_invalid;
        for (code, count) in &other.status_counts {
            *self.status_counts.entry(*code).or_insert(0) += count;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_accumulates_counts_and_tracks_extremes() {
        let mut total = LoadStats::default();
        let mut a = LoadStats::default();
        a.num_requests = 5;
        a.counted_responses = 5;
        a.min_request_time = std::time::Duration::from_millis(10);
        a.max_request_time = std::time::Duration::from_millis(50);
        a.status_counts.insert(200, 5);

        let mut b = LoadStats::default();
        b.num_requests = 3;
        b.counted_responses = 2;
        b.min_request_time = std::time::Duration::from_millis(5);
        b.max_request_time = std::time::Duration::from_millis(80);
        b.status_counts.insert(200, 2);
        b.status_counts.insert(500, 1);

        total.merge(&a);
        total.merge(&b);

        assert_eq!(total.num_requests, 8);
        assert_eq!(total.min_request_time, std::time::Duration::from_millis(5));
        assert_eq!(total.max_request_time, std::time::Duration::from_millis(80));
        assert_eq!(total.status_counts[&200], 7);
        assert_eq!(total.status_counts[&500], 1);
    }

    #[test]
    fn runner_config_defaults_match_spec() {
        let cfg = RunnerConfig::default();
        assert_eq!(cfg.total_rounds, 1);
        assert_eq!(cfg.concurrency, 1);
        assert_eq!(cfg.metric_sample_size, 10_000);
        assert!(!cfg.no_warm);
    }
}
