//! Variable Store: resolves a [`crate::domain::Variable`] definition to a
//! concrete string value on every call, dispatching on the closed
//! `VariableKind` enum rather than hiding behind a trait.
//!
//! Per-kind semantics are grounded on the original Go `domain.go`'s
//! `buildVariableValue`/`getVariable` switch statement.

use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicU64, Ordering};

use base64::Engine;
use chrono::Utc;
use rand::Rng;
use roaring::RoaringBitmap;

use crate::domain::{Variable, VariableKind};
use crate::errors::ConfigError;

/// Backing state for a single variable definition. Immutable fields (the
/// definition itself, any file-backed line list) are set up once at
/// construction; only counters mutate, via interior mutability, so the
/// store as a whole can be shared read-only (`Arc`) across workers.
struct VariableState {
    def: Variable,
    file_lines: Vec<String>,
    counter: AtomicU64,
}

/// Holds every variable definition for a run, resolved by name.
pub struct VariableStore {
    vars: HashMap<String, VariableState>,
}

impl VariableStore {
    pub fn new(defs: Vec<Variable>) -> Result<Self, ConfigError> {
        let mut vars = HashMap::with_capacity(defs.len());
        for def in defs {
            let file_lines = if def.kind == VariableKind::File {
                let path = def.path.clone().ok_or_else(|| {
                    ConfigError::InvalidField(format!(
                        "variable '{}': type 'file' requires 'path'",
                        def.name
                    ))
                })?;
                let contents = fs::read_to_string(&path).map_err(|e| {
                    ConfigError::InvalidField(format!(
                        "variable '{}': failed to read '{}': {}",
                        def.name, path, e
                    ))
                })?;
                contents
                    .lines()
                    .map(str::to_owned)
                    .filter(|l| !l.is_empty())
                    .collect()
            } else {
                Vec::new()
            };

            let start = def.start.unwrap_or(0);
            let counter = AtomicU64::new(start.max(0) as u64);
            let name = def.name.clone();
            vars.insert(
                name,
                VariableState {
                    def,
                    file_lines,
                    counter,
                },
            );
        }
        Ok(Self { vars })
    }

    /// Resolve `name` to its next value. Returns `None` if no variable with
    /// that name is defined (templates treat this as an unresolved
    /// placeholder, left verbatim, per spec.md §4.2).
    pub fn resolve(&self, name: &str) -> Option<String> {
        let state = self.vars.get(name)?;
        Some(self.build_value(state))
    }

    fn build_value(&self, state: &VariableState) -> String {
        let raw = self.build_raw_value(state);
        match &state.def.replace {
            Some(map) if !map.is_empty() => apply_replace(&raw, map),
            _ => raw,
        }
    }

    fn build_raw_value(&self, state: &VariableState) -> String {
        let def = &state.def;
        match def.kind {
            VariableKind::List => {
                if def.data.is_empty() {
                    return String::new();
                }
                let idx = rand::thread_rng().gen_range(0..def.data.len());
                value_to_string(&def.data[idx])
            }
            VariableKind::File => {
                if state.file_lines.is_empty() {
                    return String::new();
                }
                let idx = rand::thread_rng().gen_range(0..state.file_lines.len());
                state.file_lines[idx].clone()
            }
            VariableKind::Sequence32 => {
                let v = state.counter.fetch_add(1, Ordering::Relaxed) as u32;
                v.to_string()
            }
            VariableKind::Sequence64 => {
                let v = state.counter.fetch_add(1, Ordering::Relaxed);
                v.to_string()
            }
            VariableKind::Uuid => uuid::Uuid::new_v4().to_string(),
            VariableKind::NowLocal => chrono::Local::now().to_rfc3339(),
            VariableKind::NowUtc => Utc::now().to_rfc3339(),
            VariableKind::NowUtcLite => Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            VariableKind::NowWithFormat => {
                let fmt = def.format.as_deref().unwrap_or("%Y-%m-%d %H:%M:%S");
                Utc::now().format(fmt).to_string()
            }
            VariableKind::NowUnix => Utc::now().timestamp().to_string(),
            VariableKind::NowUnixMs => Utc::now().timestamp_millis().to_string(),
            VariableKind::NowUnixMicro => Utc::now().timestamp_micros().to_string(),
            VariableKind::NowUnixNano => Utc::now()
                .timestamp_nanos_opt()
                .unwrap_or_default()
                .to_string(),
            VariableKind::Range => {
                // A uniform draw in [from, to], not a cursor (spec.md §4.1
                // bullet 4, §8 invariant 3), matching `original_source/domain.go`'s
                // `rand.Intn(int(x.To-x.From+1)) + int(x.From)`.
                let from = def.start.unwrap_or(0);
                let to = def.end.unwrap_or(from).max(from);
                rand::thread_rng().gen_range(from..=to).to_string()
            }
            VariableKind::IntArrayBitmap => {
                let size = def.size.unwrap_or(0);
                let min = def.min.unwrap_or(0);
                let max = def.max.unwrap_or(min + size as i64);
                let mut bitmap = RoaringBitmap::new();
                let mut rng = rand::thread_rng();
                for _ in 0..size {
                    let v: i64 = rng.gen_range(min..=max.max(min));
                    bitmap.insert(v as u32);
                }
                let mut buf = Vec::new();
                bitmap
                    .serialize_into(&mut buf)
                    .expect("in-memory bitmap serialization cannot fail");
                base64::engine::general_purpose::STANDARD.encode(buf)
            }
            VariableKind::RandomArray => {
                let size = def.size.unwrap_or(0);
                let min = def.min.unwrap_or(0);
                let max = def.max.unwrap_or(min);
                let mut rng = rand::thread_rng();
                let items: Vec<String> = (0..size)
                    .map(|_| rng.gen_range(min..=max.max(min)).to_string())
                    .collect();
                let joined = items.join(",");
                if def.enclosure {
                    format!("[{}]", joined)
                } else {
                    joined
                }
            }
        }
    }
}

fn value_to_string(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Apply a `replace` map as a single simultaneous left-to-right pass over
/// `value`, so replacement output is never itself rescanned (mirrors Go's
/// `strings.NewReplacer`). Ties between overlapping patterns favor the
/// longest match.
fn apply_replace(value: &str, map: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut i = 0;
    while i < value.len() {
        let rest = &value[i..];
        let best = map
            .iter()
            .filter(|(from, _)| !from.is_empty() && rest.starts_with(from.as_str()))
            .max_by_key(|(from, _)| from.len());
        if let Some((from, to)) = best {
            out.push_str(to);
            i += from.len();
        } else {
            let ch = rest.chars().next().expect("i < value.len()");
            out.push(ch);
            i += ch.len_utf8();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Variable;

    fn var(name: &str, kind: VariableKind) -> Variable {
        Variable {
            kind,
            name: name.into(),
            data: Vec::new(),
            path: None,
            start: None,
            end: None,
            format: None,
            replace: None,
            size: None,
            min: None,
            max: None,
            enclosure: true,
        }
    }

    #[test]
    fn list_picks_from_data() {
        let mut v = var("color", VariableKind::List);
        v.data = vec!["red".into(), "blue".into()];
        let store = VariableStore::new(vec![v]).unwrap();
        let resolved = store.resolve("color").unwrap();
        assert!(resolved == "red" || resolved == "blue");
    }

    #[test]
    fn sequence32_increments_each_call() {
        let mut v = var("seq", VariableKind::Sequence32);
        v.start = Some(5);
        let store = VariableStore::new(vec![v]).unwrap();
        assert_eq!(store.resolve("seq").unwrap(), "5");
        assert_eq!(store.resolve("seq").unwrap(), "6");
        assert_eq!(store.resolve("seq").unwrap(), "7");
    }

    #[test]
    fn range_draws_are_bounded_and_vary() {
        let mut v = var("r", VariableKind::Range);
        v.start = Some(0);
        v.end = Some(2);
        let store = VariableStore::new(vec![v]).unwrap();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            let n: i64 = store.resolve("r").unwrap().parse().unwrap();
            assert!((0..=2).contains(&n));
            seen.insert(n);
        }
        // With 200 uniform draws over {0,1,2} every value should appear.
        assert_eq!(seen, [0, 1, 2].into_iter().collect());
    }

    #[test]
    fn replace_map_applies_simultaneous_rewrite() {
        let mut v = var("tagged", VariableKind::List);
        v.data = vec!["red".into()];
        v.replace = Some(
            [("r".to_string(), "R".to_string()), ("d".to_string(), "D".to_string())]
                .into_iter()
                .collect(),
        );
        let store = VariableStore::new(vec![v]).unwrap();
        assert_eq!(store.resolve("tagged").unwrap(), "ReD");
    }

    #[test]
    fn random_array_respects_enclosure_flag() {
        let mut v = var("arr", VariableKind::RandomArray);
        v.size = Some(3);
        v.min = Some(1);
        v.max = Some(1);
        v.enclosure = false;
        let store = VariableStore::new(vec![v]).unwrap();
        assert_eq!(store.resolve("arr").unwrap(), "1,1,1");
    }

    #[test]
    fn int_array_bitmap_is_valid_base64() {
        let mut v = var("bm", VariableKind::IntArrayBitmap);
        v.size = Some(10);
        v.min = Some(0);
        v.max = Some(1000);
        let store = VariableStore::new(vec![v]).unwrap();
        let encoded = store.resolve("bm").unwrap();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&encoded)
            .unwrap();
        assert!(RoaringBitmap::deserialize_from(&decoded[..]).is_ok());
    }

    #[test]
    fn unresolved_name_returns_none() {
        let store = VariableStore::new(vec![]).unwrap();
        assert!(store.resolve("nope").is_none());
    }

    #[test]
    fn file_backed_variable_requires_readable_path() {
        let mut v = var("f", VariableKind::File);
        v.path = Some("/nonexistent/definitely-not-here.txt".into());
        let err = VariableStore::new(vec![v]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField(_)));
    }
}
