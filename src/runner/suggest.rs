//! "Did you mean" suggestions for unknown task names

use crate::registry::{qualify, Registry, DEFAULT_NAMESPACE, NS_SEP};
use std::cmp::Ordering;

const SIMILARITY_THRESHOLD: f64 = 0.5;
const MAX_SUGGESTIONS: usize = 5;

/// Registered task names similar to `name`, best match first.
///
/// Names starting with `.` are private and never suggested. Tasks
/// outside the default namespace are shown qualified.
pub fn similar_names(name: &str, registry: &Registry) -> Vec<String> {
    let wanted = name.trim_start_matches('?');
    let wanted = wanted.rsplit(NS_SEP).next().unwrap_or(wanted);

    let mut scored: Vec<(String, f64)> = registry
        .namespaces()
        .iter()
        .flat_map(|ns| {
            registry
                .entries(ns)
                .into_iter()
                .filter(|(task, _)| !task.starts_with('.'))
                .map(move |(task, _)| {
                    let shown = if ns == DEFAULT_NAMESPACE {
                        task.to_string()
                    } else {
                        qualify(ns, task)
                    };
                    (shown, similarity(wanted, task))
                })
        })
        .filter(|(_, score)| *score >= SIMILARITY_THRESHOLD)
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    scored.dedup_by(|a, b| a.0 == b.0);
    scored.truncate(MAX_SUGGESTIONS);
    scored.into_iter().map(|(shown, _)| shown).collect()
}

fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    let base = 1.0 - levenshtein(a, b) as f64 / max_len as f64;
    let same_start = matches!((a.chars().next(), b.chars().next()), (Some(x), Some(y)) if x == y);
    let bonus = if same_start { 0.1 } else { 0.0 };
    (base + bonus).min(1.0)
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}
