//! Engine-version validator (C4): the provider's recommender counts every
//! running instance regardless of engine lifecycle; this crate refuses to
//! commit to hardware running an engine version already in extended
//! support, since the user must upgrade before committing (PRD §4.3).
//!
//! A pure adjustment function (`adjust`) plus an I/O-gathering wrapper
//! (`gather_running_instances`), matching PRD §4.3's five-step algorithm.
//! Only services flagged [`cdp_model::Service::is_database_like`] go through
//! this step.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use cdp_model::Recommendation;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, Clone)]
pub enum LifecycleError {
    #[error("instance listing unavailable for region {region}: {reason}")]
    Unavailable { region: String, reason: String },
}

/// A running instance observed in one region (step 1, PRD §4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningInstance {
    pub region: String,
    pub resource_type: String,
    pub engine: String,
    pub engine_version: String,
}

/// Per-region instance enumeration, implemented against a provider's compute
/// API. Kept separate from `cdp-providers` so this crate stays independent
/// of any one provider SDK; `cdp-orchestrator` supplies the concrete
/// implementation backed by a `CloudProvider`.
#[async_trait]
pub trait RunningInstanceLister: Send + Sync {
    async fn list_running_instances(&self, region: &str) -> Result<Vec<RunningInstance>, LifecycleError>;
}

/// Fans out one task per region (step 1, PRD §4.3/§5), merging results
/// under a mutex. Per-region failures are logged and do not abort peers.
pub async fn gather_running_instances(lister: Arc<dyn RunningInstanceLister>, regions: &[String]) -> Vec<RunningInstance> {
    let merged = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::with_capacity(regions.len());

    for region in regions {
        let lister = Arc::clone(&lister);
        let merged = Arc::clone(&merged);
        let region = region.clone();
        handles.push(tokio::spawn(async move {
            match lister.list_running_instances(&region).await {
                Ok(instances) => merged.lock().extend(instances),
                Err(e) => warn!(region = %region, error = %e, "instance enumeration failed for region"),
            }
        }));
    }

    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "instance enumeration task panicked");
        }
    }

    Arc::try_unwrap(merged).map(Mutex::into_inner).unwrap_or_default()
}

// ─── Engine-lifecycle catalogue ────────────────────────────────────────────────

/// A managed-database engine's support window for one major version (step 2,
/// PRD §4.3). `extended_support_start` is the date the engine enters
/// extended/EOL support and this adjustment begins excluding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleWindow {
    pub standard_support_until: NaiveDate,
    pub extended_support_start: NaiveDate,
}

/// Keyed by `(normalized engine, major version)`, fetched once per run via
/// the provider's pricing/lifecycle endpoint, with [`static_catalogue`] used
/// as a fallback when that fetch fails (PRD §1's "static instance-type
/// lookup table" category of external collaborator).
#[derive(Debug, Clone, Default)]
pub struct EngineLifecycleCatalogue {
    entries: HashMap<(String, String), LifecycleWindow>,
}

impl EngineLifecycleCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, engine: &str, major_version: &str, window: LifecycleWindow) {
        self.entries.insert((normalize_engine(engine), major_version.to_string()), window);
    }

    pub fn get(&self, normalized_engine: &str, major_version: &str) -> Option<&LifecycleWindow> {
        self.entries.get(&(normalized_engine.to_string(), major_version.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Hand-maintained fallback lifecycle table, used when the provider's live
/// catalogue endpoint is unavailable (PRD §4.3 last paragraph).
pub fn static_catalogue() -> EngineLifecycleCatalogue {
    let mut cat = EngineLifecycleCatalogue::new();
    let window = |standard: (i32, u32, u32), extended: (i32, u32, u32)| LifecycleWindow {
        standard_support_until: NaiveDate::from_ymd_opt(standard.0, standard.1, standard.2).expect("valid date"),
        extended_support_start: NaiveDate::from_ymd_opt(extended.0, extended.1, extended.2).expect("valid date"),
    };

    cat.insert("mysql", "5.7", window((2023, 10, 31), (2023, 11, 1)));
    cat.insert("mysql", "8.0", window((2027, 4, 30), (2027, 5, 1)));
    cat.insert("postgres", "11", window((2023, 11, 9), (2023, 11, 10)));
    cat.insert("postgres", "13", window((2025, 11, 13), (2025, 11, 14)));
    cat.insert("postgres", "15", window((2027, 11, 11), (2027, 11, 12)));
    cat.insert("mariadb", "10.3", window((2023, 5, 25), (2023, 5, 26)));
    cat.insert("redis", "6.2", window((2024, 7, 1), (2024, 7, 2)));
    cat
}

/// Step 3 (PRD §4.3): lowercase, strip hyphens and spaces.
pub fn normalize_engine(name: &str) -> String {
    name.to_lowercase().chars().filter(|c| *c != '-' && *c != ' ').collect()
}

/// Step 3 (PRD §4.3): Aurora-MySQL-2.x maps to MySQL 5.7, Aurora-MySQL-3.x
/// to MySQL 8.0; Postgres versions its own major release as a single integer
/// (`13.7` is a patch of major version `13`, not "13.7"), so its lifecycle
/// bucket is `parts[0]` alone; otherwise `parts[0].parts[1]` with `parts[1]`
/// truncated at its first non-digit character (the MySQL/MariaDB `x.y.z` shape).
pub fn major_version(normalized_engine: &str, version: &str) -> Option<String> {
    if normalized_engine.contains("auroramysql") {
        return match version.chars().next() {
            Some('2') => Some("5.7".to_string()),
            Some('3') => Some("8.0".to_string()),
            _ => None,
        };
    }

    if normalized_engine.contains("postgres") {
        let major: String = version.chars().take_while(|c| c.is_ascii_digit()).collect();
        return if major.is_empty() { None } else { Some(major) };
    }

    let mut parts = version.split('.');
    let major = parts.next()?;
    let minor_raw = parts.next()?;
    let minor: String = minor_raw.chars().take_while(|c| c.is_ascii_digit()).collect();
    if minor.is_empty() {
        return None;
    }
    Some(format!("{major}.{minor}"))
}

/// Step 4 (PRD §4.3): the count of running instances, per `(region,
/// resourceType, normalizedEngine)`, whose major version is in extended
/// support as of `now`.
pub fn extended_support_counts(
    instances: &[RunningInstance],
    catalogue: &EngineLifecycleCatalogue,
    now: NaiveDate,
) -> HashMap<(String, String, String), u32> {
    let mut counts = HashMap::new();
    for instance in instances {
        let normalized = normalize_engine(&instance.engine);
        let Some(major) = major_version(&normalized, &instance.engine_version) else {
            continue;
        };
        let Some(window) = catalogue.get(&normalized, &major) else {
            continue;
        };
        if now >= window.extended_support_start {
            *counts
                .entry((instance.region.clone(), instance.resource_type.clone(), normalized))
                .or_insert(0) += 1;
        }
    }
    counts
}

/// Step 5 (PRD §4.3): subtract the extended-support running count from
/// `recommendation.count`; drop (return `None`) if the result is `<= 0`.
/// Non-database-like services and recommendations with no resolvable engine
/// pass through unchanged.
pub fn adjust(rec: &Recommendation, extended_counts: &HashMap<(String, String, String), u32>) -> Option<Recommendation> {
    if !rec.service.is_database_like() {
        return Some(rec.clone());
    }
    let Some(engine) = rec.engine() else {
        return Some(rec.clone());
    };
    let key = (rec.region.clone(), rec.resource_type.clone(), normalize_engine(&engine));
    let running = extended_counts.get(&key).copied().unwrap_or(0);
    let new_count = rec.count.saturating_sub(running);
    if new_count == 0 {
        None
    } else {
        Some(rec.with_count(new_count))
    }
}

/// Applies [`adjust`] across a batch. If `extended_counts` is empty because
/// the catalogue or instance listing was entirely unavailable, the caller
/// should skip calling this at all and pass the batch through unchanged,
/// logging a single warning (PRD §4.3 last paragraph) — that decision lives
/// with the orchestrator, which knows whether the gather step failed
/// outright versus legitimately found no running instances.
pub fn adjust_batch(recs: Vec<Recommendation>, extended_counts: &HashMap<(String, String, String), u32>) -> Vec<Recommendation> {
    recs.into_iter().filter_map(|r| adjust(&r, extended_counts)).collect()
}

pub fn utc_to_naive(now: DateTime<Utc>) -> NaiveDate {
    now.date_naive()
}
