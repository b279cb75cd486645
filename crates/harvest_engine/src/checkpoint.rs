//! RON checkpoints of per-host politeness and strategy state.
//!
//! In-process state is keyed on monotonic `Instant`s; on disk every
//! timestamp is wall-clock UTC so a checkpoint survives a restart.

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use engine_logging::engine_info;
use harvest_core::{instant_after, DirectiveSet, PathRule, StrategyCounters};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::gate::{clock, HostSnapshot, PolicyGate};
use crate::selector::{StrategySelector, StrategySnapshot};

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode checkpoint: {0}")]
    Encode(#[from] ron::Error),
    #[error("failed to decode checkpoint: {0}")]
    Decode(#[from] ron::error::SpannedError),
    #[error("failed to persist checkpoint: {0}")]
    Persist(#[from] tempfile::PersistError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleRecord {
    pub pattern: String,
    pub allow: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRecord {
    pub host: String,
    pub rules: Vec<RuleRecord>,
    pub crawl_delay_ms: Option<u64>,
    #[serde(default)]
    pub sitemaps: Vec<String>,
    pub directives_expire_at: DateTime<Utc>,
    pub last_fetch: Option<DateTime<Utc>>,
    pub tokens: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyRecord {
    pub host: String,
    pub light_successes: u64,
    pub light_failures: u64,
    pub rendered_successes: u64,
    pub rendered_failures: u64,
    pub escalated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub hosts: Vec<HostRecord>,
    #[serde(default)]
    pub strategies: Vec<StrategyRecord>,
}

impl Checkpoint {
    pub async fn capture(gate: &PolicyGate, selector: &StrategySelector) -> Self {
        let hosts = gate.snapshot().await;
        let now = clock();
        let wall_now = Utc::now();
        Self {
            saved_at: wall_now,
            hosts: hosts
                .into_iter()
                .map(|host| host_record(host, now, wall_now))
                .collect(),
            strategies: selector.snapshot().into_iter().map(strategy_record).collect(),
        }
    }

    /// Loads the recorded state into `gate` and `selector`, replacing any
    /// state they hold for the same hosts.
    pub fn apply(&self, gate: &PolicyGate, selector: &StrategySelector) {
        let now = clock();
        let wall_now = Utc::now();
        gate.restore(
            self.hosts
                .iter()
                .map(|record| host_snapshot(record, now, wall_now))
                .collect(),
        );
        selector.restore(
            self.strategies
                .iter()
                .map(|record| StrategySnapshot {
                    host: record.host.clone(),
                    light: StrategyCounters {
                        successes: record.light_successes,
                        failures: record.light_failures,
                    },
                    rendered: StrategyCounters {
                        successes: record.rendered_successes,
                        failures: record.rendered_failures,
                    },
                    escalated: record.escalated,
                })
                .collect(),
        );
    }
}

/// Writes `checkpoint` to `path` through a temp file in the same directory.
pub fn save_checkpoint(path: &Path, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let pretty = ron::ser::PrettyConfig::new();
    let content = ron::ser::to_string_pretty(checkpoint, pretty)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.flush()?;
    tmp.as_file_mut().sync_all()?;
    tmp.persist(path)?;
    engine_info!(
        "saved checkpoint with {} host(s) to {:?}",
        checkpoint.hosts.len(),
        path
    );
    Ok(())
}

/// `Ok(None)` when no checkpoint exists yet.
pub fn load_checkpoint(path: &Path) -> Result<Option<Checkpoint>, CheckpointError> {
    let content = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let checkpoint: Checkpoint = ron::from_str(&content)?;
    engine_info!(
        "loaded checkpoint from {:?} saved at {}",
        path,
        checkpoint.saved_at
    );
    Ok(Some(checkpoint))
}

fn host_record(snapshot: HostSnapshot, now: Instant, wall_now: DateTime<Utc>) -> HostRecord {
    HostRecord {
        host: snapshot.host,
        rules: snapshot
            .directives
            .rules
            .into_iter()
            .map(|rule| RuleRecord {
                pattern: rule.pattern,
                allow: rule.allow,
            })
            .collect(),
        crawl_delay_ms: snapshot
            .directives
            .crawl_delay
            .map(|delay| u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)),
        sitemaps: snapshot.directives.sitemaps,
        directives_expire_at: to_wall(snapshot.directives_expire_at, now, wall_now),
        last_fetch: snapshot.last_fetch.map(|at| to_wall(at, now, wall_now)),
        tokens: snapshot.tokens,
    }
}

fn host_snapshot(record: &HostRecord, now: Instant, wall_now: DateTime<Utc>) -> HostSnapshot {
    HostSnapshot {
        host: record.host.clone(),
        directives: DirectiveSet {
            rules: record
                .rules
                .iter()
                .map(|rule| PathRule {
                    pattern: rule.pattern.clone(),
                    allow: rule.allow,
                })
                .collect(),
            crawl_delay: record.crawl_delay_ms.map(Duration::from_millis),
            sitemaps: record.sitemaps.clone(),
        },
        directives_expire_at: to_instant(record.directives_expire_at, now, wall_now),
        last_fetch: record.last_fetch.map(|at| to_instant(at, now, wall_now)),
        tokens: record.tokens,
    }
}

fn strategy_record(snapshot: StrategySnapshot) -> StrategyRecord {
    StrategyRecord {
        host: snapshot.host,
        light_successes: snapshot.light.successes,
        light_failures: snapshot.light.failures,
        rendered_successes: snapshot.rendered.successes,
        rendered_failures: snapshot.rendered.failures,
        escalated: snapshot.escalated,
    }
}

fn to_wall(at: Instant, now: Instant, wall_now: DateTime<Utc>) -> DateTime<Utc> {
    let delta = |d: Duration| chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX);
    if at >= now {
        wall_now
            .checked_add_signed(delta(at - now))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    } else {
        wall_now
            .checked_sub_signed(delta(now - at))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

// Instants before process start cannot be represented; they clamp to `now`,
// which only makes the restored state more conservative.
fn to_instant(at: DateTime<Utc>, now: Instant, wall_now: DateTime<Utc>) -> Instant {
    match (at - wall_now).to_std() {
        Ok(ahead) => instant_after(now, ahead),
        Err(_) => {
            let behind = (wall_now - at).to_std().unwrap_or_default();
            now.checked_sub(behind).unwrap_or(now)
        }
    }
}
