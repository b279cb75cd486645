use std::collections::HashSet;

use dashmap::DashMap;
use engine_logging::engine_info;
use harvest_core::{AttemptOutcome, EscalationPolicy, Strategy, StrategyCounters, StrategyStats};

use crate::gate::clock;
use crate::HarvestSettings;

/// Checkpointable view of one host's strategy stats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategySnapshot {
    pub host: String,
    pub light: StrategyCounters,
    pub rendered: StrategyCounters,
    pub escalated: bool,
}

/// Picks the starting strategy per host from rolling outcome stats.
pub struct StrategySelector {
    hosts: DashMap<String, StrategyStats>,
    policy: EscalationPolicy,
    render_first: HashSet<String>,
}

impl StrategySelector {
    pub fn new(settings: &HarvestSettings) -> Self {
        Self {
            hosts: DashMap::new(),
            policy: settings.escalation_policy(),
            render_first: settings
                .render_first_hosts
                .iter()
                .map(|host| host.trim().to_ascii_lowercase())
                .filter(|host| !host.is_empty())
                .collect(),
        }
    }

    fn fresh_stats(&self, host: &str) -> StrategyStats {
        if self.render_first.contains(host) {
            StrategyStats::pre_escalated()
        } else {
            StrategyStats::new()
        }
    }

    pub fn choose_strategy(&self, host: &str) -> Strategy {
        match self.hosts.get(host) {
            Some(stats) => stats.preferred(),
            None => self.fresh_stats(host).preferred(),
        }
    }

    pub fn record_outcome(&self, host: &str, strategy: Strategy, outcome: &AttemptOutcome) {
        let fresh = self.fresh_stats(host);
        let mut stats = self.hosts.entry(host.to_string()).or_insert(fresh);
        if stats.record(strategy, outcome, &self.policy, clock()) {
            engine_info!("escalating {} to {} strategy", host, Strategy::Rendered);
        }
    }

    pub fn stats(&self, host: &str) -> Option<StrategyStats> {
        self.hosts.get(host).map(|stats| stats.value().clone())
    }

    pub fn reset(&self) {
        self.hosts.clear();
    }

    pub fn reset_host(&self, host: &str) {
        self.hosts.remove(host);
    }

    pub fn snapshot(&self) -> Vec<StrategySnapshot> {
        let mut hosts: Vec<StrategySnapshot> = self
            .hosts
            .iter()
            .map(|entry| StrategySnapshot {
                host: entry.key().clone(),
                light: entry.counters(Strategy::Light),
                rendered: entry.counters(Strategy::Rendered),
                escalated: entry.is_escalated(),
            })
            .collect();
        hosts.sort_by(|a, b| a.host.cmp(&b.host));
        hosts
    }

    pub fn restore(&self, hosts: Vec<StrategySnapshot>) {
        for snapshot in hosts {
            let stats = StrategyStats::from_parts(snapshot.light, snapshot.rendered, snapshot.escalated);
            self.hosts.insert(snapshot.host, stats);
        }
    }
}
