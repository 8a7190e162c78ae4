//! Flow table keyed by the forward-resolved flow identity.
//!
//! The table never evicts on its own; the only way out is [`FlowTable::sweep_idle`],
//! which the engine calls when an idle timeout is configured.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use super::flow::{FlowDirection, FlowKey, FlowRecord};

/// Table statistics
#[derive(Debug, Clone, Default)]
pub struct TableStats {
    pub lookups: u64,
    pub hits: u64,
    pub inserts: u64,
    pub expired: u64,
}

pub struct FlowTable {
    flows: HashMap<FlowKey, FlowRecord>,
    retain_samples: bool,
    pub stats: TableStats,
}

impl FlowTable {
    pub fn new(retain_samples: bool) -> Self {
        Self {
            flows: HashMap::new(),
            retain_samples,
            stats: TableStats::default(),
        }
    }

    /// Get or create the flow stored under `key`.
    /// Returns the flow and whether it was created by this call.
    pub fn get_or_create(&mut self, key: FlowKey, now: f64) -> (&mut FlowRecord, bool) {
        self.stats.lookups += 1;
        match self.flows.entry(key) {
            Entry::Occupied(e) => {
                self.stats.hits += 1;
                (e.into_mut(), false)
            }
            Entry::Vacant(e) => {
                self.stats.inserts += 1;
                (e.insert(FlowRecord::new(key, now, self.retain_samples)), true)
            }
        }
    }

    /// Appends one packet observation to the flow under `key`.
    /// Returns the updated flow, or `None` if no such flow exists.
    pub fn record(&mut self, key: &FlowKey, timestamp: f64, packet_len: u32, direction: FlowDirection) -> Option<&FlowRecord> {
        let flow = self.flows.get_mut(key)?;
        flow.record(timestamp, packet_len, direction);
        Some(flow)
    }

    pub fn contains(&self, key: &FlowKey) -> bool {
        self.flows.contains_key(key)
    }

    pub fn get(&self, key: &FlowKey) -> Option<&FlowRecord> {
        self.flows.get(key)
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FlowRecord> {
        self.flows.values()
    }

    /// Removes and returns every flow whose last packet is more than `idle` seconds before `now`.
    pub fn sweep_idle(&mut self, now: f64, idle: f64) -> Vec<FlowRecord> {
        let expired_keys: Vec<FlowKey> = self.flows
            .iter()
            .filter(|(_, flow)| now - flow.last_seen() > idle)
            .map(|(key, _)| *key)
            .collect();

        let mut expired = Vec::with_capacity(expired_keys.len());
        for key in expired_keys {
            if let Some(flow) = self.flows.remove(&key) {
                self.stats.expired += 1;
                expired.push(flow);
            }
        }
        expired
    }
}
