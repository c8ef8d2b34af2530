/// Per-device liveness tracking.
///
/// Every fix or heartbeat marks its device online and re-arms two independent timers measured
/// from that event: an offline timer (`offline_after`) that flips the device to offline, and an
/// eviction timer (`evict_after`) that forgets it. A device that comes back before eviction keeps
/// its record, so it resumes in the same place in the ordered view.
///
/// Time only moves when the caller says so: events are stamped with the `now` passed to
/// [`PresenceTracker::observe`], and timers fire from [`PresenceTracker::advance`]. Processing
/// order is trusted over any timestamp embedded in a payload.
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, trace};

use crate::{
    config::{deadline, PresenceConfig},
    coord::GeoPoint,
    order,
    parser::Fix,
    timer::{TimerId, TimerQueue},
};

//  _____
// |_   _|   _ _ __   ___  ___
//   | || | | | '_ \ / _ \/ __|
//   | || |_| | |_) |  __/\__ \
//   |_| \__, | .__/ \___||___/
//       |___/|_|

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceRecord {
    pub id: String,
    pub online: bool,
    /// Topic of the message that last touched this record.
    pub last_topic: String,
    pub last_seen_at: DateTime<Utc>,
    /// Last map-frame position. Kept across heartbeats.
    pub position: Option<GeoPoint>,
    /// Last UWB `(x, y)` in centimeters. Kept across heartbeats.
    pub local: Option<(f64, f64)>,
    pub indoor: Option<bool>,
}

impl DeviceRecord {
    pub fn new(id: &str, topic: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            online: true,
            last_topic: topic.to_string(),
            last_seen_at: now,
            position: None,
            local: None,
            indoor: None,
        }
    }

    fn apply(&mut self, fix: &Fix, topic: &str, now: DateTime<Utc>) {
        self.online = true;
        self.last_topic = topic.to_string();
        self.last_seen_at = now;
        match fix {
            Fix::Position(p) => {
                self.position = Some(p.point);
                self.indoor = Some(p.indoor);
            }
            Fix::Local(l) => {
                self.local = Some((l.x_cm, l.y_cm));
                self.indoor = Some(l.indoor);
            }
            Fix::Presence(_) => {}
        }
    }
}

/// Passive state change produced by a timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    WentOffline(String),
    Evicted(String),
}

#[derive(Debug)]
enum Expiry {
    Offline(String),
    Evict(String),
    Resort,
}

#[derive(Debug, Default)]
struct DeviceTimers {
    offline: Option<TimerId>,
    evict: Option<TimerId>,
}

//  _____               _
// |_   _| __ __ _  ___| | _____ _ __
//   | || '__/ _` |/ __| |/ / _ \ '__|
//   | || | | (_| | (__|   <  __/ |
//   |_||_|  \__,_|\___|_|\_\___|_|

/// Owner of the device table and of every timer that mutates it.
#[derive(Debug)]
pub struct PresenceTracker {
    config: PresenceConfig,
    records: HashMap<String, DeviceRecord>,
    // Presentation order. Re-sorted on every observed event and on the periodic tick only, so
    // a device that just went offline keeps its slot until the next tick.
    view: Vec<String>,
    timers: TimerQueue<Expiry>,
    handles: HashMap<String, DeviceTimers>,
    resort: Option<TimerId>,
}

impl PresenceTracker {
    pub fn new(config: PresenceConfig) -> Self {
        Self {
            config,
            records: HashMap::new(),
            view: Vec::new(),
            timers: TimerQueue::new(),
            handles: HashMap::new(),
            resort: None,
        }
    }

    pub fn config(&self) -> &PresenceConfig {
        &self.config
    }

    /// Fold one fix into the table.
    pub fn observe(&mut self, fix: &Fix, topic: &str, now: DateTime<Utc>) {
        let id = fix.device_id();
        let handles = self.handles.entry(id.to_string()).or_default();
        for timer in [handles.offline.take(), handles.evict.take()].into_iter().flatten() {
            self.timers.cancel(timer);
        }

        match self.records.get_mut(id) {
            Some(record) => {
                if !record.online {
                    info!("device {id} back online");
                }
                record.apply(fix, topic, now);
            }
            None => {
                info!("new device {id} on {topic}");
                let mut record = DeviceRecord::new(id, topic, now);
                record.apply(fix, topic, now);
                self.records.insert(id.to_string(), record);
                self.view.push(id.to_string());
            }
        }

        handles.offline = Some(self.timers.schedule(
            deadline(now, self.config.offline_after),
            Expiry::Offline(id.to_string()),
        ));
        handles.evict = Some(self.timers.schedule(
            deadline(now, self.config.evict_after),
            Expiry::Evict(id.to_string()),
        ));

        self.sort_view();
    }

    /// Arm the periodic re-sort tick, first firing one period after `now`. Re-arming replaces
    /// the previous tick.
    pub fn start_resort(&mut self, now: DateTime<Utc>) {
        if let Some(timer) = self.resort.take() {
            self.timers.cancel(timer);
        }
        if self.config.resort_every.is_zero() {
            return;
        }
        self.resort = Some(
            self.timers
                .schedule(deadline(now, self.config.resort_every), Expiry::Resort),
        );
    }

    /// Fire every timer due at or before `now`, in deadline order.
    pub fn advance(&mut self, now: DateTime<Utc>) -> Vec<Transition> {
        let mut transitions = Vec::new();
        while let Some((at, timer, expiry)) = self.timers.pop_due(now) {
            match expiry {
                Expiry::Offline(id) => {
                    if let Some(handles) = self.handles.get_mut(&id) {
                        handles.offline = None;
                    }
                    if let Some(record) = self.records.get_mut(&id) {
                        record.online = false;
                        info!("device {id} offline, silent since {}", record.last_seen_at);
                        transitions.push(Transition::WentOffline(id));
                    }
                }
                Expiry::Evict(id) => {
                    self.handles.remove(&id);
                    if self.records.remove(&id).is_some() {
                        self.view.retain(|v| *v != id);
                        info!("device {id} evicted");
                        transitions.push(Transition::Evicted(id));
                    }
                }
                Expiry::Resort => {
                    if self.resort == Some(timer) {
                        self.sort_view();
                        // deadline() saturates at the end of representable time
                        let next = deadline(at, self.config.resort_every);
                        self.resort = (next > at)
                            .then(|| self.timers.schedule(next, Expiry::Resort));
                        if self.resort.is_none() {
                            debug!("re-sort tick cannot advance past {at}, disarmed");
                        }
                    }
                }
            }
        }
        transitions
    }

    /// Cancel every pending timer, including the re-sort tick. The table itself is kept.
    pub fn shutdown(&mut self) {
        debug!("cancelling {} pending timers", self.timers.len());
        self.timers.clear();
        self.handles.clear();
        self.resort = None;
    }

    pub fn get(&self, id: &str) -> Option<&DeviceRecord> {
        self.records.get(id)
    }

    /// Records in presentation order.
    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        self.view
            .iter()
            .filter_map(|id| self.records.get(id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.timers.next_deadline()
    }

    fn sort_view(&mut self) {
        let records = &self.records;
        self.view.sort_by(|a, b| match (records.get(a), records.get(b)) {
            (Some(a), Some(b)) => order::compare(a, b),
            _ => a.cmp(b),
        });
        trace!("view re-sorted: {} devices", self.view.len());
    }
}
