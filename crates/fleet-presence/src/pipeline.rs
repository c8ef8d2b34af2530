/// Owned ingestion context: parser, device table and timers behind one handle.
///
/// The transport collaborator feeds `(topic, payload)` pairs in arrival order through
/// [`Pipeline::on_message`] and calls [`Pipeline::advance`] whenever its event loop wakes up
/// (at the latest by [`Pipeline::next_deadline`]). Both take the current time explicitly.
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::{
    config::PipelineConfig,
    parser::{Fix, Parser},
    presence::{DeviceRecord, PresenceTracker, Transition},
    Error, FPResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Accepting messages; the periodic re-sort is not armed yet.
    Idle,
    Running,
    /// Terminal. Every timer has been cancelled.
    Stopped,
}

/// Message counters, for the caller to export or log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub messages: u64,
    pub fixes: u64,
    pub rejected: u64,
}

#[derive(Debug)]
pub struct Pipeline {
    parser: Parser,
    tracker: PresenceTracker,
    state: PipelineState,
    stats: IngestStats,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            parser: Parser::new(config.topics),
            tracker: PresenceTracker::new(config.presence),
            state: PipelineState::Idle,
            stats: IngestStats::default(),
        }
    }

    /// Arm the periodic re-sort tick.
    pub fn start(&mut self, now: DateTime<Utc>) -> FPResult<()> {
        match self.state {
            PipelineState::Stopped => Err(Error::Stopped),
            PipelineState::Running => Ok(()),
            PipelineState::Idle => {
                info!(
                    "presence pipeline started, presence prefix {:?}",
                    self.parser.topics().presence_prefix
                );
                self.tracker.start_resort(now);
                self.state = PipelineState::Running;
                Ok(())
            }
        }
    }

    /// Cancel every outstanding timer. Nothing fires after this returns and further messages are
    /// refused. The last table contents stay readable.
    pub fn stop(&mut self) {
        if self.state == PipelineState::Stopped {
            return;
        }
        self.tracker.shutdown();
        self.state = PipelineState::Stopped;
        info!(
            "presence pipeline stopped: {} messages, {} fixes, {} rejected",
            self.stats.messages, self.stats.fixes, self.stats.rejected
        );
    }

    /// Decode one transport message and fold its fixes into the table. A payload that fails to
    /// decode is counted and returned as an error; the table is left untouched.
    pub fn on_message(
        &mut self,
        topic: &str,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> FPResult<Vec<Fix>> {
        if self.state == PipelineState::Stopped {
            return Err(Error::Stopped);
        }
        self.stats.messages += 1;

        let fixes = match self.parser.parse(topic, payload, now) {
            Ok(fixes) => fixes,
            Err(e) => {
                self.stats.rejected += 1;
                warn!("ignoring message on {topic}: {e}");
                return Err(e);
            }
        };

        for fix in &fixes {
            debug!("{topic}: {:?}", fix);
            self.tracker.observe(fix, topic, now);
        }
        self.stats.fixes += fixes.len() as u64;
        Ok(fixes)
    }

    /// Fire due timers.
    pub fn advance(&mut self, now: DateTime<Utc>) -> Vec<Transition> {
        if self.state == PipelineState::Stopped {
            return Vec::new();
        }
        self.tracker.advance(now)
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.tracker.next_deadline()
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    /// Device records in presentation order.
    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        self.tracker.snapshot()
    }

    pub fn get(&self, id: &str) -> Option<&DeviceRecord> {
        self.tracker.get(id)
    }

    pub fn tracker(&self) -> &PresenceTracker {
        &self.tracker
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

#[cfg(test)]
mod test {
    use chrono::TimeDelta;

    use super::*;
    use crate::{coord::to_frame_b, lazy_init_tracing};

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap() + TimeDelta::seconds(secs)
    }

    #[test]
    fn test_end_to_end() {
        lazy_init_tracing();
        let mut pipeline = Pipeline::default();
        pipeline.start(t(0)).unwrap();
        assert_eq!(pipeline.state(), PipelineState::Running);

        let payload = br#"{"id":"d1","sens":[{"n":"RTK","u":"deg","v":[121.5,31.0]}]}"#;
        pipeline
            .on_message("location/sensors/d1", payload, t(0))
            .unwrap();
        pipeline.on_message("online/d2", b"", t(1)).unwrap();
        assert!(pipeline.on_message("location/sensors/d3", b"{", t(1)).is_err());

        let snapshot = pipeline.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, "d1");
        assert_eq!(snapshot[0].position, Some(to_frame_b(31.0, 121.5)));
        assert_eq!(snapshot[0].last_topic, "location/sensors/d1");
        assert_eq!(snapshot[1].id, "d2");
        assert!(pipeline.get("d3").is_none());
        assert_eq!(
            pipeline.stats(),
            IngestStats {
                messages: 3,
                fixes: 2,
                rejected: 1
            }
        );

        assert_eq!(
            pipeline.advance(t(5)),
            vec![Transition::WentOffline("d1".into())]
        );
        assert_eq!(
            pipeline.advance(t(6)),
            vec![Transition::WentOffline("d2".into())]
        );
        // Presence keeps d2 alive; it moves ahead of d1 at once.
        pipeline.on_message("online", br#"{"id":"d2"}"#, t(7)).unwrap();
        let order: Vec<_> = pipeline.snapshot().into_iter().map(|r| r.id).collect();
        assert_eq!(order, vec!["d2", "d1"]);

        assert_eq!(
            pipeline.advance(t(60)),
            vec![
                Transition::WentOffline("d2".into()),
                Transition::Evicted("d1".into())
            ]
        );
        assert_eq!(pipeline.snapshot().len(), 1);
    }

    #[test]
    fn test_sentinel_message_still_counts_as_activity() {
        let mut pipeline = Pipeline::default();
        let payload = br#"{"id":"d1","sens":[{"n":"RTK","v":[0,0]}]}"#;
        let fixes = pipeline
            .on_message("location/sensors/d1", payload, t(0))
            .unwrap();
        assert!(matches!(fixes.as_slice(), [Fix::Presence(_)]));
        let record = pipeline.get("d1").unwrap();
        assert!(record.online);
        assert_eq!(record.position, None);
    }

    #[test]
    fn test_stop_cancels_and_refuses() {
        let mut pipeline = Pipeline::default();
        pipeline.start(t(0)).unwrap();
        pipeline.on_message("online/x", b"", t(0)).unwrap();
        assert!(pipeline.next_deadline().is_some());

        pipeline.stop();
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert_eq!(pipeline.next_deadline(), None);
        assert!(pipeline.advance(t(120)).is_empty());
        assert!(pipeline.get("x").unwrap().online);
        assert!(matches!(
            pipeline.on_message("online/x", b"", t(121)),
            Err(Error::Stopped)
        ));
        assert!(matches!(pipeline.start(t(122)), Err(Error::Stopped)));
    }

    #[test]
    fn test_idle_pipeline_tracks_without_tick() {
        let mut pipeline = Pipeline::default();
        pipeline.on_message("online/a", b"", t(0)).unwrap();
        assert_eq!(pipeline.state(), PipelineState::Idle);
        assert_eq!(pipeline.tracker().pending_timers(), 2);
        assert_eq!(
            pipeline.advance(t(5)),
            vec![Transition::WentOffline("a".into())]
        );
    }
}
