//! Non-blocking supervision of long-running engine operations.
//!
//! Training, loading, and saving may run on an engine-owned background
//! thread that reports progress and completion via callbacks invoked on
//! that thread.  The supervisor turns those callbacks into plain values on a
//! queue: the callback does nothing but enqueue, and the caller drains
//! the queue once per frame on its own thread.  Values arrive strictly
//! in the order reported, none lost, none delivered twice.
//!
//! Operations are single-flight per kind: starting one that is already
//! running is an error, not a queued request.

use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};

use tracing::{debug, warn};

use crate::status::{Result, Status};

/// The three supervised operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Train,
    Load,
    Save,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Load => "load",
            Self::Save => "save",
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Train => 0,
            Self::Load => 1,
            Self::Save => 2,
        }
    }
}

/// Lifecycle of one operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperationStatus {
    #[default]
    NotStarted,
    Running,
    /// Finished and consumed by a drain; resets to `NotStarted` on the
    /// next start.
    Finished,
}

/// A value reported by the engine for a supervised operation.
///
/// `Train` reports zero or more progress values followed by exactly one
/// finish; `Load`/`Save` report exactly one finish carrying a result
/// code.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperationEvent {
    /// Recognition performance so far (0.0–1.0).
    TrainingProgress(f64),
    /// Training completed with the best performance achieved.
    TrainingFinished(f64),
    /// Load completed with the given result code (0 = success).
    LoadFinished(i32),
    /// Save completed with the given result code (0 = success).
    SaveFinished(i32),
}

impl OperationEvent {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::TrainingProgress(_) | Self::TrainingFinished(_) => OperationKind::Train,
            Self::LoadFinished(_) => OperationKind::Load,
            Self::SaveFinished(_) => OperationKind::Save,
        }
    }

    pub fn is_finish(&self) -> bool {
        !matches!(self, Self::TrainingProgress(_))
    }
}

/// Last value reported for an operation kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReportedValue {
    /// Training performance (0.0–1.0).
    Performance(f64),
    /// Load/save result code.
    Code(i32),
}

#[derive(Debug, Default)]
struct Slot {
    status: OperationStatus,
    last_value: Option<ReportedValue>,
}

/// Buffers engine notifications and replays them on the caller's
/// thread, once per explicit drain.
pub struct AsyncOperationSupervisor {
    tx: Sender<OperationEvent>,
    rx: Receiver<OperationEvent>,
    slots: [Slot; 3],
}

impl Default for AsyncOperationSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncOperationSupervisor {
    pub fn new() -> Self {
        let (tx, rx) = channel();
        Self {
            tx,
            rx,
            slots: Default::default(),
        }
    }

    /// Sender for the engine-side callbacks.  The callback must do
    /// nothing but `send` the value; no caller-visible logic runs on
    /// the notification thread.
    pub fn sender(&self) -> Sender<OperationEvent> {
        self.tx.clone()
    }

    /// Mark an operation kind as started.  Fails with `BusyTraining`
    /// while an operation of the same kind is still running; the last
    /// reported value is left untouched in that case.
    pub fn begin(&mut self, kind: OperationKind) -> Result<()> {
        let slot = &mut self.slots[kind.index()];
        if slot.status == OperationStatus::Running {
            return Err(Status::BusyTraining);
        }
        slot.status = OperationStatus::Running;
        debug!(kind = kind.as_str(), "operation started");
        Ok(())
    }

    /// Roll back a `begin` whose engine-side start failed.
    pub fn abort(&mut self, kind: OperationKind) {
        let slot = &mut self.slots[kind.index()];
        if slot.status == OperationStatus::Running {
            slot.status = OperationStatus::NotStarted;
        }
    }

    pub fn status(&self, kind: OperationKind) -> OperationStatus {
        self.slots[kind.index()].status
    }

    /// Last value reported for `kind`, surviving across batches until
    /// overwritten by a newer report.
    pub fn last_value(&self, kind: OperationKind) -> Option<ReportedValue> {
        self.slots[kind.index()].last_value
    }

    /// Drain all buffered notifications, in the order reported.
    ///
    /// Call once per caller-visible step (e.g. per frame).  This is the
    /// only place values are delivered; each value is delivered exactly
    /// once.
    pub fn drain(&mut self) -> Vec<OperationEvent> {
        let mut events = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    self.record(&event);
                    events.push(event);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    // Own sender is kept alive in self.tx; unreachable
                    warn!("notification queue disconnected");
                    break;
                }
            }
        }
        events
    }

    fn record(&mut self, event: &OperationEvent) {
        let slot = &mut self.slots[event.kind().index()];
        slot.last_value = Some(match event {
            OperationEvent::TrainingProgress(p) | OperationEvent::TrainingFinished(p) => {
                ReportedValue::Performance(*p)
            }
            OperationEvent::LoadFinished(c) | OperationEvent::SaveFinished(c) => {
                ReportedValue::Code(*c)
            }
        });
        if event.is_finish() {
            slot.status = OperationStatus::Finished;
            debug!(kind = event.kind().as_str(), "operation finished");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fifo_order_with_irregular_drains() {
        let mut supervisor = AsyncOperationSupervisor::new();
        supervisor.begin(OperationKind::Train).unwrap();
        let tx = supervisor.sender();

        let expected: Vec<OperationEvent> = (0..7)
            .map(|i| OperationEvent::TrainingProgress(i as f64 / 10.0))
            .chain([OperationEvent::TrainingFinished(0.7)])
            .collect();

        // Push the first three, drain, push the rest, drain twice
        for event in &expected[..3] {
            tx.send(*event).unwrap();
        }
        let mut received = supervisor.drain();
        for event in &expected[3..] {
            tx.send(*event).unwrap();
        }
        received.extend(supervisor.drain());
        received.extend(supervisor.drain()); // empty: nothing twice

        assert_eq!(received, expected);
        assert_eq!(
            supervisor.status(OperationKind::Train),
            OperationStatus::Finished
        );
    }

    #[test]
    fn test_nothing_delivered_without_drain() {
        let supervisor = AsyncOperationSupervisor::new();
        let tx = supervisor.sender();
        tx.send(OperationEvent::TrainingProgress(0.5)).unwrap();
        // The value is buffered, not lost; status is untouched until a
        // drain observes it
        assert_eq!(supervisor.last_value(OperationKind::Train), None);
    }

    #[test]
    fn test_busy_preserves_last_value() {
        let mut supervisor = AsyncOperationSupervisor::new();
        supervisor.begin(OperationKind::Train).unwrap();
        supervisor
            .sender()
            .send(OperationEvent::TrainingProgress(0.4))
            .unwrap();
        supervisor.drain();
        assert_eq!(
            supervisor.last_value(OperationKind::Train),
            Some(ReportedValue::Performance(0.4))
        );

        assert_eq!(
            supervisor.begin(OperationKind::Train),
            Err(Status::BusyTraining)
        );
        assert_eq!(
            supervisor.last_value(OperationKind::Train),
            Some(ReportedValue::Performance(0.4))
        );
    }

    #[test]
    fn test_finish_allows_restart() {
        let mut supervisor = AsyncOperationSupervisor::new();
        supervisor.begin(OperationKind::Load).unwrap();
        supervisor
            .sender()
            .send(OperationEvent::LoadFinished(0))
            .unwrap();
        supervisor.drain();
        assert_eq!(
            supervisor.status(OperationKind::Load),
            OperationStatus::Finished
        );
        // Finished resets to Running on the next start
        supervisor.begin(OperationKind::Load).unwrap();
        assert_eq!(
            supervisor.status(OperationKind::Load),
            OperationStatus::Running
        );
    }

    #[test]
    fn test_kinds_are_independent() {
        let mut supervisor = AsyncOperationSupervisor::new();
        supervisor.begin(OperationKind::Train).unwrap();
        supervisor.begin(OperationKind::Save).unwrap();
        assert_eq!(
            supervisor.begin(OperationKind::Save),
            Err(Status::BusyTraining)
        );
        supervisor
            .sender()
            .send(OperationEvent::SaveFinished(0))
            .unwrap();
        supervisor.drain();
        assert_eq!(
            supervisor.status(OperationKind::Train),
            OperationStatus::Running
        );
        assert_eq!(
            supervisor.status(OperationKind::Save),
            OperationStatus::Finished
        );
    }

    #[test]
    fn test_abort_rolls_back() {
        let mut supervisor = AsyncOperationSupervisor::new();
        supervisor.begin(OperationKind::Save).unwrap();
        supervisor.abort(OperationKind::Save);
        assert_eq!(
            supervisor.status(OperationKind::Save),
            OperationStatus::NotStarted
        );
        supervisor.begin(OperationKind::Save).unwrap();
    }

    #[test]
    fn test_cross_thread_enqueue() {
        let mut supervisor = AsyncOperationSupervisor::new();
        supervisor.begin(OperationKind::Train).unwrap();
        let tx = supervisor.sender();

        let producer = thread::spawn(move || {
            for i in 0..5 {
                tx.send(OperationEvent::TrainingProgress(i as f64)).unwrap();
                thread::sleep(Duration::from_millis(1));
            }
            tx.send(OperationEvent::TrainingFinished(4.0)).unwrap();
        });
        producer.join().unwrap();

        let events = supervisor.drain();
        assert_eq!(events.len(), 6);
        assert_eq!(events.last(), Some(&OperationEvent::TrainingFinished(4.0)));
        for (i, event) in events[..5].iter().enumerate() {
            assert_eq!(*event, OperationEvent::TrainingProgress(i as f64));
        }
    }
}
