//! How the engine reports changes, and a channel-backed observer for event
//! loops that want to pull updates on their own thread.

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::models::StudentId;
use crate::snapshot::ListSnapshot;

/// Receives engine updates. Callbacks run on engine threads with the engine's
/// state lock held: implementations must return quickly and must not call back
/// into the engine. Forward to your own event loop instead (see
/// [`ChannelObserver`]).
pub trait ListObserver: Send + Sync {
    fn on_snapshot_changed(&self, snapshot: &ListSnapshot);

    /// "N of M selected".
    fn on_selection_changed(&self, selected: usize, total: usize);

    fn on_selection_mode_ended(&self);

    /// A removal could not be persisted. For single removals the row is back
    /// in the list by the time this fires.
    fn on_removal_failed(&self, id: StudentId);
}

/// Token returned when registering an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub(crate) u64);

/// Observer callbacks as values.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    SnapshotChanged(ListSnapshot),
    SelectionChanged { selected: usize, total: usize },
    SelectionModeEnded,
    RemovalFailed(StudentId),
}

/// Observer that queues every callback on a channel.
pub struct ChannelObserver {
    events: Sender<EngineEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, Receiver<EngineEvent>) {
        let (events, receiver) = unbounded();
        (Self { events }, receiver)
    }

    fn forward(&self, event: EngineEvent) {
        // The receiving side going away just means nobody is listening.
        let _ = self.events.send(event);
    }
}

impl ListObserver for ChannelObserver {
    fn on_snapshot_changed(&self, snapshot: &ListSnapshot) {
        self.forward(EngineEvent::SnapshotChanged(snapshot.clone()));
    }

    fn on_selection_changed(&self, selected: usize, total: usize) {
        self.forward(EngineEvent::SelectionChanged { selected, total });
    }

    fn on_selection_mode_ended(&self) {
        self.forward(EngineEvent::SelectionModeEnded);
    }

    fn on_removal_failed(&self, id: StudentId) {
        self.forward(EngineEvent::RemovalFailed(id));
    }
}
