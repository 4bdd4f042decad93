// Request queue and send ordering
//
// Every `send_event` call takes a ticket when it is issued. A ticket passes
// through two stages, each served strictly in issue order:
// - Build: hooks and payload shaping, so shared state such as the page-view
//   identity is mutated in call order
// - Send: delivery, so requests reach the transport in call order
// A ticket leaves a stage when it finishes it or is dropped (error or
// cancelled future), so abandoned calls never block later ones. A call may
// build while earlier calls are still sending.
//
// The buffer holds built requests waiting for their send turn, keyed by
// ticket sequence. The terminate flush marks them handled; a handled request
// is skipped when its turn comes. A call abandoned after buffering removes its
// own request, so it is never sent on another call's turn.

use parking_lot::Mutex;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

use crate::payload::Payload;

// ============================================================================
// Sequencer
// ============================================================================

/// Ordered stage of an event's life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Build,
    Send,
}

#[derive(Debug, Default)]
struct StageState {
    serving: u64,
    /// Finished tickets not yet reached by `serving`
    finished: BTreeSet<u64>,
}

impl StageState {
    fn finish(&mut self, sequence: u64) {
        self.finished.insert(sequence);
        while self.finished.remove(&self.serving) {
            self.serving += 1;
        }
    }
}

#[derive(Debug, Default)]
struct SequencerState {
    next_ticket: u64,
    build: StageState,
    send: StageState,
}

impl SequencerState {
    fn stage(&mut self, stage: Stage) -> &mut StageState {
        match stage {
            Stage::Build => &mut self.build,
            Stage::Send => &mut self.send,
        }
    }
}

/// Hands out tickets and wakes the holders whose turn it is
#[derive(Debug, Default)]
pub struct Sequencer {
    state: Mutex<SequencerState>,
    turn_changed: Notify,
}

impl Sequencer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Take the next ticket in issue order
    pub fn ticket(self: &Arc<Self>) -> Ticket {
        let mut state = self.state.lock();
        let sequence = state.next_ticket;
        state.next_ticket += 1;
        Ticket {
            sequence,
            sequencer: Arc::clone(self),
            built: false,
            sent: false,
        }
    }

    /// Ticket currently allowed through `stage`
    pub fn serving(&self, stage: Stage) -> u64 {
        self.state.lock().stage(stage).serving
    }

    fn finish(&self, stage: Stage, sequence: u64) {
        self.state.lock().stage(stage).finish(sequence);
        self.turn_changed.notify_waiters();
    }
}

/// A place in the event order
#[derive(Debug)]
pub struct Ticket {
    sequence: u64,
    sequencer: Arc<Sequencer>,
    built: bool,
    sent: bool,
}

impl Ticket {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Wait until every earlier ticket has left `stage`
    pub async fn wait_turn(&self, stage: Stage) {
        loop {
            let notified = self.sequencer.turn_changed.notified();
            tokio::pin!(notified);
            // Register before checking so a finish in between is not missed
            notified.as_mut().enable();
            if self.sequencer.serving(stage) == self.sequence {
                return;
            }
            notified.await;
        }
    }

    /// Leave `stage`, letting the next ticket through
    pub fn finish(&mut self, stage: Stage) {
        let done = match stage {
            Stage::Build => &mut self.built,
            Stage::Send => &mut self.sent,
        };
        if !*done {
            *done = true;
            self.sequencer.finish(stage, self.sequence);
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.finish(Stage::Build);
        self.finish(Stage::Send);
    }
}

// ============================================================================
// RequestBuffer
// ============================================================================

/// A fully processed request waiting to be sent
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedRequest {
    pub sequence: u64,
    pub wire_type: String,
    pub payload: Payload,
    /// Already delivered by the terminate flush
    pub handled: bool,
}

impl BufferedRequest {
    pub fn new(sequence: u64, wire_type: impl Into<String>, payload: Payload) -> Self {
        Self {
            sequence,
            wire_type: wire_type.into(),
            payload,
            handled: false,
        }
    }
}

/// Pending requests ordered by sequence
#[derive(Debug, Default)]
pub struct RequestBuffer {
    requests: Mutex<VecDeque<BufferedRequest>>,
}

impl RequestBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert keeping sequence order
    pub fn push(&self, request: BufferedRequest) {
        let mut requests = self.requests.lock();
        let index = requests.partition_point(|r| r.sequence < request.sequence);
        requests.insert(index, request);
    }

    /// Insert and return a slot that removes the request if it is never claimed
    pub fn enqueue(&self, request: BufferedRequest) -> PendingRequest<'_> {
        let sequence = request.sequence;
        self.push(request);
        PendingRequest {
            buffer: self,
            sequence,
            claimed: false,
        }
    }

    /// Remove and return the request queued under `sequence`
    pub fn take(&self, sequence: u64) -> Option<BufferedRequest> {
        let mut requests = self.requests.lock();
        let index = requests.iter().position(|r| r.sequence == sequence)?;
        requests.remove(index)
    }

    /// Mark every unhandled request handled and return copies, newest first
    pub fn take_unhandled_newest_first(&self) -> Vec<BufferedRequest> {
        let mut requests = self.requests.lock();
        requests
            .iter_mut()
            .rev()
            .filter(|r| !r.handled)
            .map(|r| {
                r.handled = true;
                r.clone()
            })
            .collect()
    }

    /// Number of requests not yet handled
    pub fn pending(&self) -> usize {
        self.requests.lock().iter().filter(|r| !r.handled).count()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.requests.lock().len()
    }
}

/// A buffered request owned by the call that queued it
#[derive(Debug)]
pub struct PendingRequest<'a> {
    buffer: &'a RequestBuffer,
    sequence: u64,
    claimed: bool,
}

impl PendingRequest<'_> {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Take the request out of the buffer for sending
    pub fn claim(mut self) -> Option<BufferedRequest> {
        self.claimed = true;
        self.buffer.take(self.sequence)
    }
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        if !self.claimed && self.buffer.take(self.sequence).is_some() {
            debug!(sequence = self.sequence, "Dropped request of an abandoned event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_tickets_are_served_in_issue_order() {
        let sequencer = Sequencer::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let tickets: Vec<Ticket> = (0..4).map(|_| sequencer.ticket()).collect();
        let mut handles = Vec::new();
        // Later tickets start first and sleep less
        for (index, ticket) in tickets.into_iter().enumerate().rev() {
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(index as u64)).await;
                ticket.wait_turn(Stage::Send).await;
                order.lock().push(ticket.sequence());
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
        assert_eq!(sequencer.serving(Stage::Send), 4);
        assert_eq!(sequencer.serving(Stage::Build), 4);
    }

    #[tokio::test]
    async fn test_next_ticket_builds_while_earlier_one_sends() {
        let sequencer = Sequencer::new();
        let mut first = sequencer.ticket();
        let second = sequencer.ticket();

        first.wait_turn(Stage::Build).await;
        first.finish(Stage::Build);

        tokio::time::timeout(Duration::from_secs(1), second.wait_turn(Stage::Build))
            .await
            .expect("second ticket should build");
        assert_eq!(sequencer.serving(Stage::Send), 0);

        let waiting = tokio::time::timeout(Duration::from_millis(20), second.wait_turn(Stage::Send));
        assert!(waiting.await.is_err());

        drop(first);
        second.wait_turn(Stage::Send).await;
    }

    #[tokio::test]
    async fn test_dropped_ticket_does_not_block_later_ones() {
        let sequencer = Sequencer::new();
        let first = sequencer.ticket();
        let second = sequencer.ticket();

        drop(first);
        tokio::time::timeout(Duration::from_secs(1), second.wait_turn(Stage::Build))
            .await
            .expect("second ticket should be served");
        second.wait_turn(Stage::Send).await;
    }

    #[tokio::test]
    async fn test_out_of_order_finish() {
        let sequencer = Sequencer::new();
        let first = sequencer.ticket();
        let second = sequencer.ticket();
        let third = sequencer.ticket();

        drop(second);
        assert_eq!(sequencer.serving(Stage::Send), 0);
        drop(first);
        assert_eq!(sequencer.serving(Stage::Send), 2);
        third.wait_turn(Stage::Send).await;
    }

    #[test]
    fn test_take_by_sequence() {
        let buffer = RequestBuffer::new();
        buffer.push(BufferedRequest::new(2, "collect", Payload::new()));
        buffer.push(BufferedRequest::new(0, "search", Payload::new()));
        buffer.push(BufferedRequest::new(1, "click", Payload::new()));

        assert_eq!(buffer.take(1).unwrap().wire_type, "click");
        assert!(buffer.take(1).is_none());
        assert_eq!(buffer.take(0).unwrap().wire_type, "search");
        assert_eq!(buffer.take(2).unwrap().wire_type, "collect");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_unclaimed_request_is_removed_on_drop() {
        let buffer = RequestBuffer::new();
        let first = buffer.enqueue(BufferedRequest::new(0, "search", Payload::new()));
        let second = buffer.enqueue(BufferedRequest::new(1, "click", Payload::new()));
        assert_eq!(buffer.len(), 2);

        drop(first);
        assert_eq!(buffer.len(), 1);
        assert_eq!(second.sequence(), 1);
        assert_eq!(second.claim().unwrap().wire_type, "click");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_flush_takes_unhandled_newest_first_once() {
        let buffer = RequestBuffer::new();
        for (sequence, wire_type) in ["search", "click", "custom"].into_iter().enumerate() {
            buffer.push(BufferedRequest::new(sequence as u64, wire_type, Payload::new()));
        }
        assert_eq!(buffer.pending(), 3);

        let flushed: Vec<String> = buffer
            .take_unhandled_newest_first()
            .into_iter()
            .map(|r| r.wire_type)
            .collect();
        assert_eq!(flushed, vec!["custom", "click", "search"]);
        assert_eq!(buffer.pending(), 0);
        assert!(buffer.take_unhandled_newest_first().is_empty());

        // Entries stay until their turn, marked handled
        assert!(buffer.take(0).unwrap().handled);
        assert_eq!(buffer.len(), 2);
    }
}
