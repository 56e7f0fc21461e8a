//! Wait phase: block until every connection in a batch has replied

use dtx_common::RemoteConnection;
use futures::FutureExt;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Interrupts the coordinator's current or next wait phase
///
/// An interrupt fired while no wait is running stays pending. Waits that
/// raise errors honor a pending interrupt; cleanup waits discard it and only
/// react to interrupts fired while they run.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle {
    notify: Arc<Notify>,
}

impl InterruptHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.notify.notify_one();
    }

    /// Drop a pending interrupt; true if there was one
    pub(crate) fn clear_pending(&self) -> bool {
        self.notify.notified().now_or_never().is_some()
    }

    async fn interrupted(&self) {
        self.notify.notified().await;
    }
}

/// How a wait phase ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Every connection replied or broke
    Ready,
    TimedOut,
    Interrupted,
}

/// Wait for replies on all `connections` at once
pub async fn wait_for_replies<C: RemoteConnection>(
    connections: Vec<&mut C>,
    deadline: Instant,
    interrupt: &InterruptHandle,
) -> WaitOutcome {
    if connections.is_empty() {
        return WaitOutcome::Ready;
    }

    let replies = join_all(
        connections
            .into_iter()
            .map(|connection| connection.wait_for_reply()),
    );

    tokio::select! {
        biased;
        result = tokio::time::timeout_at(deadline, replies) => match result {
            Ok(_) => WaitOutcome::Ready,
            Err(_) => WaitOutcome::TimedOut,
        },
        _ = interrupt.interrupted() => WaitOutcome::Interrupted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtx_engine::{Fault, FaultRule, MockEngine};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_slowest_connection() {
        let engine = MockEngine::with_workers(2);
        let mut first = engine.connect("worker-1", 5432).unwrap();
        let mut second = engine.connect("worker-2", 5432).unwrap();
        engine
            .node("worker-2", 5432)
            .unwrap()
            .set_reply_delay(Some(Duration::from_millis(200)));

        first.send_command("BEGIN;");
        second.send_command("BEGIN;");

        let deadline = Instant::now() + Duration::from_secs(1);
        let outcome =
            wait_for_replies(vec![&mut first, &mut second], deadline, &InterruptHandle::new()).await;

        assert_eq!(outcome, WaitOutcome::Ready);
        assert!(!second.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_connection_times_out() {
        let engine = MockEngine::with_workers(1);
        let mut conn = engine.connect("worker-1", 5432).unwrap();
        engine
            .node("worker-1", 5432)
            .unwrap()
            .inject(FaultRule::new("BEGIN", Fault::Hang));
        conn.send_command("BEGIN;");

        let deadline = Instant::now() + Duration::from_millis(100);
        let outcome = wait_for_replies(vec![&mut conn], deadline, &InterruptHandle::new()).await;

        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(conn.is_busy());
    }

    #[tokio::test]
    async fn test_pending_interrupt_ends_wait() {
        let engine = MockEngine::with_workers(1);
        let mut conn = engine.connect("worker-1", 5432).unwrap();
        engine
            .node("worker-1", 5432)
            .unwrap()
            .inject(FaultRule::new("BEGIN", Fault::Hang));
        conn.send_command("BEGIN;");

        let interrupt = InterruptHandle::new();
        interrupt.interrupt();

        let deadline = Instant::now() + Duration::from_secs(60);
        let outcome = wait_for_replies(vec![&mut conn], deadline, &interrupt).await;
        assert_eq!(outcome, WaitOutcome::Interrupted);
    }

    #[test]
    fn test_clear_pending_consumes_interrupt() {
        let interrupt = InterruptHandle::new();
        assert!(!interrupt.clear_pending());

        interrupt.interrupt();
        assert!(interrupt.clear_pending());
        assert!(!interrupt.clear_pending());
    }
}
