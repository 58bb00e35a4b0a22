//! Progress events for rasterisation and page parsing.
//!
//! The pipeline is the only writer of progress; any number of observers read
//! it. Every event is a self-contained snapshot, so an observer never needs
//! to keep its own counters:
//!
//! ```text
//! ProgressEvent { stage, document, completed, total, failed, current_label }
//! ```
//!
//! Two ways to consume events:
//!
//! * implement [`ProgressObserver`] (called synchronously, possibly from
//!   several tasks; keep it cheap), or
//! * call [`channel`] and read the returned [`ProgressStream`].
//!
//! # Example
//!
//! ```rust
//! use slicebatch::progress::{ProgressEvent, ProgressObserver};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct Counting(AtomicUsize);
//!
//! impl ProgressObserver for Counting {
//!     fn on_event(&self, event: &ProgressEvent) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{}", event.status());
//!     }
//! }
//! ```

use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;

/// Which part of the pipeline produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Pages being rendered to PNG.
    Rendering,
    /// Pages being sent to the model.
    Parsing,
    /// Document finished (successfully or not).
    Finished,
}

/// Snapshot of one document's progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    /// Source file name.
    pub document: String,
    pub completed: usize,
    pub total: usize,
    pub failed: usize,
    /// Human-readable label for the unit that just finished, e.g. `page 4`.
    pub current_label: String,
}

impl ProgressEvent {
    /// `completed / total`, or `1.0` for an empty document.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }

    /// One-line status, e.g. `Parsing: 3/10 pages (failed: 1)`.
    pub fn status(&self) -> String {
        match self.stage {
            Stage::Rendering => format!("Rendering: {}/{} pages", self.completed, self.total),
            Stage::Parsing => format!(
                "Parsing: {}/{} pages (failed: {})",
                self.completed, self.total, self.failed
            ),
            Stage::Finished => format!(
                "Finished: {}/{} pages succeeded",
                self.completed.saturating_sub(self.failed),
                self.total
            ),
        }
    }
}

/// Receives progress snapshots.
///
/// Implementations must be `Send + Sync`: parse events are emitted from
/// whichever task finished a page, render events from a blocking thread.
pub trait ProgressObserver: Send + Sync {
    fn on_event(&self, event: &ProgressEvent);
}

/// Observer for callers that don't need progress events.
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_event(&self, _event: &ProgressEvent) {}
}

/// Shared observer handle as stored by the pipeline.
pub type SharedObserver = Arc<dyn ProgressObserver>;

/// Forwards every event into an unbounded channel.
///
/// Sending never blocks the pipeline; events are dropped silently once the
/// receiver is gone.
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressObserver for ChannelObserver {
    fn on_event(&self, event: &ProgressEvent) {
        let _ = self.tx.send(event.clone());
    }
}

/// A boxed stream of progress snapshots.
pub type ProgressStream = Pin<Box<dyn Stream<Item = ProgressEvent> + Send>>;

/// Create an observer whose events can be read as a stream.
///
/// The stream ends when the observer (and every clone of the `Arc`) is dropped.
pub fn channel() -> (SharedObserver, ProgressStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    let observer: SharedObserver = Arc::new(ChannelObserver { tx });
    (observer, Box::pin(UnboundedReceiverStream::new(rx)))
}

/// Fan one event out to several observers.
pub struct Fanout(pub Vec<SharedObserver>);

impl ProgressObserver for Fanout {
    fn on_event(&self, event: &ProgressEvent) {
        for o in &self.0 {
            o.on_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_stream::StreamExt;

    fn event(stage: Stage, completed: usize, total: usize, failed: usize) -> ProgressEvent {
        ProgressEvent {
            stage,
            document: "doc.pdf".into(),
            completed,
            total,
            failed,
            current_label: format!("page {completed}"),
        }
    }

    struct Counting(AtomicUsize);

    impl ProgressObserver for Counting {
        fn on_event(&self, _event: &ProgressEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn status_lines() {
        assert_eq!(
            event(Stage::Parsing, 3, 10, 1).status(),
            "Parsing: 3/10 pages (failed: 1)"
        );
        assert_eq!(event(Stage::Rendering, 2, 5, 0).status(), "Rendering: 2/5 pages");
        assert_eq!(
            event(Stage::Finished, 5, 5, 2).status(),
            "Finished: 3/5 pages succeeded"
        );
    }

    #[test]
    fn fraction_handles_empty_document() {
        assert_eq!(event(Stage::Parsing, 0, 0, 0).fraction(), 1.0);
        assert_eq!(event(Stage::Parsing, 1, 4, 0).fraction(), 0.25);
    }

    #[test]
    fn noop_observer_does_not_panic() {
        NoopObserver.on_event(&event(Stage::Parsing, 1, 1, 0));
    }

    #[test]
    fn fanout_reaches_every_observer() {
        let a = Arc::new(Counting(AtomicUsize::new(0)));
        let b = Arc::new(Counting(AtomicUsize::new(0)));
        let fan = Fanout(vec![a.clone() as SharedObserver, b.clone() as SharedObserver]);
        fan.on_event(&event(Stage::Parsing, 1, 2, 0));
        fan.on_event(&event(Stage::Parsing, 2, 2, 0));
        assert_eq!(a.0.load(Ordering::SeqCst), 2);
        assert_eq!(b.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn channel_stream_yields_events_in_order_then_ends() {
        let (observer, mut stream) = channel();
        observer.on_event(&event(Stage::Parsing, 1, 2, 0));
        observer.on_event(&event(Stage::Parsing, 2, 2, 1));
        drop(observer);

        let collected: Vec<ProgressEvent> = tokio_test::block_on(async {
            let mut out = Vec::new();
            while let Some(e) = stream.next().await {
                out.push(e);
            }
            out
        });
        assert_eq!(collected.len(), 2);
        assert_eq!(collected[1].failed, 1);
    }
}
