//! Per-job result channel and the consumer-facing handle.
//!
//! The worker is the only producer; the [`JobHandle`] is the only consumer.
//! The channel carries [`ResultItem`]s, the last of which is always
//! [`ResultItem::End`]. Consumers only ever see [`LiveEvent`]s.

use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::Stream;

use super::models::OperationKind;
use super::tree::TreeSnapshot;

/// What a worker pushes for one job.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultItem {
    Log(String),
    Tree(TreeSnapshot),
    /// Control sentinel closing the stream. Never leaves this module.
    End,
}

/// One record of the live stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LiveEvent {
    Log { line: String },
    Tree { tree: TreeSnapshot },
}

impl LiveEvent {
    /// Render as one newline-delimited JSON record.
    pub fn to_ndjson(&self) -> String {
        let mut json = serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"type":"log","line":"failed to serialize event: {}"}}"#,
                e.to_string().replace('"', "'")
            )
        });
        json.push('\n');
        json
    }

    pub fn as_log(&self) -> Option<&str> {
        match self {
            Self::Log { line } => Some(line),
            Self::Tree { .. } => None,
        }
    }
}

/// Create the private channel for one job.
pub fn channel(id: String, kind: OperationKind) -> (ResultSender, JobHandle) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sender = ResultSender { tx };
    let handle = JobHandle {
        id,
        kind,
        rx,
        finished: false,
    };
    (sender, handle)
}

/// Producer side, held by the worker.
///
/// Sends never fail from the job's point of view: a consumer that went away
/// only stops consumption, the job itself runs to completion.
#[derive(Debug, Clone)]
pub struct ResultSender {
    tx: mpsc::UnboundedSender<ResultItem>,
}

impl ResultSender {
    pub fn log(&self, line: impl Into<String>) {
        let _ = self.tx.send(ResultItem::Log(line.into()));
    }

    pub fn tree(&self, tree: TreeSnapshot) {
        let _ = self.tx.send(ResultItem::Tree(tree));
    }

    pub fn end(&self) {
        let _ = self.tx.send(ResultItem::End);
    }

    pub fn is_consumer_gone(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of one submitted job: a lazy, one-shot sequence of events.
#[derive(Debug)]
pub struct JobHandle {
    id: String,
    kind: OperationKind,
    rx: mpsc::UnboundedReceiver<ResultItem>,
    finished: bool,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Wait for the next event. Returns `None` once the job has ended, and
    /// keeps returning `None` afterwards.
    pub async fn next_event(&mut self) -> Option<LiveEvent> {
        if self.finished {
            return None;
        }

        match self.rx.recv().await {
            Some(ResultItem::Log(line)) => Some(LiveEvent::Log { line }),
            Some(ResultItem::Tree(tree)) => Some(LiveEvent::Tree { tree }),
            Some(ResultItem::End) | None => {
                self.finished = true;
                self.rx.close();
                None
            }
        }
    }

    /// Drain every remaining event.
    pub async fn collect(mut self) -> Vec<LiveEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event().await {
            events.push(event);
        }
        events
    }

    pub fn into_stream(self) -> impl Stream<Item = LiveEvent> + Send + 'static {
        async_stream::stream! {
            let mut handle = self;
            while let Some(event) = handle.next_event().await {
                yield event;
            }
        }
    }

    /// Newline-delimited JSON body chunks, ready for an HTTP response.
    pub fn into_ndjson(self) -> impl Stream<Item = Result<String, Infallible>> + Send + 'static {
        async_stream::stream! {
            let mut handle = self;
            while let Some(event) = handle.next_event().await {
                yield Ok(event.to_ndjson());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tree::TargetNode;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn handle_stops_at_end_marker() {
        let (tx, mut handle) = channel("job-1".into(), OperationKind::Program);

        tx.log("first");
        tx.log("second");
        tx.end();
        tx.log("after end is never seen");

        assert_eq!(handle.next_event().await.unwrap().as_log(), Some("first"));
        assert_eq!(handle.next_event().await.unwrap().as_log(), Some("second"));
        assert!(handle.next_event().await.is_none());
        assert!(handle.next_event().await.is_none());
    }

    #[tokio::test]
    async fn handle_closes_if_producer_vanishes() {
        let (tx, handle) = channel("job-2".into(), OperationKind::List);
        tx.log("only line");
        drop(tx);

        let events = handle.collect().await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn dropped_handle_does_not_break_sender() {
        let (tx, handle) = channel("job-3".into(), OperationKind::Flash);
        drop(handle);

        assert!(tx.is_consumer_gone());
        tx.log("still fine");
        tx.end();
    }

    #[tokio::test]
    async fn ndjson_records_match_wire_shape() {
        let (tx, handle) = channel("job-4".into(), OperationKind::List);
        tx.log("Target: A");
        tx.tree(TreeSnapshot {
            server: "lab-01:3121".into(),
            targets: vec![TargetNode {
                name: "A".into(),
                devices: vec!["d1".into()],
            }],
        });
        tx.end();

        let chunks: Vec<String> = handle
            .into_ndjson()
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "{\"type\":\"log\",\"line\":\"Target: A\"}\n");

        let tree: serde_json::Value = serde_json::from_str(chunks[1].trim_end()).unwrap();
        assert_eq!(tree["type"], "tree");
        assert_eq!(tree["tree"]["targets"][0]["devices"][0], "d1");
    }

    #[tokio::test]
    async fn stream_adapter_yields_live_events() {
        let (tx, handle) = channel("job-5".into(), OperationKind::Program);
        tx.log("a");
        tx.log("b");
        tx.end();

        let lines: Vec<String> = handle
            .into_stream()
            .filter_map(|event| event.as_log().map(str::to_string))
            .collect()
            .await;
        assert_eq!(lines, vec!["a", "b"]);
    }
}
