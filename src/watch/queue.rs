//! Serial execution of watch and unwatch requests.
//!
//! The backend watcher API is not assumed safe under concurrent watch and
//! unwatch of overlapping subtrees, so every request funnels through a
//! single worker task. A request runs to completion before the next one
//! starts, and a caller that stops listening for its result cannot stall
//! the queue.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::{mpsc, oneshot};

use crate::error::FsError;

type WatchJob = Pin<Box<dyn Future<Output = Result<(), FsError>> + Send>>;

struct WatchRequest {
    job: WatchJob,
    reply: oneshot::Sender<Result<(), FsError>>,
}

/// Handle to the serial watch-request worker.
pub(crate) struct WatchRequestQueue {
    tx: mpsc::UnboundedSender<WatchRequest>,
}

impl WatchRequestQueue {
    /// Spawn the worker task and return the submission handle.
    pub fn start() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<WatchRequest>();
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let result = request.job.await;
                // The caller may have gone away; the queue keeps draining.
                let _ = request.reply.send(result);
            }
        });
        Self { tx }
    }

    /// Submit a request and wait for its result. Requests execute strictly
    /// in submission order.
    pub async fn run<F>(&self, job: F) -> Result<(), FsError>
    where
        F: Future<Output = Result<(), FsError>> + Send + 'static,
    {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(WatchRequest {
                job: Box::pin(job),
                reply,
            })
            .map_err(|_| FsError::backend("watch queue terminated"))?;
        response
            .await
            .unwrap_or_else(|_| Err(FsError::backend("watch queue terminated")))
    }
}
