//! Response publishers: where finished jobs are delivered.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use super::protocol::JobResponse;
use crate::job::JobId;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("response channel closed")]
    ChannelClosed,

    #[error("no receiver registered for job {0}")]
    NoRoute(JobId),

    #[error("job {0} already has a caller waiting for its response")]
    DuplicateRoute(JobId),
}

/// Delivers exactly one record per finished job. Failures are reported to
/// the caller, which logs them; publishers do not retry.
#[async_trait]
pub trait ResponsePublisher: Send + Sync {
    async fn publish(&self, response: JobResponse) -> Result<(), PublishError>;
}

/// Publishes into an mpsc channel.
#[derive(Clone)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<JobResponse>,
}

impl ChannelPublisher {
    pub fn new(tx: mpsc::Sender<JobResponse>) -> Self {
        Self { tx }
    }

    /// Publisher plus its receiving end.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<JobResponse>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ResponsePublisher for ChannelPublisher {
    async fn publish(&self, response: JobResponse) -> Result<(), PublishError> {
        self.tx.send(response).await.map_err(|_| PublishError::ChannelClosed)
    }
}

/// Routes each response to a per-job oneshot registered by the submitter.
///
/// Responses for jobs without a registered receiver go to the fallback
/// publisher when one is set.
pub struct RoutingPublisher {
    routes: DashMap<JobId, oneshot::Sender<JobResponse>>,
    fallback: Option<Arc<dyn ResponsePublisher>>,
}

impl RoutingPublisher {
    pub fn new(fallback: Option<Arc<dyn ResponsePublisher>>) -> Self {
        Self { routes: DashMap::new(), fallback }
    }

    /// Register interest in `job_id`'s outcome.
    ///
    /// Fails while another caller is still waiting on the same id; a route
    /// whose receiver has been dropped is replaced.
    pub fn register(&self, job_id: JobId) -> Result<oneshot::Receiver<JobResponse>, PublishError> {
        let (tx, rx) = oneshot::channel();
        match self.routes.entry(job_id) {
            Entry::Occupied(live) if !live.get().is_closed() => {
                return Err(PublishError::DuplicateRoute(live.key().clone()));
            }
            Entry::Occupied(mut stale) => {
                stale.insert(tx);
            }
            Entry::Vacant(slot) => {
                slot.insert(tx);
            }
        }
        Ok(rx)
    }

    /// Drop a registration (e.g. when the submission was rejected).
    pub fn unregister(&self, job_id: &JobId) {
        self.routes.remove(job_id);
    }

    pub fn pending_routes(&self) -> usize {
        self.routes.len()
    }
}

#[async_trait]
impl ResponsePublisher for RoutingPublisher {
    async fn publish(&self, response: JobResponse) -> Result<(), PublishError> {
        if let Some((_, tx)) = self.routes.remove(&response.job_id) {
            let job_id = response.job_id.clone();
            return tx.send(response).map_err(|_| PublishError::NoRoute(job_id));
        }
        match &self.fallback {
            Some(fallback) => fallback.publish(response).await,
            None => Err(PublishError::NoRoute(response.job_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::FailureKind;

    #[tokio::test]
    async fn channel_publisher_delivers() {
        let (publisher, mut rx) = ChannelPublisher::channel(4);
        publisher.publish(JobResponse::completed(1.into(), "ok".into())).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().job_id, JobId::from(1));
    }

    #[tokio::test]
    async fn channel_publisher_reports_closed() {
        let (publisher, rx) = ChannelPublisher::channel(1);
        drop(rx);
        let err = publisher.publish(JobResponse::completed(1.into(), "ok".into())).await;
        assert!(matches!(err, Err(PublishError::ChannelClosed)));
    }

    #[tokio::test]
    async fn routing_publisher_resolves_registered_job() {
        let router = RoutingPublisher::new(None);
        let rx = router.register("a".into()).unwrap();
        router
            .publish(JobResponse::failed("a".into(), FailureKind::Timeout, "slow"))
            .await
            .unwrap();
        let response = rx.await.unwrap();
        assert_eq!(response.failure_kind(), Some(FailureKind::Timeout));
        assert_eq!(router.pending_routes(), 0);
    }

    #[tokio::test]
    async fn routing_publisher_falls_back() {
        let (fallback, mut rx) = ChannelPublisher::channel(1);
        let router = RoutingPublisher::new(Some(Arc::new(fallback)));
        router.publish(JobResponse::completed(2.into(), "x".into())).await.unwrap();
        assert!(rx.recv().await.unwrap().is_success());
    }

    #[tokio::test]
    async fn routing_publisher_without_route_errors() {
        let router = RoutingPublisher::new(None);
        let err = router.publish(JobResponse::completed(3.into(), "x".into())).await;
        assert!(matches!(err, Err(PublishError::NoRoute(JobId::Number(3)))));
    }

    #[tokio::test]
    async fn duplicate_live_route_is_refused() {
        let router = RoutingPublisher::new(None);
        let first = router.register(1.into()).unwrap();
        let err = router.register(1.into()).unwrap_err();
        assert!(matches!(err, PublishError::DuplicateRoute(JobId::Number(1))));

        router.publish(JobResponse::completed(1.into(), "one".into())).await.unwrap();
        assert_eq!(first.await.unwrap(), JobResponse::completed(1.into(), "one".into()));

        // Delivered routes free the id.
        assert!(router.register(1.into()).is_ok());
    }

    #[test]
    fn abandoned_route_can_be_replaced() {
        let router = RoutingPublisher::new(None);
        drop(router.register("gone".into()).unwrap());
        assert!(router.register("gone".into()).is_ok());
        assert_eq!(router.pending_routes(), 1);
    }
}
