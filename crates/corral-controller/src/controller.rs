use crate::cache::ResourceCache;
use crate::client::ClusterClient;
use crate::config::ControllerConfig;
use crate::error::{ControllerError, Result};
use crate::events::EventTranslator;
use crate::informer::Informer;
use crate::queue::{Enqueue, ExponentialBackoff, WorkQueue};
use crate::reconciler::{ClientReplicaUpdater, ReplicaReconciler, SyncHandler};
use crate::recorder::ClusterEventRecorder;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Receives errors for keys that ran out of retries
pub trait ErrorReporter: Send + Sync {
    fn report(&self, key: &str, err: &ControllerError);
}

/// Reports dropped keys to the log
pub struct LogErrorReporter;

impl ErrorReporter for LogErrorReporter {
    fn report(&self, key: &str, err: &ControllerError) {
        error!(replica = %key, "Giving up on Longhorn replica: {}", err);
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// One worker's view of the shared queue and handler
#[derive(Clone)]
struct Worker {
    queue: WorkQueue,
    handler: Arc<dyn SyncHandler>,
    reporter: Arc<dyn ErrorReporter>,
    max_retries: u32,
}

impl Worker {
    async fn run(self) {
        while self.process_next_work_item().await {}
    }

    /// Handle one key. Returns false once the queue has shut down.
    async fn process_next_work_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        let result = AssertUnwindSafe(self.handler.sync(&key))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(ControllerError::handler_panicked(
                    key.as_str(),
                    panic_message(panic),
                ))
            });

        self.handle_err(&key, result);
        self.queue.done(&key);
        true
    }

    fn handle_err(&self, key: &str, result: Result<()>) {
        let Err(err) = result else {
            self.queue.forget(key);
            return;
        };

        if self.queue.num_requeues(key) < self.max_retries {
            warn!(replica = %key, "Error syncing Longhorn replica: {}", err);
            self.queue.add_rate_limited(key);
            return;
        }

        self.reporter.report(key, &err);
        warn!(replica = %key, "Dropping Longhorn replica out of the queue: {}", err);
        self.queue.forget(key);
    }
}

/// Runs a pool of workers draining the replica queue
pub struct ReplicaController {
    worker: Worker,
    cache: Arc<ResourceCache>,
    workers: usize,
    cache_sync_timeout: Duration,
}

impl ReplicaController {
    pub fn new(
        config: &ControllerConfig,
        queue: WorkQueue,
        cache: Arc<ResourceCache>,
        handler: Arc<dyn SyncHandler>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            worker: Worker {
                queue,
                handler,
                reporter,
                max_retries: config.max_retries,
            },
            cache,
            workers: config.workers,
            cache_sync_timeout: config.cache_sync_timeout,
        }
    }

    /// Wire a controller and its informer against a cluster
    pub fn from_client(
        config: &ControllerConfig,
        client: Arc<dyn ClusterClient>,
    ) -> Result<(Self, Informer)> {
        config.validate()?;

        let cache = Arc::new(ResourceCache::new());
        let queue = WorkQueue::new(
            "longhorn-replicas",
            ExponentialBackoff::new(config.base_retry_delay, config.max_retry_delay),
        );
        let enqueue: Arc<dyn Enqueue> = Arc::new(queue.clone());

        let translator = Arc::new(EventTranslator::new(cache.clone(), enqueue.clone()));
        let informer = Informer::new(
            client.clone(),
            cache.clone(),
            translator,
            config.namespace.clone(),
            config.resync_interval,
        );

        let reconciler = ReplicaReconciler::new(
            config,
            client.clone(),
            cache.clone(),
            Arc::new(ClientReplicaUpdater::new(client.clone())),
            enqueue,
            Arc::new(ClusterEventRecorder::new(client)),
        );

        let controller = Self::new(
            config,
            queue,
            cache,
            Arc::new(reconciler),
            Arc::new(LogErrorReporter),
        );
        Ok((controller, informer))
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.worker.queue
    }

    /// Process keys until `token` is cancelled
    ///
    /// Waits for the caches to sync first. If they never do, `token` is
    /// cancelled so the informer stops too. On cancellation the queue is shut
    /// down and in-flight keys finish before this returns.
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        info!("Starting Longhorn replica controller");

        let synced = match self
            .cache
            .wait_for_sync(&token, self.cache_sync_timeout)
            .await
        {
            Ok(synced) => synced,
            Err(e) => {
                error!("Caches failed to sync: {}", e);
                self.worker.queue.shut_down();
                token.cancel();
                return Err(e);
            }
        };
        if !synced {
            info!("Cancelled before caches synced");
            self.worker.queue.shut_down();
            return Ok(());
        }

        let handles: Vec<_> = (0..self.workers)
            .map(|_| tokio::spawn(self.worker.clone().run()))
            .collect();
        info!("Started {} replica workers", handles.len());

        token.cancelled().await;
        info!("Shutting down Longhorn replica controller");
        self.worker.queue.shut_down();

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Replica worker exited abnormally: {}", e);
            }
        }
        Ok(())
    }

    /// Handle a single key; used by tests to step the controller
    pub async fn process_next_work_item(&self) -> bool {
        self.worker.process_next_work_item().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCluster;
    use async_trait::async_trait;
    use corral_core::{InstanceState, Replica, ReplicaSpec};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails every call, or panics on the first `panics` calls
    #[derive(Default)]
    struct ScriptedHandler {
        calls: AtomicU32,
        panics: u32,
        always_fail: bool,
    }

    #[async_trait]
    impl SyncHandler for ScriptedHandler {
        async fn sync(&self, key: &str) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.panics {
                panic!("boom while syncing {}", key);
            }
            if self.always_fail {
                return Err(ControllerError::conflict("Replica", key));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingReporter(Mutex<Vec<String>>);

    impl ErrorReporter for CountingReporter {
        fn report(&self, key: &str, _err: &ControllerError) {
            self.0.lock().push(key.to_string());
        }
    }

    fn controller(handler: Arc<ScriptedHandler>, reporter: Arc<CountingReporter>) -> ReplicaController {
        ReplicaController::new(
            &ControllerConfig::default(),
            WorkQueue::new("test", ExponentialBackoff::default()),
            Arc::new(ResourceCache::new()),
            handler,
            reporter,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_ceiling_reports_once() {
        let handler = Arc::new(ScriptedHandler {
            always_fail: true,
            ..Default::default()
        });
        let reporter = Arc::new(CountingReporter::default());
        let controller = controller(handler.clone(), reporter.clone());

        controller.queue().add("ns/r");
        for _ in 0..4 {
            assert!(controller.process_next_work_item().await);
        }

        // Initial attempt plus three retries
        assert_eq!(handler.calls.load(Ordering::SeqCst), 4);
        assert_eq!(*reporter.0.lock(), vec!["ns/r"]);
        assert_eq!(controller.queue().num_requeues("ns/r"), 0);

        let next = tokio::time::timeout(Duration::from_secs(5000), controller.queue().get()).await;
        assert!(next.is_err(), "dropped key must not come back");
    }

    #[tokio::test]
    async fn test_success_forgets_backoff() {
        let handler = Arc::new(ScriptedHandler::default());
        let reporter = Arc::new(CountingReporter::default());
        let controller = controller(handler.clone(), reporter.clone());

        controller.queue().add_rate_limited("ns/r");
        controller.queue().add_rate_limited("ns/r");
        assert_eq!(controller.queue().num_requeues("ns/r"), 2);

        assert!(controller.process_next_work_item().await);
        assert_eq!(controller.queue().num_requeues("ns/r"), 0);
        assert!(reporter.0.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_survives_handler_panic() {
        let handler = Arc::new(ScriptedHandler {
            panics: 1,
            ..Default::default()
        });
        let reporter = Arc::new(CountingReporter::default());
        let controller = controller(handler.clone(), reporter.clone());

        controller.queue().add("ns/r");
        assert!(controller.process_next_work_item().await);
        assert_eq!(controller.queue().num_requeues("ns/r"), 1);

        assert!(controller.process_next_work_item().await);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert_eq!(controller.queue().num_requeues("ns/r"), 0);
        assert!(reporter.0.lock().is_empty());
    }

    #[tokio::test]
    async fn test_run_returns_after_cancel() {
        let handler = Arc::new(ScriptedHandler::default());
        let controller = controller(handler, Arc::new(CountingReporter::default()));
        let cache = controller.cache.clone();
        cache.replicas.replace(vec![]);
        cache.pods.replace(vec![]);
        cache.jobs.replace(vec![]);

        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        tokio::time::timeout(Duration::from_secs(5), controller.run(token))
            .await
            .unwrap()
            .unwrap();
        assert!(controller.queue().is_shutting_down());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_sync_timeout_cancels_and_fails() {
        let handler = Arc::new(ScriptedHandler::default());
        let controller = ReplicaController::new(
            &ControllerConfig {
                cache_sync_timeout: Duration::from_secs(1),
                ..Default::default()
            },
            WorkQueue::new("test", ExponentialBackoff::default()),
            Arc::new(ResourceCache::new()),
            handler,
            Arc::new(CountingReporter::default()),
        );

        let token = CancellationToken::new();
        let err = controller.run(token.clone()).await.unwrap_err();
        assert!(matches!(err, ControllerError::CacheSyncFailed { .. }));
        assert!(token.is_cancelled());
        assert!(controller.queue().is_shutting_down());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_conflict_is_retried_then_forgotten() {
        let cluster = MockCluster::new();
        let config = ControllerConfig {
            namespace: "ns".to_string(),
            ..Default::default()
        };
        let (controller, informer) =
            ReplicaController::from_client(&config, Arc::new(cluster.clone())).unwrap();

        cluster
            .insert_replica(Replica::new(
                "ns",
                "vol-r-1",
                ReplicaSpec {
                    volume_name: "vol".to_string(),
                    desire_state: InstanceState::Running,
                    node_id: "node-1".to_string(),
                    failed_at: "2024-01-01T00:00:00Z".to_string(),
                    ..Default::default()
                },
            ))
            .await
            .unwrap();
        informer.resync_once().await.unwrap();
        cluster.inject_update_conflicts(1).await;

        assert!(controller.process_next_work_item().await);
        assert_eq!(controller.queue().num_requeues("ns/vol-r-1"), 1);
        let stored = cluster.replica("ns", "vol-r-1").await.unwrap();
        assert_eq!(stored.spec.desire_state, InstanceState::Running);

        // Retried once the backoff elapses
        assert!(controller.process_next_work_item().await);
        assert_eq!(controller.queue().num_requeues("ns/vol-r-1"), 0);
        let stored = cluster.replica("ns", "vol-r-1").await.unwrap();
        assert_eq!(stored.spec.desire_state, InstanceState::Stopped);
    }

    async fn wait_for<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..500 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_replica_lifecycle_end_to_end() {
        let cluster = MockCluster::new();
        let config = ControllerConfig {
            namespace: "ns".to_string(),
            workers: 2,
            resync_interval: Duration::from_millis(20),
            ..Default::default()
        };
        let (controller, informer) =
            ReplicaController::from_client(&config, Arc::new(cluster.clone())).unwrap();

        let mut replica = Replica::new(
            "ns",
            "vol-r-1",
            ReplicaSpec {
                volume_name: "vol".to_string(),
                volume_size: "1024".to_string(),
                engine_image: "engine:latest".to_string(),
                desire_state: InstanceState::Running,
                node_id: "node-1".to_string(),
                ..Default::default()
            },
        );
        replica.metadata.finalizers = Some(vec!["longhorn.rancher.io".to_string()]);
        cluster.insert_replica(replica).await.unwrap();

        let token = CancellationToken::new();
        let informer_task = tokio::spawn({
            let token = token.clone();
            async move { informer.run(token).await }
        });
        let controller = Arc::new(controller);
        let controller_task = tokio::spawn({
            let controller = controller.clone();
            let token = token.clone();
            async move { controller.run(token).await }
        });

        wait_for(|| {
            let cluster = cluster.clone();
            async move { cluster.pod("ns", "vol-r-1").await.is_some() }
        })
        .await;
        cluster.simulate_kubelet().await.unwrap();

        cluster.delete_replica("ns", "vol-r-1").await.unwrap();
        wait_for(|| {
            let cluster = cluster.clone();
            async move {
                cluster.simulate_kubelet().await.ok();
                cluster.replica("ns", "vol-r-1").await.is_none()
            }
        })
        .await;
        assert!(cluster.pod("ns", "vol-r-1").await.is_none());
        assert!(cluster.job("ns", "vol-r-1").await.is_none());

        // Events are published in the background
        wait_for(|| {
            let cluster = cluster.clone();
            async move {
                let reasons: Vec<String> = cluster
                    .events()
                    .await
                    .into_iter()
                    .filter_map(|e| e.reason)
                    .collect();
                reasons.iter().any(|r| r == "Started")
                    && reasons.iter().any(|r| r == "CleanupSucceeded")
            }
        })
        .await;

        token.cancel();
        informer_task.await.unwrap();
        controller_task.await.unwrap().unwrap();
    }
}
