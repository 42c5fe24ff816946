// Allow unused assignments for diagnostic fields - they're used by the thiserror/miette macros
#![allow(unused_assignments)]

pub mod api_client;
pub mod cache;
pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod finalizer;
pub mod informer;
pub mod lifecycle;
pub mod mock;
pub mod queue;
pub mod reconciler;
pub mod recorder;
pub mod templates;

// Re-export primary types
pub use error::{ControllerError, Result};
pub use mock::{MockCluster, Mutation};

pub use api_client::ApiClient;
pub use cache::{Change, ResourceCache, Store};
pub use client::ClusterClient;
pub use config::{ControllerConfig, DEFAULT_DATA_DIRECTORY};
pub use controller::{ErrorReporter, LogErrorReporter, ReplicaController};
pub use events::{ControllerEvent, EventTranslator};
pub use informer::Informer;
pub use lifecycle::{CleanupOutcome, WorkloadManager};
pub use queue::{Enqueue, ExponentialBackoff, WorkQueue};
pub use reconciler::{ClientReplicaUpdater, ReplicaReconciler, ReplicaUpdater, SyncHandler};
pub use recorder::{ClusterEventRecorder, EventKind, EventRecorder, MemoryRecorder};
pub use templates::{cleanup_job, pod_template, replica_volume_directory};
