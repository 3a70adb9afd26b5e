pub mod config;
pub mod controller;
pub mod deployment;
pub mod error;
pub mod events;
pub mod fetch;
pub mod generator;
pub mod index;
pub mod logging;
pub mod manifest;
pub mod ops;
pub mod resolver;
pub mod store;
pub mod testutil;
pub mod variables;

pub use config::{load_config, load_config_from_str, OperatorConfig};
pub use controller::{
    Backoff, Controller, DeploymentReconciler, ReconcileError, ReconcileOutcome, Trigger,
    WorkQueue, WorkerPool,
};
pub use deployment::{Deployment, DeploymentId, DeploymentSpec, Reference, ReferenceKind};
pub use error::{ConfigError, ManifoldError, Result};
pub use events::{ChangeType, WatchEvent};
pub use fetch::{FetchError, ObjectFetcher, SourceFetcher, UrlFetcher};
pub use generator::{Generator, GeneratorError};
pub use index::{IndexError, ReferenceIndex};
pub use manifest::{Manifest, ManifestError};
pub use ops::{PatchError, PatchOperation, Pointer};
pub use resolver::{ManifestResolver, Resolution, ResolveError};
pub use store::{
    ConfigObject, FsVersionedStore, MemoryCluster, MemoryVersionedStore, ObjectId, SecretName,
    StoreError, VersionedSecret, VersionedSecretStore,
};
pub use variables::{VariableEngine, VariableError};
