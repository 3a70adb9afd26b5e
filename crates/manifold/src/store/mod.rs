//! Config object access and the versioned secret store.

pub mod error;
pub mod filesystem;
pub mod memory;
pub mod names;
pub mod object;
pub mod versioned;

pub use error::{Result, StoreError};
pub use filesystem::FsVersionedStore;
pub use memory::MemoryCluster;
pub use names::{implicit_variable_object, NameParseError, SecretName, SecretRole};
pub use object::{ConfigObject, DeploymentStore, ObjectId, ObjectKind, ObjectStore};
pub use versioned::{
    write_next_version, MemoryVersionedStore, SecretDraft, SecretKind, VersionedSecret,
    VersionedSecretStore,
};
