//! Deployment resources and the references they carry.

pub mod resource;

pub use resource::{
    Deployment, DeploymentId, DeploymentSpec, ObjectMeta, Reference, ReferenceKind, Resource,
    ResourceSpec, API_VERSION, DEFAULT_NAMESPACE,
};
