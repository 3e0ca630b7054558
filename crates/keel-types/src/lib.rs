//! Resource model shared by the store, the reconciliation kernel and the host.

mod condition;
mod external;
mod kind;
pub mod labels;
mod meta;
mod phase;
mod resource;
pub mod validate;
mod variant;

pub use condition::{Condition, ConditionSet, ConditionStatus, reasons, types};
pub use external::{ContainerState, ExternalObject, ExternalStatus};
pub use kind::{Kind, ObjectKey, ParseKindError};
pub use meta::{ObjectMeta, OwnerRef, ParentRef};
pub use phase::Phase;
pub use resource::{
    ApplicationSpec, DeploymentSpec, DomainSpec, DomainType, EnvironmentSpec, ManagedResource,
    ProjectSpec, ResourceSpec, ResourceStatus,
};
pub use variant::{ApplicationVariant, DatabaseEngine, GitProvider, Variant};

use serde::{Serialize, de::DeserializeOwned};

/// Anything the store can hold: a typed value with object metadata.
pub trait Object: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn key(&self) -> ObjectKey {
        self.meta().key()
    }
}

impl Object for ManagedResource {
    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }
}

impl Object for ExternalObject {
    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }
}
