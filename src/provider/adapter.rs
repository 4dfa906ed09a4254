//! The per-kind remote adapter contract.

use async_trait::async_trait;

use crate::error::{Operation, ProviderError, Result};
use crate::resource::ResourceId;
use crate::schema::{AttributeSet, ResourceSchema, ValidAttributes};

/// A resource found by [`ResourceAdapter::import`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedResource {
    /// Identifier to track the instance under.
    pub id: ResourceId,
    /// Attributes observed remotely.
    pub attributes: AttributeSet,
}

/// Translates attribute sets into remote calls for one resource kind.
///
/// Every method makes at most one transport call. Remote errors come back
/// wrapped in [`ProviderError::Remote`] with the kind, identifier and
/// operation attached.
#[async_trait]
pub trait ResourceAdapter: Send + Sync {
    /// Schema of the kind this adapter manages.
    fn schema(&self) -> &ResourceSchema;

    /// Kind name.
    fn kind(&self) -> &'static str {
        self.schema().kind()
    }

    /// Identifier a create would produce, if it is known up front.
    ///
    /// Lets the engine serialize calls per identifier before the instance
    /// exists.
    fn planned_id(&self, attributes: &ValidAttributes) -> Option<ResourceId> {
        self.schema()
            .identity()
            .and_then(|name| attributes.get_str(name))
            .map(ResourceId::new)
    }

    /// Creates the instance and returns its identifier.
    async fn create(&self, attributes: &ValidAttributes) -> Result<ResourceId>;

    /// Reads the instance. `Ok(None)` means it no longer exists remotely.
    async fn read(&self, id: &ResourceId) -> Result<Option<AttributeSet>>;

    /// Applies changes to mutable attributes.
    async fn update(&self, id: &ResourceId, changes: &AttributeSet) -> Result<()>;

    /// Deletes the instance. Deleting something already gone succeeds.
    async fn delete(&self, id: &ResourceId) -> Result<()>;

    /// Adopts an existing remote instance.
    ///
    /// The external identifier is used as-is and the attributes come from a
    /// read.
    async fn import(&self, external_id: &str) -> Result<ImportedResource> {
        let id = ResourceId::new(external_id);
        match self.read(&id).await? {
            Some(attributes) => Ok(ImportedResource { id, attributes }),
            None => Err(ProviderError::ImportNotFound {
                kind: self.kind().to_string(),
                id: external_id.to_string(),
            }
            .into()),
        }
    }
}

/// Wraps a transport error with the resource context.
pub(crate) fn remote_error(
    kind: &str,
    id: &str,
    operation: Operation,
    source: crate::error::RemoteError,
) -> crate::error::DeployError {
    ProviderError::Remote {
        kind: kind.to_string(),
        id: id.to_string(),
        operation,
        source,
    }
    .into()
}
