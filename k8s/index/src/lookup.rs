use async_trait::async_trait;
use tenant_lister_core::{ResourceAttributes, Subject};
use tenant_lister_k8s_api::Namespace;
use tenant_lister_k8s_cache::{NamespaceLister, SubjectLocator};

use crate::SharedIndex;

/// Read-side handle over the policy index: the namespace lister and subject
/// locator the access cache recomputes from.
#[derive(Clone, Debug)]
pub struct Reader(SharedIndex);

// === impl Reader ===

impl Reader {
    pub fn new(index: SharedIndex) -> Self {
        Self(index)
    }
}

#[async_trait]
impl NamespaceLister for Reader {
    async fn list_namespaces(&self) -> anyhow::Result<Vec<Namespace>> {
        Ok(self.0.read().tenant_namespaces())
    }
}

#[async_trait]
impl SubjectLocator for Reader {
    async fn allowed_subjects(
        &self,
        attributes: &ResourceAttributes,
    ) -> anyhow::Result<Vec<Subject>> {
        // The index only answers namespace reads.
        if attributes.verb != "get"
            || attributes.resource != "namespaces"
            || !attributes.api_group.is_empty()
        {
            anyhow::bail!(
                "unsupported attributes: {} {}.{}",
                attributes.verb,
                attributes.resource,
                attributes.api_group,
            );
        }
        self.0.read().subjects_allowed_to_read(&attributes.name)
    }
}
