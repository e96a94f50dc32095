//! Maintains a watch-fed view of the policy objects the access cache is
//! computed from: tenant namespaces, Roles, RoleBindings, ClusterRoles and
//! ClusterRoleBindings.
//!
//! Roles are trimmed at apply time to the rules that can grant namespace
//! reads, so the index holds the minimum needed to answer one question:
//! *which subjects may `get` a given namespace?* The [`Reader`] handle
//! exposes that answer (and the tenant namespace list) to the access cache.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod authz;
mod lookup;

pub use self::lookup::Reader;

use std::sync::Arc;

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use kubert::index::{IndexClusterResource, IndexNamespacedResource, NamespacedRemoved};
use parking_lot::RwLock;
use tenant_lister_core::Subject;
use tenant_lister_k8s_api::{rbac, Namespace, ResourceExt};
use tracing::debug;

use self::authz::{Binding, RoleRef, RuleScope};

pub type SharedIndex = Arc<RwLock<Index>>;

/// Holds the indexed policy state. Owned by the watch-dispatch tasks;
/// read through [`Reader`] during snapshot recomputation.
#[derive(Debug, Default)]
pub struct Index {
    namespaces: HashMap<String, Namespace>,

    /// Namespace-read rule scopes per Role, by namespace and name. Roles
    /// with no relevant rules are kept (empty) so dangling role references
    /// remain distinguishable from roles that grant nothing.
    roles: HashMap<String, HashMap<String, Vec<RuleScope>>>,
    cluster_roles: HashMap<String, Vec<RuleScope>>,

    role_bindings: HashMap<String, HashMap<String, Binding>>,
    cluster_role_bindings: HashMap<String, Binding>,
}

// === impl Index ===

impl Index {
    pub fn shared() -> SharedIndex {
        Arc::new(RwLock::new(Self::default()))
    }

    /// The current tenant namespaces, sorted by name so restocks iterate in
    /// a stable order.
    pub(crate) fn tenant_namespaces(&self) -> Vec<Namespace> {
        let mut namespaces: Vec<Namespace> = self.namespaces.values().cloned().collect();
        namespaces.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        namespaces
    }

    /// Enumerates the subjects the indexed policy allows to `get` the named
    /// namespace.
    ///
    /// Fails if any binding references a role the index does not hold; the
    /// caller treats that as "no subjects" until a later synchronization
    /// observes a consistent view.
    pub(crate) fn subjects_allowed_to_read(&self, namespace: &str) -> anyhow::Result<Vec<Subject>> {
        let mut subjects = Vec::new();
        let mut dangling = Vec::new();

        for (name, binding) in &self.cluster_role_bindings {
            let RoleRef::ClusterRole(role) = &binding.role_ref else {
                continue;
            };
            match self.cluster_roles.get(role) {
                None => dangling.push(format!("clusterrole {role} (clusterrolebinding {name})")),
                Some(scopes) => {
                    if scopes.iter().any(|scope| scope.allows(namespace)) {
                        subjects.extend(binding.subjects.iter().cloned());
                    }
                }
            }
        }

        if let Some(bindings) = self.role_bindings.get(namespace) {
            for (name, binding) in bindings {
                let scopes = match &binding.role_ref {
                    RoleRef::Role(role) => self
                        .roles
                        .get(namespace)
                        .and_then(|roles| roles.get(role)),
                    RoleRef::ClusterRole(role) => self.cluster_roles.get(role),
                };
                match scopes {
                    None => dangling.push(format!(
                        "{} (rolebinding {namespace}/{name})",
                        binding.role_ref,
                    )),
                    Some(scopes) => {
                        if scopes.iter().any(|scope| scope.allows(namespace)) {
                            subjects.extend(binding.subjects.iter().cloned());
                        }
                    }
                }
            }
        }

        if !dangling.is_empty() {
            anyhow::bail!("dangling role references: {}", dangling.join(", "));
        }
        Ok(subjects)
    }
}

impl IndexClusterResource<Namespace> for Index {
    fn apply(&mut self, resource: Namespace) {
        self.namespaces.insert(resource.name_unchecked(), resource);
    }

    fn delete(&mut self, name: String) {
        self.namespaces.remove(&name);
    }

    fn reset(&mut self, resources: Vec<Namespace>, _removed: HashSet<String>) {
        self.namespaces = resources
            .into_iter()
            .map(|ns| (ns.name_unchecked(), ns))
            .collect();
    }
}

impl IndexClusterResource<rbac::ClusterRole> for Index {
    fn apply(&mut self, resource: rbac::ClusterRole) {
        let name = resource.name_unchecked();
        let scopes = authz::namespace_read_scopes(resource.rules.as_deref().unwrap_or_default());
        self.cluster_roles.insert(name, scopes);
    }

    fn delete(&mut self, name: String) {
        self.cluster_roles.remove(&name);
    }

    fn reset(&mut self, resources: Vec<rbac::ClusterRole>, _removed: HashSet<String>) {
        self.cluster_roles.clear();
        for resource in resources {
            IndexClusterResource::apply(self, resource);
        }
    }
}

impl IndexClusterResource<rbac::ClusterRoleBinding> for Index {
    fn apply(&mut self, resource: rbac::ClusterRoleBinding) {
        let name = resource.name_unchecked();
        match Binding::from_parts(resource.subjects, resource.role_ref) {
            Some(binding) => {
                self.cluster_role_bindings.insert(name, binding);
            }
            None => {
                debug!(%name, "ignoring clusterrolebinding with unsupported role reference");
                self.cluster_role_bindings.remove(&name);
            }
        }
    }

    fn delete(&mut self, name: String) {
        self.cluster_role_bindings.remove(&name);
    }

    fn reset(&mut self, resources: Vec<rbac::ClusterRoleBinding>, _removed: HashSet<String>) {
        self.cluster_role_bindings.clear();
        for resource in resources {
            IndexClusterResource::apply(self, resource);
        }
    }
}

impl IndexNamespacedResource<rbac::Role> for Index {
    fn apply(&mut self, resource: rbac::Role) {
        let namespace = resource.namespace().expect("Role must have a namespace");
        let name = resource.name_unchecked();
        let scopes = authz::namespace_read_scopes(resource.rules.as_deref().unwrap_or_default());
        self.roles.entry(namespace).or_default().insert(name, scopes);
    }

    fn delete(&mut self, namespace: String, name: String) {
        if let Some(roles) = self.roles.get_mut(&namespace) {
            roles.remove(&name);
            if roles.is_empty() {
                self.roles.remove(&namespace);
            }
        }
    }

    fn reset(&mut self, resources: Vec<rbac::Role>, _removed: NamespacedRemoved) {
        self.roles.clear();
        for resource in resources {
            IndexNamespacedResource::apply(self, resource);
        }
    }
}

impl IndexNamespacedResource<rbac::RoleBinding> for Index {
    fn apply(&mut self, resource: rbac::RoleBinding) {
        let namespace = resource
            .namespace()
            .expect("RoleBinding must have a namespace");
        let name = resource.name_unchecked();
        match Binding::from_parts(resource.subjects, resource.role_ref) {
            Some(binding) => {
                self.role_bindings
                    .entry(namespace)
                    .or_default()
                    .insert(name, binding);
            }
            None => {
                debug!(
                    %namespace, %name,
                    "ignoring rolebinding with unsupported role reference",
                );
                if let Some(bindings) = self.role_bindings.get_mut(&namespace) {
                    bindings.remove(&name);
                }
            }
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        if let Some(bindings) = self.role_bindings.get_mut(&namespace) {
            bindings.remove(&name);
            if bindings.is_empty() {
                self.role_bindings.remove(&namespace);
            }
        }
    }

    fn reset(&mut self, resources: Vec<rbac::RoleBinding>, _removed: NamespacedRemoved) {
        self.role_bindings.clear();
        for resource in resources {
            IndexNamespacedResource::apply(self, resource);
        }
    }
}
