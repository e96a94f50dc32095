//! Core domain types for the tenant lister.
//!
//! This crate models authorization principals independently of any Kubernetes
//! client machinery: a [`Subject`] is the key of the precomputed access
//! snapshot, and [`ResourceAttributes`] describes the action the subject
//! locator evaluates. Identity-to-subject resolution (username plus groups,
//! including the service-account username convention) lives here so that both
//! the HTTP front door and the tests share one implementation.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod subject;

pub use self::subject::{Subject, SubjectKind};

/// API group of the Kubernetes RBAC resources.
pub const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// The well-known group carried by every authenticated identity.
pub const GROUP_SYSTEM_AUTHENTICATED: &str = "system:authenticated";

/// Username prefix identifying service-account identities.
pub const SERVICE_ACCOUNT_USERNAME_PREFIX: &str = "system:serviceaccount:";

/// Describes a resource action for subject-locator queries.
///
/// Mirrors the attribute record of a Kubernetes authorization check. The
/// tenant lister only ever asks one question, built by
/// [`ResourceAttributes::namespace_get`], but the locator contract stays
/// general so it can be exercised independently.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceAttributes {
    pub verb: String,
    pub api_group: String,
    pub api_version: String,
    pub resource: String,
    pub namespace: String,
    pub name: String,
    pub resource_request: bool,
}

impl ResourceAttributes {
    /// Attributes of a `get` on the named namespace.
    pub fn namespace_get(name: &str) -> Self {
        Self {
            verb: "get".to_string(),
            api_group: String::new(),
            api_version: "v1".to_string(),
            resource: "namespaces".to_string(),
            namespace: name.to_string(),
            name: name.to_string(),
            resource_request: true,
        }
    }
}
