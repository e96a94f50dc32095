use ahash::AHashSet as HashSet;
use tenant_lister_core::{Subject, SubjectKind};
use tenant_lister_k8s_api::rbac;
use tracing::debug;

/// The namespaces one policy rule grants reads on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum RuleScope {
    /// No `resourceNames` restriction: every namespace.
    All,
    /// Restricted to the named namespaces.
    Names(HashSet<String>),
}

/// An indexed RoleBinding or ClusterRoleBinding: its subjects and the role
/// it grants.
#[derive(Clone, Debug)]
pub(crate) struct Binding {
    pub(crate) subjects: Vec<Subject>,
    pub(crate) role_ref: RoleRef,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum RoleRef {
    Role(String),
    ClusterRole(String),
}

/// Extracts the scopes of the rules that can grant `get` on `namespaces`.
///
/// Everything else a role grants is irrelevant here and dropped, keeping the
/// index small. Wildcard groups, resources and verbs count as grants.
pub(crate) fn namespace_read_scopes(rules: &[rbac::PolicyRule]) -> Vec<RuleScope> {
    rules
        .iter()
        .filter(|rule| grants_namespace_read(rule))
        .map(|rule| RuleScope::from_resource_names(rule.resource_names.as_deref()))
        .collect()
}

fn grants_namespace_read(rule: &rbac::PolicyRule) -> bool {
    fn contains(values: Option<&[String]>, want: &str) -> bool {
        values
            .unwrap_or_default()
            .iter()
            .any(|v| v == want || v == "*")
    }

    contains(rule.api_groups.as_deref(), "")
        && contains(rule.resources.as_deref(), "namespaces")
        && rule.verbs.iter().any(|v| v == "get" || v == "*")
}

// === impl RuleScope ===

impl RuleScope {
    fn from_resource_names(names: Option<&[String]>) -> Self {
        match names {
            None | Some([]) => Self::All,
            Some(names) => Self::Names(names.iter().cloned().collect()),
        }
    }

    pub(crate) fn allows(&self, namespace: &str) -> bool {
        match self {
            Self::All => true,
            Self::Names(names) => names.contains(namespace),
        }
    }
}

// === impl Binding ===

impl Binding {
    /// Indexes a binding's subjects and role reference.
    ///
    /// Returns `None` for role-reference kinds RBAC does not define;
    /// subjects of unknown kinds are skipped.
    pub(crate) fn from_parts(
        subjects: Option<Vec<rbac::Subject>>,
        role_ref: rbac::RoleRef,
    ) -> Option<Self> {
        let role_ref = match role_ref.kind.as_str() {
            "Role" => RoleRef::Role(role_ref.name),
            "ClusterRole" => RoleRef::ClusterRole(role_ref.name),
            _ => return None,
        };

        let subjects = subjects
            .unwrap_or_default()
            .into_iter()
            .filter_map(convert_subject)
            .collect();
        Some(Self { subjects, role_ref })
    }
}

impl std::fmt::Display for RoleRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Role(name) => write!(f, "role {name}"),
            Self::ClusterRole(name) => write!(f, "clusterrole {name}"),
        }
    }
}

fn convert_subject(subject: rbac::Subject) -> Option<Subject> {
    let kind = match subject.kind.parse::<SubjectKind>() {
        Ok(kind) => kind,
        Err(error) => {
            debug!(%error, name = %subject.name, "skipping binding subject");
            return None;
        }
    };
    Some(Subject {
        api_group: subject.api_group.unwrap_or_default(),
        kind,
        namespace: subject.namespace,
        name: subject.name,
    })
}
