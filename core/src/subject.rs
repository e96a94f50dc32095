use crate::{GROUP_SYSTEM_AUTHENTICATED, RBAC_API_GROUP, SERVICE_ACCOUNT_USERNAME_PREFIX};

/// An authorization principal: the key of the access snapshot.
///
/// Subjects compare by structural equality of all four fields. The derived
/// total order (lexicographic over the fields in declaration order) exists
/// solely to make duplicates adjacent before deduplication; nothing else
/// depends on it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subject {
    pub api_group: String,
    pub kind: SubjectKind,
    /// Only meaningful for service accounts.
    pub namespace: Option<String>,
    pub name: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubjectKind {
    User,
    Group,
    ServiceAccount,
}

// === impl Subject ===

impl Subject {
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            api_group: RBAC_API_GROUP.to_string(),
            kind: SubjectKind::User,
            namespace: None,
            name: name.into(),
        }
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self {
            api_group: RBAC_API_GROUP.to_string(),
            kind: SubjectKind::Group,
            namespace: None,
            name: name.into(),
        }
    }

    /// Service-account subjects carry no API group.
    pub fn service_account(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            api_group: String::new(),
            kind: SubjectKind::ServiceAccount,
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Derives the subjects matched by an authenticated identity.
    ///
    /// The username maps to a `User` subject unless it follows the
    /// `system:serviceaccount:<namespace>:<name>` convention, in which case it
    /// maps to the corresponding `ServiceAccount` subject. Each group maps to
    /// a `Group` subject.
    pub fn from_identity<'a>(
        username: &str,
        groups: impl IntoIterator<Item = &'a str>,
    ) -> Vec<Self> {
        let mut subjects = vec![Self::from_username(username)];
        subjects.extend(groups.into_iter().map(Self::group));
        subjects
    }

    fn from_username(username: &str) -> Self {
        if let Some(rest) = username.strip_prefix(SERVICE_ACCOUNT_USERNAME_PREFIX) {
            if let Some((namespace, name)) = rest.split_once(':') {
                return Self::service_account(namespace, name);
            }
        }
        Self::user(username)
    }

    /// Whether this is the well-known `system:authenticated` group.
    pub fn is_system_authenticated(&self) -> bool {
        self.kind == SubjectKind::Group
            && self.api_group == RBAC_API_GROUP
            && self.name == GROUP_SYSTEM_AUTHENTICATED
    }

    /// The `apiGroup/kind` pair, as used in metric labels.
    pub fn group_kind(&self) -> String {
        format!("{}/{}", self.api_group, self.kind)
    }
}

// === impl SubjectKind ===

impl SubjectKind {
    /// The lowercased kind, as recorded in the access virtual label.
    pub fn access_label(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Group => "group",
            Self::ServiceAccount => "serviceaccount",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Group => "Group",
            Self::ServiceAccount => "ServiceAccount",
        }
    }
}

impl std::fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubjectKind {
    type Err = UnknownSubjectKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "User" => Ok(Self::User),
            "Group" => Ok(Self::Group),
            "ServiceAccount" => Ok(Self::ServiceAccount),
            _ => Err(UnknownSubjectKind(s.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownSubjectKind(pub String);

impl std::fmt::Display for UnknownSubjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown subject kind {}", self.0)
    }
}

impl std::error::Error for UnknownSubjectKind {}
