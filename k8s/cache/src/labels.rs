//! The virtual metadata vocabulary.
//!
//! Snapshot records are per-subject copies of the source namespace object,
//! extended with labels and annotations that do not exist on the cluster.
//! External consumers depend on these identifiers; they are stable.

use tenant_lister_core::Subject;
use tenant_lister_k8s_api::Namespace;

/// Domain prefixing every virtual label and annotation.
pub const VIRTUAL_DOMAIN: &str = "virtual.tenant-lister.dev";

/// Label carrying the lowercased kind of the subject that granted access.
pub const ACCESS_LABEL: &str = "virtual.tenant-lister.dev/access";

/// Label carrying the namespace's visibility; identical on every record
/// pointing at the same namespace within one snapshot.
pub const VISIBILITY_LABEL: &str = "virtual.tenant-lister.dev/visibility";

pub const VISIBILITY_AUTHENTICATED: &str = "authenticated";
pub const VISIBILITY_PRIVATE: &str = "private";

/// Annotation carrying the subject's name.
pub const SUBJECT_NAME_ANNOTATION: &str = "virtual.tenant-lister.dev/subject-name";

/// Annotation carrying the subject's namespace; service accounts only.
pub const SUBJECT_NAMESPACE_ANNOTATION: &str = "virtual.tenant-lister.dev/subject-namespace";

/// Builds the enriched copy of `ns` stored under `subject`.
///
/// The copy owns its metadata maps so later snapshot consumers can never
/// reach back into the watch-fed source object.
pub(crate) fn enriched_copy(ns: &Namespace, subject: &Subject, authenticated: bool) -> Namespace {
    let mut ns = ns.clone();

    let labels = ns.metadata.labels.get_or_insert_with(Default::default);
    labels.insert(
        ACCESS_LABEL.to_string(),
        subject.kind.access_label().to_string(),
    );
    let visibility = if authenticated {
        VISIBILITY_AUTHENTICATED
    } else {
        VISIBILITY_PRIVATE
    };
    labels.insert(VISIBILITY_LABEL.to_string(), visibility.to_string());

    let annotations = ns.metadata.annotations.get_or_insert_with(Default::default);
    annotations.insert(SUBJECT_NAME_ANNOTATION.to_string(), subject.name.clone());
    if let Some(subject_ns) = &subject.namespace {
        annotations.insert(SUBJECT_NAMESPACE_ANNOTATION.to_string(), subject_ns.clone());
    }

    ns
}
