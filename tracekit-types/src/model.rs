use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Type tag of an obsel: the full URI of a type defined by a [`TraceModel`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObselType(String);

impl ObselType {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part after the fragment marker (or last path segment).
    ///
    /// ```
    /// use tracekit_types::model::ObselType;
    ///
    /// assert_eq!(ObselType::new("http://a.b/m#otA").local_name(), "otA");
    /// assert_eq!(ObselType::new("http://a.b/m/otB").local_name(), "otB");
    /// ```
    pub fn local_name(&self) -> &str {
        match self.0.rfind(['#', '/']) {
            Some(pos) => &self.0[pos + 1..],
            None => &self.0,
        }
    }
}

impl fmt::Display for ObselType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Vocabulary of obsel types a trace draws from.
///
/// Type references may be absolute URIs or references relative to the model
/// URI, so `#otA` and `http://example.org/m#otA` name the same type in the
/// model `http://example.org/m`.
///
/// # Examples
///
/// ```
/// use tracekit_types::model::TraceModel;
///
/// let mut model = TraceModel::new("http://example.org/m");
/// let ot = model.add_obsel_type("#otA");
/// assert_eq!(ot.as_str(), "http://example.org/m#otA");
/// assert_eq!(model.resolve("#otA"), Some(ot.clone()));
/// assert_eq!(model.resolve("http://example.org/m#otA"), Some(ot));
/// assert_eq!(model.resolve("#otZ"), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceModel {
    uri: String,
    obsel_types: BTreeSet<ObselType>,
}

impl TraceModel {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            obsel_types: BTreeSet::new(),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Define an obsel type from a (possibly relative) reference and return
    /// its full form. Defining an existing type again is a no-op.
    pub fn add_obsel_type(&mut self, reference: &str) -> ObselType {
        let obsel_type = ObselType(resolve_reference(&self.uri, reference));
        self.obsel_types.insert(obsel_type.clone());
        obsel_type
    }

    /// Resolve a reference to one of this model's types.
    pub fn resolve(&self, reference: &str) -> Option<ObselType> {
        let candidate = ObselType(resolve_reference(&self.uri, reference));
        self.obsel_types.contains(&candidate).then_some(candidate)
    }

    pub fn contains(&self, obsel_type: &ObselType) -> bool {
        self.obsel_types.contains(obsel_type)
    }

    pub fn obsel_types(&self) -> impl Iterator<Item = &ObselType> {
        self.obsel_types.iter()
    }

    pub fn len(&self) -> usize {
        self.obsel_types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.obsel_types.is_empty()
    }
}

/// Resolve `reference` against `base`.
///
/// Absolute references are returned unchanged. A fragment-only reference
/// replaces the fragment of `base`; an absolute path keeps the scheme and
/// authority of `base`; any other relative reference is joined against the
/// directory of `base`.
///
/// ```
/// use tracekit_types::model::resolve_reference;
///
/// assert_eq!(resolve_reference("http://ns1.com/#", "#foo"), "http://ns1.com/#foo");
/// assert_eq!(resolve_reference("http://ns2.net/#", "http://ns1.com/#foo"), "http://ns1.com/#foo");
/// assert_eq!(resolve_reference("http://a.b/c/d", "e"), "http://a.b/c/e");
/// assert_eq!(resolve_reference("http://a.b/c/d", "/e"), "http://a.b/e");
/// ```
pub fn resolve_reference(base: &str, reference: &str) -> String {
    if has_scheme(reference) {
        return reference.to_string();
    }

    let without_fragment = base.split('#').next().unwrap_or(base);
    if reference.is_empty() {
        return without_fragment.to_string();
    }
    if reference.starts_with('#') {
        return format!("{}{}", without_fragment, reference);
    }

    let without_query = without_fragment.split('?').next().unwrap_or(without_fragment);
    if reference.starts_with('/') {
        let root = authority_end(without_query).map_or(without_query, |end| &without_query[..end]);
        return format!("{}{}", root, reference);
    }

    match without_query.rfind('/') {
        Some(pos) => format!("{}{}", &without_query[..=pos], reference),
        None => reference.to_string(),
    }
}

fn has_scheme(reference: &str) -> bool {
    let Some(colon) = reference.find(':') else {
        return false;
    };
    let scheme = &reference[..colon];
    let mut chars = scheme.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Index where the path of an absolute URI starts.
fn authority_end(uri: &str) -> Option<usize> {
    let after_scheme = uri.find("://")? + 3;
    Some(
        uri[after_scheme..]
            .find('/')
            .map_or(uri.len(), |pos| after_scheme + pos),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS1: &str = "http://ns1.com/#";
    const NS2: &str = "http://ns2.net/#";

    #[test]
    fn test_absolute_reference_ignores_base() {
        assert_eq!(resolve_reference(NS2, "http://ns1.com/#foo"), "http://ns1.com/#foo");
    }

    #[test]
    fn test_fragment_reference() {
        assert_eq!(resolve_reference(NS1, "#foo"), "http://ns1.com/#foo");
        assert_eq!(
            resolve_reference("http://a.b/m#old", "#new"),
            "http://a.b/m#new"
        );
    }

    #[test]
    fn test_relative_path_reference() {
        assert_eq!(resolve_reference("http://a.b/c/d?q#f", "e"), "http://a.b/c/e");
        assert_eq!(resolve_reference("http://a.b", "/x"), "http://a.b/x");
        assert_eq!(resolve_reference("http://a.b/c/d", ""), "http://a.b/c/d");
    }

    #[test]
    fn test_model_alias_and_full_uri_agree() {
        let mut model = TraceModel::new("http://localhost/b/m");
        let full = model.add_obsel_type("#otA");
        assert_eq!(model.add_obsel_type("http://localhost/b/m#otA"), full);
        assert_eq!(model.len(), 1);
        assert!(model.contains(&full));
        assert_eq!(full.local_name(), "otA");
    }

    #[test]
    fn test_unknown_type_does_not_resolve() {
        let model = TraceModel::new("http://localhost/b/m");
        assert!(model.is_empty());
        assert_eq!(model.resolve("#nothing"), None);
    }
}
