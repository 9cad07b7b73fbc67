use crate::model::ObselType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Point in time of an obsel. Any ordinal works as long as it is comparable;
/// producers usually store milliseconds.
pub type Timestamp = i64;

/// Free-form obsel attributes.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Identity of an obsel (a URI or any opaque string unique within its base).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObselId(String);

impl ObselId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ObselId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ObselId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for ObselId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An observed, timestamped event.
///
/// Obsels are immutable once built. Raw obsels have an empty provenance;
/// obsels produced by a transformation list the source obsels that caused them.
///
/// # Examples
///
/// ```
/// use tracekit_types::obsel::Obsel;
/// use tracekit_types::model::ObselType;
///
/// let ot = ObselType::new("http://example.org/m#open");
/// let obsel = Obsel::builder("o1", ot, 10).end(12).build().unwrap();
/// assert_eq!(obsel.begin(), 10);
/// assert_eq!(obsel.end(), 12);
/// assert!(!obsel.is_derived());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Obsel {
    id: ObselId,
    obsel_type: ObselType,
    begin: Timestamp,
    end: Timestamp,
    subject: Option<String>,
    #[serde(default)]
    attributes: Attributes,
    #[serde(default)]
    source_obsels: Vec<ObselId>,
}

impl Obsel {
    /// Start building an obsel. `end` defaults to `begin`.
    pub fn builder(id: impl Into<ObselId>, obsel_type: ObselType, begin: Timestamp) -> ObselBuilder {
        ObselBuilder {
            id: id.into(),
            obsel_type,
            begin,
            end: None,
            subject: None,
            attributes: Attributes::new(),
            source_obsels: Vec::new(),
        }
    }

    pub fn id(&self) -> &ObselId {
        &self.id
    }

    pub fn obsel_type(&self) -> &ObselType {
        &self.obsel_type
    }

    pub fn begin(&self) -> Timestamp {
        self.begin
    }

    pub fn end(&self) -> Timestamp {
        self.end
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&serde_json::Value> {
        self.attributes.get(key)
    }

    /// Provenance: the source obsels this obsel was derived from, in order.
    pub fn source_obsels(&self) -> &[ObselId] {
        &self.source_obsels
    }

    /// Whether this obsel was produced by a transformation.
    pub fn is_derived(&self) -> bool {
        !self.source_obsels.is_empty()
    }

    /// Build a copy of this obsel under a new id, recording `self` as its
    /// only source.
    pub fn derive_copy(&self, id: impl Into<ObselId>) -> Obsel {
        Obsel {
            id: id.into(),
            obsel_type: self.obsel_type.clone(),
            begin: self.begin,
            end: self.end,
            subject: self.subject.clone(),
            attributes: self.attributes.clone(),
            source_obsels: vec![self.id.clone()],
        }
    }
}

/// Error type for obsel construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObselError {
    /// The obsel ends before it begins
    EndBeforeBegin {
        id: ObselId,
        begin: Timestamp,
        end: Timestamp,
    },
}

impl fmt::Display for ObselError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndBeforeBegin { id, begin, end } => {
                write!(f, "obsel '{}' ends ({}) before it begins ({})", id, end, begin)
            }
        }
    }
}

impl std::error::Error for ObselError {}

/// Builder for [`Obsel`].
#[derive(Debug, Clone)]
pub struct ObselBuilder {
    id: ObselId,
    obsel_type: ObselType,
    begin: Timestamp,
    end: Option<Timestamp>,
    subject: Option<String>,
    attributes: Attributes,
    source_obsels: Vec<ObselId>,
}

impl ObselBuilder {
    pub fn end(mut self, end: Timestamp) -> Self {
        self.end = Some(end);
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn maybe_subject(mut self, subject: Option<String>) -> Self {
        self.subject = subject;
        self
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Set the provenance. Duplicate ids are dropped, first occurrence wins.
    pub fn source_obsels<I>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = ObselId>,
    {
        self.source_obsels.clear();
        for id in sources {
            if !self.source_obsels.contains(&id) {
                self.source_obsels.push(id);
            }
        }
        self
    }

    /// Finish the obsel. Fails when `end` precedes `begin`.
    pub fn build(self) -> Result<Obsel, ObselError> {
        let end = self.end.unwrap_or(self.begin);
        if end < self.begin {
            return Err(ObselError::EndBeforeBegin {
                id: self.id,
                begin: self.begin,
                end,
            });
        }
        Ok(Obsel {
            id: self.id,
            obsel_type: self.obsel_type,
            begin: self.begin,
            end,
            subject: self.subject,
            attributes: self.attributes,
            source_obsels: self.source_obsels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ot() -> ObselType {
        ObselType::new("http://example.org/m#ot")
    }

    #[test]
    fn test_end_defaults_to_begin() {
        let obsel = Obsel::builder("o", ot(), 7).build().unwrap();
        assert_eq!(obsel.begin(), 7);
        assert_eq!(obsel.end(), 7);
    }

    #[test]
    fn test_end_before_begin_is_rejected() {
        let err = Obsel::builder("o", ot(), 7).end(3).build().unwrap_err();
        assert_eq!(
            err,
            ObselError::EndBeforeBegin {
                id: ObselId::from("o"),
                begin: 7,
                end: 3,
            }
        );
        assert!(err.to_string().contains("before it begins"));
    }

    #[test]
    fn test_provenance_keeps_order_and_drops_duplicates() {
        let obsel = Obsel::builder("d", ot(), 0)
            .source_obsels(["b", "a", "b"].into_iter().map(ObselId::from))
            .build()
            .unwrap();
        assert_eq!(obsel.source_obsels(), &[ObselId::from("b"), ObselId::from("a")]);
        assert!(obsel.is_derived());
    }

    #[test]
    fn test_derive_copy_records_source() {
        let raw = Obsel::builder("raw", ot(), 3)
            .end(5)
            .subject("alice")
            .attribute("x", 1)
            .build()
            .unwrap();
        let copy = raw.derive_copy("copy");
        assert_eq!(copy.id().as_str(), "copy");
        assert_eq!(copy.source_obsels(), &[ObselId::from("raw")]);
        assert_eq!(copy.subject(), Some("alice"));
        assert_eq!(copy.attribute("x"), Some(&serde_json::json!(1)));
        assert_eq!((copy.begin(), copy.end()), (3, 5));
    }
}
