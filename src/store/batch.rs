//! Atomic obsel batches.

use crate::error::{Result, TraceError};
use crate::types::{Attributes, Obsel, ObselId, Timestamp, TraceId, TraceModel};

/// An obsel as submitted by a producer, before its type reference is resolved
/// against the trace model.
///
/// ```
/// use tracekit::ObselDraft;
///
/// let draft = ObselDraft::new("#click", 10)
///     .id("o1")
///     .end(12)
///     .subject("alice")
///     .attribute("button", "left");
/// assert_eq!(draft.begin(), 10);
/// ```
#[derive(Debug, Clone)]
pub struct ObselDraft {
    id: Option<ObselId>,
    obsel_type: String,
    begin: Timestamp,
    end: Option<Timestamp>,
    subject: Option<String>,
    attributes: Attributes,
}

impl ObselDraft {
    pub fn new(obsel_type: impl Into<String>, begin: Timestamp) -> Self {
        Self {
            id: None,
            obsel_type: obsel_type.into(),
            begin,
            end: None,
            subject: None,
            attributes: Attributes::new(),
        }
    }

    pub fn id(mut self, id: impl Into<ObselId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn end(mut self, end: Timestamp) -> Self {
        self.end = Some(end);
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn begin(&self) -> Timestamp {
        self.begin
    }

    /// Turn the draft into an obsel of `trace`.
    ///
    /// Missing ids are generated, missing subjects fall back to
    /// `default_subject`, and the type reference must name a type of `model`.
    pub(crate) fn resolve(
        self,
        trace: &TraceId,
        model: &TraceModel,
        default_subject: Option<&str>,
    ) -> Result<Obsel> {
        let obsel_type = model
            .resolve(&self.obsel_type)
            .ok_or_else(|| TraceError::UnknownObselType {
                obsel_type: self.obsel_type.clone(),
                model: model.uri().to_string(),
            })?;

        let id = self
            .id
            .unwrap_or_else(|| ObselId::new(format!("{}o-{}", trace, uuid::Uuid::new_v4())));
        let subject = self.subject.or_else(|| default_subject.map(str::to_string));

        let mut builder = Obsel::builder(id, obsel_type, self.begin)
            .maybe_subject(subject)
            .attributes(self.attributes);
        if let Some(end) = self.end {
            builder = builder.end(end);
        }
        Ok(builder.build()?)
    }
}

/// Atomic batch. All operations succeed or all fail.
///
/// Filled by the closure passed to [`crate::TraceBase::edit`].
#[derive(Debug, Default)]
pub struct ObselBatch {
    operations: Vec<BatchOperation>,
}

#[derive(Debug, Clone)]
enum BatchOperation {
    Add(ObselDraft),
    Remove(ObselId),
}

impl ObselBatch {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, draft: ObselDraft) -> &mut Self {
        self.operations.push(BatchOperation::Add(draft));
        self
    }

    pub fn remove(&mut self, id: impl Into<ObselId>) -> &mut Self {
        self.operations.push(BatchOperation::Remove(id.into()));
        self
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub(crate) fn into_parts(self) -> (Vec<ObselDraft>, Vec<ObselId>) {
        let mut adds = Vec::new();
        let mut removes = Vec::new();
        for operation in self.operations {
            match operation {
                BatchOperation::Add(draft) => adds.push(draft),
                BatchOperation::Remove(id) => removes.push(id),
            }
        }
        (adds, removes)
    }
}
