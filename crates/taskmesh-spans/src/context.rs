//! Client-side span tagging.
//!
//! Task-submission code opens nested, named scopes; every task submitted
//! inside a scope carries a [`SpanAnnotation`] naming the full tag path and
//! one freshly minted id per nesting level. The coordinator's registry
//! resolves that annotation into a chain of spans.
//!
//! The full id history is kept, not just the innermost id, because ancestors
//! that never receive tasks of their own could not be uniquely identified
//! otherwise.

use serde::{Deserialize, Serialize};

use taskmesh_metrics::SpanId;

use crate::error::{SpanError, SpanResult};

/// Span-path annotation carried on a task between submission and the
/// coordinator's first observation of the task.
///
/// Two parallel, equal-length, non-empty sequences: tag strings from
/// outermost to innermost, and the id minted for each nesting level.
/// Validity is enforced on construction and on deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawAnnotation")]
pub struct SpanAnnotation {
    name: Vec<String>,
    ids: Vec<SpanId>,
}

#[derive(Deserialize)]
struct RawAnnotation {
    name: Vec<String>,
    ids: Vec<SpanId>,
}

impl TryFrom<RawAnnotation> for SpanAnnotation {
    type Error = SpanError;

    fn try_from(raw: RawAnnotation) -> SpanResult<Self> {
        SpanAnnotation::new(raw.name, raw.ids)
    }
}

impl SpanAnnotation {
    pub fn new(name: Vec<String>, ids: Vec<SpanId>) -> SpanResult<Self> {
        if name.is_empty() || name.len() != ids.len() {
            return Err(SpanError::MalformedAnnotation {
                names: name.len(),
                ids: ids.len(),
            });
        }
        Ok(Self { name, ids })
    }

    /// Internal constructor for callers that uphold the length invariant
    /// structurally.
    pub(crate) fn from_parts(name: Vec<String>, ids: Vec<SpanId>) -> Self {
        debug_assert!(!name.is_empty() && name.len() == ids.len());
        Self { name, ids }
    }

    pub fn name(&self) -> &[String] {
        &self.name
    }

    pub fn ids(&self) -> &[SpanId] {
        &self.ids
    }

    /// Id of the innermost span on the path.
    pub fn leaf_id(&self) -> SpanId {
        self.ids[self.ids.len() - 1]
    }
}

/// The nesting context a client threads through its submission code.
///
/// `scope` appends one tag and one fresh id per entry, runs the given
/// closure, and pops them again on the way out. Closing and re-opening a
/// scope with the same tag text mints new ids and therefore produces a new
/// span instance on the coordinator.
#[derive(Debug, Default)]
pub struct SpanContextStack {
    name: Vec<String>,
    ids: Vec<SpanId>,
}

impl SpanContextStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a scope over `tags`, run `f` with the innermost span id, and
    /// close the scope again.
    ///
    /// Opening a scope with zero tags is a usage error reported immediately.
    pub fn scope<R>(
        &mut self,
        tags: &[&str],
        f: impl FnOnce(&mut Self, SpanId) -> R,
    ) -> SpanResult<R> {
        if tags.is_empty() {
            return Err(SpanError::EmptyTags);
        }
        let fresh: Vec<SpanId> = tags.iter().map(|_| SpanId::new()).collect();
        let innermost = fresh[fresh.len() - 1];
        self.name.extend(tags.iter().map(|t| (*t).to_string()));
        self.ids.extend(fresh);
        let out = f(self, innermost);
        self.name.truncate(self.name.len() - tags.len());
        self.ids.truncate(self.ids.len() - tags.len());
        Ok(out)
    }

    /// The annotation to stamp on tasks submitted right now, or `None`
    /// outside any scope.
    pub fn annotation(&self) -> Option<SpanAnnotation> {
        if self.name.is_empty() {
            None
        } else {
            Some(SpanAnnotation::from_parts(
                self.name.clone(),
                self.ids.clone(),
            ))
        }
    }

    /// Current nesting depth in tags.
    pub fn depth(&self) -> usize {
        self.name.len()
    }
}

/// A source-code attribution submitted by the client alongside its tasks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceCode {
    pub filename: String,
    pub line: u32,
    pub code: String,
}

impl SourceCode {
    pub fn new(
        filename: impl Into<String>,
        line: u32,
        code: impl Into<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            line,
            code: code.into(),
        }
    }
}
