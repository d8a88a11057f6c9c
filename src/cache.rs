//! Per-signature memo of the verbatim/filtered decision.
//!
//! A decision is computed once per [`Signature`] and never invalidated for
//! the lifetime of a copy run.  Storing the value already cached is a no-op;
//! storing the opposite value means the signature computation is broken, so
//! it asserts in debug builds and otherwise surfaces as [`DecisionConflict`].

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

use crate::record::{RecordInfo, RecordKind, StreamId};

/// The class of records that share one decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature {
    pub stream_id:      StreamId,
    pub kind:           RecordKind,
    pub format_version: u32,
}

impl Signature {
    pub fn new(stream_id: StreamId, kind: RecordKind, format_version: u32) -> Self {
        Self { stream_id, kind, format_version }
    }

    pub fn of(info: &RecordInfo) -> Self {
        Self::new(info.stream_id, info.kind, info.format_version)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/v{}", self.stream_id, self.kind, self.format_version)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("conflicting decision for {signature}: cached verbatim={cached}, attempted verbatim={attempted}")]
pub struct DecisionConflict {
    pub signature: Signature,
    pub cached:    bool,
    pub attempted: bool,
}

pub trait DecisionStore {
    fn lookup(&self, signature: &Signature) -> Option<bool>;
    fn store(&mut self, signature: Signature, verbatim: bool) -> Result<(), DecisionConflict>;
}

impl<T: DecisionStore + ?Sized> DecisionStore for &mut T {
    fn lookup(&self, signature: &Signature) -> Option<bool> {
        (**self).lookup(signature)
    }
    fn store(&mut self, signature: Signature, verbatim: bool) -> Result<(), DecisionConflict> {
        (**self).store(signature, verbatim)
    }
}

fn confirm(signature: Signature, cached: bool, attempted: bool) -> Result<(), DecisionConflict> {
    debug_assert_eq!(cached, attempted, "conflicting decision for {signature}");
    if cached == attempted {
        Ok(())
    } else {
        Err(DecisionConflict { signature, cached, attempted })
    }
}

// ── Single-worker cache ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct DecisionCache {
    decisions: HashMap<Signature, bool>,
}

impl DecisionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }
}

impl DecisionStore for DecisionCache {
    fn lookup(&self, signature: &Signature) -> Option<bool> {
        self.decisions.get(signature).copied()
    }

    fn store(&mut self, signature: Signature, verbatim: bool) -> Result<(), DecisionConflict> {
        match self.decisions.entry(signature) {
            Entry::Occupied(e) => confirm(signature, *e.get(), verbatim),
            Entry::Vacant(e)   => {
                e.insert(verbatim);
                Ok(())
            }
        }
    }
}

// ── Shared cache ─────────────────────────────────────────────────────────────

/// Cache shared by concurrent per-stream workers.  Two workers racing on the
/// first computation of a signature both compute the same value; the first
/// store wins and the second is a no-op.
#[derive(Debug, Default)]
pub struct SharedDecisionCache {
    decisions: RwLock<HashMap<Signature, bool>>,
}

impl SharedDecisionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.decisions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DecisionStore for &SharedDecisionCache {
    fn lookup(&self, signature: &Signature) -> Option<bool> {
        self.decisions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(signature)
            .copied()
    }

    fn store(&mut self, signature: Signature, verbatim: bool) -> Result<(), DecisionConflict> {
        let mut decisions = self.decisions.write().unwrap_or_else(PoisonError::into_inner);
        match decisions.entry(signature) {
            Entry::Occupied(e) => confirm(signature, *e.get(), verbatim),
            Entry::Vacant(e)   => {
                e.insert(verbatim);
                Ok(())
            }
        }
    }
}
