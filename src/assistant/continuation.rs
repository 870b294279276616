use super::extract::Extraction;
use crate::records::types::IdentifierSet;

/// What to do with the session's remembered identifiers after a turn.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Overwrite(IdentifierSet),
    Keep,
}

/// Explanation that replaces grounded facts when nothing can be looked up.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// Continuation was requested but the session remembers nothing.
    NoPriorContext,
    /// The extractor reply could not be decoded.
    ParseFailure(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Identifiers to ground this turn.
    pub effective: IdentifierSet,
    pub update: SessionUpdate,
    pub notice: Option<Notice>,
}

/// Combine this turn's extraction with the identifiers remembered from the
/// previous turn.
///
/// | extraction          | prior     | effective | session   |
/// |---------------------|-----------|-----------|-----------|
/// | identifiers / none  | any       | extracted | overwrite |
/// | continue            | non-empty | prior     | keep      |
/// | continue            | empty     | empty     | keep      |
/// | parse error         | any       | empty     | keep      |
pub fn resolve(extraction: &Extraction, prior: &IdentifierSet) -> Resolution {
    match extraction {
        Extraction::Identifiers(set) => Resolution {
            effective: set.clone(),
            update: SessionUpdate::Overwrite(set.clone()),
            notice: None,
        },
        Extraction::None => Resolution {
            effective: IdentifierSet::default(),
            update: SessionUpdate::Overwrite(IdentifierSet::default()),
            notice: None,
        },
        // The whole prior set is carried forward, both kinds together.
        Extraction::Continue if !prior.is_empty() => Resolution {
            effective: prior.clone(),
            update: SessionUpdate::Keep,
            notice: None,
        },
        Extraction::Continue => Resolution {
            effective: IdentifierSet::default(),
            update: SessionUpdate::Keep,
            notice: Some(Notice::NoPriorContext),
        },
        Extraction::ParseError(reason) => Resolution {
            effective: IdentifierSet::default(),
            update: SessionUpdate::Keep,
            notice: Some(Notice::ParseFailure(reason.clone())),
        },
    }
}
