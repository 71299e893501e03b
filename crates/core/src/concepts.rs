//! Concept dictionary access and external code resolution.
//!
//! Laboratory systems code their results against external vocabularies (LOINC, SNOMED CT,
//! local lab code lists). The local record store keeps a registry of concept sources, each
//! identified by a coding-system URL, and mappings from `(source, code)` to local concepts.
//!
//! The registry belongs to the record store. This module only defines the collaborator trait
//! ([`ConceptDictionary`]) and a thin, side-effect free resolver over it
//! ([`ConceptResolver`]). The resolver is constructed with its dictionary; nothing is looked up
//! from ambient state at call time.

use crate::{SyncError, SyncResult};
use fhir::CodingData;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identifier of a local concept.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConceptId(pub u32);

impl fmt::Display for ConceptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Datatype of the values a concept accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConceptDatatype {
    Coded,
    Numeric,
    Boolean,
    Text,
    Datetime,
}

/// A local clinical concept. Immutable reference data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Concept {
    pub id: ConceptId,
    pub name: String,
    pub datatype: ConceptDatatype,
    /// Child concepts when this concept is a panel.
    pub set_members: Vec<ConceptId>,
}

impl Concept {
    pub fn new(id: ConceptId, name: impl Into<String>, datatype: ConceptDatatype) -> Self {
        Self {
            id,
            name: name.into(),
            datatype,
            set_members: Vec::new(),
        }
    }

    pub fn with_set_members(mut self, members: impl IntoIterator<Item = ConceptId>) -> Self {
        self.set_members = members.into_iter().collect();
        self
    }

    /// A concept with set members is a panel.
    pub fn is_panel(&self) -> bool {
        !self.set_members.is_empty()
    }
}

/// A named external vocabulary registered in the local dictionary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConceptSource {
    pub name: String,
    pub url: String,
}

/// Concept dictionary collaborator provided by the clinical record store.
///
/// Lookups return `Ok(None)` for misses; errors are reserved for infrastructure failures.
pub trait ConceptDictionary: Send + Sync {
    /// Finds the concept source registered for a coding-system URL.
    fn find_concept_source_by_url(&self, url: &str) -> SyncResult<Option<ConceptSource>>;

    /// Finds the local concept mapped to `code` within the named source.
    fn find_concept_by_mapping(&self, code: &str, source_name: &str)
        -> SyncResult<Option<Concept>>;

    fn get_concept(&self, id: ConceptId) -> SyncResult<Option<Concept>>;
}

/// Outcome of resolving an external code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConceptResolution {
    Mapped(Concept),
    /// No local concept is registered for the code. Callers skip the affected data.
    NotMapped,
}

impl ConceptResolution {
    pub fn into_concept(self) -> Option<Concept> {
        match self {
            ConceptResolution::Mapped(concept) => Some(concept),
            ConceptResolution::NotMapped => None,
        }
    }
}

/// Resolves external `(system URL, code)` pairs to local concepts.
#[derive(Clone)]
pub struct ConceptResolver {
    dictionary: Arc<dyn ConceptDictionary>,
}

impl ConceptResolver {
    pub fn new(dictionary: Arc<dyn ConceptDictionary>) -> Self {
        Self { dictionary }
    }

    /// Resolves an externally coded term.
    ///
    /// Empty inputs, unknown coding systems and unmapped codes all yield
    /// [`ConceptResolution::NotMapped`].
    ///
    /// # Errors
    ///
    /// Propagates dictionary infrastructure failures only.
    pub fn resolve(&self, system_url: &str, code: &str) -> SyncResult<ConceptResolution> {
        let system_url = system_url.trim();
        let code = code.trim();
        if system_url.is_empty() || code.is_empty() {
            tracing::debug!(system_url, code, "empty coding cannot be mapped");
            return Ok(ConceptResolution::NotMapped);
        }

        let Some(source) = self.dictionary.find_concept_source_by_url(system_url)? else {
            tracing::debug!(system_url, code, "unknown coding system");
            return Ok(ConceptResolution::NotMapped);
        };

        match self.dictionary.find_concept_by_mapping(code, &source.name)? {
            Some(concept) => Ok(ConceptResolution::Mapped(concept)),
            None => {
                tracing::debug!(system_url, code, source = %source.name, "code not mapped");
                Ok(ConceptResolution::NotMapped)
            }
        }
    }

    /// Resolves an optional coding taken from a bundle; a missing coding is `NotMapped`.
    pub fn resolve_coding(&self, coding: Option<&CodingData>) -> SyncResult<ConceptResolution> {
        match coding {
            Some(coding) => self.resolve(&coding.system, &coding.code),
            None => Ok(ConceptResolution::NotMapped),
        }
    }

    /// Fetches a concept that must exist in the dictionary.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] when the concept is missing.
    pub fn concept(&self, id: ConceptId) -> SyncResult<Concept> {
        self.dictionary
            .get_concept(id)?
            .ok_or_else(|| SyncError::not_found("concept", id))
    }
}
