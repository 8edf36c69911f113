use bson::Document;

use crate::record::{ID_FIELD, SERVICE_FIELD};

/// Builder for document filters.
///
/// Matches documents by primary key, by owning service, or both. An empty
/// filter matches every document in the collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    /// Filter by `_id`.
    pub id: Option<String>,

    /// Filter by the `Service` field.
    pub service: Option<String>,
}

impl Filter {
    /// Creates a filter matching every document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a filter for a single primary key.
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    /// Creates a filter for documents owned by a service.
    pub fn by_service(service: impl Into<String>) -> Self {
        Self {
            service: Some(service.into()),
            ..Default::default()
        }
    }

    /// Filters by primary key.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Filters by owning service.
    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Returns true if the document satisfies every set criterion.
    pub fn matches(&self, document: &Document) -> bool {
        if let Some(ref id) = self.id
            && document.get_str(ID_FIELD).ok() != Some(id.as_str())
        {
            return false;
        }
        if let Some(ref service) = self.service
            && document.get_str(SERVICE_FIELD).ok() != Some(service.as_str())
        {
            return false;
        }
        true
    }

    /// Renders the filter as a BSON query document.
    pub fn to_document(&self) -> Document {
        let mut query = Document::new();
        if let Some(ref id) = self.id {
            query.insert(ID_FIELD, id.as_str());
        }
        if let Some(ref service) = self.service {
            query.insert(SERVICE_FIELD, service.as_str());
        }
        query
    }
}
