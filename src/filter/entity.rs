use std::collections::BTreeSet;

use serde_json::Value;

use crate::error::{codes, ApiError};
use crate::model::Model;

use super::fields::FieldSpec;

/// A compiled single-record request: the path-supplied identifier plus an
/// optional field projection.
#[derive(Debug, Clone)]
pub struct EntityFilter {
    id: String,
    fields: Option<FieldSpec>,
}

impl EntityFilter {
    /// Compile an entity-scoped request. The identifier comes from the
    /// route path and is mandatory.
    pub fn compile(
        attributes: &BTreeSet<String>,
        id: Option<&str>,
        pairs: &[(String, String)],
    ) -> Result<Self, ApiError> {
        let id = id.filter(|s| !s.is_empty()).ok_or_else(|| {
            ApiError::bad_argument("Missing entity identifier", codes::ENTITY_MISSING_ID)
        })?;
        let fields = pairs
            .iter()
            .find(|(k, _)| k == "fields")
            .map(|(_, csv)| FieldSpec::parse(csv, Some(attributes)))
            .transpose()?;
        Ok(Self { id: id.to_string(), fields })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn fields(&self) -> Option<&FieldSpec> {
        self.fields.as_ref()
    }

    /// Single-record lookup through the model boundary.
    pub async fn read(&self, model: &dyn Model) -> Result<Value, ApiError> {
        let row = model
            .find_by_pk(&self.id)
            .await
            .map_err(|e| {
                ApiError::internal("Entity lookup failed", codes::ENTITY_LOOKUP_FAILED).with_cause(e)
            })?;
        row.ok_or_else(|| ApiError::not_found(format!("No record with id '{}'", self.id)))
    }
}
