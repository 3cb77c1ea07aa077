//! Harvested metadata records and the updates written back for them.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Record store field names.
pub mod fields {
    pub const ID: &str = "id";
    pub const DATA_PROVIDER: &str = "dataProvider";
    pub const HARVESTER_ROOT: &str = "_harvesterRoot";
    pub const COMPONENT_PROFILE_ID: &str = "_componentProfileId";
    pub const HIERARCHY_WEIGHT: &str = "_hierarchyWeight";
    pub const FILE_NAME: &str = "_fileName";

    pub const INEO_RECORD: &str = "ineo_record";
    pub const FAIR_SCORE: &str = "fair_score";
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record document is not a JSON object")]
    NotAnObject,
    #[error("invalid record {id}")]
    Invalid {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// One harvested record as read from the record store.
///
/// Only the fields the labeller looks at are typed; the whole source
/// document is kept in `facets` for the assessment bindings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(rename = "dataProvider", default)]
    pub data_provider: Option<String>,
    #[serde(rename = "_harvesterRoot", default)]
    pub harvester_root: Option<String>,
    #[serde(rename = "_componentProfileId", default)]
    pub component_profile_id: Option<String>,
    #[serde(
        rename = "_hierarchyWeight",
        default,
        deserialize_with = "lenient_i64"
    )]
    pub hierarchy_weight: Option<i64>,
    #[serde(rename = "_fileName", default)]
    pub file_reference: Option<String>,
    #[serde(skip)]
    pub facets: Map<String, Value>,
}

impl Record {
    /// Minimal record with only an id, for building fixtures.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data_provider: None,
            harvester_root: None,
            component_profile_id: None,
            hierarchy_weight: None,
            file_reference: None,
            facets: Map::new(),
        }
    }

    /// Validate a raw store document.
    pub fn from_doc(doc: Value) -> Result<Self, RecordError> {
        let Value::Object(facets) = doc else {
            return Err(RecordError::NotAnObject);
        };
        let id = facets
            .get(fields::ID)
            .map(|v| v.as_str().map(str::to_owned).unwrap_or_else(|| v.to_string()))
            .unwrap_or_else(|| "<missing id>".to_string());
        let mut record: Record = serde_json::from_value(Value::Object(facets.clone()))
            .map_err(|source| RecordError::Invalid { id, source })?;
        record.facets = facets;
        Ok(record)
    }
}

/// Hierarchy weights arrive as integers, but accept numeric strings too.
fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Weight {
        Int(i64),
        Text(String),
    }

    match Option::<Weight>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Weight::Int(n)) => Ok(Some(n)),
        Some(Weight::Text(s)) => s.trim().parse().map(Some).map_err(|_| {
            serde::de::Error::custom(format!("hierarchy weight {s:?} is not an integer"))
        }),
    }
}

/// Labelling result for one record, written back to the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdatePayload {
    pub id: String,
    pub is_member: bool,
    /// Present only when an assessment ran for this record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assessment_score: Option<f64>,
}

impl UpdatePayload {
    pub fn membership(id: impl Into<String>, is_member: bool) -> Self {
        Self {
            id: id.into(),
            is_member,
            assessment_score: None,
        }
    }

    pub fn assessed(id: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            is_member: true,
            assessment_score: Some(score),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_doc_reads_typed_fields_and_keeps_facets() {
        let doc = json!({
            "id": "r1",
            "dataProvider": "DANS",
            "_harvesterRoot": "CLARIN Partners",
            "_componentProfileId": "clarin.eu:cr1:p_1",
            "_hierarchyWeight": 2,
            "_fileName": "/data/r1.xml",
            "name": "Some corpus"
        });
        let record = Record::from_doc(doc).unwrap();
        assert_eq!(record.id, "r1");
        assert_eq!(record.data_provider.as_deref(), Some("DANS"));
        assert_eq!(record.harvester_root.as_deref(), Some("CLARIN Partners"));
        assert_eq!(record.component_profile_id.as_deref(), Some("clarin.eu:cr1:p_1"));
        assert_eq!(record.hierarchy_weight, Some(2));
        assert_eq!(record.file_reference.as_deref(), Some("/data/r1.xml"));
        assert_eq!(record.facets["name"], "Some corpus");
    }

    #[test]
    fn optional_fields_default_to_none() {
        let record = Record::from_doc(json!({"id": "r2"})).unwrap();
        assert_eq!(record, Record { facets: record.facets.clone(), ..Record::new("r2") });
    }

    #[test]
    fn hierarchy_weight_accepts_numeric_string() {
        let record = Record::from_doc(json!({"id": "r3", "_hierarchyWeight": "1"})).unwrap();
        assert_eq!(record.hierarchy_weight, Some(1));

        let err = Record::from_doc(json!({"id": "r3", "_hierarchyWeight": "deep"}));
        assert!(matches!(err, Err(RecordError::Invalid { .. })));
    }

    #[test]
    fn missing_id_is_invalid() {
        let err = Record::from_doc(json!({"dataProvider": "DANS"})).unwrap_err();
        assert!(matches!(err, RecordError::Invalid { .. }));
        assert!(matches!(Record::from_doc(json!([1, 2])), Err(RecordError::NotAnObject)));
    }

    #[test]
    fn payload_omits_missing_score() {
        let json = serde_json::to_value(UpdatePayload::membership("r1", false)).unwrap();
        assert_eq!(json, json!({"id": "r1", "is_member": false}));

        let json = serde_json::to_value(UpdatePayload::assessed("r1", 0.75)).unwrap();
        assert_eq!(json, json!({"id": "r1", "is_member": true, "assessment_score": 0.75}));
    }
}
