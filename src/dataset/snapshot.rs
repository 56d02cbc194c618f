use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::dataset::model::{
    AppSettings, Certificate, Client, ClientEquipment, CompanyProfile, Delivery, Equipment,
    Expense, FinancialRecord, Inspection, License, RecurringPayable,
};
use crate::error::{SNAPSHOT_INVALID, SNAPSHOT_MISSING_FIELD};
use crate::AppError;

/// Top-level fields an import must carry.
pub const REQUIRED_FIELDS: &[&str] = &["clients", "equipment"];

/// Bulk import/export document: every collection plus company profile and
/// application settings. Absent fields decode to empty/default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Snapshot {
    pub clients: Vec<Client>,
    pub equipment: Vec<Equipment>,
    pub client_equipment: Vec<ClientEquipment>,
    pub inspections: Vec<Inspection>,
    pub financial: Vec<FinancialRecord>,
    pub certificates: Vec<Certificate>,
    pub licenses: Vec<License>,
    pub deliveries: Vec<Delivery>,
    pub expenses: Vec<Expense>,
    pub recurring_payables: Vec<RecurringPayable>,
    pub company_profile: CompanyProfile,
    pub app_settings: AppSettings,
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot must be a JSON object")]
    NotAnObject,
    #[error("snapshot is missing required field `{0}`")]
    MissingField(&'static str),
    #[error("snapshot field `{field}` is malformed: {source}")]
    InvalidField {
        field: String,
        #[source]
        source: serde_json::Error,
    },
}

impl From<SnapshotError> for AppError {
    fn from(err: SnapshotError) -> Self {
        let message = err.to_string();
        match err {
            SnapshotError::NotAnObject => AppError::new(SNAPSHOT_INVALID, message),
            SnapshotError::MissingField(field) => {
                AppError::new(SNAPSHOT_MISSING_FIELD, message).with_context("field", field)
            }
            SnapshotError::InvalidField { field, source } => AppError::new(SNAPSHOT_INVALID, message)
                .with_context("field", field)
                .with_cause(source),
        }
    }
}

impl Snapshot {
    /// Validate and decode an externally supplied document.
    ///
    /// Nothing is applied here; callers mutate state only after this succeeds.
    /// `null` on an optional field counts as absent.
    pub fn from_value(value: Value) -> Result<Self, SnapshotError> {
        let Value::Object(mut map) = value else {
            return Err(SnapshotError::NotAnObject);
        };

        for field in REQUIRED_FIELDS {
            match map.get(*field) {
                None | Some(Value::Null) => return Err(SnapshotError::MissingField(field)),
                Some(_) => {}
            }
        }
        map.retain(|_, value| !value.is_null());

        serde_json::from_value(Value::Object(map.clone())).map_err(|source| {
            SnapshotError::InvalidField {
                field: locate_invalid_field(&map).unwrap_or_else(|| "snapshot".to_string()),
                source,
            }
        })
    }

    pub fn to_value(&self) -> Result<Value, AppError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Decode each top-level field on its own to name the one that fails.
fn locate_invalid_field(map: &Map<String, Value>) -> Option<String> {
    map.iter()
        .find(|(key, value)| {
            let probe = Map::from_iter([((*key).clone(), (*value).clone())]);
            serde_json::from_value::<Snapshot>(Value::Object(probe)).is_err()
        })
        .map(|(key, _)| key.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absent_optional_fields_default() {
        let snapshot = Snapshot::from_value(json!({
            "clients": [{ "id": "cli-1", "name": "Acme" }],
            "equipment": [],
            "licenses": null
        }))
        .unwrap();
        assert_eq!(snapshot.clients.len(), 1);
        assert!(snapshot.inspections.is_empty());
        assert!(snapshot.licenses.is_empty());
        assert_eq!(snapshot.app_settings, AppSettings::default());
    }

    #[test]
    fn missing_required_field_is_reported_by_name() {
        let err = Snapshot::from_value(json!({ "clients": [] })).unwrap_err();
        assert!(matches!(err, SnapshotError::MissingField("equipment")));
        let app: AppError = err.into();
        assert_eq!(app.code(), SNAPSHOT_MISSING_FIELD);
        assert_eq!(app.context().get("field"), Some(&"equipment".to_string()));
    }

    #[test]
    fn wrong_shape_names_the_offending_field() {
        let err = Snapshot::from_value(json!({
            "clients": [],
            "equipment": [],
            "inspections": { "not": "a list" }
        }))
        .unwrap_err();
        match err {
            SnapshotError::InvalidField { field, .. } => assert_eq!(field, "inspections"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn non_object_is_rejected() {
        let err = Snapshot::from_value(json!([1, 2, 3])).unwrap_err();
        assert_eq!(AppError::from(err).code(), SNAPSHOT_INVALID);
    }

    #[test]
    fn export_uses_camel_case_field_names() {
        let value = Snapshot::default().to_value().unwrap();
        let obj = value.as_object().unwrap();
        assert!(obj.contains_key("clientEquipment"));
        assert!(obj.contains_key("recurringPayables"));
        assert!(obj.contains_key("companyProfile"));
        assert!(obj.contains_key("appSettings"));
    }
}
