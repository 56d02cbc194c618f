use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dataset::repo::Entity;
use crate::time::add_months_clamped;

/// Fields the UI stores that this layer does not interpret. They ride along
/// through decode/encode untouched.
pub type Extra = Map<String, Value>;

macro_rules! impl_entity {
    ( $( $ty:ident => ($collection:literal, $prefix:literal) ),+ $(,)? ) => {
        $(
            impl Entity for $ty {
                const COLLECTION: &'static str = $collection;
                const ID_PREFIX: &'static str = $prefix;

                fn id(&self) -> &str {
                    &self.id
                }

                fn set_id(&mut self, id: String) {
                    self.id = id;
                }
            }
        )+
    };
}

impl_entity! {
    Client => ("clients", "cli"),
    Equipment => ("equipment", "eq"),
    ClientEquipment => ("clientEquipment", "asset"),
    Inspection => ("inspections", "insp"),
    FinancialRecord => ("financial", "fin"),
    Certificate => ("certificates", "cert"),
    License => ("licenses", "lic"),
    Delivery => ("deliveries", "del"),
    Expense => ("expenses", "exp"),
    RecurringPayable => ("recurringPayables", "rpay"),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Client {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurring_plan: Option<RecurringPlan>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Monthly receivable agreed with a client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecurringPlan {
    pub monthly_amount: f64,
    pub total_installments: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle_start_date: Option<NaiveDate>,
    pub paid_installments: u32,
}

impl RecurringPlan {
    pub fn is_complete(&self) -> bool {
        self.paid_installments >= self.total_installments
    }

    /// Due date of the first unpaid installment. `None` once every
    /// installment has been paid or when the plan has no start date.
    pub fn next_due(&self) -> Option<NaiveDate> {
        if self.is_complete() {
            return None;
        }
        let start = self.cycle_start_date?;
        Some(add_months_clamped(start, self.paid_installments))
    }
}

/// Catalogue entry for a kind of equipment (extinguisher model, hydrant, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Equipment {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// A physical asset installed at a client's premises.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientEquipment {
    pub id: String,
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equipment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_service_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_service_date: Option<NaiveDate>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Status enums stored as plain strings. A name this layer does not know
/// decodes as `Other` and is written back unchanged, so one unexpected record
/// never makes a whole collection unreadable.
macro_rules! string_status {
    (
        $(#[$meta:meta])*
        $name:ident { $default:ident => $default_str:literal $(, $variant:ident => $str:literal)* $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub enum $name {
            #[default]
            $default,
            $($variant,)*
            Other(String),
        }

        impl $name {
            pub fn as_str(&self) -> &str {
                match self {
                    Self::$default => $default_str,
                    $(Self::$variant => $str,)*
                    Self::Other(raw) => raw.as_str(),
                }
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                match raw.as_str() {
                    $default_str => Self::$default,
                    $($str => Self::$variant,)*
                    _ => Self::Other(raw),
                }
            }
        }

        impl From<$name> for String {
            fn from(status: $name) -> Self {
                match status {
                    $name::Other(raw) => raw,
                    known => known.as_str().to_string(),
                }
            }
        }
    };
}

string_status! {
    InspectionStatus {
        Scheduled => "scheduled",
        InProgress => "inProgress",
        Approved => "approved",
        Rejected => "rejected",
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Inspection {
    pub id: String,
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inspector: Option<String>,
    pub status: InspectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

string_status! {
    FinancialStatus {
        Pending => "pending",
        Paid => "paid",
        Overdue => "overdue",
    }
}

/// A receivable owed by a client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FinancialRecord {
    pub id: String,
    pub client_id: String,
    pub description: String,
    pub amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_date: Option<NaiveDate>,
    pub status: FinancialStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installment_number: Option<u32>,
    #[serde(flatten)]
    pub extra: Extra,
}

string_status! {
    CertificateStatus {
        Active => "active",
        Revoked => "revoked",
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Certificate {
    pub id: String,
    pub client_id: String,
    pub inspection_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<NaiveDate>,
    pub status: CertificateStatus,
    #[serde(flatten)]
    pub extra: Extra,
}

/// An operating licence held by the company itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct License {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<NaiveDate>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Delivery {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_date: Option<NaiveDate>,
    pub delivered: bool,
    #[serde(flatten)]
    pub extra: Extra,
}

/// A payable. Expenses generated from a [`RecurringPayable`] carry its id and
/// the installment they settle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Expense {
    pub id: String,
    pub description: String,
    pub amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurring_payable_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installment_number: Option<u32>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecurringPayable {
    pub id: String,
    pub description: String,
    pub monthly_amount: f64,
    pub total_installments: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    pub paid_installments: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl RecurringPayable {
    pub fn is_complete(&self) -> bool {
        self.paid_installments >= self.total_installments
    }

    /// Due date of installment `number` (1-based), if the template has a
    /// start date.
    pub fn due_date_for(&self, number: u32) -> Option<NaiveDate> {
        self.start_date
            .map(|start| add_months_clamped(start, number.saturating_sub(1)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompanyProfile {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub currency: String,
    pub reminder_days_before_due: u32,
    pub notifications_enabled: bool,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            currency: "BRL".to_string(),
            reminder_days_before_due: 30,
            notifications_enabled: true,
            extra: Extra::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn unknown_fields_survive_a_round_trip() {
        let raw = json!({
            "id": "cli-1",
            "name": "Acme",
            "contactPerson": "Dana",
            "tags": ["vip"]
        });
        let client: Client = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(client.name, "Acme");
        assert_eq!(client.extra.get("contactPerson"), Some(&json!("Dana")));
        assert_eq!(serde_json::to_value(&client).unwrap(), raw);
    }

    #[test]
    fn legacy_records_without_status_decode_with_defaults() {
        let cert: Certificate = serde_json::from_value(json!({
            "id": "cert-1",
            "clientId": "cli-1",
            "inspectionId": "insp-1",
            "issueDate": "2025-03-01",
            "expiryDate": "2026-03-01"
        }))
        .unwrap();
        assert_eq!(cert.status, CertificateStatus::Active);

        let fin: FinancialRecord = serde_json::from_value(json!({
            "id": "fin-1",
            "clientId": "cli-1",
            "amount": 10.5,
            "dueDate": "2025-03-01"
        }))
        .unwrap();
        assert_eq!(fin.status, FinancialStatus::Pending);
    }

    #[test]
    fn unknown_status_is_kept_verbatim() {
        let raw = json!({ "id": "insp-2", "clientId": "cli-1", "status": "cancelled" });
        let inspection: Inspection = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(
            inspection.status,
            InspectionStatus::Other("cancelled".to_string())
        );
        assert_eq!(serde_json::to_value(&inspection).unwrap(), raw);
    }

    #[test]
    fn missing_dates_stay_missing() {
        let raw = json!({ "id": "fin-1", "clientId": "cli-1", "amount": 5.0, "status": "pending" });
        let fin: FinancialRecord = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(fin.due_date, None);
        let written = serde_json::to_value(&fin).unwrap();
        assert!(written.get("dueDate").is_none());
    }

    #[test]
    fn statuses_use_camel_case_names() {
        assert_eq!(
            serde_json::to_value(InspectionStatus::InProgress).unwrap(),
            json!("inProgress")
        );
        assert_eq!(serde_json::to_value(Theme::Dark).unwrap(), json!("dark"));
    }

    #[test]
    fn plan_next_due_clamps_and_stops_when_complete() {
        let mut plan = RecurringPlan {
            monthly_amount: 100.0,
            total_installments: 3,
            cycle_start_date: Some(ymd(2025, 1, 31)),
            paid_installments: 1,
        };
        assert_eq!(plan.next_due(), Some(ymd(2025, 2, 28)));
        plan.paid_installments = 3;
        assert_eq!(plan.next_due(), None);
        plan.paid_installments = 0;
        plan.cycle_start_date = None;
        assert_eq!(plan.next_due(), None);
    }

    #[test]
    fn payable_installments_are_one_based() {
        let payable = RecurringPayable {
            start_date: Some(ymd(2024, 1, 31)),
            total_installments: 12,
            ..Default::default()
        };
        assert_eq!(payable.due_date_for(1), Some(ymd(2024, 1, 31)));
        assert_eq!(payable.due_date_for(2), Some(ymd(2024, 2, 29)));
    }
}
