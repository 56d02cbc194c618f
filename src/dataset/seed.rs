use chrono::{Datelike, Months, NaiveDate};

use crate::dataset::model::{
    AppSettings, Certificate, CertificateStatus, Client, ClientEquipment, CompanyProfile,
    Delivery, Equipment, Expense, FinancialRecord, FinancialStatus, Inspection, InspectionStatus,
    License, RecurringPayable, RecurringPlan,
};
use crate::dataset::repo::Entity;
use crate::dataset::snapshot::Snapshot;
use crate::id::new_prefixed_id;
use crate::namespace::Namespace;
use crate::time::{add_months_clamped, add_one_year, today};

/// Decides what, if anything, a namespace receives on its first load.
pub trait SeedProvider: Send + Sync {
    fn seed_for(&self, namespace: &Namespace) -> Option<Snapshot>;
}

/// Never seeds; every namespace starts empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSeed;

impl SeedProvider for NoSeed {
    fn seed_for(&self, _namespace: &Namespace) -> Option<Snapshot> {
        None
    }
}

/// Seeds the demonstration dataset for a configured set of identities.
#[derive(Debug, Clone)]
pub struct DemoSeed {
    identities: Vec<String>,
}

impl DemoSeed {
    pub fn new<I, S>(identities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            identities: identities.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_demo(&self, namespace: &Namespace) -> bool {
        match namespace {
            Namespace::User(id) => self.identities.iter().any(|demo| demo == id),
            Namespace::Guest => false,
        }
    }
}

impl SeedProvider for DemoSeed {
    fn seed_for(&self, namespace: &Namespace) -> Option<Snapshot> {
        self.is_demo(namespace).then(|| demo_snapshot(today()))
    }
}

fn with_id<E: Entity>(mut entity: E) -> E {
    entity.set_id(new_prefixed_id(E::ID_PREFIX));
    entity
}

/// The fixed demonstration dataset, dated relative to `today`.
pub fn demo_snapshot(today: NaiveDate) -> Snapshot {
    let month_start = today.with_day(1).unwrap_or(today);
    let last_month = month_start
        .checked_sub_months(Months::new(1))
        .unwrap_or(month_start);

    let harbor = with_id(Client {
        name: "Harbor Logistics".to_string(),
        document: Some("12.345.678/0001-90".to_string()),
        email: Some("facilities@harborlogistics.example".to_string()),
        phone: Some("+55 11 4000-1000".to_string()),
        address: Some("Av. Portuaria 1200, Santos".to_string()),
        recurring_plan: Some(RecurringPlan {
            monthly_amount: 850.0,
            total_installments: 12,
            cycle_start_date: Some(last_month),
            paid_installments: 1,
        }),
        ..Default::default()
    });
    let bakery = with_id(Client {
        name: "Padaria Central".to_string(),
        email: Some("contato@padariacentral.example".to_string()),
        phone: Some("+55 11 4000-2000".to_string()),
        address: Some("Rua das Flores 45, Sao Paulo".to_string()),
        ..Default::default()
    });
    let school = with_id(Client {
        name: "Escola Horizonte".to_string(),
        document: Some("98.765.432/0001-10".to_string()),
        address: Some("Rua do Saber 300, Campinas".to_string()),
        ..Default::default()
    });

    let co2 = with_id(Equipment {
        name: "CO2 extinguisher 6kg".to_string(),
        category: Some("extinguisher".to_string()),
        manufacturer: Some("Kidde".to_string()),
        capacity: Some("6kg".to_string()),
        ..Default::default()
    });
    let powder = with_id(Equipment {
        name: "ABC dry powder 4kg".to_string(),
        category: Some("extinguisher".to_string()),
        manufacturer: Some("Amerex".to_string()),
        capacity: Some("4kg".to_string()),
        ..Default::default()
    });
    let hose = with_id(Equipment {
        name: "Hose reel 30m".to_string(),
        category: Some("hydrant".to_string()),
        ..Default::default()
    });

    let assets = vec![
        with_id(ClientEquipment {
            client_id: harbor.id.clone(),
            equipment_id: Some(co2.id.clone()),
            serial_number: Some("CO2-0001".to_string()),
            location: Some("Warehouse A".to_string()),
            last_service_date: Some(last_month),
            next_service_date: Some(add_one_year(last_month)),
            ..Default::default()
        }),
        with_id(ClientEquipment {
            client_id: harbor.id.clone(),
            equipment_id: Some(hose.id.clone()),
            serial_number: Some("HR-0042".to_string()),
            location: Some("Loading dock".to_string()),
            ..Default::default()
        }),
        with_id(ClientEquipment {
            client_id: bakery.id.clone(),
            equipment_id: Some(powder.id.clone()),
            serial_number: Some("ABC-7781".to_string()),
            location: Some("Kitchen".to_string()),
            ..Default::default()
        }),
    ];

    let approved = with_id(Inspection {
        client_id: harbor.id.clone(),
        scheduled_date: Some(last_month),
        inspector: Some("R. Almeida".to_string()),
        status: InspectionStatus::Approved,
        ..Default::default()
    });
    let scheduled = with_id(Inspection {
        client_id: bakery.id.clone(),
        scheduled_date: Some(add_months_clamped(month_start, 1)),
        inspector: Some("R. Almeida".to_string()),
        status: InspectionStatus::Scheduled,
        ..Default::default()
    });

    let certificate = with_id(Certificate {
        client_id: harbor.id.clone(),
        inspection_id: approved.id.clone(),
        issue_date: Some(last_month),
        expiry_date: Some(add_one_year(last_month)),
        status: CertificateStatus::Active,
        ..Default::default()
    });

    let financial = vec![
        with_id(FinancialRecord {
            client_id: harbor.id.clone(),
            description: "Installment 1/12".to_string(),
            amount: 850.0,
            due_date: Some(last_month),
            paid_date: Some(last_month),
            status: FinancialStatus::Paid,
            installment_number: Some(1),
            ..Default::default()
        }),
        with_id(FinancialRecord {
            client_id: school.id.clone(),
            description: "Annual inspection".to_string(),
            amount: 1200.0,
            due_date: Some(add_months_clamped(month_start, 1)),
            status: FinancialStatus::Pending,
            ..Default::default()
        }),
    ];

    let rent = with_id(RecurringPayable {
        description: "Workshop rent".to_string(),
        monthly_amount: 2400.0,
        total_installments: 12,
        start_date: Some(last_month),
        paid_installments: 1,
        category: Some("rent".to_string()),
        ..Default::default()
    });
    let rent_paid = with_id(Expense {
        description: "Workshop rent 1/12".to_string(),
        amount: rent.monthly_amount,
        due_date: rent.due_date_for(1),
        paid_date: rent.due_date_for(1),
        category: rent.category.clone(),
        recurring_payable_id: Some(rent.id.clone()),
        installment_number: Some(1),
        ..Default::default()
    });
    let refill = with_id(Expense {
        description: "CO2 refill stock".to_string(),
        amount: 640.0,
        due_date: Some(month_start),
        category: Some("supplies".to_string()),
        ..Default::default()
    });

    let license = with_id(License {
        name: "Fire department accreditation".to_string(),
        number: Some("CBPMESP-2231".to_string()),
        issuer: Some("Corpo de Bombeiros".to_string()),
        expiry_date: Some(add_one_year(month_start)),
        ..Default::default()
    });

    let delivery = with_id(Delivery {
        client_id: Some(bakery.id.clone()),
        description: "Replacement ABC extinguisher".to_string(),
        delivery_date: Some(today),
        delivered: false,
        ..Default::default()
    });

    Snapshot {
        clients: vec![harbor, bakery, school],
        equipment: vec![co2, powder, hose],
        client_equipment: assets,
        inspections: vec![approved, scheduled],
        financial,
        certificates: vec![certificate],
        licenses: vec![license],
        deliveries: vec![delivery],
        expenses: vec![rent_paid, refill],
        recurring_payables: vec![rent],
        company_profile: CompanyProfile {
            name: "FireLedger Demo Services".to_string(),
            email: Some("demo@fireledger.example".to_string()),
            ..Default::default()
        },
        app_settings: AppSettings::default(),
    }
}
