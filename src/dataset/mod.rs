//! The domain dataset: one persistent cell per collection or setting, all
//! bound to the same namespace, plus the operations that span them.

pub mod model;
pub mod repo;
pub mod seed;
pub mod snapshot;

use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::backup::{restore_namespace, BackupReport};
use crate::cell::{BoundCell, LoadOutcome, PersistentCell};
use crate::error::{DATASET_INVALID_STATE, DATASET_NOT_FOUND};
use crate::kv::StoreHandle;
use crate::namespace::{Namespace, INITIALIZED_NAME};
use crate::time::{add_one_year, today};
use crate::{AppError, AppResult};

use model::{
    AppSettings, Certificate, CertificateStatus, Client, ClientEquipment, CompanyProfile,
    Delivery, Equipment, Expense, FinancialRecord, FinancialStatus, Inspection, InspectionStatus,
    License, RecurringPayable, RecurringPlan, Theme,
};
use repo::{Collection, Entity};
use seed::SeedProvider;
use snapshot::Snapshot;

/// What the seed check did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOutcome {
    /// Some cell has not finished loading for the current namespace.
    NotReady,
    /// The `initialized` flag could not be read or decoded; nothing was done.
    Unconfirmed,
    /// The namespace was provisioned earlier; nothing was touched.
    AlreadyInitialized,
    /// The seed provider's dataset was written.
    Seeded,
    /// Marked initialized with no seed data.
    Initialized,
}

/// Entities removed alongside a deleted client.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CascadeReport {
    pub assets: usize,
    pub inspections: usize,
    pub financial: usize,
    pub certificates: usize,
}

impl CascadeReport {
    pub fn total(&self) -> usize {
        self.assets + self.inspections + self.financial + self.certificates
    }
}

pub struct DatasetManager {
    store: StoreHandle,
    seed: Arc<dyn SeedProvider>,
    namespace: Mutex<Namespace>,
    seed_lock: tokio::sync::Mutex<()>,

    clients: Collection<Client>,
    equipment: Collection<Equipment>,
    client_equipment: Collection<ClientEquipment>,
    inspections: Collection<Inspection>,
    financial: Collection<FinancialRecord>,
    certificates: Collection<Certificate>,
    licenses: Collection<License>,
    deliveries: Collection<Delivery>,
    expenses: Collection<Expense>,
    recurring_payables: Collection<RecurringPayable>,
    company_profile: PersistentCell<CompanyProfile>,
    app_settings: PersistentCell<AppSettings>,
    theme: PersistentCell<Theme>,
    initialized: PersistentCell<bool>,
}

impl DatasetManager {
    /// Create the manager with every cell unbound. Nothing is read until
    /// [`switch_namespace`](Self::switch_namespace).
    pub fn new(store: StoreHandle, seed: Arc<dyn SeedProvider>) -> Self {
        Self {
            seed,
            namespace: Mutex::new(Namespace::Guest),
            seed_lock: tokio::sync::Mutex::new(()),
            clients: Collection::new(store.clone()),
            equipment: Collection::new(store.clone()),
            client_equipment: Collection::new(store.clone()),
            inspections: Collection::new(store.clone()),
            financial: Collection::new(store.clone()),
            certificates: Collection::new(store.clone()),
            licenses: Collection::new(store.clone()),
            deliveries: Collection::new(store.clone()),
            expenses: Collection::new(store.clone()),
            recurring_payables: Collection::new(store.clone()),
            company_profile: PersistentCell::new(
                store.clone(),
                "companyProfile",
                CompanyProfile::default(),
            ),
            app_settings: PersistentCell::new(store.clone(), "appSettings", AppSettings::default()),
            theme: PersistentCell::new(store.clone(), "theme", Theme::default()),
            initialized: PersistentCell::new(store.clone(), INITIALIZED_NAME, false),
            store,
        }
    }

    pub fn clients(&self) -> &Collection<Client> {
        &self.clients
    }

    pub fn equipment(&self) -> &Collection<Equipment> {
        &self.equipment
    }

    pub fn client_equipment(&self) -> &Collection<ClientEquipment> {
        &self.client_equipment
    }

    pub fn inspections(&self) -> &Collection<Inspection> {
        &self.inspections
    }

    pub fn financial(&self) -> &Collection<FinancialRecord> {
        &self.financial
    }

    pub fn certificates(&self) -> &Collection<Certificate> {
        &self.certificates
    }

    pub fn licenses(&self) -> &Collection<License> {
        &self.licenses
    }

    pub fn deliveries(&self) -> &Collection<Delivery> {
        &self.deliveries
    }

    pub fn expenses(&self) -> &Collection<Expense> {
        &self.expenses
    }

    pub fn recurring_payables(&self) -> &Collection<RecurringPayable> {
        &self.recurring_payables
    }

    pub fn company_profile(&self) -> &PersistentCell<CompanyProfile> {
        &self.company_profile
    }

    pub fn app_settings(&self) -> &PersistentCell<AppSettings> {
        &self.app_settings
    }

    pub fn theme(&self) -> &PersistentCell<Theme> {
        &self.theme
    }

    pub fn initialized(&self) -> &PersistentCell<bool> {
        &self.initialized
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn cells(&self) -> [&dyn BoundCell; 14] {
        [
            self.clients.cell(),
            self.equipment.cell(),
            self.client_equipment.cell(),
            self.inspections.cell(),
            self.financial.cell(),
            self.certificates.cell(),
            self.licenses.cell(),
            self.deliveries.cell(),
            self.expenses.cell(),
            self.recurring_payables.cell(),
            &self.company_profile,
            &self.app_settings,
            &self.theme,
            &self.initialized,
        ]
    }

    /// True until every cell has loaded for the current namespace.
    pub fn is_loading(&self) -> bool {
        self.cells().iter().any(|cell| !cell.is_loaded())
    }

    /// Point every cell at `namespace`, wait for all of them to load, then
    /// run the seed check.
    pub async fn switch_namespace(&self, namespace: Namespace) -> AppResult<SeedOutcome> {
        self.bind_namespace(namespace).await;
        self.ensure_seeded().await
    }

    /// Point every cell at `namespace` and load it, without the seed check.
    pub async fn bind_namespace(&self, namespace: Namespace) {
        *self.namespace.lock().unwrap_or_else(|e| e.into_inner()) = namespace.clone();
        info!(
            target: "fireledger",
            event = "dataset_namespace_switch",
            namespace = %namespace
        );
        self.rebind_all(&namespace).await;
    }

    async fn rebind_all(&self, namespace: &Namespace) {
        let cells = self.cells();
        let outcomes = join_all(cells.iter().map(|cell| cell.rebind(namespace))).await;
        for (cell, outcome) in cells.iter().zip(outcomes) {
            if matches!(outcome, LoadOutcome::Failed | LoadOutcome::Undecodable) {
                warn!(
                    target: "fireledger",
                    event = "dataset_cell_in_memory",
                    namespace = %namespace,
                    name = cell.name(),
                    outcome = ?outcome
                );
            }
        }
    }

    /// Provision the current namespace once.
    ///
    /// If any cell is still loading for the current namespace this reports
    /// `NotReady` and changes nothing. If the `initialized` flag could not be
    /// read it reports `Unconfirmed` and likewise changes nothing; a later
    /// rebind retries. Calls are serialised, so a repeated
    /// invocation sees the flag written by the first.
    pub async fn ensure_seeded(&self) -> AppResult<SeedOutcome> {
        let _seeding = self.seed_lock.lock().await;
        let namespace = self.namespace();

        if self.is_loading() || self.initialized.key() != Some(namespace.initialized_key()) {
            debug!(target: "fireledger", event = "seed_not_ready", namespace = %namespace);
            return Ok(SeedOutcome::NotReady);
        }
        match self.initialized.load_outcome() {
            Some(LoadOutcome::Stored | LoadOutcome::Defaulted) => {}
            outcome => {
                // Without a confirmed read of the flag the namespace may hold
                // user data; neither seed it nor stamp the flag.
                warn!(
                    target: "fireledger",
                    event = "seed_flag_unconfirmed",
                    namespace = %namespace,
                    outcome = ?outcome
                );
                return Ok(SeedOutcome::Unconfirmed);
            }
        }
        if self.initialized.get() {
            return Ok(SeedOutcome::AlreadyInitialized);
        }

        let outcome = match self.seed.seed_for(&namespace) {
            Some(snapshot) => {
                self.apply_snapshot(snapshot).await?;
                SeedOutcome::Seeded
            }
            None => SeedOutcome::Initialized,
        };
        self.initialized.set(true).await?;
        info!(
            target: "fireledger",
            event = "seed_check_complete",
            namespace = %namespace,
            outcome = ?outcome
        );
        Ok(outcome)
    }

    /// Delete a client and every asset, inspection, receivable and certificate
    /// referencing it.
    ///
    /// The four dependent collections are written independently. If one write
    /// fails the others still land; the first error is returned and nothing is
    /// rolled back.
    pub async fn delete_client(&self, client_id: &str) -> AppResult<CascadeReport> {
        if !self.clients.delete(client_id).await? {
            return Err(AppError::not_found(Client::COLLECTION, client_id));
        }

        let (assets, inspections, financial, certificates) = futures::join!(
            self.client_equipment.retain(|a| a.client_id != client_id),
            self.inspections.retain(|i| i.client_id != client_id),
            self.financial.retain(|f| f.client_id != client_id),
            self.certificates.retain(|c| c.client_id != client_id),
        );

        let mut first_error = None;
        let mut take = |result: AppResult<usize>| match result {
            Ok(count) => count,
            Err(err) => {
                first_error.get_or_insert(err);
                0
            }
        };
        let report = CascadeReport {
            assets: take(assets),
            inspections: take(inspections),
            financial: take(financial),
            certificates: take(certificates),
        };

        info!(
            target: "fireledger",
            event = "client_cascade_delete",
            client_id,
            removed = report.total(),
            partial = first_error.is_some()
        );
        match first_error {
            Some(err) => Err(err.with_context("client_id", client_id)),
            None => Ok(report),
        }
    }

    pub async fn issue_certificate(&self, inspection_id: &str) -> AppResult<Certificate> {
        self.issue_certificate_on(inspection_id, today()).await
    }

    /// Issue a certificate for an approved inspection, valid for one year
    /// from `issued_on`.
    pub async fn issue_certificate_on(
        &self,
        inspection_id: &str,
        issued_on: NaiveDate,
    ) -> AppResult<Certificate> {
        let inspection = self
            .inspections
            .get(inspection_id)
            .ok_or_else(|| AppError::not_found(Inspection::COLLECTION, inspection_id))?;
        if inspection.status != InspectionStatus::Approved {
            return Err(AppError::new(
                DATASET_INVALID_STATE,
                "Only approved inspections can be certified.",
            )
            .with_context("inspection_id", inspection_id)
            .with_context("status", inspection.status.as_str()));
        }

        self.certificates
            .add(Certificate {
                client_id: inspection.client_id,
                inspection_id: inspection.id,
                issue_date: Some(issued_on),
                expiry_date: Some(add_one_year(issued_on)),
                status: CertificateStatus::Active,
                ..Default::default()
            })
            .await
    }

    /// Due date of the plan's next unpaid installment.
    pub fn next_installment_due(plan: &RecurringPlan) -> Option<NaiveDate> {
        plan.next_due()
    }

    pub async fn post_client_installment(&self, client_id: &str) -> AppResult<FinancialRecord> {
        self.post_client_installment_on(client_id, today()).await
    }

    /// Record the client's next installment as paid on `paid_on` and advance
    /// the plan's paid counter.
    pub async fn post_client_installment_on(
        &self,
        client_id: &str,
        paid_on: NaiveDate,
    ) -> AppResult<FinancialRecord> {
        let client = self
            .clients
            .get(client_id)
            .ok_or_else(|| AppError::not_found(Client::COLLECTION, client_id))?;
        let plan = client.recurring_plan.ok_or_else(|| {
            AppError::new(DATASET_INVALID_STATE, "Client has no recurring plan.")
                .with_context("client_id", client_id)
        })?;
        if plan.is_complete() {
            return Err(
                AppError::new(DATASET_INVALID_STATE, "Every installment is already paid.")
                    .with_context("client_id", client_id),
            );
        }
        let due_date = Self::next_installment_due(&plan).ok_or_else(|| {
            AppError::new(DATASET_INVALID_STATE, "Plan has no cycle start date.")
                .with_context("client_id", client_id)
        })?;
        let number = plan.paid_installments + 1;

        let record = self
            .financial
            .add(FinancialRecord {
                client_id: client_id.to_string(),
                description: format!("Installment {number}/{}", plan.total_installments),
                amount: plan.monthly_amount,
                due_date: Some(due_date),
                paid_date: Some(paid_on),
                status: FinancialStatus::Paid,
                installment_number: Some(number),
                ..Default::default()
            })
            .await?;
        self.clients
            .modify(client_id, |client| {
                if let Some(plan) = client.recurring_plan.as_mut() {
                    plan.paid_installments += 1;
                }
            })
            .await?;
        Ok(record)
    }

    pub async fn post_recurring_payable(
        &self,
        template_id: &str,
        installment: u32,
        due_date: NaiveDate,
    ) -> AppResult<Expense> {
        self.post_recurring_payable_on(template_id, installment, due_date, today())
            .await
    }

    /// Record installment `installment` of a recurring payable as a paid
    /// expense and advance the template's paid counter.
    pub async fn post_recurring_payable_on(
        &self,
        template_id: &str,
        installment: u32,
        due_date: NaiveDate,
        paid_on: NaiveDate,
    ) -> AppResult<Expense> {
        let template = self
            .recurring_payables
            .get(template_id)
            .ok_or_else(|| AppError::not_found(RecurringPayable::COLLECTION, template_id))?;
        if template.is_complete() {
            return Err(AppError::new(
                DATASET_INVALID_STATE,
                "Every installment is already paid.",
            )
            .with_context("recurring_payable_id", template_id));
        }

        let expense = self
            .expenses
            .add(Expense {
                description: format!(
                    "{} {installment}/{}",
                    template.description, template.total_installments
                ),
                amount: template.monthly_amount,
                due_date: Some(due_date),
                paid_date: Some(paid_on),
                category: template.category.clone(),
                recurring_payable_id: Some(template.id.clone()),
                installment_number: Some(installment),
                ..Default::default()
            })
            .await?;
        self.recurring_payables
            .modify(template_id, |payable| {
                payable.paid_installments = payable.paid_installments.saturating_add(1);
            })
            .await?;
        Ok(expense)
    }

    /// Delete an expense. When it was generated from a recurring payable the
    /// template's paid counter is decremented, never below zero.
    pub async fn delete_expense(&self, expense_id: &str) -> AppResult<bool> {
        let Some(expense) = self.expenses.get(expense_id) else {
            return Ok(false);
        };
        if !self.expenses.delete(expense_id).await? {
            return Ok(false);
        }

        if let Some(template_id) = expense.recurring_payable_id.as_deref() {
            let reverted = self
                .recurring_payables
                .modify(template_id, |payable| {
                    payable.paid_installments = payable.paid_installments.saturating_sub(1);
                })
                .await;
            match reverted {
                Ok(()) => {}
                Err(err) if err.code() == DATASET_NOT_FOUND => {
                    debug!(
                        target: "fireledger",
                        event = "expense_template_missing",
                        expense_id,
                        template_id
                    );
                }
                Err(err) => return Err(err),
            }
        }
        Ok(true)
    }

    pub fn export_snapshot(&self) -> Snapshot {
        Snapshot {
            clients: self.clients.list(),
            equipment: self.equipment.list(),
            client_equipment: self.client_equipment.list(),
            inspections: self.inspections.list(),
            financial: self.financial.list(),
            certificates: self.certificates.list(),
            licenses: self.licenses.list(),
            deliveries: self.deliveries.list(),
            expenses: self.expenses.list(),
            recurring_payables: self.recurring_payables.list(),
            company_profile: self.company_profile.get(),
            app_settings: self.app_settings.get(),
        }
    }

    /// Replace every collection from an external document. The document is
    /// fully validated before any collection changes.
    pub async fn import_snapshot(&self, value: Value) -> AppResult<()> {
        let snapshot = Snapshot::from_value(value)?;
        self.apply_snapshot(snapshot).await?;
        info!(
            target: "fireledger",
            event = "snapshot_imported",
            namespace = %self.namespace()
        );
        Ok(())
    }

    /// Overwrite every collection and setting with `snapshot`, all at once.
    pub async fn apply_snapshot(&self, snapshot: Snapshot) -> AppResult<()> {
        let Snapshot {
            clients,
            equipment,
            client_equipment,
            inspections,
            financial,
            certificates,
            licenses,
            deliveries,
            expenses,
            recurring_payables,
            company_profile,
            app_settings,
        } = snapshot;

        let results = futures::join!(
            self.clients.replace(clients),
            self.equipment.replace(equipment),
            self.client_equipment.replace(client_equipment),
            self.inspections.replace(inspections),
            self.financial.replace(financial),
            self.certificates.replace(certificates),
            self.licenses.replace(licenses),
            self.deliveries.replace(deliveries),
            self.expenses.replace(expenses),
            self.recurring_payables.replace(recurring_payables),
            self.company_profile.set(company_profile),
            self.app_settings.set(app_settings),
        );
        let (r0, r1, r2, r3, r4, r5, r6, r7, r8, r9, r10, r11) = results;
        [r0, r1, r2, r3, r4, r5, r6, r7, r8, r9, r10, r11]
            .into_iter()
            .collect::<AppResult<Vec<()>>>()?;
        Ok(())
    }

    /// Copy the namespace's shadow keys over its live keys, then reload every
    /// cell so memory matches the store.
    ///
    /// Returns `BACKUP/PARTIAL` if any key failed; the keys that succeeded are
    /// restored either way.
    pub async fn restore_from_backup(&self) -> AppResult<BackupReport> {
        let namespace = self.namespace();
        let report = restore_namespace(&self.store, &namespace).await;
        self.rebind_all(&namespace).await;
        report.into_result()
    }
}
