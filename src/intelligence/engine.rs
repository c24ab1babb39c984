use std::time::Instant;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::catalog::CatalogIndex;
use crate::models::enums::AutoSource;
use crate::models::PatientRecord;
use crate::store::{PatientStore, StoreError};

use super::aggregate::{aggregate, detect_duplicates};
use super::detection::{
    duplicate_findings, evaluate_criteria, evaluate_interactions, ppi_alerts, renal_alerts,
};
use super::helpers::rule_ingredients;
use super::prm::{findings_to_prm, sync_prm};
use super::reference::ReferenceData;
use super::types::{
    sort_findings, AggregatedMedication, DuplicateGroup, Finding, PatientProfile,
};

/// Output of the detection half of a pass, before PRM sync.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Detection {
    pub medications: Vec<AggregatedMedication>,
    pub duplicates: Vec<DuplicateGroup>,
    /// Every finding, sorted by description.
    pub findings: Vec<Finding>,
}

impl Detection {
    pub fn findings_for(&self, source: AutoSource) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.auto_source() == source)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub patient_id: String,
    pub detection: Detection,
    /// Automatic sources whose PRM entries were rewritten.
    pub changed_sources: Vec<AutoSource>,
    pub processing_time_ms: u64,
}

/// One evaluation pass: aggregate → detect → PRM sync.
/// Never fails on rule data; only store errors propagate.
pub struct RulesEngine<'a> {
    catalog: &'a CatalogIndex,
    reference: &'a ReferenceData,
}

impl<'a> RulesEngine<'a> {
    pub fn new(catalog: &'a CatalogIndex, reference: &'a ReferenceData) -> Self {
        Self { catalog, reference }
    }

    /// Run every detector over a record. Pure.
    pub fn detect(&self, record: &PatientRecord) -> Detection {
        let profile = PatientProfile::from_record(record);
        let medications = aggregate(record);
        let duplicates = detect_duplicates(&medications);
        let ingredients = rule_ingredients(&medications, self.catalog);

        let criteria = if profile.age_eligible {
            evaluate_criteria(&profile, &ingredients, self.reference.criteria.as_ref())
        } else {
            Vec::new()
        };
        let interactions = evaluate_interactions(&ingredients, self.reference.interactions.as_ref());

        let mut findings: Vec<Finding> = duplicate_findings(&duplicates)
            .into_iter()
            .chain(criteria)
            .chain(interactions)
            .chain(ppi_alerts(&profile, &medications))
            .chain(renal_alerts(&profile, &medications))
            .collect();
        sort_findings(&mut findings);

        Detection {
            medications,
            duplicates,
            findings,
        }
    }

    /// Evaluate a stored record and synchronize every automatic PRM source,
    /// including sources that produced nothing this time.
    pub fn evaluate(
        &self,
        store: &dyn PatientStore,
        patient_id: &str,
        now: NaiveDateTime,
    ) -> Result<EvaluationReport, StoreError> {
        let start = Instant::now();
        let record = store.get(patient_id)?;
        let detection = self.detect(&record);

        let mut changed_sources = Vec::new();
        for source in AutoSource::ALL {
            let entries = findings_to_prm(&detection.findings, source, now);
            if sync_prm(store, &record.id, source, &entries)? {
                changed_sources.push(source);
            }
        }

        let processing_time_ms = start.elapsed().as_millis() as u64;

        tracing::info!(
            patient = %record.id,
            medications = detection.medications.len(),
            duplicates = detection.duplicates.len(),
            findings = detection.findings.len(),
            changed = changed_sources.len(),
            processing_ms = processing_time_ms,
            "Evaluation pass complete"
        );

        Ok(EvaluationReport {
            patient_id: record.id,
            detection,
            changed_sources,
            processing_time_ms,
        })
    }
}
