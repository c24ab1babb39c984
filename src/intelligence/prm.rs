//! PRM Synchronizer.
//!
//! Automatic findings are persisted as PRM entries tagged with the
//! automatic source that produced them. A sync replaces only the entries of
//! one source; manual entries and other sources are never touched.

use chrono::NaiveDateTime;

use crate::models::enums::AutoSource;
use crate::models::PrmEntry;
use crate::store::{PatientStore, StoreError};

use super::messages::MessageTemplates;
use super::types::Finding;

/// PRM entries for the findings belonging to `source`.
pub fn findings_to_prm(
    findings: &[Finding],
    source: AutoSource,
    date: NaiveDateTime,
) -> Vec<PrmEntry> {
    findings
        .iter()
        .filter(|f| f.auto_source() == source)
        .map(|f| {
            PrmEntry::automatic(source, MessageTemplates::prm_type(f.kind), &f.description, date)
        })
        .collect()
}

/// Replace the `source` entries of `current` with `incoming`.
///
/// The replacement block sits where the first `source` entry was, or at the
/// end when the source had none. An incoming entry describing a problem
/// already listed under the same source keeps the existing id and date.
/// Returns `None` when the merged list equals `current`.
pub fn merge_prm(
    current: &[PrmEntry],
    source: AutoSource,
    incoming: &[PrmEntry],
) -> Option<Vec<PrmEntry>> {
    let mut previous: Vec<&PrmEntry> = current
        .iter()
        .filter(|p| p.auto_source == Some(source))
        .collect();

    let mut replacement: Vec<PrmEntry> = Vec::with_capacity(incoming.len());
    for entry in incoming {
        let mut entry = entry.clone();
        if let Some(pos) = previous.iter().position(|p| p.same_problem(&entry)) {
            let existing = previous.remove(pos);
            entry.id = existing.id;
            entry.date = existing.date;
        }
        replacement.push(entry);
    }

    let mut merged: Vec<PrmEntry> = Vec::with_capacity(current.len() + incoming.len());
    let mut pending = Some(replacement);
    for entry in current {
        if entry.auto_source == Some(source) {
            if let Some(block) = pending.take() {
                merged.extend(block);
            }
        } else {
            merged.push(entry.clone());
        }
    }
    if let Some(block) = pending {
        merged.extend(block);
    }

    if merged.as_slice() == current {
        None
    } else {
        Some(merged)
    }
}

/// Persist the `source` entries of a patient's PRM list.
/// Returns whether the record was written.
pub fn sync_prm(
    store: &dyn PatientStore,
    patient_id: &str,
    source: AutoSource,
    incoming: &[PrmEntry],
) -> Result<bool, StoreError> {
    let record = store.get(patient_id)?;
    if merge_prm(&record.prm, source, incoming).is_none() {
        tracing::debug!(patient = %patient_id, source = %source, "PRM unchanged, write skipped");
        return Ok(false);
    }

    store.update(patient_id, &mut |record| {
        if let Some(merged) = merge_prm(&record.prm, source, incoming) {
            record.prm = merged;
        }
    })?;
    tracing::debug!(
        patient = %patient_id,
        source = %source,
        entries = incoming.len(),
        "PRM synchronized"
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::FindingKind;
    use crate::store::MemoryPatientStore;
    use chrono::NaiveDate;

    fn at(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, day)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn auto(source: AutoSource, detail: &str, day: u32) -> PrmEntry {
        PrmEntry::automatic(source, "Interacción", detail, at(day))
    }

    #[test]
    fn findings_are_filtered_by_source() {
        let findings = vec![
            Finding::new(FindingKind::CompoundRisk, "t", "riesgo".into()),
            Finding::new(FindingKind::PpiAlert, "t", "ppi".into()),
        ];
        let entries = findings_to_prm(&findings, AutoSource::Interaction, at(1));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].prm_type, "Riesgo compuesto");
        assert_eq!(entries[0].detail, "riesgo");
        assert!(entries[0].auto);
        assert_eq!(entries[0].auto_source, Some(AutoSource::Interaction));
    }

    #[test]
    fn manual_and_other_sources_are_preserved() {
        let manual = PrmEntry::manual("Adherencia", "Olvida dosis nocturna", at(1));
        let ppi = auto(AutoSource::Ppi, "ppi", 1);
        let stale = auto(AutoSource::Interaction, "vieja", 1);
        let current = vec![manual.clone(), stale, ppi.clone()];

        let merged = merge_prm(
            &current,
            AutoSource::Interaction,
            &[auto(AutoSource::Interaction, "nueva", 2)],
        )
        .unwrap();

        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0], manual);
        assert_eq!(merged[1].detail, "nueva");
        assert_eq!(merged[2], ppi);
    }

    #[test]
    fn existing_problem_keeps_identity() {
        let existing = auto(AutoSource::Interaction, "igual", 1);
        let current = vec![existing.clone()];
        assert!(merge_prm(&current, AutoSource::Interaction, &[auto(AutoSource::Interaction, "igual", 9)]).is_none());
    }

    #[test]
    fn resync_of_each_source_keeps_list_stable() {
        let manual = PrmEntry::manual("Adherencia", "Olvida dosis", at(1));
        let after_duplicates = merge_prm(
            &[manual],
            AutoSource::Duplicates,
            &[auto(AutoSource::Duplicates, "x", 1)],
        )
        .unwrap();
        let after_interactions = merge_prm(
            &after_duplicates,
            AutoSource::Interaction,
            &[auto(AutoSource::Interaction, "y", 1)],
        )
        .unwrap();
        let details: Vec<&str> = after_interactions.iter().map(|p| p.detail.as_str()).collect();
        assert_eq!(details, vec!["Olvida dosis", "x", "y"]);

        assert!(merge_prm(
            &after_interactions,
            AutoSource::Duplicates,
            &[auto(AutoSource::Duplicates, "x", 2)],
        )
        .is_none());
        assert!(merge_prm(
            &after_interactions,
            AutoSource::Interaction,
            &[auto(AutoSource::Interaction, "y", 2)],
        )
        .is_none());
    }

    #[test]
    fn changed_source_is_replaced_in_place() {
        let current = vec![
            auto(AutoSource::Duplicates, "x", 1),
            auto(AutoSource::Interaction, "y", 1),
            PrmEntry::manual("Otro", "manual", at(1)),
        ];
        let merged = merge_prm(
            &current,
            AutoSource::Duplicates,
            &[auto(AutoSource::Duplicates, "x", 2), auto(AutoSource::Duplicates, "z", 2)],
        )
        .unwrap();
        let details: Vec<&str> = merged.iter().map(|p| p.detail.as_str()).collect();
        assert_eq!(details, vec!["x", "z", "y", "manual"]);
        assert_eq!(merged[0], current[0]);
    }

    #[test]
    fn empty_incoming_clears_source() {
        let current = vec![
            auto(AutoSource::Renal, "renal", 1),
            PrmEntry::manual("Otro", "manual", at(1)),
        ];
        let merged = merge_prm(&current, AutoSource::Renal, &[]).unwrap();
        assert_eq!(merged.len(), 1);
        assert!(!merged[0].auto);

        assert!(merge_prm(&merged, AutoSource::Renal, &[]).is_none());
    }

    #[test]
    fn second_sync_is_a_no_op() {
        let store = MemoryPatientStore::default();
        store.create("ABC").unwrap();
        store
            .update("ABC", &mut |r| r.prm.push(PrmEntry::manual("Otro", "manual", at(1))))
            .unwrap();

        let incoming = vec![auto(AutoSource::Duplicates, "IBUPROFENO", 2)];
        assert!(sync_prm(&store, "ABC", AutoSource::Duplicates, &incoming).unwrap());
        let first = store.get("ABC").unwrap();
        assert_eq!(first.prm.len(), 2);

        let again = vec![auto(AutoSource::Duplicates, "IBUPROFENO", 3)];
        assert!(!sync_prm(&store, "ABC", AutoSource::Duplicates, &again).unwrap());
        let second = store.get("ABC").unwrap();
        assert_eq!(second.prm, first.prm);
        assert_eq!(second.last_modified, first.last_modified);
    }

    #[test]
    fn missing_record_propagates() {
        let store = MemoryPatientStore::default();
        assert_eq!(
            sync_prm(&store, "ZZZ", AutoSource::Ppi, &[]),
            Err(StoreError::NotFound("ZZZ".into()))
        );
    }
}
