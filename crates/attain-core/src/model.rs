//! Core data model types for attain.
//!
//! These are the types the whole workspace uses to describe classes,
//! snapshots of a curriculum structure, evaluation records and the
//! server-computed final result. Wire names are camelCase.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }
    };
}

id_type!(
    /// Identifier of a class (a group of students taught together).
    ClassId
);
id_type!(
    /// Identifier of a template discipline.
    DisciplineId
);
id_type!(
    /// Identifier of an immutable snapshot of a discipline's structure.
    SnapshotId
);
id_type!(
    /// Identifier of a student.
    StudentId
);
id_type!(
    /// Identifier of a criterion inside a snapshot.
    CriterionId
);
id_type!(CapabilityId);

// ---------------------------------------------------------------------------
// Class context
// ---------------------------------------------------------------------------

/// A class as reported by `GET /classes/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassInfo {
    pub id: ClassId,
    pub name: String,
    /// Academic term label, e.g. "2025/1".
    #[serde(default)]
    pub term_label: String,
    #[serde(default)]
    pub current_term: Option<u32>,
    /// The class's principal discipline.
    #[serde(default)]
    pub discipline_id: Option<DisciplineId>,
    /// Snapshot already bound to the principal discipline, if evaluation started.
    #[serde(default)]
    pub snapshot_id: Option<SnapshotId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: StudentId,
    pub name: String,
    #[serde(default)]
    pub class_id: Option<ClassId>,
}

/// A template discipline offered to a class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discipline {
    pub id: DisciplineId,
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
}

// ---------------------------------------------------------------------------
// Snapshot structure
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CapabilityKind {
    Technical,
    SocioEmotional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CriterionKind {
    Critical,
    Desirable,
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityKind::Technical => write!(f, "technical"),
            CapabilityKind::SocioEmotional => write!(f, "socio-emotional"),
        }
    }
}

impl fmt::Display for CriterionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CriterionKind::Critical => write!(f, "critical"),
            CriterionKind::Desirable => write!(f, "desirable"),
        }
    }
}

/// A competency group within a snapshot, with its ordered criteria.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capability {
    pub id: CapabilityId,
    pub description: String,
    pub kind: CapabilityKind,
    #[serde(default)]
    pub criteria: Vec<Criterion>,
}

/// A single gradable statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Criterion {
    pub id: CriterionId,
    pub description: String,
    pub kind: CriterionKind,
}

/// The capability/criterion set captured by a snapshot.
///
/// Snapshots never change after creation, so a fetched structure can be
/// shared and kept for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SnapshotStructure {
    pub capabilities: Vec<Capability>,
}

impl SnapshotStructure {
    pub fn new(capabilities: Vec<Capability>) -> Self {
        Self { capabilities }
    }

    /// Every criterion id, in capability order.
    pub fn criterion_ids(&self) -> Vec<CriterionId> {
        self.criteria().map(|c| c.id).collect()
    }

    pub fn criteria(&self) -> impl Iterator<Item = &Criterion> {
        self.capabilities.iter().flat_map(|cap| cap.criteria.iter())
    }

    pub fn criterion(&self, id: CriterionId) -> Option<&Criterion> {
        self.criteria().find(|c| c.id == id)
    }
}

/// One row of a snapshot's level table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelRule {
    pub level: u32,
    pub min_critical: u32,
    pub min_desirable: u32,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

// ---------------------------------------------------------------------------
// Evaluation records
// ---------------------------------------------------------------------------

/// Tri-state grading value of a criterion.
///
/// On the wire this is `true`, `false` or `null`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Option<bool>", into = "Option<bool>")]
pub enum Attainment {
    Attained,
    NotAttained,
    #[default]
    Unset,
}

impl From<Option<bool>> for Attainment {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(true) => Attainment::Attained,
            Some(false) => Attainment::NotAttained,
            None => Attainment::Unset,
        }
    }
}

impl From<Attainment> for Option<bool> {
    fn from(value: Attainment) -> Self {
        match value {
            Attainment::Attained => Some(true),
            Attainment::NotAttained => Some(false),
            Attainment::Unset => None,
        }
    }
}

impl fmt::Display for Attainment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attainment::Attained => write!(f, "attained"),
            Attainment::NotAttained => write!(f, "not-attained"),
            Attainment::Unset => write!(f, "unset"),
        }
    }
}

impl FromStr for Attainment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "attained" | "yes" | "true" => Ok(Attainment::Attained),
            "not-attained" | "not_attained" | "no" | "false" => Ok(Attainment::NotAttained),
            "unset" | "clear" | "none" => Ok(Attainment::Unset),
            other => Err(format!("unknown attainment value: {other}")),
        }
    }
}

/// The locally held value of one criterion for the active student.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CriterionOutcome {
    pub attained: Attainment,
    pub note: String,
}

impl CriterionOutcome {
    pub fn new(attained: Attainment, note: impl Into<String>) -> Self {
        Self {
            attained,
            note: note.into(),
        }
    }
}

/// An evaluation record as listed by `GET /evaluations`.
///
/// The server sometimes embeds the full criterion instead of a flat
/// `criterionId`; both shapes deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RecordWire")]
pub struct EvaluationRecord {
    pub criterion_id: CriterionId,
    pub attained: Attainment,
    pub note: String,
    pub finalized: bool,
    pub evaluated_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordWire {
    #[serde(default)]
    criterion_id: Option<CriterionId>,
    #[serde(default)]
    criterion: Option<EmbeddedCriterion>,
    #[serde(default)]
    attained: Attainment,
    #[serde(default)]
    note: Option<String>,
    #[serde(default)]
    finalized: Option<bool>,
    #[serde(default)]
    evaluated_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct EmbeddedCriterion {
    id: CriterionId,
}

impl TryFrom<RecordWire> for EvaluationRecord {
    type Error = String;

    fn try_from(wire: RecordWire) -> Result<Self, Self::Error> {
        let criterion_id = wire
            .criterion_id
            .or(wire.criterion.map(|c| c.id))
            .ok_or_else(|| "evaluation record without criterion id".to_string())?;
        Ok(Self {
            criterion_id,
            attained: wire.attained,
            note: wire.note.unwrap_or_default(),
            finalized: wire.finalized.unwrap_or(false),
            evaluated_at: wire.evaluated_at,
        })
    }
}

/// Body of `POST /evaluations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordUpsert {
    pub student_id: StudentId,
    pub snapshot_id: SnapshotId,
    pub criterion_id: CriterionId,
    pub attained: Attainment,
    pub note: String,
}

/// Server-computed outcome of a finalized evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalResult {
    #[serde(default)]
    pub student_name: String,
    #[serde(default)]
    pub discipline_name: String,
    pub critical_attained: u32,
    pub desirable_attained: u32,
    pub critical_total: u32,
    pub desirable_total: u32,
    pub level: u32,
    #[serde(default)]
    pub completion_percent: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attainment_wire_form_is_nullable_bool() {
        assert_eq!(serde_json::to_string(&Attainment::Attained).unwrap(), "true");
        assert_eq!(
            serde_json::to_string(&Attainment::NotAttained).unwrap(),
            "false"
        );
        assert_eq!(serde_json::to_string(&Attainment::Unset).unwrap(), "null");
        let parsed: Attainment = serde_json::from_str("null").unwrap();
        assert_eq!(parsed, Attainment::Unset);
    }

    #[test]
    fn attainment_parse() {
        assert_eq!("attained".parse::<Attainment>().unwrap(), Attainment::Attained);
        assert_eq!("NO".parse::<Attainment>().unwrap(), Attainment::NotAttained);
        assert_eq!("clear".parse::<Attainment>().unwrap(), Attainment::Unset);
        assert!("maybe".parse::<Attainment>().is_err());
    }

    #[test]
    fn record_accepts_flat_and_nested_criterion() {
        let flat: EvaluationRecord = serde_json::from_str(
            r#"{"criterionId": 101, "attained": true, "note": "ok", "finalized": false}"#,
        )
        .unwrap();
        assert_eq!(flat.criterion_id, CriterionId(101));
        assert_eq!(flat.attained, Attainment::Attained);

        let nested: EvaluationRecord = serde_json::from_str(
            r#"{"criterion": {"id": 102, "description": "x", "kind": "CRITICAL"}, "attained": null, "finalized": true, "evaluatedAt": "2025-03-01T12:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(nested.criterion_id, CriterionId(102));
        assert_eq!(nested.attained, Attainment::Unset);
        assert_eq!(nested.note, "");
        assert!(nested.finalized);
        assert!(nested.evaluated_at.is_some());
    }

    #[test]
    fn record_without_criterion_is_rejected() {
        let err = serde_json::from_str::<EvaluationRecord>(r#"{"attained": true}"#).unwrap_err();
        assert!(err.to_string().contains("criterion id"));
    }

    #[test]
    fn upsert_serializes_camel_case() {
        let body = RecordUpsert {
            student_id: StudentId(7),
            snapshot_id: SnapshotId(55),
            criterion_id: CriterionId(101),
            attained: Attainment::Unset,
            note: String::new(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["studentId"], 7);
        assert_eq!(json["snapshotId"], 55);
        assert_eq!(json["criterionId"], 101);
        assert!(json["attained"].is_null());
    }

    #[test]
    fn structure_lists_criteria_in_capability_order() {
        let structure: SnapshotStructure = serde_json::from_str(
            r#"{"capabilities": [
                {"id": 1, "description": "Tech", "kind": "TECHNICAL", "criteria": [
                    {"id": 11, "description": "a", "kind": "CRITICAL"},
                    {"id": 12, "description": "b", "kind": "DESIRABLE"}
                ]},
                {"id": 2, "description": "Soft", "kind": "SOCIO_EMOTIONAL", "criteria": [
                    {"id": 21, "description": "c", "kind": "CRITICAL"}
                ]}
            ]}"#,
        )
        .unwrap();
        assert_eq!(
            structure.criterion_ids(),
            vec![CriterionId(11), CriterionId(12), CriterionId(21)]
        );
        assert_eq!(
            structure.criterion(CriterionId(12)).map(|c| c.kind),
            Some(CriterionKind::Desirable)
        );
    }
}
