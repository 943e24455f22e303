//! Structured care plan content.
//!
//! The text-processing collaborator returns the same section layout for the simplified English
//! variant, the translated variant and the back-translation, so one type covers all three.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanSections {
    pub diagnosis: String,
    pub instructions: Vec<String>,
    pub warnings: Vec<String>,
    pub medications: Vec<Medication>,
    pub appointments: Vec<Appointment>,
}

impl PlanSections {
    /// True when there is nothing a patient could act on.
    pub fn is_empty(&self) -> bool {
        self.diagnosis.trim().is_empty()
            && self.instructions.is_empty()
            && self.warnings.is_empty()
            && self.medications.is_empty()
            && self.appointments.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Medication {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dose: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Output of the text-processing collaborator for one plan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedContent {
    pub simplified: PlanSections,
    pub translated: PlanSections,
    /// Reviewer aid only; never shown to patients.
    pub back_translation: PlanSections,
}

/// Interpreter's corrected content, replacing the machine output wholesale.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditedContent {
    pub simplified: PlanSections,
    pub translated: PlanSections,
}
