//! Patients and the match-or-create rule used when a plan is sent.

use careplan_ids::{PatientId, TenantId};
use careplan_types::{EmailAddress, LanguageCode, NonEmptyText};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Patient {
    pub id: PatientId,
    pub tenant_id: TenantId,
    pub first_name: NonEmptyText,
    pub last_name: NonEmptyText,
    pub email: EmailAddress,
    pub phone: Option<String>,
    pub preferred_language: LanguageCode,
    pub created_at: DateTime<Utc>,
}

/// Contact details entered by the clinician when sending a plan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientDetails {
    pub first_name: NonEmptyText,
    pub last_name: NonEmptyText,
    pub email: EmailAddress,
    #[serde(default)]
    pub phone: Option<String>,
    /// Falls back to the plan's target language when absent.
    #[serde(default)]
    pub preferred_language: Option<LanguageCode>,
}

/// Find the tenant's patient with the same email, or create one.
///
/// Matching is by tenant + email only. When an existing patient is matched, contact fields that
/// were supplied are refreshed (a patient may have changed phone number since their last stay).
/// Returns the patient to store and whether it is new; the caller writes it.
pub(crate) fn match_or_create(
    patients: &HashMap<PatientId, Patient>,
    tenant_id: TenantId,
    details: PatientDetails,
    fallback_language: &LanguageCode,
    now: DateTime<Utc>,
) -> (Patient, bool) {
    let phone = details
        .phone
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty());

    if let Some(existing) = patients
        .values()
        .find(|p| p.tenant_id == tenant_id && p.email == details.email)
    {
        let mut existing = existing.clone();
        existing.first_name = details.first_name;
        existing.last_name = details.last_name;
        if phone.is_some() {
            existing.phone = phone;
        }
        if let Some(language) = details.preferred_language {
            existing.preferred_language = language;
        }
        return (existing, false);
    }

    let patient = Patient {
        id: PatientId::new(),
        tenant_id,
        first_name: details.first_name,
        last_name: details.last_name,
        email: details.email,
        phone,
        preferred_language: details
            .preferred_language
            .unwrap_or_else(|| fallback_language.clone()),
        created_at: now,
    };
    (patient, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details(email: &str, phone: Option<&str>) -> PatientDetails {
        PatientDetails {
            first_name: NonEmptyText::new("Ana").unwrap(),
            last_name: NonEmptyText::new("Lopez").unwrap(),
            email: EmailAddress::parse(email).unwrap(),
            phone: phone.map(str::to_string),
            preferred_language: None,
        }
    }

    #[test]
    fn matches_by_email_within_tenant() {
        let mut patients = HashMap::new();
        let tenant = TenantId::new();
        let es = LanguageCode::new("es").unwrap();

        let (first, created) =
            match_or_create(&patients, tenant, details("ana@x.org", None), &es, Utc::now());
        assert!(created);
        patients.insert(first.id, first.clone());
        assert_eq!(first.preferred_language, es);
        assert_eq!(first.phone, None);

        let (second, created) = match_or_create(
            &patients,
            tenant,
            details("ANA@x.org", Some(" 555-0100 ")),
            &es,
            Utc::now(),
        );
        assert!(!created);
        assert_eq!(second.id, first.id);
        assert_eq!(second.phone.as_deref(), Some("555-0100"));
        assert_eq!(patients[&first.id].phone, None);
    }

    #[test]
    fn same_email_in_other_tenant_is_a_different_patient() {
        let mut patients = HashMap::new();
        let es = LanguageCode::new("es").unwrap();

        let (a, _) = match_or_create(
            &patients,
            TenantId::new(),
            details("ana@x.org", None),
            &es,
            Utc::now(),
        );
        patients.insert(a.id, a.clone());
        let (b, created) = match_or_create(
            &patients,
            TenantId::new(),
            details("ana@x.org", None),
            &es,
            Utc::now(),
        );
        assert!(created);
        assert_ne!(a.id, b.id);
    }
}
