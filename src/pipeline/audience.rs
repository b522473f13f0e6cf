//! Active audience and per-contact variable resolution.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::automation::{AutomationSource, Contact, ContactRun, Field};
use crate::error::SyncError;
use crate::pipeline::render::ContactVariables;

/// Contacts of an automation split by run state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Audience {
    /// Contacts with at least one incomplete run.
    pub active: Vec<Contact>,
    /// Contacts whose runs are all complete.
    pub completed: usize,
    /// Contacts listed in the automation with no run record at all.
    pub missing_runs: Vec<Contact>,
}

/// Classify `contacts` by their runs in `automation_id`.
///
/// Contacts without any run record are excluded from the active set and
/// reported in `missing_runs`.
pub fn classify(automation_id: &str, contacts: Vec<Contact>, runs: &[ContactRun]) -> Audience {
    let mut incomplete: HashMap<&str, bool> = HashMap::new();
    for run in runs
        .iter()
        .filter(|r| r.seriesid.is_empty() || r.seriesid == automation_id)
    {
        let entry = incomplete.entry(run.contact.as_str()).or_insert(false);
        *entry |= !run.completed;
    }

    let mut audience = Audience::default();
    for contact in contacts {
        match incomplete.get(contact.id.as_str()) {
            Some(true) => audience.active.push(contact),
            Some(false) => audience.completed += 1,
            None => audience.missing_runs.push(contact),
        }
    }
    audience
}

/// Fetch contacts and runs for `automation_id` and keep the active ones.
pub async fn active_audience(
    source: &dyn AutomationSource,
    automation_id: &str,
) -> Result<Vec<Contact>, SyncError> {
    let contacts = source.list_audience(automation_id).await?;
    let runs = source.list_runs(automation_id).await?;
    let total = contacts.len();
    let audience = classify(automation_id, contacts, &runs);

    // TODO: confirm with the campaign owners whether these should be mailed;
    // they are currently dropped from the send.
    for contact in &audience.missing_runs {
        warn!(automation_id, contact = %contact.email, "Contact has no run record in automation");
    }

    info!(
        automation_id,
        total,
        active = audience.active.len(),
        completed = audience.completed,
        missing_runs = audience.missing_runs.len(),
        "Resolved automation audience"
    );
    Ok(audience.active)
}

/// Build placeholder values for every contact, keyed by contact id.
///
/// With an empty `fields` catalogue only the basic attributes are used and
/// no remote calls are made.
pub async fn resolve_variables(
    source: &dyn AutomationSource,
    contacts: &[Contact],
    fields: &[Field],
    throttle: Duration,
) -> Result<HashMap<String, ContactVariables>, SyncError> {
    let tags: HashMap<&str, &str> = fields
        .iter()
        .filter(|f| !f.perstag.is_empty())
        .map(|f| (f.id.as_str(), f.perstag.as_str()))
        .collect();

    let mut resolved = HashMap::with_capacity(contacts.len());
    for (i, contact) in contacts.iter().enumerate() {
        let mut vars = ContactVariables::basic(contact);

        if !tags.is_empty() {
            if i > 0 {
                tokio::time::sleep(throttle).await;
            }
            for value in source.list_field_values(&contact.id).await? {
                match tags.get(value.field.as_str()) {
                    Some(tag) => vars.insert(*tag, value.value.unwrap_or_default()),
                    None => debug!(field = %value.field, "Field value without a known tag"),
                }
            }
        }

        resolved.insert(contact.id.clone(), vars);
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(id: &str) -> Contact {
        Contact {
            id: id.into(),
            email: format!("{id}@x.io"),
            first_name: String::new(),
            last_name: String::new(),
            phone: String::new(),
        }
    }

    fn run(contact: &str, completed: bool) -> ContactRun {
        ContactRun {
            contact: contact.into(),
            seriesid: "5".into(),
            completed,
        }
    }

    #[test]
    fn only_incomplete_runs_are_active() {
        let contacts = vec![contact("1"), contact("2"), contact("3")];
        let runs = vec![run("1", false), run("2", true), run("9", false)];

        let audience = classify("5", contacts, &runs);

        let active: Vec<&str> = audience.active.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(active, vec!["1"]);
        assert_eq!(audience.completed, 1);
        assert_eq!(audience.missing_runs.len(), 1);
        assert_eq!(audience.missing_runs[0].id, "3");
    }

    #[test]
    fn any_incomplete_run_makes_contact_active() {
        let runs = vec![run("1", true), run("1", false)];
        let audience = classify("5", vec![contact("1")], &runs);
        assert_eq!(audience.active.len(), 1);
    }

    #[test]
    fn runs_from_other_automations_are_ignored() {
        let mut other = run("1", false);
        other.seriesid = "6".into();
        let audience = classify("5", vec![contact("1")], &[other]);
        assert!(audience.active.is_empty());
        assert_eq!(audience.missing_runs.len(), 1);
    }
}
