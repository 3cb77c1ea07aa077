//! Membership classification of records against the INEO mapping table.
//!
//! A record is looked up by its data provider, falling back to its harvest
//! root when the provider is not mapped. Within a matched entry the first
//! rule that applies wins:
//!
//! 1. the record's component profile equals the entry's `profile`
//! 2. the record's hierarchy weight equals the entry's `level`
//! 3. the entry declares a `default`
//! 4. otherwise not a member
//!
//! Records whose provider and root are both unmapped get the table's global
//! default. Only a matched entry can ask for assessment.

use ineo_core::{MappingTable, Provider, Record};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("record {id} has neither a data provider nor a harvester root")]
    MissingProviderKey { id: String },
}

/// Which rule decided a record's membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchReason {
    Profile,
    Level,
    ProviderDefault,
    /// Entry matched but no rule applied.
    NoRule,
    /// No entry for the provider or root.
    GlobalDefault,
}

impl MatchReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::Level => "level",
            Self::ProviderDefault => "provider-default",
            Self::NoRule => "no-rule",
            Self::GlobalDefault => "global-default",
        }
    }
}

/// Classification of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub is_member: bool,
    pub assessment_needed: bool,
    pub reason: MatchReason,
    /// Name of the mapping entry that matched, if any.
    pub matched: Option<String>,
}

/// Classify a record. Pure: the same record and table always give the same verdict.
pub fn classify(record: &Record, mapping: &MappingTable) -> Result<Verdict, ClassifyError> {
    if record.data_provider.is_none() && record.harvester_root.is_none() {
        return Err(ClassifyError::MissingProviderKey {
            id: record.id.clone(),
        });
    }

    let provider = record
        .data_provider
        .as_deref()
        .and_then(|name| mapping.get(name))
        .or_else(|| {
            record
                .harvester_root
                .as_deref()
                .and_then(|name| mapping.get(name))
        });

    let Some(provider) = provider else {
        return Ok(Verdict {
            is_member: mapping.global_default(),
            assessment_needed: false,
            reason: MatchReason::GlobalDefault,
            matched: None,
        });
    };

    let (is_member, reason) = match_provider(record, provider);
    Ok(Verdict {
        is_member,
        assessment_needed: provider.assessment_required,
        reason,
        matched: Some(provider.name.clone()),
    })
}

fn match_provider(record: &Record, provider: &Provider) -> (bool, MatchReason) {
    if let Some(profile) = record.component_profile_id.as_deref()
        && provider.profile.as_deref() == Some(profile)
    {
        return (true, MatchReason::Profile);
    }
    if let Some(weight) = record.hierarchy_weight
        && provider.level == Some(weight)
    {
        return (true, MatchReason::Level);
    }
    match provider.default_membership.value() {
        Some(member) => (member, MatchReason::ProviderDefault),
        None => (false, MatchReason::NoRule),
    }
}
