//! Company generation from contact email domains.
//!
//! Contacts are grouped by the registrable part of their email domain. Each
//! domain with enrichment data gets a company (created when missing), every
//! contact is linked to its domain's company, and companies are linked to
//! their parent company when both are known.

use crate::error::Result;
use hubsync_engine::{properties, EntityDatabase, EntityKind, EntityRef, SyncReport};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::info;

/// Enrichment record for one company, as exported from Clearbit.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearbitCompany {
    #[serde(default)]
    pub name: Option<String>,
    pub domain: String,
    #[serde(default)]
    pub domain_aliases: Vec<String>,
    #[serde(default)]
    pub parent: ParentCompany,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ParentCompany {
    pub domain: Option<String>,
}

/// Registrable domain of `host` under the public suffix list, as in
/// `example.co.uk` for `mail.example.co.uk`.
pub fn registrable_domain(host: &str) -> Option<String> {
    let host = host.trim().trim_end_matches('.').to_lowercase();
    if !host.contains('.') || host.split('.').any(str::is_empty) {
        return None;
    }
    psl::domain_str(&host).map(str::to_string)
}

/// Enrichment records by primary domain and by every alias.
pub fn clearbit_map(companies: &[ClearbitCompany]) -> BTreeMap<String, &ClearbitCompany> {
    let mut map = BTreeMap::new();
    for company in companies {
        map.insert(company.domain.clone(), company);
        for alias in &company.domain_aliases {
            map.insert(alias.clone(), company);
        }
    }
    map
}

/// Contacts grouped by registrable email domain. Provider domains are skipped.
pub fn contact_domains(
    db: &EntityDatabase,
    provider_domains: &BTreeSet<String>,
) -> Result<BTreeMap<String, Vec<EntityRef>>> {
    let mut domains: BTreeMap<String, Vec<EntityRef>> = BTreeMap::new();

    for contact in db.manager(EntityKind::Contact)?.get_all() {
        let email = contact.get_str("email");
        let Some((_, host)) = email.rsplit_once('@') else {
            continue;
        };
        let Some(domain) = registrable_domain(host) else {
            continue;
        };
        if provider_domains.contains(&domain) {
            continue;
        }
        domains.entry(domain).or_default().push(contact.entity_ref());
    }

    Ok(domains)
}

/// Companies by primary domain.
pub fn company_map(db: &EntityDatabase) -> Result<BTreeMap<String, EntityRef>> {
    Ok(db
        .manager(EntityKind::Company)?
        .get_all()
        .filter(|company| !company.get_str("domain").is_empty())
        .map(|company| (company.get_str("domain").to_string(), company.entity_ref()))
        .collect())
}

fn has_additional_domains(db: &EntityDatabase, company: EntityRef) -> Result<bool> {
    Ok(db
        .entity(company)?
        .get("additionalDomains")
        .and_then(Value::as_array)
        .is_some_and(|domains| !domains.is_empty()))
}

/// Create a company for every contact domain that has enrichment data and no
/// company yet. Existing companies without additional domains get the
/// enrichment aliases. Returns the number of companies created.
pub fn generate_companies(
    db: &mut EntityDatabase,
    clearbit: &[ClearbitCompany],
    provider_domains: &BTreeSet<String>,
) -> Result<usize> {
    let clearbit = clearbit_map(clearbit);
    let domains = contact_domains(db, provider_domains)?;
    let mut companies = company_map(db)?;
    let mut created = 0;

    for domain in domains.keys() {
        let Some(info) = clearbit.get(domain) else {
            continue;
        };

        match companies.get(&info.domain) {
            Some(&existing) => {
                if !info.domain_aliases.is_empty() && !has_additional_domains(db, existing)? {
                    db.entity_mut(existing)?
                        .set("additionalDomains", json!(info.domain_aliases))?;
                }
            }
            None => {
                let name = info
                    .name
                    .clone()
                    .filter(|name| !name.is_empty())
                    .unwrap_or_else(|| info.domain.clone());
                let company = db.manager_mut(EntityKind::Company)?.create(properties(json!({
                    "domain": info.domain,
                    "additionalDomains": info.domain_aliases,
                    "name": name,
                    "type": null,
                })))?;
                companies.insert(info.domain.clone(), company);
                created += 1;
            }
        }
    }

    info!(created, "generated companies");
    Ok(created)
}

/// Link every contact to the company of its email domain, replacing its
/// previous company links, and every company to its known parent.
/// Returns the number of links staged.
pub fn generate_associations(
    db: &mut EntityDatabase,
    clearbit: &[ClearbitCompany],
    provider_domains: &BTreeSet<String>,
) -> Result<usize> {
    let clearbit = clearbit_map(clearbit);
    let domains = contact_domains(db, provider_domains)?;
    let companies = company_map(db)?;
    let mut links = 0;

    for (domain, &company) in &companies {
        for &contact in domains.get(domain).into_iter().flatten() {
            db.clear_associations(contact, EntityKind::Company)?;
            db.associate(contact, company)?;
            links += 1;
        }

        let parent = clearbit
            .get(domain)
            .and_then(|info| info.parent.domain.as_deref())
            .and_then(|parent| companies.get(parent));
        if let Some(&parent) = parent {
            if parent != company {
                db.associate(company, parent)?;
                links += 1;
                info!(%domain, parent = %db.entity(parent)?.get_str("domain"), "linked parent company");
            }
        }
    }

    Ok(links)
}

/// Generate companies and their links from `clearbit_path`, then push.
pub async fn run(
    db: &mut EntityDatabase,
    clearbit_path: &Path,
    provider_domains: &BTreeSet<String>,
) -> Result<SyncReport> {
    let clearbit: Vec<ClearbitCompany> = super::load_json(clearbit_path)?;
    info!(records = clearbit.len(), "loaded enrichment data");

    generate_companies(db, &clearbit, provider_domains)?;
    generate_associations(db, &clearbit, provider_domains)?;
    Ok(db.sync_up_all_entities().await?)
}
