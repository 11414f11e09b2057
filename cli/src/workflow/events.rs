//! Deal-event classification for related license sets.
//!
//! A related license set is every license (with its transactions) that
//! belongs to one customer relationship. Classification turns it into the
//! ordered deal-relevant events a deal generator acts on.

use crate::error::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LicenseType {
    Evaluation,
    OpenSource,
    Commercial,
    Academic,
    Community,
    Demonstration,
}

impl LicenseType {
    pub fn is_eval(&self) -> bool {
        matches!(self, LicenseType::Evaluation | LicenseType::OpenSource)
    }

    pub fn is_paid(&self) -> bool {
        matches!(self, LicenseType::Commercial | LicenseType::Academic)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaleType {
    New,
    Renewal,
    Upgrade,
    Refund,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct License {
    pub addon_license_id: String,
    pub license_type: LicenseType,
    pub maintenance_start_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub transaction_id: String,
    pub addon_license_id: String,
    pub sale_type: SaleType,
    pub maintenance_start_date: NaiveDate,
    pub vendor_amount: f64,
}

/// One license and the transactions recorded against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseGroup {
    pub license: License,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DealEvent {
    Eval {
        licenses: Vec<License>,
    },
    Purchase {
        licenses: Vec<License>,
        transaction: Option<Transaction>,
    },
    Renewal {
        transaction: Transaction,
    },
    Upgrade {
        transaction: Transaction,
    },
    /// Every transaction of a license was fully refunded.
    Refund {
        refunded: Vec<Transaction>,
    },
    /// A refund with no same-day transaction it could apply to.
    UnresolvedRefund {
        transaction: Transaction,
    },
}

#[derive(Debug, Default)]
struct RefundOutcome {
    remaining: Vec<Transaction>,
    refunded: Vec<Transaction>,
    unresolved: Vec<Transaction>,
}

/// Apply each refund to a transaction of the same day: an exact negated
/// amount cancels the transaction, a smaller refund reduces the first larger
/// transaction.
fn apply_refunds(transactions: &[Transaction]) -> RefundOutcome {
    let (refunds, mut remaining): (Vec<Transaction>, Vec<Transaction>) = transactions
        .iter()
        .cloned()
        .partition(|tx| tx.sale_type == SaleType::Refund);

    let mut outcome = RefundOutcome::default();
    for refund in refunds {
        let day = refund.maintenance_start_date;

        let full = remaining.iter().position(|tx| {
            tx.maintenance_start_date == day && tx.vendor_amount == -refund.vendor_amount
        });

        if let Some(pos) = full {
            outcome.refunded.push(remaining.remove(pos));
        } else if let Some(tx) = remaining.iter_mut().find(|tx| {
            tx.maintenance_start_date == day && tx.vendor_amount > refund.vendor_amount.abs()
        }) {
            tx.vendor_amount += refund.vendor_amount;
        } else {
            debug!(transaction = %refund.transaction_id, "refund has no same-day match");
            outcome.unresolved.push(refund);
        }
    }

    outcome.remaining = remaining;
    outcome
}

enum Record {
    License(License),
    Transaction(Transaction),
}

impl Record {
    /// Evals sort before everything else on the same day.
    fn sort_key(&self) -> (NaiveDate, bool) {
        match self {
            Record::License(l) => (l.maintenance_start_date, !l.license_type.is_eval()),
            Record::Transaction(tx) => (tx.maintenance_start_date, true),
        }
    }
}

fn find_license<'a>(groups: &'a [LicenseGroup], addon_license_id: &str) -> Option<&'a License> {
    groups
        .iter()
        .map(|group| &group.license)
        .find(|license| license.addon_license_id == addon_license_id)
}

/// Classify one related license set into deal events.
pub fn classify(groups: &[LicenseGroup]) -> Vec<DealEvent> {
    let mut events = Vec::new();
    let mut records = Vec::new();

    for group in groups {
        let outcome = apply_refunds(&group.transactions);

        if outcome.remaining.is_empty()
            && outcome.unresolved.is_empty()
            && !outcome.refunded.is_empty()
        {
            events.push(DealEvent::Refund {
                refunded: outcome.refunded,
            });
        }
        events.extend(
            outcome
                .unresolved
                .into_iter()
                .map(|transaction| DealEvent::UnresolvedRefund { transaction }),
        );

        // A license bought through a New transaction is covered by it.
        if !outcome
            .remaining
            .iter()
            .any(|tx| tx.sale_type == SaleType::New)
        {
            records.push(Record::License(group.license.clone()));
        }
        records.extend(outcome.remaining.into_iter().map(Record::Transaction));
    }

    records.sort_by_key(Record::sort_key);

    for record in records {
        match record {
            Record::License(license) if license.license_type.is_eval() => {
                events.push(DealEvent::Eval {
                    licenses: vec![license],
                });
            }
            Record::License(license) if license.license_type.is_paid() => {
                events.push(DealEvent::Purchase {
                    licenses: vec![license],
                    transaction: None,
                });
            }
            Record::License(_) => {}
            Record::Transaction(tx) => match tx.sale_type {
                SaleType::New => events.push(DealEvent::Purchase {
                    licenses: find_license(groups, &tx.addon_license_id)
                        .cloned()
                        .into_iter()
                        .collect(),
                    transaction: Some(tx),
                }),
                SaleType::Renewal => events.push(DealEvent::Renewal { transaction: tx }),
                SaleType::Upgrade => events.push(DealEvent::Upgrade { transaction: tx }),
                SaleType::Refund => {}
            },
        }
    }

    normalize_evals(events)
}

/// Fold evals into the purchase that follows them. Evals with no later
/// purchase are dropped, unless evals are all there is, in which case they
/// become one event.
fn normalize_evals(events: Vec<DealEvent>) -> Vec<DealEvent> {
    if events.len() < 2 {
        return events;
    }

    let mut pending: Option<Vec<License>> = None;
    let mut normalized = Vec::with_capacity(events.len());

    for event in events {
        match event {
            DealEvent::Eval { licenses } => {
                pending.get_or_insert_with(Vec::new).extend(licenses);
            }
            DealEvent::Purchase {
                licenses,
                transaction,
            } => {
                let licenses = match pending.take() {
                    Some(mut evals) => {
                        evals.extend(licenses);
                        evals
                    }
                    None => licenses,
                };
                normalized.push(DealEvent::Purchase {
                    licenses,
                    transaction,
                });
            }
            other => normalized.push(other),
        }
    }

    match pending {
        Some(licenses) if normalized.is_empty() => vec![DealEvent::Eval { licenses }],
        _ => normalized,
    }
}

/// Classify every related license set in `path` and print the events.
pub fn run(path: &Path) -> Result<Vec<Vec<DealEvent>>> {
    let sets: Vec<Vec<LicenseGroup>> = super::load_json(path)?;
    let events: Vec<Vec<DealEvent>> = sets.iter().map(Vec::as_slice).map(classify).collect();

    info!(
        sets = sets.len(),
        events = events.iter().map(Vec::len).sum::<usize>(),
        "classified license sets"
    );
    println!("{}", serde_json::to_string_pretty(&events)?);
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 3, day).unwrap()
    }

    fn license(id: &str, license_type: LicenseType, day: u32) -> License {
        License {
            addon_license_id: id.into(),
            license_type,
            maintenance_start_date: date(day),
        }
    }

    fn tx(id: &str, license: &str, sale_type: SaleType, day: u32, amount: f64) -> Transaction {
        Transaction {
            transaction_id: id.into(),
            addon_license_id: license.into(),
            sale_type,
            maintenance_start_date: date(day),
            vendor_amount: amount,
        }
    }

    fn group(license: License, transactions: Vec<Transaction>) -> LicenseGroup {
        LicenseGroup {
            license,
            transactions,
        }
    }

    fn kinds(events: &[DealEvent]) -> Vec<&'static str> {
        events
            .iter()
            .map(|e| match e {
                DealEvent::Eval { .. } => "eval",
                DealEvent::Purchase { .. } => "purchase",
                DealEvent::Renewal { .. } => "renewal",
                DealEvent::Upgrade { .. } => "upgrade",
                DealEvent::Refund { .. } => "refund",
                DealEvent::UnresolvedRefund { .. } => "unresolvedRefund",
            })
            .collect()
    }

    #[test]
    fn eval_is_folded_into_following_purchase() {
        let events = classify(&[
            group(license("E1", LicenseType::Evaluation, 1), vec![]),
            group(
                license("L1", LicenseType::Commercial, 5),
                vec![
                    tx("T1", "L1", SaleType::New, 5, 100.0),
                    tx("T2", "L1", SaleType::Renewal, 20, 100.0),
                ],
            ),
        ]);

        assert_eq!(kinds(&events), vec!["purchase", "renewal"]);
        match &events[0] {
            DealEvent::Purchase {
                licenses,
                transaction,
            } => {
                let ids: Vec<&str> = licenses.iter().map(|l| l.addon_license_id.as_str()).collect();
                assert_eq!(ids, vec!["E1", "L1"]);
                assert_eq!(transaction.as_ref().unwrap().transaction_id, "T1");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn evals_alone_become_one_event() {
        let events = classify(&[
            group(license("E1", LicenseType::Evaluation, 1), vec![]),
            group(license("E2", LicenseType::OpenSource, 3), vec![]),
        ]);

        assert_eq!(
            events,
            vec![DealEvent::Eval {
                licenses: vec![
                    license("E1", LicenseType::Evaluation, 1),
                    license("E2", LicenseType::OpenSource, 3),
                ]
            }]
        );
    }

    #[test]
    fn trailing_eval_after_purchase_is_dropped() {
        let events = classify(&[
            group(license("L1", LicenseType::Commercial, 1), vec![]),
            group(license("E1", LicenseType::Evaluation, 9), vec![]),
        ]);

        assert_eq!(kinds(&events), vec!["purchase"]);
    }

    #[test]
    fn same_day_eval_sorts_first() {
        let events = classify(&[
            group(license("L1", LicenseType::Academic, 4), vec![]),
            group(license("E1", LicenseType::Evaluation, 4), vec![]),
        ]);

        match &events[..] {
            [DealEvent::Purchase { licenses, .. }] => {
                assert_eq!(licenses[0].addon_license_id, "E1");
                assert_eq!(licenses[1].addon_license_id, "L1");
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn full_refund_cancels_the_sale() {
        let events = classify(&[group(
            license("L1", LicenseType::Commercial, 2),
            vec![
                tx("T1", "L1", SaleType::New, 2, 250.0),
                tx("R1", "L1", SaleType::Refund, 2, -250.0),
            ],
        )]);

        // The license is still a paid license once its New sale is gone.
        assert_eq!(kinds(&events), vec!["refund", "purchase"]);
        match &events[0] {
            DealEvent::Refund { refunded } => assert_eq!(refunded[0].transaction_id, "T1"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn partial_refund_reduces_the_amount() {
        let events = classify(&[group(
            license("L1", LicenseType::Commercial, 2),
            vec![
                tx("T1", "L1", SaleType::New, 2, 250.0),
                tx("R1", "L1", SaleType::Refund, 2, -50.0),
            ],
        )]);

        match &events[..] {
            [DealEvent::Purchase {
                transaction: Some(sale),
                ..
            }] => assert_eq!(sale.vendor_amount, 200.0),
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn unmatched_refund_is_reported() {
        let events = classify(&[group(
            license("L1", LicenseType::Commercial, 2),
            vec![
                tx("T1", "L1", SaleType::Upgrade, 2, 40.0),
                tx("R1", "L1", SaleType::Refund, 7, -40.0),
            ],
        )]);

        assert_eq!(kinds(&events), vec!["unresolvedRefund", "purchase", "upgrade"]);
    }

    #[test]
    fn run_reads_license_sets_from_json() {
        let dir = std::env::temp_dir().join(format!("hubsync-events-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("deal-events.json");
        std::fs::write(
            &path,
            r#"[[{
                "license": {
                    "addonLicenseId": "L1",
                    "licenseType": "COMMERCIAL",
                    "maintenanceStartDate": "2021-03-02"
                },
                "transactions": [{
                    "transactionId": "T1",
                    "addonLicenseId": "L1",
                    "saleType": "New",
                    "maintenanceStartDate": "2021-03-02",
                    "vendorAmount": 99.5
                }]
            }]]"#,
        )
        .unwrap();

        let events = run(&path).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(kinds(&events[0]), vec!["purchase"]);
        let json = serde_json::to_value(&events[0][0]).unwrap();
        assert_eq!(json["type"], "purchase");
        assert_eq!(json["transaction"]["vendorAmount"], 99.5);

        std::fs::remove_dir_all(&dir).ok();
    }
}
