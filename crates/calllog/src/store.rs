//! In-memory stores backing the call log job.
//!
//! Both stores double as chunk writers. Poisoned locks surface as resource
//! errors so the writing chunk fails instead of the process.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chunkflow_batch::item::Writer;
use chunkflow_batch::{InMemoryApprovals, ItemError};

use crate::bill::Bill;
use crate::call::PhoneCall;

fn read<'a, T>(lock: &'a RwLock<T>, store: &str) -> Result<RwLockReadGuard<'a, T>, ItemError> {
    lock.read()
        .map_err(|_| ItemError::resource(format!("{store} lock poisoned")))
}

fn write<'a, T>(lock: &'a RwLock<T>, store: &str) -> Result<RwLockWriteGuard<'a, T>, ItemError> {
    lock.write()
        .map_err(|_| ItemError::resource(format!("{store} lock poisoned")))
}

/// Calls placed by one subscriber.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallUsage {
    pub calls: u64,
    pub duration: Duration,
}

#[derive(Debug, Default)]
pub struct PhoneCallStore {
    calls: RwLock<Vec<PhoneCall>>,
}

impl PhoneCallStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn persist(&self, calls: &[PhoneCall]) -> Result<(), ItemError> {
        write(&self.calls, "call store")?.extend_from_slice(calls);
        Ok(())
    }

    /// Every subscriber seen on either end of a call, sorted.
    pub fn subscribers(&self) -> Result<Vec<String>, ItemError> {
        let calls = read(&self.calls, "call store")?;
        let unique: BTreeSet<&str> = calls
            .iter()
            .flat_map(|c| [c.from.as_str(), c.to.as_str()])
            .collect();
        Ok(unique.into_iter().map(str::to_string).collect())
    }

    pub fn usage(&self, subscriber: &str) -> Result<CallUsage, ItemError> {
        let calls = read(&self.calls, "call store")?;
        Ok(calls
            .iter()
            .filter(|c| c.from == subscriber)
            .fold(CallUsage::default(), |acc, c| CallUsage {
                calls: acc.calls + 1,
                duration: acc.duration + c.duration,
            }))
    }

    pub fn len(&self) -> usize {
        self.calls.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reset(&self) {
        if let Ok(mut calls) = self.calls.write() {
            calls.clear();
        }
    }
}

impl Writer<PhoneCall> for PhoneCallStore {
    fn write(&self, items: &[PhoneCall]) -> Result<(), ItemError> {
        self.persist(items)
    }
}

/// Bills keyed by subscriber. Saving replaces the subscriber's previous bill,
/// so a rerun never duplicates bills.
#[derive(Debug, Default)]
pub struct BillStore {
    bills: RwLock<BTreeMap<String, Bill>>,
}

impl BillStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save(&self, bills: &[Bill]) -> Result<(), ItemError> {
        let mut stored = write(&self.bills, "bill store")?;
        for bill in bills {
            stored.insert(bill.subscriber.clone(), bill.clone());
        }
        Ok(())
    }

    pub fn find_all(&self) -> Result<Vec<Bill>, ItemError> {
        Ok(read(&self.bills, "bill store")?.values().cloned().collect())
    }

    pub fn get(&self, subscriber: &str) -> Result<Option<Bill>, ItemError> {
        Ok(read(&self.bills, "bill store")?.get(subscriber).cloned())
    }

    pub fn reset(&self) {
        if let Ok(mut bills) = self.bills.write() {
            bills.clear();
        }
    }
}

impl Writer<Bill> for BillStore {
    fn write(&self, items: &[Bill]) -> Result<(), ItemError> {
        self.save(items)
    }
}

/// Everything the call log job reads from and writes to.
#[derive(Debug, Default, Clone)]
pub struct CallLogStores {
    pub calls: Arc<PhoneCallStore>,
    pub bills: Arc<BillStore>,
    pub approvals: Arc<InMemoryApprovals>,
}

impl CallLogStores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        self.calls.reset();
        self.bills.reset();
        self.approvals.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(from: &str, to: &str, secs: u64) -> PhoneCall {
        PhoneCall::new(from, to, Duration::from_secs(secs))
    }

    #[test]
    fn subscribers_cover_both_ends_once() {
        let store = PhoneCallStore::new();
        store
            .persist(&[call("b", "a", 1), call("a", "c", 2), call("b", "c", 3)])
            .unwrap();
        assert_eq!(store.subscribers().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn usage_counts_only_outgoing_calls() {
        let store = PhoneCallStore::new();
        store
            .persist(&[call("a", "b", 60), call("a", "c", 30), call("c", "a", 5)])
            .unwrap();
        assert_eq!(
            store.usage("a").unwrap(),
            CallUsage {
                calls: 2,
                duration: Duration::from_secs(90)
            }
        );
        assert_eq!(store.usage("b").unwrap(), CallUsage::default());
    }

    #[test]
    fn saving_a_bill_twice_keeps_one_copy() {
        let store = BillStore::new();
        let mut bill = Bill::new("a", 1, Duration::from_secs(10));
        store.save(std::slice::from_ref(&bill)).unwrap();
        bill.send();
        store.save(&[bill]).unwrap();

        let all = store.find_all().unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].sent);
    }

    #[test]
    fn reset_clears_everything() {
        let stores = CallLogStores::new();
        stores.calls.persist(&[call("a", "b", 1)]).unwrap();
        stores.bills.save(&[Bill::new("a", 1, Duration::from_secs(1))]).unwrap();
        stores.approvals.set_approved("calls.txt", true);

        stores.reset();

        assert!(stores.calls.is_empty());
        assert!(stores.bills.find_all().unwrap().is_empty());
        assert!(!chunkflow_batch::ApprovalCheck::is_approved(&*stores.approvals, "calls.txt"));
    }
}
