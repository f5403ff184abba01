//! Ordering and running balances of one account.
//!
//! An [`AccountBook`] holds every entry of an account as loaded inside the
//! current unit of work. Mutations only record what changed and the earliest
//! position they touched; [`AccountBook::settle`] then rejects colliding
//! positions, walks the ordered suffix from that position to the end
//! recomputing balances, and returns the rows that have to be written back.
//!
//! Entries without a sequence number are detached: they stay in the book but
//! have no balance and are skipped by the walk.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::{EntryPatch, LedgerEntry, LedgerError, NewEntry, ResultLedger};

type Position = (NaiveDate, i64);

/// Sort into account order; detached entries go last, by date.
pub(crate) fn ledger_order(entries: &mut [LedgerEntry]) {
    entries.sort_by_key(|e| (e.is_detached(), e.tx_date, e.sequence_num, e.id));
}

/// Requested position of an existing entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reassignment {
    pub id: Uuid,
    pub tx_date: NaiveDate,
    /// `None` detaches the entry from the account order.
    pub sequence_num: Option<i64>,
}

impl Reassignment {
    pub fn to(id: Uuid, tx_date: NaiveDate, sequence_num: i64) -> Self {
        Self {
            id,
            tx_date,
            sequence_num: Some(sequence_num),
        }
    }

    pub fn detach(id: Uuid, tx_date: NaiveDate) -> Self {
        Self {
            id,
            tx_date,
            sequence_num: None,
        }
    }
}

/// Rows to write back after [`AccountBook::settle`].
///
/// `moved` lists updated entries that left the slot they held in storage;
/// those slots are vacated before any final position is written.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct BookDiff {
    pub account_id: i64,
    pub inserted: Vec<LedgerEntry>,
    pub updated: Vec<LedgerEntry>,
    pub deleted: Vec<Uuid>,
    pub moved: Vec<Uuid>,
    pub rebalanced: usize,
}

impl BookDiff {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

#[derive(Debug)]
pub(crate) struct AccountBook {
    account_id: i64,
    entries: Vec<LedgerEntry>,
    stored: HashMap<Uuid, LedgerEntry>,
    touched: Option<Position>,
    full: bool,
}

impl AccountBook {
    pub fn new(account_id: i64, entries: Vec<LedgerEntry>) -> Self {
        let stored = entries.iter().map(|e| (e.id, e.clone())).collect();
        Self {
            account_id,
            entries,
            stored,
            touched: None,
            full: false,
        }
    }

    pub fn account_id(&self) -> i64 {
        self.account_id
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn get(&self, id: Uuid) -> Option<&LedgerEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn find_by_source(&self, source_id: &str) -> Option<&LedgerEntry> {
        self.entries
            .iter()
            .find(|e| e.source_id.as_deref() == Some(source_id))
    }

    /// First free slot after the last entry of `tx_date`.
    pub fn next_sequence(&self, tx_date: NaiveDate) -> i64 {
        self.entries
            .iter()
            .filter(|e| e.tx_date == tx_date)
            .filter_map(|e| e.sequence_num)
            .max()
            .map_or(0, |max| max + 1)
    }

    fn index_of(&self, id: Uuid) -> ResultLedger<usize> {
        self.entries
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| LedgerError::KeyNotFound(id.to_string()))
    }

    fn touch(&mut self, position: Option<Position>) {
        if let Some(position) = position {
            self.touched = Some(self.touched.map_or(position, |current| current.min(position)));
        }
    }

    fn relocate(&mut self, index: usize, tx_date: NaiveDate, sequence_num: Option<i64>) {
        self.touch(self.entries[index].position());
        let entry = &mut self.entries[index];
        entry.tx_date = tx_date;
        entry.sequence_num = sequence_num;
        let position = entry.position();
        self.touch(position);
    }

    /// Add an entry, or amend the existing one carrying the same source id.
    pub fn place(&mut self, entry: NewEntry) -> ResultLedger<Uuid> {
        if let Some(sequence) = entry.sequence_num
            && sequence < 0
        {
            return Err(LedgerError::InvalidReassignment(format!(
                "negative sequence number {sequence}"
            )));
        }

        let existing = entry
            .source_id
            .as_deref()
            .and_then(|source_id| self.find_by_source(source_id))
            .map(|e| e.id);
        if let Some(id) = existing {
            self.amend(id, EntryPatch::from(&entry))?;
            if let Some(sequence) = entry.sequence_num {
                let index = self.index_of(id)?;
                if self.entries[index].sequence_num != Some(sequence) {
                    self.relocate(index, entry.tx_date, Some(sequence));
                }
            }
            return Ok(id);
        }

        let mut entry = entry.into_entry();
        if entry.sequence_num.is_none() {
            entry.sequence_num = Some(self.next_sequence(entry.tx_date));
        }
        self.touch(entry.position());
        let id = entry.id;
        self.entries.push(entry);
        Ok(id)
    }

    /// Apply `patch`; a new date appends the entry after that date's last slot.
    pub fn amend(&mut self, id: Uuid, patch: EntryPatch) -> ResultLedger<()> {
        let index = self.index_of(id)?;
        if let Some(details) = patch.details {
            self.entries[index].details = details;
        }
        if let Some(amount) = patch.amount_minor
            && amount != self.entries[index].amount_minor
        {
            self.entries[index].amount_minor = amount;
            self.touch(self.entries[index].position());
        }
        if let Some(tx_date) = patch.tx_date
            && tx_date != self.entries[index].tx_date
        {
            let sequence = self.entries[index]
                .sequence_num
                .map(|_| self.next_sequence(tx_date));
            self.relocate(index, tx_date, sequence);
        }
        Ok(())
    }

    /// Move entries to new positions. Nothing is applied unless every
    /// reassignment is valid; collisions are only detected by [`settle`].
    ///
    ///  [`settle`]: AccountBook::settle
    pub fn reassign(&mut self, moves: &[Reassignment]) -> ResultLedger<()> {
        let mut seen = HashSet::with_capacity(moves.len());
        for request in moves {
            if !seen.insert(request.id) {
                return Err(LedgerError::InvalidReassignment(format!(
                    "entry {} is reassigned twice",
                    request.id
                )));
            }
            if request.sequence_num.is_some_and(|s| s < 0) {
                return Err(LedgerError::InvalidReassignment(format!(
                    "negative sequence number for entry {}",
                    request.id
                )));
            }
        }
        let indexes = moves
            .iter()
            .map(|request| self.index_of(request.id))
            .collect::<ResultLedger<Vec<_>>>()?;
        for (request, index) in moves.iter().zip(indexes) {
            self.relocate(index, request.tx_date, request.sequence_num);
        }
        Ok(())
    }

    pub fn remove(&mut self, id: Uuid) -> bool {
        let Some(index) = self.entries.iter().position(|e| e.id == id) else {
            return false;
        };
        let entry = self.entries.remove(index);
        self.touch(entry.position());
        true
    }

    pub fn remove_by_source(&mut self, source_id: &str) -> bool {
        match self.find_by_source(source_id).map(|e| e.id) {
            Some(id) => self.remove(id),
            None => false,
        }
    }

    /// Recompute every balance from the first entry on the next settle.
    pub fn recalculate_all(&mut self) {
        self.full = true;
    }

    fn check_collisions(&self) -> ResultLedger<()> {
        let mut positions: Vec<Position> = self
            .entries
            .iter()
            .filter_map(LedgerEntry::position)
            .collect();
        positions.sort_unstable();
        match positions.windows(2).find(|pair| pair[0] == pair[1]) {
            Some(pair) => Err(LedgerError::SequenceCollision {
                account_id: self.account_id,
                tx_date: pair[0].0,
                sequence: pair[0].1,
            }),
            None => Ok(()),
        }
    }

    fn walk_start(&self, ordered: usize) -> Option<usize> {
        if self.full {
            return Some(0);
        }
        let touched = self.touched?;
        let start = self.entries[..ordered]
            .iter()
            .position(|e| e.position().is_some_and(|p| p >= touched))
            .unwrap_or(ordered);
        // A predecessor without a balance cannot seed the walk.
        if start > 0 && self.entries[start - 1].balance_minor.is_none() {
            return Some(0);
        }
        Some(start)
    }

    /// Validate positions, rebalance and return the pending writes.
    ///
    /// A running balance outside `i64` fails with
    /// [`LedgerError::BalanceOverflow`]; the book must then be discarded.
    ///
    /// On success the book treats its current state as stored, so further
    /// mutations produce a diff relative to this settle.
    pub fn settle(&mut self) -> ResultLedger<BookDiff> {
        self.check_collisions()?;

        ledger_order(&mut self.entries);
        let ordered = self.entries.iter().take_while(|e| !e.is_detached()).count();

        if let Some(start) = self.walk_start(ordered) {
            let account_id = self.account_id;
            let mut running = start
                .checked_sub(1)
                .and_then(|i| self.entries[i].balance_minor)
                .unwrap_or(0);
            for entry in &mut self.entries[start..ordered] {
                running = running.checked_add(entry.amount_minor).ok_or(
                    LedgerError::BalanceOverflow {
                        account_id,
                        tx_date: entry.tx_date,
                    },
                )?;
                entry.balance_minor = Some(running);
            }
        }
        for entry in &mut self.entries[ordered..] {
            entry.balance_minor = None;
        }

        let diff = self.diff();
        debug!(
            account_id = self.account_id,
            inserted = diff.inserted.len(),
            updated = diff.updated.len(),
            deleted = diff.deleted.len(),
            rebalanced = diff.rebalanced,
            "account settled"
        );

        self.stored = self.entries.iter().map(|e| (e.id, e.clone())).collect();
        self.touched = None;
        self.full = false;
        Ok(diff)
    }

    fn diff(&self) -> BookDiff {
        let mut diff = BookDiff {
            account_id: self.account_id,
            ..BookDiff::default()
        };
        let current: HashSet<Uuid> = self.entries.iter().map(|e| e.id).collect();
        diff.deleted = self
            .stored
            .keys()
            .filter(|id| !current.contains(id))
            .copied()
            .collect();
        diff.deleted.sort_unstable();

        for entry in &self.entries {
            match self.stored.get(&entry.id) {
                None => {
                    diff.rebalanced += 1;
                    diff.inserted.push(entry.clone());
                }
                Some(before) if before == entry => {}
                Some(before) => {
                    if before.balance_minor != entry.balance_minor {
                        diff.rebalanced += 1;
                    }
                    if before.position().is_some() && before.position() != entry.position() {
                        diff.moved.push(entry.id);
                    }
                    diff.updated.push(entry.clone());
                }
            }
        }
        diff
    }
}
