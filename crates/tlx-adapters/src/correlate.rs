//! Correlation of header rows with their term and index rows.
//!
//! Fetchers collect keys in primary-query row order, issue one `= ANY($1)`
//! query per lookup, and group the results by deal key. Non-standard headers
//! go through [`classify`] and [`splice`]: their header row carries an initial
//! term whose descriptive fields are copied onto every fetched term.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use sqlx::FromRow;
use tlx_core::{DealFamily, DealHeader, DealTerm, PriceIndex};
use tlx_storage::{LedgerParams, LedgerRow, LedgerSource, Statement};
use tracing::debug;

use crate::{capacity, emission, misc_charge, power, power_swap, transmission, FetchError};

/// Keys in first-seen order, without duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationKeys<K> {
    ordered: Vec<K>,
    seen: BTreeSet<K>,
}

impl<K> Default for CorrelationKeys<K> {
    fn default() -> Self {
        Self {
            ordered: Vec::new(),
            seen: BTreeSet::new(),
        }
    }
}

impl<K: Ord + Copy> CorrelationKeys<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the key was already present.
    pub fn push(&mut self, key: K) -> bool {
        if self.seen.insert(key) {
            self.ordered.push(key);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.seen.contains(key)
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn as_slice(&self) -> &[K] {
        &self.ordered
    }
}

impl<K: Ord + Copy> FromIterator<K> for CorrelationKeys<K> {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        let mut keys = Self::new();
        for key in iter {
            keys.push(key);
        }
        keys
    }
}

/// Keys for an index lookup: whole deals, or individual volume sequences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexKeys {
    Deals(CorrelationKeys<i64>),
    Sequences(CorrelationKeys<(i64, i32)>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRow {
    pub vol_seq: i32,
    pub index: PriceIndex,
}

/// Index columns as stored in the per-family index tables.
#[derive(Debug, Clone, Deserialize, FromRow)]
pub(crate) struct IndexColumns {
    pub deal_key: i64,
    #[sqlx(default)]
    #[serde(default)]
    pub vol_seq: Option<i32>,
    pub publication: Option<String>,
    pub pub_index: Option<String>,
    pub frequency: Option<String>,
}

impl IndexColumns {
    pub fn into_keyed(self) -> (i64, IndexRow) {
        let row = IndexRow {
            vol_seq: self.vol_seq.unwrap_or_default(),
            index: PriceIndex::new(
                self.publication.unwrap_or_default(),
                self.pub_index.unwrap_or_default(),
                self.frequency.unwrap_or_default(),
            ),
        };
        (self.deal_key, row)
    }
}

/// How the term of one header row is completed.
#[derive(Debug, Clone, PartialEq)]
pub enum RowTerm {
    /// The header row carries the deal's only term.
    Complete(DealTerm),
    /// The row carries an initial term; actual terms come from a lookup.
    Lookup(DealTerm),
}

impl RowTerm {
    pub fn from_flag(nonstd_flag: Option<&str>, term: DealTerm) -> Self {
        if crate::common::is_standard(nonstd_flag) {
            RowTerm::Complete(term)
        } else {
            RowTerm::Lookup(term)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Classified {
    /// Every header in row order; complete ones already carry their term.
    pub headers: Vec<DealHeader>,
    pub needs_lookup: CorrelationKeys<i64>,
    /// Initial term per non-standard deal key.
    pub side_table: BTreeMap<i64, DealTerm>,
}

pub fn classify(rows: impl IntoIterator<Item = (DealHeader, RowTerm)>) -> Classified {
    let mut classified = Classified::default();
    for (mut header, term) in rows {
        match term {
            RowTerm::Complete(mut term) => {
                term.vol_seq = 0;
                header.terms.push(term);
            }
            RowTerm::Lookup(term) => {
                classified.needs_lookup.push(header.deal_key);
                classified.side_table.insert(header.deal_key, term);
            }
        }
        classified.headers.push(header);
    }
    classified
}

/// Appends fetched terms to non-standard headers, backfilled from the side table.
///
/// The initial terms themselves are discarded.
pub fn splice(
    classified: Classified,
    fetched: &BTreeMap<i64, Vec<DealTerm>>,
    backfill: fn(&DealTerm, &mut DealTerm),
) -> Vec<DealHeader> {
    let Classified {
        mut headers,
        side_table,
        ..
    } = classified;

    for header in &mut headers {
        let Some(initial) = side_table.get(&header.deal_key) else {
            continue;
        };
        let Some(terms) = fetched.get(&header.deal_key) else {
            debug!(deal_key = header.deal_key, "no terms found for non-standard deal");
            continue;
        };
        for term in terms {
            let mut term = term.clone();
            backfill(initial, &mut term);
            header.terms.push(term);
        }
    }
    headers
}

pub(crate) fn group_by_key<T>(rows: impl IntoIterator<Item = (i64, T)>) -> BTreeMap<i64, Vec<T>> {
    let mut grouped: BTreeMap<i64, Vec<T>> = BTreeMap::new();
    for (key, row) in rows {
        grouped.entry(key).or_default().push(row);
    }
    grouped
}

/// Volume sequence for the row at `position` within its deal's group.
fn positional_seq(deal_key: i64, position: usize) -> Result<i32, FetchError> {
    i32::try_from(position).map_err(|_| FetchError::SequenceOverflow { deal_key, position })
}

/// Groups rows by key, numbering each group `0..N-1` in row order.
pub(crate) fn group_positional<T>(
    rows: impl IntoIterator<Item = (i64, T)>,
    assign: fn(&mut T, i32),
) -> Result<BTreeMap<i64, Vec<T>>, FetchError> {
    let mut grouped: BTreeMap<i64, Vec<T>> = BTreeMap::new();
    for (key, mut row) in rows {
        let group = grouped.entry(key).or_default();
        assign(&mut row, positional_seq(key, group.len())?);
        group.push(row);
    }
    Ok(grouped)
}

pub(crate) async fn fetch_keyed_rows<S: LedgerSource, R: LedgerRow>(
    ledger: &S,
    statement: Statement,
    keys: &CorrelationKeys<i64>,
) -> Result<Vec<R>, FetchError> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }
    let rows: Vec<R> = ledger
        .fetch_rows(&statement.bind(LedgerParams::Keys(keys.as_slice().to_vec())))
        .await?;
    debug!(
        statement = statement.name,
        keys = keys.len(),
        rows = rows.len(),
        "correlated rows fetched"
    );
    Ok(rows)
}

pub(crate) async fn fetch_sequenced_rows<S: LedgerSource, R: LedgerRow>(
    ledger: &S,
    statement: Statement,
    keys: &CorrelationKeys<(i64, i32)>,
) -> Result<Vec<R>, FetchError> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }
    let rows: Vec<R> = ledger
        .fetch_rows(&statement.bind(LedgerParams::KeyedSequences(keys.as_slice().to_vec())))
        .await?;
    debug!(
        statement = statement.name,
        keys = keys.len(),
        rows = rows.len(),
        "correlated rows fetched"
    );
    Ok(rows)
}

/// Terms of the given deals, grouped by deal key.
///
/// For emission options the keys are the underlying emission deal keys.
pub async fn fetch_terms<S: LedgerSource>(
    ledger: &S,
    family: DealFamily,
    keys: &CorrelationKeys<i64>,
) -> Result<BTreeMap<i64, Vec<DealTerm>>, FetchError> {
    match family {
        DealFamily::Power => power::fetch_terms(ledger, keys).await,
        DealFamily::PowerSwap => power_swap::fetch_terms(ledger, keys).await,
        DealFamily::Capacity => capacity::fetch_terms(ledger, keys).await,
        DealFamily::Emission | DealFamily::EmissionOption => {
            emission::fetch_terms(ledger, family, keys).await
        }
        DealFamily::Transmission => transmission::fetch_terms(ledger, keys).await,
        DealFamily::MiscCharge => misc_charge::fetch_terms(ledger, keys).await,
        _ => Err(FetchError::NoCorrelation {
            family,
            lookup: "term",
        }),
    }
}

/// Index rows grouped by deal key. Callers match on `vol_seq` where relevant.
pub async fn fetch_indexes<S: LedgerSource>(
    ledger: &S,
    family: DealFamily,
    keys: &IndexKeys,
) -> Result<BTreeMap<i64, Vec<IndexRow>>, FetchError> {
    match (family, keys) {
        (DealFamily::Power, IndexKeys::Sequences(keys)) => power::fetch_indexes(ledger, keys).await,
        (DealFamily::Capacity, IndexKeys::Deals(keys)) => capacity::fetch_indexes(ledger, keys).await,
        _ => Err(FetchError::NoCorrelation {
            family,
            lookup: "index",
        }),
    }
}
