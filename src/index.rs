//! Query index over per-tenant record metadata
//!
//! Lets the record store filter, sort and paginate without asking the remote
//! network for anything. Entries live in sled:
//!
//! ```text
//! INDEX/
//! └── (sled)
//!     ├── entries   {tenant}\0{seq:u64be}  -> IndexEntry (msgpack)
//!     └── cids      {tenant}\0{cid}        -> seq
//! ```
//!
//! `seq` is the insertion identifier. Equal sort keys are ordered by it, which
//! keeps pages stable: a cursor names the last returned `(sort value, seq)`
//! and the next page starts strictly after it.

use crate::error::{Result, StorageError};
use crate::mapping::check_key_part;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionResult, TransactionError, Transactional};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

const SEPARATOR: u8 = 0;

/// A single indexed property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexValue {
    Bool(bool),
    Integer(i64),
    Number(f64),
    String(String),
}

/// 2^63 as f64; the first float above every i64
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// Exact comparison of an integer against a float, ordering NaN the way
/// `f64::total_cmp` does
fn cmp_integer_number(i: i64, f: f64) -> Ordering {
    if f.is_nan() {
        return if f.is_sign_negative() {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }
    if f >= I64_BOUND {
        return Ordering::Less;
    }
    if f < -I64_BOUND {
        return Ordering::Greater;
    }
    let whole = f.trunc();
    // whole is integral and within i64 range, so the cast is exact
    match i.cmp(&(whole as i64)) {
        Ordering::Equal => 0.0f64.total_cmp(&(f - whole)),
        other => other,
    }
}

impl IndexValue {
    fn rank(&self) -> u8 {
        match self {
            IndexValue::Bool(_) => 0,
            IndexValue::Integer(_) | IndexValue::Number(_) => 1,
            IndexValue::String(_) => 2,
        }
    }

    /// Total order: bools, then numbers, then strings.
    ///
    /// Integers and floats share one numeric order; integers compare exactly
    /// at any magnitude.
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (IndexValue::Bool(a), IndexValue::Bool(b)) => a.cmp(b),
            (IndexValue::Integer(a), IndexValue::Integer(b)) => a.cmp(b),
            (IndexValue::Number(a), IndexValue::Number(b)) => a.total_cmp(b),
            (IndexValue::Integer(a), IndexValue::Number(b)) => cmp_integer_number(*a, *b),
            (IndexValue::Number(a), IndexValue::Integer(b)) => cmp_integer_number(*b, *a).reverse(),
            (IndexValue::String(a), IndexValue::String(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl From<bool> for IndexValue {
    fn from(v: bool) -> Self {
        IndexValue::Bool(v)
    }
}

impl From<i64> for IndexValue {
    fn from(v: i64) -> Self {
        IndexValue::Integer(v)
    }
}

impl From<f64> for IndexValue {
    fn from(v: f64) -> Self {
        IndexValue::Number(v)
    }
}

impl From<&str> for IndexValue {
    fn from(v: &str) -> Self {
        IndexValue::String(v.to_string())
    }
}

impl From<String> for IndexValue {
    fn from(v: String) -> Self {
        IndexValue::String(v)
    }
}

/// Properties stored alongside a record for querying
pub type IndexedProperties = BTreeMap<String, IndexValue>;

/// Bounds for a range match; absent bounds are open
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeFilter {
    pub gt: Option<IndexValue>,
    pub gte: Option<IndexValue>,
    pub lt: Option<IndexValue>,
    pub lte: Option<IndexValue>,
}

/// Condition on one property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterValue {
    Equal(IndexValue),
    OneOf(Vec<IndexValue>),
    Range(RangeFilter),
    Prefix(String),
}

impl FilterValue {
    fn matches(&self, value: &IndexValue) -> bool {
        match self {
            FilterValue::Equal(expected) => value.total_cmp(expected) == Ordering::Equal,
            FilterValue::OneOf(options) => options
                .iter()
                .any(|o| value.total_cmp(o) == Ordering::Equal),
            FilterValue::Range(range) => {
                let above = |bound: &Option<IndexValue>, allow_eq: bool| match bound {
                    Some(b) => match value.total_cmp(b) {
                        Ordering::Greater => true,
                        Ordering::Equal => allow_eq,
                        Ordering::Less => false,
                    },
                    None => true,
                };
                let below = |bound: &Option<IndexValue>, allow_eq: bool| match bound {
                    Some(b) => match value.total_cmp(b) {
                        Ordering::Less => true,
                        Ordering::Equal => allow_eq,
                        Ordering::Greater => false,
                    },
                    None => true,
                };
                above(&range.gt, false)
                    && above(&range.gte, true)
                    && below(&range.lt, false)
                    && below(&range.lte, true)
            }
            FilterValue::Prefix(prefix) => {
                matches!(value, IndexValue::String(s) if s.starts_with(prefix.as_str()))
            }
        }
    }
}

/// Property conditions that must all hold.
///
/// A query takes a list of these; an entry matches if any one matches, and
/// an empty list matches everything.
pub type Filter = BTreeMap<String, FilterValue>;

fn filter_matches(filter: &Filter, properties: &IndexedProperties) -> bool {
    filter.iter().all(|(name, condition)| {
        properties
            .get(name)
            .map(|v| condition.matches(v))
            .unwrap_or(false)
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// Sort on a single property. Entries without the property are excluded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    pub property: String,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn ascending(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn descending(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: SortDirection::Descending,
        }
    }
}

/// Opaque continuation token
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

#[derive(Debug, Serialize, Deserialize)]
struct CursorPosition {
    value: Option<IndexValue>,
    seq: u64,
}

impl Cursor {
    fn encode(position: &CursorPosition) -> Result<Self> {
        let packed = rmp_serde::to_vec(position)?;
        Ok(Cursor(URL_SAFE_NO_PAD.encode(packed)))
    }

    fn decode(&self) -> Result<CursorPosition> {
        let packed = URL_SAFE_NO_PAD
            .decode(self.0.as_bytes())
            .map_err(|e| StorageError::InvalidCursor(e.to_string()))?;
        rmp_serde::from_slice(&packed).map_err(|e| StorageError::InvalidCursor(e.to_string()))
    }

    /// Rebuild a cursor from a token previously handed to a caller
    pub fn from_token(token: impl Into<String>) -> Self {
        Cursor(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pagination {
    pub limit: Option<usize>,
    pub cursor: Option<Cursor>,
}

impl Pagination {
    pub fn limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            cursor: None,
        }
    }

    pub fn after(mut self, cursor: Cursor) -> Self {
        self.cursor = Some(cursor);
        self
    }
}

/// A stored index entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub tenant: String,
    pub cid: String,
    /// Insertion identifier
    pub seq: u64,
    pub properties: IndexedProperties,
}

/// One page of query results
#[derive(Debug, Clone, Default)]
pub struct QueryPage {
    pub entries: Vec<IndexEntry>,
    /// Present when more entries follow
    pub cursor: Option<Cursor>,
}

fn tenant_prefix(tenant: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(tenant.len() + 1);
    key.extend_from_slice(tenant.as_bytes());
    key.push(SEPARATOR);
    key
}

fn entry_key(tenant: &str, seq: u64) -> Vec<u8> {
    let mut key = tenant_prefix(tenant);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

fn cid_key(tenant: &str, cid: &str) -> Vec<u8> {
    let mut key = tenant_prefix(tenant);
    key.extend_from_slice(cid.as_bytes());
    key
}

fn decode_seq(bytes: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StorageError::Serialization("corrupt index sequence".to_string()))?;
    Ok(u64::from_be_bytes(arr))
}

fn map_tx_error(e: TransactionError<StorageError>) -> StorageError {
    match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => StorageError::Database(e),
    }
}

/// Sort key of an entry under `sort`; `None` if the entry is not sortable
fn sort_value(entry: &IndexEntry, sort: Option<&SortSpec>) -> Option<Option<IndexValue>> {
    match sort {
        Some(spec) => entry.properties.get(&spec.property).cloned().map(Some),
        None => Some(None),
    }
}

/// Order two `(value, seq)` positions in the requested direction
fn compare_positions(
    a: (&Option<IndexValue>, u64),
    b: (&Option<IndexValue>, u64),
    direction: SortDirection,
) -> Ordering {
    let by_value = match (a.0, b.0) {
        (Some(x), Some(y)) => x.total_cmp(y),
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
    };
    let ordering = by_value.then(a.1.cmp(&b.1));
    match direction {
        SortDirection::Ascending => ordering,
        SortDirection::Descending => ordering.reverse(),
    }
}

/// Persistent, queryable index
pub struct IndexStore {
    db: sled::Db,
    entries: sled::Tree,
    cids: sled::Tree,
}

impl IndexStore {
    /// Open or create the index at `path`
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let db = sled::open(path.as_ref())?;
        let entries = db.open_tree("entries")?;
        let cids = db.open_tree("cids")?;

        info!(path = %path.as_ref().display(), "Opened index store");
        Ok(Self { db, entries, cids })
    }

    /// Add or replace the entry for `(tenant, cid)`
    pub fn insert(&self, tenant: &str, cid: &str, properties: IndexedProperties) -> Result<IndexEntry> {
        check_key_part("tenant", tenant)?;
        let seq = self.db.generate_id()?;
        let entry = IndexEntry {
            tenant: tenant.to_string(),
            cid: cid.to_string(),
            seq,
            properties,
        };
        let value = rmp_serde::to_vec(&entry)?;
        let new_key = entry_key(tenant, seq);
        let lookup_key = cid_key(tenant, cid);
        let seq_bytes = seq.to_be_bytes();

        (&self.entries, &self.cids)
            .transaction(|(entries, cids)| -> ConflictableTransactionResult<(), StorageError> {
                if let Some(old) = cids.get(&lookup_key)? {
                    if let Ok(arr) = <[u8; 8]>::try_from(old.as_ref()) {
                        entries.remove(entry_key(tenant, u64::from_be_bytes(arr)))?;
                    }
                }
                entries.insert(new_key.as_slice(), value.as_slice())?;
                cids.insert(lookup_key.as_slice(), &seq_bytes[..])?;
                Ok(())
            })
            .map_err(map_tx_error)?;

        debug!(tenant = %tenant, cid = %cid, seq = seq, "Indexed record");
        Ok(entry)
    }

    /// Look up the entry for a CID
    pub fn get(&self, tenant: &str, cid: &str) -> Result<Option<IndexEntry>> {
        check_key_part("tenant", tenant)?;
        let Some(seq) = self.cids.get(cid_key(tenant, cid))? else {
            return Ok(None);
        };
        match self.entries.get(entry_key(tenant, decode_seq(&seq)?))? {
            Some(bytes) => Ok(Some(rmp_serde::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Query one tenant's entries.
    ///
    /// `filters` are ORed; an empty slice matches all. Without `sort`, entries
    /// come back in insertion order.
    pub fn query(
        &self,
        tenant: &str,
        filters: &[Filter],
        sort: Option<&SortSpec>,
        pagination: &Pagination,
    ) -> Result<QueryPage> {
        check_key_part("tenant", tenant)?;
        let direction = sort.map(|s| s.direction).unwrap_or_default();
        let after = pagination.cursor.as_ref().map(Cursor::decode).transpose()?;

        let mut matched: Vec<(Option<IndexValue>, IndexEntry)> = Vec::new();
        for item in self.entries.scan_prefix(tenant_prefix(tenant)) {
            let (_, bytes) = item?;
            let entry: IndexEntry = rmp_serde::from_slice(&bytes)?;
            if entry.tenant != tenant {
                continue;
            }

            if !filters.is_empty() && !filters.iter().any(|f| filter_matches(f, &entry.properties)) {
                continue;
            }
            let Some(value) = sort_value(&entry, sort) else {
                continue;
            };
            if let Some(position) = &after {
                let cmp = compare_positions(
                    (&value, entry.seq),
                    (&position.value, position.seq),
                    direction,
                );
                if cmp != Ordering::Greater {
                    continue;
                }
            }
            matched.push((value, entry));
        }

        matched.sort_by(|a, b| compare_positions((&a.0, a.1.seq), (&b.0, b.1.seq), direction));

        let mut cursor = None;
        if let Some(limit) = pagination.limit {
            // One extra entry tells us whether another page exists
            matched.truncate(limit.saturating_add(1));
            if matched.len() > limit {
                matched.truncate(limit);
                if let Some((value, last)) = matched.last() {
                    cursor = Some(Cursor::encode(&CursorPosition {
                        value: value.clone(),
                        seq: last.seq,
                    })?);
                }
            }
        }

        debug!(
            tenant = %tenant,
            returned = matched.len(),
            more = cursor.is_some(),
            "Index query"
        );

        Ok(QueryPage {
            entries: matched.into_iter().map(|(_, e)| e).collect(),
            cursor,
        })
    }

    /// Remove the entry for `(tenant, cid)`; returns whether one existed
    pub fn delete(&self, tenant: &str, cid: &str) -> Result<bool> {
        check_key_part("tenant", tenant)?;
        let lookup_key = cid_key(tenant, cid);
        let existed = (&self.entries, &self.cids)
            .transaction(|(entries, cids)| -> ConflictableTransactionResult<bool, StorageError> {
                match cids.remove(lookup_key.as_slice())? {
                    Some(old) => {
                        if let Ok(arr) = <[u8; 8]>::try_from(old.as_ref()) {
                            entries.remove(entry_key(tenant, u64::from_be_bytes(arr)))?;
                        }
                        Ok(true)
                    }
                    None => Ok(false),
                }
            })
            .map_err(map_tx_error)?;

        if existed {
            debug!(tenant = %tenant, cid = %cid, "Removed index entry");
        }
        Ok(existed)
    }

    /// Remove every entry for every tenant
    pub fn clear(&self) -> Result<()> {
        self.entries.clear()?;
        self.cids.clear()?;
        info!("Cleared index store");
        Ok(())
    }

    /// Entry count for one tenant
    pub fn count(&self, tenant: &str) -> usize {
        self.entries.scan_prefix(tenant_prefix(tenant)).count()
    }

    /// Entry count across tenants
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flush changes to disk
    pub async fn flush(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }
}
