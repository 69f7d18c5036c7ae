//! Sparse accumulation types exchanged between shards and the combiner.
//!
//! All merges add on key collision; none overwrites.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::array::DenseArray;
use crate::types::{AssetId, RlzId};

/// Nonzero cells of a dense array as sorted `(flat_index, value)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseLosses {
    entries: Vec<(usize, f64)>,
}

impl SparseLosses {
    pub fn from_dense(array: &DenseArray) -> Self {
        let entries = array
            .data()
            .iter()
            .enumerate()
            .filter(|&(_, &v)| v != 0.0)
            .map(|(i, &v)| (i, v))
            .collect();
        SparseLosses { entries }
    }

    /// Takes unsorted pairs, summing duplicates.
    pub fn from_pairs(mut pairs: Vec<(usize, f64)>) -> Self {
        pairs.sort_by_key(|&(i, _)| i);
        let mut entries: Vec<(usize, f64)> = Vec::with_capacity(pairs.len());
        for (i, v) in pairs {
            match entries.last_mut() {
                Some(last) if last.0 == i => last.1 += v,
                _ => entries.push((i, v)),
            }
        }
        SparseLosses { entries }
    }

    pub fn entries(&self) -> &[(usize, f64)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add every pair into `array`.
    pub fn add_into(&self, array: &mut DenseArray) {
        let data = array.data_mut();
        for &(i, v) in &self.entries {
            data[i] += v;
        }
    }

    pub fn to_dense(&self, shape: &[usize]) -> DenseArray {
        let mut array = DenseArray::zeros(shape);
        self.add_into(&mut array);
        array
    }

    /// Sorted merge, summing on collision.
    pub fn merge(&mut self, other: &SparseLosses) {
        let mut out = Vec::with_capacity(self.entries.len() + other.entries.len());
        let (mut a, mut b) = (self.entries.iter().peekable(), other.entries.iter().peekable());
        loop {
            match (a.peek(), b.peek()) {
                (Some(&&(i, x)), Some(&&(j, y))) => {
                    if i == j {
                        out.push((i, x + y));
                        a.next();
                        b.next();
                    } else if i < j {
                        out.push((i, x));
                        a.next();
                    } else {
                        out.push((j, y));
                        b.next();
                    }
                }
                (Some(&&p), None) => {
                    out.push(p);
                    a.next();
                }
                (None, Some(&&p)) => {
                    out.push(p);
                    b.next();
                }
                (None, None) => break,
            }
        }
        self.entries = out;
    }
}

/// Annualized loss ratios: `(loss column, rlz) → asset → Σ ratio × ses_ratio`.
///
/// Only touched assets appear. An asset whose ratios were all zero is
/// present with 0.0; an asset below the minimum intensity is absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AvgLosses {
    cells: BTreeMap<(usize, RlzId), BTreeMap<AssetId, f64>>,
}

impl AvgLosses {
    pub fn add(&mut self, li: usize, rlz: RlzId, aid: AssetId, value: f64) {
        *self.cells.entry((li, rlz)).or_default().entry(aid).or_insert(0.0) += value;
    }

    pub fn get(&self, li: usize, rlz: RlzId, aid: AssetId) -> Option<f64> {
        self.cells.get(&(li, rlz)).and_then(|m| m.get(&aid)).copied()
    }

    pub fn merge(&mut self, other: &AvgLosses) {
        for (&(li, rlz), by_asset) in &other.cells {
            for (&aid, &v) in by_asset {
                self.add(li, rlz, aid, v);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, RlzId, AssetId, f64)> + '_ {
        self.cells
            .iter()
            .flat_map(|(&(li, rlz), m)| m.iter().map(move |(&aid, &v)| (li, rlz, aid, v)))
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Loss curves of the touched `(asset, rlz, loss column)` triples of one
/// shard, one loss per return period. Untouched triples have a zero curve.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssetCurves {
    curves: BTreeMap<(AssetId, RlzId, usize), Vec<f64>>,
}

impl AssetCurves {
    pub fn insert(&mut self, aid: AssetId, rlz: RlzId, li: usize, curve: Vec<f64>) {
        self.curves.insert((aid, rlz, li), curve);
    }

    pub fn get(&self, aid: AssetId, rlz: RlzId, li: usize) -> Option<&[f64]> {
        self.curves.get(&(aid, rlz, li)).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (AssetId, RlzId, usize, &[f64])> + '_ {
        self.curves.iter().map(|(&(aid, rlz, li), c)| (aid, rlz, li, c.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.curves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.curves.is_empty()
    }
}
