//! Predictor subsets enumeration.
//!
//! Subsets are produced size by size (ascending) and, within a size, in the
//! lexicographic combination order of the candidate list, so that the identifier
//! `m{size}_{index}` of a subset is stable across runs.

use crate::errors::{BmaError, Result};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::RangeInclusive;
use std::str::FromStr;

/// Stable identifier of a predictor subset: its size and its 1-based rank
/// among the subsets of that size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CombinationId {
    /// Number of predictors
    pub size: usize,
    /// 1-based index within subsets of the same size
    pub index: usize,
}

impl fmt::Display for CombinationId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "m{}_{}", self.size, self.index)
    }
}

impl FromStr for CombinationId {
    type Err = BmaError;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || {
            BmaError::InvalidValue(format!(
                "bad model identifier `{s}`, expected m<size>_<index>"
            ))
        };
        let (size, index) = s
            .strip_prefix('m')
            .and_then(|rest| rest.split_once('_'))
            .ok_or_else(bad)?;
        Ok(CombinationId {
            size: size.parse().map_err(|_| bad())?,
            index: index.parse().map_err(|_| bad())?,
        })
    }
}

/// An ordered, duplicate-free, non-empty list of predictor names.
///
/// Equality and hashing only consider the members, not their order nor the identifier.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PredictorSet {
    id: CombinationId,
    predictors: Vec<String>,
}

impl PredictorSet {
    /// Constructor, fails on empty or duplicated predictors
    pub fn new(id: CombinationId, predictors: Vec<String>) -> Result<Self> {
        if predictors.is_empty() {
            return Err(BmaError::InvalidValue(format!("predictor set {id} is empty")));
        }
        let mut seen = HashSet::new();
        for p in predictors.iter() {
            if !seen.insert(p.as_str()) {
                return Err(BmaError::DuplicateCandidate(p.clone()));
            }
        }
        Ok(PredictorSet { id, predictors })
    }

    /// Subset identifier
    pub fn id(&self) -> CombinationId {
        self.id
    }

    /// Model name derived from the identifier (ex: `m2_14`)
    pub fn name(&self) -> String {
        self.id.to_string()
    }

    /// Predictor names in subset order
    pub fn predictors(&self) -> &[String] {
        &self.predictors
    }

    /// Number of predictors
    pub fn len(&self) -> usize {
        self.predictors.len()
    }

    /// Always false, a predictor set has at least one member
    pub fn is_empty(&self) -> bool {
        self.predictors.is_empty()
    }

    /// Whether `predictor` is a member
    pub fn contains(&self, predictor: &str) -> bool {
        self.predictors.iter().any(|p| p == predictor)
    }

    fn sorted_members(&self) -> Vec<&str> {
        let mut members: Vec<&str> = self.predictors.iter().map(String::as_str).collect();
        members.sort_unstable();
        members
    }
}

impl PartialEq for PredictorSet {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.sorted_members() == other.sorted_members()
    }
}

impl Eq for PredictorSet {}

impl Hash for PredictorSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.sorted_members().hash(state);
    }
}

impl fmt::Display for PredictorSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} : {}", self.id, self.predictors.join(", "))
    }
}

fn check_candidates(candidates: &[String], sizes: &RangeInclusive<usize>) -> Result<()> {
    if candidates.is_empty() {
        return Err(BmaError::EmptyCandidates);
    }
    let mut seen = HashSet::new();
    for c in candidates {
        if !seen.insert(c.as_str()) {
            return Err(BmaError::DuplicateCandidate(c.clone()));
        }
    }
    let (min, max) = (*sizes.start(), *sizes.end());
    if min == 0 || min > max || max > candidates.len() {
        return Err(BmaError::InvalidSizeRange {
            min,
            max,
            n_candidates: candidates.len(),
        });
    }
    Ok(())
}

/// Lazily iterate over predictor subsets of every size within `sizes`
pub fn predictor_sets<'a>(
    candidates: &'a [String],
    sizes: RangeInclusive<usize>,
) -> Result<impl Iterator<Item = PredictorSet> + 'a> {
    check_candidates(candidates, &sizes)?;
    Ok(sizes.flat_map(move |size| {
        candidates
            .iter()
            .combinations(size)
            .enumerate()
            .map(move |(i, combination)| PredictorSet {
                id: CombinationId { size, index: i + 1 },
                predictors: combination.into_iter().cloned().collect(),
            })
    }))
}

/// Every predictor subset of every size within `sizes`.
///
/// For K candidates and sizes `1..=K` there are 2^K - 1 subsets.
pub fn enumerate(candidates: &[String], sizes: RangeInclusive<usize>) -> Result<Vec<PredictorSet>> {
    let sets: Vec<PredictorSet> = predictor_sets(candidates, sizes)?.collect();
    log::debug!("{} predictor sets enumerated from {} candidates", sets.len(), candidates.len());
    Ok(sets)
}

/// Number of subsets [`enumerate`] produces
pub fn subset_count(n_candidates: usize, sizes: RangeInclusive<usize>) -> usize {
    sizes
        .filter(|k| *k <= n_candidates)
        .map(|k| binomial(n_candidates, k))
        .sum()
}

fn binomial(n: usize, k: usize) -> usize {
    let k = k.min(n - k);
    (0..k).fold(1, |acc, i| acc * (n - i) / (i + 1))
}
