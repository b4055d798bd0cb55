//! Precomputed co-occurrence index.
//!
//! Built with a single linear pass over the corpus, then queried in O(1)
//! for every pair the analysis touches. Counts are identical to what a
//! direct corpus query returns; the index only changes cost.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::corpus::{CorpusError, SegmentCorpus};

/// Which transform of the raw segment count the engine correlates against.
///
/// Raw counts are the default: in practice they track coordinate distance
/// more closely than the dampened or normalized variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooccurrenceMetric {
    #[default]
    Raw,
    /// `ln(1 + count)`
    Log,
    /// `count / sqrt(freq_a * freq_b)`
    Normalized,
}

impl CooccurrenceMetric {
    pub const ALL: [CooccurrenceMetric; 3] = [
        CooccurrenceMetric::Raw,
        CooccurrenceMetric::Log,
        CooccurrenceMetric::Normalized,
    ];
}

/// Interned entity handle inside a [`CooccurrenceIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey(u32);

/// Unordered entity pair with its segment count, stored as `entity_a < entity_b`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooccurrencePair {
    pub entity_a: String,
    pub entity_b: String,
    pub count: u64,
}

impl CooccurrencePair {
    pub fn new(entity_a: impl Into<String>, entity_b: impl Into<String>, count: u64) -> Self {
        let (a, b) = (entity_a.into(), entity_b.into());
        if a <= b {
            Self {
                entity_a: a,
                entity_b: b,
                count,
            }
        } else {
            Self {
                entity_a: b,
                entity_b: a,
                count,
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CooccurrenceIndex {
    names: Vec<String>,
    keys: HashMap<String, EntityKey>,
    frequency: Vec<u64>,
    pairs: HashMap<(EntityKey, EntityKey), u64>,
    segments_scanned: usize,
}

impl CooccurrenceIndex {
    /// Index every entity in the corpus.
    pub fn build(corpus: &dyn SegmentCorpus) -> Result<Self, CorpusError> {
        Self::build_inner(corpus, None)
    }

    /// Index only the given entities. Segments are still scanned once; pairs
    /// involving untracked entities are not stored.
    pub fn build_tracked<'a, I>(corpus: &dyn SegmentCorpus, tracked: I) -> Result<Self, CorpusError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let tracked: HashSet<&str> = tracked.into_iter().collect();
        Self::build_inner(corpus, Some(&tracked))
    }

    fn build_inner(
        corpus: &dyn SegmentCorpus,
        tracked: Option<&HashSet<&str>>,
    ) -> Result<Self, CorpusError> {
        let mut index = Self::default();
        let mut present: Vec<EntityKey> = Vec::new();

        corpus.scan_segments(&mut |names| {
            index.segments_scanned += 1;
            present.clear();
            for name in names {
                if let Some(tracked) = tracked {
                    if !tracked.contains(name.as_str()) {
                        continue;
                    }
                }
                let key = index.intern(name);
                index.frequency[key.0 as usize] += 1;
                present.push(key);
            }
            for (pos, &a) in present.iter().enumerate() {
                for &b in &present[pos + 1..] {
                    *index.pairs.entry(canonical(a, b)).or_insert(0) += 1;
                }
            }
        })?;

        info!(
            segments = index.segments_scanned,
            entities = index.names.len(),
            pairs = index.pairs.len(),
            "co-occurrence index built"
        );
        Ok(index)
    }

    fn intern(&mut self, name: &str) -> EntityKey {
        if let Some(&key) = self.keys.get(name) {
            return key;
        }
        let key = EntityKey(self.names.len() as u32);
        self.names.push(name.to_string());
        self.frequency.push(0);
        self.keys.insert(name.to_string(), key);
        key
    }

    pub fn key(&self, name: &str) -> Option<EntityKey> {
        self.keys.get(name).copied()
    }

    pub fn name(&self, key: EntityKey) -> &str {
        &self.names[key.0 as usize]
    }

    /// Number of segments mentioning both entities (0 if either is unknown).
    pub fn count(&self, entity_a: &str, entity_b: &str) -> u64 {
        match (self.key(entity_a), self.key(entity_b)) {
            (Some(a), Some(b)) => self.count_keys(a, b),
            _ => 0,
        }
    }

    pub fn count_keys(&self, a: EntityKey, b: EntityKey) -> u64 {
        if a == b {
            return self.frequency[a.0 as usize];
        }
        self.pairs.get(&canonical(a, b)).copied().unwrap_or(0)
    }

    pub fn value(&self, entity_a: &str, entity_b: &str, metric: CooccurrenceMetric) -> f64 {
        match (self.key(entity_a), self.key(entity_b)) {
            (Some(a), Some(b)) => self.value_keys(a, b, metric),
            _ => 0.0,
        }
    }

    pub fn value_keys(&self, a: EntityKey, b: EntityKey, metric: CooccurrenceMetric) -> f64 {
        let count = self.count_keys(a, b) as f64;
        match metric {
            CooccurrenceMetric::Raw => count,
            CooccurrenceMetric::Log => count.ln_1p(),
            CooccurrenceMetric::Normalized => {
                let fa = self.frequency[a.0 as usize] as f64;
                let fb = self.frequency[b.0 as usize] as f64;
                if fa <= 0.0 || fb <= 0.0 {
                    0.0
                } else {
                    count / (fa * fb).sqrt()
                }
            }
        }
    }

    /// Number of segments mentioning the entity.
    pub fn frequency(&self, name: &str) -> u64 {
        self.key(name)
            .map(|key| self.frequency[key.0 as usize])
            .unwrap_or(0)
    }

    pub fn segments_scanned(&self) -> usize {
        self.segments_scanned
    }

    pub fn entity_count(&self) -> usize {
        self.names.len()
    }

    /// Number of distinct pairs with a non-zero count.
    pub fn pair_count(&self) -> usize {
        self.pairs.len()
    }

    /// Every stored pair, ordered by descending count then names.
    pub fn pairs(&self) -> Vec<CooccurrencePair> {
        let mut out: Vec<CooccurrencePair> = self
            .pairs
            .iter()
            .map(|(&(a, b), &count)| CooccurrencePair::new(self.name(a), self.name(b), count))
            .collect();
        out.sort_by(|x, y| {
            y.count
                .cmp(&x.count)
                .then_with(|| x.entity_a.cmp(&y.entity_a))
                .then_with(|| x.entity_b.cmp(&y.entity_b))
        });
        out
    }

    pub fn export_jsonl(&self, path: impl AsRef<Path>) -> std::io::Result<usize> {
        let pairs = self.pairs();
        let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
        for pair in &pairs {
            let line = serde_json::to_string(pair).map_err(std::io::Error::other)?;
            writeln!(file, "{line}")?;
        }
        file.flush()?;
        Ok(pairs.len())
    }
}

fn canonical(a: EntityKey, b: EntityKey) -> (EntityKey, EntityKey) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::MemoryCorpus;

    fn corpus() -> MemoryCorpus {
        let mut corpus = MemoryCorpus::new();
        corpus.push("s1", &["Zeus", "Hera", "Zeus"]);
        corpus.push("s2", &["Hera", "Zeus"]);
        corpus.push("s3", &["Hera", "Apollo"]);
        corpus.push("s4", &["Apollo"]);
        corpus
    }

    #[test]
    fn counts_are_order_independent_and_deduplicated_per_segment() {
        let index = CooccurrenceIndex::build(&corpus()).unwrap();
        assert_eq!(index.count("Zeus", "Hera"), 2);
        assert_eq!(index.count("Hera", "Zeus"), 2);
        assert_eq!(index.count("Zeus", "Apollo"), 0);
        assert_eq!(index.count("Zeus", "Ares"), 0);
        assert_eq!(index.frequency("Zeus"), 2);
        assert_eq!(index.segments_scanned(), 4);
    }

    #[test]
    fn metric_variants_transform_raw_counts() {
        let index = CooccurrenceIndex::build(&corpus()).unwrap();
        let raw = index.value("Hera", "Apollo", CooccurrenceMetric::Raw);
        let log = index.value("Hera", "Apollo", CooccurrenceMetric::Log);
        let norm = index.value("Hera", "Apollo", CooccurrenceMetric::Normalized);
        assert_eq!(raw, 1.0);
        assert!((log - 2f64.ln()).abs() < 1e-12);
        // freq(Hera) = 3, freq(Apollo) = 2
        assert!((norm - 1.0 / 6f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn tracked_build_ignores_other_entities() {
        let index = CooccurrenceIndex::build_tracked(&corpus(), ["Zeus", "Hera"]).unwrap();
        assert_eq!(index.entity_count(), 2);
        assert_eq!(index.count("Zeus", "Hera"), 2);
        assert_eq!(index.frequency("Apollo"), 0);
        assert_eq!(index.segments_scanned(), 4);
    }

    #[test]
    fn exported_pairs_are_canonical() {
        let index = CooccurrenceIndex::build(&corpus()).unwrap();
        let pairs = index.pairs();
        assert_eq!(pairs[0], CooccurrencePair::new("Zeus", "Hera", 2));
        assert!(pairs.iter().all(|p| p.entity_a < p.entity_b));
    }
}
