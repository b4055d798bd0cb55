//! Entity → archetype bindings and their resolution against the catalog.
//!
//! Bindings are produced upstream by the name-matching bridge and are never
//! rewritten here. Resolution turns them into [`MappedEntities`]: the set of
//! corpus entities that take part in pairwise analysis, each referring to
//! its archetype by catalog position.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::catalog::CoordinateStore;

#[derive(Debug, thiserror::Error)]
pub enum BindingError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed binding file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("binding for {entity}: confidence {confidence} is outside [0, 1]")]
    InvalidConfidence { entity: String, confidence: f64 },
    #[error("binding with empty entity or archetype id")]
    EmptyField,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityBinding {
    #[serde(alias = "entity_name")]
    pub entity: String,
    #[serde(alias = "archetype")]
    pub archetype_id: String,
    pub confidence: f64,
    #[serde(default = "default_method")]
    pub method: String,
}

fn default_method() -> String {
    "unknown".to_string()
}

impl EntityBinding {
    pub fn new(
        entity: impl Into<String>,
        archetype_id: impl Into<String>,
        confidence: f64,
        method: impl Into<String>,
    ) -> Result<Self, BindingError> {
        let binding = Self {
            entity: entity.into(),
            archetype_id: archetype_id.into(),
            confidence,
            method: method.into(),
        };
        binding.validate()?;
        Ok(binding)
    }

    fn validate(&self) -> Result<(), BindingError> {
        if self.entity.trim().is_empty() || self.archetype_id.trim().is_empty() {
            return Err(BindingError::EmptyField);
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(BindingError::InvalidConfidence {
                entity: self.entity.clone(),
                confidence: self.confidence,
            });
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BindingFile {
    List(Vec<EntityBinding>),
    Wrapped { mappings: Vec<EntityBinding> },
}

/// Load and validate a binding file.
pub fn load_bindings(path: impl AsRef<Path>) -> Result<Vec<EntityBinding>, BindingError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| BindingError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed: BindingFile = serde_json::from_str(&raw).map_err(|source| BindingError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let bindings = match parsed {
        BindingFile::List(items) => items,
        BindingFile::Wrapped { mappings } => mappings,
    };
    for binding in &bindings {
        binding.validate()?;
    }
    Ok(bindings)
}

// =============================================================================
// Data-quality warnings
// =============================================================================

/// Non-fatal problem found while preparing inputs. Logged and written into
/// the report; the affected entity is excluded from analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataQualityWarning {
    MissingArchetype { entity: String, archetype_id: String },
    DuplicateBinding { entity: String, kept: String, dropped: String },
    LowConfidence { entity: String, confidence: f64, threshold: f64 },
    AbsentFromCorpus { entity: String },
}

impl DataQualityWarning {
    pub fn entity(&self) -> &str {
        match self {
            DataQualityWarning::MissingArchetype { entity, .. }
            | DataQualityWarning::DuplicateBinding { entity, .. }
            | DataQualityWarning::LowConfidence { entity, .. }
            | DataQualityWarning::AbsentFromCorpus { entity } => entity,
        }
    }
}

// =============================================================================
// Resolution
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct MappedEntity {
    pub name: String,
    pub archetype_id: String,
    /// Position of the archetype in the [`CoordinateStore`].
    #[serde(skip)]
    pub archetype: usize,
    pub confidence: f64,
    pub method: String,
}

#[derive(Debug, Clone, Default)]
pub struct MappedEntities {
    entities: Vec<MappedEntity>,
    warnings: Vec<DataQualityWarning>,
    binding_count: usize,
    unmapped: usize,
}

impl MappedEntities {
    /// Resolve bindings against the catalog. Entities whose archetype is not
    /// in the catalog, or whose confidence is below `min_confidence`, are
    /// excluded with a warning. An entity bound more than once keeps its
    /// highest-confidence binding.
    pub fn resolve(
        bindings: &[EntityBinding],
        store: &CoordinateStore,
        min_confidence: f64,
    ) -> Self {
        let mut warnings = Vec::new();
        let mut best: HashMap<&str, &EntityBinding> = HashMap::new();
        let mut order: Vec<&str> = Vec::new();

        for binding in bindings {
            match best.get(binding.entity.as_str()).copied() {
                Some(existing) => {
                    let (kept, dropped) = if binding.confidence > existing.confidence {
                        (binding, existing)
                    } else {
                        (existing, binding)
                    };
                    warn!(
                        entity = %binding.entity,
                        kept = %kept.archetype_id,
                        dropped = %dropped.archetype_id,
                        "entity bound more than once; keeping highest confidence"
                    );
                    warnings.push(DataQualityWarning::DuplicateBinding {
                        entity: binding.entity.clone(),
                        kept: kept.archetype_id.clone(),
                        dropped: dropped.archetype_id.clone(),
                    });
                    best.insert(binding.entity.as_str(), kept);
                }
                None => {
                    order.push(binding.entity.as_str());
                    best.insert(binding.entity.as_str(), binding);
                }
            }
        }

        let mut entities = Vec::with_capacity(order.len());
        let mut unmapped = 0usize;
        for name in order {
            let binding = best[name];
            if binding.confidence < min_confidence {
                warn!(entity = %name, confidence = binding.confidence, "binding below confidence floor");
                warnings.push(DataQualityWarning::LowConfidence {
                    entity: name.to_string(),
                    confidence: binding.confidence,
                    threshold: min_confidence,
                });
                unmapped += 1;
                continue;
            }
            let Some(position) = store.position(&binding.archetype_id) else {
                warn!(
                    entity = %name,
                    archetype_id = %binding.archetype_id,
                    "binding references an archetype missing from the catalog"
                );
                warnings.push(DataQualityWarning::MissingArchetype {
                    entity: name.to_string(),
                    archetype_id: binding.archetype_id.clone(),
                });
                unmapped += 1;
                continue;
            };
            entities.push(MappedEntity {
                name: name.to_string(),
                archetype_id: binding.archetype_id.clone(),
                archetype: position,
                confidence: binding.confidence,
                method: binding.method.clone(),
            });
        }

        Self {
            entities,
            warnings,
            binding_count: bindings.len(),
            unmapped,
        }
    }

    /// Drop entities rejected by `keep`, recording `warning(entity)` for each.
    pub fn retain_with_warning<K, W>(&mut self, mut keep: K, mut warning: W)
    where
        K: FnMut(&MappedEntity) -> bool,
        W: FnMut(&MappedEntity) -> DataQualityWarning,
    {
        let mut dropped = Vec::new();
        self.entities.retain(|entity| {
            if keep(entity) {
                true
            } else {
                dropped.push(warning(entity));
                false
            }
        });
        self.unmapped += dropped.len();
        self.warnings.extend(dropped);
    }

    pub fn entities(&self) -> &[MappedEntity] {
        &self.entities
    }

    pub fn get(&self, index: usize) -> &MappedEntity {
        &self.entities[index]
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn warnings(&self) -> &[DataQualityWarning] {
        &self.warnings
    }

    pub fn binding_count(&self) -> usize {
        self.binding_count
    }

    /// Bound entities excluded from analysis.
    pub fn unmapped_count(&self) -> usize {
        self.unmapped
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entities.iter().map(|entity| entity.name.as_str())
    }

    /// Entity indices grouped by their archetype's tradition. Entities whose
    /// archetype carries no tradition are left out.
    pub fn by_tradition(&self, store: &CoordinateStore) -> Vec<(String, Vec<usize>)> {
        let mut groups: HashMap<&str, Vec<usize>> = HashMap::new();
        for (idx, entity) in self.entities.iter().enumerate() {
            if let Some(tradition) = store.record(entity.archetype).tradition.as_deref() {
                groups.entry(tradition).or_default().push(idx);
            }
        }
        let mut out: Vec<(String, Vec<usize>)> = groups
            .into_iter()
            .map(|(label, members)| (label.to_string(), members))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axes::CoordinateVector;
    use crate::catalog::ArchetypeRecord;

    fn store() -> CoordinateStore {
        CoordinateStore::from_records(vec![
            ArchetypeRecord {
                id: "arch:trickster".into(),
                name: None,
                tradition: Some("norse".into()),
                coordinates: CoordinateVector::splat(0.2).unwrap(),
            },
            ArchetypeRecord {
                id: "arch:sage".into(),
                name: None,
                tradition: None,
                coordinates: CoordinateVector::splat(0.8).unwrap(),
            },
        ])
        .unwrap()
    }

    #[test]
    fn missing_archetype_is_a_warning_not_an_error() {
        let bindings = vec![
            EntityBinding::new("Loki", "arch:trickster", 0.9, "exact").unwrap(),
            EntityBinding::new("Odin", "arch:wanderer", 0.8, "fuzzy").unwrap(),
        ];
        let mapped = MappedEntities::resolve(&bindings, &store(), 0.0);
        assert_eq!(mapped.len(), 1);
        assert_eq!(mapped.unmapped_count(), 1);
        assert_eq!(
            mapped.warnings(),
            &[DataQualityWarning::MissingArchetype {
                entity: "Odin".into(),
                archetype_id: "arch:wanderer".into()
            }]
        );
    }

    #[test]
    fn duplicate_binding_keeps_highest_confidence() {
        let bindings = vec![
            EntityBinding::new("Loki", "arch:sage", 0.4, "fuzzy").unwrap(),
            EntityBinding::new("Loki", "arch:trickster", 0.9, "exact").unwrap(),
        ];
        let mapped = MappedEntities::resolve(&bindings, &store(), 0.0);
        assert_eq!(mapped.len(), 1);
        assert_eq!(mapped.get(0).archetype_id, "arch:trickster");
        assert_eq!(mapped.warnings().len(), 1);
    }

    #[test]
    fn confidence_must_be_a_probability() {
        assert!(EntityBinding::new("Loki", "arch:trickster", 1.5, "exact").is_err());
        assert!(EntityBinding::new("", "arch:trickster", 0.5, "exact").is_err());
    }

    #[test]
    fn groups_follow_catalog_traditions() {
        let bindings = vec![
            EntityBinding::new("Loki", "arch:trickster", 0.9, "exact").unwrap(),
            EntityBinding::new("Athena", "arch:sage", 0.9, "exact").unwrap(),
        ];
        let mapped = MappedEntities::resolve(&bindings, &store(), 0.0);
        assert_eq!(mapped.by_tradition(&store()), vec![("norse".to_string(), vec![0])]);
    }
}
