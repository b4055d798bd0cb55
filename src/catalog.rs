//! Read-only coordinate store for the archetype catalog.
//!
//! The store is loaded once per run and handed to every consumer by
//! reference. Lookups by archetype id are O(1).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::axes::{CoordinateError, CoordinateVector, SpectralAxis, AXIS_COUNT};

const COORDINATE_KEYS: [&str; 3] = ["spectralCoordinates", "spectral_coordinates", "coordinates"];
const ID_KEYS: [&str; 2] = ["@id", "id"];
const TRADITION_KEYS: [&str; 2] = ["tradition", "system"];

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("archetype not found: {0}")]
    NotFound(String),
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("archetype {id}: missing coordinate for axis {axis}")]
    MissingAxis { id: String, axis: SpectralAxis },
    #[error("archetype {id}: coordinate {key} is not a number")]
    NonNumeric { id: String, key: String },
    #[error("archetype {id}: {source}")]
    InvalidCoordinate {
        id: String,
        #[source]
        source: CoordinateError,
    },
    #[error("record with coordinates but no identifier in {0}")]
    MissingId(PathBuf),
    #[error("duplicate archetype id: {0}")]
    DuplicateId(String),
    #[error("catalog contains no archetypes: {0}")]
    Empty(PathBuf),
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchetypeRecord {
    pub id: String,
    pub name: Option<String>,
    pub tradition: Option<String>,
    pub coordinates: CoordinateVector,
}

#[derive(Debug, Clone, Default)]
pub struct CoordinateStore {
    records: Vec<ArchetypeRecord>,
    index: HashMap<String, usize>,
}

impl CoordinateStore {
    pub fn from_records(records: Vec<ArchetypeRecord>) -> Result<Self, CatalogError> {
        let mut index = HashMap::with_capacity(records.len());
        for (pos, record) in records.iter().enumerate() {
            if index.insert(record.id.clone(), pos).is_some() {
                return Err(CatalogError::DuplicateId(record.id.clone()));
            }
        }
        Ok(Self { records, index })
    }

    /// Load a catalog file, or every `*.json` / `*.jsonld` file under a
    /// directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let mut records = Vec::new();

        if path.is_dir() {
            let mut files: Vec<PathBuf> = WalkDir::new(path)
                .into_iter()
                .filter_map(|entry| match entry {
                    Ok(entry) => Some(entry),
                    Err(err) => {
                        warn!(error = %err, "skipping unreadable catalog entry");
                        None
                    }
                })
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|p| {
                    matches!(
                        p.extension().and_then(|ext| ext.to_str()),
                        Some("json") | Some("jsonld")
                    )
                })
                .collect();
            files.sort();
            for file in files {
                records.extend(parse_catalog_file(&file)?);
            }
        } else {
            records.extend(parse_catalog_file(path)?);
        }

        if records.is_empty() {
            return Err(CatalogError::Empty(path.to_path_buf()));
        }
        debug!(archetypes = records.len(), path = %path.display(), "catalog loaded");
        Self::from_records(records)
    }

    pub fn coordinates(&self, archetype_id: &str) -> Result<&CoordinateVector, CatalogError> {
        self.get(archetype_id)
            .map(|record| &record.coordinates)
            .ok_or_else(|| CatalogError::NotFound(archetype_id.to_string()))
    }

    pub fn get(&self, archetype_id: &str) -> Option<&ArchetypeRecord> {
        self.index.get(archetype_id).map(|&pos| &self.records[pos])
    }

    pub fn position(&self, archetype_id: &str) -> Option<usize> {
        self.index.get(archetype_id).copied()
    }

    /// Record at a position returned by [`CoordinateStore::position`].
    pub fn record(&self, position: usize) -> &ArchetypeRecord {
        &self.records[position]
    }

    pub fn records(&self) -> &[ArchetypeRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn parse_catalog_file(path: &Path) -> Result<Vec<ArchetypeRecord>, CatalogError> {
    let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let value: Value = serde_json::from_str(&raw).map_err(|source| CatalogError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let mut records = Vec::new();
    collect_records(&value, path, &mut records)?;
    Ok(records)
}

fn collect_records(
    value: &Value,
    path: &Path,
    out: &mut Vec<ArchetypeRecord>,
) -> Result<(), CatalogError> {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_records(item, path, out)?;
            }
        }
        Value::Object(map) => {
            if let Some(graph) = map.get("@graph") {
                collect_records(graph, path, out)?;
            }
            let Some(coords) = COORDINATE_KEYS.iter().find_map(|key| map.get(*key)) else {
                return Ok(());
            };
            let id = ID_KEYS
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))
                .ok_or_else(|| CatalogError::MissingId(path.to_path_buf()))?
                .to_string();
            let coordinates = parse_coordinates(&id, coords)?;
            let name = map.get("name").and_then(Value::as_str).map(str::to_string);
            let tradition = TRADITION_KEYS
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))
                .map(str::to_string);
            out.push(ArchetypeRecord {
                id,
                name,
                tradition,
                coordinates,
            });
        }
        _ => {}
    }
    Ok(())
}

fn parse_coordinates(id: &str, value: &Value) -> Result<CoordinateVector, CatalogError> {
    let Value::Object(map) = value else {
        return Err(CatalogError::NonNumeric {
            id: id.to_string(),
            key: "coordinates".to_string(),
        });
    };

    let mut values = [f64::NAN; AXIS_COUNT];
    for (key, raw) in map {
        let Some(axis) = SpectralAxis::from_key(key) else {
            // Annotation keys (e.g. "@type") ride along in JSON-LD.
            continue;
        };
        let number = raw.as_f64().ok_or_else(|| CatalogError::NonNumeric {
            id: id.to_string(),
            key: key.clone(),
        })?;
        values[axis.index()] = number;
    }

    if let Some(axis) = SpectralAxis::ALL
        .iter()
        .copied()
        .find(|axis| values[axis.index()].is_nan())
    {
        return Err(CatalogError::MissingAxis {
            id: id.to_string(),
            axis,
        });
    }

    CoordinateVector::new(values).map_err(|source| CatalogError::InvalidCoordinate {
        id: id.to_string(),
        source,
    })
}
