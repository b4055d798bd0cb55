use archetype_calibration::corpus::{CorpusError, SegmentCorpus};
use archetype_calibration::evaluation::SyntheticCase;
use archetype_calibration::{CooccurrenceIndex, MemoryCorpus, SqliteCorpus};
use tempfile::tempdir;

fn sample_corpus() -> MemoryCorpus {
    let mut corpus = MemoryCorpus::new();
    corpus.push("s1", &["Loki", "Odin", "Thor"]);
    corpus.push("s2", &["Loki", "Odin"]);
    corpus.push("s3", &["Odin", "Odin", "Frigg"]);
    corpus.push("s4", &["Thor"]);
    corpus.push("s5", &["Frigg", "Loki"]);
    corpus.push("s6", &[]);
    corpus
}

const NAMES: [&str; 5] = ["Loki", "Odin", "Thor", "Frigg", "Baldr"];

fn assert_index_matches_direct(corpus: &dyn SegmentCorpus) {
    let index = CooccurrenceIndex::build(corpus).unwrap();
    for a in NAMES {
        for b in NAMES {
            if a == b {
                continue;
            }
            let direct = corpus.count_together(a, b).unwrap();
            assert_eq!(index.count(a, b), direct, "{a} / {b}");
            assert_eq!(index.count(a, b), index.count(b, a));
        }
    }
}

#[test]
fn memory_index_matches_direct_counts() {
    let corpus = sample_corpus();
    assert_index_matches_direct(&corpus);

    let index = CooccurrenceIndex::build(&corpus).unwrap();
    assert_eq!(index.count("Loki", "Odin"), 2);
    assert_eq!(index.count("Odin", "Frigg"), 1);
    assert_eq!(index.frequency("Odin"), 3);
    assert_eq!(index.count("Baldr", "Loki"), 0);
    assert_eq!(index.segments_scanned(), 6);
}

#[test]
fn sqlite_index_matches_direct_counts() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("corpus.sqlite");
    {
        let mut db = SqliteCorpus::create(&path).unwrap();
        assert_eq!(db.import(&sample_corpus()).unwrap(), 6);
    }

    let db = SqliteCorpus::open(&path).unwrap();
    assert_index_matches_direct(&db);

    let index = CooccurrenceIndex::build(&db).unwrap();
    assert_eq!(index.count("Loki", "Odin"), 2);
    assert_eq!(index.frequency("Odin"), 3);
}

#[test]
fn synthetic_corpus_index_matches_direct_counts() {
    let data = SyntheticCase::uniform_noise(5).dataset();
    let index = CooccurrenceIndex::build(&data.corpus).unwrap();
    let names: Vec<String> = data.bindings.iter().map(|b| b.entity.clone()).collect();
    for a in names.iter().take(8) {
        for b in names.iter().skip(8).take(8) {
            assert_eq!(index.count(a, b), data.corpus.count_together(a, b).unwrap());
        }
    }
}

#[test]
fn opening_a_database_without_the_schema_fails() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("empty.db");
    rusqlite::Connection::open(&path)
        .unwrap()
        .execute_batch("CREATE TABLE unrelated (id INTEGER);")
        .unwrap();
    assert!(SqliteCorpus::open(&path).is_err());
    assert!(SqliteCorpus::open(dir.path().join("absent.sqlite")).is_err());
}

#[test]
fn creating_a_database_under_a_file_reports_the_io_error() {
    let dir = tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "plain file").unwrap();

    let err = SqliteCorpus::create(blocker.join("nested/corpus.sqlite"))
        .err()
        .expect("create should fail");
    match err {
        CorpusError::Io { path, .. } => assert_eq!(path, blocker.join("nested")),
        other => panic!("expected an io error, got {other:?}"),
    }
}

#[test]
fn exported_jsonl_lists_every_pair_once() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("pairs.jsonl");
    let index = CooccurrenceIndex::build(&sample_corpus()).unwrap();
    let rows = index.export_jsonl(&out).unwrap();

    let raw = std::fs::read_to_string(&out).unwrap();
    assert_eq!(raw.lines().count(), rows);
    assert_eq!(rows, index.pair_count());
    let first: serde_json::Value = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
    assert_eq!(first["entity_a"], "Loki");
    assert_eq!(first["entity_b"], "Odin");
    assert_eq!(first["count"], 2);
}
