use fuseqa_core::corpus::Corpus;
use fuseqa_core::persist::{get_or_build, invalidate, load, load_meta, load_required, persist, IndexPaths};
use fuseqa_core::{FuseError, InvertedIndex};
use std::sync::Arc;
use tempfile::tempdir;

fn corpus() -> Corpus {
    [("d1", "cat dog"), ("d2", "cat cat fish"), ("d3", "The capital of France is Paris")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn load_of_missing_artifact_is_absent() {
    let dir = tempdir().unwrap();
    let paths = IndexPaths::new(dir.path().join("idx"));
    assert!(load(&paths).unwrap().is_none());
    assert!(matches!(load_required(&paths), Err(FuseError::IndexNotFound(_))));
}

#[test]
fn persist_then_load_round_trips() {
    let dir = tempdir().unwrap();
    let paths = IndexPaths::new(dir.path());
    let built = InvertedIndex::build(&corpus());
    persist(&built, &paths).unwrap();

    let loaded = load(&paths).unwrap().expect("persisted index");
    assert_eq!(loaded, built);
    let meta = load_meta(&paths).unwrap().unwrap();
    assert_eq!(meta.num_docs, 3);
    assert_eq!(meta.num_terms, built.num_terms());
}

#[test]
fn get_or_build_builds_once_then_loads() {
    let dir = tempdir().unwrap();
    let paths = IndexPaths::new(dir.path());
    let first = get_or_build(&paths, &corpus()).unwrap();

    // A different corpus is ignored while the artifact exists.
    let mut other = corpus();
    other.insert("d4".into(), "zebra".into());
    let second = get_or_build(&paths, &other).unwrap();
    assert_eq!(first, second);
    assert!(second.posting("zebra").is_none());

    invalidate(&paths).unwrap();
    let rebuilt = get_or_build(&paths, &other).unwrap();
    assert!(rebuilt.posting("zebra").unwrap().contains("d4"));
}

#[test]
fn concurrent_get_or_build_agree() {
    let dir = tempdir().unwrap();
    let paths = Arc::new(IndexPaths::new(dir.path().join("shared")));
    let corpus = Arc::new(corpus());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let paths = paths.clone();
            let corpus = corpus.clone();
            std::thread::spawn(move || get_or_build(&paths, &corpus).unwrap())
        })
        .collect();
    let results: Vec<InvertedIndex> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(results.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn invalidate_missing_artifact_is_ok() {
    let dir = tempdir().unwrap();
    invalidate(&IndexPaths::new(dir.path().join("nothing"))).unwrap();
}

#[test]
fn truncated_postings_are_rebuilt() {
    let dir = tempdir().unwrap();
    let paths = IndexPaths::new(dir.path());
    let built = get_or_build(&paths, &corpus()).unwrap();

    // meta.json still present, posting blob cut short
    let blob = dir.path().join("postings.bin");
    let bytes = std::fs::read(&blob).unwrap();
    std::fs::write(&blob, &bytes[..bytes.len() / 2]).unwrap();
    assert!(matches!(load(&paths), Err(FuseError::Codec(_))));

    let rebuilt = get_or_build(&paths, &corpus()).unwrap();
    assert_eq!(rebuilt, built);
    assert_eq!(load(&paths).unwrap(), Some(built));
}

#[test]
fn rewriting_an_index_replaces_it_cleanly() {
    let dir = tempdir().unwrap();
    let paths = IndexPaths::new(dir.path());
    persist(&InvertedIndex::build(&corpus()), &paths).unwrap();

    let mut other = corpus();
    other.insert("d4".into(), "zebra".into());
    let second = InvertedIndex::build(&other);
    persist(&second, &paths).unwrap();

    assert_eq!(load(&paths).unwrap(), Some(second));
    assert_eq!(load_meta(&paths).unwrap().unwrap().num_docs, 4);
    assert!(!dir.path().join("postings.bin.tmp").exists());
}
