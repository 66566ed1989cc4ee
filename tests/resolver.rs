//! Query resolver integration tests

use std::sync::Arc;

use earpiece::resolver::OrdinalTable;
use earpiece::store::Origin;
use earpiece::{Candidate, Normalizer, Outcome, Phrasebook, QueryResolver};

mod common;

use common::{PLATES, ScriptedStore, offline_resolver};

fn scripted(store: &Arc<ScriptedStore>) -> QueryResolver {
    QueryResolver::new(Normalizer::default(), store.clone(), store.clone())
}

#[tokio::test]
async fn test_exact_record_speaks_household() {
    let resolver = offline_resolver(&PLATES);
    let key = resolver.normalize("ABC1234");

    let outcome = resolver.resolve(&key, "lige").await;
    assert!(matches!(outcome, Outcome::SingleExact(ref c) if c.external_id == "ABC1234"));

    let reply = Phrasebook::default().outcome(&outcome, &key);
    assert!(reply.contains("A棟 3樓之1"), "reply: {reply}");
}

#[tokio::test]
async fn test_counted_digits_enumerate_candidates() {
    let resolver = offline_resolver(&PLATES);
    let key = resolver.normalize("四個八");
    assert_eq!(key.as_str(), "8888");

    let outcome = resolver.resolve(&key, "lige").await;
    let pending = outcome.pending();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].external_id, "AA8888");
    assert_eq!(pending[1].external_id, "BB8888");

    let reply = Phrasebook::default().outcome(&outcome, &key);
    assert!(reply.starts_with("找到 2 筆相符"), "reply: {reply}");
    assert!(reply.contains("B棟 5樓") && reply.contains("C棟 2樓"));
}

#[tokio::test]
async fn test_ordinal_follow_up_selects_candidate() {
    let resolver = offline_resolver(&PLATES);
    let outcome = resolver.resolve(&resolver.normalize("四個八"), "lige").await;

    let (index, candidate) = resolver.select_candidate("第一個", outcome.pending()).unwrap();
    assert_eq!(index, 0);
    assert_eq!(candidate.external_id, "AA8888");

    let (index, _) = resolver.select_candidate("選第二個", outcome.pending()).unwrap();
    assert_eq!(index, 1);

    assert!(resolver.select_candidate("第三個", outcome.pending()).is_none());
    assert!(resolver.select_candidate("ABC", outcome.pending()).is_none());
}

#[tokio::test]
async fn test_online_cache_miss_forces_one_remote_read() {
    let store = Arc::new(ScriptedStore::new(&[], &[("NEW001", "D棟 1樓")], true));
    let resolver = scripted(&store);

    let outcome = resolver.resolve(&resolver.normalize("NEW001"), "lige").await;
    match outcome {
        Outcome::SingleExact(candidate) => {
            assert_eq!(candidate.household_label, "D棟 1樓");
            assert_eq!(candidate.origin, Origin::Remote);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(store.forced_reads(), 1);
}

#[tokio::test]
async fn test_remote_miss_falls_back_to_fuzzy() {
    let store = Arc::new(ScriptedStore::new(&[("XY1234", "E棟")], &[], true));
    let resolver = scripted(&store);

    let outcome = resolver.resolve(&resolver.normalize("1234"), "lige").await;
    assert!(matches!(outcome, Outcome::SingleFuzzy(ref c) if c.external_id == "XY1234"));
    assert_eq!(store.forced_reads(), 1);
}

#[tokio::test]
async fn test_offline_miss_never_forces_remote() {
    let store = Arc::new(ScriptedStore::new(&[("XY1234", "E棟")], &[("NEW001", "D棟")], false));
    let resolver = scripted(&store);

    let outcome = resolver.resolve(&resolver.normalize("NEW001"), "lige").await;
    assert_eq!(outcome, Outcome::NotFound);
    assert_eq!(store.forced_reads(), 0);
}

#[tokio::test]
async fn test_local_hit_skips_remote() {
    let store = Arc::new(ScriptedStore::new(&[("ABC1234", "A棟")], &[], true));
    let resolver = scripted(&store);

    let outcome = resolver.resolve(&resolver.normalize("abc 1234"), "lige").await;
    assert!(matches!(outcome, Outcome::SingleExact(ref c) if c.origin == Origin::Local));
    assert_eq!(store.forced_reads(), 0);
}

#[test]
fn test_custom_ordinals() {
    let store = Arc::new(ScriptedStore::new(&[], &[], false));
    let resolver =
        scripted(&store).with_ordinals(OrdinalTable::new(vec![vec!["alpha"], vec!["bravo"]]));
    let pending: Vec<Candidate> = ["AA8888", "BB8888"]
        .iter()
        .map(|plate| Candidate {
            external_id: (*plate).to_string(),
            household_label: String::new(),
            note: String::new(),
            origin: Origin::Local,
        })
        .collect();

    let (index, candidate) = resolver.select_candidate("Bravo", &pending).unwrap();
    assert_eq!(index, 1);
    assert_eq!(candidate.external_id, "BB8888");
    assert!(resolver.select_candidate("第一個", &pending).is_none());
}
