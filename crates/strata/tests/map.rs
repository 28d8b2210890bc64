use bytes::Bytes;
use strata::{key_hash, BytesCodec, MapBuilder, MapReader};

fn sorted_corpus(n: usize) -> Vec<(i32, Bytes, Bytes)> {
    let mut entries: Vec<(i32, Bytes, Bytes)> = (0..n)
        .map(|i| {
            let key = format!("key-{:07}", i);
            let value = format!("value-{:07}", i);
            (
                key_hash(key.as_bytes()),
                Bytes::from(key.into_bytes()),
                Bytes::from(value.into_bytes()),
            )
        })
        .collect();
    entries.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));
    entries
}

#[test]
fn end_to_end_hundred_thousand_entries() {
    let entries = sorted_corpus(100_000);
    let codec = BytesCodec::with_chunk_entries(1000);
    let mut sink = Vec::new();
    let count = MapBuilder::encode(entries.clone(), codec.clone(), &mut sink);
    assert_eq!(count, 100_000);

    let reader = MapReader::decode(Bytes::from(sink), codec).unwrap();
    assert_eq!(reader.len(), 100_000);
    for (hash, key, value) in &entries {
        assert_eq!(reader.get(*hash, key).unwrap().as_ref(), Some(value));
    }
    for (i, (_, key, value)) in entries.iter().enumerate() {
        let (k, v) = reader.nth(i as u64).unwrap().unwrap();
        assert_eq!((&k, &v), (key, value));
    }
    assert_eq!(reader.nth(100_000).unwrap(), None);
}

#[test]
fn absent_keys_are_negative_results() {
    let entries = sorted_corpus(10_000);
    let codec = BytesCodec::with_chunk_entries(256);
    let mut sink = Vec::new();
    MapBuilder::encode(entries, codec.clone(), &mut sink);
    let reader = MapReader::decode(Bytes::from(sink), codec).unwrap();
    for i in 0..1000 {
        let key = format!("missing-{:05}", i);
        assert_eq!(reader.get(key_hash(key.as_bytes()), key.as_bytes()).unwrap(), None);
    }
    // same hash as a stored key, different key bytes
    let stored = "key-0000000";
    assert_eq!(
        reader.get(key_hash(stored.as_bytes()), b"not-that-key").unwrap(),
        None
    );
}

#[test]
fn hash_run_spanning_chunks_is_found() {
    // hash 7 ends chunk A and fills chunk B; the hash skip index only
    // points at chunk A for it
    let entries: Vec<(i32, Bytes, Bytes)> = vec![
        (1, Bytes::from_static(b"a"), Bytes::from_static(b"va")),
        (7, Bytes::from_static(b"b"), Bytes::from_static(b"vb")),
        (7, Bytes::from_static(b"c"), Bytes::from_static(b"vc")),
        (7, Bytes::from_static(b"d"), Bytes::from_static(b"vd")),
        (9, Bytes::from_static(b"e"), Bytes::from_static(b"ve")),
        (12, Bytes::from_static(b"f"), Bytes::from_static(b"vf")),
    ];
    let codec = BytesCodec::with_chunk_entries(2);
    let mut sink = Vec::new();
    MapBuilder::encode(entries, codec.clone(), &mut sink);
    let reader = MapReader::decode(Bytes::from(sink), codec).unwrap();
    // keys living in the continuation chunk
    assert_eq!(reader.get(7, b"c").unwrap(), Some(Bytes::from_static(b"vc")));
    assert_eq!(reader.get(7, b"d").unwrap(), Some(Bytes::from_static(b"vd")));
    assert_eq!(reader.get(7, b"b").unwrap(), Some(Bytes::from_static(b"vb")));
    assert_eq!(reader.get(7, b"z").unwrap(), None);
    assert_eq!(reader.get(9, b"e").unwrap(), Some(Bytes::from_static(b"ve")));
}

#[test]
fn concurrent_clones_query_independently() {
    let entries = sorted_corpus(20_000);
    let codec = BytesCodec::with_chunk_entries(500);
    let mut sink = Vec::new();
    MapBuilder::encode(entries.clone(), codec.clone(), &mut sink);
    let reader = MapReader::decode(Bytes::from(sink), codec).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let reader = reader.clone();
            let entries = entries.clone();
            std::thread::spawn(move || {
                for (hash, key, value) in entries.iter().skip(worker).step_by(4) {
                    assert_eq!(reader.get(*hash, key).unwrap().as_ref(), Some(value));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn truncated_block_fails_to_decode() {
    let entries = sorted_corpus(100);
    let codec = BytesCodec::with_chunk_entries(10);
    let mut sink = Vec::new();
    MapBuilder::encode(entries, codec.clone(), &mut sink);
    sink.truncate(sink.len() / 2);
    assert!(MapReader::decode(Bytes::from(sink), codec).is_err());
}
