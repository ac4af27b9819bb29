//! End-to-end: synthetic overlaps through store construction, index
//! queries, and a budget-squeezed cache load.

use ovx_core::cache::{CacheParams, OverlapCache};
use ovx_core::file::{Layout, OvFileReader, OvFileWriter, WriteMode};
use ovx_core::record::{encode_evalue, Overlap};
use ovx_core::store::{test_index, OvStore, OvStoreWriter};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

fn overlap(a: u32, b: u32, a_hang: i32, b_hang: i32, span: u32, erate: f64) -> Overlap {
    let mut ov = Overlap::new(a, b);
    ov.set_a_hang(a_hang).unwrap();
    ov.set_b_hang(b_hang).unwrap();
    ov.set_span(span).unwrap();
    ov.set_erate(erate);
    ov.set_for_utg(true);
    ov
}

#[test]
fn five_overlaps_through_store_and_cache() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("asm.ovx");

    // Reads 1..=3; read 2 has exactly two overlaps.
    let ovls = vec![
        overlap(1, 2, 120, 80, 900, 0.010),
        overlap(1, 3, -60, -40, 700, 0.025),
        overlap(2, 1, -120, -80, 900, 0.010),
        overlap(2, 3, 30, 20, 800, 0.040),
        overlap(3, 1, 60, 40, 700, 0.025),
    ];

    let mut w = OvStoreWriter::create(&dir, 1 << 20).unwrap();
    w.write_overlaps(&ovls).unwrap();
    let info = w.finish().unwrap();

    assert_eq!(info.smallest_id, 1);
    assert_eq!(info.largest_id, 3);
    assert_eq!(info.num_overlaps, 5);
    assert!(test_index(&dir, false).unwrap());

    // Stream order matches the sorted input; per-read counts line up.
    let mut store = OvStore::open(&dir).unwrap();
    let mut streamed = Vec::new();
    while let Some(ov) = store.read_overlap().unwrap() {
        streamed.push((ov.a_id, ov.b_id));
    }
    assert_eq!(
        streamed,
        vec![(1, 2), (1, 3), (2, 1), (2, 3), (3, 1)]
    );

    let (first, counts) = store.num_overlaps_per_frag();
    assert_eq!(first, 1);
    assert_eq!(counts, vec![2, 2, 1]);

    let mut buf = Vec::new();
    assert_eq!(store.read_overlaps_for(2, &mut buf).unwrap(), 2);
    assert_eq!(buf[0].b_id, 1);
    assert_eq!(buf[1].b_id, 3);
    assert_eq!(buf[1].evalue(), encode_evalue(0.040));

    // A budget with room for one overlap per read forces max_per = 1.
    let index_bytes = (3u64 + 2) * 8 + (3 + 1) * 4;
    let params = CacheParams {
        max_erate: 0.10,
        min_overlap: 40,
        mem_limit: index_bytes + 3 * 16,
        max_per_read: 0,
    };
    let cache = OverlapCache::new(&dir, None, &params).unwrap();

    assert_eq!(cache.max_per_read(), 1);
    assert_eq!(cache.num_cached(), 3);

    // Only each read's lowest-erate overlap survives.
    let r1 = cache.get_overlaps(1, 0.10);
    assert_eq!(r1.len(), 1);
    assert_eq!(r1[0].b_id(), 2);

    let r2 = cache.get_overlaps(2, 0.10);
    assert_eq!(r2.len(), 1);
    assert_eq!(r2[0].b_id(), 1);
    assert_eq!(r2[0].a_hang(), -120);
    assert_eq!(r2[0].b_hang(), -80);

    let r3 = cache.get_overlaps(3, 0.10);
    assert_eq!(r3.len(), 1);
    assert_eq!(r3[0].b_id(), 1);
}

#[test]
fn random_overlaps_survive_dump_sort_and_store() {
    let tmp = TempDir::new().unwrap();
    let dump = tmp.path().join("olaps.ovb");
    let dir = tmp.path().join("asm.ovx");
    let mut rng = StdRng::seed_from_u64(0x5eed);

    let mut ovls: Vec<Overlap> = (0..200)
        .map(|_| {
            let a = rng.gen_range(1..=20);
            let mut b = rng.gen_range(1..=20);
            if b == a {
                b = if a == 20 { 1 } else { a + 1 };
            }
            let mut ov = Overlap::new(a, b);
            ov.set_a_hang(rng.gen_range(-5000..5000)).unwrap();
            ov.set_b_hang(rng.gen_range(-5000..5000)).unwrap();
            ov.set_span(rng.gen_range(100..20_000)).unwrap();
            ov.set_erate(rng.gen_range(0.0..0.30));
            ov.set_flipped(rng.gen_bool(0.5));
            ov.set_for_utg(true);
            ov
        })
        .collect();

    // Dump file round-trip preserves every field.
    let mut w = OvFileWriter::create(&dump, WriteMode::FullNoCounts).unwrap();
    w.write_overlaps(&ovls).unwrap();
    w.finish().unwrap();

    let mut r = OvFileReader::open(&dump, Layout::Full).unwrap();
    let mut back = vec![Overlap::default(); 256];
    let n = r.read_overlaps(&mut back).unwrap();
    assert_eq!(n, ovls.len());
    assert_eq!(&back[..n], &ovls[..]);

    // Store construction keeps the global sort order and a complete index.
    ovls.sort();
    ovls.dedup();
    let mut w = OvStoreWriter::create(&dir, 64).unwrap();
    w.write_overlaps(&ovls).unwrap();
    let info = w.finish().unwrap();
    assert_eq!(info.num_overlaps, ovls.len() as u64);
    assert!(info.highest_file_index > 1); // rollover actually happened
    assert!(test_index(&dir, false).unwrap());

    let mut store = OvStore::open(&dir).unwrap();
    let mut prev: Option<(u32, u32)> = None;
    let mut total = 0u64;
    while let Some(ov) = store.read_overlap().unwrap() {
        if let Some(p) = prev {
            assert!(p <= (ov.a_id, ov.b_id));
        }
        prev = Some((ov.a_id, ov.b_id));
        total += 1;
    }
    assert_eq!(total, info.num_overlaps);

    let (_, counts) = store.num_overlaps_per_frag();
    assert_eq!(counts.iter().map(|&c| c as u64).sum::<u64>(), total);

    // Query consistency: same query twice, then a stricter ceiling.
    let params = CacheParams {
        max_erate: 0.20,
        min_overlap: 40,
        mem_limit: 1 << 20,
        max_per_read: 0,
    };
    let cache = OverlapCache::new(&dir, None, &params).unwrap();
    for id in 1..=20 {
        let loose = cache.get_overlaps(id, 0.20);
        assert_eq!(loose, cache.get_overlaps(id, 0.20));
        let strict = cache.get_overlaps(id, 0.05);
        assert_eq!(&loose[..strict.len()], strict);
        assert!(strict.iter().all(|o| o.erate() <= 0.05 + 1e-9));
    }
}
