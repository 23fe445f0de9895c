//! Merge and compaction builder tests.

#[cfg(test)]
mod tests {
    use crate::blocks::Blocks;
    use crate::extent::{Extent, ExtentBuilder};
    use tempfile::TempDir;

    fn builder(tmp: &TempDir, records: &[(&[u8], &[u8])]) -> ExtentBuilder {
        let mut blx = Blocks::create(tmp.path().join("blx")).unwrap();
        for (k, v) in records {
            blx.set(k, v).unwrap();
        }
        ExtentBuilder::from_blocks(&blx)
    }

    fn extent(tmp: &TempDir, name: &str, records: &[(&[u8], &[u8])]) -> Extent {
        builder(tmp, records).write(tmp.path().join(name)).unwrap()
    }

    fn contents(ext: &Extent) -> Vec<(Vec<u8>, Vec<u8>)> {
        (0..ext.total())
            .map(|i| {
                let (k, v) = ext.record(i);
                (k.to_vec(), v.to_vec())
            })
            .collect()
    }

    #[test]
    fn merge_interleaves_disjoint_runs() {
        let tmp = TempDir::new().unwrap();
        let older = extent(&tmp, "ext_old", &[(b"b", b"2"), (b"d", b"4")]);
        let newer = builder(&tmp, &[(b"a", b"1"), (b"c", b"3"), (b"e", b"5")]);

        let merged = newer
            .merge_older(&older)
            .write(tmp.path().join("ext_merged"))
            .unwrap();

        assert_eq!(
            contents(&merged),
            vec![
                (b"a".to_vec(), b"1".to_vec()),
                (b"b".to_vec(), b"2".to_vec()),
                (b"c".to_vec(), b"3".to_vec()),
                (b"d".to_vec(), b"4".to_vec()),
                (b"e".to_vec(), b"5".to_vec()),
            ]
        );
    }

    #[test]
    fn newer_side_wins_duplicate_keys() {
        let tmp = TempDir::new().unwrap();
        let older = extent(
            &tmp,
            "ext_old",
            &[(b"a", b"old-a"), (b"b", b"old-b"), (b"c", b"old-c")],
        );
        let newer = builder(&tmp, &[(b"b", b"new-b")]);

        let merged = newer
            .merge_older(&older)
            .write(tmp.path().join("ext_merged"))
            .unwrap();

        // The duplicate collapsed: three records, b carries the new value.
        assert_eq!(
            contents(&merged),
            vec![
                (b"a".to_vec(), b"old-a".to_vec()),
                (b"b".to_vec(), b"new-b".to_vec()),
                (b"c".to_vec(), b"old-c".to_vec()),
            ]
        );
    }

    #[test]
    fn tombstone_masks_older_value_through_a_merge() {
        let tmp = TempDir::new().unwrap();
        let older = extent(&tmp, "ext_old", &[(b"doomed", b"value")]);
        let newer = builder(&tmp, &[(b"doomed", b"")]);

        let merged = newer
            .merge_older(&older)
            .write(tmp.path().join("ext_merged"))
            .unwrap();

        // The tombstone survives the merge and masks the old value.
        assert_eq!(merged.total(), 1);
        let (k, v) = merged.record(0);
        assert_eq!(k, b"doomed");
        assert!(v.is_empty());
    }

    #[test]
    fn remainders_drain_in_order() {
        let tmp = TempDir::new().unwrap();

        // Newer side exhausts first.
        let older = extent(&tmp, "ext_a", &[(b"x", b"1"), (b"y", b"2"), (b"z", b"3")]);
        let merged = builder(&tmp, &[(b"a", b"0")])
            .merge_older(&older)
            .write(tmp.path().join("ext_m1"))
            .unwrap();
        let keys: Vec<_> = contents(&merged).into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            vec![b"a".to_vec(), b"x".to_vec(), b"y".to_vec(), b"z".to_vec()]
        );

        // Older side exhausts first.
        let older = extent(&tmp, "ext_b", &[(b"a", b"0")]);
        let merged = builder(&tmp, &[(b"x", b"1"), (b"y", b"2")])
            .merge_older(&older)
            .write(tmp.path().join("ext_m2"))
            .unwrap();
        let keys: Vec<_> = contents(&merged).into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"x".to_vec(), b"y".to_vec()]);
    }

    #[test]
    fn merged_total_counts_emitted_records() {
        let tmp = TempDir::new().unwrap();
        let older = extent(&tmp, "ext_old", &[(b"a", b"1"), (b"b", b"2"), (b"c", b"3")]);
        let newer = builder(&tmp, &[(b"b", b"new"), (b"d", b"4")]);

        let merged = newer.merge_older(&older);
        assert_eq!(merged.len(), 4);
    }

    #[test]
    fn drop_tombstones_removes_only_empty_values() {
        let tmp = TempDir::new().unwrap();
        let compacted = builder(
            &tmp,
            &[(b"dead", b""), (b"live", b"v"), (b"gone", b""), (b"kept", b"w")],
        )
        .drop_tombstones()
        .write(tmp.path().join("ext_c"))
        .unwrap();

        assert_eq!(
            contents(&compacted),
            vec![
                (b"kept".to_vec(), b"w".to_vec()),
                (b"live".to_vec(), b"v".to_vec()),
            ]
        );
    }

    #[test]
    fn drop_tombstones_without_tombstones_is_identity() {
        let tmp = TempDir::new().unwrap();
        let b = builder(&tmp, &[(b"a", b"1"), (b"b", b"2")]).drop_tombstones();
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn merge_then_compact_drops_masked_and_masking_records() {
        let tmp = TempDir::new().unwrap();
        let older = extent(&tmp, "ext_old", &[(b"a", b"1"), (b"b", b"2")]);
        let newer = builder(&tmp, &[(b"a", b"")]);

        let floor = newer
            .merge_older(&older)
            .drop_tombstones()
            .write(tmp.path().join("ext_floor"))
            .unwrap();

        // The tombstone ate the old copy of `a` and then died at the floor.
        assert_eq!(contents(&floor), vec![(b"b".to_vec(), b"2".to_vec())]);
        assert_eq!(floor.find(b"a"), None);
    }
}
