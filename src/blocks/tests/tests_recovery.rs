//! Recovery tests: reload, duplicate-slot compaction, partial trailers,
//! corrupt heads.

#[cfg(test)]
mod tests {
    use crate::blocks::Blocks;
    use crate::codec::{BlxHead, HEAD_SIZE};
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::TempDir;

    fn blx_path(tmp: &TempDir) -> std::path::PathBuf {
        tmp.path().join("blx")
    }

    #[test]
    fn reload_restores_all_records() {
        let tmp = TempDir::new().unwrap();
        let path = blx_path(&tmp);

        let mut blx = Blocks::create(&path).unwrap();
        for i in 0..500 {
            blx.set(format!("key-{i:04}").as_bytes(), format!("val-{i}").as_bytes())
                .unwrap();
        }
        drop(blx);

        let blx = Blocks::load(&path).unwrap();
        assert_eq!(blx.len(), 500);
        for i in 0..500 {
            assert_eq!(
                blx.get(format!("key-{i:04}").as_bytes()),
                Some(format!("val-{i}").into_bytes().as_slice())
            );
        }
    }

    #[test]
    fn reload_collapses_overwrites_and_rewrites_the_log() {
        let tmp = TempDir::new().unwrap();
        let path = blx_path(&tmp);

        let mut blx = Blocks::create(&path).unwrap();
        for round in 0..4 {
            for i in 0..50 {
                blx.set(
                    format!("key-{i:02}").as_bytes(),
                    format!("round-{round}").as_bytes(),
                )
                .unwrap();
            }
        }
        let logged = std::fs::metadata(&path).unwrap().len();
        drop(blx);

        let blx = Blocks::load(&path).unwrap();
        assert_eq!(blx.len(), 50);
        for i in 0..50 {
            assert_eq!(
                blx.get(format!("key-{i:02}").as_bytes()),
                Some(b"round-3".as_slice())
            );
        }

        // The rewrite dropped the three stale entries per key.
        let compacted = std::fs::metadata(&path).unwrap().len();
        assert!(compacted < logged);
        assert_eq!(compacted, 50 * (HEAD_SIZE as u64 + 6 + 7));
    }

    #[test]
    fn partial_trailing_record_is_truncated() {
        let tmp = TempDir::new().unwrap();
        let path = blx_path(&tmp);

        let mut blx = Blocks::create(&path).unwrap();
        blx.set(b"whole", b"record").unwrap();
        drop(blx);

        // Simulate a crash mid-append: a head promising more bytes than
        // were written.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        let head = BlxHead {
            slot: 1,
            klen: 7,
            vlen: 100,
        };
        file.write_all(&head.encode()).unwrap();
        file.write_all(b"partial").unwrap();
        drop(file);

        let blx = Blocks::load(&path).unwrap();
        assert_eq!(blx.len(), 1);
        assert_eq!(blx.get(b"whole"), Some(b"record".as_slice()));

        let expected = (HEAD_SIZE + 5 + 6) as u64;
        assert_eq!(std::fs::metadata(&path).unwrap().len(), expected);
    }

    #[test]
    fn out_of_range_slot_marks_a_corrupt_trailer() {
        let tmp = TempDir::new().unwrap();
        let path = blx_path(&tmp);

        let mut blx = Blocks::create(&path).unwrap();
        blx.set(b"good", b"v").unwrap();
        drop(blx);

        // A head claiming a slot far beyond the dense prefix.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        let head = BlxHead {
            slot: 77,
            klen: 3,
            vlen: 3,
        };
        file.write_all(&head.encode()).unwrap();
        file.write_all(b"badbad").unwrap();
        drop(file);

        let blx = Blocks::load(&path).unwrap();
        assert_eq!(blx.len(), 1);
        assert_eq!(blx.get(b"good"), Some(b"v".as_slice()));
        assert_eq!(
            std::fs::metadata(&path).unwrap().len(),
            (HEAD_SIZE + 4 + 1) as u64
        );
    }

    #[test]
    fn load_of_missing_file_starts_empty() {
        let tmp = TempDir::new().unwrap();
        let blx = Blocks::load(blx_path(&tmp)).unwrap();
        assert!(blx.is_empty());
    }

    #[test]
    fn writes_after_recovery_land_after_the_tail() {
        let tmp = TempDir::new().unwrap();
        let path = blx_path(&tmp);

        let mut blx = Blocks::create(&path).unwrap();
        blx.set(b"a", b"1").unwrap();
        blx.set(b"a", b"2").unwrap();
        drop(blx);

        let mut blx = Blocks::load(&path).unwrap();
        blx.set(b"b", b"3").unwrap();
        drop(blx);

        let blx = Blocks::load(&path).unwrap();
        assert_eq!(blx.len(), 2);
        assert_eq!(blx.get(b"a"), Some(b"2".as_slice()));
        assert_eq!(blx.get(b"b"), Some(b"3".as_slice()));
    }
}
