#[cfg(test)]
mod tests {
    use crate::mapping::MappingBuilder;
    use crate::sparse::{SparseError, SparseFile};
    use tempfile::TempDir;
    use tracing_subscriber::EnvFilter;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// Builds the canonical sample layout — entries (50,0,5) (80,5,10)
    /// (100,15,10) — and fills each live range with recognizable bytes.
    fn sample_sparse(tmp: &TempDir) -> SparseFile {
        let mapping = MappingBuilder::build(
            [(100u64, 10u64), (80, 10), (50, 5)],
            tmp.path().join("s.map"),
        )
        .unwrap();
        let sparse = SparseFile::create(mapping, tmp.path().join("s.prefix")).unwrap();

        sparse.write(50, &[0x50; 5]).unwrap();
        sparse.write(80, &[0x80; 10]).unwrap();
        sparse.write(100, &[0xA0; 10]).unwrap();
        sparse.flush().unwrap();
        sparse
    }

    #[test]
    fn read_inside_entry_succeeds() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let sparse = sample_sparse(&tmp);

        let mut buf = [0u8; 5];
        sparse.read(50, &mut buf).unwrap();
        assert_eq!(buf, [0x50; 5]);

        // Mid-entry read with an interior offset.
        let mut buf = [0u8; 4];
        sparse.read(83, &mut buf).unwrap();
        assert_eq!(buf, [0x80; 4]);

        // Single byte at the very last live offset.
        let mut buf = [0u8; 1];
        sparse.read(109, &mut buf).unwrap();
        assert_eq!(buf, [0xA0; 1]);
    }

    #[test]
    fn read_exceeding_entry_fails_out_of_bounds() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let sparse = sample_sparse(&tmp);

        // Entry at 80 has 10 bytes; from offset 85 only 5 remain.
        let mut buf = [0u8; 6];
        let err = sparse.read(85, &mut buf).unwrap_err();
        assert!(matches!(
            err,
            SparseError::ReadOutOfBounds {
                offset: 85,
                requested: 6,
                available: 5
            }
        ));

        // Exactly the remaining length is fine.
        let mut buf = [0u8; 5];
        sparse.read(85, &mut buf).unwrap();
    }

    #[test]
    fn read_range_clamps_to_live_run() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let sparse = sample_sparse(&tmp);

        // read_range(85, 3, 10) returns the 5 bytes left in
        // the entry starting at 80 (physical offset 5 + 5 = 10).
        let bytes = sparse.read_range(85, 3, 10).unwrap();
        assert_eq!(bytes, vec![0x80; 5]);

        // max_len smaller than the remaining run caps the read.
        let bytes = sparse.read_range(85, 3, 4).unwrap();
        assert_eq!(bytes, vec![0x80; 4]);
    }

    #[test]
    fn read_range_fails_when_min_len_unsatisfiable() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let sparse = sample_sparse(&tmp);

        let err = sparse.read_range(85, 6, 10).unwrap_err();
        assert!(matches!(
            err,
            SparseError::ReadOutOfBounds {
                requested: 6,
                available: 5,
                ..
            }
        ));
    }

    #[test]
    fn reopen_read_only_sees_written_bytes() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let sparse = sample_sparse(&tmp);
        let map_path = sparse.mapping().path().to_path_buf();
        let data_path = sparse.data_path().to_path_buf();
        sparse.close().unwrap();

        let reopened = SparseFile::open(&map_path, &data_path, false).unwrap();
        let mut buf = [0u8; 10];
        reopened.read(100, &mut buf).unwrap();
        assert_eq!(buf, [0xA0; 10]);
    }
}
