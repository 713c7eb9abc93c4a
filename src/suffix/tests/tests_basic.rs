#[cfg(test)]
mod tests {
    use crate::suffix::{Suffix, SuffixError};
    use tempfile::TempDir;
    use tracing_subscriber::EnvFilter;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    #[test]
    fn append_returns_increasing_virtual_offsets() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let mut suffix = Suffix::create(tmp.path().join("gen-000000.suffix"), 1000).unwrap();

        assert_eq!(suffix.start_offset(), 1000);
        assert_eq!(suffix.end_offset(), 1000);
        assert!(suffix.is_empty());

        assert_eq!(suffix.append(b"hello").unwrap(), 1000);
        assert_eq!(suffix.append(b"world!").unwrap(), 1005);
        assert_eq!(suffix.end_offset(), 1011);
        assert_eq!(suffix.len(), 11);
    }

    #[test]
    fn read_at_round_trips() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let mut suffix = Suffix::create(tmp.path().join("s.suffix"), 500).unwrap();
        suffix.append(b"abcdefgh").unwrap();

        let mut buf = [0u8; 8];
        suffix.read_at(500, &mut buf).unwrap();
        assert_eq!(&buf, b"abcdefgh");

        let mut buf = [0u8; 3];
        suffix.read_at(503, &mut buf).unwrap();
        assert_eq!(&buf, b"def");
    }

    #[test]
    fn read_outside_bounds_fails() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let mut suffix = Suffix::create(tmp.path().join("s.suffix"), 500).unwrap();
        suffix.append(b"abcd").unwrap();

        let mut buf = [0u8; 1];
        // Below the start offset.
        let err = suffix.read_at(499, &mut buf).unwrap_err();
        assert!(matches!(err, SuffixError::OutOfBounds { offset: 499, .. }));

        // Crossing the end.
        let mut buf = [0u8; 3];
        let err = suffix.read_at(502, &mut buf).unwrap_err();
        assert!(matches!(err, SuffixError::OutOfBounds { offset: 502, .. }));
    }

    #[test]
    fn reopen_recovers_start_offset_and_length() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("s.suffix");
        {
            let mut suffix = Suffix::create(&path, 42).unwrap();
            suffix.append(b"persisted").unwrap();
            suffix.close().unwrap();
        }

        let reopened = Suffix::open(&path, false).unwrap();
        assert_eq!(reopened.start_offset(), 42);
        assert_eq!(reopened.len(), 9);
        assert_eq!(reopened.end_offset(), 51);

        let mut buf = [0u8; 9];
        reopened.read_at(42, &mut buf).unwrap();
        assert_eq!(&buf, b"persisted");
    }

    #[test]
    fn read_only_handle_rejects_appends() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("s.suffix");
        Suffix::create(&path, 0).unwrap().close().unwrap();

        let mut reopened = Suffix::open(&path, false).unwrap();
        let err = reopened.append(b"nope").unwrap_err();
        assert!(matches!(err, SuffixError::ReadOnly));
    }
}
