use md5::{Digest, Md5};

/// Derive the history-tree subdirectory name for a working-tree path.
///
/// The name is the lowercase hex MD5 of the path bytes exactly as the
/// gatekeeper resolved them; no normalization happens here, so two paths
/// map to the same directory only when they are byte-for-byte equal.
pub fn history_dir_name(path: &str) -> String {
    hex::encode(Md5::digest(path.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vectors() {
        assert_eq!(
            history_dir_name("/test.txt"),
            "1190f2eb05916834fc28c04ba45947d2"
        );
        assert_eq!(
            history_dir_name("/a/b.txt"),
            "d6963f2563fffcac1267cb2a7dd20e81"
        );
        assert_eq!(
            history_dir_name("/foo/bar.txt"),
            "a361f6dba3db7cfce1d6d0f7d87bb190"
        );
    }

    #[test]
    fn no_normalization() {
        // Byte equality is the only equivalence: a missing leading slash is
        // a different path.
        assert_ne!(history_dir_name("/test.txt"), history_dir_name("test.txt"));
    }

    #[test]
    fn deterministic() {
        assert_eq!(history_dir_name("/x"), history_dir_name("/x"));
    }
}
