//! Per-run control-socket address derivation.
//!
//! §6: "a per-run local-socket path derived as `@dagu_<safeName>_<hash6>.sock`
//! under a platform-appropriate temp directory, total length ≤ 50 bytes."

use md5::{Digest, Md5};
use std::path::PathBuf;

const MAX_SOCKET_NAME_LEN: usize = 50;

fn sanitize(input: &str) -> String {
    input
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn hash6(name: &str, run_id: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(name.as_bytes());
    hasher.update(run_id.as_bytes());
    let digest = hasher.finalize();
    digest.iter().take(3).map(|b| format!("{b:02x}")).collect()
}

/// Build the `@dagu_<safeName>_<hash6>.sock` file name, truncating
/// `safe_name` as needed to keep the whole name within 50 bytes.
pub fn socket_path(safe_name: &str, dag_name: &str, run_id: &str) -> PathBuf {
    let sanitized = sanitize(safe_name);
    let hash = hash6(dag_name, run_id);

    let suffix = format!("_{hash}.sock");
    let prefix = "@dagu_";
    let budget = MAX_SOCKET_NAME_LEN.saturating_sub(prefix.len() + suffix.len());

    let truncated: String = sanitized.chars().take(budget).collect();
    let file_name = format!("{prefix}{truncated}{suffix}");

    std::env::temp_dir().join(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_sanitized() {
        let path = socket_path("my/dag name.yaml", "mydag", "run-1");
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(!name.contains('/'));
        assert!(!name.contains('.') || name.ends_with(".sock"));
    }

    #[test]
    fn total_length_is_bounded() {
        let long_name = "a".repeat(200);
        let path = socket_path(&long_name, "mydag", "run-1");
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.len() <= MAX_SOCKET_NAME_LEN, "name was {} bytes: {name}", name.len());
    }

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(hash6("a", "b"), hash6("a", "b"));
        assert_ne!(hash6("a", "b"), hash6("a", "c"));
    }
}
