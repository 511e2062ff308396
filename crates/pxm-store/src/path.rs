//! Deterministic storage paths for cached artifacts.
//!
//! Hash-addressed artifacts shard on the first 16 hex digits of their digest
//! (`abc/defghijklmnop/<basename>`), which caps the fan-out of the top level at
//! 4096 directories regardless of digest family. Links without a digest are
//! keyed by their fragment-free URL under `+e/`.

use crate::{hash::HashSpec, link::Link};

pub const EGG_PREFIX: &str = "+e";
pub const UPLOAD_SEGMENT: &str = "+f";

/// `"<h[0:3]>/<h[3:16]>/<basename>"`.
#[must_use]
pub fn hashdir_relpath(spec: &HashSpec, basename: &str) -> String {
    let (a, b) = spec.hashdirs();
    format!("{a}/{b}/{basename}")
}

/// Storage path for a mirrored link.
#[must_use]
pub fn derive_relpath(link: &Link) -> String {
    match link.hash_spec() {
        Some(spec) => hashdir_relpath(spec, &link.basename()),
        None => {
            let dirname = sanitize_dirname(&link.dir_parts().join("_"));
            format!("{EGG_PREFIX}/{dirname}/{}", link.basename())
        }
    }
}

/// Storage path for an artifact uploaded to `user/index`.
#[must_use]
pub fn upload_relpath(user: &str, index: &str, spec: &HashSpec, basename: &str) -> String {
    format!(
        "{user}/{index}/{UPLOAD_SEGMENT}/{}",
        hashdir_relpath(spec, basename)
    )
}

/// A single non-empty path component with no separators, NUL, `.` or `..`.
pub(crate) fn is_plain_segment(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\', '\0'])
}

fn sanitize_dirname(raw: &str) -> String {
    raw.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(raw: &str) -> Link {
        Link::parse(raw).expect("valid link")
    }

    #[test]
    fn shards_md5_links() {
        let relpath = derive_relpath(&link(
            "http://pkg.example/pytest-1.2.zip#md5=aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
        ));
        assert_eq!(relpath, "aaa/aaaaaaaaaaaaa/pytest-1.2.zip");
    }

    #[test]
    fn shards_sha256_links_on_same_prefix_width() {
        let value = "0123456789abcdef".repeat(4);
        let relpath = derive_relpath(&link(&format!(
            "http://pkg.example/pytest-1.2.zip#sha256={value}"
        )));
        assert_eq!(relpath, "012/3456789abcdef/pytest-1.2.zip");
    }

    #[test]
    fn same_hash_different_basename_shares_shard() {
        let hash = "md5=bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
        let a = derive_relpath(&link(&format!("http://x.example/a-1.0.zip#{hash}")));
        let b = derive_relpath(&link(&format!("http://y.example/b-1.0.zip#{hash}")));
        assert_eq!(a.rsplit_once('/').map(|(dir, _)| dir), Some("bbb/bbbbbbbbbbbbb"));
        assert_eq!(
            a.rsplit_once('/').map(|(dir, _)| dir),
            b.rsplit_once('/').map(|(dir, _)| dir)
        );
    }

    #[test]
    fn egg_links_use_url_basename() {
        let relpath = derive_relpath(&link(
            "https://vcs.example:8080/org/pkg%20x/tarball/master#egg=pytest-dev",
        ));
        assert_eq!(relpath, "+e/vcs.example_8080_org_pkg_x_tarball/master");
    }

    #[test]
    fn plain_segments_exclude_traversal() {
        assert!(is_plain_segment("pkg-1.0.tar.gz"));
        assert!(is_plain_segment("..pkg"));
        for name in ["", ".", "..", "a/b", "a\\b", "a\0b"] {
            assert!(!is_plain_segment(name), "accepted {name:?}");
        }
    }

    #[test]
    fn upload_paths_are_namespaced() {
        let spec = "md5=cccccccccccccccccccccccccccccccc".parse().expect("spec");
        assert_eq!(
            upload_relpath("user", "dev", &spec, "pkg-1.0.tar.gz"),
            "user/dev/+f/ccc/ccccccccccccc/pkg-1.0.tar.gz"
        );
    }
}
