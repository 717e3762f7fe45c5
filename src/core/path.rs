//! URL path canonicalisation used for fixed-path redirects.

/// Return the canonical form of `path`.
///
/// Applied iteratively until nothing changes:
/// 1. repeated slashes collapse into one
/// 2. `.` elements are dropped
/// 3. an inner `..` removes itself and the element before it
/// 4. `..` directly below the root is dropped
///
/// The result always starts with `/`, and keeps a trailing slash when the
/// input had one (or ended in `.`/`..` after a non-root element).
pub fn clean_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }

    let bytes = path.as_bytes();
    let len = bytes.len();
    let mut out: Vec<u8> = Vec::with_capacity(len + 1);
    out.push(b'/');

    // Next byte to read; the leading '/' is implicit.
    let mut r = if bytes[0] == b'/' { 1 } else { 0 };
    let mut trailing = len > 1 && bytes[len - 1] == b'/';

    while r < len {
        match bytes[r] {
            b'/' => r += 1,
            b'.' if r + 1 == len => {
                trailing = true;
                r += 1;
            }
            b'.' if bytes[r + 1] == b'/' => r += 2,
            b'.' if bytes[r + 1] == b'.' && (r + 2 == len || bytes[r + 2] == b'/') => {
                r += 3;
                if out.len() > 1 {
                    // Drop the last element together with its slash.
                    let keep = out[1..].iter().rposition(|&b| b == b'/').map_or(1, |i| i + 1);
                    out.truncate(keep);
                }
                if r >= len {
                    trailing = out.len() > 1;
                }
            }
            _ => {
                if out.len() > 1 {
                    out.push(b'/');
                }
                while r < len && bytes[r] != b'/' {
                    out.push(bytes[r]);
                    r += 1;
                }
            }
        }
    }

    if trailing && out.len() > 1 {
        out.push(b'/');
    }

    String::from_utf8(out).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_path() {
        let cases = [
            // Already clean
            ("/", "/"),
            ("/abc", "/abc"),
            ("/a/b/c", "/a/b/c"),
            ("/abc/", "/abc/"),
            ("/a/b/c/", "/a/b/c/"),
            // Missing root
            ("", "/"),
            ("a/", "/a/"),
            ("abc", "/abc"),
            ("abc/def", "/abc/def"),
            ("a/b/c", "/a/b/c"),
            // Remove doubled slash
            ("//", "/"),
            ("/abc//", "/abc/"),
            ("/abc/def//", "/abc/def/"),
            ("/a/b/c//", "/a/b/c/"),
            ("/abc//def//ghi", "/abc/def/ghi"),
            ("//abc", "/abc"),
            ("///abc", "/abc"),
            ("//abc//", "/abc/"),
            // Remove . elements
            (".", "/"),
            ("./", "/"),
            ("/abc/./def", "/abc/def"),
            ("/./abc/def", "/abc/def"),
            ("/abc/.", "/abc/"),
            // Remove .. elements
            ("..", "/"),
            ("../", "/"),
            ("../../", "/"),
            ("../..", "/"),
            ("../../abc", "/abc"),
            ("/abc/def/ghi/../jkl", "/abc/def/jkl"),
            ("/abc/def/../ghi/../jkl", "/abc/jkl"),
            ("/abc/def/..", "/abc/"),
            ("/abc/def/../..", "/"),
            ("/abc/def/../../..", "/"),
            ("/abc/def/../../..", "/"),
            ("/abc/def/../../../ghi/jkl/../../../mno", "/mno"),
            // Combinations
            ("abc/./../def", "/def"),
            ("abc//./../def", "/def"),
            ("abc/../../././../def", "/def"),
        ];

        for (input, want) in cases {
            assert_eq!(clean_path(input), want, "clean_path({input:?})");
            // Idempotent
            assert_eq!(clean_path(want), want, "clean_path({want:?})");
        }
    }

    #[test]
    fn test_dot_prefixed_names_are_kept() {
        assert_eq!(clean_path("/.well-known/x"), "/.well-known/x");
        assert_eq!(clean_path("/a/..b"), "/a/..b");
    }
}
