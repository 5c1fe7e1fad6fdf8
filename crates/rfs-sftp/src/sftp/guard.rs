// ── Protected-path policy ────────────────────────────────────────────────────
//
// Destructive operations consult this before touching the transport. Matching
// is plain string comparison on the path as given; no normalisation.

/// System directories the front-end must never delete.
pub const DEFAULT_PROTECTED_PREFIXES: &[&str] = &[
    "/bin", "/boot", "/dev", "/etc", "/home", "/lib", "/opt", "/proc", "/root", "/sbin", "/tmp",
    "/usr", "/var",
];

#[derive(Debug, Clone)]
pub struct PathGuard {
    prefixes: Vec<String>,
}

impl PathGuard {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_allowed(&self, path: &str) -> bool {
        is_allowed(path, &self.prefixes)
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }
}

impl Default for PathGuard {
    fn default() -> Self {
        Self::new(DEFAULT_PROTECTED_PREFIXES.iter().copied())
    }
}

/// `false` for `/`, for any prefix itself and for anything beneath a prefix.
pub fn is_allowed<S: AsRef<str>>(path: &str, prefixes: &[S]) -> bool {
    if path == "/" {
        return false;
    }
    !prefixes.iter().any(|prefix| {
        let prefix = prefix.as_ref();
        path == prefix
            || path
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'))
    })
}

/// Absolute with no empty, `.` or `..` segments, so that [`is_allowed`] sees
/// the same string the remote shell resolves. One trailing `/` is accepted.
pub fn is_normalised(path: &str) -> bool {
    let Some(rest) = path.strip_prefix('/') else {
        return false;
    };
    let rest = rest.strip_suffix('/').unwrap_or(rest);
    rest.is_empty()
        || rest
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_never_allowed() {
        assert!(!is_allowed::<&str>("/", &[]));
        assert!(!is_allowed("/", &["/etc"]));
        assert!(!PathGuard::new(Vec::<String>::new()).is_allowed("/"));
    }

    #[test]
    fn prefix_and_descendants_denied() {
        let p = ["/etc"];
        assert!(!is_allowed("/etc", &p));
        assert!(!is_allowed("/etc/passwd", &p));
        assert!(!is_allowed("/etc/ssh/sshd_config", &p));
    }

    #[test]
    fn siblings_with_shared_text_allowed() {
        assert!(is_allowed("/etcetera", &["/etc"]));
        assert!(is_allowed("/home/bob/file", &["/etc"]));
    }

    #[test]
    fn default_set() {
        let guard = PathGuard::default();
        assert!(!guard.is_allowed("/home"));
        assert!(!guard.is_allowed("/var/log/syslog"));
        assert!(guard.is_allowed("/srv/www/index.html"));
        assert!(guard.is_allowed("/mnt/data"));
        assert_eq!(guard.prefixes().len(), DEFAULT_PROTECTED_PREFIXES.len());
    }

    #[test]
    fn relative_paths_are_not_matched() {
        // exact string comparison only
        assert!(is_allowed("etc/passwd", &["/etc"]));
    }

    #[test]
    fn normalised_paths() {
        assert!(is_normalised("/"));
        assert!(is_normalised("/etc"));
        assert!(is_normalised("/home/alice/x/"));
        assert!(is_normalised("/home/alice/.bashrc"));
        assert!(is_normalised("/srv/a..b"));
    }

    #[test]
    fn aliases_of_protected_paths_are_not_normalised() {
        for path in ["//etc", "/./etc", "/home/alice/../../etc", "/etc/", "etc", "", "/home//alice", "/home/."] {
            let expected = path == "/etc/";
            assert_eq!(is_normalised(path), expected, "{}", path);
        }
    }
}
