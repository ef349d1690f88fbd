//! Path sandbox and input validators.
//!
//! Every externally-supplied path is resolved (symlinks included) and must
//! land under an allow-listed root; rejection distinguishes "outside allowed
//! roots" from "too large". The sandbox also owns the hash-format, mask,
//! attack-name, and session-name grammars used across the engine.
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, ErrorKind, Result, Severity};

/// Default cap on validated file sizes.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024 * 1024; // 10 GiB

/// Characters allowed in hashcat masks: class tokens after `?`, hex charset
/// refs, and literal alphanumerics.
static SAFE_MASK_CHARS: LazyLock<BTreeSet<char>> = LazyLock::new(|| {
    let mut set: BTreeSet<char> = "?ludsahHx".chars().collect();
    set.extend('0'..='9');
    set.extend('a'..='z');
    set.extend('A'..='Z');
    set
});

static SESSION_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("session name regex"));
static GENERATED_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{8}_\d{6}$").expect("generated id regex"));
static ATTACK_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9 _.+()-]{1,255}$").expect("attack name regex"));
static LOOSE_HASH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9:$.*\-_/=+]+$").expect("loose hash regex"));

/// Validates externally-supplied paths against an allow-list of roots.
#[derive(Debug, Clone)]
pub struct PathSandbox {
    allowed_roots: Vec<PathBuf>,
    max_file_size: u64,
}

impl PathSandbox {
    /// Build a sandbox from the default roots plus `extra_roots`. Roots that
    /// do not exist are skipped; all kept roots are symlink-resolved.
    pub fn new(extra_roots: &[PathBuf]) -> Self {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            candidates.push(cwd.clone());
            candidates.push(cwd.join("wordlists"));
            candidates.push(cwd.join("rules"));
            candidates.push(cwd.join("hashes"));
        }
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(".hashwrap"));
        }
        #[cfg(unix)]
        {
            candidates.push(PathBuf::from("/usr/share/wordlists"));
            candidates.push(PathBuf::from("/usr/share/hashcat"));
        }
        candidates.push(std::env::temp_dir());
        candidates.extend_from_slice(extra_roots);

        let allowed_roots = candidates
            .into_iter()
            .filter_map(|p| p.canonicalize().ok())
            .collect();
        Self {
            allowed_roots,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }

    pub fn with_max_file_size(mut self, max: u64) -> Self {
        self.max_file_size = max;
        self
    }

    pub fn allowed_roots(&self) -> &[PathBuf] {
        &self.allowed_roots
    }

    /// Resolve `path` (following symlinks) and check it lies under an allowed
    /// root. `must_exist` additionally requires the file to be present.
    pub fn validate_path(&self, path: &Path, must_exist: bool) -> Result<PathBuf> {
        if path.as_os_str().is_empty() {
            return Err(Error::validation("validate_path", "empty file path provided"));
        }
        let resolved = self.resolve(path, must_exist)?;

        if !self
            .allowed_roots
            .iter()
            .any(|root| resolved.starts_with(root))
        {
            return Err(Error::new(
                ErrorKind::Security,
                Severity::Fatal,
                "validate_path",
                "path_outside_roots",
                format!(
                    "path '{}' is outside allowed directories (resolved to {})",
                    path.display(),
                    resolved.display()
                ),
            ));
        }

        if resolved.is_file() {
            let size = resolved
                .metadata()
                .map_err(|e| Error::from_io(e, "validate_path", &resolved))?
                .len();
            if size > self.max_file_size {
                return Err(Error::new(
                    ErrorKind::Security,
                    Severity::Critical,
                    "validate_path",
                    "file_too_large",
                    format!(
                        "file too large: {} bytes (max {})",
                        size, self.max_file_size
                    ),
                )
                .with_context("path", resolved.display().to_string()));
            }
        }
        Ok(resolved)
    }

    fn resolve(&self, path: &Path, must_exist: bool) -> Result<PathBuf> {
        match path.canonicalize() {
            Ok(resolved) => Ok(resolved),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !must_exist => {
                // Resolve through the parent so a yet-to-be-created file still
                // gets symlink-safe containment checking.
                let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
                let name = path.file_name().ok_or_else(|| {
                    Error::validation("validate_path", format!("invalid path: {}", path.display()))
                })?;
                let base = match parent {
                    Some(p) => p
                        .canonicalize()
                        .map_err(|e| Error::from_io(e, "validate_path", p))?,
                    None => std::env::current_dir()
                        .map_err(|e| Error::from_io(e, "validate_path", path))?,
                };
                Ok(base.join(name))
            }
            Err(e) => Err(Error::from_io(e, "validate_path", path)),
        }
    }
}

/// Validate one hash line: printable, length within [8, 1024], and either a
/// known pattern or a loose hex/base64/`$`-framed shape.
pub fn validate_hash_format(line: &str) -> Result<String> {
    let line = line.trim();
    if line.is_empty() {
        return Err(Error::validation("validate_hash", "empty hash string"));
    }
    if line.len() > 1024 {
        return Err(Error::validation(
            "validate_hash",
            format!("hash string too long: {} characters", line.len()),
        ));
    }
    if line.chars().any(|c| c.is_control()) {
        return Err(Error::validation(
            "validate_hash",
            "hash contains non-printable characters",
        ));
    }
    if crate::identify::classify(line).is_some() {
        return Ok(line.to_string());
    }
    if line.len() >= 8 && LOOSE_HASH_RE.is_match(line) {
        return Ok(line.to_string());
    }
    Err(Error::validation(
        "validate_hash",
        format!("invalid hash format: {}", &line[..line.len().min(50)]),
    ))
}

/// Validate a hashcat mask against the safe character set and length cap.
/// Violations are security errors naming the offending characters.
pub fn validate_mask(mask: &str) -> Result<()> {
    let invalid: BTreeSet<char> = mask
        .chars()
        .filter(|c| !SAFE_MASK_CHARS.contains(c))
        .collect();
    if !invalid.is_empty() {
        let listed: String = invalid.into_iter().collect();
        return Err(Error::security(
            "validate_mask",
            format!("Invalid mask characters detected: {:?}", listed),
        ));
    }
    if mask.len() > 256 {
        return Err(Error::security(
            "validate_mask",
            format!("mask too long: {} characters (max 256)", mask.len()),
        ));
    }
    Ok(())
}

/// Session names accepted for `--session` and directory naming.
pub fn validate_session_name(name: &str) -> Result<()> {
    if SESSION_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(Error::validation(
            "validate_session_name",
            format!(
                "invalid session name '{}': only [A-Za-z0-9_-], 1-64 chars",
                name
            ),
        ))
    }
}

/// True for auto-generated `YYYYMMDD_HHMMSS` session ids.
pub fn is_generated_session_id(id: &str) -> bool {
    GENERATED_ID_RE.is_match(id)
}

/// Attack names recorded into sessions must be filename-safe.
pub fn validate_attack_name(name: &str) -> Result<()> {
    if ATTACK_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(Error::validation(
            "validate_attack_name",
            format!("invalid attack name: {}", name),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn sandbox_with(root: &Path) -> PathSandbox {
        PathSandbox::new(&[root.to_path_buf()])
    }

    #[test]
    fn rejects_paths_outside_roots() {
        let tmp = tempfile::tempdir().unwrap();
        let sandbox = sandbox_with(tmp.path());
        let err = sandbox
            .validate_path(Path::new("/etc/shadow"), true)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Security);
        assert_eq!(err.code, "path_outside_roots");
        assert!(err.message.contains("outside allowed directories"));
    }

    #[test]
    fn accepts_files_under_allowed_roots() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("wordlist.txt");
        std::fs::write(&file, "password\n").unwrap();
        let sandbox = sandbox_with(tmp.path());
        let resolved = sandbox.validate_path(&file, true).unwrap();
        assert!(resolved.starts_with(tmp.path().canonicalize().unwrap()));
    }

    #[test]
    fn resolves_symlinks_before_containment_check() {
        #[cfg(unix)]
        {
            let inside = tempfile::tempdir().unwrap();
            let outside = tempfile::tempdir().unwrap();
            let target = outside.path().join("secret.txt");
            std::fs::write(&target, "x").unwrap();
            let link = inside.path().join("innocent.txt");
            std::os::unix::fs::symlink(&target, &link).unwrap();

            // Only `inside` is allowed; the symlink resolves outside it.
            let sandbox = PathSandbox {
                allowed_roots: vec![inside.path().canonicalize().unwrap()],
                max_file_size: DEFAULT_MAX_FILE_SIZE,
            };
            let err = sandbox.validate_path(&link, true).unwrap_err();
            assert_eq!(err.code, "path_outside_roots");
        }
    }

    #[test]
    fn distinguishes_oversized_files() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("big.txt");
        std::fs::write(&file, vec![b'a'; 128]).unwrap();
        let sandbox = sandbox_with(tmp.path()).with_max_file_size(64);
        let err = sandbox.validate_path(&file, true).unwrap_err();
        assert_eq!(err.code, "file_too_large");
    }

    #[test]
    fn nonexistent_path_allowed_when_existence_not_required() {
        let tmp = tempfile::tempdir().unwrap();
        let sandbox = sandbox_with(tmp.path());
        let potfile = tmp.path().join("session.potfile");
        let resolved = sandbox.validate_path(&potfile, false).unwrap();
        assert!(resolved.ends_with("session.potfile"));
        assert!(sandbox.validate_path(&potfile, true).is_err());
    }

    #[test]
    fn mask_validator_accepts_safe_and_names_offenders() {
        assert!(validate_mask("?u?l?l?l?l?d?d").is_ok());
        assert!(validate_mask("?a?a?a?a").is_ok());
        let err = validate_mask("?l;rm -rf /").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Security);
        assert!(err.message.contains("Invalid mask characters"));
        assert!(validate_mask(&"?l".repeat(129)).is_err()); // 258 > 256
    }

    #[test]
    fn hash_format_validator_bounds_and_shapes() {
        assert!(validate_hash_format("5f4dcc3b5aa765d61d8327deb882cf99").is_ok());
        assert!(validate_hash_format("$krb5tgs$23$*u$r$s*$deadbeef").is_ok());
        assert!(validate_hash_format("short").is_err());
        assert!(validate_hash_format("has spaces in it").is_err());
        assert!(validate_hash_format(&"a".repeat(1025)).is_err());
        assert!(validate_hash_format("with\tcontrol").is_err());
    }

    #[test]
    fn session_name_grammar() {
        assert!(validate_session_name("corp-audit_01").is_ok());
        assert!(validate_session_name(&"a".repeat(64)).is_ok());
        assert!(validate_session_name(&"a".repeat(65)).is_err());
        assert!(validate_session_name("bad name").is_err());
        assert!(validate_session_name("").is_err());
        assert!(is_generated_session_id("20260801_120000"));
        assert!(!is_generated_session_id("corp-audit"));
    }
}
