//! Built-in dangerous-command patterns.

use once_cell::sync::Lazy;
use regex::Regex;

/// Block devices that must never be written to directly.
const BLOCK_DEVICE: &str = r"/dev/(?:sd[a-z]|hd[a-z]|nvme\d|vd[a-z]|xvd[a-z]|mmcblk\d)";

/// Recursive flag, in short (`-r`, `-rf`, `-Rf`, `-fr`) or long form.
const RECURSIVE_FLAG: &str = r"(?:-[a-z]*r[a-z]*|--recursive)";

/// Optional words within the same segment.
const SAME_SEGMENT: &str = r"(?:[^;&|\n]*\s)?";

/// A quoted or bare word ends here.
const WORD_END: &str = r#"["']?(?:\s|$|[;&|)])"#;

/// `/`, `/*`, `~` or `$HOME`, optionally quoted.
const ROOT_OR_HOME: &str = r#"["']?(?:/\*?|~/?|\$home/?|\$\{home\}/?)"#;

/// `cmd` with a recursive flag somewhere in the same segment, aimed at `target`.
fn recursive_on(cmd: &str, target: &str) -> String {
    format!(r"(?i)\b{cmd}\s+{SAME_SEGMENT}{RECURSIVE_FLAG}\s+{SAME_SEGMENT}{target}{WORD_END}")
}

static PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    let sources: Vec<(String, &'static str)> = vec![
        (
            recursive_on("rm", ROOT_OR_HOME),
            "recursive removal of the root or home directory",
        ),
        (
            format!(r"(?i)>\s*{BLOCK_DEVICE}"),
            "redirect into a block device",
        ),
        (
            r"(?i)\bdd\s+[^;&|\n]*\bif=/dev/(?:zero|random|urandom)\b".to_string(),
            "disk wipe with dd",
        ),
        (
            format!(r"(?i)\bdd\s+[^;&|\n]*\bof={BLOCK_DEVICE}"),
            "dd onto a block device",
        ),
        (
            r"(?i)\bmkfs(?:\.[a-z0-9]+)?\b".to_string(),
            "filesystem creation",
        ),
        (
            r"(?i):\s*\(\s*\)\s*\{".to_string(),
            "fork bomb",
        ),
        (
            r"(?i)[a-z_.][a-z0-9_.]*\s*\(\s*\)\s*\{[^}]*\|[^}]*&".to_string(),
            "fork bomb",
        ),
        (
            recursive_on("chmod", r#"0?777\s+["']?/"#),
            "recursive chmod 777 on /",
        ),
        (
            recursive_on("chown", r#"["']?/"#),
            "recursive chown on /",
        ),
        (
            r"(?i)\b(?:curl|wget)\b[^;&|\n]*\|\s*(?:sudo\s+)?(?:ba|z|da)?sh\b".to_string(),
            "remote script piped to a shell",
        ),
    ];

    sources
        .into_iter()
        .filter_map(|(source, description)| match Regex::new(&source) {
            Ok(re) => Some((re, description)),
            Err(e) => {
                tracing::error!(
                    pattern = %source,
                    error = %e,
                    "built-in pattern failed to compile"
                );
                None
            }
        })
        .collect()
});

/// Regex detection for destructive commands, including reordered flags
/// (`rm -r -f /`, `rm --recursive --force /`) and chained forms.
#[derive(Debug, Clone, Copy, Default)]
pub struct DangerousPatterns;

impl DangerousPatterns {
    /// Description of the first pattern matching `text`.
    pub fn find(text: &str) -> Option<&'static str> {
        PATTERNS
            .iter()
            .find(|(re, _)| re.is_match(text))
            .map(|(_, description)| *description)
    }

    pub fn is_dangerous(text: &str) -> bool {
        Self::find(text).is_some()
    }

    /// Number of compiled built-in patterns.
    pub fn len() -> usize {
        PATTERNS.len()
    }
}
