//! Integrity manifest, `SHA256SUMS` in each generation.
//!
//! One `<hex-digest>  <relative-path>` line per archive member, the format
//! `sha256sum -c` reads. Names holding a backslash, newline or carriage return
//! are escaped the way `sha256sum` does it: the line starts with `\` and those
//! characters are written as `\\`, `\n` and `\r`.

use crate::store::record::write_atomic;
use crate::utils::{BackupError, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub const MANIFEST_FILE: &str = "SHA256SUMS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub digest: String,
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for (idx, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let (escaped, line) = match line.strip_prefix('\\') {
                Some(rest) => (true, rest),
                None => (false, line),
            };
            // "<digest>  <path>", or "<digest> *<path>" for binary mode
            let (digest, rest) = line.split_once(' ').ok_or_else(|| {
                BackupError::Config(format!("malformed manifest line {}: {}", idx + 1, line))
            })?;
            let path = rest.strip_prefix(' ').or_else(|| rest.strip_prefix('*')).unwrap_or(rest);
            if digest.len() != 64 || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(BackupError::Config(format!(
                    "malformed digest on manifest line {}",
                    idx + 1
                )));
            }
            let path = if escaped {
                unescape_name(path).ok_or_else(|| {
                    BackupError::Config(format!("bad escape on manifest line {}", idx + 1))
                })?
            } else {
                path.to_string()
            };
            entries.push(ManifestEntry {
                digest: digest.to_ascii_lowercase(),
                path,
            });
        }
        Ok(Self { entries })
    }

    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|e| {
                if needs_escape(&e.path) {
                    format!("\\{}  {}\n", e.digest, escape_name(&e.path))
                } else {
                    format!("{}  {}\n", e.digest, e.path)
                }
            })
            .collect()
    }

    pub fn read(generation: &Path) -> Result<Option<Self>> {
        match std::fs::read_to_string(generation.join(MANIFEST_FILE)) {
            Ok(raw) => Ok(Some(Self::parse(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn write(&self, generation: &Path) -> Result<()> {
        write_atomic(&generation.join(MANIFEST_FILE), self.render().as_bytes())
    }
}

pub(crate) fn needs_escape(name: &str) -> bool {
    name.contains(['\\', '\n', '\r'])
}

pub(crate) fn escape_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

/// Inverse of [`escape_name`]; `None` on an unknown escape
pub(crate) fn unescape_name(name: &str) -> Option<String> {
    let mut out = String::with_capacity(name.len());
    let mut chars = name.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            '\\' => out.push('\\'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            _ => return None,
        }
    }
    Some(out)
}

/// Stream a file through SHA-256
pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
