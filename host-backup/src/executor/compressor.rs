//! Compression scheme selection for tar archives.
//!
//! `auto` takes the first of zstd, pigz and gzip found on PATH, else no
//! compression.

use std::fmt;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Zstd,
    Pigz,
    Gzip,
    Bzip2,
    Xz,
    None,
}

const AUTO_PREFERENCE: [Compression; 3] = [Compression::Zstd, Compression::Pigz, Compression::Gzip];

impl Compression {
    /// Resolve the configured scheme against the tools on PATH
    pub fn select(requested: &str) -> Self {
        Self::select_with(requested, |tool| which::which(tool).is_ok())
    }

    pub fn select_with(requested: &str, available: impl Fn(&str) -> bool) -> Self {
        match requested.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => AUTO_PREFERENCE
                .into_iter()
                .find(|c| c.tool().map(&available).unwrap_or(true))
                .unwrap_or(Compression::None),
            "zstd" | "zst" => Compression::Zstd,
            "pigz" => Compression::Pigz,
            "gzip" | "gz" => Compression::Gzip,
            "bzip2" | "bz2" => Compression::Bzip2,
            "xz" => Compression::Xz,
            "none" | "tar" => Compression::None,
            other => {
                warn!(requested = %other, "Unknown compression, falling back to gzip");
                Compression::Gzip
            }
        }
    }

    /// Scheme of an existing member, from its file name
    pub fn from_member_name(name: &str) -> Option<Self> {
        if name.ends_with(".tar.zst") {
            Some(Compression::Zstd)
        } else if name.ends_with(".tar.gz") {
            Some(Compression::Gzip)
        } else if name.ends_with(".tar.bz2") {
            Some(Compression::Bzip2)
        } else if name.ends_with(".tar.xz") {
            Some(Compression::Xz)
        } else if name.ends_with(".tar") {
            Some(Compression::None)
        } else {
            None
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Compression::Zstd => "zstd",
            Compression::Pigz => "pigz",
            Compression::Gzip => "gzip",
            Compression::Bzip2 => "bzip2",
            Compression::Xz => "xz",
            Compression::None => "none",
        }
    }

    /// External program tar delegates to
    pub fn tool(&self) -> Option<&'static str> {
        match self {
            Compression::None => None,
            other => Some(other.name()),
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            Compression::Zstd => ".tar.zst",
            Compression::Pigz | Compression::Gzip => ".tar.gz",
            Compression::Bzip2 => ".tar.bz2",
            Compression::Xz => ".tar.xz",
            Compression::None => ".tar",
        }
    }

    /// tar flags for both creating and extracting
    pub fn tar_args(&self) -> Vec<&'static str> {
        match self {
            Compression::Zstd => vec!["--use-compress-program=zstd"],
            Compression::Pigz => vec!["--use-compress-program=pigz"],
            Compression::Gzip => vec!["-z"],
            Compression::Bzip2 => vec!["-j"],
            Compression::Xz => vec!["-J"],
            Compression::None => vec![],
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_preference_order() {
        assert_eq!(Compression::select_with("auto", |_| true), Compression::Zstd);
        assert_eq!(
            Compression::select_with("auto", |t| t != "zstd"),
            Compression::Pigz
        );
        assert_eq!(
            Compression::select_with("auto", |t| t == "gzip"),
            Compression::Gzip
        );
        assert_eq!(Compression::select_with("auto", |_| false), Compression::None);
    }

    #[test]
    fn test_explicit_and_unknown() {
        assert_eq!(Compression::select_with("XZ", |_| false), Compression::Xz);
        assert_eq!(Compression::select_with("none", |_| true), Compression::None);
        assert_eq!(Compression::select_with("lz4", |_| true), Compression::Gzip);
    }

    #[test]
    fn test_suffix_round_trip() {
        for c in [
            Compression::Zstd,
            Compression::Gzip,
            Compression::Bzip2,
            Compression::Xz,
            Compression::None,
        ] {
            let member = format!("etc{}", c.suffix());
            assert_eq!(Compression::from_member_name(&member), Some(c));
        }
        // pigz output is plain gzip
        assert_eq!(
            Compression::from_member_name(&format!("etc{}", Compression::Pigz.suffix())),
            Some(Compression::Gzip)
        );
        assert_eq!(Compression::from_member_name("RESTORE.txt"), None);
    }
}
