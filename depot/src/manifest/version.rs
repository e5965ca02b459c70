//! Version string parsing and precedence.

use std::cmp::Ordering;

use semver::Version;

/// Parse a manifest version string.
///
/// Accepts full semver plus the `MAJOR` and `MAJOR.MINOR` shorthands,
/// which are padded with zeros (`1.2` is `1.2.0`).
pub fn parse_version(raw: &str) -> Result<Version, semver::Error> {
    let raw = raw.trim();
    let split = raw.find(|c: char| c == '-' || c == '+').unwrap_or(raw.len());
    let (core, suffix) = raw.split_at(split);

    match core.matches('.').count() {
        0 => Version::parse(&format!("{core}.0.0{suffix}")),
        1 => Version::parse(&format!("{core}.0{suffix}")),
        _ => Version::parse(raw),
    }
}

/// Highest precedence first. Build metadata does not take part.
pub fn descending(a: &Version, b: &Version) -> Ordering {
    b.cmp_precedence(a)
}
