//! Debian-policy package version parsing and ordering.
//!
//! A version string has the shape `[epoch:]upstream[-revision]`. Ordering
//! compares the epoch numerically, then the upstream and revision parts by
//! alternating runs of non-digit and digit characters: digit runs compare
//! as integers, non-digit runs compare with `~` before everything (even the
//! end of the string) and letters before all other characters.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VulnError};

/// A parsed package version. Construct with [`PackageVersion::parse`];
/// comparison is the full Debian ordering, so `1.0` == `1.00`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageVersion {
    pub epoch: u64,
    pub upstream: String,
    pub revision: String,
}

impl PackageVersion {
    /// Parse a `[epoch:]upstream[-revision]` string. Fails explicitly on
    /// empty parts, a non-numeric epoch, or characters outside the version
    /// alphabet; callers record the failure per package and move on.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(VulnError::InvalidVersion(raw.to_string()));
        }

        let (epoch, rest) = match trimmed.find(':') {
            Some(idx) => {
                let epoch_str = &trimmed[..idx];
                if epoch_str.is_empty() || !epoch_str.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(VulnError::InvalidVersion(raw.to_string()));
                }
                let epoch = epoch_str
                    .parse()
                    .map_err(|_| VulnError::InvalidVersion(raw.to_string()))?;
                (epoch, &trimmed[idx + 1..])
            }
            None => (0, trimmed),
        };

        let (upstream, revision) = match rest.rfind('-') {
            Some(idx) => (&rest[..idx], &rest[idx + 1..]),
            None => (rest, ""),
        };
        if upstream.is_empty() || (rest.contains('-') && revision.is_empty()) {
            return Err(VulnError::InvalidVersion(raw.to_string()));
        }
        if !valid_part(upstream, true) || !valid_part(revision, false) {
            return Err(VulnError::InvalidVersion(raw.to_string()));
        }

        Ok(Self {
            epoch,
            upstream: upstream.to_string(),
            revision: revision.to_string(),
        })
    }
}

fn valid_part(part: &str, is_upstream: bool) -> bool {
    part.bytes().all(|b| {
        b.is_ascii_alphanumeric()
            || matches!(b, b'.' | b'+' | b'~')
            || (is_upstream && matches!(b, b'-' | b':'))
    })
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch != 0 {
            write!(f, "{}:", self.epoch)?;
        }
        f.write_str(&self.upstream)?;
        if !self.revision.is_empty() {
            write!(f, "-{}", self.revision)?;
        }
        Ok(())
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| cmp_part(&self.upstream, &other.upstream))
            .then_with(|| cmp_part(&self.revision, &other.revision))
    }
}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Equality must agree with the ordering (`1.0` == `1.00`), so it cannot be
// derived from the fields.
impl PartialEq for PackageVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PackageVersion {}

/// Compare one version part (upstream or revision) by alternating runs of
/// non-digit and digit characters.
fn cmp_part(a: &str, b: &str) -> Ordering {
    let mut a = a.as_bytes();
    let mut b = b.as_bytes();
    loop {
        let an = a.iter().position(|c| c.is_ascii_digit()).unwrap_or(a.len());
        let bn = b.iter().position(|c| c.is_ascii_digit()).unwrap_or(b.len());
        match cmp_non_digit(&a[..an], &b[..bn]) {
            Ordering::Equal => {}
            ord => return ord,
        }
        a = &a[an..];
        b = &b[bn..];

        let ad = a
            .iter()
            .position(|c| !c.is_ascii_digit())
            .unwrap_or(a.len());
        let bd = b
            .iter()
            .position(|c| !c.is_ascii_digit())
            .unwrap_or(b.len());
        match cmp_numeric(&a[..ad], &b[..bd]) {
            Ordering::Equal => {}
            ord => return ord,
        }
        a = &a[ad..];
        b = &b[bd..];

        if a.is_empty() && b.is_empty() {
            return Ordering::Equal;
        }
    }
}

/// `~` sorts before everything including the end of the part; letters sort
/// before all other characters; otherwise byte order.
fn char_weight(c: Option<u8>) -> i32 {
    match c {
        None => 0,
        Some(b'~') => -1,
        Some(c) if c.is_ascii_alphabetic() => i32::from(c),
        Some(c) => i32::from(c) + 256,
    }
}

fn cmp_non_digit(a: &[u8], b: &[u8]) -> Ordering {
    for i in 0..a.len().max(b.len()) {
        let wa = char_weight(a.get(i).copied());
        let wb = char_weight(b.get(i).copied());
        if wa != wb {
            return wa.cmp(&wb);
        }
    }
    Ordering::Equal
}

/// Numeric runs compare as integers; an absent run counts as zero. Leading
/// zeros are stripped so the lengths can be compared before the digits.
fn cmp_numeric(a: &[u8], b: &[u8]) -> Ordering {
    let a = strip_leading_zeros(a);
    let b = strip_leading_zeros(b);
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn strip_leading_zeros(run: &[u8]) -> &[u8] {
    let start = run.iter().position(|&c| c != b'0').unwrap_or(run.len());
    &run[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(raw: &str) -> PackageVersion {
        PackageVersion::parse(raw).unwrap()
    }

    #[test]
    fn parses_all_three_parts() {
        let ver = v("1:3.6.1-2");
        assert_eq!(ver.epoch, 1);
        assert_eq!(ver.upstream, "3.6.1");
        assert_eq!(ver.revision, "2");
    }

    #[test]
    fn epoch_and_revision_default() {
        let ver = v("5.10.0");
        assert_eq!(ver.epoch, 0);
        assert_eq!(ver.revision, "");
    }

    #[test]
    fn revision_splits_at_last_hyphen() {
        let ver = v("5.10.0-30-amd64");
        assert_eq!(ver.upstream, "5.10.0-30");
        assert_eq!(ver.revision, "amd64");
    }

    #[test]
    fn rejects_garbage() {
        for raw in ["", "  ", ":1.0", "abc:1.0", "1.0-", "-1", "1.0 beta", "1.0/2"] {
            assert!(
                PackageVersion::parse(raw).is_err(),
                "expected parse failure for {raw:?}"
            );
        }
    }

    #[test]
    fn epoch_dominates() {
        assert!(v("1:2.0-1") > v("2.0-1"));
        assert!(v("1:0.1") > v("999.9"));
    }

    #[test]
    fn tilde_sorts_before_everything() {
        assert!(v("1.0~rc1") < v("1.0"));
        assert!(v("1.0~rc1") < v("1.0~rc2"));
        assert!(v("1.0~~") < v("1.0~"));
        assert!(v("2.36.1-8~deb12u1") < v("2.36.1-8"));
    }

    #[test]
    fn nonempty_segment_sorts_after_empty() {
        assert!(v("1.0a") > v("1.0"));
        assert!(v("1.0-1a") > v("1.0-1"));
    }

    #[test]
    fn letters_before_other_characters() {
        assert!(v("1.0a") < v("1.0+"));
        assert!(v("1.0z") < v("1.0."));
    }

    #[test]
    fn numeric_runs_compare_as_integers() {
        assert!(v("1.9") < v("1.10"));
        assert!(v("1.09") == v("1.9"));
        assert!(v("1.2") < v("1.12"));
    }

    #[test]
    fn missing_revision_equals_zero_revision() {
        assert!(v("1.0") == v("1.0-0"));
        assert!(v("1.0") == v("1.00"));
    }

    #[test]
    fn real_world_orderings() {
        assert!(v("2.36.1-8+deb12u2") > v("2.36.1-8"));
        assert!(v("1:1.1.1-1") > v("1:1.1.0-5"));
        assert!(v("9.2p1-2") > v("9.2-4"));
    }

    #[test]
    fn ordering_is_total_and_transitive() {
        let ordered = [
            "0.9", "1.0~rc1", "1.0", "1.0a", "1.0+b1", "1.0.1", "1.1", "1.10", "1:0.1",
        ];
        for (i, a) in ordered.iter().enumerate() {
            for (j, b) in ordered.iter().enumerate() {
                let expected = i.cmp(&j);
                assert_eq!(
                    v(a).cmp(&v(b)),
                    expected,
                    "comparing {a} against {b}"
                );
            }
        }
    }

    #[test]
    fn display_round_trips() {
        for raw in ["1:3.6.1-2", "5.10.0", "2.36.1-8+deb12u2"] {
            assert_eq!(v(raw).to_string(), raw);
        }
    }
}
