// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::cmp::Ordering;
use std::fmt;

use crate::MetadataError;

/// A full RPM "version" specifier has 3 different components - Epoch, Version, and Release.
///
/// Epoch overrides all other fields and is generally only used as a last resort - in cases where
/// a change to the versioning scheme or packaging error creates a situation where newer packages
/// might otherwise sort as being older. It is always stored as a non-negative integer without
/// leading zeros, "0" when not specified.
///
/// Version is the normal version string used by the upstream project.
///
/// Release is optional: dependency versions such as `>= 2.0` carry no release at all, and an
/// absent release sorts lower than any present one.
///
/// Tilde (~) and caret (^) are special values used in particular situations. Including ~ in
/// a version is used for denoting pre-releases and will force it to sort as less than a version
/// without a tilde, e.g. 0.5.0 vs 0.5.0~rc1. Including ^ in a version is used for denoting snapshots
/// not directly associated with an upstream release and will force it to sort higher, e.g.
/// 0.5.0 vs 0.5.0^deadbeef
#[derive(Clone, Debug)]
pub struct EVR {
    epoch: String,
    version: String,
    release: Option<String>,
}

impl EVR {
    /// Build an EVR from already-separated parts. The epoch must be numeric.
    pub fn new(
        epoch: &str,
        version: impl Into<String>,
        release: Option<impl Into<String>>,
    ) -> Result<EVR, MetadataError> {
        Ok(EVR {
            epoch: normalize_epoch(epoch)?,
            version: version.into(),
            release: release.map(Into::into),
        })
    }

    /// Build an EVR from a sequence of `[epoch, version]` or `[epoch, version, release]`.
    pub fn from_parts<S: AsRef<str>>(parts: &[S]) -> Result<EVR, MetadataError> {
        let parts: Vec<&str> = parts.iter().map(|p| p.as_ref()).collect();
        match parts.as_slice() {
            [epoch, version] => EVR::new(epoch, *version, None::<&str>),
            [epoch, version, release] => EVR::new(epoch, *version, Some(*release)),
            _ => Err(MetadataError::InvalidEvrError(
                parts.join(", "),
                "version sequence must have 2 or 3 elements".to_owned(),
            )),
        }
    }

    /// Parse an `epoch:version-release` string. Both the epoch and the release are optional.
    pub fn parse(evr: &str) -> Result<EVR, MetadataError> {
        let (epoch, vr) = match evr.split_once(':') {
            Some((epoch, vr)) => (epoch, vr),
            None => ("0", evr),
        };

        let mut parts = vec![epoch];
        parts.extend(vr.split('-'));
        EVR::from_parts(&parts).map_err(|e| match e {
            MetadataError::InvalidEvrError(_, reason) => {
                MetadataError::InvalidEvrError(evr.to_owned(), reason)
            }
            e => e,
        })
    }

    pub fn epoch(&self) -> &str {
        &self.epoch
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn release(&self) -> Option<&str> {
        self.release.as_deref()
    }

    pub fn values(&self) -> (&str, &str, Option<&str>) {
        (&self.epoch, &self.version, self.release.as_deref())
    }
}

fn normalize_epoch(epoch: &str) -> Result<String, MetadataError> {
    epoch
        .parse::<u64>()
        .map(|e| e.to_string())
        .map_err(|e| MetadataError::InvalidEvrError(epoch.to_owned(), format!("bad epoch: {}", e)))
}

impl PartialEq for EVR {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for EVR {}

impl fmt::Display for EVR {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch != "0" {
            write!(f, "{}:", self.epoch)?;
        }

        write!(f, "{}", self.version)?;

        if let Some(release) = &self.release {
            write!(f, "-{}", release)?;
        }

        Ok(())
    }
}

impl PartialOrd for EVR {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EVR {
    fn cmp(&self, other: &Self) -> Ordering {
        rpmvercmp(&self.epoch, &other.epoch)
            .then_with(|| rpmvercmp(&self.version, &other.version))
            .then_with(|| match (&self.release, &other.release) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(a), Some(b)) => rpmvercmp(a, b),
            })
    }
}

/// Compare two version segments (a single epoch, version or release string) the way `rpm` does.
///
/// Strings are split into alternating runs of digits and letters, everything else acts as a
/// separator. Numeric runs compare numerically and beat alphabetic runs. `~` sorts before
/// everything, even the end of the string; `^` sorts after the end of the string but before
/// anything else.
pub fn rpmvercmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let is_separator = |c: &u8| !c.is_ascii_alphanumeric() && *c != b'~' && *c != b'^';

    let mut one = a.as_bytes();
    let mut two = b.as_bytes();

    while !one.is_empty() || !two.is_empty() {
        one = trim_start(one, is_separator);
        two = trim_start(two, is_separator);

        match (one.first(), two.first()) {
            (Some(b'~'), Some(b'~')) => {
                one = &one[1..];
                two = &two[1..];
                continue;
            }
            (Some(b'~'), _) => return Ordering::Less,
            (_, Some(b'~')) => return Ordering::Greater,
            _ => (),
        }

        match (one.first(), two.first()) {
            (Some(b'^'), Some(b'^')) => {
                one = &one[1..];
                two = &two[1..];
                continue;
            }
            (None, Some(b'^')) => return Ordering::Less,
            (Some(b'^'), None) => return Ordering::Greater,
            (_, Some(b'^')) => return Ordering::Greater,
            (Some(b'^'), _) => return Ordering::Less,
            _ => (),
        }

        if one.is_empty() || two.is_empty() {
            break;
        }

        let numeric = one[0].is_ascii_digit();
        let run = |s: &[u8]| {
            s.iter()
                .position(|c| {
                    if numeric {
                        !c.is_ascii_digit()
                    } else {
                        !c.is_ascii_alphabetic()
                    }
                })
                .unwrap_or(s.len())
        };

        let (segment1, rest1) = one.split_at(run(one));
        let (segment2, rest2) = two.split_at(run(two));

        // the segments are of different kinds, numeric always wins
        if segment2.is_empty() {
            return if numeric {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        let ordering = if numeric {
            let segment1 = trim_start(segment1, |c| *c == b'0');
            let segment2 = trim_start(segment2, |c| *c == b'0');
            segment1
                .len()
                .cmp(&segment2.len())
                .then_with(|| segment1.cmp(segment2))
        } else {
            segment1.cmp(segment2)
        };

        if ordering != Ordering::Equal {
            return ordering;
        }

        one = rest1;
        two = rest2;
    }

    match (one.is_empty(), two.is_empty()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        _ => Ordering::Greater,
    }
}

fn trim_start(s: &[u8], pred: impl Fn(&u8) -> bool) -> &[u8] {
    let start = s.iter().position(|c| !pred(c)).unwrap_or(s.len());
    &s[start..]
}

/// Splits `libc.so.6(GLIBC_2.4)(64bit)` into `("libc.so.6", "GLIBC_2.4")`.
///
/// Only the first parenthesized group is the ABI version, a trailing `(64bit)` is ignored.
fn split_abi_version(name: &str) -> Option<(&str, &str)> {
    let mut start = 0;
    loop {
        let open = start + name[start..].find('(')?;
        if open > start {
            let close = open + 1 + name[open + 1..].find(')')?;
            return Some((&name[start..open], &name[open + 1..close]));
        }
        start = open + 1;
    }
}

/// Compare two shared library dependencies by their ABI version.
///
/// `libc.so.6 < libc.so.6(GLIBC_2.3.4)(64bit) < libc.so.6(GLIBC_2.4)`
///
/// Returns `None` when the names refer to different libraries, in which case they cannot be
/// ordered and the caller should skip the comparison.
pub fn compare_abi_versions(name1: &str, name2: &str) -> Option<Ordering> {
    if name1 == name2 {
        return Some(Ordering::Equal);
    }

    match (split_abi_version(name1), split_abi_version(name2)) {
        (None, None) => None,
        (None, Some((prefix2, _))) => (prefix2 == name1).then_some(Ordering::Less),
        (Some((prefix1, _)), None) => (prefix1 == name2).then_some(Ordering::Greater),
        (Some((prefix1, abi1)), Some((prefix2, abi2))) => {
            (prefix1 == prefix2).then(|| rpmvercmp(abi1, abi2))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn evr(s: &str) -> EVR {
        EVR::parse(s).unwrap()
    }

    #[test]
    fn test_evr_tostr() {
        assert_eq!("1.0-1", evr("1.0-1").to_string());
        assert_eq!("2:1.0-1", evr("2:1.0-1").to_string());
        assert_eq!("1.0-1", evr("0:1.0-1").to_string());
        assert_eq!("1.0", EVR::from_parts(&["0", "1.0"]).unwrap().to_string());
        assert_eq!(
            "3:1.2.3",
            EVR::new("03", "1.2.3", None::<&str>).unwrap().to_string()
        );
    }

    #[test]
    fn test_evr_parse() {
        let parsed = evr("1.2.3-45");
        assert_eq!(parsed.values(), ("0", "1.2.3", Some("45")));

        let parsed = evr("7:1.2.3");
        assert_eq!(parsed.values(), ("7", "1.2.3", None));

        let parsed = evr("");
        assert_eq!(parsed.values(), ("0", "", None));

        let parsed = evr("007:1-2");
        assert_eq!(parsed.epoch(), "7");
    }

    #[test]
    fn test_evr_parse_errors() {
        assert!(matches!(
            EVR::parse("1.0-1-2"),
            Err(MetadataError::InvalidEvrError(input, reason))
                if input == "1.0-1-2" && reason == "version sequence must have 2 or 3 elements"
        ));
        assert!(matches!(
            EVR::from_parts(&["0"]),
            Err(MetadataError::InvalidEvrError(..))
        ));
        assert!(matches!(
            EVR::from_parts(&["0", "1", "2", "3"]),
            Err(MetadataError::InvalidEvrError(..))
        ));
        assert!(matches!(
            EVR::parse("x:1.0-1"),
            Err(MetadataError::InvalidEvrError(..))
        ));
    }

    #[test]
    fn test_evr_ord() {
        assert_eq!(evr("1.2.3-45"), evr("0:1.2.3-45"));
        assert!(evr("1.2.3-45") < evr("1:1.2.3-45"));
        assert!(evr("4.2.3-45") < evr("1:1.2.3-45"));
        assert!(evr("1.2.3-45") < evr("1.2.4-45"));
        assert!(evr("1.23.3-45") > evr("1.2.3-45"));
        assert!(evr("1.2.3-3") < evr("1.2.3-10"));
        assert!(evr("1.0~rc1-1") < evr("1.0-1"));

        // an absent release is the lowest possible release
        assert!(evr("1.0") < evr("1.0-0"));
        assert!(evr("1.0") < evr("1.0-"));
        assert_eq!(evr("1.0"), evr("0:1.0"));
    }

    #[test]
    fn test_evr_ordering_is_total() {
        let versions: Vec<EVR> = [
            "1.0", "1.0-1", "1.0-2", "1:0.1-1", "1.0~rc1-1", "1.0^git1-1", "1.0a-1", "1.0.1-1",
            "2.0-1", "10.0-1", "1.0-1.el8", "1.0-1.fc33", "0.9-99",
        ]
        .iter()
        .map(|s| evr(s))
        .collect();

        for a in &versions {
            for b in &versions {
                assert_eq!(a.cmp(b), b.cmp(a).reverse(), "{} vs {}", a, b);
                for c in &versions {
                    if a <= b && b <= c {
                        assert!(a <= c, "{} <= {} <= {}", a, b, c);
                    }
                }
            }
        }
    }

    #[test]
    fn test_rpmvercmp() {
        // pedestrian cases
        assert_eq!(Ordering::Less, rpmvercmp("1.0", "2.0"));
        assert_eq!(Ordering::Greater, rpmvercmp("2.0", "1.0"));
        assert_eq!(Ordering::Equal, rpmvercmp("1.0", "1.0"));
        assert_eq!(Ordering::Less, rpmvercmp("2.0", "2.0.1"));
        assert_eq!(Ordering::Greater, rpmvercmp("3.0.1a", "3.0.1"));
        assert_eq!(Ordering::Less, rpmvercmp("4.999.9", "5.0"));
        assert_eq!(Ordering::Equal, rpmvercmp("1.001", "1.1"));

        // separators are all equivalent
        assert_eq!(Ordering::Equal, rpmvercmp("4_0", "4.0"));
        assert_eq!(Ordering::Equal, rpmvercmp("1.0.", "1.0"));

        // numeric segments are newer than alphabetic ones
        assert_eq!(Ordering::Greater, rpmvercmp("1.1", "1.a"));
        assert_eq!(Ordering::Less, rpmvercmp("1.a", "1.1"));

        // tilde and caret
        assert_eq!(Ordering::Less, rpmvercmp("1.0~rc1", "1.0"));
        assert_eq!(Ordering::Less, rpmvercmp("1.0~rc1", "1.0~rc2"));
        assert_eq!(Ordering::Greater, rpmvercmp("1.0^", "1.0"));
        assert_eq!(Ordering::Less, rpmvercmp("1.0", "1.0git1^"));
        assert_eq!(Ordering::Less, rpmvercmp("1.0^git1", "1.0^git2"));
        assert_eq!(Ordering::Greater, rpmvercmp("1.01", "1.0^git1"));
        assert_eq!(Ordering::Less, rpmvercmp("1.0^20210501", "1.0.1"));
        assert_eq!(Ordering::Greater, rpmvercmp("1.0~rc1^git1", "1.0~rc1"));
        assert_eq!(Ordering::Greater, rpmvercmp("1.0^git1", "1.0^git1~pre"));

        // non-intuitive behavior
        assert_eq!(Ordering::Less, rpmvercmp("1e.fc33", "1.fc33"));
        assert_eq!(Ordering::Greater, rpmvercmp("1g.fc33", "1.fc33"));

        // non-ascii characters compare as separators
        assert_eq!(Ordering::Equal, rpmvercmp("1.1.α", "1.1.β"));

        assert_eq!(Ordering::Less, rpmvercmp("", "GLIBC_2.4"));
    }

    #[test]
    fn test_compare_abi_versions() {
        assert_eq!(
            compare_abi_versions("libc.so.6()(64bit)", "libc.so.6()(64bit)"),
            Some(Ordering::Equal)
        );
        assert_eq!(
            compare_abi_versions("libc.so.6(GLIBC_2.3.4)", "libc.so.6(GLIBC_2.4)"),
            Some(Ordering::Less)
        );
        assert_eq!(
            compare_abi_versions("libc.so.6(GLIBC_2.4)(64bit)", "libc.so.6(GLIBC_2.3.4)(64bit)"),
            Some(Ordering::Greater)
        );
        assert_eq!(
            compare_abi_versions("libc.so.6()(64bit)", "libc.so.6(GLIBC_2.3.4)(64bit)"),
            Some(Ordering::Less)
        );
        assert_eq!(compare_abi_versions("libfoo.so.1(X)", "libbar.so.1(X)"), None);
    }

    #[test]
    fn test_compare_abi_versions_unversioned() {
        assert_eq!(
            compare_abi_versions("libc.so.6", "libc.so.6(GLIBC_2.4)"),
            Some(Ordering::Less)
        );
        assert_eq!(
            compare_abi_versions("libc.so.6(GLIBC_2.4)", "libc.so.6"),
            Some(Ordering::Greater)
        );
        assert_eq!(compare_abi_versions("libm.so.6", "libc.so.6(GLIBC_2.4)"), None);
        assert_eq!(compare_abi_versions("libc.so.6", "libm.so.6"), None);
    }

    #[test]
    fn test_split_abi_version() {
        assert_eq!(
            split_abi_version("libc.so.6(GLIBC_2.4)(64bit)"),
            Some(("libc.so.6", "GLIBC_2.4"))
        );
        assert_eq!(split_abi_version("libc.so.6()"), Some(("libc.so.6", "")));
        assert_eq!(split_abi_version("libc.so.6"), None);
        assert_eq!(split_abi_version("libc.so.6(GLIBC"), None);
    }
}
