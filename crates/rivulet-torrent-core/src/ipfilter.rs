//! IP filter parsing for eMule DAT and `PeerGuardian` P2P block lists.
//!
//! # Design
//! - Lines are parsed independently; a malformed line is counted and logged, never fatal.
//! - A file is usable when at least one line was well-formed.
//! - IPv4 octets with leading zeros (`001.009.106.186`) are accepted.

use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

/// DAT access values above this are allow rules and are skipped.
const DAT_MAX_BLOCKING_ACCESS: u32 = 127;

/// Failure to produce a usable filter.
#[derive(Debug, Error)]
pub enum IpFilterError {
    /// The filter file could not be read.
    #[error("failed to read ip filter")]
    Io {
        /// File that was being read.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },
    /// The file extension is neither `.dat` nor `.p2p`.
    #[error("unsupported ip filter format")]
    UnsupportedFormat {
        /// Rejected file.
        path: PathBuf,
    },
    /// No line of the file was well-formed.
    #[error("ip filter contains no usable rules")]
    NoRules {
        /// Lines rejected as malformed.
        malformed: usize,
    },
}

/// Inclusive address range to block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRange {
    /// First blocked address.
    pub start: IpAddr,
    /// Last blocked address.
    pub end: IpAddr,
}

impl IpRange {
    /// Whether `addr` falls inside the range.
    #[must_use]
    pub fn contains(&self, addr: IpAddr) -> bool {
        match (self.start, self.end, addr) {
            (IpAddr::V4(start), IpAddr::V4(end), IpAddr::V4(addr)) => start <= addr && addr <= end,
            (IpAddr::V6(start), IpAddr::V6(end), IpAddr::V6(addr)) => start <= addr && addr <= end,
            _ => false,
        }
    }
}

/// Parsed block list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpFilter {
    rules: Vec<IpRange>,
}

enum LineOutcome {
    Blank,
    Rule(IpRange),
    Skipped,
    Malformed(&'static str),
}

impl IpFilter {
    /// Parse a filter file, choosing the format from its extension.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read, the format is unknown, or no line
    /// is well-formed.
    pub fn parse(path: &Path) -> Result<Self, IpFilterError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        let parse_line: fn(&str) -> LineOutcome = match extension.as_deref() {
            Some("dat") => parse_dat_line,
            Some("p2p") => parse_p2p_line,
            _ => {
                return Err(IpFilterError::UnsupportedFormat {
                    path: path.to_path_buf(),
                });
            }
        };
        let contents = fs::read_to_string(path).map_err(|source| IpFilterError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let filter = Self::parse_lines(&contents, parse_line)?;
        debug!(path = %path.display(), rules = filter.len(), "parsed ip filter");
        Ok(filter)
    }

    /// Parse eMule DAT content (`start - end , access , description`).
    ///
    /// # Errors
    ///
    /// Returns [`IpFilterError::NoRules`] when no line is well-formed.
    pub fn parse_dat(contents: &str) -> Result<Self, IpFilterError> {
        Self::parse_lines(contents, parse_dat_line)
    }

    /// Parse `PeerGuardian` P2P content (`description:start-end`).
    ///
    /// # Errors
    ///
    /// Returns [`IpFilterError::NoRules`] when no line is well-formed.
    pub fn parse_p2p(contents: &str) -> Result<Self, IpFilterError> {
        Self::parse_lines(contents, parse_p2p_line)
    }

    fn parse_lines(
        contents: &str,
        parse_line: fn(&str) -> LineOutcome,
    ) -> Result<Self, IpFilterError> {
        let mut rules = Vec::new();
        let mut well_formed = 0_usize;
        let mut malformed = 0_usize;
        for (index, line) in contents.lines().enumerate() {
            match parse_line(line.trim()) {
                LineOutcome::Blank => {}
                LineOutcome::Rule(range) => {
                    well_formed += 1;
                    rules.push(range);
                }
                LineOutcome::Skipped => well_formed += 1,
                LineOutcome::Malformed(reason) => {
                    malformed += 1;
                    warn!(line = index + 1, reason, "malformed ip filter line");
                }
            }
        }
        if well_formed == 0 {
            return Err(IpFilterError::NoRules { malformed });
        }
        Ok(Self { rules })
    }

    /// Blocked ranges in file order.
    #[must_use]
    pub fn rules(&self) -> &[IpRange] {
        &self.rules
    }

    /// Number of blocking rules.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the filter blocks nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether any rule covers `addr`.
    #[must_use]
    pub fn is_blocked(&self, addr: IpAddr) -> bool {
        self.rules.iter().any(|range| range.contains(addr))
    }
}

fn is_comment(line: &str) -> bool {
    line.is_empty() || line.starts_with('#') || line.starts_with("//")
}

fn parse_dat_line(line: &str) -> LineOutcome {
    if is_comment(line) {
        return LineOutcome::Blank;
    }
    let mut parts = line.split(',');
    let range = parts.next().unwrap_or_default();
    let range = match parse_range(range) {
        Ok(range) => range,
        Err(reason) => return LineOutcome::Malformed(reason),
    };
    let access = match parts.next().map(str::trim) {
        Some(value) => match value.parse::<u32>() {
            Ok(access) => access,
            Err(_) => return LineOutcome::Malformed("access value is not a number"),
        },
        None => 0,
    };
    if access > DAT_MAX_BLOCKING_ACCESS {
        return LineOutcome::Skipped;
    }
    LineOutcome::Rule(range)
}

fn parse_p2p_line(line: &str) -> LineOutcome {
    if is_comment(line) {
        return LineOutcome::Blank;
    }
    let Some((_, range)) = line.rsplit_once(':') else {
        return LineOutcome::Malformed("missing ':' separator");
    };
    match parse_range(range) {
        Ok(range) => LineOutcome::Rule(range),
        Err(reason) => LineOutcome::Malformed(reason),
    }
}

fn parse_range(range: &str) -> Result<IpRange, &'static str> {
    let mut ips = range.split('-');
    let (Some(start), Some(end), None) = (ips.next(), ips.next(), ips.next()) else {
        return Err("range is not start-end");
    };
    let start = parse_addr(start).ok_or("start address is malformed")?;
    let end = parse_addr(end).ok_or("end address is malformed")?;
    if start.is_ipv4() != end.is_ipv4() {
        return Err("range mixes IPv4 and IPv6");
    }
    Ok(IpRange { start, end })
}

fn parse_addr(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if !raw.contains(':') {
        let mut octets = [0_u8; 4];
        let mut parts = raw.split('.');
        for octet in &mut octets {
            *octet = parts.next()?.parse().ok()?;
        }
        if parts.next().is_some() {
            return None;
        }
        return Some(IpAddr::V4(Ipv4Addr::from(octets)));
    }
    raw.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn dat_lines_strip_leading_zeros_and_skip_allow_rules() {
        let filter = IpFilter::parse_dat(
            "# comment\n\
             // another\n\
             \n\
             001.009.106.186 - 001.009.106.190 , 000 , Some org\n\
             010.000.000.000 - 010.255.255.255 , 200 , Allowed\n\
             ::1 - ::ffff , 10 , v6\n\
             1.2.3.4 - ::1 , 0 , mixed\n",
        )
        .expect("filter");
        assert_eq!(filter.len(), 2);
        assert!(filter.is_blocked("1.9.106.188".parse().expect("ip")));
        assert!(!filter.is_blocked("10.1.1.1".parse().expect("ip")));
        assert!(filter.is_blocked("::2".parse().expect("ip")));
    }

    #[test]
    fn p2p_lines_allow_colons_in_description() {
        let filter = IpFilter::parse_p2p(
            "Bogon: reserved:0.0.0.0-0.255.255.255\n\
             garbage line\n\
             Other:8.8.8.8-8.8.8.9\n",
        )
        .expect("filter");
        assert_eq!(filter.len(), 2);
        assert!(filter.is_blocked("8.8.8.9".parse().expect("ip")));
    }

    #[test]
    fn files_without_any_valid_line_are_rejected() {
        let err = IpFilter::parse_p2p("nope\nstill:nope\n").expect_err("no rules");
        assert!(matches!(err, IpFilterError::NoRules { malformed: 2 }));
    }

    #[test]
    fn parse_selects_format_by_extension() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dat = dir.path().join("list.dat");
        let mut file = fs::File::create(&dat).expect("create");
        writeln!(file, "1.1.1.1 - 1.1.1.2 , 0 , x").expect("write");
        assert_eq!(IpFilter::parse(&dat).expect("filter").len(), 1);

        let txt = dir.path().join("list.txt");
        fs::write(&txt, "1.1.1.1 - 1.1.1.2").expect("write");
        assert!(matches!(
            IpFilter::parse(&txt),
            Err(IpFilterError::UnsupportedFormat { .. })
        ));
        assert!(matches!(
            IpFilter::parse(&dir.path().join("missing.p2p")),
            Err(IpFilterError::Io { .. })
        ));
    }
}
