//! CPU list parsing and formatting in the kernel's `cpuset` list syntax.
//!
//! The list syntax is a comma-separated sequence of single CPU ids and inclusive ranges,
//! e.g. `0-3,8,10-11`, as found in `cpuset.cpus` or `/sys/devices/system/cpu/online`.
//!
//! # Example
//!
//! ```rust
//! use creo_isolation::cpuset::CpuSet;
//!
//! let cpus: CpuSet = "0-2,7".parse().unwrap();
//! assert_eq!(cpus.iter().collect::<Vec<_>>(), vec![0, 1, 2, 7]);
//! assert_eq!(cpus.to_string(), "0-2,7");
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Errors that can occur when parsing a CPU list.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid cpu id `{token}` in cpu list `{list}`")]
    InvalidCpu { token: String, list: String },
    #[error("invalid cpu range `{token}` in cpu list `{list}`: start is greater than end")]
    InvalidRange { token: String, list: String },
}

/// An ordered set of CPU ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CpuSet(BTreeSet<usize>);

impl CpuSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, cpu: usize) -> bool {
        self.0.insert(cpu)
    }

    pub fn contains(&self, cpu: usize) -> bool {
        self.0.contains(&cpu)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates the CPU ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }

    /// Returns the highest CPU id in the set.
    pub fn max(&self) -> Option<usize> {
        self.0.last().copied()
    }
}

impl FromIterator<usize> for CpuSet {
    fn from_iter<T: IntoIterator<Item = usize>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl FromStr for CpuSet {
    type Err = ParseError;

    /// Parses a CPU list. Surrounding whitespace is ignored and an empty list yields an empty set.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let list = s.trim();
        let mut set = BTreeSet::new();
        if list.is_empty() {
            return Ok(Self(set));
        }

        let parse_cpu = |token: &str, part: &str| {
            part.trim()
                .parse::<usize>()
                .map_err(|_| ParseError::InvalidCpu {
                    token: token.to_owned(),
                    list: list.to_owned(),
                })
        };

        for token in list.split(',') {
            match token.split_once('-') {
                Some((start, end)) => {
                    let start = parse_cpu(token, start)?;
                    let end = parse_cpu(token, end)?;
                    if start > end {
                        return Err(ParseError::InvalidRange {
                            token: token.to_owned(),
                            list: list.to_owned(),
                        });
                    }
                    set.extend(start..=end);
                }
                None => {
                    set.insert(parse_cpu(token, token)?);
                }
            }
        }

        Ok(Self(set))
    }
}

impl fmt::Display for CpuSet {
    /// Formats the set in canonical list syntax, collapsing consecutive ids into ranges.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut iter = self.0.iter().copied().peekable();
        let mut first = true;
        while let Some(start) = iter.next() {
            let mut end = start;
            while iter.peek() == Some(&(end + 1)) {
                end += 1;
                iter.next();
            }
            if !first {
                f.write_str(",")?;
            }
            first = false;
            if start == end {
                write!(f, "{start}")?;
            } else {
                write!(f, "{start}-{end}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_list() {
        let set: CpuSet = "".parse().unwrap();
        assert!(set.is_empty());
        let set: CpuSet = " \n".parse().unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_parse_singles_and_ranges() {
        let set: CpuSet = "0-3,5,7-8\n".parse().unwrap();
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 1, 2, 3, 5, 7, 8]);
        assert_eq!(set.max(), Some(8));
        assert_eq!(set.len(), 7);
    }

    #[test]
    fn test_parse_overlapping_ranges() {
        let set: CpuSet = "1-4,2-3,4".parse().unwrap();
        assert_eq!(set.to_string(), "1-4");
    }

    #[test]
    fn test_parse_invalid_cpu() {
        let err = "0,x".parse::<CpuSet>().unwrap_err();
        match err {
            ParseError::InvalidCpu { token, .. } => assert_eq!(token, "x"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_reversed_range() {
        let err = "4-2".parse::<CpuSet>().unwrap_err();
        assert!(matches!(err, ParseError::InvalidRange { .. }));
    }

    #[test]
    fn test_display_collapses_ranges() {
        let set: CpuSet = [0, 1, 2, 4, 6, 7].into_iter().collect();
        assert_eq!(set.to_string(), "0-2,4,6-7");
        assert_eq!(CpuSet::new().to_string(), "");
    }
}
