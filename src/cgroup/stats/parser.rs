//! Generic parsers for cgroup statistics files.
//!
//! - [`KeyValueStat`] reads multi-line `key value` files such as `memory.stat`, `cpu.stat` and
//!   `cpuacct.stat`. Implementors only list their keys and setters.
//! - [`SingleLineStat`] reads files holding one value, such as `memory.current`,
//!   `pids.max` or `cpuacct.usage_percpu`.
//!
//! # Example: Implementing `KeyValueStat`
//!
//! ```rust
//! use std::collections::HashMap;
//! use std::sync::LazyLock;
//! use creo_isolation::cgroup::stats::KeyValueStat;
//!
//! #[derive(Default)]
//! struct Throttling {
//!     nr_periods: u64,
//!     nr_throttled: u64,
//! }
//!
//! static HANDLERS: LazyLock<HashMap<&'static str, fn(&mut Throttling, u64)>> =
//!     LazyLock::new(|| {
//!         let mut map: HashMap<&'static str, fn(&mut Throttling, u64)> = HashMap::new();
//!         map.insert("nr_periods", |s, v| s.nr_periods = v);
//!         map.insert("nr_throttled", |s, v| s.nr_throttled = v);
//!         map
//!     });
//!
//! impl KeyValueStat for Throttling {
//!     const SPLIT_CHAR: Option<char> = None;
//!     const SKIP_LINES: usize = 0;
//!     const SKIP_VALUES: usize = 0;
//!     const ALLOW_DUPLICATE_KEYS: bool = false;
//!     const ALLOW_MULTIPLE_KV_PER_LINE: bool = false;
//!
//!     fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)> {
//!         &HANDLERS
//!     }
//! }
//!
//! let stat = Throttling::from_reader(&mut "nr_periods 10\nnr_throttled 2\n".as_bytes()).unwrap();
//! assert_eq!(stat.nr_throttled, 2);
//! ```

use std::collections::{HashMap, HashSet};
use std::io::BufRead;

use super::StatParseError;

/// A multi-line key-value statistics file.
///
/// Unknown keys are ignored unless [`KeyValueStat::on_unknown_key`] says otherwise. Once every
/// known key has been seen and duplicates are disallowed, parsing stops early.
pub trait KeyValueStat: Default
where
    Self: 'static,
{
    /// Separator inside a `key<sep>value` token, or `None` for whitespace-separated pairs.
    const SPLIT_CHAR: Option<char>;

    /// Lines to skip at the start of the file.
    const SKIP_LINES: usize;

    /// Whitespace-separated tokens to skip at the start of each line.
    const SKIP_VALUES: usize;

    /// Whether a key may appear more than once.
    const ALLOW_DUPLICATE_KEYS: bool;

    /// Whether a line may hold more than one pair.
    const ALLOW_MULTIPLE_KV_PER_LINE: bool;

    /// Known keys and the setters applying their parsed values.
    fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)>;

    /// Parses the whole reader.
    ///
    /// # Errors
    ///
    /// Returns an `io::Error` if reading fails, or one of kind `InvalidData` wrapping a
    /// [`StatParseError`] if a value does not parse or a key repeats.
    fn from_reader<R: BufRead>(buf: &mut R) -> std::io::Result<Self> {
        let mut stat = Self::default();
        let handlers = Self::field_handlers();
        let field_count = handlers.len();
        let mut seen_keys = HashSet::with_capacity(field_count);

        let mut line = String::new();
        let mut lineno = 0;
        for _ in 0..Self::SKIP_LINES {
            buf.read_line(&mut line)?;
            line.clear();
        }

        while buf.read_line(&mut line)? != 0 {
            lineno += 1;
            Self::parse_line(&mut stat, &line, lineno, handlers, &mut seen_keys)?;
            if !Self::ALLOW_DUPLICATE_KEYS && seen_keys.len() == field_count {
                break;
            }

            line.clear();
        }

        Ok(stat)
    }

    /// Parses one line according to the trait configuration.
    fn parse_line(
        stat: &mut Self,
        line: &str,
        lineno: usize,
        handlers: &HashMap<&'static str, fn(&mut Self, u64)>,
        seen_keys: &mut HashSet<&'static str>,
    ) -> std::io::Result<()> {
        let mut parts = line.split_whitespace().skip(Self::SKIP_VALUES);

        match Self::SPLIT_CHAR {
            Some(split_char) => {
                for part in parts {
                    if let Some((key, val)) = part.split_once(split_char) {
                        Self::parse_and_set(key, val, stat, lineno, handlers, seen_keys)?;
                    }
                    if !Self::ALLOW_MULTIPLE_KV_PER_LINE {
                        break;
                    }
                }
            }
            None => {
                while let (Some(key), Some(val)) = (parts.next(), parts.next()) {
                    Self::parse_and_set(key, val, stat, lineno, handlers, seen_keys)?;
                    if !Self::ALLOW_MULTIPLE_KV_PER_LINE {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Parses `val` and hands it to the setter registered for `key`.
    fn parse_and_set(
        key: &str,
        val: &str,
        stat: &mut Self,
        lineno: usize,
        handlers: &HashMap<&'static str, fn(&mut Self, u64)>,
        seen_keys: &mut HashSet<&'static str>,
    ) -> std::io::Result<()> {
        let Some((k, handler)) = handlers.get_key_value(key) else {
            return Self::on_unknown_key(key, val, lineno);
        };

        let parsed = val
            .parse::<u64>()
            .map_err(|source| StatParseError::InvalidKeyValue {
                key: key.to_string(),
                value: val.to_string(),
                line: lineno,
                source,
            })?;
        if !Self::ALLOW_DUPLICATE_KEYS && !seen_keys.insert(k) {
            return Err(StatParseError::DuplicateField {
                field: key.to_string(),
                line: lineno,
            }
            .into());
        }
        handler(stat, parsed);
        Ok(())
    }

    /// Called for keys without a handler. Ignores them by default.
    #[inline]
    fn on_unknown_key(_key: &str, _val: &str, _lineno: usize) -> std::io::Result<()> {
        Ok(())
    }
}

/// A statistics file holding a single value.
pub trait SingleLineStat: Sized + Default {
    /// Parses the value from `buf`.
    ///
    /// # Errors
    ///
    /// Returns an `io::Error` if reading or parsing fails.
    fn from_reader<R: BufRead>(buf: &mut R) -> std::io::Result<Self>;
}

/// Reads the first line of `buf` and parses it as a `u64`.
pub(super) fn read_u64_line<R: BufRead>(buf: &mut R) -> std::io::Result<u64> {
    let mut line = String::new();
    buf.read_line(&mut line)?;
    let value = line.trim();
    value.parse::<u64>().map_err(|source| {
        StatParseError::InvalidValue {
            value: value.to_string(),
            line: 1,
            source,
        }
        .into()
    })
}

/// Reads the first line of `buf` as a limit, where `max` means unlimited.
pub(super) fn read_limit_line<R: BufRead>(buf: &mut R) -> std::io::Result<Option<u64>> {
    let mut line = String::new();
    buf.read_line(&mut line)?;
    match line.trim() {
        "max" => Ok(None),
        value => value.parse::<u64>().map(Some).map_err(|source| {
            StatParseError::InvalidValue {
                value: value.to_string(),
                line: 1,
                source,
            }
            .into()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgroup::stats::error::extract_stat_parse_error;
    use std::sync::LazyLock;

    #[derive(Debug, Default)]
    struct Pairs {
        a: u64,
        b: u64,
    }

    static PAIR_HANDLERS: LazyLock<HashMap<&'static str, fn(&mut Pairs, u64)>> =
        LazyLock::new(|| {
            let mut map: HashMap<&'static str, fn(&mut Pairs, u64)> = HashMap::new();
            map.insert("a", |s, v| s.a = v);
            map.insert("b", |s, v| s.b += v);
            map
        });

    #[derive(Debug, Default)]
    struct EqualsPairs(Pairs);

    impl KeyValueStat for Pairs {
        const SPLIT_CHAR: Option<char> = None;
        const SKIP_LINES: usize = 1;
        const SKIP_VALUES: usize = 1;
        const ALLOW_DUPLICATE_KEYS: bool = true;
        const ALLOW_MULTIPLE_KV_PER_LINE: bool = true;

        fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)> {
            &PAIR_HANDLERS
        }
    }

    static EQUALS_HANDLERS: LazyLock<HashMap<&'static str, fn(&mut EqualsPairs, u64)>> =
        LazyLock::new(|| {
            let mut map: HashMap<&'static str, fn(&mut EqualsPairs, u64)> = HashMap::new();
            map.insert("a", |s, v| s.0.a = v);
            map.insert("b", |s, v| s.0.b = v);
            map
        });

    impl KeyValueStat for EqualsPairs {
        const SPLIT_CHAR: Option<char> = Some('=');
        const SKIP_LINES: usize = 0;
        const SKIP_VALUES: usize = 0;
        const ALLOW_DUPLICATE_KEYS: bool = false;
        const ALLOW_MULTIPLE_KV_PER_LINE: bool = true;

        fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)> {
            &EQUALS_HANDLERS
        }
    }

    #[test]
    fn test_skip_lines_and_values_with_duplicates() {
        let data = "header\nlabel a 1 b 2\nlabel b 3\n";
        let stat = Pairs::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(stat.a, 1);
        assert_eq!(stat.b, 5);
    }

    #[test]
    fn test_split_char_pairs() {
        let data = "a=7 b=9 c=11\n";
        let stat = EqualsPairs::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(stat.0.a, 7);
        assert_eq!(stat.0.b, 9);
    }

    #[test]
    fn test_split_char_duplicate_rejected() {
        let data = "a=7\na=8\n";
        let err = EqualsPairs::from_reader(&mut data.as_bytes()).unwrap_err();
        match extract_stat_parse_error(&err) {
            StatParseError::DuplicateField { field, line } => {
                assert_eq!(field, "a");
                assert_eq!(*line, 2);
            }
            other => panic!("Expected DuplicateField error, got {other}"),
        }
    }

    #[test]
    fn test_read_limit_line() {
        assert_eq!(read_limit_line(&mut "max\n".as_bytes()).unwrap(), None);
        assert_eq!(read_limit_line(&mut "42\n".as_bytes()).unwrap(), Some(42));
        let err = read_limit_line(&mut "-1\n".as_bytes()).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
