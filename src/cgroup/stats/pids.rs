use std::io::BufRead;

use super::SingleLineStat;
use super::parser::{read_limit_line, read_u64_line};

/// Number of tasks from `pids.current`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PidsCurrent {
    pub current: u64,
}

impl SingleLineStat for PidsCurrent {
    fn from_reader<R: BufRead>(buf: &mut R) -> std::io::Result<Self> {
        Ok(PidsCurrent {
            current: read_u64_line(buf)?,
        })
    }
}

/// Task limit from `pids.max`. `None` means no limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PidsLimit {
    pub limit: Option<u64>,
}

impl SingleLineStat for PidsLimit {
    fn from_reader<R: BufRead>(buf: &mut R) -> std::io::Result<Self> {
        Ok(PidsLimit {
            limit: read_limit_line(buf)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pids() {
        let current = PidsCurrent::from_reader(&mut "17\n".as_bytes()).unwrap();
        assert_eq!(current.current, 17);

        let limit = PidsLimit::from_reader(&mut "max\n".as_bytes()).unwrap();
        assert_eq!(limit.limit, None);
        let limit = PidsLimit::from_reader(&mut "4096\n".as_bytes()).unwrap();
        assert_eq!(limit.limit, Some(4096));
    }

    #[test]
    fn test_parse_invalid_pids_current() {
        let err = PidsCurrent::from_reader(&mut "".as_bytes()).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
