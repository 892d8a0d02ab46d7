//! Codec for the kernel's hex/comma CPU affinity masks.
//!
//! Files such as `/proc/irq/default_smp_affinity` render a CPU bitmask as hex digits grouped in
//! comma-separated 32-bit chunks, most significant chunk first: `00000000,00003003` selects
//! CPUs 0, 1, 12 and 13.
//!
//! [`AffinityMask`] stores the mask as bytes in natural order, so byte `i / 8` bit `i % 8`
//! represents CPU `i`. Decoding strips commas and reverses the byte order; encoding pads to a
//! 4-byte boundary, reverses back and regroups the hex digits in chunks of eight.
//!
//! # Example
//!
//! ```rust
//! use creo_isolation::bitmask::AffinityMask;
//!
//! let mut mask = AffinityMask::decode("0000,00003003").unwrap();
//! mask.clear(0).unwrap();
//! assert_eq!(mask.encode(), "00000000,00003002");
//! ```

use std::fmt;
use std::str::FromStr;

use crate::cpuset::{self, CpuSet};

/// Number of bytes per comma-separated chunk.
const CHUNK_BYTES: usize = 4;
/// Number of hex characters per comma-separated chunk.
const CHUNK_CHARS: usize = CHUNK_BYTES * 2;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("non ascii character detected: {0}")]
    NonAscii(String),
    #[error("invalid hex mask `{mask}`: {source}")]
    InvalidHex {
        mask: String,
        #[source]
        source: hex::FromHexError,
    },
    #[error("cpu {cpu} is outside of the mask range of {width} cpus")]
    CpuOutOfRange { cpu: usize, width: usize },
    #[error(transparent)]
    CpuList(#[from] cpuset::ParseError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A CPU bitmask where byte 0 holds CPUs 0-7, with the lowest CPU in the least significant bit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AffinityMask(Vec<u8>);

impl AffinityMask {
    /// Builds the smallest mask that holds every CPU of `cpus`.
    pub fn from_cpus(cpus: &CpuSet) -> Self {
        let width = cpus.max().map_or(0, |max| max / 8 + 1);
        let mut bytes = vec![0u8; width];
        for cpu in cpus.iter() {
            bytes[cpu / 8] |= bit(cpu);
        }
        Self(bytes)
    }

    /// Decodes a hex/comma mask as written by the kernel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NonAscii`] for non-ASCII input and [`Error::InvalidHex`] if the digits
    /// are not valid hexadecimal.
    pub fn decode(s: &str) -> Result<Self> {
        if !s.is_ascii() {
            return Err(Error::NonAscii(s.to_owned()));
        }

        let mut digits: String = s.trim().chars().filter(|c| *c != ',').collect();
        if digits.len() % 2 != 0 {
            digits.insert(0, '0');
        }

        let mut bytes = hex::decode(&digits).map_err(|source| Error::InvalidHex {
            mask: s.to_owned(),
            source,
        })?;
        bytes.reverse();

        Ok(Self(bytes))
    }

    /// Encodes the mask in the kernel's format, padded to whole 32-bit chunks.
    pub fn encode(&self) -> String {
        let mut bytes = self.0.clone();
        let rem = bytes.len() % CHUNK_BYTES;
        if rem != 0 {
            bytes.resize(bytes.len() + CHUNK_BYTES - rem, 0);
        }
        bytes.reverse();

        let digits = hex::encode(bytes);
        let mut out = String::with_capacity(digits.len() + digits.len() / CHUNK_CHARS);
        for (i, chunk) in digits.as_bytes().chunks(CHUNK_CHARS).enumerate() {
            if i > 0 {
                out.push(',');
            }
            // `hex::encode` only emits ASCII.
            out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        }
        out
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Number of CPUs the mask can represent.
    pub fn width(&self) -> usize {
        self.0.len() * 8
    }

    pub fn is_set(&self, cpu: usize) -> bool {
        self.0
            .get(cpu / 8)
            .is_some_and(|byte| byte & bit(cpu) != 0)
    }

    /// Sets the bit of `cpu`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CpuOutOfRange`] if the CPU is beyond the mask width.
    pub fn set(&mut self, cpu: usize) -> Result<()> {
        let width = self.width();
        let byte = self
            .0
            .get_mut(cpu / 8)
            .ok_or(Error::CpuOutOfRange { cpu, width })?;
        *byte |= bit(cpu);
        Ok(())
    }

    /// Clears the bit of `cpu`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CpuOutOfRange`] if the CPU is beyond the mask width.
    pub fn clear(&mut self, cpu: usize) -> Result<()> {
        let width = self.width();
        let byte = self
            .0
            .get_mut(cpu / 8)
            .ok_or(Error::CpuOutOfRange { cpu, width })?;
        *byte &= !bit(cpu);
        Ok(())
    }

    /// Returns the complement of the mask over the same width.
    pub fn inverted(&self) -> Self {
        Self(self.0.iter().map(|b| !b).collect())
    }

    /// Reports whether every byte is a contiguous run of low bits, which is how the kernel's
    /// default mask looks before any CPU has been excluded.
    pub fn is_all_set(&self) -> bool {
        self.0.iter().all(|b| b & b.wrapping_add(1) == 0)
    }
}

impl FromStr for AffinityMask {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode(s)
    }
}

impl fmt::Display for AffinityMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

#[inline]
fn bit(cpu: usize) -> u8 {
    1 << (cpu % 8)
}

/// Result of [`update_irq_smp_affinity_mask`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskUpdate {
    /// The new SMP affinity mask.
    pub mask: String,
    /// The CPUs excluded from IRQ handling, as a mask of the same width.
    pub banned: String,
}

/// Enables or disables IRQ handling on `cpus` (list syntax) in the `current` affinity mask.
///
/// The banned mask is derived from the complement of `current`, so it is restricted to the CPUs
/// the affinity mask can represent. Enabling a CPU sets its affinity bit and clears its banned
/// bit; disabling does the opposite. Repeating an update yields the same result.
///
/// # Errors
///
/// Fails if the CPU list or the mask cannot be parsed, or if a CPU lies outside the mask.
///
/// # Example
///
/// ```rust
/// use creo_isolation::bitmask::update_irq_smp_affinity_mask;
///
/// let update = update_irq_smp_affinity_mask("4,5", "00000000,00003003", true).unwrap();
/// assert_eq!(update.mask, "00000000,00003033");
/// assert_eq!(update.banned, "ffffffff,ffffcfcc");
/// ```
pub fn update_irq_smp_affinity_mask(cpus: &str, current: &str, enable: bool) -> Result<MaskUpdate> {
    let cpus: CpuSet = cpus.parse()?;
    let mut mask = AffinityMask::decode(current)?;
    let mut banned = mask.inverted();

    for cpu in cpus.iter() {
        if enable {
            mask.set(cpu)?;
            banned.clear(cpu)?;
        } else {
            mask.clear(cpu)?;
            banned.set(cpu)?;
        }
    }

    Ok(MaskUpdate {
        mask: mask.encode(),
        banned: banned.encode(),
    })
}
