//! Order-preserving fixed-width timestamp encoding
//!
//! A 48-bit millisecond value becomes eight symbols of six bits each, most
//! significant group first. Alphabet symbols are in ascending ASCII order, so
//! comparing two encodings as strings compares the timestamps they came from.

use std::fmt;

use crate::error::{Error, Result};

/// Number of significant bits in a timestamp
pub const TIMESTAMP_BITS: u32 = 48;

/// Mask applied to every timestamp before encoding
pub const TIMESTAMP_MASK: u64 = (1 << TIMESTAMP_BITS) - 1;

/// Length of every encoded timestamp
pub const ENCODED_LEN: usize = 8;

/// Number of symbols in an alphabet
pub const ALPHABET_LEN: usize = 64;

/// URL-safe symbols in ascending ASCII order
pub const DEFAULT_ALPHABET: &str =
    "-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

const SYMBOL_BITS: u32 = 6;
const SYMBOL_MASK: u64 = 0x3F;
const NO_ORDINAL: u8 = 0xFF;

const fn is_ascending(bytes: &[u8]) -> bool {
    let mut i = 1;
    while i < bytes.len() {
        if bytes[i - 1] >= bytes[i] {
            return false;
        }
        i += 1;
    }
    true
}

const _: () = assert!(
    DEFAULT_ALPHABET.len() == ALPHABET_LEN && is_ascending(DEFAULT_ALPHABET.as_bytes()),
    "default alphabet must hold 64 symbols in ascending order"
);

/// RFC 3986 unreserved characters
fn is_url_safe(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~')
}

/// A validated 64-symbol ordered alphabet with its reverse lookup table
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Alphabet {
    symbols: [u8; ALPHABET_LEN],
    ordinals: [u8; 128],
}

impl Alphabet {
    pub const DEFAULT: Alphabet = Alphabet::from_ordered(DEFAULT_ALPHABET.as_bytes());

    /// Validate a custom alphabet.
    ///
    /// Requires exactly 64 URL-safe symbols in strictly ascending byte order,
    /// which is what keeps string order equal to numeric order.
    pub fn new(symbols: &str) -> Result<Self> {
        let bytes = symbols.as_bytes();
        if bytes.len() != ALPHABET_LEN {
            return Err(Error::Alphabet(format!(
                "expected {} symbols, got {}",
                ALPHABET_LEN,
                bytes.len()
            )));
        }

        for (i, &b) in bytes.iter().enumerate() {
            if !is_url_safe(b) {
                return Err(Error::Alphabet(format!(
                    "symbol {:?} at position {} is not URL-safe",
                    b as char, i
                )));
            }
            if i > 0 && bytes[i - 1] >= b {
                return Err(Error::Alphabet(format!(
                    "symbol {:?} at position {} breaks ascending order",
                    b as char, i
                )));
            }
        }

        Ok(Self::from_ordered(bytes))
    }

    // Callers guarantee 64 ascending ASCII bytes.
    const fn from_ordered(bytes: &[u8]) -> Self {
        let mut symbols = [0u8; ALPHABET_LEN];
        let mut ordinals = [NO_ORDINAL; 128];
        let mut i = 0;
        while i < ALPHABET_LEN {
            symbols[i] = bytes[i];
            ordinals[bytes[i] as usize] = i as u8;
            i += 1;
        }
        Self { symbols, ordinals }
    }

    /// The alphabet as a string
    pub fn as_str(&self) -> &str {
        // Symbols are validated ASCII, so this never falls back
        std::str::from_utf8(&self.symbols).unwrap_or_default()
    }

    /// Encode the low 48 bits of `millis`. Higher bits are discarded.
    #[inline]
    pub fn encode(&self, millis: u64) -> EncodedTimestamp {
        let value = millis & TIMESTAMP_MASK;
        let mut out = [0u8; ENCODED_LEN];
        for (i, slot) in out.iter_mut().enumerate() {
            let shift = SYMBOL_BITS * (ENCODED_LEN - 1 - i) as u32;
            *slot = self.symbols[((value >> shift) & SYMBOL_MASK) as usize];
        }
        EncodedTimestamp(out)
    }

    /// Recover the timestamp behind an encoding.
    ///
    /// Returns `None` for input of the wrong length or with symbols outside
    /// this alphabet.
    pub fn decode(&self, encoded: &str) -> Option<u64> {
        let bytes = encoded.as_bytes();
        if bytes.len() != ENCODED_LEN {
            return None;
        }
        bytes.iter().try_fold(0u64, |acc, &b| {
            let ordinal = *self.ordinals.get(b as usize)?;
            if ordinal == NO_ORDINAL {
                return None;
            }
            Some((acc << SYMBOL_BITS) | u64::from(ordinal))
        })
    }
}

impl Default for Alphabet {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Debug for Alphabet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Alphabet").field(&self.as_str()).finish()
    }
}

/// Eight ASCII symbols. `Ord` matches string order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EncodedTimestamp([u8; ENCODED_LEN]);

impl EncodedTimestamp {
    #[inline]
    pub fn as_str(&self) -> &str {
        // Only ever built from alphabet symbols, which are ASCII
        std::str::from_utf8(&self.0).unwrap_or_default()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; ENCODED_LEN] {
        &self.0
    }

    /// Pack into one word for atomic storage
    #[inline]
    pub(crate) fn to_packed(self) -> u64 {
        u64::from_be_bytes(self.0)
    }

    /// Inverse of `to_packed`; only fed values that came from it
    #[inline]
    pub(crate) fn from_packed(packed: u64) -> Self {
        Self(packed.to_be_bytes())
    }
}

impl fmt::Display for EncodedTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for EncodedTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncodedTimestamp({:?})", self.as_str())
    }
}

impl AsRef<str> for EncodedTimestamp {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl PartialEq<str> for EncodedTimestamp {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for EncodedTimestamp {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl From<EncodedTimestamp> for String {
    fn from(value: EncodedTimestamp) -> Self {
        value.as_str().to_owned()
    }
}

/// Encode with the default alphabet
#[inline]
pub fn encode(millis: u64) -> EncodedTimestamp {
    Alphabet::DEFAULT.encode(millis)
}

/// Decode with the default alphabet
pub fn decode(encoded: &str) -> Option<u64> {
    Alphabet::DEFAULT.decode(encoded)
}
