//! Four-byte wire identifiers for message variants.
//!
//! Every frame carries a [`MessagePrefix`] directly after its length header.
//! Prefixes are short ASCII tags such as `b"PING"` or `b"TX\0\0"`: trailing
//! zero bytes pad shorter names to the fixed width.

use std::fmt;

use thiserror::Error;

/// Width of a message identifier on the wire.
pub const PREFIX_LEN: usize = 4;

/// Reasons a [`MessagePrefix`] fails validation.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum PrefixError {
    /// All four bytes are zero.
    #[error("message prefix is empty")]
    Empty,
    /// A non-zero byte follows a zero padding byte.
    #[error("message prefix has data after padding at byte {index}")]
    DataAfterPadding {
        /// Offset of the offending byte.
        index: usize,
    },
    /// A byte is neither an ASCII letter nor an ASCII digit.
    #[error("message prefix byte {byte:#04x} at {index} is not ASCII alphanumeric")]
    NotAlphanumeric {
        /// Offset of the offending byte.
        index: usize,
        /// The rejected byte.
        byte: u8,
    },
}

/// Identifier tagging a message variant on the wire.
///
/// Construction never validates; call [`MessagePrefix::validate`] (or let
/// [`crate::Registry::verify`] do it) before the prefix is used on a socket.
///
/// ```
/// use peerwire::MessagePrefix;
///
/// let prefix = MessagePrefix::new(*b"PING");
/// assert!(prefix.validate().is_ok());
/// assert_eq!(prefix.to_string(), "PING");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessagePrefix([u8; PREFIX_LEN]);

impl MessagePrefix {
    /// Wrap raw identifier bytes.
    #[must_use]
    pub const fn new(bytes: [u8; PREFIX_LEN]) -> Self { Self(bytes) }

    /// Build a prefix from a short name, zero-padding it to four bytes.
    ///
    /// Returns `None` when `name` is longer than [`PREFIX_LEN`] bytes.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let raw = name.as_bytes();
        if raw.len() > PREFIX_LEN {
            return None;
        }
        let mut bytes = [0u8; PREFIX_LEN];
        bytes[..raw.len()].copy_from_slice(raw);
        Some(Self(bytes))
    }

    /// Raw identifier bytes as written to the wire.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; PREFIX_LEN] { &self.0 }

    /// Check the identifier invariants.
    ///
    /// A valid prefix is not all zeroes, never has a non-zero byte after a
    /// zero byte, and only uses ASCII letters and digits otherwise.
    ///
    /// # Errors
    ///
    /// Returns the first [`PrefixError`] encountered, scanning left to right.
    pub fn validate(&self) -> Result<(), PrefixError> {
        if self.0.iter().all(|&b| b == 0) {
            return Err(PrefixError::Empty);
        }
        let mut padding = false;
        for (index, &byte) in self.0.iter().enumerate() {
            if byte == 0 {
                padding = true;
                continue;
            }
            if padding {
                return Err(PrefixError::DataAfterPadding { index });
            }
            if !byte.is_ascii_alphanumeric() {
                return Err(PrefixError::NotAlphanumeric { index, byte });
            }
        }
        Ok(())
    }
}

impl From<[u8; PREFIX_LEN]> for MessagePrefix {
    fn from(bytes: [u8; PREFIX_LEN]) -> Self { Self(bytes) }
}

impl fmt::Display for MessagePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &byte in self.0.iter().take_while(|&&b| b != 0) {
            if byte.is_ascii_graphic() {
                write!(f, "{}", char::from(byte))?;
            } else {
                write!(f, "\\x{byte:02x}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for MessagePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessagePrefix({:?})", self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{MessagePrefix, PrefixError};

    #[rstest]
    #[case::full(*b"BYTE")]
    #[case::padded(*b"TX\0\0")]
    #[case::single(*b"v\0\0\0")]
    #[case::digits(*b"B2B9")]
    fn accepts_valid_prefixes(#[case] bytes: [u8; 4]) {
        assert_eq!(MessagePrefix::new(bytes).validate(), Ok(()));
    }

    #[rstest]
    #[case::all_zero(*b"\0\0\0\0", PrefixError::Empty)]
    #[case::gap(*b"A\0B\0", PrefixError::DataAfterPadding { index: 2 })]
    #[case::leading_zero(*b"\0ABC", PrefixError::DataAfterPadding { index: 1 })]
    #[case::space(*b"A BC", PrefixError::NotAlphanumeric { index: 1, byte: b' ' })]
    #[case::punct(*b"PI-G", PrefixError::NotAlphanumeric { index: 2, byte: b'-' })]
    #[case::high_bit([b'A', 0xC3, 0xA9, 0], PrefixError::NotAlphanumeric { index: 1, byte: 0xC3 })]
    fn rejects_invalid_prefixes(#[case] bytes: [u8; 4], #[case] expected: PrefixError) {
        assert_eq!(MessagePrefix::new(bytes).validate(), Err(expected));
    }

    #[test]
    fn from_name_pads_short_names() {
        let prefix = MessagePrefix::from_name("TX").expect("short name fits");
        assert_eq!(prefix.as_bytes(), b"TX\0\0");
        assert_eq!(prefix.to_string(), "TX");
    }

    #[test]
    fn from_name_rejects_long_names() {
        assert!(MessagePrefix::from_name("BLOCK").is_none());
    }
}
