//! Message digests and their canonical string form.
//!
//! A digest value is rendered as a positive big-endian integer in lowercase
//! hexadecimal notation. Leading zero nibbles are not part of that notation,
//! so a digest starting with `0x0f` renders as `f...`. Delta archives in the
//! wild carry values in this form, so it must not be padded.

use std::fmt;
use std::io::{self, Read, Write};

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::error::{DeltaError, Result};

/// Chunk size used when streaming content through a digest.
pub const BUFFER_SIZE: usize = 8 * 1024;

/// Longest digest an extendable-output algorithm may be asked for, in bytes.
pub const MAX_EXTENDED_LENGTH: usize = 64;

/// Digest algorithms known to this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Algorithm {
    Md5,
    #[default]
    Sha1,
    Sha256,
    Sha384,
    Sha512,
    Blake3,
}

impl Algorithm {
    pub const ALL: [Algorithm; 6] = [
        Algorithm::Md5,
        Algorithm::Sha1,
        Algorithm::Sha256,
        Algorithm::Sha384,
        Algorithm::Sha512,
        Algorithm::Blake3,
    ];

    /// The canonical name stored in delta models.
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Md5 => "MD5",
            Algorithm::Sha1 => "SHA-1",
            Algorithm::Sha256 => "SHA-256",
            Algorithm::Sha384 => "SHA-384",
            Algorithm::Sha512 => "SHA-512",
            Algorithm::Blake3 => "BLAKE3",
        }
    }

    /// Looks up an algorithm by name, ignoring ASCII case.
    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|a| a.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| DeltaError::UnsupportedAlgorithm(name.to_string()))
    }

    /// Digest length in bytes when no explicit length is requested.
    pub fn default_length(self) -> usize {
        match self {
            Algorithm::Md5 => 16,
            Algorithm::Sha1 => 20,
            Algorithm::Sha256 => 32,
            Algorithm::Sha384 => 48,
            Algorithm::Sha512 => 64,
            Algorithm::Blake3 => blake3::OUT_LEN,
        }
    }

    /// Extendable-output algorithms can produce digests of any length.
    pub fn is_extendable(self) -> bool {
        matches!(self, Algorithm::Blake3)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone)]
enum State {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
    Blake3(Box<blake3::Hasher>),
}

impl State {
    fn new(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Md5 => State::Md5(Md5::new()),
            Algorithm::Sha1 => State::Sha1(Sha1::new()),
            Algorithm::Sha256 => State::Sha256(Sha256::new()),
            Algorithm::Sha384 => State::Sha384(Sha384::new()),
            Algorithm::Sha512 => State::Sha512(Sha512::new()),
            Algorithm::Blake3 => State::Blake3(Box::new(blake3::Hasher::new())),
        }
    }
}

/// A reusable digest instance.
///
/// Every operation takes `&mut self`; an instance must not be shared between
/// concurrent computations. Clone it instead.
#[derive(Clone)]
pub struct MessageDigest {
    algorithm: Algorithm,
    length: usize,
    state: State,
}

impl MessageDigest {
    /// Creates a digest of the algorithm's default length.
    pub fn new(algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            length: algorithm.default_length(),
            state: State::new(algorithm),
        }
    }

    /// The default digest for diffing: SHA-1.
    pub fn sha1() -> Self {
        Self::new(Algorithm::Sha1)
    }

    /// Creates a digest producing `length` bytes.
    ///
    /// Only extendable-output algorithms accept a non-default length, up to
    /// [`MAX_EXTENDED_LENGTH`].
    pub fn with_length(algorithm: Algorithm, length: usize) -> Result<Self> {
        let extended = algorithm.is_extendable() && (1..=MAX_EXTENDED_LENGTH).contains(&length);
        if length == algorithm.default_length() || extended {
            Ok(Self {
                algorithm,
                length,
                state: State::new(algorithm),
            })
        } else {
            Err(DeltaError::UnsupportedDigestLength {
                algorithm: algorithm.name().to_string(),
                length,
            })
        }
    }

    /// Reconstructs a digest from a stored algorithm name and optional length.
    pub fn for_name(name: &str, length: Option<usize>) -> Result<Self> {
        let algorithm = Algorithm::from_name(name)?;
        match length {
            Some(length) => Self::with_length(algorithm, length),
            None => Ok(Self::new(algorithm)),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Digest length in bytes.
    pub fn digest_length(&self) -> usize {
        self.length
    }

    pub fn has_default_length(&self) -> bool {
        self.length == self.algorithm.default_length()
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            State::Md5(h) => Digest::update(h, data),
            State::Sha1(h) => Digest::update(h, data),
            State::Sha256(h) => Digest::update(h, data),
            State::Sha384(h) => Digest::update(h, data),
            State::Sha512(h) => Digest::update(h, data),
            State::Blake3(h) => {
                h.update(data);
            }
        }
    }

    pub fn reset(&mut self) {
        match &mut self.state {
            State::Md5(h) => Digest::reset(h),
            State::Sha1(h) => Digest::reset(h),
            State::Sha256(h) => Digest::reset(h),
            State::Sha384(h) => Digest::reset(h),
            State::Sha512(h) => Digest::reset(h),
            State::Blake3(h) => {
                h.reset();
            }
        }
    }

    /// Returns the raw digest bytes and resets the instance.
    pub fn finalize_reset(&mut self) -> Vec<u8> {
        match &mut self.state {
            State::Md5(h) => h.finalize_reset().to_vec(),
            State::Sha1(h) => h.finalize_reset().to_vec(),
            State::Sha256(h) => h.finalize_reset().to_vec(),
            State::Sha384(h) => h.finalize_reset().to_vec(),
            State::Sha512(h) => h.finalize_reset().to_vec(),
            State::Blake3(h) => {
                let mut out = vec![0u8; self.length];
                h.finalize_xof().fill(&mut out);
                h.reset();
                out
            }
        }
    }

    /// Returns the canonical digest value and resets the instance.
    pub fn finalize_value(&mut self) -> String {
        canonical_hex(&self.finalize_reset())
    }
}

impl Default for MessageDigest {
    fn default() -> Self {
        Self::sha1()
    }
}

impl fmt::Debug for MessageDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageDigest")
            .field("algorithm", &self.algorithm)
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

impl Write for MessageDigest {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Renders digest bytes as an unsigned big-endian integer in lowercase hex.
pub fn canonical_hex(bytes: &[u8]) -> String {
    let encoded = hex::encode(bytes);
    let trimmed = encoded.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Streams `reader` through a freshly reset `digest` and returns the
/// canonical digest value. Read failures propagate unchanged.
pub fn digest_value_of<R: Read>(digest: &mut MessageDigest, mut reader: R) -> io::Result<String> {
    digest.reset();
    let mut buffer = [0u8; BUFFER_SIZE];
    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        digest.update(&buffer[..n]);
    }
    Ok(digest.finalize_value())
}
