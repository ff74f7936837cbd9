//! Sentinels: fencing tokens that arbitrate who may populate a cache slot.
//!
//! A sentinel is one of three things:
//!
//! - [`Sentinel::NoLock`]: no claim is held. Populating with it is a no-op.
//! - [`Sentinel::Tombstone`]: the slot was recently deleted. Readers treat it
//!   as a dirty miss and nobody can populate over it until it expires.
//! - [`Sentinel::Token`]: a freshly minted claim by one operation. Only the
//!   holder of the exact token may write data into the slot.

use std::fmt;
use std::str::FromStr;

use tessera_core::CacheError;

const TOMBSTONE_ENCODING: &str = "tombstone";

/// Why an operation claims a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockType {
    /// Reader claiming an empty slot to populate it after a miss.
    Read,
    Create,
    Update,
    Delete,
}

impl LockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockType::Read => "read",
            LockType::Create => "create",
            LockType::Update => "update",
            LockType::Delete => "delete",
        }
    }

    pub(crate) fn as_byte(&self) -> u8 {
        match self {
            LockType::Read => 0,
            LockType::Create => 1,
            LockType::Update => 2,
            LockType::Delete => 3,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(LockType::Read),
            1 => Some(LockType::Create),
            2 => Some(LockType::Update),
            3 => Some(LockType::Delete),
            _ => None,
        }
    }

    /// True for the modes taken by operations that mutate the primary store.
    pub fn is_write(&self) -> bool {
        !matches!(self, LockType::Read)
    }
}

impl fmt::Display for LockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockType {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(LockType::Read),
            "create" => Ok(LockType::Create),
            "update" => Ok(LockType::Update),
            "delete" => Ok(LockType::Delete),
            other => Err(CacheError::InvalidSentinel {
                value: other.to_string(),
            }),
        }
    }
}

/// A random claim minted by one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SentinelToken {
    lock_type: LockType,
    nonce: [u8; 16],
}

impl SentinelToken {
    pub const ENCODED_LEN: usize = 17;

    pub fn mint(lock_type: LockType) -> Self {
        Self {
            lock_type,
            nonce: rand::random(),
        }
    }

    pub fn lock_type(&self) -> LockType {
        self.lock_type
    }

    pub(crate) fn to_bytes(self) -> [u8; Self::ENCODED_LEN] {
        let mut bytes = [0u8; Self::ENCODED_LEN];
        bytes[0] = self.lock_type.as_byte();
        bytes[1..].copy_from_slice(&self.nonce);
        bytes
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::ENCODED_LEN {
            return None;
        }
        let lock_type = LockType::from_byte(bytes[0])?;
        let mut nonce = [0u8; 16];
        nonce.copy_from_slice(&bytes[1..]);
        Some(Self { lock_type, nonce })
    }
}

/// The closed set of sentinel values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Sentinel {
    #[default]
    NoLock,
    Tombstone,
    Token(SentinelToken),
}

impl Sentinel {
    /// Returns the well-known tombstone. All tombstones are identical.
    pub fn generate_tombstone() -> Self {
        Sentinel::Tombstone
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, Sentinel::Tombstone)
    }

    pub fn is_no_lock(&self) -> bool {
        matches!(self, Sentinel::NoLock)
    }

    pub fn token(&self) -> Option<&SentinelToken> {
        match self {
            Sentinel::Token(token) => Some(token),
            _ => None,
        }
    }

    pub fn lock_type(&self) -> Option<LockType> {
        self.token().map(|t| t.lock_type())
    }

    /// Text form, for logs and string-valued backends.
    pub fn encode(&self) -> String {
        match self {
            Sentinel::NoLock => String::new(),
            Sentinel::Tombstone => TOMBSTONE_ENCODING.to_string(),
            Sentinel::Token(token) => format!("{}:{}", token.lock_type, hex::encode(token.nonce)),
        }
    }

    pub fn decode(value: &str) -> Result<Self, CacheError> {
        if value.is_empty() {
            return Ok(Sentinel::NoLock);
        }
        if value == TOMBSTONE_ENCODING {
            return Ok(Sentinel::Tombstone);
        }
        let invalid = || CacheError::InvalidSentinel {
            value: value.to_string(),
        };
        let (lock, nonce_hex) = value.split_once(':').ok_or_else(invalid)?;
        let lock_type = lock.parse::<LockType>()?;
        let nonce_bytes = hex::decode(nonce_hex).map_err(|_| invalid())?;
        let nonce: [u8; 16] = nonce_bytes.try_into().map_err(|_| invalid())?;
        Ok(Sentinel::Token(SentinelToken { lock_type, nonce }))
    }
}

impl fmt::Display for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sentinel::NoLock => f.write_str("no-lock"),
            other => f.write_str(&other.encode()),
        }
    }
}

/// Returns the well-known tombstone sentinel.
pub fn generate_tombstone_sentinel() -> Sentinel {
    Sentinel::generate_tombstone()
}

/// Compares a sentinel against the well-known tombstone.
pub fn is_tombstone_sentinel(sentinel: &Sentinel) -> bool {
    sentinel.is_tombstone()
}
