use std::{fmt, str::FromStr};

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

use crate::link::LinkError;

/// Digest families accepted in `<algo>=<hex>` hash specs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgo {
    Md5,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgo {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha224 => "sha224",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    #[must_use]
    pub fn hasher(self) -> Hasher {
        match self {
            Self::Md5 => Hasher::Md5(Md5::new()),
            Self::Sha224 => Hasher::Sha224(Sha224::new()),
            Self::Sha256 => Hasher::Sha256(Sha256::new()),
            Self::Sha384 => Hasher::Sha384(Sha384::new()),
            Self::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }

    #[must_use]
    pub fn digest_hex(self, content: &[u8]) -> String {
        let mut hasher = self.hasher();
        hasher.update(content);
        hasher.finalize_hex()
    }

    /// Build the hash spec for `content` under this algorithm.
    #[must_use]
    pub fn spec_for(self, content: &[u8]) -> HashSpec {
        HashSpec {
            algo: self,
            value: self.digest_hex(content),
        }
    }
}

impl fmt::Display for HashAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgo {
    type Err = LinkError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "md5" => Ok(Self::Md5),
            "sha224" => Ok(Self::Sha224),
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            other => Err(LinkError::UnknownHashAlgo(other.to_string())),
        }
    }
}

/// Digest names that pip and PyPI emit in link fragments but this store
/// cannot verify.
const UNSUPPORTED_DIGESTS: &[&str] = &[
    "sha1",
    "sha3_224",
    "sha3_256",
    "sha3_384",
    "sha3_512",
    "blake2b",
    "blake2s",
    "shake_128",
    "shake_256",
    "whirlpool",
    "ripemd160",
    "crc32",
];

/// Whether a link fragment key names a digest, supported or not.
pub(crate) fn is_digest_name(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.parse::<HashAlgo>().is_ok() || UNSUPPORTED_DIGESTS.contains(&key.as_str())
}

/// Incremental digest over one of the supported algorithms.
pub enum Hasher {
    Md5(Md5),
    Sha224(Sha224),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Hasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(inner) => inner.update(data),
            Self::Sha224(inner) => inner.update(data),
            Self::Sha256(inner) => inner.update(data),
            Self::Sha384(inner) => inner.update(data),
            Self::Sha512(inner) => inner.update(data),
        }
    }

    #[must_use]
    pub fn finalize_hex(self) -> String {
        match self {
            Self::Md5(inner) => hex::encode(inner.finalize()),
            Self::Sha224(inner) => hex::encode(inner.finalize()),
            Self::Sha256(inner) => hex::encode(inner.finalize()),
            Self::Sha384(inner) => hex::encode(inner.finalize()),
            Self::Sha512(inner) => hex::encode(inner.finalize()),
        }
    }
}

// Shorter digests cannot fill both shard directories.
const MIN_HASH_LEN: usize = 16;

/// A parsed `"<algorithm>=<lowercase-hex-digest>"` value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HashSpec {
    algo: HashAlgo,
    value: String,
}

impl HashSpec {
    #[must_use]
    pub fn algo(&self) -> HashAlgo {
        self.algo
    }

    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// The two shard directories: `value[0:3]` and `value[3:16]`.
    #[must_use]
    pub fn hashdirs(&self) -> (&str, &str) {
        (&self.value[..3], &self.value[3..MIN_HASH_LEN])
    }

    /// Whether `content` digests to this spec's value.
    #[must_use]
    pub fn matches(&self, content: &[u8]) -> bool {
        self.algo.digest_hex(content) == self.value
    }
}

impl fmt::Display for HashSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.algo, self.value)
    }
}

impl FromStr for HashSpec {
    type Err = LinkError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (algo, value) = raw
            .split_once('=')
            .ok_or_else(|| LinkError::InvalidHashSpec(raw.to_string()))?;
        let algo: HashAlgo = algo.to_ascii_lowercase().parse()?;
        let value = value.to_ascii_lowercase();
        if value.len() < MIN_HASH_LEN || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(LinkError::InvalidHashSpec(raw.to_string()));
        }
        Ok(Self { algo, value })
    }
}
