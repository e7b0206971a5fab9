// Key management and addresses

use crate::core::{PubKeyHash, hash160, hash256};
use crate::error::{ChainError, Result};
use rand::rngs::OsRng;
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Version byte prefixed to every address payload
pub const ADDRESS_VERSION: u8 = 0x00;

const CHECKSUM_LEN: usize = 4;

/// Base58Check address: version byte, public key hash, 4-byte checksum
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    /// Encode a public key hash
    pub fn from_pub_key_hash(hash: &PubKeyHash) -> Self {
        let mut payload = Vec::with_capacity(1 + hash.len() + CHECKSUM_LEN);
        payload.push(ADDRESS_VERSION);
        payload.extend_from_slice(hash);
        let checksum = hash256(&payload);
        payload.extend_from_slice(&checksum.as_bytes()[..CHECKSUM_LEN]);

        Self(bs58::encode(payload).into_string())
    }

    /// Parse and validate an address string
    pub fn parse(s: &str) -> Result<Self> {
        let address = Self(s.to_string());
        address.to_pub_key_hash()?;
        Ok(address)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recover the embedded public key hash, checking length, version and checksum
    pub fn to_pub_key_hash(&self) -> Result<PubKeyHash> {
        let bytes = bs58::decode(&self.0)
            .into_vec()
            .map_err(|e| ChainError::InvalidAddress(format!("{}: {}", self.0, e)))?;

        if bytes.len() != 1 + 20 + CHECKSUM_LEN {
            return Err(ChainError::InvalidAddress(format!("{}: wrong length", self.0)));
        }
        if bytes[0] != ADDRESS_VERSION {
            return Err(ChainError::InvalidAddress(format!("{}: unknown version {}", self.0, bytes[0])));
        }

        let (payload, checksum) = bytes.split_at(1 + 20);
        if hash256(payload).as_bytes()[..CHECKSUM_LEN] != *checksum {
            return Err(ChainError::InvalidAddress(format!("{}: bad checksum", self.0)));
        }

        let mut hash = [0u8; 20];
        hash.copy_from_slice(&payload[1..]);
        Ok(hash)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Address {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Key pair
#[derive(Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
    pub address: Address,
}

impl KeyPair {
    /// Generate a new key pair
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::new(&mut OsRng);
        Self::from_secret_key(&secp, secret_key)
    }

    /// Create from secret key bytes
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::from_slice(bytes)?;
        Ok(Self::from_secret_key(&secp, secret_key))
    }

    fn from_secret_key<C: secp256k1::Signing>(secp: &Secp256k1<C>, secret_key: SecretKey) -> Self {
        let public_key = secret_key.public_key(secp);
        let address = Address::from_pub_key_hash(&hash160(&public_key.serialize()));

        Self {
            secret_key,
            public_key,
            address,
        }
    }

    /// Compressed public key bytes
    pub fn pub_key_bytes(&self) -> Vec<u8> {
        self.public_key.serialize().to_vec()
    }

    pub fn pub_key_hash(&self) -> PubKeyHash {
        hash160(&self.public_key.serialize())
    }
}

/// On-disk form of one key
#[derive(Serialize, Deserialize)]
struct StoredKey {
    address: Address,
    secret_key: String,
}

/// Keystore - manages multiple key pairs
#[derive(Clone, Default)]
pub struct Keystore {
    keys: BTreeMap<Address, KeyPair>,
}

impl Keystore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a new address
    pub fn new_address(&mut self) -> Address {
        let keypair = KeyPair::generate();
        let address = keypair.address.clone();
        self.keys.insert(address.clone(), keypair);
        address
    }

    /// Get key pair for address
    pub fn get_keypair(&self, address: &Address) -> Option<&KeyPair> {
        self.keys.get(address)
    }

    /// Get all addresses
    pub fn list_addresses(&self) -> Vec<Address> {
        self.keys.keys().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.keys.len()
    }

    /// Save keystore to file as JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let stored: Vec<StoredKey> = self
            .keys
            .values()
            .map(|kp| StoredKey {
                address: kp.address.clone(),
                secret_key: hex::encode(kp.secret_key.secret_bytes()),
            })
            .collect();

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&stored)?)?;
        Ok(())
    }

    /// Load keystore from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let stored: Vec<StoredKey> = serde_json::from_str(&json)?;

        let mut keys = BTreeMap::new();
        for key in stored {
            let bytes: [u8; 32] = hex::decode(&key.secret_key)
                .ok()
                .and_then(|bytes| bytes.try_into().ok())
                .ok_or_else(|| ChainError::Wallet(format!("Malformed secret key for {}", key.address)))?;

            let keypair = KeyPair::from_secret_bytes(&bytes)?;
            if keypair.address != key.address {
                return Err(ChainError::Wallet(format!("Secret key does not match {}", key.address)));
            }
            keys.insert(keypair.address.clone(), keypair);
        }

        Ok(Self { keys })
    }

    /// Load the keystore at `path`, or start an empty one if the file does not exist yet
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }
}
