// Transaction data structures, signing and verification

use crate::core::serialize::{
    preallocate, read_array, read_count, read_hash, read_i32, read_u64, read_var_bytes, write_var_bytes,
    write_varint,
};
use crate::core::{Hash256, PubKeyHash, Serializable, hash160, sha256};
use crate::error::{ChainError, Result};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey, ecdsa::Signature};
use std::collections::HashMap;
use std::io::Read;

/// Reward paid by every coinbase transaction
pub const BLOCK_SUBSIDY: u64 = 10;

/// Output index carried by the dummy coinbase input
pub const COINBASE_INDEX: i32 = -1;

/// Transaction input - references a previous transaction output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    /// ID of the transaction holding the referenced output (zero for coinbase)
    pub prev_tx_id: Hash256,
    /// Index of the output in the previous transaction (-1 for coinbase)
    pub prev_index: i32,
    /// Compact ECDSA signature; for coinbase inputs this carries the memo
    pub signature: Vec<u8>,
    /// Serialized public key of the spender
    pub pub_key: Vec<u8>,
}

impl TxInput {
    /// Create an unsigned input spending `prev_tx_id:prev_index`
    pub fn new(prev_tx_id: Hash256, prev_index: i32, pub_key: Vec<u8>) -> Self {
        Self {
            prev_tx_id,
            prev_index,
            signature: Vec::new(),
            pub_key,
        }
    }

    /// Create the dummy input of a coinbase transaction
    pub fn coinbase(memo: &[u8]) -> Self {
        Self {
            prev_tx_id: Hash256::zero(),
            prev_index: COINBASE_INDEX,
            signature: memo.to_vec(),
            pub_key: Vec::new(),
        }
    }

    /// Check if this is a coinbase input
    pub fn is_coinbase(&self) -> bool {
        self.prev_tx_id.is_zero() && self.prev_index == COINBASE_INDEX
    }

    /// Whether the input's public key hashes to `pub_key_hash`
    pub fn uses_key(&self, pub_key_hash: &PubKeyHash) -> bool {
        hash160(&self.pub_key) == *pub_key_hash
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.prev_tx_id.as_bytes());
        buf.extend_from_slice(&self.prev_index.to_le_bytes());
        write_var_bytes(buf, &self.signature);
        write_var_bytes(buf, &self.pub_key);
    }

    fn from_reader<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        Ok(Self {
            prev_tx_id: read_hash(reader)?,
            prev_index: read_i32(reader)?,
            signature: read_var_bytes(reader)?,
            pub_key: read_var_bytes(reader)?,
        })
    }
}

/// Transaction output - an amount locked to a public key hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub value: u64,
    pub pub_key_hash: PubKeyHash,
}

impl TxOutput {
    pub fn new(value: u64, pub_key_hash: PubKeyHash) -> Self {
        Self {
            value,
            pub_key_hash,
        }
    }

    pub fn is_locked_with(&self, pub_key_hash: &PubKeyHash) -> bool {
        self.pub_key_hash == *pub_key_hash
    }

    pub(crate) fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.value.to_le_bytes());
        buf.extend_from_slice(&self.pub_key_hash);
    }

    pub(crate) fn from_reader<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        Ok(Self {
            value: read_u64(reader)?,
            pub_key_hash: read_array(reader)?,
        })
    }
}

/// Transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// SHA256 of the transaction serialized with this field zeroed
    pub id: Hash256,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Create a transaction and compute its ID
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        let mut tx = Self {
            id: Hash256::zero(),
            inputs,
            outputs,
        };
        tx.id = tx.hash();
        tx
    }

    /// Create a coinbase transaction paying the block subsidy to `to`
    ///
    /// An empty memo is replaced by one naming the recipient plus random bytes, so that
    /// two rewards to the same address never share an ID.
    pub fn coinbase(to: &PubKeyHash, memo: &str) -> Self {
        let memo = if memo.is_empty() {
            let salt: [u8; 8] = rand::random();
            format!("Reward to {} #{}", hex::encode(to), hex::encode(salt))
        } else {
            memo.to_string()
        };

        Self::new(
            vec![TxInput::coinbase(memo.as_bytes())],
            vec![TxOutput::new(BLOCK_SUBSIDY, *to)],
        )
    }

    /// Exactly one input, with an empty reference and index -1
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    /// Hash of the transaction with its own ID field zeroed
    pub fn hash(&self) -> Hash256 {
        let mut copy = self.clone();
        copy.id = Hash256::zero();
        sha256(&copy.serialize())
    }

    /// Copy with every input's signature and public key blanked
    pub fn trimmed_copy(&self) -> Self {
        let inputs = self
            .inputs
            .iter()
            .map(|input| TxInput {
                prev_tx_id: input.prev_tx_id,
                prev_index: input.prev_index,
                signature: Vec::new(),
                pub_key: Vec::new(),
            })
            .collect();

        Self {
            id: self.id,
            inputs,
            outputs: self.outputs.clone(),
        }
    }

    /// Referenced output of input `index`, if the lookup holds it
    fn referenced_output<'a>(
        &self,
        index: usize,
        prev_txs: &'a HashMap<Hash256, Transaction>,
    ) -> Option<&'a TxOutput> {
        let input = &self.inputs[index];
        let prev_tx = prev_txs.get(&input.prev_tx_id)?;
        let offset = usize::try_from(input.prev_index).ok()?;
        prev_tx.outputs.get(offset)
    }

    /// Digest signed by input `index`: the trimmed copy with only that input's key field set
    /// to the lock of the output it spends
    fn signing_digest(trimmed: &mut Transaction, index: usize, lock: &PubKeyHash) -> Hash256 {
        trimmed.inputs[index].pub_key = lock.to_vec();
        let digest = trimmed.hash();
        trimmed.inputs[index].pub_key = Vec::new();
        digest
    }

    /// Sign every input with `secret_key` and recompute the ID; no-op for coinbase transactions
    pub fn sign(
        &mut self,
        secret_key: &SecretKey,
        prev_txs: &HashMap<Hash256, Transaction>,
    ) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        let secp = Secp256k1::signing_only();
        let mut trimmed = self.trimmed_copy();

        for index in 0..self.inputs.len() {
            let lock = self
                .referenced_output(index, prev_txs)
                .map(|output| output.pub_key_hash)
                .ok_or(ChainError::TransactionNotFound(self.inputs[index].prev_tx_id))?;

            let digest = Self::signing_digest(&mut trimmed, index, &lock);
            let message = Message::from_digest(*digest.as_bytes());
            let signature = secp.sign_ecdsa(&message, secret_key);
            self.inputs[index].signature = signature.serialize_compact().to_vec();
        }

        // The ID covers the signatures
        self.id = self.hash();
        Ok(())
    }

    /// Check every input's signature against the outputs it references
    ///
    /// Returns false on the first input that is unsigned, references an unknown output,
    /// carries a key that does not match the output's lock, or fails ECDSA verification.
    pub fn verify(&self, prev_txs: &HashMap<Hash256, Transaction>) -> bool {
        if self.is_coinbase() {
            return true;
        }

        let secp = Secp256k1::verification_only();
        let mut trimmed = self.trimmed_copy();

        for (index, input) in self.inputs.iter().enumerate() {
            let Some(output) = self.referenced_output(index, prev_txs) else {
                log::warn!("Transaction {} spends unknown output {}:{}",
                    self.id, input.prev_tx_id, input.prev_index);
                return false;
            };

            if !input.uses_key(&output.pub_key_hash) {
                return false;
            }

            let digest = Self::signing_digest(&mut trimmed, index, &output.pub_key_hash);
            let message = Message::from_digest(*digest.as_bytes());

            let (Ok(public_key), Ok(signature)) = (
                PublicKey::from_slice(&input.pub_key),
                Signature::from_compact(&input.signature),
            ) else {
                return false;
            };

            if secp.verify_ecdsa(&message, &signature, &public_key).is_err() {
                return false;
            }
        }

        true
    }
}

impl Serializable for Transaction {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(self.id.as_bytes());

        write_varint(&mut buf, self.inputs.len() as u64);
        for input in &self.inputs {
            input.write_to(&mut buf);
        }

        write_varint(&mut buf, self.outputs.len() as u64);
        for output in &self.outputs {
            output.write_to(&mut buf);
        }

        buf
    }

    fn from_reader<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let id = read_hash(reader)?;

        let input_count = read_count(reader)?;
        let mut inputs = preallocate(input_count);
        for _ in 0..input_count {
            inputs.push(TxInput::from_reader(reader)?);
        }

        let output_count = read_count(reader)?;
        let mut outputs = preallocate(output_count);
        for _ in 0..output_count {
            outputs.push(TxOutput::from_reader(reader)?);
        }

        Ok(Self {
            id,
            inputs,
            outputs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestKey {
        secret: SecretKey,
        public: Vec<u8>,
        hash: PubKeyHash,
    }

    fn test_key(seed: u8) -> TestKey {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[seed; 32]).unwrap();
        let public = PublicKey::from_secret_key(&secp, &secret).serialize().to_vec();
        let hash = hash160(&public);
        TestKey {
            secret,
            public,
            hash,
        }
    }

    /// A coinbase paying `from`, and an unsigned transfer of 4 from it to `to`
    fn funded_transfer(from: &TestKey, to: &TestKey) -> (HashMap<Hash256, Transaction>, Transaction) {
        let funding = Transaction::coinbase(&from.hash, "funding");
        let tx = Transaction::new(
            vec![TxInput::new(funding.id, 0, from.public.clone())],
            vec![
                TxOutput::new(4, to.hash),
                TxOutput::new(BLOCK_SUBSIDY - 4, from.hash),
            ],
        );

        let mut prev_txs = HashMap::new();
        prev_txs.insert(funding.id, funding);
        (prev_txs, tx)
    }

    #[test]
    fn test_coinbase_transaction() {
        let key = test_key(1);
        let tx = Transaction::coinbase(&key.hash, "hello");

        assert!(tx.is_coinbase());
        assert_eq!(tx.inputs[0].signature, b"hello".to_vec());
        assert_eq!(tx.outputs, vec![TxOutput::new(BLOCK_SUBSIDY, key.hash)]);
        assert_eq!(tx.id, tx.hash());
    }

    #[test]
    fn test_coinbase_default_memo_is_unique() {
        let key = test_key(1);
        let a = Transaction::coinbase(&key.hash, "");
        let b = Transaction::coinbase(&key.hash, "");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_is_coinbase_requires_single_dummy_input() {
        let key = test_key(1);
        let mut tx = Transaction::coinbase(&key.hash, "memo");
        tx.inputs.push(TxInput::coinbase(b"second"));
        assert!(!tx.is_coinbase());

        let spend = TxInput::new(Hash256::new([1; 32]), 0, key.public.clone());
        assert!(!spend.is_coinbase());
    }

    #[test]
    fn test_id_excludes_itself() {
        let key = test_key(1);
        let mut tx = Transaction::coinbase(&key.hash, "memo");
        let id = tx.id;
        tx.id = Hash256::new([9; 32]);
        assert_eq!(tx.hash(), id);
    }

    #[test]
    fn test_transaction_serialization() {
        let (prev_txs, tx) = funded_transfer(&test_key(1), &test_key(2));
        let serialized = tx.serialize();
        let deserialized = Transaction::deserialize(&serialized).unwrap();
        assert_eq!(tx, deserialized);

        let funding = prev_txs.values().next().unwrap();
        assert_eq!(Transaction::deserialize(&funding.serialize()).unwrap(), *funding);
    }

    #[test]
    fn test_sign_and_verify() {
        let alice = test_key(1);
        let bob = test_key(2);
        let (prev_txs, mut tx) = funded_transfer(&alice, &bob);

        assert!(!tx.verify(&prev_txs));
        let unsigned_id = tx.id;
        tx.sign(&alice.secret, &prev_txs).unwrap();
        assert!(tx.verify(&prev_txs));
        assert_ne!(tx.id, unsigned_id);
        assert_eq!(tx.id, tx.hash());
    }

    #[test]
    fn test_tampered_signature_fails() {
        let alice = test_key(1);
        let (prev_txs, mut tx) = funded_transfer(&alice, &test_key(2));
        tx.sign(&alice.secret, &prev_txs).unwrap();

        tx.inputs[0].signature[10] ^= 0x01;
        assert!(!tx.verify(&prev_txs));
    }

    #[test]
    fn test_tampered_referenced_lock_fails() {
        let alice = test_key(1);
        let (mut prev_txs, mut tx) = funded_transfer(&alice, &test_key(2));
        tx.sign(&alice.secret, &prev_txs).unwrap();

        let funding = prev_txs.values_mut().next().unwrap();
        funding.outputs[0].pub_key_hash[0] ^= 0x01;
        assert!(!tx.verify(&prev_txs));
    }

    #[test]
    fn test_tampered_output_fails() {
        let alice = test_key(1);
        let (prev_txs, mut tx) = funded_transfer(&alice, &test_key(2));
        tx.sign(&alice.secret, &prev_txs).unwrap();

        tx.outputs[0].value += 1;
        assert!(!tx.verify(&prev_txs));
    }

    #[test]
    fn test_wrong_key_fails() {
        let alice = test_key(1);
        let mallory = test_key(3);
        let (prev_txs, mut tx) = funded_transfer(&alice, &test_key(2));

        // Mallory signs with her own key but claims Alice's output
        tx.inputs[0].pub_key = mallory.public.clone();
        tx.sign(&mallory.secret, &prev_txs).unwrap();
        assert!(!tx.verify(&prev_txs));
    }

    #[test]
    fn test_sign_missing_reference() {
        let alice = test_key(1);
        let (_, mut tx) = funded_transfer(&alice, &test_key(2));
        let result = tx.sign(&alice.secret, &HashMap::new());
        assert!(matches!(result, Err(ChainError::TransactionNotFound(_))));
        assert!(!tx.verify(&HashMap::new()));
    }

    #[test]
    fn test_multi_input_signatures_are_independent() {
        let alice = test_key(1);
        let bob = test_key(2);
        let first = Transaction::coinbase(&alice.hash, "one");
        let second = Transaction::coinbase(&alice.hash, "two");

        let mut tx = Transaction::new(
            vec![
                TxInput::new(first.id, 0, alice.public.clone()),
                TxInput::new(second.id, 0, alice.public.clone()),
            ],
            vec![TxOutput::new(2 * BLOCK_SUBSIDY, bob.hash)],
        );

        let mut prev_txs = HashMap::new();
        prev_txs.insert(first.id, first);
        prev_txs.insert(second.id, second);

        tx.sign(&alice.secret, &prev_txs).unwrap();
        assert_ne!(tx.inputs[0].signature, tx.inputs[1].signature);
        assert!(tx.verify(&prev_txs));

        tx.inputs.swap(0, 1);
        assert!(!tx.verify(&prev_txs));
    }

    #[test]
    fn test_coinbase_sign_is_noop() {
        let key = test_key(1);
        let mut tx = Transaction::coinbase(&key.hash, "memo");
        let before = tx.clone();
        tx.sign(&key.secret, &HashMap::new()).unwrap();
        assert_eq!(tx, before);
        assert!(tx.verify(&HashMap::new()));
    }
}
