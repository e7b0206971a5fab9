// Network protocol messages

use crate::core::serialize::{
    preallocate, read_count, read_hash, read_i32, read_u64, read_var_str, write_var_str,
    write_varint,
};
use crate::core::{Block, Hash256, Serializable, Transaction};
use crate::error::{ChainError, Result};
use std::io::{Cursor, Read};

/// Width of the zero-padded command label that starts every message
pub const COMMAND_LEN: usize = 12;

/// Protocol version announced in `version` messages
pub const PROTOCOL_VERSION: i32 = 1;

/// Network message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Version,
    GetBlocks,
    Inventory,
    GetData,
    BlockData,
    TxData,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Version => "version",
            MessageType::GetBlocks => "getblocks",
            MessageType::Inventory => "inventory",
            MessageType::GetData => "getdata",
            MessageType::BlockData => "blockdata",
            MessageType::TxData => "txdata",
        }
    }

    pub fn from_command(s: &str) -> Option<Self> {
        match s {
            "version" => Some(MessageType::Version),
            "getblocks" => Some(MessageType::GetBlocks),
            "inventory" => Some(MessageType::Inventory),
            "getdata" => Some(MessageType::GetData),
            "blockdata" => Some(MessageType::BlockData),
            "txdata" => Some(MessageType::TxData),
            _ => None,
        }
    }

    /// Zero-padded command label
    pub fn command(&self) -> [u8; COMMAND_LEN] {
        let mut label = [0u8; COMMAND_LEN];
        let name = self.as_str().as_bytes();
        label[..name.len()].copy_from_slice(name);
        label
    }
}

/// Inventory type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvType {
    Block,
    Tx,
}

impl InvType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvType::Block => "block",
            InvType::Tx => "tx",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "block" => Ok(InvType::Block),
            "tx" => Ok(InvType::Tx),
            other => Err(ChainError::Protocol(format!("Unknown inventory type: {}", other))),
        }
    }

    fn from_reader<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        Self::parse(&read_var_str(reader)?)
    }
}

/// Network message
///
/// Every message names the listening address of its sender so the receiver can answer on a
/// fresh connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Version {
        version: i32,
        best_height: u64,
        addr_from: String,
    },
    GetBlocks {
        addr_from: String,
    },
    Inventory {
        addr_from: String,
        kind: InvType,
        items: Vec<Hash256>,
    },
    GetData {
        addr_from: String,
        kind: InvType,
        id: Hash256,
    },
    BlockData {
        addr_from: String,
        block: Block,
    },
    TxData {
        addr_from: String,
        transaction: Transaction,
    },
}

impl Message {
    /// Get message type
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Version { .. } => MessageType::Version,
            Message::GetBlocks { .. } => MessageType::GetBlocks,
            Message::Inventory { .. } => MessageType::Inventory,
            Message::GetData { .. } => MessageType::GetData,
            Message::BlockData { .. } => MessageType::BlockData,
            Message::TxData { .. } => MessageType::TxData,
        }
    }

    /// Address the sender listens on
    pub fn addr_from(&self) -> &str {
        match self {
            Message::Version { addr_from, .. }
            | Message::GetBlocks { addr_from }
            | Message::Inventory { addr_from, .. }
            | Message::GetData { addr_from, .. }
            | Message::BlockData { addr_from, .. }
            | Message::TxData { addr_from, .. } => addr_from,
        }
    }

    /// Command label followed by the payload; the connection close marks the end
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = self.message_type().command().to_vec();

        match self {
            Message::Version {
                version,
                best_height,
                addr_from,
            } => {
                bytes.extend_from_slice(&version.to_le_bytes());
                bytes.extend_from_slice(&best_height.to_le_bytes());
                write_var_str(&mut bytes, addr_from);
            }
            Message::GetBlocks { addr_from } => {
                write_var_str(&mut bytes, addr_from);
            }
            Message::Inventory {
                addr_from,
                kind,
                items,
            } => {
                write_var_str(&mut bytes, addr_from);
                write_var_str(&mut bytes, kind.as_str());
                write_varint(&mut bytes, items.len() as u64);
                for item in items {
                    bytes.extend_from_slice(item.as_bytes());
                }
            }
            Message::GetData { addr_from, kind, id } => {
                write_var_str(&mut bytes, addr_from);
                write_var_str(&mut bytes, kind.as_str());
                bytes.extend_from_slice(id.as_bytes());
            }
            Message::BlockData { addr_from, block } => {
                write_var_str(&mut bytes, addr_from);
                bytes.extend_from_slice(&block.serialize());
            }
            Message::TxData {
                addr_from,
                transaction,
            } => {
                write_var_str(&mut bytes, addr_from);
                bytes.extend_from_slice(&transaction.serialize());
            }
        }

        bytes
    }

    /// Decode a whole message, dispatching on the command label
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < COMMAND_LEN {
            return Err(ChainError::Protocol("Message too short".to_string()));
        }

        let (label, payload) = data.split_at(COMMAND_LEN);
        let command = std::str::from_utf8(label)
            .map_err(|e| ChainError::Protocol(format!("Invalid command label: {}", e)))?
            .trim_end_matches('\0');
        let msg_type = MessageType::from_command(command)
            .ok_or_else(|| ChainError::Protocol(format!("Unknown command: {}", command)))?;

        let mut reader = Cursor::new(payload);
        let message = Self::decode_payload(msg_type, &mut reader)?;

        if reader.position() as usize != payload.len() {
            return Err(ChainError::Protocol(format!(
                "{} bytes left over after {} payload",
                payload.len() - reader.position() as usize,
                command
            )));
        }

        Ok(message)
    }

    fn decode_payload<R: Read + ?Sized>(msg_type: MessageType, reader: &mut R) -> Result<Self> {
        let message = match msg_type {
            MessageType::Version => Message::Version {
                version: read_i32(reader)?,
                best_height: read_u64(reader)?,
                addr_from: read_var_str(reader)?,
            },
            MessageType::GetBlocks => Message::GetBlocks {
                addr_from: read_var_str(reader)?,
            },
            MessageType::Inventory => {
                let addr_from = read_var_str(reader)?;
                let kind = InvType::from_reader(reader)?;
                let count = read_count(reader)?;
                let mut items = preallocate(count);
                for _ in 0..count {
                    items.push(read_hash(reader)?);
                }
                Message::Inventory {
                    addr_from,
                    kind,
                    items,
                }
            }
            MessageType::GetData => Message::GetData {
                addr_from: read_var_str(reader)?,
                kind: InvType::from_reader(reader)?,
                id: read_hash(reader)?,
            },
            MessageType::BlockData => Message::BlockData {
                addr_from: read_var_str(reader)?,
                block: Block::from_reader(reader)?,
            },
            MessageType::TxData => Message::TxData {
                addr_from: read_var_str(reader)?,
                transaction: Transaction::from_reader(reader)?,
            },
        };
        Ok(message)
    }
}
