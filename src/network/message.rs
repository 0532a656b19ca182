// Wire protocol: a 12-byte zero-padded command name followed by the
// payload in the canonical codec. One message per connection.

use std::io::{Cursor, Read};

use crate::core::serialize::{
    read_byte, read_string, read_u32_le, read_var_bytes, read_varint, write_string,
    write_var_bytes, write_varint,
};
use crate::error::{Error, Result};

pub const COMMAND_LENGTH: usize = 12;
/// Version constant for this network
pub const PROTOCOL_VERSION: u32 = 1;

/// What an `inv`/`getdata` message refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvKind {
    Block,
    Tx,
}

impl InvKind {
    fn to_byte(self) -> u8 {
        match self {
            InvKind::Block => 1,
            InvKind::Tx => 2,
        }
    }

    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            1 => Ok(InvKind::Block),
            2 => Ok(InvKind::Tx),
            other => Err(Error::Decode(format!("unknown inventory kind: {}", other))),
        }
    }
}

/// Every message of the peer protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Version {
        version: u32,
        best_height: u32,
        addr_from: String,
    },
    Addr {
        addr_list: Vec<String>,
    },
    Inv {
        addr_from: String,
        kind: InvKind,
        items: Vec<Vec<u8>>,
    },
    GetBlocks {
        addr_from: String,
    },
    GetData {
        addr_from: String,
        kind: InvKind,
        id: Vec<u8>,
    },
    Block {
        addr_from: String,
        block: Vec<u8>,
    },
    Tx {
        addr_from: String,
        transaction: Vec<u8>,
    },
}

impl Message {
    pub fn command(&self) -> &'static str {
        match self {
            Message::Version { .. } => "version",
            Message::Addr { .. } => "addr",
            Message::Inv { .. } => "inv",
            Message::GetBlocks { .. } => "getblocks",
            Message::GetData { .. } => "getdata",
            Message::Block { .. } => "block",
            Message::Tx { .. } => "tx",
        }
    }

    /// Full wire form: command field plus payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&command_bytes(self.command()));

        match self {
            Message::Version {
                version,
                best_height,
                addr_from,
            } => {
                buf.extend_from_slice(&version.to_le_bytes());
                buf.extend_from_slice(&best_height.to_le_bytes());
                write_string(&mut buf, addr_from);
            }
            Message::Addr { addr_list } => {
                write_varint(&mut buf, addr_list.len() as u64);
                for addr in addr_list {
                    write_string(&mut buf, addr);
                }
            }
            Message::Inv {
                addr_from,
                kind,
                items,
            } => {
                write_string(&mut buf, addr_from);
                buf.push(kind.to_byte());
                write_varint(&mut buf, items.len() as u64);
                for item in items {
                    write_var_bytes(&mut buf, item);
                }
            }
            Message::GetBlocks { addr_from } => {
                write_string(&mut buf, addr_from);
            }
            Message::GetData {
                addr_from,
                kind,
                id,
            } => {
                write_string(&mut buf, addr_from);
                buf.push(kind.to_byte());
                write_var_bytes(&mut buf, id);
            }
            Message::Block { addr_from, block } => {
                write_string(&mut buf, addr_from);
                write_var_bytes(&mut buf, block);
            }
            Message::Tx {
                addr_from,
                transaction,
            } => {
                write_string(&mut buf, addr_from);
                write_var_bytes(&mut buf, transaction);
            }
        }

        buf
    }

    /// Parse one complete wire message.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < COMMAND_LENGTH {
            return Err(Error::Decode(format!(
                "message shorter than command field: {} bytes",
                data.len()
            )));
        }

        let command = command_name(&data[..COMMAND_LENGTH])?;
        let mut payload = Cursor::new(&data[COMMAND_LENGTH..]);

        match command.as_str() {
            "version" => Ok(Message::Version {
                version: read_u32_le(&mut payload)?,
                best_height: read_u32_le(&mut payload)?,
                addr_from: read_string(&mut payload)?,
            }),
            "addr" => {
                let count = read_varint(&mut payload)? as usize;
                let mut addr_list = Vec::with_capacity(count);
                for _ in 0..count {
                    addr_list.push(read_string(&mut payload)?);
                }
                Ok(Message::Addr { addr_list })
            }
            "inv" => {
                let addr_from = read_string(&mut payload)?;
                let kind = InvKind::from_byte(read_byte(&mut payload)?)?;
                let items = read_hash_list(&mut payload)?;
                Ok(Message::Inv {
                    addr_from,
                    kind,
                    items,
                })
            }
            "getblocks" => Ok(Message::GetBlocks {
                addr_from: read_string(&mut payload)?,
            }),
            "getdata" => Ok(Message::GetData {
                addr_from: read_string(&mut payload)?,
                kind: InvKind::from_byte(read_byte(&mut payload)?)?,
                id: read_var_bytes(&mut payload)?,
            }),
            "block" => Ok(Message::Block {
                addr_from: read_string(&mut payload)?,
                block: read_var_bytes(&mut payload)?,
            }),
            "tx" => Ok(Message::Tx {
                addr_from: read_string(&mut payload)?,
                transaction: read_var_bytes(&mut payload)?,
            }),
            other => Err(Error::Decode(format!("unknown command: {}", other))),
        }
    }
}

fn command_bytes(command: &str) -> [u8; COMMAND_LENGTH] {
    let mut bytes = [0u8; COMMAND_LENGTH];
    bytes[..command.len()].copy_from_slice(command.as_bytes());
    bytes
}

fn command_name(field: &[u8]) -> Result<String> {
    let trimmed: Vec<u8> = field.iter().copied().take_while(|&b| b != 0).collect();
    String::from_utf8(trimmed).map_err(|e| Error::Decode(format!("invalid command field: {}", e)))
}

fn read_hash_list(reader: &mut dyn Read) -> Result<Vec<Vec<u8>>> {
    let count = read_varint(reader)? as usize;
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        items.push(read_var_bytes(reader)?);
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(message: Message) {
        let bytes = message.to_bytes();
        assert_eq!(Message::from_bytes(&bytes).unwrap(), message);
    }

    #[test]
    fn command_field_is_padded() {
        let message = Message::GetBlocks {
            addr_from: "localhost:3000".to_string(),
        };
        let bytes = message.to_bytes();
        assert_eq!(&bytes[..9], b"getblocks");
        assert_eq!(&bytes[9..COMMAND_LENGTH], &[0u8; 3]);
    }

    #[test]
    fn version_round_trip() {
        round_trip(Message::Version {
            version: PROTOCOL_VERSION,
            best_height: 42,
            addr_from: "localhost:3001".to_string(),
        });
    }

    #[test]
    fn addr_round_trip() {
        round_trip(Message::Addr {
            addr_list: vec!["localhost:3000".to_string(), "localhost:3001".to_string()],
        });
    }

    #[test]
    fn inv_round_trip() {
        round_trip(Message::Inv {
            addr_from: "localhost:3000".to_string(),
            kind: InvKind::Block,
            items: vec![vec![1u8; 32], vec![2u8; 32]],
        });
        round_trip(Message::Inv {
            addr_from: "localhost:3000".to_string(),
            kind: InvKind::Tx,
            items: vec![vec![3u8; 32]],
        });
    }

    #[test]
    fn getdata_round_trip() {
        round_trip(Message::GetData {
            addr_from: "localhost:3002".to_string(),
            kind: InvKind::Tx,
            id: vec![7u8; 32],
        });
    }

    #[test]
    fn block_and_tx_round_trip() {
        round_trip(Message::Block {
            addr_from: "localhost:3000".to_string(),
            block: vec![9u8; 128],
        });
        round_trip(Message::Tx {
            addr_from: "localhost:3000".to_string(),
            transaction: vec![4u8; 96],
        });
    }

    #[test]
    fn unknown_command_rejected() {
        let mut bytes = vec![0u8; COMMAND_LENGTH];
        bytes[..4].copy_from_slice(b"ping");
        assert!(matches!(
            Message::from_bytes(&bytes),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn short_message_rejected() {
        assert!(Message::from_bytes(b"ver").is_err());
    }
}
