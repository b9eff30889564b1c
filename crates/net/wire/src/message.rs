use crate::{
    types::{
        BlockBodies, BlockHeaders, GetBlockBodies, GetBlockHeaders, GetNodeData, GetReceipts,
        NewBlock, NewBlockHashes, NodeData, Receipts, Transactions,
    },
    Status,
};
use alloy_rlp::{Decodable, Encodable};

/// The message codes of the btp sub-protocol.
///
/// Codes are stable across versions; later versions only append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BtpMessageId {
    /// The session handshake.
    Status = 0x00,
    /// Announcement of new block hashes.
    NewBlockHashes = 0x01,
    /// Broadcast transactions.
    Transactions = 0x02,
    /// Request for headers.
    GetBlockHeaders = 0x03,
    /// Headers response.
    BlockHeaders = 0x04,
    /// Request for block bodies.
    GetBlockBodies = 0x05,
    /// Bodies response.
    BlockBodies = 0x06,
    /// Propagation of a full new block.
    NewBlock = 0x07,
    /// Request for state trie nodes.
    GetNodeData = 0x0d,
    /// State trie nodes response.
    NodeData = 0x0e,
    /// Request for receipts.
    GetReceipts = 0x0f,
    /// Receipts response.
    Receipts = 0x10,
}

impl TryFrom<u8> for BtpMessageId {
    type Error = MessageError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Ok(match id {
            0x00 => Self::Status,
            0x01 => Self::NewBlockHashes,
            0x02 => Self::Transactions,
            0x03 => Self::GetBlockHeaders,
            0x04 => Self::BlockHeaders,
            0x05 => Self::GetBlockBodies,
            0x06 => Self::BlockBodies,
            0x07 => Self::NewBlock,
            0x0d => Self::GetNodeData,
            0x0e => Self::NodeData,
            0x0f => Self::GetReceipts,
            0x10 => Self::Receipts,
            other => return Err(MessageError::InvalidCode(other)),
        })
    }
}

/// Errors decoding a protocol message.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// The message code is not part of the protocol.
    #[error("unknown message code {0:#x}")]
    InvalidCode(u8),
    /// The payload failed to decode.
    #[error("malformed message payload: {0}")]
    Rlp(#[from] alloy_rlp::Error),
}

/// One message of the btp protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BtpMessage {
    /// The session handshake.
    Status(Status),
    /// Announcement of new block hashes.
    NewBlockHashes(NewBlockHashes),
    /// Broadcast transactions.
    Transactions(Transactions),
    /// Request for headers.
    GetBlockHeaders(GetBlockHeaders),
    /// Headers response.
    BlockHeaders(BlockHeaders),
    /// Request for block bodies.
    GetBlockBodies(GetBlockBodies),
    /// Bodies response.
    BlockBodies(BlockBodies),
    /// Propagation of a full new block.
    NewBlock(Box<NewBlock>),
    /// Request for state trie nodes.
    GetNodeData(GetNodeData),
    /// State trie nodes response.
    NodeData(NodeData),
    /// Request for receipts.
    GetReceipts(GetReceipts),
    /// Receipts response.
    Receipts(Receipts),
}

impl BtpMessage {
    /// The code this message travels under.
    pub const fn message_id(&self) -> BtpMessageId {
        match self {
            Self::Status(_) => BtpMessageId::Status,
            Self::NewBlockHashes(_) => BtpMessageId::NewBlockHashes,
            Self::Transactions(_) => BtpMessageId::Transactions,
            Self::GetBlockHeaders(_) => BtpMessageId::GetBlockHeaders,
            Self::BlockHeaders(_) => BtpMessageId::BlockHeaders,
            Self::GetBlockBodies(_) => BtpMessageId::GetBlockBodies,
            Self::BlockBodies(_) => BtpMessageId::BlockBodies,
            Self::NewBlock(_) => BtpMessageId::NewBlock,
            Self::GetNodeData(_) => BtpMessageId::GetNodeData,
            Self::NodeData(_) => BtpMessageId::NodeData,
            Self::GetReceipts(_) => BtpMessageId::GetReceipts,
            Self::Receipts(_) => BtpMessageId::Receipts,
        }
    }
}

/// A message framed with its code, as it travels in a session frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolMessage {
    /// The wrapped message.
    pub message: BtpMessage,
}

impl ProtocolMessage {
    /// Encodes the code byte followed by the RLP payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.message.message_id() as u8);
        match &self.message {
            BtpMessage::Status(m) => m.encode(&mut out),
            BtpMessage::NewBlockHashes(m) => m.encode(&mut out),
            BtpMessage::Transactions(m) => m.encode(&mut out),
            BtpMessage::GetBlockHeaders(m) => m.encode(&mut out),
            BtpMessage::BlockHeaders(m) => m.encode(&mut out),
            BtpMessage::GetBlockBodies(m) => m.encode(&mut out),
            BtpMessage::BlockBodies(m) => m.encode(&mut out),
            BtpMessage::NewBlock(m) => m.encode(&mut out),
            BtpMessage::GetNodeData(m) => m.encode(&mut out),
            BtpMessage::NodeData(m) => m.encode(&mut out),
            BtpMessage::GetReceipts(m) => m.encode(&mut out),
            BtpMessage::Receipts(m) => m.encode(&mut out),
        }
        out
    }

    /// Decodes a framed message: code byte, then payload.
    pub fn decode(frame: &[u8]) -> Result<Self, MessageError> {
        let (&code, mut payload) =
            frame.split_first().ok_or(MessageError::Rlp(alloy_rlp::Error::InputTooShort))?;
        let id = BtpMessageId::try_from(code)?;
        let buf = &mut payload;
        let message = match id {
            BtpMessageId::Status => BtpMessage::Status(Status::decode(buf)?),
            BtpMessageId::NewBlockHashes => {
                BtpMessage::NewBlockHashes(NewBlockHashes::decode(buf)?)
            }
            BtpMessageId::Transactions => BtpMessage::Transactions(Transactions::decode(buf)?),
            BtpMessageId::GetBlockHeaders => {
                BtpMessage::GetBlockHeaders(GetBlockHeaders::decode(buf)?)
            }
            BtpMessageId::BlockHeaders => BtpMessage::BlockHeaders(BlockHeaders::decode(buf)?),
            BtpMessageId::GetBlockBodies => {
                BtpMessage::GetBlockBodies(GetBlockBodies::decode(buf)?)
            }
            BtpMessageId::BlockBodies => BtpMessage::BlockBodies(BlockBodies::decode(buf)?),
            BtpMessageId::NewBlock => BtpMessage::NewBlock(Box::new(NewBlock::decode(buf)?)),
            BtpMessageId::GetNodeData => BtpMessage::GetNodeData(GetNodeData::decode(buf)?),
            BtpMessageId::NodeData => BtpMessage::NodeData(NodeData::decode(buf)?),
            BtpMessageId::GetReceipts => BtpMessage::GetReceipts(GetReceipts::decode(buf)?),
            BtpMessageId::Receipts => BtpMessage::Receipts(Receipts::decode(buf)?),
        };
        Ok(Self { message })
    }
}

impl From<BtpMessage> for ProtocolMessage {
    fn from(message: BtpMessage) -> Self {
        Self { message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rbtp_primitives::{BlockHashOrNumber, HeadersDirection, B256};

    #[test]
    fn frame_roundtrip() {
        let messages = [
            BtpMessage::GetBlockHeaders(GetBlockHeaders {
                start_block: BlockHashOrNumber::Number(100),
                limit: 192,
                skip: 0,
                direction: HeadersDirection::Rising,
            }),
            BtpMessage::GetBlockBodies(GetBlockBodies(vec![B256::repeat_byte(1)])),
            BtpMessage::BlockHeaders(BlockHeaders(vec![Default::default()])),
            BtpMessage::NodeData(NodeData(vec![])),
        ];
        for message in messages {
            let framed = ProtocolMessage::from(message.clone()).encode();
            let decoded = ProtocolMessage::decode(&framed).unwrap();
            assert_eq!(decoded.message, message);
            assert_eq!(framed[0], message.message_id() as u8);
        }
    }

    #[test]
    fn unknown_code_is_rejected() {
        assert_eq!(
            ProtocolMessage::decode(&[0x42, 0xc0]),
            Err(MessageError::InvalidCode(0x42))
        );
    }

    #[test]
    fn codes_match_the_protocol_table() {
        assert_eq!(BtpMessageId::Status as u8, 0x00);
        assert_eq!(BtpMessageId::NewBlock as u8, 0x07);
        assert_eq!(BtpMessageId::GetNodeData as u8, 0x0d);
        assert_eq!(BtpMessageId::Receipts as u8, 0x10);
    }
}
