use std::cmp;
use std::collections::VecDeque;
use std::io::{Cursor, Read};

use bitflags::bitflags;
use byteorder::{BigEndian, ReadBytesExt};

use crate::error::TransportError;
use crate::transport::CommandType;

pub(crate) const HID_REPORT_LEN: usize = 64;
const INITIAL_PACKET_DATA_LEN: usize = HID_REPORT_LEN - 7;
const CONTINUATION_PACKET_DATA_LEN: usize = HID_REPORT_LEN - 5;
const MAX_SEQUENCE_NUMBER: usize = 0x7f;
pub(crate) const MAX_MESSAGE_LEN: usize =
    INITIAL_PACKET_DATA_LEN + (MAX_SEQUENCE_NUMBER + 1) * CONTINUATION_PACKET_DATA_LEN;

const FRAME_TYPE_INIT: u8 = 0b1000_0000;
const FRAME_TYPE_MASK: u8 = 0b1000_0000;
const COMMAND_TYPE_MASK: u8 = 0b0111_1111;

// Command identifiers
const CTAPHID_MSG: u8 = 0x03;
const CTAPHID_INIT: u8 = 0x06;
const CTAPHID_CBOR: u8 = 0x10;
const CTAPHID_KEEPALIVE: u8 = 0x3b;
const CTAPHID_ERROR: u8 = 0x3f;

const INIT_NONCE_LEN: usize = 8;
const INIT_RESPONSE_LEN: usize = 17;

pub const BROADCAST_CHANNEL_ID: ChannelId = ChannelId(0xffff_ffff);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ChannelId(pub u32);

bitflags! {
    pub struct CapabilityFlags: u8 {
        const WINK = 0b0000_0001; // If set, authenticator implements CTAPHID_WINK function
        const CBOR = 0b0000_0100; // If set, authenticator implements CTAPHID_CBOR function
        const NMSG = 0b0000_1000; // If set, authenticator DOES NOT implement CTAPHID_MSG function
    }
}

/// CTAPHID command identifiers the host sends or must recognise in a response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HidCommand {
    Msg,
    Init,
    Cbor,
    KeepAlive,
    Error,
    Unknown { identifier: u8 },
}

impl HidCommand {
    pub fn from_byte(byte: u8) -> HidCommand {
        match byte & COMMAND_TYPE_MASK {
            CTAPHID_MSG => HidCommand::Msg,
            CTAPHID_INIT => HidCommand::Init,
            CTAPHID_CBOR => HidCommand::Cbor,
            CTAPHID_KEEPALIVE => HidCommand::KeepAlive,
            CTAPHID_ERROR => HidCommand::Error,
            identifier => HidCommand::Unknown { identifier },
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            HidCommand::Msg => CTAPHID_MSG,
            HidCommand::Init => CTAPHID_INIT,
            HidCommand::Cbor => CTAPHID_CBOR,
            HidCommand::KeepAlive => CTAPHID_KEEPALIVE,
            HidCommand::Error => CTAPHID_ERROR,
            HidCommand::Unknown { identifier } => identifier,
        }
    }
}

impl From<CommandType> for HidCommand {
    fn from(command: CommandType) -> Self {
        match command {
            CommandType::Msg => HidCommand::Msg,
            CommandType::Cbor => HidCommand::Cbor,
        }
    }
}

#[derive(PartialEq, Debug)]
pub enum Packet {
    /// An initialization packet is the first packet sent in a message, it starts a new transaction.
    ///
    /// Offset  Length  Mnemonic  Description
    /// ------------------------------------------------------------------------------
    /// 0       4       CID       Channel identifier
    /// 4       1       CMD       Command identifier (bit 7 always set)
    /// 5       1       BCNTH     High part of payload length
    /// 6       1       BCNTL     Low part of payload length
    /// 7       (s - 7) DATA      Payload data (s is equal to the fixed packet size)
    Initialization {
        channel_id: ChannelId,
        command: HidCommand,
        data: Vec<u8>,
        payload_len: u16,
    },
    /// Offset  Length  Mnemonic  Description
    /// ------------------------------------------------------------------------------
    /// 0       4       CID       Channel identifier
    /// 4       1       SEQ       Packet sequence 0x00..0x7f (bit 7 always cleared)
    /// 5       (s - 5) DATA      Payload data (s is equal to the fixed packet size)
    Continuation {
        channel_id: ChannelId,
        sequence_number: u8,
        data: Vec<u8>,
    },
}

impl Packet {
    pub fn channel_id(&self) -> ChannelId {
        match self {
            Packet::Initialization { channel_id, .. } => *channel_id,
            Packet::Continuation { channel_id, .. } => *channel_id,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Packet, TransportError> {
        if bytes.len() != HID_REPORT_LEN {
            return Err(TransportError::Framing(format!(
                "HID report must be {} bytes, got {}",
                HID_REPORT_LEN,
                bytes.len()
            )));
        }
        let mut reader = Cursor::new(bytes);

        let channel_id = ChannelId(reader.read_u32::<BigEndian>()?);
        let first_byte = reader.read_u8()?;
        if first_byte & FRAME_TYPE_MASK == FRAME_TYPE_INIT {
            let command = HidCommand::from_byte(first_byte);
            let payload_len = reader.read_u16::<BigEndian>()?;
            let mut packet_data = vec![0u8; INITIAL_PACKET_DATA_LEN];
            reader.read_exact(&mut packet_data[..])?;
            Ok(Packet::Initialization {
                channel_id,
                command,
                data: packet_data,
                payload_len,
            })
        } else {
            let mut packet_data = vec![0u8; CONTINUATION_PACKET_DATA_LEN];
            reader.read_exact(&mut packet_data[..])?;
            Ok(Packet::Continuation {
                channel_id,
                sequence_number: first_byte,
                data: packet_data,
            })
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HID_REPORT_LEN);
        match self {
            Packet::Initialization {
                channel_id,
                command,
                data,
                payload_len,
            } => {
                // 0      4      CID      Channel identifier
                bytes.extend_from_slice(&channel_id.0.to_be_bytes());

                // 4      1      CMD      Command identifier (bit 7 always set)
                bytes.push(command.to_byte() | FRAME_TYPE_INIT);

                // 5      1      BCNTH    High part of payload length
                // 6      1      BCNTL    Low part of payload length
                bytes.extend_from_slice(&payload_len.to_be_bytes());

                // 7      (s-7)  DATA     Payload data
                bytes.extend_from_slice(&data[..cmp::min(data.len(), INITIAL_PACKET_DATA_LEN)]);
            }
            Packet::Continuation {
                channel_id,
                sequence_number,
                data,
            } => {
                // 0      4      CID      Channel identifier
                bytes.extend_from_slice(&channel_id.0.to_be_bytes());

                // 4      1      SEQ      Packet sequence 0x00..0x7f (bit 7 always cleared)
                bytes.push(sequence_number & !FRAME_TYPE_MASK);

                // 5      (s-5)  DATA     Payload data
                bytes.extend_from_slice(
                    &data[..cmp::min(data.len(), CONTINUATION_PACKET_DATA_LEN)],
                );
            }
        }

        // Zero-pad to expected report length
        bytes.resize(HID_REPORT_LEN, 0u8);
        bytes
    }

    pub fn encode_message(
        channel_id: ChannelId,
        command: HidCommand,
        data: &[u8],
    ) -> Result<VecDeque<Packet>, TransportError> {
        if data.len() > MAX_MESSAGE_LEN {
            return Err(TransportError::Framing(format!(
                "message of {} bytes exceeds the {} byte CTAPHID limit",
                data.len(),
                MAX_MESSAGE_LEN
            )));
        }
        let mut packets = VecDeque::new();
        let split_index = cmp::min(data.len(), INITIAL_PACKET_DATA_LEN);
        let (initial, remaining) = data.split_at(split_index);
        packets.push_back(Packet::Initialization {
            channel_id,
            command,
            payload_len: data.len() as u16,
            data: initial.to_vec(),
        });
        for (i, chunk) in remaining.chunks(CONTINUATION_PACKET_DATA_LEN).enumerate() {
            packets.push_back(Packet::Continuation {
                channel_id,
                sequence_number: i as u8,
                data: chunk.to_vec(),
            });
        }
        Ok(packets)
    }
}

/// Reassembles one response message on a channel. Packets addressed to other channels
/// are ignored.
#[derive(Debug)]
pub struct ResponseAssembler {
    channel_id: ChannelId,
    in_progress: Option<PartialMessage>,
}

#[derive(Debug)]
struct PartialMessage {
    command: HidCommand,
    payload_len: usize,
    data: Vec<u8>,
    next_sequence_number: u8,
}

impl ResponseAssembler {
    pub fn new(channel_id: ChannelId) -> Self {
        ResponseAssembler {
            channel_id,
            in_progress: None,
        }
    }

    /// Returns the complete message once its last packet arrives.
    pub fn push(
        &mut self,
        packet: Packet,
    ) -> Result<Option<(HidCommand, Vec<u8>)>, TransportError> {
        if packet.channel_id() != self.channel_id {
            return Ok(None);
        }
        match packet {
            Packet::Initialization {
                command,
                data,
                payload_len,
                ..
            } => {
                if let Some(partial) = &self.in_progress {
                    return Err(TransportError::Framing(format!(
                        "initialization packet interrupted a {:?} response after {} of {} bytes",
                        partial.command,
                        partial.data.len(),
                        partial.payload_len
                    )));
                }
                let payload_len = payload_len as usize;
                if payload_len > MAX_MESSAGE_LEN {
                    return Err(TransportError::Framing(format!(
                        "declared payload of {} bytes exceeds the CTAPHID limit",
                        payload_len
                    )));
                }
                self.in_progress = Some(PartialMessage {
                    command,
                    payload_len,
                    data,
                    next_sequence_number: 0,
                });
            }
            Packet::Continuation {
                sequence_number,
                data,
                ..
            } => {
                let partial = self.in_progress.as_mut().ok_or_else(|| {
                    TransportError::Framing(String::from(
                        "continuation packet without an initialization packet",
                    ))
                })?;
                if sequence_number != partial.next_sequence_number {
                    return Err(TransportError::Framing(format!(
                        "expected sequence number {}, got {}",
                        partial.next_sequence_number, sequence_number
                    )));
                }
                partial.next_sequence_number += 1;
                partial.data.extend_from_slice(&data);
            }
        }

        match self.in_progress.take() {
            Some(mut partial) if partial.data.len() >= partial.payload_len => {
                partial.data.truncate(partial.payload_len);
                Ok(Some((partial.command, partial.data)))
            }
            still_in_progress => {
                self.in_progress = still_in_progress;
                Ok(None)
            }
        }
    }
}

/// CTAPHID_INIT response payload.
#[derive(Debug, PartialEq, Eq)]
pub struct InitResponse {
    pub nonce: [u8; INIT_NONCE_LEN],
    pub channel_id: ChannelId,
    pub protocol_version: u8,
    pub device_version: (u8, u8, u8),
    pub capabilities: CapabilityFlags,
}

impl InitResponse {
    pub fn decode(data: &[u8]) -> Result<InitResponse, TransportError> {
        if data.len() < INIT_RESPONSE_LEN {
            return Err(TransportError::Framing(format!(
                "INIT response must be {} bytes, got {}",
                INIT_RESPONSE_LEN,
                data.len()
            )));
        }
        let mut cursor = Cursor::new(data);
        let mut nonce = [0u8; INIT_NONCE_LEN];
        cursor.read_exact(&mut nonce)?;
        Ok(InitResponse {
            nonce,
            channel_id: ChannelId(cursor.read_u32::<BigEndian>()?),
            protocol_version: cursor.read_u8()?,
            device_version: (cursor.read_u8()?, cursor.read_u8()?, cursor.read_u8()?),
            capabilities: CapabilityFlags::from_bits_truncate(cursor.read_u8()?),
        })
    }

    #[cfg(test)]
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(INIT_RESPONSE_LEN);
        bytes.extend_from_slice(&self.nonce);
        bytes.extend_from_slice(&self.channel_id.0.to_be_bytes());
        bytes.push(self.protocol_version);
        bytes.push(self.device_version.0);
        bytes.push(self.device_version.1);
        bytes.push(self.device_version.2);
        bytes.push(self.capabilities.bits());
        bytes
    }
}
