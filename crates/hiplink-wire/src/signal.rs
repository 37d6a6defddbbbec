//! Signal identities and the in-memory envelope.
//!
//! The numeric signal id appears only on the wire. Everything above the
//! codec works in terms of [`SignalKind`], and the codec is the sole place
//! that maps between the two.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::bulk::BulkSet;

/// Management read request.
pub const MGT_GET_REQ: u16 = 0x1230;
/// Management read confirm.
pub const MGT_GET_CFM: u16 = 0x1231;
/// Management write request.
pub const MGT_SET_REQ: u16 = 0x1234;
/// Management write confirm.
pub const MGT_SET_CFM: u16 = 0x1235;
/// Unsolicited management event.
pub const MGT_EVENT_IND: u16 = 0x1238;
/// Fatal transport fault notification.
pub const FAULT_IND: u16 = 0x123C;
/// Outbound data packet.
pub const PACKET_REQ: u16 = 0x2200;
/// Transmit status for an earlier outbound packet.
pub const PACKET_CFM: u16 = 0x2201;
/// Inbound data packet.
pub const PACKET_IND: u16 = 0x2202;

/// First sender id assigned to a registered client slot.
pub const SENDER_ID_BASE: u16 = 0xC000;
/// Client slot index position within a sender id.
pub const SENDER_ID_SHIFT: u32 = 8;

/// Every signal id understood by this stack, as a tagged kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    MgtGetReq,
    MgtGetCfm,
    MgtSetReq,
    MgtSetCfm,
    MgtEventInd,
    FaultInd,
    PacketReq,
    PacketCfm,
    PacketInd,
}

impl SignalKind {
    /// All kinds, in id order.
    pub const ALL: [SignalKind; 9] = [
        SignalKind::MgtGetReq,
        SignalKind::MgtGetCfm,
        SignalKind::MgtSetReq,
        SignalKind::MgtSetCfm,
        SignalKind::MgtEventInd,
        SignalKind::FaultInd,
        SignalKind::PacketReq,
        SignalKind::PacketCfm,
        SignalKind::PacketInd,
    ];

    /// Map a wire id to its kind. `None` for ids not in the signal table.
    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            MGT_GET_REQ => Some(Self::MgtGetReq),
            MGT_GET_CFM => Some(Self::MgtGetCfm),
            MGT_SET_REQ => Some(Self::MgtSetReq),
            MGT_SET_CFM => Some(Self::MgtSetCfm),
            MGT_EVENT_IND => Some(Self::MgtEventInd),
            FAULT_IND => Some(Self::FaultInd),
            PACKET_REQ => Some(Self::PacketReq),
            PACKET_CFM => Some(Self::PacketCfm),
            PACKET_IND => Some(Self::PacketInd),
            _ => None,
        }
    }

    /// The wire id of this kind.
    pub fn id(self) -> u16 {
        match self {
            Self::MgtGetReq => MGT_GET_REQ,
            Self::MgtGetCfm => MGT_GET_CFM,
            Self::MgtSetReq => MGT_SET_REQ,
            Self::MgtSetCfm => MGT_SET_CFM,
            Self::MgtEventInd => MGT_EVENT_IND,
            Self::FaultInd => FAULT_IND,
            Self::PacketReq => PACKET_REQ,
            Self::PacketCfm => PACKET_CFM,
            Self::PacketInd => PACKET_IND,
        }
    }

    /// Human-readable name for logs and diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Self::MgtGetReq => "MGT-GET.req",
            Self::MgtGetCfm => "MGT-GET.cfm",
            Self::MgtSetReq => "MGT-SET.req",
            Self::MgtSetCfm => "MGT-SET.cfm",
            Self::MgtEventInd => "MGT-EVENT.ind",
            Self::FaultInd => "FAULT.ind",
            Self::PacketReq => "PACKET.req",
            Self::PacketCfm => "PACKET.cfm",
            Self::PacketInd => "PACKET.ind",
        }
    }

    /// Number of data-reference descriptors this kind carries on the wire.
    pub fn data_ref_count(self) -> usize {
        match self {
            Self::FaultInd => 0,
            _ => 2,
        }
    }

    /// Fixed body size for this kind, in bytes.
    pub fn body_len(self) -> usize {
        match self {
            Self::FaultInd => 4,
            Self::PacketReq | Self::PacketCfm | Self::PacketInd => 12,
            _ => 8,
        }
    }

    /// True for the two kinds that carry a priority field.
    pub fn carries_priority(self) -> bool {
        matches!(self, Self::PacketReq | Self::PacketInd)
    }

    /// True for the two high-volume kinds whose bulk buffers are handed to
    /// the consumer rather than freed after dispatch. These are also the
    /// kinds excluded from the routing-0 broadcast.
    pub fn transfers_bulk(self) -> bool {
        matches!(self, Self::PacketInd | Self::PacketCfm)
    }

    /// True if the body starts with a status word.
    pub fn has_status(self) -> bool {
        matches!(
            self,
            Self::MgtGetCfm | Self::MgtSetCfm | Self::PacketCfm | Self::PacketInd
        )
    }

    /// True for the data-plane kinds.
    pub fn is_packet(self) -> bool {
        matches!(self, Self::PacketReq | Self::PacketCfm | Self::PacketInd)
    }

    /// True for reply kinds that complete a blocking request.
    pub fn is_confirm(self) -> bool {
        matches!(self, Self::MgtGetCfm | Self::MgtSetCfm | Self::PacketCfm)
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One 4-byte data-reference descriptor: a bulk slot and its payload length.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataRef {
    pub slot: u16,
    pub length: u16,
}

impl DataRef {
    /// Build the descriptor list for a kind's slot count from the payloads
    /// actually present in `bulk`. Empty slots get length 0.
    pub fn describing(bulk: &BulkSet, count: usize) -> Vec<DataRef> {
        (0..count)
            .map(|slot| DataRef {
                slot: slot as u16,
                length: bulk.get(slot).map_or(0, |payload| payload.len() as u16),
            })
            .collect()
    }
}

/// A peer station address carried in packet signal bodies.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PeerAddress(pub [u8; 6]);

impl fmt::Debug for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One decoded HIP signal.
///
/// Body layouts are fixed per kind:
/// - management kinds (8 bytes): `{status_or_tag:u16, attribute:u16, value:u32}`
/// - packet kinds (12 bytes): `{status:u16, priority:u16, peer:[u8;6], flags:u16}`
/// - fault indication (4 bytes): `{fault_code:u32}`
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub kind: SignalKind,
    pub routing: u16,
    pub sender: u16,
    pub refs: Vec<DataRef>,
    pub body: Bytes,
}

impl Signal {
    /// A signal of `kind` with zeroed routing, sender, references, and body.
    pub fn new(kind: SignalKind) -> Self {
        Self {
            kind,
            routing: 0,
            sender: 0,
            refs: vec![DataRef::default(); kind.data_ref_count()],
            body: Bytes::from(vec![0u8; kind.body_len()]),
        }
    }

    /// Set the routing id.
    pub fn with_routing(mut self, routing: u16) -> Self {
        self.routing = routing;
        self
    }

    /// Set the sender id.
    pub fn with_sender(mut self, sender: u16) -> Self {
        self.sender = sender;
        self
    }

    /// Replace the body. Length is validated at encode time.
    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// Fill the data references from the payloads present in `bulk`.
    pub fn describing(mut self, bulk: &BulkSet) -> Self {
        self.refs = DataRef::describing(bulk, self.kind.data_ref_count());
        self
    }

    /// A fault indication carrying `code`, addressed to routing 0.
    pub fn fault_ind(code: u32) -> Self {
        Self::new(SignalKind::FaultInd).with_body(Bytes::copy_from_slice(&code.to_le_bytes()))
    }

    /// The status word, for kinds whose body starts with one.
    pub fn status(&self) -> Option<u16> {
        if self.kind.has_status() && self.body.len() >= 2 {
            Some(u16::from_le_bytes([self.body[0], self.body[1]]))
        } else {
            None
        }
    }

    /// The priority field, for the two kinds that carry one.
    pub fn priority(&self) -> Option<u16> {
        if self.kind.carries_priority() && self.body.len() >= 4 {
            Some(u16::from_le_bytes([self.body[2], self.body[3]]))
        } else {
            None
        }
    }

    /// The peer station address, for packet kinds.
    pub fn peer_address(&self) -> Option<PeerAddress> {
        if self.kind.is_packet() && self.body.len() >= 10 {
            let mut addr = [0u8; 6];
            addr.copy_from_slice(&self.body[4..10]);
            Some(PeerAddress(addr))
        } else {
            None
        }
    }

    /// The fault code of a fault indication.
    pub fn fault_code(&self) -> Option<u32> {
        if self.kind == SignalKind::FaultInd && self.body.len() >= 4 {
            Some(u32::from_le_bytes([
                self.body[0],
                self.body[1],
                self.body[2],
                self.body[3],
            ]))
        } else {
            None
        }
    }
}

/// Build a management-kind body.
pub fn mgt_body(status_or_tag: u16, attribute: u16, value: u32) -> Bytes {
    let mut body = BytesMut::with_capacity(8);
    body.put_u16_le(status_or_tag);
    body.put_u16_le(attribute);
    body.put_u32_le(value);
    body.freeze()
}

/// Build a packet-kind body.
pub fn packet_body(status: u16, priority: u16, peer: PeerAddress, flags: u16) -> Bytes {
    let mut body = BytesMut::with_capacity(12);
    body.put_u16_le(status);
    body.put_u16_le(priority);
    body.put_slice(&peer.0);
    body.put_u16_le(flags);
    body.freeze()
}

/// The sender id assigned to a client slot.
///
/// Sender ids are unique per slot and invertible with [`slot_for_routing`],
/// so replies addressed by a device echoing the sender route straight back
/// to the originating client.
pub fn sender_id_for_slot(slot: usize) -> u16 {
    SENDER_ID_BASE | ((slot as u16) << SENDER_ID_SHIFT)
}

/// The client slot a routing id addresses, if it carries the sender base.
///
/// Routing 0 (the broadcast destination) carries no base bits and resolves
/// to no slot.
pub fn slot_for_routing(routing: u16) -> Option<usize> {
    if routing & SENDER_ID_BASE != SENDER_ID_BASE {
        return None;
    }
    Some(((routing & !SENDER_ID_BASE) >> SENDER_ID_SHIFT) as usize)
}
