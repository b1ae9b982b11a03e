//! Expedited SDO frame codec
//!
//! Only master-initiated expedited transfers are modeled: an upload-initiate request to read an
//! object, and width-typed download-initiate requests to write one. Normal and segmented transfers
//! are out of scope.

use crate::messages::{CanId, CanMessage};
use crate::node_id::NodeId;

/// Base COB-ID for SDO requests; a node's request channel is `0x600 + node_id`
pub const SDO_REQUEST_BASE: u16 = 0x600;
/// Base COB-ID for SDO responses; a node's response channel is `0x580 + node_id`
pub const SDO_RESPONSE_BASE: u16 = 0x580;

/// Command byte for an upload (read) initiate request
const CMD_UPLOAD: u8 = 0x40;
/// Command byte for an expedited download of 4 data bytes
const CMD_DOWNLOAD_4: u8 = 0x23;
/// Command byte for an expedited download of 2 data bytes
const CMD_DOWNLOAD_2: u8 = 0x2B;
/// Command byte for an expedited download of 1 data byte
const CMD_DOWNLOAD_1: u8 = 0x2F;

/// An object dictionary address: a 16-bit index plus an 8-bit sub-index
///
/// Used both to build outgoing SDO requests and as the lookup key for routing inbound SDO
/// responses. The index and sub-index are carried in bytes 1-3 of every initiate frame, index
/// little-endian first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    /// The object index
    pub index: u16,
    /// The object sub index
    pub sub: u8,
}

impl ObjectKey {
    /// Create a new ObjectKey
    pub const fn new(index: u16, sub: u8) -> Self {
        Self { index, sub }
    }

    /// Parse the object key echoed in bytes 1-3 of an SDO response payload
    ///
    /// Returns None if the payload is too short to carry one.
    pub fn from_response_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 4 {
            return None;
        }
        let index = u16::from_le_bytes([data[1], data[2]]);
        Some(Self::new(index, data[3]))
    }
}

impl core::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#06x}sub{}", self.index, self.sub)
    }
}

/// A value for an expedited SDO download, tagged with its wire width
///
/// The width determines the command byte and frame length: 4 data bytes are sent with command
/// 0x23 in an 8 byte frame, 2 bytes with 0x2B in 6, and 1 byte with 0x2F in 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadValue {
    /// An 8-bit unsigned value
    U8(u8),
    /// A 16-bit unsigned value
    U16(u16),
    /// A 32-bit unsigned value
    U32(u32),
    /// A 32-bit signed value
    I32(i32),
}

impl From<u8> for DownloadValue {
    fn from(value: u8) -> Self {
        DownloadValue::U8(value)
    }
}

impl From<u16> for DownloadValue {
    fn from(value: u16) -> Self {
        DownloadValue::U16(value)
    }
}

impl From<u32> for DownloadValue {
    fn from(value: u32) -> Self {
        DownloadValue::U32(value)
    }
}

impl From<i32> for DownloadValue {
    fn from(value: i32) -> Self {
        DownloadValue::I32(value)
    }
}

fn request_cob_id(node: NodeId) -> CanId {
    CanId::Std(SDO_REQUEST_BASE + node.raw() as u16)
}

/// Build an upload (read) request for an object on a node's SDO server
pub fn upload_request(node: NodeId, key: ObjectKey) -> CanMessage {
    let [idx_lo, idx_hi] = key.index.to_le_bytes();
    CanMessage::new(
        request_cob_id(node),
        &[CMD_UPLOAD, idx_lo, idx_hi, key.sub],
    )
}

/// Build an expedited download (write) request for an object on a node's SDO server
pub fn download_request(node: NodeId, key: ObjectKey, value: DownloadValue) -> CanMessage {
    let [idx_lo, idx_hi] = key.index.to_le_bytes();
    let mut buf = [0u8; 8];
    buf[1] = idx_lo;
    buf[2] = idx_hi;
    buf[3] = key.sub;
    let len = match value {
        DownloadValue::U8(v) => {
            buf[0] = CMD_DOWNLOAD_1;
            buf[4] = v;
            5
        }
        DownloadValue::U16(v) => {
            buf[0] = CMD_DOWNLOAD_2;
            buf[4..6].copy_from_slice(&v.to_le_bytes());
            6
        }
        DownloadValue::U32(v) => {
            buf[0] = CMD_DOWNLOAD_4;
            buf[4..8].copy_from_slice(&v.to_le_bytes());
            8
        }
        DownloadValue::I32(v) => {
            buf[0] = CMD_DOWNLOAD_4;
            buf[4..8].copy_from_slice(&v.to_le_bytes());
            8
        }
    };
    CanMessage::new(request_cob_id(node), &buf[..len])
}
