//! Broadcast sink: frames accepted by the broadcast filter table bypass the
//! request engine entirely and land here verbatim.

use crate::types::CanId;

/// The most recently observed broadcast-filtered frame.
///
/// `header` is `CanId::Standard(0)` until the first broadcast-filtered
/// frame arrives; there is no reserved arbitration ID 0 in this engine's
/// use, so it doubles as the "nothing captured yet" sentinel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BroadcastPacket {
    pub header: CanId,
    pub data: [u8; 8],
}

impl Default for BroadcastPacket {
    fn default() -> Self {
        Self {
            header: CanId::Standard(0),
            data: [0; 8],
        }
    }
}

impl BroadcastPacket {
    /// Snapshot `data` verbatim under `header`. Never interprets PCI bytes
    /// or touches request-engine state.
    #[must_use]
    pub fn snapshot(header: CanId, data: [u8; 8]) -> Self {
        Self { header, data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_copies_verbatim() {
        let packet = BroadcastPacket::snapshot(CanId::Standard(0x7DF), [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(packet.header, CanId::Standard(0x7DF));
        assert_eq!(packet.data, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_default_has_sentinel_header() {
        assert_eq!(BroadcastPacket::default().header, CanId::Standard(0));
    }
}
