//! CAN frame encode/decode.

use crate::types::Pid;

/// A classified inbound CAN frame payload.
#[derive(Clone, Debug, PartialEq)]
pub enum ClassifiedFrame<'a> {
    /// A complete single-frame response.
    Single {
        frame_bytes: usize,
        response_service: u8,
        response_pid: Pid,
        data: &'a [u8],
    },
    /// The first frame of a multi-frame response.
    First {
        frame_bytes: usize,
        response_service: u8,
        response_pid: Pid,
        data: &'a [u8],
    },
    /// A consecutive frame continuing multi-frame assembly. The sequence
    /// index is informational; decode is tolerant (no gap/order
    /// validation).
    Consecutive { data: &'a [u8] },
    /// PCI byte not recognized; the frame is silently dropped.
    Unknown,
}

/// Encode the outgoing single-frame diagnostic query for `service`/`pid`
/// into `buf`.
pub fn encode_query(service: u8, pid: Pid, buf: &mut [u8; 8]) {
    match pid {
        Pid::Short(p) => {
            buf[0] = 0x02;
            buf[1] = service;
            buf[2] = p;
            buf[3..].fill(0);
        }
        Pid::Long(p) => {
            buf[0] = 0x03;
            buf[1] = service;
            buf[2] = (p >> 8) as u8;
            buf[3] = (p & 0xFF) as u8;
            buf[4..].fill(0);
        }
    }
}

/// Flow-control frame (continue-to-send, block size 0, separation time 0).
#[must_use]
pub fn flow_control_frame() -> [u8; 8] {
    [0x30, 0, 0, 0, 0, 0, 0, 0]
}

/// Classify an inbound CAN frame payload by its PCI byte.
///
/// `extended` indicates whether the inbound frame used a 29-bit ID, which
/// selects 8-bit vs. 16-bit PID width.
#[must_use]
pub fn classify_frame(payload: &[u8], extended: bool) -> ClassifiedFrame<'_> {
    let Some(&pci) = payload.first() else {
        return ClassifiedFrame::Unknown;
    };
    match pci {
        0x00..=0x07 => {
            let Some(&sid_plus) = payload.get(1) else {
                return ClassifiedFrame::Unknown;
            };
            let response_service = sid_plus.wrapping_sub(0x40);
            let frame_bytes = pci as usize;
            if extended {
                if payload.len() < 4 {
                    return ClassifiedFrame::Unknown;
                }
                let pid = Pid::Long(u16::from_be_bytes([payload[2], payload[3]]));
                ClassifiedFrame::Single {
                    frame_bytes,
                    response_service,
                    response_pid: pid,
                    data: &payload[4..],
                }
            } else {
                if payload.len() < 3 {
                    return ClassifiedFrame::Unknown;
                }
                let pid = Pid::Short(payload[2]);
                ClassifiedFrame::Single {
                    frame_bytes,
                    response_service,
                    response_pid: pid,
                    data: &payload[3..],
                }
            }
        }
        0x10 => {
            let Some(&frame_bytes) = payload.get(1) else {
                return ClassifiedFrame::Unknown;
            };
            let Some(&sid_plus) = payload.get(2) else {
                return ClassifiedFrame::Unknown;
            };
            let response_service = sid_plus.wrapping_sub(0x40);
            if extended {
                if payload.len() < 5 {
                    return ClassifiedFrame::Unknown;
                }
                let pid = Pid::Long(u16::from_be_bytes([payload[3], payload[4]]));
                ClassifiedFrame::First {
                    frame_bytes: frame_bytes as usize,
                    response_service,
                    response_pid: pid,
                    data: &payload[5..],
                }
            } else {
                if payload.len() < 4 {
                    return ClassifiedFrame::Unknown;
                }
                let pid = Pid::Short(payload[3]);
                ClassifiedFrame::First {
                    frame_bytes: frame_bytes as usize,
                    response_service,
                    response_pid: pid,
                    data: &payload[4..],
                }
            }
        }
        0x21..=0x2F => ClassifiedFrame::Consecutive { data: &payload[1..] },
        _ => ClassifiedFrame::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_encode_query_short_pid() {
        let mut buf = [0u8; 8];
        encode_query(0x01, Pid::Short(0x0C), &mut buf);
        assert_eq!(buf, [0x02, 0x01, 0x0C, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_encode_query_long_pid() {
        let mut buf = [0u8; 8];
        encode_query(0x22, Pid::Long(0x1003), &mut buf);
        assert_eq!(buf, [0x03, 0x22, 0x10, 0x03, 0, 0, 0, 0]);
    }

    #[test]
    fn test_flow_control_frame() {
        assert_eq!(flow_control_frame(), [0x30, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_classify_single_frame_short_pid() {
        // S1: engine RPM single-frame response
        let payload = [0x04, 0x41, 0x0C, 0x1A, 0xF8, 0x00, 0x00, 0x00];
        let classified = classify_frame(&payload, false);
        assert_eq!(
            classified,
            ClassifiedFrame::Single {
                frame_bytes: 0x04,
                response_service: 0x01,
                response_pid: Pid::Short(0x0C),
                data: &[0x1A, 0xF8, 0x00, 0x00, 0x00],
            }
        );
    }

    #[test]
    fn test_classify_single_frame_long_pid() {
        // S3: extended 29-bit PID single-frame response
        let payload = [0x04, 0x62, 0x10, 0x03, 0xAB, 0, 0, 0];
        let classified = classify_frame(&payload, true);
        assert_eq!(
            classified,
            ClassifiedFrame::Single {
                frame_bytes: 0x04,
                response_service: 0x22,
                response_pid: Pid::Long(0x1003),
                data: &[0xAB, 0, 0, 0],
            }
        );
    }

    #[test]
    fn test_classify_first_frame() {
        let payload = [0x10, 0x13, 0x49, 0x02, 0x01, 0x00, 0x00, 0x00];
        let classified = classify_frame(&payload, false);
        assert_eq!(
            classified,
            ClassifiedFrame::First {
                frame_bytes: 0x13,
                response_service: 0x09,
                response_pid: Pid::Short(0x02),
                data: &[0x01, 0x00, 0x00, 0x00],
            }
        );
    }

    #[test]
    fn test_classify_consecutive_frame() {
        let payload = [0x21, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77];
        let classified = classify_frame(&payload, false);
        assert_eq!(
            classified,
            ClassifiedFrame::Consecutive {
                data: &[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77]
            }
        );
    }

    #[test]
    fn test_classify_unknown_pci() {
        let payload = [0x40, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(classify_frame(&payload, false), ClassifiedFrame::Unknown);
    }

    #[test]
    fn test_classify_empty_payload() {
        assert_eq!(classify_frame(&[], false), ClassifiedFrame::Unknown);
    }
}
