//! Capability traits the engine needs from its host.
//!
//! The engine is generic over these (Design Note 9.3) rather than boxing
//! them as trait objects, so a resource-constrained target pays no
//! dynamic-dispatch cost and the core stays `no_std`-friendly.

/// The CAN controller capability the engine drives.
///
/// Mirrors the `beginPacket`/`write`/`endPacket`/`parsePacket`/`read`
/// surface common to embedded CAN controller libraries.
pub trait CanTransport {
    fn set_pins(&mut self, rx: u8, tx: u8);

    /// Initialize the controller at the given baud rate. `false` means
    /// initialization failed.
    fn begin(&mut self, baudrate: u32) -> bool;

    fn begin_packet(&mut self, id: u16, dlc: u8);
    fn begin_extended_packet(&mut self, id: u32, dlc: u8);
    fn write(&mut self, byte: u8);
    fn end_packet(&mut self) -> bool;

    /// Poll for a pending packet. Returns the packet size, or 0 if none.
    fn parse_packet(&mut self) -> usize;
    fn available(&self) -> usize;
    fn read(&mut self) -> Option<u8>;

    fn packet_id(&self) -> u32;
    fn packet_extended(&self) -> bool;
    fn packet_rtr(&self) -> bool;
    fn packet_dlc(&self) -> u8;
}

/// The serial byte-stream capability used to reach an ELM327 adapter.
pub trait ByteStream {
    fn available(&self) -> usize;
    fn read(&mut self) -> Option<u8>;
    fn write_str(&mut self, s: &str);
}

/// A monotonic millisecond clock.
pub trait Clock {
    fn now_millis(&self) -> u64;
}
