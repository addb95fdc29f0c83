//! The request/response lifecycle state machine (spec.md §4.1).
//!
//! `Engine<T, S, C>` is generic over its CAN transport, byte stream, and
//! clock so it never needs dynamic dispatch or heap allocation on its hot
//! path (Design Note 9.3). A single request is outstanding at a time; the
//! caller drives the engine forward with repeated calls to [`Engine::process`]
//! and, for CAN frames arriving out of band, [`Engine::on_receive_packet`].

use crate::decode::decode_value;
use crate::elm::{self, ElmSentinel};
use crate::frame::{self, ClassifiedFrame};
use crate::filter::FilterSet;
use crate::request::{Request, ResponseBuffer, Status};
use crate::transport::{ByteStream, CanTransport, Clock};
use crate::types::{CanId, Pid};
use crate::{broadcast::BroadcastPacket, config::EngineConfig};

/// The dual-transport OBD-II request engine.
pub struct Engine<T: CanTransport, S: ByteStream, C: Clock> {
    transport: T,
    clock: C,
    config: EngineConfig,

    status: Status,
    current_request: Option<Request>,
    response: ResponseBuffer,
    broadcast_packet: BroadcastPacket,

    packet_filters: FilterSet,
    broadcast_filters: FilterSet,

    send_request_time_ms: u64,

    listener: Option<Box<dyn FnMut(&Request, f32, &[u8])>>,

    elm_stream: Option<S>,
    is_elm: bool,
    elm_buffer: String,
}

impl<T: CanTransport, S: ByteStream, C: Clock> Engine<T, S, C> {
    #[must_use]
    pub fn new(transport: T, clock: C, config: EngineConfig) -> Self {
        Self {
            transport,
            clock,
            config,
            status: Status::Undefined,
            current_request: None,
            response: ResponseBuffer::default(),
            broadcast_packet: BroadcastPacket::default(),
            packet_filters: FilterSet::new(),
            broadcast_filters: FilterSet::new(),
            send_request_time_ms: 0,
            listener: None,
            elm_stream: None,
            is_elm: false,
            elm_buffer: String::new(),
        }
    }

    /// Initialize the raw CAN transport at the configured baud rate.
    pub fn begin(&mut self, tx_pin: u8, rx_pin: u8) -> eyre::Result<()> {
        self.transport.set_pins(rx_pin, tx_pin);
        if !self.transport.begin(self.config.baudrate) {
            eyre::bail!("CAN transport failed to initialize at {} baud", self.config.baudrate);
        }
        self.status = Status::Ready;
        tracing::debug!(baudrate = self.config.baudrate, "CAN transport initialized");
        Ok(())
    }

    /// Switch to the ELM327 dialect over `stream`, running the `AT D`/`AT
    /// Z` init sequence.
    pub fn begin_elm327(&mut self, stream: S, timeout_ms: u64) -> eyre::Result<()> {
        self.is_elm = true;
        self.elm_stream = Some(stream);
        self.config.request_timeout_ms = timeout_ms;
        self.status = Status::Ready;
        tracing::debug!(timeout_ms, "initializing ELM327 adapter");

        let defaults_ok = self.send_elm_command_blocking("AT D");
        if !defaults_ok {
            eyre::bail!("ELM327 'AT D' (defaults) command failed");
        }
        let reset_ok = self.send_elm_command_blocking("AT Z");
        if !reset_ok {
            eyre::bail!("ELM327 'AT Z' (reset) command failed");
        }
        Ok(())
    }

    #[must_use]
    pub fn is_elm327(&self) -> bool {
        self.is_elm
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.status
    }

    pub fn add_packet_filter(&mut self, id: CanId) -> bool {
        self.packet_filters.add(id)
    }

    pub fn add_broadcast_filter(&mut self, id: CanId) -> bool {
        self.broadcast_filters.add(id)
    }

    pub fn on_handle_value<F>(&mut self, listener: F)
    where
        F: FnMut(&Request, f32, &[u8]) + 'static,
    {
        self.listener = Some(Box::new(listener));
    }

    /// Reset to `Ready`, discarding any in-flight request. Idempotent:
    /// calling this from `Ready` has no observable effect.
    pub fn flush(&mut self) {
        self.current_request = None;
        self.response.clear();
        self.status = Status::Ready;
    }

    /// Enqueue `request`. Returns `false` (no state change) unless the
    /// engine is `Ready`.
    pub fn send_request(&mut self, request: Request) -> bool {
        if self.status != Status::Ready {
            return false;
        }
        if self.is_elm {
            return self.send_elm_request(request);
        }

        // Drain stale inbound bytes before transmitting, so a frame left
        // over from a previous exchange can never be misread as this
        // request's response.
        while self.transport.available() > 0 && self.transport.read().is_some() {}
        self.response.clear();

        let mut buf = [0u8; 8];
        frame::encode_query(request.service, request.pid, &mut buf);
        if request.pid.is_long() {
            self.transport.begin_extended_packet(request.header.raw(), 8);
        } else {
            self.transport.begin_packet(request.header.raw() as u16, 8);
        }
        for &b in buf.iter() {
            self.transport.write(b);
        }
        self.transport.end_packet();

        self.status = Status::Sending;
        self.send_request_time_ms = self.clock.now_millis();
        self.current_request = Some(request);
        true
    }

    /// Advance the state machine by one tick. Must be called repeatedly by
    /// the host.
    pub fn process(&mut self) -> Status {
        match self.status {
            Status::Sending => {
                if !self.is_elm {
                    let size = self.transport.parse_packet();
                    if size > 0 {
                        self.on_receive_packet(size);
                    }
                }
                if self.status == Status::Sending {
                    self.check_overall_timeout();
                }
            }
            Status::Handling => {
                self.check_overall_timeout();
                if self.status == Status::Handling {
                    if self.is_elm {
                        self.poll_elm_response();
                    } else {
                        self.advance_can_response();
                    }
                }
            }
            Status::Received => {
                self.dispatch_and_finish(|engine| engine.get_value());
            }
            Status::Timeout | Status::NoData | Status::Error => {
                let elapsed = self.clock.now_millis().saturating_sub(self.send_request_time_ms);
                if elapsed > self.config.request_timeout_ms {
                    self.dispatch_and_finish(|_| 0.0);
                }
            }
            Status::Ready | Status::Undefined => {}
        }
        self.status
    }

    /// Decoded value of the current response under the current request's
    /// scale/offset, or `0.0` if no request is outstanding.
    #[must_use]
    pub fn get_value(&self) -> f32 {
        match &self.current_request {
            Some(request) => {
                let n = (request.expected_bytes as usize).min(self.response.data().len());
                decode_value(&self.response.data()[..n], request.scale, request.offset)
            }
            None => 0.0,
        }
    }

    #[must_use]
    pub fn get_response_byte(&self, index: usize) -> u8 {
        self.response.byte(index)
    }

    #[must_use]
    pub fn get_response_bytes(&self) -> &[u8] {
        self.response.data()
    }

    #[must_use]
    pub fn get_response_service(&self) -> u8 {
        self.response.response_service
    }

    #[must_use]
    pub fn get_response_pid(&self) -> Pid {
        self.response.response_pid
    }

    #[must_use]
    pub fn get_broadcast_packet(&self) -> BroadcastPacket {
        self.broadcast_packet
    }

    /// Handle an inbound CAN frame the transport has already parsed.
    /// Intended to be called from the host's interrupt vector, but may
    /// equally be called after polling [`CanTransport::parse_packet`].
    pub fn on_receive_packet(&mut self, packet_size: usize) {
        let packet_id = CanId::new(self.transport.packet_id());

        if !self.broadcast_filters.is_empty() && self.broadcast_filters.contains(packet_id) {
            self.handle_broadcast_packet(packet_id);
            return;
        }
        if !self.packet_filters.accepts(packet_id) {
            return;
        }
        if self.transport.packet_rtr() {
            return;
        }
        if packet_size == 0 {
            return;
        }

        let extended = self.transport.packet_extended();
        let mut scratch = [0u8; 8];
        let mut n = 0usize;
        let limit = packet_size.min(scratch.len());
        while n < limit {
            match self.transport.read() {
                Some(byte) => {
                    scratch[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        let payload = &scratch[..n];

        match frame::classify_frame(payload, extended) {
            ClassifiedFrame::Single {
                frame_bytes,
                response_service,
                response_pid,
                data,
            } => {
                self.response.clear();
                self.response.response_service = response_service;
                self.response.response_pid = response_pid;
                self.response.frame_bytes = frame_bytes;
                self.response.read_bytes = if extended { 3 } else { 2 };
                self.response.multi_frame = false;
                self.response.push_data(data);
                self.status = Status::Handling;
            }
            ClassifiedFrame::First {
                frame_bytes,
                response_service,
                response_pid,
                data,
            } => {
                self.response.clear();
                self.response.response_service = response_service;
                self.response.response_pid = response_pid;
                self.response.frame_bytes = frame_bytes;
                self.response.read_bytes = if extended { 3 } else { 2 };
                self.response.multi_frame = true;
                self.response.push_data(data);
                self.status = Status::Handling;
            }
            ClassifiedFrame::Consecutive { data } => {
                if self.response.multi_frame {
                    self.response.push_data(data);
                    self.status = Status::Handling;
                }
            }
            ClassifiedFrame::Unknown => {}
        }
    }

    fn handle_broadcast_packet(&mut self, packet_id: CanId) {
        let mut scratch = [0u8; 8];
        let mut n = 0usize;
        while self.transport.available() > 0 && n < scratch.len() {
            match self.transport.read() {
                Some(byte) => {
                    scratch[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        self.broadcast_packet = BroadcastPacket::snapshot(packet_id, scratch);
        tracing::trace!(id = ?packet_id, "broadcast packet captured");
    }

    fn check_overall_timeout(&mut self) {
        let elapsed = self.clock.now_millis().saturating_sub(self.send_request_time_ms);
        if elapsed > self.config.request_timeout_ms {
            self.send_request_time_ms = self.clock.now_millis();
            self.status = Status::Timeout;
            tracing::warn!("request timed out waiting for response");
        }
    }

    fn advance_can_response(&mut self) {
        let Some(request) = &self.current_request else {
            self.status = Status::NoData;
            return;
        };
        if self.response.response_service != request.service || self.response.response_pid != request.pid {
            self.status = Status::NoData;
            return;
        }
        if self.response.is_complete() {
            self.status = Status::Received;
            return;
        }
        if self.response.multi_frame {
            let elapsed = self.clock.now_millis().saturating_sub(self.send_request_time_ms);
            if elapsed > self.config.consecutive_frame_timeout_ms {
                self.send_request_time_ms = self.clock.now_millis();
                let header = request.header;
                self.emit_flow_control(header);
                self.status = Status::Sending;
            }
        }
    }

    fn emit_flow_control(&mut self, target: CanId) {
        self.transport.begin_extended_packet(target.raw(), 8);
        for &b in frame::flow_control_frame().iter() {
            self.transport.write(b);
        }
        self.transport.end_packet();
        tracing::trace!(id = ?target, "flow control re-sent");
    }

    fn dispatch_and_finish(&mut self, value_fn: impl FnOnce(&Self) -> f32) {
        let value = value_fn(self);
        if let Some(request) = self.current_request.take() {
            if let Some(listener) = self.listener.as_mut() {
                listener(&request, value, self.response.data());
            }
        }
        self.response.clear();
        self.status = Status::Ready;
    }

    // --- ELM327 dialect ---

    fn send_elm_request(&mut self, request: Request) -> bool {
        self.response.clear();
        let query = elm::encode_elm_query(request.service, request.pid, request.expected_bytes);
        self.write_elm_command(&query);

        self.current_request = Some(request);
        self.status = Status::Handling;
        self.send_request_time_ms = self.clock.now_millis();
        true
    }

    fn write_elm_command(&mut self, cmd: &str) {
        self.elm_buffer.clear();
        if let Some(stream) = self.elm_stream.as_mut() {
            while stream.available() > 0 && stream.read().is_some() {}
            stream.write_str(cmd);
            stream.write_str("\r");
        }
    }

    /// Send a raw command to the ELM327 adapter without waiting for a
    /// response.
    pub fn send_elm_command(&mut self, cmd: &str) {
        if self.status != Status::Ready {
            return;
        }
        self.current_request = None;
        self.write_elm_command(cmd);
        self.send_request_time_ms = self.clock.now_millis();
        self.status = Status::Handling;
    }

    /// Send a raw command and block (from the caller's perspective, busy-loop
    /// poll) until the adapter's `>` prompt or an overall timeout.
    pub fn send_elm_command_blocking(&mut self, cmd: &str) -> bool {
        if self.status != Status::Ready {
            return false;
        }
        self.send_elm_command(cmd);
        loop {
            self.check_overall_timeout();
            if self.status != Status::Handling {
                break;
            }
            if self.poll_elm_response() {
                break;
            }
        }
        let ok = self.status == Status::Received;
        self.status = Status::Ready;
        ok
    }

    /// Set the ELM327 adapter's CAN header, truncating 29-bit headers to
    /// their final six hex digits.
    pub fn send_elm_header(&mut self, id: CanId) {
        if self.status != Status::Ready {
            return;
        }
        let cmd = elm::encode_header_command(id);
        self.send_elm_command_blocking(&cmd);
    }

    /// Read and classify one byte from the ELM stream. Returns `true` once
    /// the response block is fully decoded (including error/timeout paths),
    /// `false` if more bytes are still expected.
    fn poll_elm_response(&mut self) -> bool {
        if self.status != Status::Handling {
            self.status = Status::NoData;
            return true;
        }
        let Some(stream) = self.elm_stream.as_mut() else {
            self.status = Status::NoData;
            return true;
        };
        if stream.available() == 0 {
            return false;
        }
        let Some(byte) = stream.read() else {
            return false;
        };
        let ch = byte as char;
        if ch == '>' {
            // fall through to decode below
        } else if !ch.is_ascii_alphanumeric() && ch != ':' && ch != '.' {
            return false;
        } else {
            self.elm_buffer.push(ch);
            return false;
        }

        self.finish_elm_decode();
        true
    }

    fn finish_elm_decode(&mut self) {
        let raw = core::mem::take(&mut self.elm_buffer);

        // A raw AT command (no outstanding diagnostic request) has nothing
        // to correlate against: the `>` terminator alone means it completed
        // successfully, matching the original's `_currentRequest != NULL`
        // guard around the decode/correlate body.
        let mut status = match &self.current_request {
            None => Status::Received,
            Some(request) => {
                let pid_is_long = request.pid.is_long();
                match elm::decode_response_block(&raw, pid_is_long) {
                    Some(d) if d.response_service == request.service && d.response_pid == request.pid => {
                        self.response.clear();
                        self.response.response_service = d.response_service;
                        self.response.response_pid = d.response_pid;
                        self.response.multi_frame = d.multi_frame;
                        self.response.frame_bytes = d.data.len();
                        self.response.push_data(&d.data);
                        Status::Received
                    }
                    _ => Status::NoData,
                }
            }
        };

        if let Some(sentinel) = elm::find_sentinel(&raw) {
            status = match sentinel {
                ElmSentinel::UnableToConnect | ElmSentinel::Stopped | ElmSentinel::Error => Status::Error,
                ElmSentinel::NoData => Status::NoData,
            };
            tracing::warn!(?sentinel, "ELM327 reported an error sentinel");
        }

        self.status = status;
    }
}
