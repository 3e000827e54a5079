//! The per-connection control block and its state transitions.

use std::collections::{BTreeMap, VecDeque};

use bytes::Bytes;
use sim_packet::{ByteQueue, TcpFlags};

use crate::congestion::CongestionControl;
use crate::rto::RtoEstimator;
use crate::seq::{Seq, SeqRange};
use crate::timers::{Dependencies, TimerKind};
use crate::{DEFAULT_BUFFER_CAPACITY, DEFAULT_RECEIVE_WINDOW, INITIAL_RTO, TIME_WAIT_DURATION};

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum TcpState {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

impl TcpState {
    pub fn is_synchronized(&self) -> bool {
        !matches!(self, TcpState::Closed | TcpState::Listen | TcpState::SynSent)
    }
}

/// A segment as seen by the wire, stripped of addressing (ports/IPs are the socket layer's
/// concern, not the state machine's).
#[derive(Clone, Debug)]
pub struct IncomingSegment {
    pub seq: Seq,
    pub ack: Seq,
    pub flags: TcpFlags,
    pub window: u16,
    pub payload: Bytes,
    pub mss: Option<u16>,
    pub window_scale: Option<u8>,
}

#[derive(Clone, Debug)]
pub struct OutgoingSegment {
    pub seq: Seq,
    pub ack: Seq,
    pub flags: TcpFlags,
    pub window: u16,
    pub payload: Bytes,
    pub mss: Option<u16>,
    pub window_scale: Option<u8>,
}

/// Notable things that happened while processing a call, surfaced to the socket layer so it can
/// wake blocked readers/writers and update epoll readiness (§4.12).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Event {
    Readable,
    Writable,
    PeerClosedWriting,
    ConnectionEstablished,
    ConnectionReset,
    ConnectionClosed,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ConnectionError {
    /// The connection was reset, or the peer's FIN already fully closed this direction.
    NotConnected,
    InvalidForState(TcpState),
}

#[derive(Copy, Clone, Eq, PartialEq)]
enum SegmentKind {
    Data,
    Syn,
    Fin,
}

struct UnackedSegment {
    range: SeqRange,
    payload: Bytes,
    kind: SegmentKind,
    sent_at: sim_time::SimulationTime,
    retransmitted: bool,
}

/// The TCP control block. Call sites own an instance per connection and drive it by calling
/// [`Connection::on_segment`] for every arriving segment and [`Connection::on_retransmission_timer`]
/// / [`Connection::on_delayed_ack_timer`] / [`Connection::on_time_wait_timer`] when the
/// corresponding [`TimerKind`] fires.
pub struct Connection {
    state: TcpState,
    mss: u16,

    iss: Seq,
    irs: Seq,

    snd_una: Seq,
    snd_nxt: Seq,
    snd_wnd: u32,
    snd_wl1: Seq,
    snd_wl2: Seq,

    rcv_nxt: Seq,
    rcv_wnd: u32,

    send_queue: ByteQueue,
    unacked: VecDeque<UnackedSegment>,
    recv_ready: ByteQueue,
    reorder: BTreeMap<u32, Bytes>,

    cc: CongestionControl,
    rto: RtoEstimator,

    fin_requested: bool,
    fin_seq: Option<Seq>,
    peer_fin_seq: Option<Seq>,

    delayed_ack_pending: bool,
    reset: bool,
}

impl Connection {
    fn new(state: TcpState, mss: u16) -> Self {
        Self {
            state,
            mss,
            iss: Seq::ZERO,
            irs: Seq::ZERO,
            snd_una: Seq::ZERO,
            snd_nxt: Seq::ZERO,
            snd_wnd: 0,
            snd_wl1: Seq::ZERO,
            snd_wl2: Seq::ZERO,
            rcv_nxt: Seq::ZERO,
            rcv_wnd: DEFAULT_RECEIVE_WINDOW,
            send_queue: ByteQueue::new(DEFAULT_BUFFER_CAPACITY),
            unacked: VecDeque::new(),
            recv_ready: ByteQueue::new(DEFAULT_BUFFER_CAPACITY),
            reorder: BTreeMap::new(),
            cc: CongestionControl::new(),
            rto: RtoEstimator::new(INITIAL_RTO),
            fin_requested: false,
            fin_seq: None,
            peer_fin_seq: None,
            delayed_ack_pending: false,
            reset: false,
        }
    }

    /// A passively-opened socket waiting for a `SYN` (`listen()`).
    pub fn listen(mss: u16) -> Self {
        Self::new(TcpState::Listen, mss)
    }

    /// A fresh, unconnected control block, as `socket(AF_INET, SOCK_STREAM, 0)` returns before
    /// either `connect()` or `listen()` is called.
    pub fn new_closed(mss: u16) -> Self {
        Self::new(TcpState::Closed, mss)
    }

    /// Bytes currently buffered and ready for the application to `read()`.
    pub fn readable_bytes(&self) -> usize {
        self.recv_ready.len()
    }

    /// Begin an active open: fixes the initial sequence number at zero (deterministic, per the
    /// implementation's pinned constants) and returns the `SYN` to send.
    pub fn open(&mut self, deps: &mut impl Dependencies) -> OutgoingSegment {
        debug_assert_eq!(self.state, TcpState::Closed);
        self.state = TcpState::SynSent;
        self.iss = Seq::ZERO;
        self.snd_una = self.iss;
        self.snd_nxt = self.iss + 1;
        self.unacked.push_back(UnackedSegment {
            range: SeqRange::new(self.iss, 1),
            payload: Bytes::new(),
            kind: SegmentKind::Syn,
            sent_at: deps.now(),
            retransmitted: false,
        });
        deps.arm_timer(TimerKind::Retransmission, self.rto.current());
        OutgoingSegment {
            seq: self.iss,
            ack: Seq::ZERO,
            flags: TcpFlags::SYN,
            window: self.rcv_wnd as u16,
            payload: Bytes::new(),
            mss: Some(self.mss),
            window_scale: Some(0),
        }
    }

    pub fn state(&self) -> TcpState {
        self.state
    }

    /// Current congestion window, in segments. Exposed read-only for callers (and tests) that
    /// need to observe congestion-avoidance behavior (§8 Scenario B: "cwnd halves at least once").
    pub fn cwnd_segments(&self) -> f64 {
        self.cc.cwnd_segments()
    }

    /// Force this (otherwise unconnected) control block straight to `Established`, bypassing the
    /// handshake. Used only for `socketpair()`, where two endpoints are wired directly together
    /// with no wire between them to carry a `SYN` (§4.5).
    pub fn force_established(&mut self) {
        self.state = TcpState::Established;
        self.snd_wnd = DEFAULT_RECEIVE_WINDOW;
    }

    /// Force a reset without a peer `RST` segment: used when a connection's consecutive
    /// retransmit count exceeds the socket layer's configured ceiling (§7 "Retransmit timeout
    /// exceeded a configured maximum"). Equivalent in effect to receiving `RST`.
    pub fn force_reset(&mut self, deps: &mut impl Dependencies) -> Event {
        self.reset = true;
        self.state = TcpState::Closed;
        deps.cancel_timer(TimerKind::Retransmission);
        deps.cancel_timer(TimerKind::DelayedAck);
        Event::ConnectionReset
    }

    /// Queue application bytes for sending, returning how many were accepted (mirrors a `write`
    /// system call's short-write contract). Call [`Connection::send_ready_segments`] afterward to
    /// actually flush what the window allows.
    pub fn write(&mut self, data: Bytes) -> usize {
        self.send_queue.push(data)
    }

    /// How many bytes are currently outstanding (sent but unacknowledged or still queued).
    fn bytes_in_flight(&self) -> u32 {
        self.unacked.iter().map(|s| s.range.len).sum()
    }

    /// Build as many segments as the congestion and receive windows allow from the unsent queue.
    pub fn send_ready_segments(&mut self, deps: &mut impl Dependencies) -> Vec<OutgoingSegment> {
        if !self.state.is_synchronized() {
            return Vec::new();
        }
        let mut out = Vec::new();
        let cwnd_bytes = (self.cc.cwnd_segments() * self.mss as f64) as u32;
        loop {
            let window = cwnd_bytes.min(self.snd_wnd);
            let in_flight = self.bytes_in_flight();
            if in_flight >= window {
                break;
            }
            let room = (window - in_flight).min(self.mss as u32);
            if room == 0 || self.send_queue.is_empty() {
                break;
            }
            let chunk = self.send_queue.pop(room as usize);
            if chunk.is_empty() {
                break;
            }
            let seg_seq = self.snd_nxt;
            self.snd_nxt = self.snd_nxt + chunk.len() as u32;
            self.unacked.push_back(UnackedSegment {
                range: SeqRange::new(seg_seq, chunk.len() as u32),
                payload: chunk.clone(),
                kind: SegmentKind::Data,
                sent_at: deps.now(),
                retransmitted: false,
            });
            out.push(self.build_data_segment(seg_seq, chunk));
        }
        if self.send_queue.is_empty() && self.fin_requested && self.fin_seq.is_none() {
            out.push(self.queue_fin(deps));
        }
        if !out.is_empty() && self.unacked.iter().any(|s| !s.retransmitted) {
            deps.arm_timer(TimerKind::Retransmission, self.rto.current());
        }
        out
    }

    fn build_data_segment(&self, seq: Seq, payload: Bytes) -> OutgoingSegment {
        OutgoingSegment {
            seq,
            ack: self.rcv_nxt,
            flags: TcpFlags::ACK,
            window: self.rcv_wnd.min(u16::MAX as u32) as u16,
            payload,
            mss: None,
            window_scale: None,
        }
    }

    fn queue_fin(&mut self, deps: &mut impl Dependencies) -> OutgoingSegment {
        let seq = self.snd_nxt;
        self.snd_nxt = self.snd_nxt + 1;
        self.fin_seq = Some(seq);
        self.unacked.push_back(UnackedSegment {
            range: SeqRange::new(seq, 1),
            payload: Bytes::new(),
            kind: SegmentKind::Fin,
            sent_at: deps.now(),
            retransmitted: false,
        });
        OutgoingSegment {
            seq,
            ack: self.rcv_nxt,
            flags: TcpFlags::FIN | TcpFlags::ACK,
            window: self.rcv_wnd.min(u16::MAX as u32) as u16,
            payload: Bytes::new(),
            mss: None,
            window_scale: None,
        }
    }

    /// The application called `close()`: send remaining buffered data, then a `FIN`.
    pub fn close(&mut self, deps: &mut impl Dependencies) -> Vec<OutgoingSegment> {
        self.fin_requested = true;
        match self.state {
            TcpState::Established => self.state = TcpState::FinWait1,
            TcpState::CloseWait => self.state = TcpState::LastAck,
            _ => {}
        }
        self.send_ready_segments(deps)
    }

    pub fn read(&mut self, max: usize) -> Bytes {
        self.recv_ready.pop(max)
    }

    pub fn is_reset(&self) -> bool {
        self.reset
    }

    /// Process one arriving segment, returning the segments to transmit in reply and any events
    /// the socket layer should react to.
    pub fn on_segment(
        &mut self,
        deps: &mut impl Dependencies,
        seg: IncomingSegment,
    ) -> (Vec<OutgoingSegment>, Vec<Event>) {
        let mut out = Vec::new();
        let mut events = Vec::new();

        if seg.flags.contains(TcpFlags::RST) {
            self.reset = true;
            self.state = TcpState::Closed;
            deps.cancel_timer(TimerKind::Retransmission);
            deps.cancel_timer(TimerKind::DelayedAck);
            events.push(Event::ConnectionReset);
            return (out, events);
        }

        match self.state {
            TcpState::Closed => {
                out.push(self.build_rst(seg.ack));
            }
            TcpState::Listen => {
                if seg.flags.contains(TcpFlags::SYN) {
                    self.irs = seg.seq;
                    self.rcv_nxt = seg.seq + 1;
                    self.iss = Seq::ZERO;
                    self.snd_una = self.iss;
                    self.snd_nxt = self.iss + 1;
                    self.snd_wnd = seg.window as u32;
                    self.snd_wl1 = seg.seq;
                    self.snd_wl2 = seg.ack;
                    self.state = TcpState::SynReceived;
                    out.push(OutgoingSegment {
                        seq: self.iss,
                        ack: self.rcv_nxt,
                        flags: TcpFlags::SYN | TcpFlags::ACK,
                        window: self.rcv_wnd as u16,
                        payload: Bytes::new(),
                        mss: Some(self.mss),
                        window_scale: Some(0),
                    });
                }
            }
            TcpState::SynSent => {
                if seg.flags.contains(TcpFlags::SYN) && seg.flags.contains(TcpFlags::ACK) {
                    if seg.ack == self.snd_nxt {
                        self.irs = seg.seq;
                        self.rcv_nxt = seg.seq + 1;
                        self.snd_una = seg.ack;
                        self.snd_wnd = seg.window as u32;
                        self.snd_wl1 = seg.seq;
                        self.snd_wl2 = seg.ack;
                        self.state = TcpState::Established;
                        out.push(self.build_ack());
                        events.push(Event::ConnectionEstablished);
                        events.push(Event::Writable);
                    }
                }
            }
            TcpState::SynReceived => {
                if seg.flags.contains(TcpFlags::ACK) && seg.ack == self.snd_nxt {
                    self.snd_una = seg.ack;
                    self.snd_wnd = seg.window as u32;
                    self.state = TcpState::Established;
                    events.push(Event::ConnectionEstablished);
                    events.push(Event::Writable);
                }
            }
            _ => {
                self.process_established(deps, &seg, &mut out, &mut events);
            }
        }

        (out, events)
    }

    fn build_ack(&self) -> OutgoingSegment {
        OutgoingSegment {
            seq: self.snd_nxt,
            ack: self.rcv_nxt,
            flags: TcpFlags::ACK,
            window: self.rcv_wnd.min(u16::MAX as u32) as u16,
            payload: Bytes::new(),
            mss: None,
            window_scale: None,
        }
    }

    fn build_rst(&self, seq: Seq) -> OutgoingSegment {
        OutgoingSegment {
            seq,
            ack: Seq::ZERO,
            flags: TcpFlags::RST,
            window: 0,
            payload: Bytes::new(),
            mss: None,
            window_scale: None,
        }
    }

    fn process_established(
        &mut self,
        deps: &mut impl Dependencies,
        seg: &IncomingSegment,
        out: &mut Vec<OutgoingSegment>,
        events: &mut Vec<Event>,
    ) {
        if seg.flags.contains(TcpFlags::ACK) {
            self.process_ack(deps, seg, out, events);
        }

        if !seg.payload.is_empty() {
            self.process_data(seg, events);
        }

        if seg.flags.contains(TcpFlags::FIN) {
            let fin_seq = seg.seq + seg.payload.len() as u32;
            if self.peer_fin_seq.is_none() && fin_seq == self.rcv_nxt {
                self.peer_fin_seq = Some(fin_seq);
                self.rcv_nxt = self.rcv_nxt + 1;
                events.push(Event::PeerClosedWriting);
                match self.state {
                    TcpState::Established => self.state = TcpState::CloseWait,
                    TcpState::FinWait1 => self.state = TcpState::Closing,
                    TcpState::FinWait2 => {
                        self.state = TcpState::TimeWait;
                        deps.arm_timer(TimerKind::TimeWait, TIME_WAIT_DURATION);
                    }
                    _ => {}
                }
            }
        }

        if !seg.payload.is_empty() || seg.flags.contains(TcpFlags::FIN) {
            out.push(self.schedule_ack(deps));
        }
    }

    fn process_ack(
        &mut self,
        deps: &mut impl Dependencies,
        seg: &IncomingSegment,
        out: &mut Vec<OutgoingSegment>,
        events: &mut Vec<Event>,
    ) {
        // ACK outside [snd_una, snd_nxt] acknowledges nothing we sent; ignore it.
        if seg.ack.distance_from(self.snd_una) < 0 || seg.ack.distance_from(self.snd_nxt) > 0 {
            return;
        }

        let newly_acked = seg.ack.distance_from(self.snd_una) > 0;

        if newly_acked {
            self.snd_una = seg.ack;
            let mut acked_data = false;
            while let Some(front) = self.unacked.front() {
                if front.range.end().distance_from(seg.ack) > 0 {
                    break;
                }
                let seg_ref = self.unacked.pop_front().unwrap();
                if !seg_ref.retransmitted {
                    self.rto.on_rtt_sample(deps.now().saturating_sub(seg_ref.sent_at));
                }
                if seg_ref.kind == SegmentKind::Data {
                    acked_data = true;
                }
            }
            self.cc.on_new_ack();
            if self.unacked.is_empty() {
                deps.cancel_timer(TimerKind::Retransmission);
            } else {
                deps.arm_timer(TimerKind::Retransmission, self.rto.current());
            }
            if acked_data {
                events.push(Event::Writable);
            }
            if let Some(fin_seq) = self.fin_seq {
                if seg.ack.distance_from(fin_seq + 1) >= 0 {
                    match self.state {
                        TcpState::FinWait1 => {
                            self.state = TcpState::FinWait2;
                        }
                        TcpState::Closing => {
                            self.state = TcpState::TimeWait;
                            deps.arm_timer(TimerKind::TimeWait, TIME_WAIT_DURATION);
                        }
                        TcpState::LastAck => {
                            self.state = TcpState::Closed;
                            events.push(Event::ConnectionClosed);
                        }
                        _ => {}
                    }
                }
            }
        } else if seg.payload.is_empty() && !seg.flags.contains(TcpFlags::SYN) {
            if self.cc.on_duplicate_ack() {
                let window = self.rcv_wnd.min(u16::MAX as u32) as u16;
                if let Some(front) = self.unacked.front_mut() {
                    front.retransmitted = true;
                    front.sent_at = deps.now();
                    out.push(OutgoingSegment {
                        seq: front.range.start,
                        ack: self.rcv_nxt,
                        flags: TcpFlags::ACK,
                        window,
                        payload: front.payload.clone(),
                        mss: None,
                        window_scale: None,
                    });
                }
            }
        }

        // window update rule (RFC 793 §3.7): only update `snd_wnd` from an ACK that is not older
        // than the last window update, or carries newer sequence/ack information.
        if seg.seq.distance_from(self.snd_wl1) > 0
            || (seg.seq == self.snd_wl1 && seg.ack.distance_from(self.snd_wl2) >= 0)
        {
            self.snd_wnd = seg.window as u32;
            self.snd_wl1 = seg.seq;
            self.snd_wl2 = seg.ack;
        }
    }

    fn process_data(&mut self, seg: &IncomingSegment, events: &mut Vec<Event>) {
        let window = SeqRange::new(self.rcv_nxt, self.rcv_wnd);
        let segment_range = SeqRange::new(seg.seq, seg.payload.len() as u32);
        let Some(trimmed) = segment_range.trim_to(window) else {
            return;
        };
        if trimmed.is_empty() {
            return;
        }
        let offset = trimmed.start.distance_from(seg.seq) as usize;
        let data = seg.payload.slice(offset..offset + trimmed.len as usize);

        if trimmed.start == self.rcv_nxt {
            self.recv_ready.push(data);
            self.rcv_nxt = self.rcv_nxt + trimmed.len;
            // pull any now-contiguous out-of-order segments out of the reorder buffer.
            while let Some((&next_seq, _)) = self.reorder.iter().next() {
                if next_seq != self.rcv_nxt.0 {
                    break;
                }
                let (_, chunk) = self.reorder.remove_entry(&next_seq).unwrap();
                self.recv_ready.push(chunk.clone());
                self.rcv_nxt = self.rcv_nxt + chunk.len() as u32;
            }
            events.push(Event::Readable);
        } else {
            self.reorder.insert(trimmed.start.0, data);
        }
    }

    /// At most one delayed ACK may be outstanding (§9): if one is already pending, folding a new
    /// arrival into it (rather than arming a second timer) is what "at most one" is read to mean
    /// here. The immediate ACK path (arriving data while none is pending) still fires right away
    /// only once the timer later expires, keeping a single fixed cadence.
    fn schedule_ack(&mut self, deps: &mut impl Dependencies) -> OutgoingSegment {
        if !self.delayed_ack_pending {
            self.delayed_ack_pending = true;
            deps.arm_timer(TimerKind::DelayedAck, crate::DELAYED_ACK_TIMEOUT);
        }
        self.build_ack()
    }

    /// The delayed-ACK timer fired: send the ACK now.
    pub fn on_delayed_ack_timer(&mut self) -> OutgoingSegment {
        self.delayed_ack_pending = false;
        self.build_ack()
    }

    /// The retransmission timer fired: resend the oldest unacknowledged segment and back off.
    pub fn on_retransmission_timer(&mut self, deps: &mut impl Dependencies) -> Option<OutgoingSegment> {
        self.rto.on_timeout();
        let snd_wnd_segments = self.snd_wnd as f64 / self.mss as f64;
        self.cc.on_retransmit_timeout(snd_wnd_segments);
        let seg = self.unacked.front_mut()?;
        seg.retransmitted = true;
        seg.sent_at = deps.now();
        deps.arm_timer(TimerKind::Retransmission, self.rto.current());
        let window = self.rcv_wnd.min(u16::MAX as u32) as u16;
        Some(match seg.kind {
            SegmentKind::Syn => OutgoingSegment {
                seq: seg.range.start,
                ack: Seq::ZERO,
                flags: TcpFlags::SYN,
                window,
                payload: Bytes::new(),
                mss: Some(self.mss),
                window_scale: Some(0),
            },
            SegmentKind::Fin => OutgoingSegment {
                seq: seg.range.start,
                ack: self.rcv_nxt,
                flags: TcpFlags::FIN | TcpFlags::ACK,
                window,
                payload: Bytes::new(),
                mss: None,
                window_scale: None,
            },
            SegmentKind::Data => OutgoingSegment {
                seq: seg.range.start,
                ack: self.rcv_nxt,
                flags: TcpFlags::ACK,
                window,
                payload: seg.payload.clone(),
                mss: None,
                window_scale: None,
            },
        })
    }

    /// TIME-WAIT's `2*MSL` timer fired: the connection is fully closed.
    pub fn on_time_wait_timer(&mut self) -> Event {
        self.state = TcpState::Closed;
        Event::ConnectionClosed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_time::SimulationTime;
    use std::cell::Cell;

    struct FakeClock {
        now: Cell<SimulationTime>,
        armed: Vec<(TimerKind, SimulationTime)>,
    }

    impl FakeClock {
        fn new() -> Self {
            Self {
                now: Cell::new(SimulationTime::ZERO),
                armed: Vec::new(),
            }
        }
    }

    impl Dependencies for FakeClock {
        fn now(&self) -> SimulationTime {
            self.now.get()
        }
        fn arm_timer(&mut self, kind: TimerKind, after: SimulationTime) {
            self.armed.push((kind, after));
        }
        fn cancel_timer(&mut self, _kind: TimerKind) {}
    }

    #[test]
    fn three_way_handshake_reaches_established() {
        let mut client = Connection::new(TcpState::Closed, 1460);
        let mut server = Connection::listen(1460);
        let mut deps = FakeClock::new();

        let syn = client.open(&mut deps);
        let (server_replies, _) = server.on_segment(
            &mut deps,
            IncomingSegment {
                seq: syn.seq,
                ack: syn.ack,
                flags: syn.flags,
                window: syn.window,
                payload: syn.payload,
                mss: syn.mss,
                window_scale: syn.window_scale,
            },
        );
        assert_eq!(server.state(), TcpState::SynReceived);
        let syn_ack = &server_replies[0];

        let (client_replies, client_events) = client.on_segment(
            &mut deps,
            IncomingSegment {
                seq: syn_ack.seq,
                ack: syn_ack.ack,
                flags: syn_ack.flags,
                window: syn_ack.window,
                payload: syn_ack.payload.clone(),
                mss: syn_ack.mss,
                window_scale: syn_ack.window_scale,
            },
        );
        assert_eq!(client.state(), TcpState::Established);
        assert!(client_events.contains(&Event::ConnectionEstablished));

        let ack = &client_replies[0];
        let (_, server_events) = server.on_segment(
            &mut deps,
            IncomingSegment {
                seq: ack.seq,
                ack: ack.ack,
                flags: ack.flags,
                window: ack.window,
                payload: ack.payload.clone(),
                mss: None,
                window_scale: None,
            },
        );
        assert_eq!(server.state(), TcpState::Established);
        assert!(server_events.contains(&Event::ConnectionEstablished));
    }

    #[test]
    fn out_of_order_segment_buffers_until_the_gap_fills() {
        let mut conn = Connection::new(TcpState::Established, 1460);
        conn.rcv_nxt = Seq::new(100);
        let mut deps = FakeClock::new();

        // second half of a 10-byte write arrives first.
        let (_, events) = conn.on_segment(
            &mut deps,
            IncomingSegment {
                seq: Seq::new(105),
                ack: Seq::ZERO,
                flags: TcpFlags::ACK,
                window: 1000,
                payload: Bytes::from_static(b"world"),
                mss: None,
                window_scale: None,
            },
        );
        assert!(events.is_empty());
        assert_eq!(conn.rcv_nxt, Seq::new(100));

        let (_, events) = conn.on_segment(
            &mut deps,
            IncomingSegment {
                seq: Seq::new(100),
                ack: Seq::ZERO,
                flags: TcpFlags::ACK,
                window: 1000,
                payload: Bytes::from_static(b"hello"),
                mss: None,
                window_scale: None,
            },
        );
        assert!(events.contains(&Event::Readable));
        assert_eq!(conn.rcv_nxt, Seq::new(110));
        assert_eq!(conn.read(100), Bytes::from_static(b"helloworld"));
    }

    #[test]
    fn rst_aborts_the_connection() {
        let mut conn = Connection::new(TcpState::Established, 1460);
        let mut deps = FakeClock::new();
        let (_, events) = conn.on_segment(
            &mut deps,
            IncomingSegment {
                seq: Seq::ZERO,
                ack: Seq::ZERO,
                flags: TcpFlags::RST,
                window: 0,
                payload: Bytes::new(),
                mss: None,
                window_scale: None,
            },
        );
        assert!(conn.is_reset());
        assert_eq!(conn.state(), TcpState::Closed);
        assert!(events.contains(&Event::ConnectionReset));
    }
}
