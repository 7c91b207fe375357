//! Outbound event broadcaster
//!
//! Optional publish-only UDP socket mirroring engine events (ticks, bars,
//! trades, orders, equity, account) to external subscribers. Publishing is
//! strictly non-blocking: a full socket buffer or any send error drops the
//! message and bumps a counter, never raising into the engine. Only
//! `start` failures propagate, at resource-setup time.
//!
//! All payload fields are little-endian, prefixed with a one-byte topic.

use std::net::UdpSocket;
use thiserror::Error;
use tracing::debug;

/// Broadcaster errors (startup only; sends never fail outward)
#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("broadcaster failed to start: {0}")]
    Startup(#[from] std::io::Error),
}

/// Message topic tags.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Tick = 0,
    Bar = 1,
    Trade = 2,
    Order = 3,
    Equity = 4,
    Margin = 5,
    Position = 6,
    Account = 7,
}

/// Non-blocking UDP publisher with send statistics.
#[derive(Debug)]
pub struct UdpBroadcaster {
    target: String,
    socket: Option<UdpSocket>,
    messages_sent: u64,
    messages_dropped: u64,
    bytes_sent: u64,
}

impl UdpBroadcaster {
    /// Create a broadcaster towards `target` (e.g. `127.0.0.1:5555`).
    /// The socket opens on `start`.
    pub fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            socket: None,
            messages_sent: 0,
            messages_dropped: 0,
            bytes_sent: 0,
        }
    }

    /// Bind an ephemeral socket, connect it to the target and switch to
    /// non-blocking mode. Startup failures propagate.
    pub fn start(&mut self) -> Result<(), BroadcastError> {
        if self.socket.is_some() {
            return Ok(());
        }
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(&self.target)?;
        socket.set_nonblocking(true)?;
        debug!(target = %self.target, "broadcaster started");
        self.socket = Some(socket);
        self.messages_sent = 0;
        self.messages_dropped = 0;
        self.bytes_sent = 0;
        Ok(())
    }

    pub fn stop(&mut self) {
        self.socket = None;
    }

    pub fn is_running(&self) -> bool {
        self.socket.is_some()
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
    }

    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// TICK: topic(1) symbol_id(4) ts(8) bid(8) ask(8) = 29 bytes.
    pub fn publish_tick(&mut self, symbol_id: u32, timestamp_us: i64, bid: i64, ask: i64) {
        let mut buf = [0u8; 29];
        buf[0] = Topic::Tick as u8;
        buf[1..5].copy_from_slice(&symbol_id.to_le_bytes());
        buf[5..13].copy_from_slice(&timestamp_us.to_le_bytes());
        buf[13..21].copy_from_slice(&bid.to_le_bytes());
        buf[21..29].copy_from_slice(&ask.to_le_bytes());
        self.send(&buf);
    }

    /// BAR: topic(1) symbol_id(4) timeframe(2) ts(8) O(8) H(8) L(8) C(8)
    /// volume(8) = 55 bytes.
    #[allow(clippy::too_many_arguments)]
    pub fn publish_bar(
        &mut self,
        symbol_id: u32,
        timeframe: u16,
        timestamp_us: i64,
        open: i64,
        high: i64,
        low: i64,
        close: i64,
        volume: i64,
    ) {
        let mut buf = [0u8; 55];
        buf[0] = Topic::Bar as u8;
        buf[1..5].copy_from_slice(&symbol_id.to_le_bytes());
        buf[5..7].copy_from_slice(&timeframe.to_le_bytes());
        buf[7..15].copy_from_slice(&timestamp_us.to_le_bytes());
        buf[15..23].copy_from_slice(&open.to_le_bytes());
        buf[23..31].copy_from_slice(&high.to_le_bytes());
        buf[31..39].copy_from_slice(&low.to_le_bytes());
        buf[39..47].copy_from_slice(&close.to_le_bytes());
        buf[47..55].copy_from_slice(&volume.to_le_bytes());
        self.send(&buf);
    }

    /// TRADE: topic(1) ticket(8) symbol_id(4) ts(8) volume(f64, 8)
    /// price(f64, 8) profit(8) = 45 bytes.
    pub fn publish_trade(
        &mut self,
        ticket: u64,
        symbol_id: u32,
        timestamp_us: i64,
        volume: f64,
        price: f64,
        profit: i64,
    ) {
        let mut buf = [0u8; 45];
        buf[0] = Topic::Trade as u8;
        buf[1..9].copy_from_slice(&ticket.to_le_bytes());
        buf[9..13].copy_from_slice(&symbol_id.to_le_bytes());
        buf[13..21].copy_from_slice(&timestamp_us.to_le_bytes());
        buf[21..29].copy_from_slice(&volume.to_le_bytes());
        buf[29..37].copy_from_slice(&price.to_le_bytes());
        buf[37..45].copy_from_slice(&profit.to_le_bytes());
        self.send(&buf);
    }

    /// ORDER: topic(1) ticket(8) symbol_id(4) ts(8) type(1) volume(f64, 8)
    /// price(f64, 8) = 38 bytes.
    pub fn publish_order(
        &mut self,
        ticket: u64,
        symbol_id: u32,
        timestamp_us: i64,
        order_type: u8,
        volume: f64,
        price: f64,
    ) {
        let mut buf = [0u8; 38];
        buf[0] = Topic::Order as u8;
        buf[1..9].copy_from_slice(&ticket.to_le_bytes());
        buf[9..13].copy_from_slice(&symbol_id.to_le_bytes());
        buf[13..21].copy_from_slice(&timestamp_us.to_le_bytes());
        buf[21] = order_type;
        buf[22..30].copy_from_slice(&volume.to_le_bytes());
        buf[30..38].copy_from_slice(&price.to_le_bytes());
        self.send(&buf);
    }

    /// EQUITY: topic(1) ts(8) balance(8) equity(8) margin(8)
    /// margin_free(8) = 41 bytes.
    pub fn publish_equity(
        &mut self,
        timestamp_us: i64,
        balance: i64,
        equity: i64,
        margin: i64,
        margin_free: i64,
    ) {
        let mut buf = [0u8; 41];
        buf[0] = Topic::Equity as u8;
        buf[1..9].copy_from_slice(&timestamp_us.to_le_bytes());
        buf[9..17].copy_from_slice(&balance.to_le_bytes());
        buf[17..25].copy_from_slice(&equity.to_le_bytes());
        buf[25..33].copy_from_slice(&margin.to_le_bytes());
        buf[33..41].copy_from_slice(&margin_free.to_le_bytes());
        self.send(&buf);
    }

    /// ACCOUNT: topic(1) ts(8) balance(8) equity(8) profit(8)
    /// margin_level(f64, 8) = 41 bytes.
    pub fn publish_account(
        &mut self,
        timestamp_us: i64,
        balance: i64,
        equity: i64,
        profit: i64,
        margin_level: f64,
    ) {
        let mut buf = [0u8; 41];
        buf[0] = Topic::Account as u8;
        buf[1..9].copy_from_slice(&timestamp_us.to_le_bytes());
        buf[9..17].copy_from_slice(&balance.to_le_bytes());
        buf[17..25].copy_from_slice(&equity.to_le_bytes());
        buf[25..33].copy_from_slice(&profit.to_le_bytes());
        buf[33..41].copy_from_slice(&margin_level.to_le_bytes());
        self.send(&buf);
    }

    fn send(&mut self, buf: &[u8]) {
        let Some(socket) = self.socket.as_ref() else {
            return;
        };
        match socket.send(buf) {
            Ok(n) => {
                self.messages_sent += 1;
                self.bytes_sent += n as u64;
            }
            Err(_) => {
                // Dropped messages are acceptable; only count them
                self.messages_dropped += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket as StdUdpSocket;
    use std::time::Duration;

    fn receiver() -> (StdUdpSocket, String) {
        let socket = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        let addr = socket.local_addr().unwrap().to_string();
        (socket, addr)
    }

    #[test]
    fn test_tick_wire_layout() {
        let (rx, addr) = receiver();
        let mut b = UdpBroadcaster::new(&addr);
        b.start().unwrap();

        b.publish_tick(7, 1_000_000, 110_000, 110_015);
        assert_eq!(b.messages_sent(), 1);
        assert_eq!(b.bytes_sent(), 29);

        let mut buf = [0u8; 64];
        let n = rx.recv(&mut buf).unwrap();
        assert_eq!(n, 29);
        assert_eq!(buf[0], Topic::Tick as u8);
        assert_eq!(u32::from_le_bytes(buf[1..5].try_into().unwrap()), 7);
        assert_eq!(i64::from_le_bytes(buf[5..13].try_into().unwrap()), 1_000_000);
        assert_eq!(i64::from_le_bytes(buf[13..21].try_into().unwrap()), 110_000);
        assert_eq!(i64::from_le_bytes(buf[21..29].try_into().unwrap()), 110_015);
    }

    #[test]
    fn test_bar_and_trade_sizes() {
        let (rx, addr) = receiver();
        let mut b = UdpBroadcaster::new(&addr);
        b.start().unwrap();

        b.publish_bar(1, 60, 0, 1, 2, 3, 4, 100);
        b.publish_trade(1000, 1, 0, 0.1, 1.10015, 8_500_000);
        b.publish_order(1001, 1, 0, 2, 0.1, 1.09000);
        b.publish_equity(0, 1, 2, 3, 4);
        b.publish_account(0, 1, 2, 3, 150.0);

        let mut sizes = Vec::new();
        let mut buf = [0u8; 128];
        for _ in 0..5 {
            sizes.push(rx.recv(&mut buf).unwrap());
        }
        assert_eq!(sizes, vec![55, 45, 38, 41, 41]);
        assert_eq!(b.messages_sent(), 5);
    }

    #[test]
    fn test_trade_payload_fields() {
        let (rx, addr) = receiver();
        let mut b = UdpBroadcaster::new(&addr);
        b.start().unwrap();

        b.publish_trade(1000, 3, 2_000_000, 0.1, 1.10015, 8_500_000);
        let mut buf = [0u8; 64];
        rx.recv(&mut buf).unwrap();
        assert_eq!(buf[0], Topic::Trade as u8);
        assert_eq!(u64::from_le_bytes(buf[1..9].try_into().unwrap()), 1000);
        assert_eq!(u32::from_le_bytes(buf[9..13].try_into().unwrap()), 3);
        assert_eq!(f64::from_le_bytes(buf[21..29].try_into().unwrap()), 0.1);
        assert_eq!(f64::from_le_bytes(buf[29..37].try_into().unwrap()), 1.10015);
        assert_eq!(
            i64::from_le_bytes(buf[37..45].try_into().unwrap()),
            8_500_000
        );
    }

    #[test]
    fn test_publish_before_start_is_silent() {
        let mut b = UdpBroadcaster::new("127.0.0.1:1");
        b.publish_tick(1, 0, 1, 2);
        assert_eq!(b.messages_sent(), 0);
        assert_eq!(b.messages_dropped(), 0);
    }

    #[test]
    fn test_stop_and_restart() {
        let (_rx, addr) = receiver();
        let mut b = UdpBroadcaster::new(&addr);
        b.start().unwrap();
        assert!(b.is_running());
        b.stop();
        assert!(!b.is_running());
        b.start().unwrap();
        assert!(b.is_running());
    }
}
