//! Test doubles for the register layer and the byte transport.

use std::collections::VecDeque;
use std::time::Duration;

use crate::command::Channel;
use crate::observer::TransferObserver;
use crate::pdi::PdiState;
use crate::registers::RegisterBank;
use crate::spi::ByteTransport;
use crate::transfer::TransferReport;

/// Output line levels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Level {
    pub clock: bool,
    pub select: bool,
    pub data_out: bool,
}

impl Level {
    pub const IDLE: Level = Level {
        clock: false,
        select: true,
        data_out: false,
    };
}

/// Data-out looped back into data-in through an 8-bit shift register:
/// every frame shifts in what the master drives and shifts out whatever
/// the previous complete frame carried. A send followed by a receive
/// therefore reads back the sent byte.
#[derive(Debug, Default)]
pub struct LoopbackRegisters {
    level: Level,
    shift_in: u8,
    shift_out: u8,
    last_frame: u8,
    frame_edges: u32,
    frame_bits: Vec<bool>,
    rising_edges: u64,
}

impl LoopbackRegisters {
    pub fn levels(&self) -> Level {
        self.level
    }

    /// Data-out levels sampled on each rising edge of the last frame.
    pub fn sampled_bits(&self) -> Vec<bool> {
        self.frame_bits.clone()
    }

    pub fn rising_edges(&self) -> u64 {
        self.rising_edges
    }
}

impl RegisterBank for LoopbackRegisters {
    fn set_clock(&mut self, high: bool) {
        let level = self.level;
        if high && !level.clock && !level.select {
            self.shift_in = (self.shift_in << 1) | level.data_out as u8;
            self.frame_bits.push(level.data_out);
            self.frame_edges += 1;
            self.rising_edges += 1;
        }
        self.level.clock = high;
    }

    fn set_select(&mut self, high: bool) {
        let was_high = self.level.select;
        if was_high && !high {
            self.frame_edges = 0;
            self.frame_bits.clear();
            self.shift_out = self.last_frame;
        } else if !was_high && high && self.frame_edges == 8 {
            self.last_frame = self.shift_in;
        }
        self.level.select = high;
    }

    fn set_data_out(&mut self, high: bool) {
        self.level.data_out = high;
    }

    fn data_in(&self) -> bool {
        match self.frame_edges {
            1..=8 => (self.shift_out >> (8 - self.frame_edges)) & 0x1 != 0,
            _ => false,
        }
    }
}

/// One byte moved over a [`ScriptedTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exchange {
    Sent(u8),
    Received(u8),
}

/// Byte transport that answers reads from a script and records everything.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    replies: VecDeque<u8>,
    fallback: Option<u8>,
    exchanges: Vec<Exchange>,
}

impl ScriptedTransport {
    pub fn new(replies: impl IntoIterator<Item = u8>) -> Self {
        ScriptedTransport {
            replies: replies.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Byte returned once the script runs out.
    pub fn then_repeat(mut self, byte: u8) -> Self {
        self.fallback = Some(byte);
        self
    }

    pub fn exchanges(&self) -> &[Exchange] {
        &self.exchanges
    }

    pub fn sent(&self) -> Vec<u8> {
        self.exchanges
            .iter()
            .filter_map(|e| match e {
                Exchange::Sent(b) => Some(*b),
                Exchange::Received(_) => None,
            })
            .collect()
    }

    pub fn receive_count(&self) -> usize {
        self.exchanges
            .iter()
            .filter(|e| matches!(e, Exchange::Received(_)))
            .count()
    }

    pub fn remaining(&self) -> usize {
        self.replies.len()
    }
}

impl ByteTransport for ScriptedTransport {
    fn send_byte(&mut self, byte: u8) {
        self.exchanges.push(Exchange::Sent(byte));
    }

    fn receive_byte(&mut self) -> u8 {
        let byte = match self.replies.pop_front().or(self.fallback) {
            Some(byte) => byte,
            None => panic!("scripted transport ran out of replies"),
        };
        self.exchanges.push(Exchange::Received(byte));
        byte
    }
}

/// Observer that keeps a tally of everything it is told.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub channels_sent: Vec<(Channel, usize)>,
    pub received_bytes: usize,
    pub states: Vec<PdiState>,
    pub readbacks: Vec<(Channel, usize)>,
    pub reports: Vec<TransferReport>,
}

impl TransferObserver for RecordingObserver {
    fn channel_sent(&mut self, channel: Channel, bytes: usize, _elapsed: Duration) {
        self.channels_sent.push((channel, bytes));
    }

    fn byte_received(&mut self, _byte: u8) {
        self.received_bytes += 1;
    }

    fn state_changed(&mut self, _from: PdiState, to: PdiState) {
        self.states.push(to);
    }

    fn channel_received(&mut self, channel: Channel, pixels: &[u8]) {
        self.readbacks.push((channel, pixels.len()));
    }

    fn transfer_complete(&mut self, report: &TransferReport) {
        self.reports.push(report.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_fallback() {
        let mut t = ScriptedTransport::new([1, 2]).then_repeat(9);
        assert_eq!(t.receive_byte(), 1);
        assert_eq!(t.receive_byte(), 2);
        assert_eq!(t.receive_byte(), 9);
        assert_eq!(t.receive_byte(), 9);
        t.send_byte(7);
        assert_eq!(t.sent(), vec![7]);
        assert_eq!(t.receive_count(), 4);
    }
}
