//! A multi-rank transport for ranks sharing one OS process.
//!
//! Grounded on `timely_communication::allocator::process::Process`: every
//! rank gets a sending half to every other rank's inbox, built once up
//! front and handed out through `new_vector`, exactly as the teacher's
//! `Process::new_vector` does for its per-identifier typed channels. Here
//! there is only one logical channel per rank (carrying already-framed
//! `Envelope` bytes, §6) rather than one per dataflow edge, since routing
//! to a `(tt_id, slot)` happens after a message is received, not before.

use std::sync::mpsc::{channel, Receiver, Sender};

use super::TransportBuilder;

/// Builds one rank's `Process` transport.
pub struct ProcessBuilder {
    index: usize,
    peers: usize,
    senders: Vec<Sender<Vec<u8>>>,
    receiver: Receiver<Vec<u8>>,
}

impl TransportBuilder for ProcessBuilder {
    type Transport = Process;
    fn build(self) -> Process {
        Process { index: self.index, peers: self.peers, senders: self.senders, receiver: self.receiver }
    }
}

/// One rank's endpoint among several ranks sharing a process.
pub struct Process {
    index: usize,
    peers: usize,
    senders: Vec<Sender<Vec<u8>>>,
    receiver: Receiver<Vec<u8>>,
}

impl Process {
    /// Builds `peers` connected `ProcessBuilder`s, one per rank.
    pub fn new_vector(peers: usize) -> Vec<ProcessBuilder> {
        let mut senders = Vec::with_capacity(peers);
        let mut receivers = Vec::with_capacity(peers);
        for _ in 0..peers {
            let (send, recv) = channel();
            senders.push(send);
            receivers.push(recv);
        }

        receivers
            .into_iter()
            .enumerate()
            .map(|(index, receiver)| ProcessBuilder {
                index,
                peers,
                senders: senders.clone(),
                receiver,
            })
            .collect()
    }
}

impl super::Transport for Process {
    fn index(&self) -> usize { self.index }
    fn peers(&self) -> usize { self.peers }
    fn send(&self, target: usize, wire: Vec<u8>) {
        self.senders[target].send(wire).expect("peer rank's inbox disconnected");
    }
    fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.receiver.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::{Transport, TransportBuilder as _};

    #[test]
    fn ranks_can_message_each_other() {
        let builders = Process::new_vector(3);
        let mut ranks: Vec<Process> = builders.into_iter().map(|b| b.build()).collect();

        ranks[0].send(2, vec![0xAA]);
        ranks[1].send(2, vec![0xBB]);

        let mut received = vec![ranks[2].try_recv().unwrap(), ranks[2].try_recv().unwrap()];
        received.sort();
        assert_eq!(received, vec![vec![0xAA], vec![0xBB]]);
        assert_eq!(ranks[2].try_recv(), None);
    }

    #[test]
    fn loopback_to_self_is_allowed() {
        let mut ranks: Vec<Process> = Process::new_vector(2).into_iter().map(|b| b.build()).collect();
        ranks[0].send(0, vec![1, 2, 3]);
        assert_eq!(ranks[0].try_recv(), Some(vec![1, 2, 3]));
    }
}
