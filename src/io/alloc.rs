// io/alloc.rs
//
// Partition allocation backends. The serial backend hands the next
// partition the current end-of-segment offset. The parallel backend is
// a master/client message protocol: clients send (size, domain) and
// receive (partition id, offset); the master linearizes reservations
// against its own allocations, counts one close per client, and only
// then may the footer be written. The master polls opportunistically
// via `update()`, on every local allocation, and while closing.

use std::sync::mpsc::{channel, Receiver, Sender};

use tracing::{debug, trace};

use crate::error::BinIdxError;
use crate::io::file::{DomainMapping, PartitionId};

/// Size of the segment-offsets header: two u64 offsets.
pub const HEADER_SIZE: u64 = 16;

/// The authoritative footer image: npart+1 partition offsets (the last
/// entry is the end of the segment) and the per-partition domains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FooterState {
    pub partition_offsets: Vec<u64>,
    pub domains: Vec<DomainMapping>,
}

impl Default for FooterState {
    fn default() -> Self {
        FooterState {
            partition_offsets: vec![HEADER_SIZE],
            domains: Vec::new(),
        }
    }
}

impl FooterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_partitions(&self) -> u64 {
        self.domains.len() as u64
    }

    pub fn end_offset(&self) -> u64 {
        *self
            .partition_offsets
            .last()
            .unwrap_or_else(|| unreachable!("offsets always hold the end sentinel"))
    }

    /// Reserve `[end, end + size)` for the next partition.
    pub fn allocate(&mut self, size: u64, domain: DomainMapping) -> (PartitionId, u64) {
        let id = self.num_partitions();
        let offset = self.end_offset();
        self.partition_offsets.push(offset + size);
        self.domains.push(domain);
        (id, offset)
    }
}

/// Single-writer allocation: a thin wrapper keeping the footer state.
#[derive(Debug, Default)]
pub struct SerialAllocator {
    footer: FooterState,
}

impl SerialAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, size: u64, domain: DomainMapping) -> (PartitionId, u64) {
        self.footer.allocate(size, domain)
    }

    pub fn footer(&self) -> &FooterState {
        &self.footer
    }

    pub fn into_footer(self) -> FooterState {
        self.footer
    }
}

enum AllocMsg {
    Allocate {
        size: u64,
        domain: DomainMapping,
        reply: Sender<(PartitionId, u64)>,
    },
    Close,
}

/// The allocator rank. Owns the footer; processes client messages
/// between (and during) its own allocations.
pub struct MasterAllocator {
    footer: FooterState,
    rx: Receiver<AllocMsg>,
    num_clients: usize,
    closed_clients: usize,
}

/// A non-master writer's handle to the allocator rank.
#[derive(Clone)]
pub struct ClientAllocator {
    tx: Sender<AllocMsg>,
}

impl MasterAllocator {
    /// Create the master plus one client handle per non-master writer.
    pub fn new(num_clients: usize) -> (MasterAllocator, Vec<ClientAllocator>) {
        let (tx, rx) = channel();
        let clients = (0..num_clients)
            .map(|_| ClientAllocator { tx: tx.clone() })
            .collect();
        (
            MasterAllocator {
                footer: FooterState::new(),
                rx,
                num_clients,
                closed_clients: 0,
            },
            clients,
        )
    }

    /// Drain any pending client messages without blocking.
    pub fn update(&mut self) {
        while let Ok(msg) = self.rx.try_recv() {
            self.process(msg);
        }
    }

    fn process(&mut self, msg: AllocMsg) {
        match msg {
            AllocMsg::Allocate {
                size,
                domain,
                reply,
            } => {
                let (id, offset) = self.footer.allocate(size, domain);
                trace!(partition = id, offset, size, "allocated for client");
                // A client that disappeared before its reply is a local
                // failure on its side; the reservation stands.
                let _ = reply.send((id, offset));
            }
            AllocMsg::Close => {
                self.closed_clients += 1;
                trace!(closed = self.closed_clients, "client closed");
            }
        }
    }

    /// Allocate for the master's own partition, processing pending
    /// client messages opportunistically.
    pub fn allocate(&mut self, size: u64, domain: DomainMapping) -> (PartitionId, u64) {
        let out = self.footer.allocate(size, domain);
        self.update();
        out
    }

    /// Complete the protocol: block until every client has sent its
    /// close, then hand back the footer for writing. A hung client
    /// blocks here indefinitely.
    pub fn close(mut self) -> Result<FooterState, BinIdxError> {
        while self.closed_clients < self.num_clients {
            let msg = self.rx.recv().map_err(|_| {
                BinIdxError::StringError("allocator client channel closed before close".into())
            })?;
            self.process(msg);
        }
        debug!(
            partitions = self.footer.num_partitions(),
            "allocator finalized"
        );
        Ok(self.footer)
    }
}

impl ClientAllocator {
    /// Synchronous send-then-receive allocation request.
    pub fn allocate(
        &self,
        size: u64,
        domain: DomainMapping,
    ) -> Result<(PartitionId, u64), BinIdxError> {
        let (reply_tx, reply_rx) = channel();
        self.tx
            .send(AllocMsg::Allocate {
                size,
                domain,
                reply: reply_tx,
            })
            .map_err(|_| BinIdxError::StringError("allocator master is gone".into()))?;
        reply_rx
            .recv()
            .map_err(|_| BinIdxError::StringError("allocator master dropped the reply".into()))
    }

    /// Signal this writer will make no further allocations.
    pub fn close(self) -> Result<(), BinIdxError> {
        self.tx
            .send(AllocMsg::Close)
            .map_err(|_| BinIdxError::StringError("allocator master is gone".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dm(offset: u64, length: u64) -> DomainMapping {
        DomainMapping { offset, length }
    }

    #[test]
    fn test_serial_allocation_is_dense_and_increasing() {
        let mut alloc = SerialAllocator::new();
        let (id0, off0) = alloc.allocate(100, dm(0, 10));
        let (id1, off1) = alloc.allocate(50, dm(10, 10));
        assert_eq!((id0, off0), (0, HEADER_SIZE));
        assert_eq!((id1, off1), (1, HEADER_SIZE + 100));
        assert_eq!(alloc.footer().end_offset(), HEADER_SIZE + 150);
        assert_eq!(alloc.footer().num_partitions(), 2);
    }

    #[test]
    fn test_master_client_protocol() {
        let (mut master, clients) = MasterAllocator::new(2);
        let c0 = clients[0].clone();
        let c1 = clients[1].clone();

        let h0 = std::thread::spawn(move || {
            let out = c0.allocate(64, dm(0, 8)).unwrap();
            c0.close().unwrap();
            out
        });
        let h1 = std::thread::spawn(move || {
            let out = c1.allocate(32, dm(8, 8)).unwrap();
            c1.close().unwrap();
            out
        });

        // The master allocates for itself while serving clients.
        let (_mid, _moff) = master.allocate(16, dm(16, 8));
        let footer = master.close().unwrap();
        let (id0, off0) = h0.join().unwrap();
        let (id1, off1) = h1.join().unwrap();

        assert_eq!(footer.num_partitions(), 3);
        // Ids are dense and offsets strictly increasing in commit order.
        let mut ids = vec![id0, id1];
        ids.sort_unstable();
        assert!(ids.iter().all(|&i| i < 3));
        assert_ne!(off0, off1);
        assert!(footer.partition_offsets.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_close_waits_for_all_clients() {
        let (master, clients) = MasterAllocator::new(1);
        let client = clients.into_iter().next().unwrap();
        let h = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            client.close().unwrap();
        });
        // Blocks until the client closes.
        let footer = master.close().unwrap();
        assert_eq!(footer.num_partitions(), 0);
        h.join().unwrap();
    }
}
