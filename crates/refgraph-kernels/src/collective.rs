//! Collective communication.
//!
//! Distributed ops talk to their peers through a [`Communicator`]. The
//! interpreter never assumes a transport; [`InProcessGroup`] wires a set of
//! ranks together inside one process, which is enough for tests and for
//! running several executables on threads.

use crate::error::{KernelError, Result};
use refgraph_core::{Element, TensorData};
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tracing::{debug, trace};

/// Element-wise reduction applied by [`Communicator::all_reduce`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReductionType {
    /// Sum over ranks
    #[default]
    Sum,
    /// Product over ranks
    Prod,
    /// Minimum over ranks
    Min,
    /// Maximum over ranks
    Max,
}

impl ReductionType {
    fn combine<T: Element>(self, a: T, b: T) -> T {
        match self {
            ReductionType::Sum => a.add(b),
            ReductionType::Prod => a.mul(b),
            ReductionType::Min => {
                if b < a {
                    b
                } else {
                    a
                }
            }
            ReductionType::Max => {
                if b > a {
                    b
                } else {
                    a
                }
            }
        }
    }
}

impl FromStr for ReductionType {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sum" => Ok(ReductionType::Sum),
            "prod" | "product" => Ok(ReductionType::Prod),
            "min" => Ok(ReductionType::Min),
            "max" => Ok(ReductionType::Max),
            other => Err(KernelError::invalid(format!("unknown reduction type '{other}'"))),
        }
    }
}

/// Transport used by distributed ops. Buffers are type-erased; `count`
/// is the number of leading elements that take part.
pub trait Communicator: Send + Sync {
    /// This process's rank.
    fn rank(&self) -> usize;

    /// Number of ranks in the group.
    fn size(&self) -> usize;

    /// Reduce `input` across all ranks and write the result to `output` on
    /// every rank.
    fn all_reduce(
        &self,
        input: &TensorData,
        output: &mut TensorData,
        count: usize,
        op: ReductionType,
    ) -> Result<()>;

    /// Replace `data` on every rank with the root's copy.
    fn broadcast(&self, data: &mut TensorData, count: usize, root: usize) -> Result<()>;

    /// Send `data` to rank `dest`.
    fn send(&self, data: &TensorData, count: usize, dest: usize) -> Result<()>;

    /// Receive into `data` from rank `src`.
    fn recv(&self, data: &mut TensorData, count: usize, src: usize) -> Result<()>;
}

/// Communicator for a single process group of one rank. Collectives copy
/// through; point-to-point calls have no peer and fail.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalCommunicator;

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_reduce(
        &self,
        input: &TensorData,
        output: &mut TensorData,
        count: usize,
        _op: ReductionType,
    ) -> Result<()> {
        output.copy_prefix_from(input, count)?;
        Ok(())
    }

    fn broadcast(&self, _data: &mut TensorData, _count: usize, root: usize) -> Result<()> {
        if root != 0 {
            return Err(KernelError::Communication(format!(
                "broadcast root {root} is outside a group of one"
            )));
        }
        Ok(())
    }

    fn send(&self, _data: &TensorData, _count: usize, dest: usize) -> Result<()> {
        Err(KernelError::Communication(format!(
            "no peer {dest} in a single-rank group"
        )))
    }

    fn recv(&self, _data: &mut TensorData, _count: usize, src: usize) -> Result<()> {
        Err(KernelError::Communication(format!(
            "no peer {src} in a single-rank group"
        )))
    }
}

macro_rules! reduce_variants {
    ($acc:expr, $other:expr, $count:expr, $op:expr; $($variant:ident),*) => {
        match ($acc, $other) {
            $((TensorData::$variant(acc), TensorData::$variant(other)) => {
                for (a, &b) in acc[..$count].iter_mut().zip(&other[..$count]) {
                    *a = $op.combine(*a, b);
                }
                Ok(())
            })*
            (acc, other) => Err(KernelError::Communication(format!(
                "cannot reduce {} with {}",
                acc.element_type(),
                other.element_type()
            ))),
        }
    };
}

fn reduce_into(
    acc: &mut TensorData,
    other: &TensorData,
    count: usize,
    op: ReductionType,
) -> Result<()> {
    if acc.len() < count || other.len() < count {
        return Err(KernelError::Communication(format!(
            "reduction over {count} elements exceeds a buffer"
        )));
    }
    reduce_variants!(acc, other, count, op; Boolean, I8, I16, I32, I64, U8, U16, U32, U64, F32, F64)
}

fn prefix(data: &TensorData, count: usize) -> TensorData {
    let mut message = data.clone();
    message.resize(count.min(data.len()));
    message
}

/// Traffic class of a message. Point-to-point and collective messages
/// between the same pair of ranks queue separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Channel {
    Point,
    Collective,
}

type MailboxKey = (usize, usize, Channel);

fn check_length(message: &TensorData, count: usize, src: usize) -> Result<()> {
    if message.len() < count {
        return Err(KernelError::Communication(format!(
            "expected {} elements from rank {}, got {}",
            count,
            src,
            message.len()
        )));
    }
    Ok(())
}

#[derive(Debug, Default)]
struct Mailboxes {
    queues: Mutex<HashMap<MailboxKey, VecDeque<TensorData>>>,
    arrived: Condvar,
}

/// One rank of an [`InProcessGroup`].
#[derive(Debug, Clone)]
pub struct InProcessCommunicator {
    rank: usize,
    size: usize,
    mailboxes: Arc<Mailboxes>,
    timeout: Duration,
}

/// Builds communicators for ranks that share one process.
#[derive(Debug)]
pub struct InProcessGroup;

impl InProcessGroup {
    /// Default time a receive waits for its peer.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// One communicator per rank, in rank order.
    pub fn new(size: usize) -> Vec<InProcessCommunicator> {
        Self::with_timeout(size, Self::DEFAULT_TIMEOUT)
    }

    /// Like [`InProcessGroup::new`] with a custom receive timeout.
    pub fn with_timeout(size: usize, timeout: Duration) -> Vec<InProcessCommunicator> {
        let mailboxes = Arc::new(Mailboxes::default());
        (0..size)
            .map(|rank| InProcessCommunicator {
                rank,
                size,
                mailboxes: Arc::clone(&mailboxes),
                timeout,
            })
            .collect()
    }
}

impl InProcessCommunicator {
    fn check_peer(&self, peer: usize) -> Result<()> {
        if peer >= self.size || peer == self.rank {
            return Err(KernelError::Communication(format!(
                "rank {} cannot address peer {} in a group of {}",
                self.rank, peer, self.size
            )));
        }
        Ok(())
    }

    fn post(&self, message: TensorData, dest: usize, channel: Channel) -> Result<()> {
        let mut queues = self
            .mailboxes
            .queues
            .lock()
            .map_err(|_| KernelError::Communication("mailbox lock poisoned".into()))?;
        queues.entry((self.rank, dest, channel)).or_default().push_back(message);
        self.mailboxes.arrived.notify_all();
        trace!(from = self.rank, to = dest, ?channel, "message posted");
        Ok(())
    }

    fn take(&self, src: usize, channel: Channel) -> Result<TensorData> {
        let key = (src, self.rank, channel);
        let mut queues = self
            .mailboxes
            .queues
            .lock()
            .map_err(|_| KernelError::Communication("mailbox lock poisoned".into()))?;
        loop {
            if let Some(message) = queues.get_mut(&key).and_then(VecDeque::pop_front) {
                return Ok(message);
            }
            let (guard, wait) = self
                .mailboxes
                .arrived
                .wait_timeout(queues, self.timeout)
                .map_err(|_| KernelError::Communication("mailbox lock poisoned".into()))?;
            queues = guard;
            if wait.timed_out() && queues.get(&key).map_or(true, VecDeque::is_empty) {
                return Err(KernelError::Communication(format!(
                    "rank {} timed out waiting for rank {}",
                    self.rank, src
                )));
            }
        }
    }
}

impl Communicator for InProcessCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn all_reduce(
        &self,
        input: &TensorData,
        output: &mut TensorData,
        count: usize,
        op: ReductionType,
    ) -> Result<()> {
        if self.rank == 0 {
            let mut acc = prefix(input, count);
            check_length(&acc, count, self.rank)?;
            for peer in 1..self.size {
                let message = self.take(peer, Channel::Collective)?;
                reduce_into(&mut acc, &message, count, op)?;
            }
            for peer in 1..self.size {
                self.post(acc.clone(), peer, Channel::Collective)?;
            }
            output.copy_prefix_from(&acc, count)?;
        } else {
            self.post(prefix(input, count), 0, Channel::Collective)?;
            let result = self.take(0, Channel::Collective)?;
            check_length(&result, count, 0)?;
            output.copy_prefix_from(&result, count)?;
        }
        debug!(rank = self.rank, count, ?op, "all-reduce complete");
        Ok(())
    }

    fn broadcast(&self, data: &mut TensorData, count: usize, root: usize) -> Result<()> {
        if root >= self.size {
            return Err(KernelError::Communication(format!(
                "broadcast root {} is outside a group of {}",
                root, self.size
            )));
        }
        if self.rank == root {
            for peer in (0..self.size).filter(|&p| p != root) {
                self.post(prefix(data, count), peer, Channel::Collective)?;
            }
        } else {
            let message = self.take(root, Channel::Collective)?;
            check_length(&message, count, root)?;
            data.copy_prefix_from(&message, count)?;
        }
        Ok(())
    }

    fn send(&self, data: &TensorData, count: usize, dest: usize) -> Result<()> {
        self.check_peer(dest)?;
        self.post(prefix(data, count), dest, Channel::Point)
    }

    fn recv(&self, data: &mut TensorData, count: usize, src: usize) -> Result<()> {
        self.check_peer(src)?;
        let message = self.take(src, Channel::Point)?;
        check_length(&message, count, src)?;
        data.copy_prefix_from(&message, count)?;
        Ok(())
    }
}
