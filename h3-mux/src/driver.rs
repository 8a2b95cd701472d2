//! The socket and timer loop tying a [Context] to a UDP socket.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::ops::Range;
use std::time::Instant;

use tokio::net::UdpSocket;
use tracing::warn;

use crate::ctx::Context;
use crate::transport::{Datagram, Endpoint, Timers};

/// Datagrams read per batch before dispatching.
const READ_BATCH: usize = 32;

/// One scratch buffer holds a whole batch, datagrams packed end to end.
const SCRATCH_SIZE: usize = 16 * 1024;

/// Stop filling the batch early when less than this much scratch remains.
const MIN_DATAGRAM_ROOM: usize = 2048;

/// Timer state for the driver's loop: a deadline per connection, keyed by
/// master-id. `now` is the real monotonic clock.
#[derive(Default)]
struct LoopTimers {
    deadlines: HashMap<u64, Instant>,
}

impl LoopTimers {
    fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    fn expired(&mut self, now: Instant) -> Vec<u64> {
        let expired: Vec<u64> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(master_id, _)| *master_id)
            .collect();
        for master_id in &expired {
            self.deadlines.remove(master_id);
        }
        expired
    }
}

impl Timers for LoopTimers {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn link(&mut self, master_id: u64, deadline: Instant) {
        self.deadlines.insert(master_id, deadline);
    }

    fn unlink(&mut self, master_id: u64) {
        self.deadlines.remove(&master_id);
    }
}

/// Runs a [Context] against a UDP socket on the current tokio runtime.
pub struct Driver<E: Endpoint> {
    socket: UdpSocket,
    ctx: Context<E>,
    timers: LoopTimers,
}

impl<E: Endpoint> Driver<E> {
    /// Adopt a bound std socket.
    pub fn new(socket: std::net::UdpSocket, ctx: Context<E>) -> io::Result<Self> {
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket: UdpSocket::from_std(socket)?,
            ctx,
            timers: LoopTimers::default(),
        })
    }

    /// Bind a fresh socket on the given address.
    pub fn bind(addr: SocketAddr, ctx: Context<E>) -> io::Result<Self> {
        Self::new(std::net::UdpSocket::bind(addr)?, ctx)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn context(&self) -> &Context<E> {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut Context<E> {
        &mut self.ctx
    }

    /// Run until the socket fails.
    pub async fn run(mut self) -> io::Result<()> {
        loop {
            let deadline = self.timers.next_deadline();
            tokio::select! {
                ready = self.socket.readable() => {
                    ready?;
                    self.read_ready();
                }
                _ = sleep_until(deadline), if deadline.is_some() => {
                    self.fire_timers();
                }
            }
        }
    }

    /// Drain the socket: read datagram batches and dispatch them until a batch
    /// comes up empty.
    fn read_ready(&mut self) {
        loop {
            let mut scratch = [0u8; SCRATCH_SIZE];
            let mut datagrams: Vec<(SocketAddr, Range<usize>)> = Vec::with_capacity(READ_BATCH);
            let mut fill = 0;

            while datagrams.len() < READ_BATCH && SCRATCH_SIZE - fill >= MIN_DATAGRAM_ROOM {
                match self.socket.try_recv_from(&mut scratch[fill..]) {
                    Ok((0, _)) => break,
                    Ok((n, peer)) => {
                        datagrams.push((peer, fill..fill + n));
                        fill += n;
                    }
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    // WouldBlock or a real failure both just end the batch.
                    Err(_) => break,
                }
            }

            if datagrams.is_empty() {
                return;
            }

            let Self { socket, ctx, timers } = self;
            let scratch = &scratch[..];
            ctx.receive_datagrams(
                timers,
                datagrams.iter().map(|(peer, range)| (*peer, &scratch[range.clone()])),
                &mut |datagram| send_datagram(socket, &datagram),
            );
        }
    }

    fn fire_timers(&mut self) {
        let now = Instant::now();
        for master_id in self.timers.expired(now) {
            let Self { socket, ctx, timers } = self;
            ctx.on_timeout(timers, master_id, &mut |datagram| {
                send_datagram(socket, &datagram)
            });
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        // A deadline already in the past fires immediately; the delay never
        // goes negative.
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

fn send_datagram(socket: &UdpSocket, datagram: &Datagram) {
    loop {
        match socket.try_send_to(&datagram.data, datagram.dest) {
            Ok(_) => return,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!(dest = %datagram.dest, %err, "sendmsg failed, dropping datagram");
                return;
            }
        }
    }
}
