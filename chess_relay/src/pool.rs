// Waiting pool: connections that have not been paired into a session yet.
//
// Strict FIFO. `try_pair_next` hands out the two oldest connections at once,
// under the same lock, so concurrent callers can never split a pair or hand
// the same connection to two sessions. Ownership moves out of the pool with
// the pair; a connection is either here or owned by exactly one session.
//
// A client can vanish while it waits. `sweep_disconnected` probes every
// waiting connection without consuming data (a non-blocking `peek`) and
// drops the dead ones, so a crashed client cannot take a pairing slot.
// `spawn_sweeper` runs that sweep on a background thread for the server's
// lifetime.
//
// The pool is generic over `PooledConnection` so pairing can be exercised
// with in-memory stand-ins; the server uses `TcpStream`.

use std::collections::VecDeque;
use std::io;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::info;

/// Default interval between liveness sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Floor for the sweep interval, so the sweeper never spins on the lock.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// How often the sweeper thread checks whether it should stop.
const STOP_POLL: Duration = Duration::from_millis(50);

/// What the pool needs from a waiting connection.
pub trait PooledConnection: Send + 'static {
    /// Cheap liveness probe. Must not block or consume pending data, and
    /// must report `false` rather than fail.
    fn is_alive(&self) -> bool;

    /// Close the connection. Must tolerate an already-closed peer.
    fn close(&self);
}

impl PooledConnection for TcpStream {
    fn is_alive(&self) -> bool {
        if self.set_nonblocking(true).is_err() {
            return false;
        }
        let mut probe = [0u8; 1];
        let alive = match self.peek(&mut probe) {
            // Orderly shutdown from the peer.
            Ok(0) => false,
            // A client may send its JOIN before it is paired; it stays queued.
            Ok(_) => true,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => true,
            Err(_) => false,
        };
        self.set_nonblocking(false).is_ok() && alive
    }

    fn close(&self) {
        let _ = self.shutdown(Shutdown::Both);
    }
}

/// FIFO queue of connections awaiting an opponent. Share it behind an `Arc`.
pub struct ConnectionPool<C = TcpStream> {
    waiting: Mutex<VecDeque<C>>,
}

impl<C: PooledConnection> Default for ConnectionPool<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: PooledConnection> ConnectionPool<C> {
    pub fn new() -> Self {
        Self {
            waiting: Mutex::new(VecDeque::new()),
        }
    }

    /// Append a connection to the back of the queue.
    pub fn enqueue(&self, conn: C) {
        self.lock().push_back(conn);
    }

    /// Take the two oldest connections if at least two are waiting. The
    /// first element of the pair arrived first.
    pub fn try_pair_next(&self) -> Option<(C, C)> {
        let mut waiting = self.lock();
        if waiting.len() < 2 {
            return None;
        }
        let first = waiting.pop_front()?;
        let second = waiting.pop_front()?;
        Some((first, second))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Probe every waiting connection, keeping live ones in their original
    /// order and closing dead ones. Returns how many were removed.
    ///
    /// The queue stays locked for the whole pass so a connection enqueued
    /// meanwhile cannot jump ahead of survivors. Probes are non-blocking.
    pub fn sweep_disconnected(&self) -> usize {
        let mut waiting = self.lock();
        let before = waiting.len();
        let mut kept = VecDeque::with_capacity(before);
        for conn in waiting.drain(..) {
            if conn.is_alive() {
                kept.push_back(conn);
            } else {
                conn.close();
            }
        }
        *waiting = kept;
        before - waiting.len()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<C>> {
        self.waiting.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Run `sweep_disconnected` every `interval` until `keep_running` is
/// cleared. Intervals shorter than `MIN_SWEEP_INTERVAL` are raised to it.
pub fn spawn_sweeper<C: PooledConnection>(
    pool: Arc<ConnectionPool<C>>,
    interval: Duration,
    keep_running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    let interval = interval.max(MIN_SWEEP_INTERVAL);
    thread::spawn(move || {
        let mut next_sweep = Instant::now() + interval;
        while keep_running.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now < next_sweep {
                thread::sleep(STOP_POLL.min(next_sweep - now));
                continue;
            }
            let removed = pool.sweep_disconnected();
            if removed > 0 {
                info!(
                    "Removed {removed} disconnected client(s) from the waiting pool ({} still waiting)",
                    pool.len()
                );
            }
            next_sweep = Instant::now() + interval;
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::atomic::AtomicUsize;

    use super::*;

    /// In-memory connection whose liveness the test controls.
    #[derive(Clone, Debug)]
    struct FakeConn {
        id: u32,
        alive: Arc<AtomicBool>,
        closed: Arc<AtomicBool>,
    }

    impl FakeConn {
        fn new(id: u32) -> Self {
            Self {
                id,
                alive: Arc::new(AtomicBool::new(true)),
                closed: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl PooledConnection for FakeConn {
        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn ids(pool: &ConnectionPool<FakeConn>) -> Vec<u32> {
        pool.lock().iter().map(|c| c.id).collect()
    }

    /// Create a TCP pair: (client_stream, server_stream) on localhost.
    fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn pairs_in_arrival_order() {
        let pool = ConnectionPool::new();
        for id in 0..4 {
            pool.enqueue(FakeConn::new(id));
        }

        let (a, b) = pool.try_pair_next().unwrap();
        assert_eq!((a.id, b.id), (0, 1));
        let (c, d) = pool.try_pair_next().unwrap();
        assert_eq!((c.id, d.id), (2, 3));
        assert!(pool.try_pair_next().is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn single_waiter_is_not_paired() {
        let pool = ConnectionPool::new();
        pool.enqueue(FakeConn::new(7));
        assert!(pool.try_pair_next().is_none());
        assert_eq!(ids(&pool), vec![7]);
    }

    #[test]
    fn concurrent_enqueue_and_pairing_never_duplicates() {
        let pool = Arc::new(ConnectionPool::new());
        let producers: Vec<_> = (0..8u32)
            .map(|t| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for i in 0..25 {
                        pool.enqueue(FakeConn::new(t * 100 + i));
                    }
                })
            })
            .collect();
        let pairers: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    let mut paired = Vec::new();
                    for _ in 0..200 {
                        if let Some((a, b)) = pool.try_pair_next() {
                            paired.push(a.id);
                            paired.push(b.id);
                        }
                        thread::yield_now();
                    }
                    paired
                })
            })
            .collect();

        for p in producers {
            p.join().unwrap();
        }
        let mut seen: Vec<u32> = pairers
            .into_iter()
            .flat_map(|p| p.join().unwrap())
            .collect();
        seen.extend(ids(&pool));

        let unique: BTreeSet<u32> = seen.iter().copied().collect();
        assert_eq!(seen.len(), 200, "every connection accounted for once");
        assert_eq!(unique.len(), 200, "no connection handed out twice");
    }

    #[test]
    fn sweep_keeps_live_in_order_and_closes_dead() {
        let pool = ConnectionPool::new();
        let conns: Vec<FakeConn> = (0..5).map(FakeConn::new).collect();
        for c in &conns {
            pool.enqueue(c.clone());
        }
        conns[1].alive.store(false, Ordering::SeqCst);
        conns[3].alive.store(false, Ordering::SeqCst);

        assert_eq!(pool.sweep_disconnected(), 2);
        assert_eq!(ids(&pool), vec![0, 2, 4]);
        assert!(conns[1].closed.load(Ordering::SeqCst));
        assert!(conns[3].closed.load(Ordering::SeqCst));
        assert!(!conns[0].closed.load(Ordering::SeqCst));
    }

    #[test]
    fn sweep_drops_closed_tcp_client() {
        let (live_client, live_server) = tcp_pair();
        let (dead_client, dead_server) = tcp_pair();
        let live_peer = live_server.peer_addr().unwrap();

        let pool = ConnectionPool::new();
        pool.enqueue(dead_server);
        pool.enqueue(live_server);
        drop(dead_client);
        thread::sleep(Duration::from_millis(50));

        assert_eq!(pool.sweep_disconnected(), 1);
        assert_eq!(pool.len(), 1);
        let remaining = pool.lock().front().unwrap().peer_addr().unwrap();
        assert_eq!(remaining, live_peer);
        drop(live_client);
    }

    #[test]
    fn sweep_does_not_consume_pending_data() {
        let (mut client, server) = tcp_pair();
        client.write_all(b"early join\n").unwrap();
        thread::sleep(Duration::from_millis(50));

        let pool = ConnectionPool::new();
        pool.enqueue(server);
        assert_eq!(pool.sweep_disconnected(), 0);

        let server = pool.lock().pop_front().unwrap();
        server
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut line = String::new();
        BufReader::new(server).read_line(&mut line).unwrap();
        assert_eq!(line, "early join\n");
    }

    #[test]
    fn background_sweeper_removes_dead_connections() {
        let pool = Arc::new(ConnectionPool::new());
        let dead = FakeConn::new(1);
        pool.enqueue(FakeConn::new(0));
        pool.enqueue(dead.clone());
        dead.alive.store(false, Ordering::SeqCst);

        let keep_running = Arc::new(AtomicBool::new(true));
        let sweeper = spawn_sweeper(
            Arc::clone(&pool),
            Duration::from_millis(20),
            Arc::clone(&keep_running),
        );

        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.len() != 1 {
            assert!(Instant::now() < deadline, "sweeper never ran");
            thread::sleep(Duration::from_millis(10));
        }
        keep_running.store(false, Ordering::SeqCst);
        sweeper.join().unwrap();

        assert_eq!(ids(&pool), vec![0]);
        assert!(dead.closed.load(Ordering::SeqCst));
    }

    /// Connection that counts how often it was probed.
    struct CountingConn(Arc<AtomicUsize>);

    impl PooledConnection for CountingConn {
        fn is_alive(&self) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            true
        }

        fn close(&self) {}
    }

    #[test]
    fn zero_sweep_interval_is_raised_to_floor() {
        let probes = Arc::new(AtomicUsize::new(0));
        let pool = Arc::new(ConnectionPool::new());
        pool.enqueue(CountingConn(Arc::clone(&probes)));

        let keep_running = Arc::new(AtomicBool::new(true));
        let sweeper = spawn_sweeper(Arc::clone(&pool), Duration::ZERO, Arc::clone(&keep_running));
        thread::sleep(Duration::from_millis(200));
        keep_running.store(false, Ordering::SeqCst);
        sweeper.join().unwrap();

        let count = probes.load(Ordering::SeqCst);
        assert!(count >= 1, "sweeper never ran");
        assert!(count <= 40, "sweeper spun: {count} probes in 200ms");
        assert_eq!(pool.len(), 1);
    }
}
