use std::collections::VecDeque;
use std::future::Future;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Dials and probes the channels managed by a [`Pool`].
///
/// The seam exists so pool behavior can be exercised with an injected fake;
/// the production implementation is [`crate::channel::SshConnector`].
pub(crate) trait Connector: Send + Sync + 'static {
    type Channel: Send + 'static;

    /// Establish a new channel. `id` is the monotonic channel id, for logs.
    fn connect(&self, id: u64) -> impl Future<Output = Result<Self::Channel>> + Send;

    /// Cheap local connectivity check.
    fn is_connected(&self, channel: &Self::Channel) -> bool;

    /// Keep-alive round trip.
    fn ping(&self, channel: &Self::Channel) -> impl Future<Output = Result<()>> + Send;

    /// Orderly disconnect. Dropping a channel disconnects it quietly.
    fn disconnect(&self, channel: Self::Channel) -> impl Future<Output = Result<()>> + Send;
}

/// Pool configuration: capacity and acquisition wait policy.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PoolConfig {
    /// Number of channels dialed up front and kept alive.
    pub capacity: usize,
    /// How long [`Pool::get`] waits for an idle channel; `None` waits
    /// indefinitely.
    pub wait_timeout: Option<std::time::Duration>,
}

struct Pooled<T> {
    id: u64,
    pooled: bool,
    channel: T,
}

struct State<T> {
    idle: VecDeque<Pooled<T>>,
    closed: bool,
}

struct PoolInner<C: Connector> {
    connector: C,
    state: Mutex<State<C::Channel>>,
    available: Notify,
    config: PoolConfig,
    next_id: AtomicU64,
}

impl<C: Connector> PoolInner<C> {
    fn next_channel_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Hand a channel back. Pooled channels re-enter the queue unless the
    /// pool has been closed; unpooled (and post-close) channels are dropped,
    /// which disconnects them quietly.
    fn release(self: &Arc<Self>, item: Pooled<C::Channel>) {
        if !item.pooled {
            debug!(channel = item.id, "disconnecting unpooled channel");
            return;
        }
        let mut state = self.state.lock();
        if state.closed {
            drop(state);
            debug!(channel = item.id, "pool closed, dropping returned channel");
            return;
        }
        debug_assert!(state.idle.len() < self.config.capacity);
        let id = item.id;
        state.idle.push_back(item);
        let size = state.idle.len();
        drop(state);
        self.available.notify_one();
        debug!(channel = id, size, "returned channel to pool");
    }
}

/// A bounded FIFO pool of live SFTP channels.
///
/// The pool is filled eagerly: `capacity` channels are dialed when the pool
/// is created, and the population is kept constant afterwards. Broken
/// channels found at acquisition are replaced one-for-one; if the
/// replacement dial fails, the broken channel is put back so the pool never
/// shrinks.
pub(crate) struct Pool<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Pool {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> Pool<C> {
    /// Dial `config.capacity` channels and assemble the pool.
    ///
    /// If any dial fails, all previously dialed channels are disconnected
    /// and the first error is returned with cleanup failures attached.
    pub(crate) async fn connect(connector: C, config: PoolConfig) -> Result<Self> {
        debug!(
            capacity = config.capacity,
            wait_timeout = ?config.wait_timeout,
            "creating channel pool"
        );
        let inner = Arc::new(PoolInner {
            connector,
            state: Mutex::new(State {
                idle: VecDeque::with_capacity(config.capacity),
                closed: false,
            }),
            available: Notify::new(),
            config,
            next_id: AtomicU64::new(0),
        });

        let mut dialed: Vec<Pooled<C::Channel>> = Vec::with_capacity(config.capacity);
        for _ in 0..config.capacity {
            let id = inner.next_channel_id();
            match inner.connector.connect(id).await {
                Ok(channel) => {
                    debug!(channel = id, "created pooled channel");
                    dialed.push(Pooled {
                        id,
                        pooled: true,
                        channel,
                    });
                }
                Err(e) => {
                    warn!(error = %e, "failed to create channel pool");
                    let mut error = e;
                    for item in dialed {
                        if let Err(cleanup) = inner.connector.disconnect(item.channel).await {
                            error = error.with_cleanup(cleanup);
                        }
                    }
                    return Err(error);
                }
            }
        }
        inner.state.lock().idle.extend(dialed);
        debug!(capacity = config.capacity, "created channel pool");
        Ok(Pool { inner })
    }

    /// Acquire a channel, waiting up to the configured timeout.
    pub(crate) async fn get(&self) -> Result<ChannelGuard<C>> {
        let item = self.dequeue_with_wait().await?;
        let item = self.verify_or_replace(item).await?;
        Ok(self.checkout(item))
    }

    /// Acquire a channel without waiting; dial an unpooled one if the queue
    /// is empty. An unpooled channel is disconnected on release instead of
    /// re-entering the queue.
    pub(crate) async fn get_or_create(&self) -> Result<ChannelGuard<C>> {
        let popped = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(Error::ClosedFileSystem);
            }
            state.idle.pop_front()
        };
        let item = match popped {
            Some(item) => self.verify_or_replace(item).await?,
            None => {
                // Nothing was taken from the queue, so a failed dial here
                // cannot starve the pool.
                let id = self.inner.next_channel_id();
                let channel = self.inner.connector.connect(id).await?;
                debug!(channel = id, "created unpooled channel");
                Pooled {
                    id,
                    pooled: false,
                    channel,
                }
            }
        };
        Ok(self.checkout(item))
    }

    async fn dequeue_with_wait(&self) -> Result<Pooled<C::Channel>> {
        let deadline = self.inner.config.wait_timeout.map(|t| Instant::now() + t);
        loop {
            let notified = self.inner.available.notified();
            {
                let mut state = self.inner.state.lock();
                if state.closed {
                    return Err(Error::ClosedFileSystem);
                }
                if let Some(item) = state.idle.pop_front() {
                    debug!(channel = item.id, remaining = state.idle.len(), "took channel");
                    return Ok(item);
                }
            }
            match deadline {
                None => notified.await,
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero()
                        || tokio::time::timeout(remaining, notified).await.is_err()
                    {
                        return Err(Error::ClientConnectionWaitTimeoutExpired);
                    }
                }
            }
        }
    }

    /// Probe a dequeued channel and replace it if it is no longer live.
    ///
    /// If the replacement dial fails, the broken channel is returned to the
    /// queue before the error propagates, so the pool population stays
    /// constant even under a full outage.
    async fn verify_or_replace(&self, item: Pooled<C::Channel>) -> Result<Pooled<C::Channel>> {
        let live = self.inner.connector.is_connected(&item.channel)
            && self.inner.connector.ping(&item.channel).await.is_ok();
        if live {
            return Ok(item);
        }
        debug!(channel = item.id, "channel not connected");
        let id = self.inner.next_channel_id();
        match self.inner.connector.connect(id).await {
            Ok(channel) => {
                debug!(channel = id, replaces = item.id, "created replacement channel");
                drop(item.channel);
                Ok(Pooled {
                    id,
                    pooled: item.pooled,
                    channel,
                })
            }
            Err(e) => {
                let broken_id = item.id;
                let mut state = self.inner.state.lock();
                state.idle.push_back(item);
                let size = state.idle.len();
                drop(state);
                self.inner.available.notify_one();
                warn!(channel = broken_id, size, "returned broken channel to pool");
                Err(e)
            }
        }
    }

    fn checkout(&self, item: Pooled<C::Channel>) -> ChannelGuard<C> {
        ChannelGuard {
            item: Some(item),
            pool: Arc::clone(&self.inner),
        }
    }

    /// Send a keep-alive on every idle channel.
    ///
    /// Channels are drained, probed and re-enqueued regardless of the probe
    /// result; a later [`Pool::get`] replaces any that died. Errors are
    /// aggregated, the first one primary. Busy channels are not touched.
    pub(crate) async fn keep_alive(&self) -> Result<()> {
        let drained: Vec<_> = {
            let mut state = self.inner.state.lock();
            state.idle.drain(..).collect()
        };
        debug!(count = drained.len(), "drained pool for keep-alive");
        let mut error = None;
        for item in drained {
            if let Err(e) = self.inner.connector.ping(&item.channel).await {
                warn!(channel = item.id, error = %e, "keep-alive failed");
                error = Error::aggregate(error, e);
            }
            self.inner.release(item);
        }
        match error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Close the pool: stop handing out channels and disconnect every idle
    /// one. Channels currently checked out disconnect on their final
    /// release.
    pub(crate) async fn close(&self) -> Result<()> {
        let drained: Vec<_> = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            state.idle.drain(..).collect()
        };
        // Wake blocked getters; they observe the closed flag.
        self.inner.available.notify_waiters();
        debug!(count = drained.len(), "drained pool for close");
        let mut error = None;
        for item in drained {
            match self.inner.connector.disconnect(item.channel).await {
                Ok(()) => debug!(channel = item.id, "disconnected channel"),
                Err(e) => error = Error::aggregate(error, e),
            }
        }
        match error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    #[cfg(test)]
    fn idle_count(&self) -> usize {
        self.inner.state.lock().idle.len()
    }
}

/// RAII handle on an acquired channel.
///
/// The channel returns to the pool when the guard is dropped, on every exit
/// path. Streaming adapters take ownership of the guard and hold the channel
/// until their own close.
pub(crate) struct ChannelGuard<C: Connector> {
    item: Option<Pooled<C::Channel>>,
    pool: Arc<PoolInner<C>>,
}

impl<C: Connector> std::fmt::Debug for ChannelGuard<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelGuard")
            .field("id", &self.item.as_ref().map(|p| p.id))
            .finish()
    }
}

impl<C: Connector> ChannelGuard<C> {
    /// The channel id, for logs.
    pub(crate) fn id(&self) -> u64 {
        self.item.as_ref().expect("channel already released").id
    }

    /// Explicitly hand the channel back.
    pub(crate) fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}

impl<C: Connector> Deref for ChannelGuard<C> {
    type Target = C::Channel;

    fn deref(&self) -> &Self::Target {
        &self.item.as_ref().expect("channel already released").channel
    }
}

impl<C: Connector> Drop for ChannelGuard<C> {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeConnector {
        dial_count: AtomicU64,
        fail_dial: AtomicBool,
        broken: Mutex<HashSet<u64>>,
        disconnected: Mutex<Vec<u64>>,
    }

    impl FakeConnector {
        fn mark_broken(&self, id: u64) {
            self.broken.lock().insert(id);
        }
    }

    impl Connector for Arc<FakeConnector> {
        type Channel = u64;

        async fn connect(&self, id: u64) -> Result<u64> {
            self.dial_count.fetch_add(1, Ordering::SeqCst);
            if self.fail_dial.load(Ordering::SeqCst) {
                return Err(Error::Io(std::io::Error::other("dial refused")));
            }
            Ok(id)
        }

        fn is_connected(&self, channel: &u64) -> bool {
            !self.broken.lock().contains(channel)
        }

        async fn ping(&self, channel: &u64) -> Result<()> {
            if self.broken.lock().contains(channel) {
                return Err(Error::Io(std::io::Error::other("ping failed")));
            }
            Ok(())
        }

        async fn disconnect(&self, channel: u64) -> Result<()> {
            self.disconnected.lock().push(channel);
            Ok(())
        }
    }

    fn config(capacity: usize, wait_timeout: Option<Duration>) -> PoolConfig {
        PoolConfig {
            capacity,
            wait_timeout,
        }
    }

    async fn pool(
        capacity: usize,
        wait_timeout: Option<Duration>,
    ) -> (Arc<FakeConnector>, Pool<Arc<FakeConnector>>) {
        let connector = Arc::new(FakeConnector::default());
        let pool = Pool::connect(Arc::clone(&connector), config(capacity, wait_timeout))
            .await
            .unwrap();
        (connector, pool)
    }

    #[tokio::test]
    async fn fills_eagerly_and_hands_out_in_fifo_order() {
        let (connector, pool) = pool(3, None).await;
        assert_eq!(connector.dial_count.load(Ordering::SeqCst), 3);
        assert_eq!(pool.idle_count(), 3);

        let first = pool.get().await.unwrap();
        assert_eq!(first.id(), 1);
        first.release();
        let next = pool.get().await.unwrap();
        assert_eq!(next.id(), 2);
    }

    #[tokio::test]
    async fn population_is_conserved_across_checkouts() {
        let (_, pool) = pool(3, None).await;

        let a = pool.get().await.unwrap();
        let b = pool.get().await.unwrap();
        assert_eq!(pool.idle_count(), 1);

        drop(a);
        b.release();
        assert_eq!(pool.idle_count(), 3);
    }

    #[tokio::test]
    async fn acquisition_times_out_when_exhausted() {
        let (_, pool) = pool(3, Some(Duration::from_millis(500))).await;

        let _held: Vec<_> = [
            pool.get().await.unwrap(),
            pool.get().await.unwrap(),
            pool.get().await.unwrap(),
        ]
        .into();

        let started = Instant::now();
        let err = pool.get().await.unwrap_err();
        let elapsed = started.elapsed();
        assert!(matches!(err, Error::ClientConnectionWaitTimeoutExpired));
        assert!(elapsed >= Duration::from_millis(500), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1000), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn waiting_caller_is_woken_by_release() {
        let (_, pool) = pool(1, Some(Duration::from_secs(5))).await;

        let held = pool.get().await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.get().await.map(|guard| guard.id()) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        held.release();

        assert_eq!(waiter.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn broken_channel_is_replaced() {
        let (connector, pool) = pool(1, None).await;
        connector.mark_broken(1);

        let guard = pool.get().await.unwrap();
        assert_eq!(guard.id(), 2);
        guard.release();
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn failed_replacement_does_not_shrink_the_pool() {
        let (connector, pool) = pool(2, None).await;
        connector.mark_broken(1);
        connector.fail_dial.store(true, Ordering::SeqCst);

        let before = pool.idle_count();
        let err = pool.get().await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        // The broken channel is back in the queue.
        assert_eq!(pool.idle_count(), before);

        // Once dialing works again, acquisition replaces it and succeeds.
        connector.fail_dial.store(false, Ordering::SeqCst);
        let guard = pool.get().await.unwrap();
        guard.release();
        assert_eq!(pool.idle_count(), 2);
    }

    #[tokio::test]
    async fn get_or_create_falls_back_to_unpooled() {
        let (connector, pool) = pool(1, None).await;

        let pooled = pool.get().await.unwrap();
        let adhoc = pool.get_or_create().await.unwrap();
        assert_eq!(adhoc.id(), 2);

        // The unpooled channel does not re-enter the queue on release.
        adhoc.release();
        assert_eq!(pool.idle_count(), 0);
        pooled.release();
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(connector.dial_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn keep_alive_probes_and_requeues_every_idle_channel() {
        let (connector, pool) = pool(3, None).await;
        connector.mark_broken(2);

        let err = pool.keep_alive().await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        // Even the failing channel went back; get() will replace it.
        assert_eq!(pool.idle_count(), 3);
    }

    #[tokio::test]
    async fn closed_pool_rejects_acquisition() {
        let (_, pool) = pool(2, None).await;
        pool.close().await.unwrap();

        assert!(matches!(pool.get().await, Err(Error::ClosedFileSystem)));
        assert!(matches!(
            pool.get_or_create().await,
            Err(Error::ClosedFileSystem)
        ));
    }

    #[tokio::test]
    async fn close_wakes_blocked_waiters() {
        let (_, pool) = pool(1, None).await;
        let held = pool.get().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.get().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.close().await.unwrap();

        assert!(matches!(
            waiter.await.unwrap(),
            Err(Error::ClosedFileSystem)
        ));
        drop(held);
    }

    #[tokio::test]
    async fn release_after_close_disconnects_instead_of_requeueing() {
        let (connector, pool) = pool(1, None).await;
        let held = pool.get().await.unwrap();

        pool.close().await.unwrap();
        held.release();
        assert_eq!(pool.idle_count(), 0);
        // Orderly disconnect happened only for idle channels drained by
        // close; the late release was dropped quietly.
        assert!(connector.disconnected.lock().is_empty());
    }

    #[tokio::test]
    async fn failed_fill_disconnects_partial_pool() {
        let connector = Arc::new(FakeConnector::default());
        struct FlakyConnector {
            inner: Arc<FakeConnector>,
        }

        impl Connector for FlakyConnector {
            type Channel = u64;

            async fn connect(&self, id: u64) -> Result<u64> {
                if id == 3 {
                    return Err(Error::Io(std::io::Error::other("dial refused")));
                }
                self.inner.connect(id).await
            }

            fn is_connected(&self, channel: &u64) -> bool {
                self.inner.is_connected(channel)
            }

            async fn ping(&self, channel: &u64) -> Result<()> {
                self.inner.ping(channel).await
            }

            async fn disconnect(&self, channel: u64) -> Result<()> {
                self.inner.disconnect(channel).await
            }
        }

        let result = Pool::connect(
            FlakyConnector {
                inner: Arc::clone(&connector),
            },
            config(3, None),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(*connector.disconnected.lock(), vec![1, 2]);
    }
}
