use crate::model::{Candle, SubscriptionKey, Trade};
use fnv::FnvHashMap;
use indexmap::IndexSet;
use parking_lot::{Mutex, RwLock};
use std::{collections::VecDeque, hash::Hash, sync::Arc, time::Duration};
use tokio::{
    task::{AbortHandle, Id},
    time::Instant,
};
use tracing::debug;

/// Mutable state of one [`SubscriptionKey`].
#[derive(Debug)]
pub struct AggregateState<T> {
    /// Last inbound frame or target registration, drives idle eviction.
    pub last_activity: Instant,
    /// Trades buffered for the next pass, oldest first, bounded by the store retention.
    pub trades: VecDeque<Trade>,
    /// Most recently observed in-progress candle.
    pub current_candle: Option<Candle>,
    /// Display targets in registration order.
    pub targets: IndexSet<T>,
    /// At most one outstanding debounce timer.
    pub pending_timer: Option<AbortHandle>,
    /// Time of the last fan-out.
    pub last_push: Option<Instant>,
    /// Number of candle boundaries seen, a pass computed from an older epoch is stale.
    pub epoch: u64,
}

impl<T> AggregateState<T> {
    fn new(now: Instant) -> Self {
        Self {
            last_activity: now,
            trades: VecDeque::new(),
            current_candle: None,
            targets: IndexSet::new(),
            pending_timer: None,
            last_push: None,
            epoch: 0,
        }
    }

    fn arm(&mut self, arm: impl FnOnce() -> AbortHandle) -> bool {
        if self.pending_timer.is_some() {
            return false;
        }
        self.pending_timer = Some(arm());
        true
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.pending_timer.take() {
            timer.abort();
        }
    }
}

/// Result of recording a live candle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CandleEvent {
    /// The candle open time changed, the previous candle has closed.
    Boundary,
    /// In-progress update of the current candle.
    Update { armed: bool },
    /// Every row is older than the current candle.
    Stale,
    /// The subscription is unknown or has no targets.
    Ignored,
}

/// Consistent copy of the state a recomputation pass reads.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    pub trades: Vec<Trade>,
    pub current_candle: Option<Candle>,
    pub targets: Vec<T>,
    pub epoch: u64,
}

/// Owned registry of per-subscription state.
///
/// The map lock is only held to find or insert a key, every mutation of one subscription is
/// serialised by its own lock.
#[derive(Debug)]
pub struct AggregateStore<T> {
    retention: usize,
    states: RwLock<FnvHashMap<SubscriptionKey, Arc<Mutex<AggregateState<T>>>>>,
}

impl<T> AggregateStore<T>
where
    T: Clone + Eq + Hash,
{
    pub fn new(retention: usize) -> Self {
        Self {
            retention: retention.max(1),
            states: RwLock::new(FnvHashMap::default()),
        }
    }

    fn state(&self, key: &SubscriptionKey) -> Option<Arc<Mutex<AggregateState<T>>>> {
        self.states.read().get(key).cloned()
    }

    /// Idempotently register `target` for `key`, creating the subscription if needed.
    ///
    /// Returns true if the target was not registered before.
    pub fn register_target(&self, key: &SubscriptionKey, target: T, now: Instant) -> bool {
        let state = self
            .states
            .write()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(AggregateState::new(now))))
            .clone();

        let mut state = state.lock();
        state.last_activity = now;
        state.targets.insert(target)
    }

    /// Remove every target of `key` matching `predicate`.
    ///
    /// Returns the number of remaining targets, or `None` if `key` is unknown.
    pub fn remove_targets<F>(&self, key: &SubscriptionKey, mut predicate: F) -> Option<usize>
    where
        F: FnMut(&T) -> bool,
    {
        let state = self.state(key)?;
        let mut state = state.lock();
        state.targets.retain(|target| !predicate(target));
        if state.targets.is_empty() {
            state.cancel_timer();
            state.trades.clear();
        }
        Some(state.targets.len())
    }

    /// Append trades to `key` and arm its debounce timer if none is outstanding.
    ///
    /// A `snapshot` replays recent history on (re)subscribe, so only its trades newer than
    /// everything buffered are kept. Subscriptions without targets neither buffer trades nor
    /// count the frame as activity. Returns true if a new timer was armed.
    pub fn record_trades(
        &self,
        key: &SubscriptionKey,
        trades: &[Trade],
        snapshot: bool,
        now: Instant,
        arm: impl FnOnce() -> AbortHandle,
    ) -> bool {
        let Some(state) = self.state(key) else {
            return false;
        };
        let mut state = state.lock();
        if state.targets.is_empty() || trades.is_empty() {
            return false;
        }
        state.last_activity = now;

        let newest = match snapshot {
            true => state.trades.iter().map(|trade| trade.time).max(),
            false => None,
        };
        let buffered = state.trades.len();
        state.trades.extend(
            trades
                .iter()
                .filter(|trade| newest.is_none_or(|newest| trade.time > newest))
                .cloned(),
        );
        if state.trades.len() == buffered {
            return false;
        }

        let overflow = state.trades.len().saturating_sub(self.retention);
        state.trades.drain(..overflow);

        state.arm(arm)
    }

    /// Record the live candle rows of one frame for `key`.
    ///
    /// Only the newest row matters. A strictly newer open time than the current candle is a
    /// single [`CandleEvent::Boundary`] however many rows the frame carries, it cancels any
    /// pending debounce timer and the caller runs an immediate pass. The same open time is an
    /// update that arms the debounce timer as for trades, an older one is
    /// [`CandleEvent::Stale`] and discarded. The first candle seen is never a boundary.
    pub fn record_candles(
        &self,
        key: &SubscriptionKey,
        candles: &[Candle],
        now: Instant,
        arm: impl FnOnce() -> AbortHandle,
    ) -> CandleEvent {
        let Some(latest) = candles.iter().max_by_key(|candle| candle.open_time) else {
            return CandleEvent::Ignored;
        };
        let Some(state) = self.state(key) else {
            return CandleEvent::Ignored;
        };
        let mut state = state.lock();

        let previous = state.current_candle.as_ref().map(|candle| candle.open_time);
        if previous.is_some_and(|previous| latest.open_time < previous) {
            return CandleEvent::Stale;
        }
        state.current_candle = Some(latest.clone());
        if state.targets.is_empty() {
            return CandleEvent::Ignored;
        }
        state.last_activity = now;

        match previous {
            Some(previous) if latest.open_time > previous => {
                state.cancel_timer();
                state.epoch += 1;
                CandleEvent::Boundary
            }
            _ => CandleEvent::Update {
                armed: state.arm(arm),
            },
        }
    }

    /// Clear the pending timer slot of `key` without aborting it, if it still holds the
    /// timer task `id`. Called by the timer itself once it fires.
    pub fn take_timer(&self, key: &SubscriptionKey, id: Id) -> Option<AbortHandle> {
        let state = self.state(key)?;
        let mut state = state.lock();
        if !state.pending_timer.as_ref().is_some_and(|timer| timer.id() == id) {
            return None;
        }
        state.pending_timer.take()
    }

    pub fn has_pending_timer(&self, key: &SubscriptionKey) -> bool {
        self.state(key)
            .is_some_and(|state| state.lock().pending_timer.is_some())
    }

    /// Atomically check a pass computed at `epoch` is still current and respects the minimum
    /// push interval, and if so record `now` as the push time. `enforce_interval = false`
    /// skips the interval check.
    pub fn claim_push(
        &self,
        key: &SubscriptionKey,
        now: Instant,
        min_interval: Duration,
        enforce_interval: bool,
        epoch: u64,
    ) -> bool {
        let Some(state) = self.state(key) else {
            return false;
        };
        let mut state = state.lock();
        if state.epoch != epoch {
            return false;
        }
        if enforce_interval && !interval_elapsed(state.last_push, now, min_interval) {
            return false;
        }
        state.last_push = Some(now);
        true
    }

    /// True if a push at `now` would respect the minimum push interval.
    pub fn push_allowed(&self, key: &SubscriptionKey, now: Instant, min_interval: Duration) -> bool {
        self.state(key)
            .is_some_and(|state| interval_elapsed(state.lock().last_push, now, min_interval))
    }

    /// Fill an empty trade buffer with backfilled trades. Ignored if trades arrived meanwhile.
    pub fn backfill_trades(&self, key: &SubscriptionKey, trades: Vec<Trade>) -> bool {
        let Some(state) = self.state(key) else {
            return false;
        };
        let mut state = state.lock();
        if !state.trades.is_empty() || state.targets.is_empty() {
            return false;
        }
        let skip = trades.len().saturating_sub(self.retention);
        state.trades.extend(trades.into_iter().skip(skip));
        true
    }

    pub fn snapshot(&self, key: &SubscriptionKey) -> Option<Snapshot<T>> {
        let state = self.state(key)?;
        let state = state.lock();
        Some(Snapshot {
            trades: state.trades.iter().cloned().collect(),
            current_candle: state.current_candle.clone(),
            targets: state.targets.iter().cloned().collect(),
            epoch: state.epoch,
        })
    }

    /// Remove and return every subscription without targets whose last activity is older
    /// than `threshold`. Their pending timers are aborted and buffered state discarded.
    pub fn sweep_idle(&self, now: Instant, threshold: Duration) -> Vec<SubscriptionKey> {
        let mut states = self.states.write();

        let evicted = states
            .iter()
            .filter(|(_, state)| {
                let state = state.lock();
                state.targets.is_empty()
                    && now.saturating_duration_since(state.last_activity) > threshold
            })
            .map(|(key, _)| key.clone())
            .collect::<Vec<_>>();

        for key in &evicted {
            if let Some(state) = states.remove(key) {
                state.lock().cancel_timer();
            }
            debug!(%key, "evicted idle subscription");
        }

        evicted
    }

    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        self.states.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<SubscriptionKey> {
        self.states.read().keys().cloned().collect()
    }

    /// Every tracked key of `symbol`.
    pub fn keys_for_symbol(&self, symbol: &str) -> Vec<SubscriptionKey> {
        self.states
            .read()
            .keys()
            .filter(|key| key.symbol == symbol)
            .cloned()
            .collect()
    }

    pub fn targets(&self, key: &SubscriptionKey) -> Vec<T> {
        self.state(key)
            .map(|state| state.lock().targets.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn buffered_trades(&self, key: &SubscriptionKey) -> usize {
        self.state(key)
            .map(|state| state.lock().trades.len())
            .unwrap_or(0)
    }

    /// Abort every pending timer and drop all state.
    pub fn clear(&self) {
        for (_, state) in self.states.write().drain() {
            state.lock().cancel_timer();
        }
    }
}

fn interval_elapsed(last_push: Option<Instant>, now: Instant, min_interval: Duration) -> bool {
    last_push.is_none_or(|last| now.saturating_duration_since(last) >= min_interval)
}
