use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio_util::sync::CancellationToken;

use crate::{
    cache::{LocationCache, LocationCacheEntry},
    clock::{Clock, UtcDT},
    error::LocationError,
    prelude::*,
    provider::{LocationProvider, StatusUpdateSender},
    sample::{AccuracyBand, LocationSample, LocationSource},
    settings::LocationSettings,
    strategy::{EnergyPreference, LocationStrategy, StrategyName, select_strategy},
};

/// What the acquirer is currently doing, sent to the [StatusUpdateSender] on every change
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, specta::Type)]
pub enum AcquisitionState {
    #[default]
    Idle,
    /// A device request using the given strategy is running
    Locating(StrategyName),
    /// The last request produced a result with the given strategy
    Succeeded(StrategyName),
    /// The last request produced no result
    Failed,
}

/// Attached to results that are less trustworthy than they look
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, specta::Type)]
pub enum CacheWarning {
    /// The device failed with `cause`, an older cached fix was served instead
    Stale { age_seconds: u32, cause: LocationError },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, specta::Type)]
pub struct AcquisitionResult {
    pub sample: LocationSample,
    /// Strategy that produced the sample, [StrategyName::Cached] if it came from the cache
    pub strategy: StrategyName,
    pub band: AccuracyBand,
    /// Time spent waiting on the device, zero for cache hits
    pub elapsed_ms: u32,
    /// Whether the sample is within the accuracy the caller asked for
    pub meets_target: bool,
    pub warning: Option<CacheWarning>,
}

impl AcquisitionResult {
    fn from_fix(
        sample: LocationSample,
        strategy: StrategyName,
        elapsed_ms: u32,
        required_meters: f64,
    ) -> Self {
        Self {
            band: sample.band(),
            meets_target: sample.satisfies(required_meters),
            sample,
            strategy,
            elapsed_ms,
            warning: None,
        }
    }

    fn from_cache(
        entry: LocationCacheEntry,
        required_meters: f64,
        warning: Option<CacheWarning>,
    ) -> Self {
        Self {
            band: entry.sample.band(),
            meets_target: entry.sample.satisfies(required_meters),
            sample: entry.sample,
            strategy: StrategyName::Cached,
            elapsed_ms: 0,
            warning,
        }
    }
}

/// Outcome of waiting for a turn at the device
enum Turn<'a> {
    /// Nobody else is using the device, the guard must be held for the whole request
    Ready(MutexGuard<'a, ()>),
    /// A cached fix was good enough
    Cached(AcquisitionResult),
}

fn saturating_ms(delta: chrono::TimeDelta) -> u32 {
    u32::try_from(delta.num_milliseconds().max(0)).unwrap_or(u32::MAX)
}

/// Gets locations from a [LocationProvider], picking strategies, enforcing timeouts and keeping
/// a cache of the last good fix to answer quickly or fall back on.
///
/// Only one device request is ever outstanding per acquirer, callers arriving while one is
/// running wait for it to finish and usually get served its result from the cache.
pub struct LocationAcquirer<P: LocationProvider, C: Clock, S: StatusUpdateSender> {
    provider: P,
    clock: C,
    status: S,
    settings: RwLock<LocationSettings>,
    cache: RwLock<LocationCache>,
    state: RwLock<AcquisitionState>,
    in_flight: Mutex<()>,
    cancel: RwLock<CancellationToken>,
}

impl<P: LocationProvider, C: Clock, S: StatusUpdateSender> LocationAcquirer<P, C, S> {
    pub fn new(provider: P, clock: C, status: S, settings: LocationSettings) -> Self {
        let cache = LocationCache::new(settings.fresh_ttl(), settings.stale_ttl());
        Self {
            provider,
            clock,
            status,
            settings: RwLock::new(settings),
            cache: RwLock::new(cache),
            state: RwLock::new(AcquisitionState::Idle),
            in_flight: Mutex::new(()),
            cancel: RwLock::new(CancellationToken::new()),
        }
    }

    pub async fn state(&self) -> AcquisitionState {
        *self.state.read().await
    }

    pub async fn clone_settings(&self) -> LocationSettings {
        self.settings.read().await.clone()
    }

    /// Replace the settings, the cache keeps its entry but uses the new windows
    pub async fn update_settings(&self, settings: LocationSettings) -> Result {
        settings.validate().context("Invalid location settings")?;
        self.cache
            .write()
            .await
            .set_ttls(settings.fresh_ttl(), settings.stale_ttl());
        *self.settings.write().await = settings;
        Ok(())
    }

    pub async fn cached_entry(&self) -> Option<LocationCacheEntry> {
        self.cache.read().await.get()
    }

    pub async fn clear_cache(&self) {
        self.cache.write().await.clear();
    }

    /// Cancel the request in flight, along with every caller waiting on it
    pub async fn abort(&self) {
        let mut token = self.cancel.write().await;
        token.cancel();
        *token = CancellationToken::new();
        info!("Location request aborted");
    }

    async fn set_state(&self, state: AcquisitionState) {
        *self.state.write().await = state;
        self.status.send_update(state);
    }

    fn elapsed_ms(&self, since: UtcDT) -> u32 {
        saturating_ms(self.clock.now() - since)
    }

    async fn fresh_hit(&self, required_meters: f64) -> Option<AcquisitionResult> {
        let now = self.clock.now();
        self.cache
            .read()
            .await
            .fresh(now)
            .filter(|entry| entry.sample.satisfies(required_meters))
            .map(|entry| AcquisitionResult::from_cache(entry, required_meters, None))
    }

    async fn wait_in_flight(
        &self,
        cancel: &CancellationToken,
    ) -> Result<MutexGuard<'_, ()>, LocationError> {
        if let Ok(guard) = self.in_flight.try_lock() {
            return Ok(guard);
        }

        debug!("Another location request is in flight, waiting for it");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LocationError::Cancelled),
            guard = self.in_flight.lock() => Ok(guard),
        }
    }

    /// Serve from the cache immediately if possible, otherwise wait for our turn at the device
    async fn begin(
        &self,
        required_meters: f64,
        cancel: &CancellationToken,
    ) -> Result<Turn<'_>, LocationError> {
        if let Some(hit) = self.fresh_hit(required_meters).await {
            debug!("Serving location from fresh cache");
            return Ok(Turn::Cached(hit));
        }

        let guard = self.wait_in_flight(cancel).await?;

        // The request we waited on may have produced what we need
        if let Some(hit) = self.fresh_hit(required_meters).await {
            debug!("Serving location cached by the previous request");
            return Ok(Turn::Cached(hit));
        }

        Ok(Turn::Ready(guard))
    }

    /// Make one bounded device request
    async fn attempt(
        &self,
        strategy: &LocationStrategy,
        timeout_ms: u32,
        cancel: &CancellationToken,
    ) -> Result<LocationSample, LocationError> {
        self.set_state(AcquisitionState::Locating(strategy.name))
            .await;

        debug!(
            "Requesting location with {:?} ({:?}, {timeout_ms}ms)",
            strategy.name, strategy.accuracy_target
        );

        // Tell the provider to stop once we're no longer listening
        let request_cancel = cancel.child_token();
        let _stop_request = request_cancel.clone().drop_guard();

        let request = self
            .provider
            .current_location(strategy.accuracy_target, request_cancel);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LocationError::Cancelled),
            res = request => res,
            _ = tokio::time::sleep(Duration::from_millis(timeout_ms as u64)) => {
                Err(LocationError::Timeout { after_ms: timeout_ms })
            }
        }
    }

    fn store_entry(
        cache: &mut LocationCache,
        strategy: &LocationStrategy,
        sample: LocationSample,
        now: UtcDT,
    ) {
        cache.set(LocationCacheEntry {
            sample,
            source: LocationSource::from(strategy.accuracy_target),
            captured_at: now,
        });
    }

    /// Serve the stale tier in place of `cause`, or give `cause` back
    async fn fallback(
        &self,
        cause: LocationError,
        required_meters: f64,
    ) -> Result<AcquisitionResult, LocationError> {
        if cause.is_fallback_eligible() {
            let now = self.clock.now();
            let usable = self.cache.read().await.usable(now);
            if let Some(entry) = usable {
                let age_seconds = u32::try_from(entry.age(now).as_secs()).unwrap_or(u32::MAX);
                warn!("{cause}, serving cached location from {age_seconds}s ago");
                let warning = CacheWarning::Stale { age_seconds, cause };
                self.set_state(AcquisitionState::Succeeded(StrategyName::Cached))
                    .await;
                return Ok(AcquisitionResult::from_cache(
                    entry,
                    required_meters,
                    Some(warning),
                ));
            }
        }

        warn!("Couldn't get a location: {cause}");
        self.set_state(AcquisitionState::Failed).await;
        Err(cause)
    }

    /// Get a location using `strategy`, spending at most `max_total_ms` on the device.
    ///
    /// A fresh cached fix that's accurate enough is returned without asking the device. If the
    /// device fails, a stale cached fix is used when there is one.
    pub async fn acquire(
        &self,
        strategy: &LocationStrategy,
        required_meters: f64,
        max_total_ms: u32,
    ) -> Result<AcquisitionResult, LocationError> {
        let cancel = self.cancel.read().await.clone();

        let _guard = match self.begin(required_meters, &cancel).await? {
            Turn::Ready(guard) => guard,
            Turn::Cached(hit) => return Ok(hit),
        };

        let timeout_ms = strategy.timeout_ms.min(max_total_ms);
        let started = self.clock.now();

        match self.attempt(strategy, timeout_ms, &cancel).await {
            Ok(sample) => {
                let elapsed_ms = self.elapsed_ms(started);
                let now = self.clock.now();
                Self::store_entry(&mut *self.cache.write().await, strategy, sample, now);
                let result =
                    AcquisitionResult::from_fix(sample, strategy.name, elapsed_ms, required_meters);
                info!(
                    "Got location with {:?} in {elapsed_ms}ms ({:?})",
                    strategy.name, result.band
                );
                self.set_state(AcquisitionState::Succeeded(strategy.name))
                    .await;
                Ok(result)
            }
            Err(LocationError::Cancelled) => {
                self.set_state(AcquisitionState::Failed).await;
                Err(LocationError::Cancelled)
            }
            Err(why) => self.fallback(why, required_meters).await,
        }
    }

    /// Pick a strategy for the requirement and preference, then [Self::acquire] with it
    pub async fn locate(
        &self,
        required_meters: f64,
        preference: EnergyPreference,
    ) -> Result<AcquisitionResult, LocationError> {
        let settings = self.clone_settings().await;
        let Some(strategy) = select_strategy(&settings.strategies, required_meters, preference)
        else {
            return Err(LocationError::NoUsableResult);
        };
        debug!("Selected {:?} for {required_meters}m ({preference:?})", strategy.name);
        self.acquire(strategy, required_meters, settings.max_total_time_ms)
            .await
    }

    /// Run every strategy in order until one meets `required_meters` or `max_total_ms` runs out,
    /// returning the best fix seen.
    pub async fn acquire_progressive(
        &self,
        required_meters: f64,
        max_total_ms: u32,
    ) -> Result<AcquisitionResult, LocationError> {
        let cancel = self.cancel.read().await.clone();

        let _guard = match self.begin(required_meters, &cancel).await? {
            Turn::Ready(guard) => guard,
            Turn::Cached(hit) => return Ok(hit),
        };

        let strategies = self.settings.read().await.strategies.clone();
        let started = self.clock.now();
        let mut best: Option<AcquisitionResult> = None;
        let mut last_error = None;

        for strategy in strategies.iter() {
            let remaining = max_total_ms.saturating_sub(self.elapsed_ms(started));
            if remaining == 0 {
                debug!("Time budget exhausted before trying {:?}", strategy.name);
                break;
            }

            match self
                .attempt(strategy, strategy.timeout_ms.min(remaining), &cancel)
                .await
            {
                Ok(sample) => {
                    let now = self.clock.now();
                    {
                        let mut cache = self.cache.write().await;
                        let improves = cache
                            .usable(now)
                            .is_none_or(|entry| sample.is_better_than(&entry.sample));
                        if improves {
                            Self::store_entry(&mut cache, strategy, sample, now);
                        }
                    }

                    let result = AcquisitionResult::from_fix(
                        sample,
                        strategy.name,
                        self.elapsed_ms(started),
                        required_meters,
                    );
                    debug!("{:?} got {:?}", strategy.name, result.band);

                    let done = result.meets_target;
                    if best
                        .as_ref()
                        .is_none_or(|b| sample.is_better_than(&b.sample))
                    {
                        best = Some(result);
                    }
                    if done {
                        break;
                    }
                }
                Err(LocationError::Cancelled) => {
                    self.set_state(AcquisitionState::Failed).await;
                    return Err(LocationError::Cancelled);
                }
                Err(LocationError::PermissionDenied) => {
                    last_error = Some(LocationError::PermissionDenied);
                    break;
                }
                Err(why) => {
                    warn!("{:?} failed: {why}", strategy.name);
                    last_error = Some(why);
                }
            }
        }

        if let Some(best) = best {
            info!(
                "Progressive location finished with {:?} in {}ms ({:?})",
                best.strategy, best.elapsed_ms, best.band
            );
            self.set_state(AcquisitionState::Succeeded(best.strategy))
                .await;
            return Ok(best);
        }

        match last_error {
            Some(LocationError::PermissionDenied) => {
                self.fallback(LocationError::PermissionDenied, required_meters)
                    .await
            }
            last_error => {
                // No attempt at all means the budget was gone before the first strategy
                let cause = last_error.unwrap_or(LocationError::Timeout {
                    after_ms: max_total_ms,
                });
                self.fallback(cause, required_meters)
                    .await
                    .map_err(|_| LocationError::NoUsableResult)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::{task::yield_now, test};

    use super::*;
    use crate::{
        clock::TokioClock,
        strategy::AccuracyTarget,
        tests::{MockProvider, MockResponse, RecordingSender},
    };

    type TestAcquirer = LocationAcquirer<Arc<MockProvider>, TokioClock, Arc<RecordingSender>>;

    struct Harness {
        provider: Arc<MockProvider>,
        status: Arc<RecordingSender>,
        acquirer: Arc<TestAcquirer>,
    }

    impl Harness {
        fn new(script: impl IntoIterator<Item = MockResponse>) -> Self {
            tokio::time::pause();
            let provider = Arc::new(MockProvider::new(script));
            let status = Arc::new(RecordingSender::default());
            let acquirer = Arc::new(LocationAcquirer::new(
                provider.clone(),
                TokioClock::new(),
                status.clone(),
                LocationSettings::default(),
            ));
            Self {
                provider,
                status,
                acquirer,
            }
        }
    }

    const BUDGET: u32 = 20_000;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    async fn test_quick_fix_classified() {
        let h = Harness::new([MockResponse::fix(secs(3), 80.0)]);

        let res = h
            .acquirer
            .acquire(&LocationStrategy::quick(), 100.0, BUDGET)
            .await
            .expect("Acquire failed");

        assert_eq!(res.strategy, StrategyName::Quick);
        assert_eq!(res.sample.accuracy_meters, Some(80.0));
        assert_eq!(res.band, AccuracyBand::Fair);
        assert!(res.meets_target);
        assert!(res.warning.is_none());
        assert!(
            (3000..3100).contains(&res.elapsed_ms),
            "Elapsed was {}",
            res.elapsed_ms
        );
        assert_eq!(h.provider.targets(), vec![AccuracyTarget::Low]);

        let entry = h.acquirer.cached_entry().await.expect("Nothing cached");
        assert_eq!(entry.sample, res.sample);
        assert_eq!(entry.source, LocationSource::Passive);
    }

    #[test]
    async fn test_fresh_cache_round_trip() {
        let h = Harness::new([MockResponse::fix(secs(1), 15.0)]);
        let first = h
            .acquirer
            .acquire(&LocationStrategy::balanced(), 20.0, BUDGET)
            .await
            .expect("Acquire failed");

        tokio::time::advance(secs(60)).await;

        for required in [15.0, 20.0, 500.0] {
            let again = h
                .acquirer
                .acquire(&LocationStrategy::precise(), required, BUDGET)
                .await
                .expect("Cached acquire failed");
            assert_eq!(again.strategy, StrategyName::Cached);
            assert_eq!(again.elapsed_ms, 0);
            assert_eq!(again.sample, first.sample);
            assert!(again.warning.is_none());
        }

        assert_eq!(h.provider.calls(), 1);
    }

    #[test]
    async fn test_tighter_requirement_skips_cache() {
        let h = Harness::new([
            MockResponse::fix(secs(1), 15.0),
            MockResponse::fix(secs(2), 4.0),
        ]);
        h.acquirer
            .acquire(&LocationStrategy::balanced(), 20.0, BUDGET)
            .await
            .expect("Acquire failed");

        let res = h
            .acquirer
            .acquire(&LocationStrategy::precise(), 5.0, BUDGET)
            .await
            .expect("Acquire failed");

        assert_eq!(res.strategy, StrategyName::Precise);
        assert_eq!(res.band, AccuracyBand::Excellent);
        assert_eq!(h.provider.calls(), 2);
    }

    #[test]
    async fn test_expired_fresh_window_asks_device() {
        let h = Harness::new([
            MockResponse::fix(secs(1), 15.0),
            MockResponse::fix(secs(1), 12.0),
        ]);
        h.acquirer
            .acquire(&LocationStrategy::balanced(), 20.0, BUDGET)
            .await
            .expect("Acquire failed");

        tokio::time::advance(secs(121)).await;

        let res = h
            .acquirer
            .acquire(&LocationStrategy::balanced(), 20.0, BUDGET)
            .await
            .expect("Acquire failed");
        assert_eq!(res.strategy, StrategyName::Balanced);
        assert_eq!(res.sample.accuracy_meters, Some(12.0));
        assert_eq!(h.provider.calls(), 2);
    }

    #[test]
    async fn test_timeout_serves_stale_cache() {
        let h = Harness::new([MockResponse::fix(secs(1), 80.0), MockResponse::Hang]);
        let first = h
            .acquirer
            .acquire(&LocationStrategy::quick(), 100.0, BUDGET)
            .await
            .expect("Acquire failed");

        tokio::time::advance(secs(4 * 60)).await;

        let res = h
            .acquirer
            .acquire(&LocationStrategy::quick(), 100.0, BUDGET)
            .await
            .expect("Stale cache wasn't used");

        assert_eq!(res.strategy, StrategyName::Cached);
        assert_eq!(res.sample, first.sample);
        match res.warning {
            Some(CacheWarning::Stale { age_seconds, cause }) => {
                assert_eq!(cause, LocationError::Timeout { after_ms: 5000 });
                assert!((240..=250).contains(&age_seconds), "Age was {age_seconds}");
            }
            None => panic!("Stale result has no warning"),
        }
        assert_eq!(
            h.acquirer.state().await,
            AcquisitionState::Succeeded(StrategyName::Cached)
        );
    }

    #[test]
    async fn test_timeout_without_cache_propagates() {
        let h = Harness::new([MockResponse::Hang]);

        let err = h
            .acquirer
            .acquire(&LocationStrategy::quick(), 100.0, BUDGET)
            .await
            .expect_err("Acquire should fail");

        assert_eq!(err, LocationError::Timeout { after_ms: 5000 });
        assert_eq!(h.acquirer.state().await, AcquisitionState::Failed);
    }

    #[test]
    async fn test_total_time_caps_timeout() {
        let h = Harness::new([MockResponse::Hang]);

        let err = h
            .acquirer
            .acquire(&LocationStrategy::precise(), 5.0, 2_000)
            .await
            .expect_err("Acquire should fail");

        assert_eq!(err, LocationError::Timeout { after_ms: 2000 });
    }

    #[test]
    async fn test_expired_cache_not_used() {
        let h = Harness::new([
            MockResponse::fix(secs(1), 80.0),
            MockResponse::fail(secs(1), LocationError::ProviderError("gps off".into())),
        ]);
        h.acquirer
            .acquire(&LocationStrategy::quick(), 100.0, BUDGET)
            .await
            .expect("Acquire failed");

        tokio::time::advance(secs(11 * 60)).await;

        let err = h
            .acquirer
            .acquire(&LocationStrategy::quick(), 100.0, BUDGET)
            .await
            .expect_err("Acquire should fail");
        assert_eq!(err, LocationError::ProviderError("gps off".into()));
    }

    #[test]
    async fn test_permission_denied() {
        let h = Harness::new([MockResponse::fail(Duration::ZERO, LocationError::PermissionDenied)]);

        let err = h
            .acquirer
            .acquire(&LocationStrategy::balanced(), 20.0, BUDGET)
            .await
            .expect_err("Acquire should fail");

        assert_eq!(err, LocationError::PermissionDenied);
        assert!(err.suggests_manual_entry());
        assert_eq!(h.provider.calls(), 1);
    }

    #[test]
    async fn test_inaccurate_stale_cache_still_served() {
        let h = Harness::new([
            MockResponse::fix(secs(1), 80.0),
            MockResponse::fail(secs(1), LocationError::PermissionDenied),
        ]);
        h.acquirer
            .acquire(&LocationStrategy::quick(), 100.0, BUDGET)
            .await
            .expect("Acquire failed");

        let res = h
            .acquirer
            .acquire(&LocationStrategy::precise(), 5.0, BUDGET)
            .await
            .expect("Stale cache wasn't used");

        assert_eq!(res.strategy, StrategyName::Cached);
        assert!(!res.meets_target);
        assert!(matches!(
            res.warning,
            Some(CacheWarning::Stale {
                cause: LocationError::PermissionDenied,
                ..
            })
        ));
    }

    #[test]
    async fn test_concurrent_callers_share_one_request() {
        let h = Harness::new([MockResponse::fix(secs(2), 10.0)]);
        let strategy = LocationStrategy::balanced();

        let (a, b) = tokio::join!(
            h.acquirer.acquire(&strategy, 20.0, BUDGET),
            h.acquirer.acquire(&strategy, 20.0, BUDGET),
        );

        let a = a.expect("First acquire failed");
        let b = b.expect("Second acquire failed");

        assert_eq!(h.provider.calls(), 1);
        assert_eq!(h.provider.max_active(), 1);
        assert_eq!(a.strategy, StrategyName::Balanced);
        assert_eq!(b.strategy, StrategyName::Cached);
        assert_eq!(a.sample, b.sample);
    }

    #[test]
    async fn test_concurrent_callers_never_overlap() {
        let h = Harness::new([
            MockResponse::fix(secs(2), 80.0),
            MockResponse::fix(secs(3), 4.0),
        ]);

        let first = {
            let acquirer = h.acquirer.clone();
            tokio::spawn(async move {
                let res = acquirer.acquire(&LocationStrategy::quick(), 100.0, BUDGET).await;
                (res, tokio::time::Instant::now())
            })
        };
        yield_now().await;
        let second = {
            let acquirer = h.acquirer.clone();
            tokio::spawn(async move {
                let res = acquirer.acquire(&LocationStrategy::precise(), 5.0, BUDGET).await;
                (res, tokio::time::Instant::now())
            })
        };

        let (first_res, first_done) = first.await.expect("Task panicked");
        let (second_res, second_done) = second.await.expect("Task panicked");

        assert_eq!(
            first_res.expect("First acquire failed").strategy,
            StrategyName::Quick
        );
        assert_eq!(
            second_res.expect("Second acquire failed").strategy,
            StrategyName::Precise
        );
        assert!(second_done >= first_done + secs(3));
        assert_eq!(h.provider.calls(), 2);
        assert_eq!(h.provider.max_active(), 1);
    }

    #[test]
    async fn test_abort_cancels_all_waiters() {
        let h = Harness::new([MockResponse::Hang, MockResponse::fix(secs(1), 10.0)]);

        let spawn = |required: f64| {
            let acquirer = h.acquirer.clone();
            tokio::spawn(async move {
                acquirer
                    .acquire(&LocationStrategy::balanced(), required, BUDGET)
                    .await
            })
        };

        let first = spawn(20.0);
        yield_now().await;
        let second = spawn(20.0);
        yield_now().await;

        h.acquirer.abort().await;

        assert_eq!(
            first.await.expect("Task panicked"),
            Err(LocationError::Cancelled)
        );
        assert_eq!(
            second.await.expect("Task panicked"),
            Err(LocationError::Cancelled)
        );
        assert_eq!(h.provider.calls(), 1);
        assert!(h.provider.saw_cancel());

        let res = h
            .acquirer
            .acquire(&LocationStrategy::balanced(), 20.0, BUDGET)
            .await
            .expect("Acquire after abort failed");
        assert_eq!(res.strategy, StrategyName::Balanced);
    }

    #[test]
    async fn test_status_updates() {
        let h = Harness::new([MockResponse::fix(secs(1), 80.0), MockResponse::Hang]);
        assert_eq!(h.acquirer.state().await, AcquisitionState::Idle);

        h.acquirer
            .acquire(&LocationStrategy::quick(), 100.0, BUDGET)
            .await
            .expect("Acquire failed");
        h.acquirer.clear_cache().await;
        h.acquirer
            .acquire(&LocationStrategy::quick(), 100.0, BUDGET)
            .await
            .expect_err("Acquire should fail");

        assert_eq!(
            h.status.states(),
            vec![
                AcquisitionState::Locating(StrategyName::Quick),
                AcquisitionState::Succeeded(StrategyName::Quick),
                AcquisitionState::Locating(StrategyName::Quick),
                AcquisitionState::Failed,
            ]
        );
    }

    #[test]
    async fn test_locate_uses_selector() {
        let h = Harness::new([
            MockResponse::fix(secs(1), 90.0),
            MockResponse::fix(secs(1), 3.0),
        ]);

        let cheap = h
            .acquirer
            .locate(500.0, EnergyPreference::Efficiency)
            .await
            .expect("Locate failed");
        assert_eq!(cheap.strategy, StrategyName::Quick);

        let tight = h
            .acquirer
            .locate(3.0, EnergyPreference::Efficiency)
            .await
            .expect("Locate failed");
        assert_eq!(tight.strategy, StrategyName::Precise);

        assert_eq!(
            h.provider.targets(),
            vec![AccuracyTarget::Low, AccuracyTarget::Highest]
        );
    }

    #[test]
    async fn test_progressive_stops_at_target() {
        let h = Harness::new([
            MockResponse::fix(secs(1), 80.0),
            MockResponse::fix(secs(2), 15.0),
            MockResponse::fix(secs(1), 3.0),
        ]);

        let res = h
            .acquirer
            .acquire_progressive(20.0, BUDGET)
            .await
            .expect("Progressive failed");

        assert_eq!(res.strategy, StrategyName::Balanced);
        assert_eq!(res.sample.accuracy_meters, Some(15.0));
        assert!(res.meets_target);
        assert!((3000..3100).contains(&res.elapsed_ms));
        assert_eq!(h.provider.calls(), 2);

        let entry = h.acquirer.cached_entry().await.expect("Nothing cached");
        assert_eq!(entry.sample.accuracy_meters, Some(15.0));
        assert_eq!(entry.source, LocationSource::Network);
    }

    #[test]
    async fn test_progressive_budget_returns_best_so_far() {
        let h = Harness::new([MockResponse::fix(secs(1), 80.0), MockResponse::Hang]);

        let res = h
            .acquirer
            .acquire_progressive(5.0, 6_000)
            .await
            .expect("Progressive failed");

        assert_eq!(res.strategy, StrategyName::Quick);
        assert!(!res.meets_target);
        // Balanced got the 5s that were left, precise never ran
        assert_eq!(h.provider.calls(), 2);
    }

    #[test]
    async fn test_progressive_skips_failures() {
        let h = Harness::new([
            MockResponse::fail(secs(1), LocationError::ProviderError("no network".into())),
            MockResponse::Hang,
            MockResponse::fix(secs(4), 4.0),
        ]);

        let res = h
            .acquirer
            .acquire_progressive(5.0, 60_000)
            .await
            .expect("Progressive failed");

        assert_eq!(res.strategy, StrategyName::Precise);
        assert!(res.meets_target);
        assert_eq!(
            h.provider.targets(),
            vec![
                AccuracyTarget::Low,
                AccuracyTarget::Balanced,
                AccuracyTarget::Highest
            ]
        );
    }

    #[test]
    async fn test_progressive_everything_fails() {
        let h = Harness::new([MockResponse::Hang, MockResponse::Hang, MockResponse::Hang]);

        let err = h
            .acquirer
            .acquire_progressive(5.0, 60_000)
            .await
            .expect_err("Progressive should fail");

        assert_eq!(err, LocationError::NoUsableResult);
        assert_eq!(h.provider.calls(), 3);
    }

    #[test]
    async fn test_progressive_permission_denied_stops() {
        let h = Harness::new([
            MockResponse::fail(Duration::ZERO, LocationError::PermissionDenied),
            MockResponse::fix(secs(1), 10.0),
        ]);

        let err = h
            .acquirer
            .acquire_progressive(20.0, BUDGET)
            .await
            .expect_err("Progressive should fail");

        assert_eq!(err, LocationError::PermissionDenied);
        assert_eq!(h.provider.calls(), 1);
    }

    #[test]
    async fn test_progressive_keeps_better_cache() {
        let h = Harness::new([
            MockResponse::fix(secs(1), 10.0),
            MockResponse::fix(secs(1), 80.0),
            MockResponse::fix(secs(1), 30.0),
            MockResponse::Hang,
        ]);
        h.acquirer
            .acquire(&LocationStrategy::balanced(), 20.0, BUDGET)
            .await
            .expect("Acquire failed");

        let res = h
            .acquirer
            .acquire_progressive(5.0, 60_000)
            .await
            .expect("Progressive failed");

        assert_eq!(res.strategy, StrategyName::Balanced);
        assert_eq!(res.sample.accuracy_meters, Some(30.0));

        let entry = h.acquirer.cached_entry().await.expect("Nothing cached");
        assert_eq!(entry.sample.accuracy_meters, Some(10.0));
    }

    #[test]
    async fn test_progressive_stale_fallback() {
        let h = Harness::new([
            MockResponse::fix(secs(1), 50.0),
            MockResponse::Hang,
            MockResponse::Hang,
            MockResponse::Hang,
        ]);
        h.acquirer
            .acquire(&LocationStrategy::quick(), 100.0, BUDGET)
            .await
            .expect("Acquire failed");

        tokio::time::advance(secs(5 * 60)).await;

        let res = h
            .acquirer
            .acquire_progressive(20.0, BUDGET)
            .await
            .expect("Stale cache wasn't used");

        assert_eq!(res.strategy, StrategyName::Cached);
        assert!(matches!(
            res.warning,
            Some(CacheWarning::Stale {
                cause: LocationError::Timeout { .. },
                ..
            })
        ));
    }

    #[test]
    async fn test_progressive_without_budget_serves_stale_cache() {
        let h = Harness::new([MockResponse::fix(secs(1), 50.0)]);
        let first = h
            .acquirer
            .acquire(&LocationStrategy::quick(), 100.0, BUDGET)
            .await
            .expect("Acquire failed");

        tokio::time::advance(secs(5 * 60)).await;

        let res = h
            .acquirer
            .acquire_progressive(20.0, 0)
            .await
            .expect("Stale cache wasn't used");

        assert_eq!(res.strategy, StrategyName::Cached);
        assert_eq!(res.sample, first.sample);
        assert!(!res.meets_target);
        assert!(matches!(
            res.warning,
            Some(CacheWarning::Stale {
                cause: LocationError::Timeout { after_ms: 0 },
                ..
            })
        ));
        assert_eq!(h.provider.calls(), 1);

        h.acquirer.clear_cache().await;
        assert_eq!(
            h.acquirer.acquire_progressive(20.0, 0).await,
            Err(LocationError::NoUsableResult)
        );
        assert_eq!(h.acquirer.state().await, AcquisitionState::Failed);
        assert_eq!(h.provider.calls(), 1);
    }

    #[test]
    async fn test_abort_progressive_skips_stale_cache() {
        let h = Harness::new([
            MockResponse::fix(secs(1), 50.0),
            MockResponse::Hang,
            MockResponse::Hang,
            MockResponse::Hang,
        ]);
        h.acquirer
            .acquire(&LocationStrategy::quick(), 100.0, BUDGET)
            .await
            .expect("Acquire failed");

        tokio::time::advance(secs(5 * 60)).await;

        let acquirer = h.acquirer.clone();
        let run = tokio::spawn(async move { acquirer.acquire_progressive(20.0, BUDGET).await });

        while h.provider.calls() < 2 {
            yield_now().await;
        }

        h.acquirer.abort().await;

        assert_eq!(
            run.await.expect("Task panicked"),
            Err(LocationError::Cancelled)
        );
        assert_eq!(h.provider.calls(), 2);
        assert!(h.provider.saw_cancel());
        assert_eq!(h.acquirer.state().await, AcquisitionState::Failed);
        assert!(h.acquirer.cached_entry().await.is_some());
    }

    #[test]
    async fn test_update_settings() {
        let h = Harness::new([MockResponse::fix(secs(1), 15.0)]);
        h.acquirer
            .acquire(&LocationStrategy::balanced(), 20.0, BUDGET)
            .await
            .expect("Acquire failed");

        let bad = LocationSettings {
            strategies: vec![],
            ..Default::default()
        };
        assert!(h.acquirer.update_settings(bad).await.is_err());

        let shorter = LocationSettings {
            fresh_cache_seconds: 10,
            stale_cache_seconds: 20,
            ..Default::default()
        };
        h.acquirer
            .update_settings(shorter.clone())
            .await
            .expect("Valid settings rejected");
        assert_eq!(h.acquirer.clone_settings().await, shorter);

        tokio::time::advance(secs(30)).await;

        let err = h
            .acquirer
            .acquire(&LocationStrategy::balanced(), 20.0, BUDGET)
            .await
            .expect_err("Cache should have expired");
        assert_eq!(err, LocationError::Timeout { after_ms: 10_000 });
    }
}
