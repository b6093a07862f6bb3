use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    acquirer::AcquisitionState, error::LocationError, sample::LocationSample,
    strategy::AccuracyTarget,
};

pub trait LocationProvider: Send + Sync {
    /// Request a single fix from the device at the given accuracy level.
    ///
    /// `cancel` is triggered when the caller is no longer interested, implementations that can
    /// stop the underlying request should. Callers do not rely on this, a request that outlives
    /// its timeout simply has its result dropped.
    fn current_location(
        &self,
        target: AccuracyTarget,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<LocationSample, LocationError>> + Send;
}

pub trait StatusUpdateSender: Send + Sync {
    fn send_update(&self, state: AcquisitionState);
}

impl StatusUpdateSender for () {
    fn send_update(&self, _state: AcquisitionState) {}
}

impl<P: LocationProvider> LocationProvider for Arc<P> {
    fn current_location(
        &self,
        target: AccuracyTarget,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<LocationSample, LocationError>> + Send {
        (**self).current_location(target, cancel)
    }
}

impl<S: StatusUpdateSender> StatusUpdateSender for Arc<S> {
    fn send_update(&self, state: AcquisitionState) {
        (**self).send_update(state)
    }
}
