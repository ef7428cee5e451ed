//! Firmware update traits

/// A running firmware update
pub trait SwUpdate {
    /// Begin the update (check and download)
    fn start(&mut self);

    /// Run one non-blocking step
    fn iterate(&mut self);

    fn is_started(&self) -> bool;

    /// Update applied; a restart activates it
    fn is_finished(&self) -> bool;

    /// Update failed or nothing to install
    fn is_aborted(&self) -> bool;
}

/// Creates updaters on demand
pub trait UpdaterFactory {
    /// Build an updater for `url`; `beta` selects the beta channel
    fn create(&mut self, url: &str, beta: bool) -> Option<alloc::boxed::Box<dyn SwUpdate>>;
}
