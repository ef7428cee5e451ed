//! Element registry
//!
//! The registry owns every element for the lifetime of the runtime. Channel
//! numbers are assigned in registration order and never reused, so they
//! stay stable across reboots as long as the registration code does not
//! change.
//!
//! Connected-session work is spread over ticks with a [`Cursor`]: each tick
//! resumes where the previous one stopped. Adding or removing an element
//! bumps the registry generation, which sends stale cursors back to the
//! head of the list.
//!
//! The registry lives in a [`SharedRegistry`] so timer callbacks running
//! outside the main loop (an interrupt, another thread) can reach the
//! elements through the same lock the main loop takes.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;

use super::{Channel, Context, Element};
use crate::traits::Uplink;

/// Position of the connected round-robin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cursor {
    index: usize,
    generation: u32,
}

/// Owning, ordered set of elements
#[derive(Default)]
pub struct Registry {
    elements: Vec<Box<dyn Element>>,
    generation: u32,
    /// Next channel number; 256 once all 256 numbers are taken
    next_channel: u16,
    /// Timer hooks are ignored until the runtime has booted
    timers_enabled: bool,
}

impl Registry {
    pub const fn new() -> Self {
        Self {
            elements: Vec::new(),
            generation: 0,
            next_channel: 0,
            timers_enabled: false,
        }
    }

    pub fn set_timers_enabled(&mut self, enabled: bool) {
        self.timers_enabled = enabled;
    }

    pub fn timers_enabled(&self) -> bool {
        self.timers_enabled
    }

    /// Register an element
    ///
    /// Returns the channel number assigned to the element's channel, or
    /// `None` if it has no channel. When all 256 channel numbers are taken
    /// the element is rejected (and dropped) with a warning.
    pub fn add(&mut self, mut element: Box<dyn Element>) -> Option<u8> {
        let number = match element.channel_mut() {
            Some(channel) => {
                let Ok(number) = u8::try_from(self.next_channel) else {
                    warn!("Channel space exhausted, element not registered");
                    return None;
                };
                self.next_channel += 1;
                channel.set_number(number);
                Some(number)
            }
            None => None,
        };
        self.elements.push(element);
        self.generation = self.generation.wrapping_add(1);
        number
    }

    /// Remove the element owning `channel`
    pub fn remove(&mut self, channel: u8) -> Option<Box<dyn Element>> {
        let index = self.position(channel)?;
        self.generation = self.generation.wrapping_add(1);
        Some(self.elements.remove(index))
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    fn position(&self, channel: u8) -> Option<usize> {
        self.elements.iter().position(|e| {
            e.channel()
                .is_some_and(|c: &Channel| c.number() == channel)
        })
    }

    /// Find the element owning `channel`
    pub fn find_mut(&mut self, channel: u8) -> Option<&mut dyn Element> {
        let index = self.position(channel)?;
        Some(self.elements[index].as_mut())
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Element> {
        self.elements.iter().map(|e| e.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut (dyn Element + 'static)> {
        self.elements.iter_mut().map(|e| e.as_mut())
    }

    /// Run a hook on every element in registration order
    pub fn for_each(&mut self, mut f: impl FnMut(&mut dyn Element)) {
        for element in self.elements.iter_mut() {
            f(element.as_mut());
        }
    }

    /// Continue the connected round-robin
    ///
    /// Visits elements from the cursor until one returns `false` (it sent
    /// something) or the end of the list is reached, then wraps to the head.
    /// Returns the number of elements visited.
    pub fn iterate_connected(
        &mut self,
        cursor: &mut Cursor,
        ctx: &mut Context<'_>,
        uplink: &mut dyn Uplink,
    ) -> usize {
        if cursor.generation != self.generation || cursor.index >= self.elements.len() {
            cursor.index = 0;
            cursor.generation = self.generation;
        }

        let mut visited = 0;
        while cursor.index < self.elements.len() {
            let keep_going = self.elements[cursor.index].iterate_connected(ctx, uplink);
            cursor.index += 1;
            visited += 1;
            if !keep_going {
                break;
            }
        }
        if cursor.index >= self.elements.len() {
            cursor.index = 0;
        }
        visited
    }
}

/// Element registry behind a blocking mutex
///
/// Use `CriticalSectionRawMutex` and a `static` when the timer hooks run
/// from an interrupt or another thread, [`NoopRawMutex`] when everything
/// runs in the main loop:
///
/// ```ignore
/// static ELEMENTS: SharedRegistry<CriticalSectionRawMutex> = SharedRegistry::new();
///
/// let mut runtime = DeviceRuntime::new(&ELEMENTS, config, state, clock, system, settings);
/// // timer interrupt
/// ELEMENTS.on_timer();
/// ```
///
/// [`NoopRawMutex`]: embassy_sync::blocking_mutex::raw::NoopRawMutex
pub struct SharedRegistry<M: RawMutex> {
    inner: Mutex<M, RefCell<Registry>>,
}

impl<M: RawMutex> SharedRegistry<M> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Registry::new())),
        }
    }

    /// Run `f` with the registry locked
    ///
    /// Returns `None` if the registry is already borrowed further up the
    /// same call stack.
    pub fn lock<R>(&self, f: impl FnOnce(&mut Registry) -> R) -> Option<R> {
        self.inner.lock(|cell| match cell.try_borrow_mut() {
            Ok(mut registry) => Some(f(&mut registry)),
            Err(_) => None,
        })
    }

    /// Slow timer tick (~100 ms)
    pub fn on_timer(&self) {
        let ran = self.lock(|registry| {
            if registry.timers_enabled {
                registry.for_each(|element| element.on_timer());
            }
        });
        if ran.is_none() {
            trace!("Timer skipped, registry busy");
        }
    }

    /// Fast timer tick (~10 ms)
    pub fn on_fast_timer(&self) {
        let ran = self.lock(|registry| {
            if registry.timers_enabled {
                registry.for_each(|element| element.on_fast_timer());
            }
        });
        if ran.is_none() {
            trace!("Fast timer skipped, registry busy");
        }
    }
}

impl<M: RawMutex> Default for SharedRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::testing::{Harness, RecordingUplink};
    use alloc::sync::Arc;
    use core::sync::atomic::{AtomicU32, Ordering};
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use hestia_protocol::ChannelFunction;

    struct Chatty {
        channel: Channel,
        sends: u32,
    }

    impl Chatty {
        fn boxed(sends: u32) -> Box<Self> {
            Box::new(Self {
                channel: Channel::new(ChannelFunction::PowerSwitch),
                sends,
            })
        }
    }

    impl Element for Chatty {
        fn channel(&self) -> Option<&Channel> {
            Some(&self.channel)
        }

        fn channel_mut(&mut self) -> Option<&mut Channel> {
            Some(&mut self.channel)
        }

        fn iterate_connected(&mut self, _ctx: &mut Context<'_>, uplink: &mut dyn Uplink) -> bool {
            if self.sends == 0 {
                return true;
            }
            self.sends -= 1;
            uplink.send_channel_value(self.channel.number(), self.channel.value());
            false
        }
    }

    struct NoChannel;

    impl Element for NoChannel {}

    #[test]
    fn test_channel_numbers_in_registration_order() {
        let mut registry = Registry::new();
        assert_eq!(registry.add(Chatty::boxed(0)), Some(0));
        assert_eq!(registry.add(Box::new(NoChannel)), None);
        assert_eq!(registry.add(Chatty::boxed(0)), Some(1));
        assert_eq!(registry.len(), 3);
        assert!(registry.find_mut(1).is_some());
        assert!(registry.find_mut(2).is_none());
    }

    #[test]
    fn test_last_channel_number_usable() {
        let mut registry = Registry::new();
        for expected in 0..=u8::MAX {
            assert_eq!(registry.add(Chatty::boxed(0)), Some(expected));
        }
        assert!(registry.find_mut(255).is_some());

        // Channel space exhausted: rejected, channel-less elements still fit
        assert_eq!(registry.add(Chatty::boxed(0)), None);
        assert_eq!(registry.len(), 256);
        assert_eq!(registry.add(Box::new(NoChannel)), None);
        assert_eq!(registry.len(), 257);
    }

    #[test]
    fn test_round_robin_resumes_across_ticks() {
        let mut h = Harness::new();
        let mut uplink = RecordingUplink::default();
        let mut registry = Registry::new();
        registry.add(Chatty::boxed(1));
        registry.add(Chatty::boxed(1));
        registry.add(Chatty::boxed(1));

        let mut cursor = Cursor::default();
        for _ in 0..3 {
            registry.iterate_connected(&mut cursor, &mut h.ctx(), &mut uplink);
        }
        let order: Vec<u8> = uplink.values.iter().map(|(ch, _)| *ch).collect();
        assert_eq!(order, [0, 1, 2]);

        // Everyone idle: a full pass, then wrap
        assert_eq!(registry.iterate_connected(&mut cursor, &mut h.ctx(), &mut uplink), 3);
        assert_eq!(uplink.values.len(), 3);
    }

    #[test]
    fn test_generation_change_restarts_from_head() {
        let mut h = Harness::new();
        let mut uplink = RecordingUplink::default();
        let mut registry = Registry::new();
        registry.add(Chatty::boxed(2));
        registry.add(Chatty::boxed(2));

        let mut cursor = Cursor::default();
        registry.iterate_connected(&mut cursor, &mut h.ctx(), &mut uplink);
        assert_eq!(uplink.values.last().map(|v| v.0), Some(0));

        registry.add(Chatty::boxed(0));
        registry.iterate_connected(&mut cursor, &mut h.ctx(), &mut uplink);
        assert_eq!(uplink.values.last().map(|v| v.0), Some(0));
    }

    #[test]
    fn test_remove() {
        let mut registry = Registry::new();
        registry.add(Chatty::boxed(0));
        registry.add(Chatty::boxed(0));
        let generation = registry.generation();
        assert!(registry.remove(0).is_some());
        assert!(registry.remove(0).is_none());
        assert_ne!(registry.generation(), generation);
        assert!(registry.find_mut(1).is_some());
    }

    struct Ticks(Arc<AtomicU32>);

    impl Element for Ticks {
        fn on_timer(&mut self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_timer_hooks_wait_for_enable() {
        let shared: SharedRegistry<NoopRawMutex> = SharedRegistry::new();
        let ticks = Arc::new(AtomicU32::new(0));
        shared.lock(|registry| registry.add(Box::new(Ticks(ticks.clone()))));

        shared.on_timer();
        assert_eq!(ticks.load(Ordering::Relaxed), 0);

        shared.lock(|registry| registry.set_timers_enabled(true));
        shared.on_timer();
        shared.on_fast_timer();
        assert_eq!(ticks.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_timer_skipped_while_registry_borrowed() {
        let shared: SharedRegistry<NoopRawMutex> = SharedRegistry::new();
        let ticks = Arc::new(AtomicU32::new(0));
        shared.lock(|registry| {
            registry.add(Box::new(Ticks(ticks.clone())));
            registry.set_timers_enabled(true);
        });

        // A timer firing in the middle of main-loop work does not reenter
        let nested = shared.lock(|_| shared.on_timer());
        assert_eq!(nested, Some(()));
        assert_eq!(ticks.load(Ordering::Relaxed), 0);

        shared.on_timer();
        assert_eq!(ticks.load(Ordering::Relaxed), 1);
    }
}
