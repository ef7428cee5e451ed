//! GPIO relay output
//!
//! Drives a relay coil, SSR or contactor through a digital pin, directly or
//! via a transistor stage.

use hestia_core::traits::RelayOutput;
use hestia_hal::OutputPin;

/// GPIO relay output
///
/// The pin can be configured as active-high (default) or active-low.
pub struct GpioRelayOutput<P> {
    pin: P,
    /// If true, relay ON = pin LOW
    inverted: bool,
    /// Current logical state (true = relay on)
    on: bool,
}

impl<P: OutputPin + Send> GpioRelayOutput<P> {
    /// Create a new GPIO relay output, initially off
    ///
    /// # Arguments
    /// - `pin`: The GPIO pin to control
    /// - `inverted`: If true, the relay is ON when the pin is LOW
    pub fn new(pin: P, inverted: bool) -> Self {
        let mut output = Self {
            pin,
            inverted,
            on: false,
        };
        output.set(false);
        output
    }

    pub fn new_active_high(pin: P) -> Self {
        Self::new(pin, false)
    }

    pub fn new_active_low(pin: P) -> Self {
        Self::new(pin, true)
    }

    pub fn pin(&self) -> &P {
        &self.pin
    }
}

impl<P: OutputPin + Send> RelayOutput for GpioRelayOutput<P> {
    fn set(&mut self, on: bool) {
        self.on = on;
        // on XOR inverted drives the pin high
        self.pin.set_state(on != self.inverted);
    }

    fn is_on(&self) -> bool {
        self.on
    }
}

/// Adapter from an `embedded-hal` 1.0 stateful output pin
///
/// Pin errors are dropped; the cached level only follows successful writes.
pub struct EmbeddedPin<P> {
    pin: P,
    high: bool,
}

impl<P: embedded_hal::digital::StatefulOutputPin> EmbeddedPin<P> {
    pub fn new(mut pin: P) -> Self {
        let high = pin.is_set_high().unwrap_or(false);
        Self { pin, high }
    }

    pub fn into_inner(self) -> P {
        self.pin
    }
}

impl<P: embedded_hal::digital::StatefulOutputPin> OutputPin for EmbeddedPin<P> {
    fn set_high(&mut self) {
        if self.pin.set_high().is_ok() {
            self.high = true;
        }
    }

    fn set_low(&mut self) {
        if self.pin.set_low().is_ok() {
            self.high = false;
        }
    }

    fn is_set_high(&self) -> bool {
        self.high
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::digital::{self, ErrorKind, ErrorType, StatefulOutputPin};

    /// Mock GPIO pin for testing
    struct MockPin {
        high: bool,
    }

    impl MockPin {
        fn new() -> Self {
            Self { high: false }
        }
    }

    impl OutputPin for MockPin {
        fn set_high(&mut self) {
            self.high = true;
        }

        fn set_low(&mut self) {
            self.high = false;
        }

        fn is_set_high(&self) -> bool {
            self.high
        }
    }

    /// `embedded-hal` pin that can be made to fail
    struct HalPin {
        high: bool,
        broken: bool,
    }

    impl ErrorType for HalPin {
        type Error = ErrorKind;
    }

    impl digital::OutputPin for HalPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            if self.broken {
                return Err(ErrorKind::Other);
            }
            self.high = false;
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            if self.broken {
                return Err(ErrorKind::Other);
            }
            self.high = true;
            Ok(())
        }
    }

    impl StatefulOutputPin for HalPin {
        fn is_set_high(&mut self) -> Result<bool, Self::Error> {
            Ok(self.high)
        }

        fn is_set_low(&mut self) -> Result<bool, Self::Error> {
            Ok(!self.high)
        }
    }

    #[test]
    fn test_active_high_relay() {
        let mut relay = GpioRelayOutput::new_active_high(MockPin::new());
        assert!(!relay.is_on());
        assert!(!relay.pin().is_set_high());

        relay.set(true);
        assert!(relay.is_on());
        assert!(relay.pin().is_set_high());

        relay.set(false);
        assert!(!relay.is_on());
        assert!(!relay.pin().is_set_high());
    }

    #[test]
    fn test_active_low_relay() {
        let mut relay = GpioRelayOutput::new_active_low(MockPin::new());

        // Off drives the pin high
        assert!(!relay.is_on());
        assert!(relay.pin().is_set_high());

        relay.set(true);
        assert!(relay.is_on());
        assert!(!relay.pin().is_set_high());
    }

    #[test]
    fn test_embedded_hal_pin() {
        let pin = EmbeddedPin::new(HalPin {
            high: true,
            broken: false,
        });
        // Starts off even if the pin was left high
        let mut relay = GpioRelayOutput::new_active_high(pin);
        assert!(!relay.pin().is_set_high());

        relay.set(true);
        assert!(relay.pin().is_set_high());
    }

    #[test]
    fn test_embedded_hal_pin_error_keeps_level() {
        let mut pin = EmbeddedPin::new(HalPin {
            high: false,
            broken: false,
        });
        pin.set_high();
        assert!(pin.is_set_high());

        let mut inner = pin.into_inner();
        inner.broken = true;
        let mut pin = EmbeddedPin::new(inner);
        pin.set_low();
        assert!(pin.is_set_high());
    }
}
