//! Status LED patterns.

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer};

/// A single on/off indicator, e.g. the Pico W's onboard LED behind the radio chip.
pub trait StatusLed {
    async fn set(&mut self, on: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Pattern {
    Off,
    On,
    /// Toggle every `Duration`.
    Blink(Duration),
}

impl Pattern {
    pub const FAST: Pattern = Pattern::Blink(Duration::from_millis(100));
    pub const SLOW: Pattern = Pattern::Blink(Duration::from_millis(500));
}

/// Drive `led` with the latest pattern published on `pattern`. Never returns.
pub async fn run<M: RawMutex, L: StatusLed>(led: &mut L, pattern: &Signal<M, Pattern>) -> ! {
    let mut current = Pattern::Off;
    let mut lit = false;
    loop {
        match current {
            Pattern::Off | Pattern::On => {
                lit = current == Pattern::On;
                led.set(lit).await;
                current = pattern.wait().await;
            }
            Pattern::Blink(period) => {
                lit = !lit;
                led.set(lit).await;
                if let Either::Second(next) = select(Timer::after(period), pattern.wait()).await {
                    current = next;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    use super::*;

    struct Recorder(heapless::Vec<bool, 8>);

    impl StatusLed for Recorder {
        async fn set(&mut self, on: bool) {
            let _ = self.0.push(on);
        }
    }

    #[test]
    fn test_pattern_switch() {
        let signal: Signal<NoopRawMutex, Pattern> = Signal::new();
        let mut led = Recorder(heapless::Vec::new());
        signal.signal(Pattern::On);
        let fut = async {
            select(run(&mut led, &signal), async {
                embassy_futures::yield_now().await;
                signal.signal(Pattern::Off);
                embassy_futures::yield_now().await;
            })
            .await
        };
        embassy_futures::block_on(fut);
        assert_eq!(led.0.as_slice(), &[false, true, false]);
    }
}
