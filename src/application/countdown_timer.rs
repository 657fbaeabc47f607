use crate::domain::countdown::{Countdown, Tick};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

const TICK: Duration = Duration::from_secs(1);

/// Drives a [`Countdown`] once per second on the runtime.
///
/// `on_tick` sees every remaining value including the final zero;
/// `on_complete` runs exactly once, and never if the timer is cancelled or
/// dropped first.
#[derive(Debug)]
pub struct CountdownTimer {
    handle: JoinHandle<()>,
}

impl CountdownTimer {
    pub fn start<T, C>(countdown: Countdown, mut on_tick: T, on_complete: C) -> Self
    where
        T: FnMut(u64) + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut countdown = countdown;
            let mut on_complete = Some(on_complete);
            let mut ticker = interval(TICK);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            let mut step = 0;
            loop {
                match countdown.advance(step) {
                    Tick::Running(remaining) => on_tick(remaining),
                    Tick::Completed => {
                        on_tick(0);
                        if let Some(on_complete) = on_complete.take() {
                            on_complete();
                        }
                        break;
                    }
                    Tick::Finished => break,
                }
                ticker.tick().await;
                step = 1;
            }
        });
        Self { handle }
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for CountdownTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<u64>>>, Arc<AtomicUsize>) {
        (Arc::new(Mutex::new(Vec::new())), Arc::new(AtomicUsize::new(0)))
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_down_and_completes_once() {
        let (ticks, completions) = recorder();
        let tick_sink = Arc::clone(&ticks);
        let done = Arc::clone(&completions);

        let timer = CountdownTimer::start(
            Countdown::new(3),
            move |remaining| tick_sink.lock().expect("ticks lock").push(remaining),
            move || {
                done.fetch_add(1, Ordering::SeqCst);
            },
        );

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(timer.is_finished());
        assert_eq!(*ticks.lock().expect("ticks lock"), vec![3, 2, 1, 0]);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn already_expired_countdown_completes_immediately() {
        let (ticks, completions) = recorder();
        let tick_sink = Arc::clone(&ticks);
        let done = Arc::clone(&completions);

        let _timer = CountdownTimer::start(
            Countdown::until(0, 10_000),
            move |remaining| tick_sink.lock().expect("ticks lock").push(remaining),
            move || {
                done.fetch_add(1, Ordering::SeqCst);
            },
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(*ticks.lock().expect("ticks lock"), vec![0]);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_completes() {
        let (ticks, completions) = recorder();
        let tick_sink = Arc::clone(&ticks);
        let done = Arc::clone(&completions);

        let timer = CountdownTimer::start(
            Countdown::from_minutes(1),
            move |remaining| tick_sink.lock().expect("ticks lock").push(remaining),
            move || {
                done.fetch_add(1, Ordering::SeqCst);
            },
        );

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        timer.cancel();
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(*ticks.lock().expect("ticks lock"), vec![60, 59, 58]);
        assert_eq!(completions.load(Ordering::SeqCst), 0);
    }
}
