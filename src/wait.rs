// SPDX-License-Identifier: MIT OR Apache-2.0

//! Holding off until go-time.

use std::future::Future;
use std::time::Duration;

use chrono::{NaiveDateTime, TimeDelta};
use tracing::info;

use crate::schedule::format_duration;

const MINUTE_MICROS: i64 = 60_000_000;

/// Local wall-clock time and a way to pass it.
pub trait Clock {
    fn now(&self) -> NaiveDateTime;
    fn sleep(&self, d: Duration) -> impl Future<Output = ()>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }

    async fn sleep(&self, d: Duration) {
        tokio::time::sleep(d).await
    }
}

/// Sleeps until `go_time`, logging the time left once a minute. Returns
/// the number of sleeps taken; zero if `go_time` has already passed.
pub async fn wait_until<C: Clock>(clock: &C, go_time: NaiveDateTime) -> u32 {
    let mut sleeps = 0;
    loop {
        let remaining = go_time - clock.now();
        if remaining <= TimeDelta::zero() {
            break;
        }
        let micros = remaining.num_microseconds().unwrap_or(i64::MAX).max(1);
        let shown = TimeDelta::seconds((micros + 999_999) / 1_000_000);
        info!("Waiting to start capture in {}", format_duration(shown));

        // To the next whole minute of remaining time, or to go-time.
        let step = match micros % MINUTE_MICROS {
            0 => MINUTE_MICROS,
            partial => partial,
        };
        clock.sleep(Duration::from_micros(step as u64)).await;
        sleeps += 1;
    }
    if sleeps > 0 {
        info!("Go time {go_time} reached");
    }
    sleeps
}

#[cfg(test)]
pub(crate) mod fake {
    use std::sync::Mutex;

    use super::*;

    /// A clock that only moves when slept on.
    pub struct FakeClock {
        pub now: Mutex<NaiveDateTime>,
        pub sleeps: Mutex<Vec<Duration>>,
    }

    impl FakeClock {
        pub fn at(now: NaiveDateTime) -> Self {
            FakeClock {
                now: Mutex::new(now),
                sleeps: Mutex::new(Vec::new()),
            }
        }

        pub fn sleeps(&self) -> Vec<Duration> {
            self.sleeps.lock().unwrap().clone()
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> NaiveDateTime {
            *self.now.lock().unwrap()
        }

        async fn sleep(&self, d: Duration) {
            *self.now.lock().unwrap() += TimeDelta::from_std(d).unwrap();
            self.sleeps.lock().unwrap().push(d);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeClock;
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn sleeps_on_minute_boundaries() {
        let go = at("2026-10-19T12:11:50");
        let clock = FakeClock::at(go - TimeDelta::milliseconds(150_500));
        assert_eq!(wait_until(&clock, go).await, 3);
        assert_eq!(
            clock.sleeps(),
            [
                Duration::from_millis(30_500),
                Duration::from_secs(60),
                Duration::from_secs(60),
            ]
        );
        assert_eq!(clock.now(), go);
    }

    #[tokio::test]
    async fn short_wait_is_one_sleep() {
        let go = at("2026-10-19T12:11:50");
        let clock = FakeClock::at(go - TimeDelta::microseconds(300));
        assert_eq!(wait_until(&clock, go).await, 1);
        assert_eq!(clock.sleeps(), [Duration::from_micros(300)]);
    }

    #[tokio::test]
    async fn past_go_time_does_not_sleep() {
        let go = at("2026-10-19T12:11:50");
        let clock = FakeClock::at(go + TimeDelta::seconds(1));
        assert_eq!(wait_until(&clock, go).await, 0);
        assert!(clock.sleeps().is_empty());

        let clock = FakeClock::at(go);
        assert_eq!(wait_until(&clock, go).await, 0);
    }

    #[tokio::test]
    async fn crosses_midnight() {
        let go = at("2026-10-20T00:00:30");
        let clock = FakeClock::at(at("2026-10-19T23:59:00"));
        assert_eq!(wait_until(&clock, go).await, 2);
        assert_eq!(clock.now(), go);
    }
}
