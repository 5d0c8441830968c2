// src/miner/devshare.rs
//! Dev-fee rotation
//!
//! Two miner managers share the same hardware: one mines for the user, one
//! for the development pool. Each 300-minute cycle donates
//! `180 * DEV_FEE_PERCENT` seconds to the dev pool, placed after a uniformly
//! random 10-60 minute opening slice of user mining so the donation window
//! is not predictable. A zero fee never engages the dev manager at all.
//!
//! The cycle itself runs through a sleep seam, so tests drive it against a
//! virtual clock instead of waiting out real minutes.

use crate::config::constants;
use crate::miner::manager::MinerManager;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// One leg of a mining cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiningPhase {
    /// Mine to the user's pools for this long
    User(Duration),

    /// Mine to the development pool for this long
    Dev(Duration),
}

impl MiningPhase {
    /// The length of this phase.
    pub fn duration(&self) -> Duration {
        match self {
            MiningPhase::User(duration) | MiningPhase::Dev(duration) => *duration,
        }
    }
}

/// The start/stop surface the rotation drives
///
/// Implemented by [`MinerManager`]; tests substitute recorders to observe
/// the sequencing.
pub trait MiningSession {
    /// Begin mining for this session's pool
    fn start(&self);

    /// Stop mining for this session's pool
    fn stop(&self);
}

impl MiningSession for MinerManager {
    fn start(&self) {
        MinerManager::start(self)
    }

    fn stop(&self) {
        MinerManager::stop(self)
    }
}

/// Pure cycle arithmetic for the dev-fee rotation
#[derive(Debug, Clone, Copy)]
pub struct DevFeeSchedule {
    dev_fee_percent: f64,
}

impl DevFeeSchedule {
    /// A schedule donating `dev_fee_percent` of mining time.
    pub fn new(dev_fee_percent: f64) -> Self {
        DevFeeSchedule { dev_fee_percent }
    }

    /// Length of one full cycle.
    pub fn cycle_length(&self) -> Duration {
        constants::CYCLE_LENGTH
    }

    /// Dev mining time per cycle: `180 * fee` seconds.
    pub fn dev_mining_time(&self) -> Duration {
        Duration::from_secs_f64(180.0 * self.dev_fee_percent)
    }

    /// User mining time per cycle.
    pub fn user_mining_time(&self) -> Duration {
        self.cycle_length() - self.dev_mining_time()
    }

    /// Whether the dev pool is ever engaged.
    pub fn is_active(&self) -> bool {
        self.dev_fee_percent > 0.0
    }

    /// The three legs of one cycle, given the randomly drawn opening slice.
    pub fn cycle(&self, first_user_slice: Duration) -> [MiningPhase; 3] {
        [
            MiningPhase::User(first_user_slice),
            MiningPhase::Dev(self.dev_mining_time()),
            MiningPhase::User(self.user_mining_time() - first_user_slice),
        ]
    }

    /// Draws the opening user slice: uniformly 10 to 60 minutes.
    pub fn draw_first_slice(&self, rng: &mut impl Rng) -> Duration {
        Duration::from_secs(60 * rng.gen_range(10..=60))
    }
}

/// Runs one full rotation cycle: user, dev, user again
///
/// Assumes the user session is already mining on entry and leaves it mining
/// on exit. `sleep` is the clock seam: the binary passes a real thread
/// sleep, tests pass a virtual clock.
pub fn run_cycle(
    user: &impl MiningSession,
    dev: &impl MiningSession,
    schedule: DevFeeSchedule,
    first_slice: Duration,
    sleep: impl Fn(Duration),
) {
    // Mine for the user for the opening slice before swapping over
    sleep(first_slice);

    user.stop();

    log::info!("=== Started mining to the development pool - thank you for your support! ===");
    log::info!(
        "=== This lasts for {:.1} seconds out of every {} minutes. ===",
        schedule.dev_mining_time().as_secs_f64(),
        schedule.cycle_length().as_secs() / 60
    );

    dev.start();
    sleep(schedule.dev_mining_time());
    dev.stop();

    log::info!("=== Regular mining resumed. Thank you for your support! ===");

    user.start();
    sleep(schedule.user_mining_time() - first_slice);
}

/// Runs the rotation loop on the calling thread, forever
///
/// With a zero fee the user manager runs alone and the thread parks.
pub fn run_rotation(
    user_manager: Arc<MinerManager>,
    dev_manager: Arc<MinerManager>,
    schedule: DevFeeSchedule,
) -> ! {
    user_manager.start();

    if !schedule.is_active() {
        loop {
            std::thread::park();
        }
    }

    let mut rng = rand::thread_rng();

    loop {
        let first_slice = schedule.draw_first_slice(&mut rng);

        run_cycle(
            user_manager.as_ref(),
            dev_manager.as_ref(),
            schedule,
            first_slice,
            std::thread::sleep,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_dev_time_is_180_seconds_per_percent() {
        // A 0.02 fee donates exactly 3.6 seconds per 300-minute cycle
        let schedule = DevFeeSchedule::new(0.02);
        assert_eq!(schedule.dev_mining_time(), Duration::from_secs_f64(3.6));

        let schedule = DevFeeSchedule::new(1.0);
        assert_eq!(schedule.dev_mining_time(), Duration::from_secs(180));
    }

    #[test]
    fn test_cycle_sums_to_cycle_length_with_one_dev_phase() {
        let schedule = DevFeeSchedule::new(0.02);
        let first_slice = Duration::from_secs(60 * 25);

        let phases = schedule.cycle(first_slice);

        let total: Duration = phases.iter().map(|phase| phase.duration()).sum();
        assert_eq!(total, schedule.cycle_length());

        let dev_phases: Vec<&MiningPhase> = phases
            .iter()
            .filter(|phase| matches!(phase, MiningPhase::Dev(_)))
            .collect();

        assert_eq!(dev_phases.len(), 1);
        assert_eq!(dev_phases[0].duration(), Duration::from_secs_f64(3.6));
    }

    #[test]
    fn test_zero_fee_never_engages_dev_pool() {
        let schedule = DevFeeSchedule::new(0.0);

        assert!(!schedule.is_active());
        assert_eq!(schedule.dev_mining_time(), Duration::ZERO);
        assert_eq!(schedule.user_mining_time(), schedule.cycle_length());
    }

    #[test]
    fn test_first_slice_stays_in_bounds() {
        let schedule = DevFeeSchedule::new(1.0);
        let mut rng = rand::thread_rng();

        for _ in 0..100 {
            let slice = schedule.draw_first_slice(&mut rng);
            assert!(slice >= Duration::from_secs(600));
            assert!(slice <= Duration::from_secs(3600));
        }
    }

    /// What a session did and when, on the virtual clock.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum SessionEvent {
        UserStart(Duration),
        UserStop(Duration),
        DevStart(Duration),
        DevStop(Duration),
    }

    /// Records start/stop calls stamped with the shared virtual clock.
    struct RecordingSession {
        is_dev: bool,
        clock: Arc<Mutex<Duration>>,
        events: Arc<Mutex<Vec<SessionEvent>>>,
    }

    impl MiningSession for RecordingSession {
        fn start(&self) {
            let now = *self.clock.lock().unwrap();
            self.events.lock().unwrap().push(if self.is_dev {
                SessionEvent::DevStart(now)
            } else {
                SessionEvent::UserStart(now)
            });
        }

        fn stop(&self) {
            let now = *self.clock.lock().unwrap();
            self.events.lock().unwrap().push(if self.is_dev {
                SessionEvent::DevStop(now)
            } else {
                SessionEvent::UserStop(now)
            });
        }
    }

    #[test]
    fn test_one_cycle_on_a_virtual_clock_runs_dev_exactly_once() {
        let schedule = DevFeeSchedule::new(0.02);
        let first_slice = Duration::from_secs(60 * 25);

        let clock = Arc::new(Mutex::new(Duration::ZERO));
        let events = Arc::new(Mutex::new(Vec::new()));

        let user = RecordingSession {
            is_dev: false,
            clock: Arc::clone(&clock),
            events: Arc::clone(&events),
        };
        let dev = RecordingSession {
            is_dev: true,
            clock: Arc::clone(&clock),
            events: Arc::clone(&events),
        };

        // The sleep seam advances the virtual clock instead of waiting
        let virtual_sleep = {
            let clock = Arc::clone(&clock);
            move |duration: Duration| *clock.lock().unwrap() += duration
        };

        run_cycle(&user, &dev, schedule, first_slice, virtual_sleep);

        // One cycle advances the clock by exactly 300 minutes
        assert_eq!(*clock.lock().unwrap(), Duration::from_secs(300 * 60));

        // The dev manager was started exactly once and ran for exactly
        // 180 * 0.02 = 3.6 seconds, sandwiched between the user legs
        let dev_time = Duration::from_secs_f64(3.6);
        let expected = vec![
            SessionEvent::UserStop(first_slice),
            SessionEvent::DevStart(first_slice),
            SessionEvent::DevStop(first_slice + dev_time),
            SessionEvent::UserStart(first_slice + dev_time),
        ];

        assert_eq!(*events.lock().unwrap(), expected);
    }

    #[test]
    fn test_consecutive_cycles_keep_user_mining_between_donations() {
        let schedule = DevFeeSchedule::new(1.0);

        let clock = Arc::new(Mutex::new(Duration::ZERO));
        let events = Arc::new(Mutex::new(Vec::new()));

        let user = RecordingSession {
            is_dev: false,
            clock: Arc::clone(&clock),
            events: Arc::clone(&events),
        };
        let dev = RecordingSession {
            is_dev: true,
            clock: Arc::clone(&clock),
            events: Arc::clone(&events),
        };

        let virtual_sleep = {
            let clock = Arc::clone(&clock);
            move |duration: Duration| *clock.lock().unwrap() += duration
        };

        run_cycle(&user, &dev, schedule, Duration::from_secs(600), &virtual_sleep);
        run_cycle(&user, &dev, schedule, Duration::from_secs(3600), &virtual_sleep);

        assert_eq!(*clock.lock().unwrap(), 2 * schedule.cycle_length());

        // Two cycles: two dev donations, and the user is restarted after
        // each one, never left stopped
        let events = events.lock().unwrap();

        let dev_starts = events
            .iter()
            .filter(|event| matches!(event, SessionEvent::DevStart(_)))
            .count();
        assert_eq!(dev_starts, 2);

        let mut user_running = true;
        for event in events.iter() {
            match event {
                SessionEvent::UserStop(_) => {
                    assert!(user_running, "user stopped twice in a row");
                    user_running = false;
                }
                SessionEvent::UserStart(_) => {
                    assert!(!user_running, "user started twice in a row");
                    user_running = true;
                }
                _ => {}
            }
        }
        assert!(user_running, "cycle ended with the user stopped");
    }
}
