//! The counting engine: the session state machine.
//!
//! For every inbound event (a recognized utterance, a manual tally, a
//! timer tick, a mode switch) the engine decides what the count, timer,
//! and completion state become, and which notifications fire. Events are
//! delivered one at a time over a single queue; each operation completes
//! fully (persist, history append, reminder and milestone checks) before
//! the next begins, so no locking is needed around the store.
//!
//! Misuse is defined as a no-op, not an error: incrementing or resetting
//! with no active mode does nothing, and stopping an already-stopped
//! timer does nothing.

use crate::{
    milestone, CompletionReason, CounterState, EngineEvent, Mode, Notification, PersistentStore,
    Result, SubMode, Ticker,
};
use crossbeam_channel::Sender;

/// Transient countdown state. Present iff a timer run is active;
/// discarded on stop, completion, and restart. Never persisted.
#[derive(Debug)]
struct TimerSession {
    remaining_seconds: u64,
    generation: u64,
}

/// The session state machine.
///
/// Owns the persistent store (the engine is the sole mutator of counter
/// state while a session is live) and emits notifications inline over
/// the outbound channel as operations apply.
pub struct CountingEngine {
    store: PersistentStore,
    active_mode: Option<Mode>,
    timer: Option<TimerSession>,
    /// Bumped on every timer start so stale ticks identify themselves
    timer_generation: u64,
    ticker: Option<Ticker>,
    events_tx: Sender<EngineEvent>,
    notify_tx: Sender<Notification>,
}

impl CountingEngine {
    /// Build an engine around a store.
    ///
    /// `events_tx` is a handle to the engine's own inbound queue; tickers
    /// spawned by `start_timer` feed their ticks through it so that tick
    /// processing stays serialized with every other event.
    pub fn new(
        store: PersistentStore,
        events_tx: Sender<EngineEvent>,
        notify_tx: Sender<Notification>,
    ) -> Self {
        Self {
            store,
            active_mode: None,
            timer: None,
            timer_generation: 0,
            ticker: None,
            events_tx,
            notify_tx,
        }
    }

    /// Dispatch one inbound event.
    pub fn handle(&mut self, event: EngineEvent) -> Result<()> {
        match event {
            EngineEvent::SetMode(mode) => {
                self.set_mode(mode);
                Ok(())
            }
            EngineEvent::Increment => self.increment(),
            EngineEvent::Reset => self.reset(),
            EngineEvent::StartTimer(seconds) => {
                self.start_timer(seconds);
                Ok(())
            }
            EngineEvent::StopTimer => {
                self.stop_timer();
                Ok(())
            }
            EngineEvent::Tick { generation } => {
                self.tick(generation);
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // State queries
    // ------------------------------------------------------------------

    pub fn active_mode(&self) -> Option<Mode> {
        self.active_mode
    }

    pub fn timer_remaining(&self) -> Option<u64> {
        self.timer.as_ref().map(|t| t.remaining_seconds)
    }

    pub fn store(&self) -> &PersistentStore {
        &self.store
    }

    /// Tear the engine down and hand the store back.
    pub fn into_store(mut self) -> PersistentStore {
        self.stop_timer();
        self.store
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    /// Set the active counting context. No side effects on counters;
    /// setting the same mode again is a no-op beyond the first call.
    pub fn set_mode(&mut self, mode: Mode) {
        self.active_mode = Some(mode);
    }

    /// The central transition: apply one unit to the active counter.
    ///
    /// Sub-mode decides the direction and gating:
    /// - `down`: decrement toward zero; completing at exactly zero fires
    ///   `target_reached`; at zero already, nothing happens.
    /// - `timer`: count up only while a timer session runs.
    /// - `up`: count up unconditionally.
    ///
    /// Every call with an active mode appends one unit to today's ledger
    /// entry and runs the milestone check, whether or not the counter
    /// moved: the ledger records chants spoken, the counter records
    /// session progress. The reminder check runs on applied increments
    /// only, against the counter's raw value.
    pub fn increment(&mut self) -> Result<()> {
        let mode = match self.active_mode {
            Some(m) => m,
            None => return Ok(()),
        };

        let mut counter = self.store.counter(mode).clone();
        let sub_mode = counter.sub_mode;

        let applied = match sub_mode {
            SubMode::Down => {
                if counter.count > 0 {
                    counter.count -= 1;
                    true
                } else {
                    // Already at zero: no underflow, no duplicate completion
                    false
                }
            }
            SubMode::Timer => {
                if self.timer.is_some() {
                    counter.count += 1;
                    true
                } else {
                    false
                }
            }
            SubMode::Up => {
                counter.count += 1;
                true
            }
        };

        if applied {
            let new_count = counter.count;
            self.store.set_counter(mode, counter)?;
            self.notify(Notification::CountChanged(new_count));

            if sub_mode == SubMode::Down && new_count == 0 {
                self.notify(Notification::Complete(CompletionReason::TargetReached));
            }

            // Reminder check: raw count, every applied increment, any sub-mode
            let settings = self.store.settings();
            if settings.reminder_enabled
                && settings.reminder_interval > 0
                && new_count > 0
                && new_count % settings.reminder_interval == 0
            {
                self.notify(Notification::Complete(CompletionReason::IntervalReached));
            }
        } else {
            tracing::debug!("Increment gated off in {:?} sub-mode", sub_mode);
        }

        self.store.log_history(mode, 1)?;

        if let Some(threshold) = milestone::crossed(self.store.total_count()) {
            tracing::info!("Lifetime milestone reached: {}", threshold);
            self.notify(Notification::Milestone(threshold));
        }

        Ok(())
    }

    /// Start a countdown, cancelling any timer already running.
    ///
    /// A non-positive duration is treated as disabled and starts nothing.
    pub fn start_timer(&mut self, duration_seconds: u64) {
        if duration_seconds == 0 {
            tracing::warn!("Ignoring start_timer with zero duration");
            return;
        }

        // Old ticker goes first; its in-flight ticks carry a stale
        // generation and will be discarded
        self.ticker = None;
        self.timer_generation += 1;

        self.timer = Some(TimerSession {
            remaining_seconds: duration_seconds,
            generation: self.timer_generation,
        });
        self.ticker = Some(Ticker::spawn(
            self.events_tx.clone(),
            self.timer_generation,
        ));

        tracing::info!("Timer started: {} seconds", duration_seconds);
    }

    /// Cancel the running timer, if any. Idempotent.
    pub fn stop_timer(&mut self) {
        self.ticker = None;
        if self.timer.take().is_some() {
            tracing::info!("Timer stopped");
        }
    }

    /// One elapsed second. Ticks whose generation does not match the
    /// current session are leftovers from a cancelled ticker.
    fn tick(&mut self, generation: u64) {
        let session = match &mut self.timer {
            Some(t) if t.generation == generation => t,
            _ => return,
        };

        session.remaining_seconds = session.remaining_seconds.saturating_sub(1);
        let remaining = session.remaining_seconds;

        if remaining > 0 {
            self.notify(Notification::TimerTick(remaining));
        } else {
            self.stop_timer();
            self.notify(Notification::Complete(CompletionReason::TimerEnded));
        }
    }

    /// Return the active counter to its starting point: the full target
    /// in `down` sub-mode, zero otherwise. No-op without an active mode.
    pub fn reset(&mut self) -> Result<()> {
        let mode = match self.active_mode {
            Some(m) => m,
            None => return Ok(()),
        };

        let mut counter = self.store.counter(mode).clone();
        counter.count = match counter.sub_mode {
            SubMode::Down => counter.target,
            _ => 0,
        };

        let new_count = counter.count;
        self.store.set_counter(mode, counter)?;
        self.notify(Notification::CountChanged(new_count));
        Ok(())
    }

    /// Replace a counter slice without counting anything (settings-style
    /// edits from the controller go through here so the single-writer
    /// rule holds while a session is live).
    pub fn configure_counter(&mut self, mode: Mode, counter: CounterState) -> Result<()> {
        self.store.set_counter(mode, counter)
    }

    fn notify(&self, notification: Notification) {
        // A detached consumer is not the engine's problem
        let _ = self.notify_tx.send(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Settings;
    use crossbeam_channel::{unbounded, Receiver};

    fn test_engine() -> (CountingEngine, Receiver<Notification>) {
        let (events_tx, _events_rx) = unbounded();
        let (notify_tx, notify_rx) = unbounded();
        let engine = CountingEngine::new(PersistentStore::in_memory(), events_tx, notify_tx);
        (engine, notify_rx)
    }

    fn drain(rx: &Receiver<Notification>) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(n) = rx.try_recv() {
            out.push(n);
        }
        out
    }

    fn set_sub_mode(engine: &mut CountingEngine, mode: Mode, sub_mode: SubMode) {
        let mut counter = engine.store().counter(mode).clone();
        counter.sub_mode = sub_mode;
        engine.configure_counter(mode, counter).unwrap();
    }

    #[test]
    fn test_increment_without_mode_is_noop() {
        let (mut engine, rx) = test_engine();

        engine.increment().unwrap();

        assert_eq!(engine.store().counter(Mode::Silent).count, 0);
        assert_eq!(engine.store().counter(Mode::Voice).count, 0);
        assert!(engine.store().history().is_empty());
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn test_up_mode_counts_each_increment() {
        let (mut engine, rx) = test_engine();
        engine.set_mode(Mode::Silent);

        for _ in 0..5 {
            engine.increment().unwrap();
        }

        assert_eq!(engine.store().counter(Mode::Silent).count, 5);
        let updates: Vec<_> = drain(&rx)
            .into_iter()
            .filter(|n| matches!(n, Notification::CountChanged(_)))
            .collect();
        assert_eq!(
            updates,
            vec![
                Notification::CountChanged(1),
                Notification::CountChanged(2),
                Notification::CountChanged(3),
                Notification::CountChanged(4),
                Notification::CountChanged(5),
            ]
        );
    }

    #[test]
    fn test_down_mode_completes_exactly_once_at_zero() {
        let (mut engine, rx) = test_engine();
        engine.set_mode(Mode::Silent);

        let mut counter = engine.store().counter(Mode::Silent).clone();
        counter.sub_mode = SubMode::Down;
        counter.target = 3;
        counter.count = 3;
        engine.configure_counter(Mode::Silent, counter).unwrap();

        // Decrement past zero; extra calls must not underflow or refire
        for _ in 0..6 {
            engine.increment().unwrap();
        }

        assert_eq!(engine.store().counter(Mode::Silent).count, 0);

        let notifications = drain(&rx);
        let completions = notifications
            .iter()
            .filter(|n| **n == Notification::Complete(CompletionReason::TargetReached))
            .count();
        assert_eq!(completions, 1);

        // Completion fires precisely on the 1 -> 0 transition
        let pos_zero = notifications
            .iter()
            .position(|n| *n == Notification::CountChanged(0))
            .unwrap();
        assert_eq!(
            notifications[pos_zero + 1],
            Notification::Complete(CompletionReason::TargetReached)
        );

        // All six calls reached the ledger, the gated ones included
        assert_eq!(engine.store().total_count(), 6);
    }

    #[test]
    fn test_gated_increments_still_reach_the_ledger() {
        let (mut engine, rx) = test_engine();
        engine.set_mode(Mode::Silent);

        let mut counter = engine.store().counter(Mode::Silent).clone();
        counter.sub_mode = SubMode::Down;
        counter.target = 2;
        counter.count = 2;
        engine.configure_counter(Mode::Silent, counter).unwrap();

        for _ in 0..5 {
            engine.increment().unwrap();
        }

        // The counter bottoms out at zero but every chant is logged
        assert_eq!(engine.store().counter(Mode::Silent).count, 0);
        assert_eq!(engine.store().total_count(), 5);

        let completions = drain(&rx)
            .iter()
            .filter(|n| **n == Notification::Complete(CompletionReason::TargetReached))
            .count();
        assert_eq!(completions, 1);
    }

    #[test]
    fn test_milestone_crossed_by_gated_increment() {
        let (mut engine, rx) = test_engine();
        engine.set_mode(Mode::Silent);
        set_sub_mode(&mut engine, Mode::Silent, SubMode::Timer);

        engine
            .store
            .log_history_at(
                chrono::NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
                Mode::Silent,
                99,
            )
            .unwrap();

        // No timer running: the counter stays put, the ledger does not
        engine.increment().unwrap();

        assert_eq!(engine.store().counter(Mode::Silent).count, 0);
        assert_eq!(engine.store().total_count(), 100);
        assert_eq!(drain(&rx), vec![Notification::Milestone(100)]);
    }

    #[test]
    fn test_timer_sub_mode_gates_increments() {
        let (mut engine, rx) = test_engine();
        engine.set_mode(Mode::Silent);
        set_sub_mode(&mut engine, Mode::Silent, SubMode::Timer);

        // No timer running: the counter stays put and nothing fires
        engine.increment().unwrap();
        assert_eq!(engine.store().counter(Mode::Silent).count, 0);
        assert!(drain(&rx).is_empty());

        // Running timer: full normal effect
        engine.start_timer(60);
        engine.increment().unwrap();
        engine.increment().unwrap();
        assert_eq!(engine.store().counter(Mode::Silent).count, 2);

        // Stopped again: the counter freezes but the ledger keeps going
        engine.stop_timer();
        engine.increment().unwrap();
        assert_eq!(engine.store().counter(Mode::Silent).count, 2);
        assert_eq!(engine.store().total_count(), 4);
    }

    #[test]
    fn test_stop_timer_is_idempotent() {
        let (mut engine, _rx) = test_engine();

        engine.stop_timer();
        assert_eq!(engine.timer_remaining(), None);

        engine.start_timer(10);
        engine.stop_timer();
        engine.stop_timer();
        assert_eq!(engine.timer_remaining(), None);
    }

    #[test]
    fn test_set_mode_twice_is_noop_beyond_first() {
        let (mut engine, rx) = test_engine();

        engine.set_mode(Mode::Voice);
        let first = engine.active_mode();
        engine.set_mode(Mode::Voice);

        assert_eq!(engine.active_mode(), first);
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn test_reminder_fires_on_exact_multiples() {
        let (mut engine, rx) = test_engine();
        engine.set_mode(Mode::Silent);

        let mut settings = Settings::default();
        settings.reminder_enabled = true;
        settings.reminder_interval = 10;
        // Route the settings write through the engine-owned store
        let mut counter = engine.store().counter(Mode::Silent).clone();
        counter.sub_mode = SubMode::Up;
        engine.configure_counter(Mode::Silent, counter).unwrap();
        engine.store.set_settings(settings).unwrap();

        for _ in 0..30 {
            engine.increment().unwrap();
        }

        let fired: Vec<_> = drain(&rx)
            .into_iter()
            .enumerate()
            .filter(|(_, n)| *n == Notification::Complete(CompletionReason::IntervalReached))
            .collect();
        assert_eq!(fired.len(), 3);

        // They must sit directly after the updates for 10, 20, 30
        let (mut engine2, rx2) = test_engine();
        engine2.set_mode(Mode::Silent);
        let mut s = Settings::default();
        s.reminder_enabled = true;
        s.reminder_interval = 10;
        engine2.store.set_settings(s).unwrap();
        for _ in 0..10 {
            engine2.increment().unwrap();
        }
        let n = drain(&rx2);
        let pos = n
            .iter()
            .position(|x| *x == Notification::CountChanged(10))
            .unwrap();
        assert_eq!(
            n[pos + 1],
            Notification::Complete(CompletionReason::IntervalReached)
        );
    }

    #[test]
    fn test_reminder_disabled_or_zero_interval_never_fires() {
        let (mut engine, rx) = test_engine();
        engine.set_mode(Mode::Silent);

        let mut settings = Settings::default();
        settings.reminder_enabled = true;
        settings.reminder_interval = 0; // defensively treated as disabled
        engine.store.set_settings(settings).unwrap();

        for _ in 0..20 {
            engine.increment().unwrap();
        }

        assert!(drain(&rx)
            .iter()
            .all(|n| *n != Notification::Complete(CompletionReason::IntervalReached)));
    }

    #[test]
    fn test_reminder_checks_raw_count_in_down_mode() {
        let (mut engine, rx) = test_engine();
        engine.set_mode(Mode::Silent);

        let mut counter = engine.store().counter(Mode::Silent).clone();
        counter.sub_mode = SubMode::Down;
        counter.target = 25;
        counter.count = 25;
        engine.configure_counter(Mode::Silent, counter).unwrap();

        let mut settings = Settings::default();
        settings.reminder_enabled = true;
        settings.reminder_interval = 10;
        engine.store.set_settings(settings).unwrap();

        for _ in 0..25 {
            engine.increment().unwrap();
        }

        // Descending count passes 20 and 10; zero is guarded off
        let fired = drain(&rx)
            .into_iter()
            .filter(|n| *n == Notification::Complete(CompletionReason::IntervalReached))
            .count();
        assert_eq!(fired, 2);
    }

    #[test]
    fn test_history_splits_by_mode() {
        let (mut engine, _rx) = test_engine();

        engine.set_mode(Mode::Voice);
        for _ in 0..3 {
            engine.increment().unwrap();
        }
        engine.set_mode(Mode::Silent);
        for _ in 0..2 {
            engine.increment().unwrap();
        }

        let today = chrono::Local::now().date_naive();
        let entry = engine.store().history().get(&today).unwrap();
        assert_eq!(entry.voice, 3);
        assert_eq!(entry.silent, 2);
        assert_eq!(engine.store().total_count(), 5);
    }

    #[test]
    fn test_milestone_fires_on_exact_crossing_only() {
        let (mut engine, rx) = test_engine();
        engine.set_mode(Mode::Silent);

        // Seed lifetime history to just below the first threshold
        engine
            .store
            .log_history_at(
                chrono::NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
                Mode::Silent,
                97,
            )
            .unwrap();

        for _ in 0..5 {
            engine.increment().unwrap();
        }

        // Totals hit 98, 99, 100, 101, 102 - one milestone at 100
        let milestones: Vec<_> = drain(&rx)
            .into_iter()
            .filter(|n| matches!(n, Notification::Milestone(_)))
            .collect();
        assert_eq!(milestones, vec![Notification::Milestone(100)]);
    }

    #[test]
    fn test_timer_countdown_sequence() {
        let (mut engine, rx) = test_engine();
        engine.start_timer(3);
        let generation = engine.timer.as_ref().unwrap().generation;

        engine.handle(EngineEvent::Tick { generation }).unwrap();
        engine.handle(EngineEvent::Tick { generation }).unwrap();
        engine.handle(EngineEvent::Tick { generation }).unwrap();

        assert_eq!(
            drain(&rx),
            vec![
                Notification::TimerTick(2),
                Notification::TimerTick(1),
                Notification::Complete(CompletionReason::TimerEnded),
            ]
        );

        // Session is gone; further ticks of any generation do nothing
        engine.handle(EngineEvent::Tick { generation }).unwrap();
        assert!(drain(&rx).is_empty());
        assert_eq!(engine.timer_remaining(), None);
    }

    #[test]
    fn test_restarting_timer_discards_stale_ticks() {
        let (mut engine, rx) = test_engine();

        engine.start_timer(100);
        let old_generation = engine.timer.as_ref().unwrap().generation;

        engine.start_timer(5);
        let new_generation = engine.timer.as_ref().unwrap().generation;
        assert_ne!(old_generation, new_generation);

        // A tick the old ticker managed to queue before cancellation
        engine
            .handle(EngineEvent::Tick {
                generation: old_generation,
            })
            .unwrap();
        assert_eq!(engine.timer_remaining(), Some(5));
        assert!(drain(&rx).is_empty());

        engine
            .handle(EngineEvent::Tick {
                generation: new_generation,
            })
            .unwrap();
        assert_eq!(engine.timer_remaining(), Some(4));
        assert_eq!(drain(&rx), vec![Notification::TimerTick(4)]);
    }

    #[test]
    fn test_zero_duration_timer_is_ignored() {
        let (mut engine, rx) = test_engine();
        engine.start_timer(0);
        assert_eq!(engine.timer_remaining(), None);
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn test_reset_down_mode_restores_target() {
        let (mut engine, rx) = test_engine();
        engine.set_mode(Mode::Silent);

        let mut counter = engine.store().counter(Mode::Silent).clone();
        counter.sub_mode = SubMode::Down;
        counter.target = 108;
        counter.count = 40;
        engine.configure_counter(Mode::Silent, counter).unwrap();

        engine.reset().unwrap();

        assert_eq!(engine.store().counter(Mode::Silent).count, 108);
        assert_eq!(drain(&rx), vec![Notification::CountChanged(108)]);
    }

    #[test]
    fn test_reset_up_mode_zeroes_count() {
        let (mut engine, rx) = test_engine();
        engine.set_mode(Mode::Voice);

        for _ in 0..4 {
            engine.increment().unwrap();
        }
        drain(&rx);

        engine.reset().unwrap();
        assert_eq!(engine.store().counter(Mode::Voice).count, 0);
        assert_eq!(drain(&rx), vec![Notification::CountChanged(0)]);

        // Reset does not touch history
        assert_eq!(engine.store().total_count(), 4);
    }

    #[test]
    fn test_reset_without_mode_is_noop() {
        let (mut engine, rx) = test_engine();
        engine.reset().unwrap();
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn test_event_dispatch_matches_direct_calls() {
        let (mut engine, rx) = test_engine();

        engine.handle(EngineEvent::SetMode(Mode::Silent)).unwrap();
        engine.handle(EngineEvent::Increment).unwrap();
        engine.handle(EngineEvent::Increment).unwrap();
        engine.handle(EngineEvent::Reset).unwrap();

        assert_eq!(
            drain(&rx),
            vec![
                Notification::CountChanged(1),
                Notification::CountChanged(2),
                Notification::CountChanged(0),
            ]
        );
    }
}
