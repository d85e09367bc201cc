//! Trigger loop: sensor edge in, one sort cycle out.
//!
//! States: `Idle → Triggered → Classifying → Announcing → Actuating → CoolingDown → Idle`.
//!
//! The loop is the only thing that fires actuators. It handles one cycle at a time on its
//! own thread; triggers that arrive while a cycle is running are counted and dropped.
//! Per-cycle faults (no frame, classifier error or panic, pin write error) never end the
//! loop: they turn the cycle's category into `Error`.

use anyhow::Result;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use crate::actuator::{ActuatorController, Direction, MotorChannel, PulseOutcome};
use crate::annotate;
use crate::audio::{AudioSink, SoundCue};
use crate::clock::Clock;
use crate::config::TimingSettings;
use crate::detect::{Detection, SharedBackend};
use crate::frame::{Frame, LatestFrame};
use crate::gpio::InputPin;
use crate::resolve::{CategoryResolver, SortCategory};
use crate::shutdown::ShutdownSignal;
use crate::ui::{CountdownOutcome, StatusView, UiPort};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerState {
    Idle,
    Triggered,
    Classifying,
    Announcing,
    Actuating,
    CoolingDown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerSource {
    Sensor,
    Manual,
}

/// Record of one classification-to-actuation pass.
#[derive(Clone, Debug)]
pub struct TriggerCycle {
    pub id: u64,
    pub source: TriggerSource,
    pub started_at: SystemTime,
    pub frame: Option<Arc<Frame>>,
    pub detections: Vec<Detection>,
    pub category: SortCategory,
    pub countdown_deadline: Option<Instant>,
    /// Channel whose Up pulse fired and was reset.
    pub actuated: Option<MotorChannel>,
    pub snapshot: Option<PathBuf>,
    pub faults: Vec<String>,
    /// Shutdown cut the cycle short.
    pub interrupted: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TriggerStats {
    pub cycles: u64,
    pub ignored_triggers: u64,
    pub missing_frames: u64,
    pub classifier_failures: u64,
    pub actuator_faults: u64,
    pub sensor_faults: u64,
    /// Indexed by `SortCategory::code()`.
    pub by_category: [u64; 5],
}

/// Item-in-position sensor.
pub trait TriggerSensor: Send {
    /// True while the sensor reports an item.
    fn is_active(&mut self) -> Result<bool>;
}

/// Photo-interrupter on a GPIO input, active LOW.
pub struct GpioSensor {
    pin: InputPin,
}

impl GpioSensor {
    pub fn new(pin: InputPin) -> Self {
        Self { pin }
    }
}

impl TriggerSensor for GpioSensor {
    fn is_active(&mut self) -> Result<bool> {
        Ok(self.pin.read()?.is_low())
    }
}

/// Requests a cycle without the sensor (operator keypress).
#[derive(Clone)]
pub struct ManualTrigger {
    tx: Sender<()>,
}

impl ManualTrigger {
    /// Returns false when the loop is gone.
    pub fn request(&self) -> bool {
        self.tx.send(()).is_ok()
    }
}

/// Everything the loop drives.
pub struct TriggerLoopParts {
    pub sensor: Box<dyn TriggerSensor>,
    pub frames: LatestFrame,
    pub classifier: SharedBackend,
    pub resolver: CategoryResolver,
    pub actuator: Arc<ActuatorController>,
    pub audio: Arc<dyn AudioSink>,
    pub ui: Box<dyn UiPort>,
    pub timing: TimingSettings,
    pub snapshot_path: Option<PathBuf>,
    pub shutdown: ShutdownSignal,
    pub clock: Arc<dyn Clock>,
}

pub struct TriggerLoop {
    parts: TriggerLoopParts,
    manual_tx: Sender<()>,
    manual_rx: Receiver<()>,
    state: TriggerState,
    /// A new trigger is accepted only after the sensor read released once.
    armed: bool,
    sensor_was_active: bool,
    alarm_active: bool,
    next_cycle_id: u64,
    stats: TriggerStats,
}

impl TriggerLoop {
    pub fn new(parts: TriggerLoopParts) -> Self {
        let (manual_tx, manual_rx) = mpsc::channel();
        Self {
            parts,
            manual_tx,
            manual_rx,
            state: TriggerState::Idle,
            armed: true,
            sensor_was_active: false,
            alarm_active: false,
            next_cycle_id: 1,
            stats: TriggerStats::default(),
        }
    }

    pub fn manual_trigger(&self) -> ManualTrigger {
        ManualTrigger {
            tx: self.manual_tx.clone(),
        }
    }

    pub fn state(&self) -> TriggerState {
        self.state
    }

    pub fn stats(&self) -> &TriggerStats {
        &self.stats
    }

    /// Poll until shutdown. Returns the final statistics.
    pub fn run(mut self) -> TriggerStats {
        log::info!("trigger loop running");
        self.parts.ui.show_idle();
        while !self.parts.shutdown.is_triggered() {
            if self.step().is_none() {
                self.parts
                    .clock
                    .wait(&self.parts.shutdown, self.parts.timing.poll_interval);
            }
        }
        log::info!(
            "trigger loop stopped after {} cycles ({} ignored triggers)",
            self.stats.cycles,
            self.stats.ignored_triggers
        );
        self.stats
    }

    /// One idle poll. Runs a full cycle when a trigger is accepted.
    pub fn step(&mut self) -> Option<TriggerCycle> {
        if self.parts.shutdown.is_triggered() {
            return None;
        }
        let manual = self.take_manual_request();
        let sensor_active = self.read_sensor();

        if !self.armed {
            if sensor_active {
                if !self.sensor_was_active {
                    self.stats.ignored_triggers += 1;
                }
            } else {
                log::debug!("trigger: sensor released, re-armed");
                self.armed = true;
            }
        }
        let accepted_sensor = self.armed && sensor_active;
        self.sensor_was_active = sensor_active;

        let source = if accepted_sensor {
            TriggerSource::Sensor
        } else if manual {
            TriggerSource::Manual
        } else {
            return None;
        };
        Some(self.run_cycle(source))
    }

    fn take_manual_request(&mut self) -> bool {
        let mut requested = false;
        while self.manual_rx.try_recv().is_ok() {
            if requested {
                self.stats.ignored_triggers += 1;
            }
            requested = true;
        }
        requested
    }

    fn read_sensor(&mut self) -> bool {
        match self.parts.sensor.is_active() {
            Ok(active) => active,
            Err(err) => {
                self.stats.sensor_faults += 1;
                log::warn!("trigger: sensor read failed: {:#}", err);
                false
            }
        }
    }

    fn enter(&mut self, state: TriggerState) {
        log::debug!("trigger: {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    fn run_cycle(&mut self, source: TriggerSource) -> TriggerCycle {
        let mut cycle = TriggerCycle {
            id: self.next_cycle_id,
            source,
            started_at: SystemTime::now(),
            frame: None,
            detections: Vec::new(),
            category: SortCategory::Error,
            countdown_deadline: None,
            actuated: None,
            snapshot: None,
            faults: Vec::new(),
            interrupted: false,
        };
        self.next_cycle_id += 1;
        self.armed = false;
        log::info!("cycle {}: accepted {:?} trigger", cycle.id, source);

        // A looping alarm from the previous cycle ends when the next one begins.
        if self.alarm_active {
            self.parts.audio.stop();
            self.alarm_active = false;
        }

        self.enter(TriggerState::Triggered);
        if source == TriggerSource::Sensor && self.wait_watching(self.parts.timing.settle) {
            return self.abort(cycle);
        }
        cycle.frame = self.parts.frames.latest();

        self.enter(TriggerState::Classifying);
        cycle.detections = self.classify(&mut cycle);

        self.enter(TriggerState::Announcing);
        cycle.category = self.parts.resolver.resolve(&cycle.detections);
        cycle.snapshot = self.write_snapshot(&cycle);
        self.parts
            .ui
            .show(StatusView::for_category(cycle.category), cycle.snapshot.clone());
        log::info!(
            "cycle {}: {} from {} detections",
            cycle.id,
            cycle.category,
            cycle.detections.len()
        );

        self.enter(TriggerState::Actuating);
        let routed = self.actuate_up(&mut cycle);
        if cycle.interrupted {
            return self.abort(cycle);
        }
        self.play_cue(cycle.category);
        if self.wait_watching(self.parts.timing.announce_hold) {
            return self.abort(cycle);
        }

        self.enter(TriggerState::CoolingDown);
        let seconds = self.parts.timing.countdown_secs;
        cycle.countdown_deadline =
            Some(self.parts.clock.now() + Duration::from_secs(u64::from(seconds)));
        if self.await_countdown(seconds) == CountdownOutcome::Cancelled {
            return self.abort(cycle);
        }

        if let Some(channel) = routed {
            match self.parts.actuator.fire(
                channel,
                Direction::Down,
                self.parts.timing.pulse_down,
            ) {
                Ok(PulseOutcome::Completed) => cycle.actuated = Some(channel),
                Ok(PulseOutcome::Interrupted) => cycle.interrupted = true,
                Err(err) => {
                    self.stats.actuator_faults += 1;
                    log::error!("cycle {}: {:?} reset pulse failed: {:#}", cycle.id, channel, err);
                    cycle.faults.push(format!("reset pulse failed: {:#}", err));
                }
            }
        }
        self.parts.ui.show_idle();
        self.finish(cycle)
    }

    fn classify(&mut self, cycle: &mut TriggerCycle) -> Vec<Detection> {
        let Some(frame) = cycle.frame.clone() else {
            self.stats.missing_frames += 1;
            log::warn!("cycle {}: no camera frame available yet", cycle.id);
            cycle.faults.push("no frame".to_string());
            return Vec::new();
        };
        let result = {
            let mut backend = self
                .parts
                .classifier
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            panic::catch_unwind(AssertUnwindSafe(|| backend.detect(&frame)))
        };
        match result {
            Ok(Ok(detections)) => detections,
            Ok(Err(err)) => {
                self.stats.classifier_failures += 1;
                log::warn!("cycle {}: classifier failed: {:#}", cycle.id, err);
                cycle.faults.push(format!("classifier failed: {:#}", err));
                Vec::new()
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                self.stats.classifier_failures += 1;
                log::error!("cycle {}: classifier panicked: {}", cycle.id, message);
                cycle.faults.push(format!("classifier panicked: {}", message));
                Vec::new()
            }
        }
    }

    fn write_snapshot(&self, cycle: &TriggerCycle) -> Option<PathBuf> {
        let path = self.parts.snapshot_path.as_ref()?;
        let frame = cycle.frame.as_ref()?;
        match annotate::save_snapshot(frame, &cycle.detections, path) {
            Ok(()) => Some(path.clone()),
            Err(err) => {
                log::warn!("cycle {}: snapshot not written: {:#}", cycle.id, err);
                None
            }
        }
    }

    /// The cycle's single sound, picked once the route pulse has settled the category.
    fn play_cue(&mut self, category: SortCategory) {
        let cue = SoundCue::for_category(category);
        self.parts.audio.play(cue);
        self.alarm_active = cue.loops();
    }

    /// Fire the Up pulse for a routed category. Returns the channel to reset later.
    ///
    /// A failed pulse switches the cycle and the display to `Error`.
    fn actuate_up(&mut self, cycle: &mut TriggerCycle) -> Option<MotorChannel> {
        let channel = MotorChannel::for_category(cycle.category)?;
        match self
            .parts
            .actuator
            .fire(channel, Direction::Up, self.parts.timing.pulse_up)
        {
            Ok(PulseOutcome::Completed) => Some(channel),
            Ok(PulseOutcome::Interrupted) => {
                cycle.interrupted = true;
                None
            }
            Err(err) => {
                self.stats.actuator_faults += 1;
                log::error!("cycle {}: {:?} pulse failed: {:#}", cycle.id, channel, err);
                cycle.faults.push(format!("route pulse failed: {:#}", err));
                cycle.category = SortCategory::Error;
                self.parts
                    .ui
                    .show(StatusView::for_category(SortCategory::Error), cycle.snapshot.clone());
                None
            }
        }
    }

    fn await_countdown(&mut self, seconds: u32) -> CountdownOutcome {
        let Some(done) = self.parts.ui.start_countdown(seconds) else {
            log::warn!("trigger: display loop gone, counting down without display");
            return if self.wait_watching(Duration::from_secs(u64::from(seconds))) {
                CountdownOutcome::Cancelled
            } else {
                CountdownOutcome::Completed
            };
        };
        loop {
            match done.recv_timeout(self.parts.timing.poll_interval) {
                Ok(outcome) => return outcome,
                Err(RecvTimeoutError::Timeout) => {
                    if self.parts.shutdown.is_triggered() {
                        self.parts.ui.cancel_countdown();
                        return CountdownOutcome::Cancelled;
                    }
                    self.watch_for_ignored_triggers();
                }
                Err(RecvTimeoutError::Disconnected) => return CountdownOutcome::Cancelled,
            }
        }
    }

    /// Wait `duration` while counting triggers that arrive meanwhile.
    ///
    /// Returns true when shutdown interrupted the wait.
    fn wait_watching(&mut self, duration: Duration) -> bool {
        let deadline = self.parts.clock.now() + duration;
        loop {
            let now = self.parts.clock.now();
            if now >= deadline {
                return false;
            }
            let slice = (deadline - now).min(self.parts.timing.poll_interval);
            if self.parts.clock.wait(&self.parts.shutdown, slice) {
                return true;
            }
            self.watch_for_ignored_triggers();
        }
    }

    fn watch_for_ignored_triggers(&mut self) {
        let active = self.read_sensor();
        if active && !self.sensor_was_active {
            self.stats.ignored_triggers += 1;
            log::debug!("trigger: sensor fired during active cycle, ignored");
        }
        self.sensor_was_active = active;
        while self.manual_rx.try_recv().is_ok() {
            self.stats.ignored_triggers += 1;
        }
    }

    fn abort(&mut self, mut cycle: TriggerCycle) -> TriggerCycle {
        log::info!("cycle {}: interrupted by shutdown", cycle.id);
        cycle.interrupted = true;
        self.finish(cycle)
    }

    fn finish(&mut self, cycle: TriggerCycle) -> TriggerCycle {
        self.stats.cycles += 1;
        self.stats.by_category[cycle.category.code() as usize] += 1;
        if !cycle.interrupted {
            self.wait_watching(self.parts.timing.rearm);
        }
        self.enter(TriggerState::Idle);
        cycle
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::MotorPins;
    use crate::audio::{AudioEvent, RecordingAudio};
    use crate::clock::{ManualClock, SystemClock};
    use crate::config::GpioSettings;
    use crate::detect::{ScriptHandle, ScriptedBackend};
    use crate::gpio::{Level, MockGpio, SharedGpio};
    use std::sync::Mutex;

    /// Display port whose countdowns complete immediately.
    #[derive(Clone, Default)]
    struct InstantUi {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl InstantUi {
        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    impl UiPort for InstantUi {
        fn show(&self, view: StatusView, _image: Option<PathBuf>) {
            self.log.lock().unwrap().push(view.detail);
        }

        fn start_countdown(&self, seconds: u32) -> Option<Receiver<CountdownOutcome>> {
            self.log.lock().unwrap().push(format!("countdown {}", seconds));
            let (tx, rx) = mpsc::channel();
            tx.send(CountdownOutcome::Completed).ok();
            Some(rx)
        }

        fn cancel_countdown(&self) {}

        fn show_idle(&self) {
            self.log.lock().unwrap().push("idle".to_string());
        }
    }

    struct Rig {
        trigger: TriggerLoop,
        gpio: MockGpio,
        script: ScriptHandle,
        audio: RecordingAudio,
        ui: InstantUi,
        shutdown: ShutdownSignal,
    }

    const TRIGGER_PIN: u32 = 12;

    fn fast_timing() -> TimingSettings {
        TimingSettings {
            poll_interval: Duration::from_millis(1),
            settle: Duration::from_millis(2),
            rearm: Duration::from_millis(2),
            pulse_up: Duration::from_millis(2),
            pulse_down: Duration::from_millis(2),
            announce_hold: Duration::from_millis(2),
            countdown_secs: 5,
        }
    }

    fn rig() -> Rig {
        let gpio = MockGpio::new();
        let shared: SharedGpio = Arc::new(Mutex::new(gpio.clone()));
        let shutdown = ShutdownSignal::new();
        let pins = MotorPins::from_settings(&GpioSettings::default()).unwrap();
        let actuator =
            Arc::new(ActuatorController::new(shared.clone(), pins, shutdown.clone()).unwrap());
        let sensor = GpioSensor::new(InputPin::setup(shared, TRIGGER_PIN).unwrap());

        let backend = ScriptedBackend::new();
        let script = backend.script();
        let classifier: SharedBackend = Arc::new(Mutex::new(backend));
        let frames = LatestFrame::new();
        frames.publish(Frame::blank(8, 8, 0).unwrap());

        let audio = RecordingAudio::new();
        let ui = InstantUi::default();
        let trigger = TriggerLoop::new(TriggerLoopParts {
            sensor: Box::new(sensor),
            frames,
            classifier,
            resolver: CategoryResolver::default(),
            actuator,
            audio: Arc::new(audio.clone()),
            ui: Box::new(ui.clone()),
            timing: fast_timing(),
            snapshot_path: None,
            shutdown: shutdown.clone(),
            clock: Arc::new(SystemClock),
        });
        Rig {
            trigger,
            gpio,
            script,
            audio,
            ui,
            shutdown,
        }
    }

    #[test]
    fn idle_without_trigger() {
        let mut rig = rig();
        assert!(rig.trigger.step().is_none());
        assert_eq!(rig.trigger.state(), TriggerState::Idle);
        assert_eq!(rig.script.calls(), 0);
    }

    #[test]
    fn mansome_without_cap_routes_m1_up_then_down() {
        let mut rig = rig();
        rig.script.push(vec![
            Detection::labelled("Mansome", 0.9),
            Detection::labelled("Not_cap", 0.95),
        ]);
        rig.gpio.queue_inputs(TRIGGER_PIN, &[Level::Low]);

        let cycle = rig.trigger.step().expect("cycle should run");
        assert_eq!(cycle.category, SortCategory::Blue);
        assert_eq!(cycle.actuated, Some(MotorChannel::M1));
        assert!(cycle.faults.is_empty());

        // M1 up (4) then, after the countdown, M1 down (17).
        assert_eq!(rig.gpio.pulses(), vec![4, 17]);
        assert!(rig.gpio.all_outputs_low());
        assert_eq!(
            rig.ui.log(),
            vec!["Plastic Waste", "countdown 5", "idle"]
        );
        assert_eq!(rig.audio.plays(), vec![SoundCue::Ok]);
        assert_eq!(rig.trigger.state(), TriggerState::Idle);
    }

    #[test]
    fn empty_detections_raise_alarm_until_next_cycle() {
        let mut rig = rig();
        rig.script.push(vec![]);
        rig.script.push(vec![Detection::labelled("Coke", 0.9)]);
        rig.gpio.queue_inputs(TRIGGER_PIN, &[Level::Low]);

        let first = rig.trigger.step().expect("first cycle");
        assert_eq!(first.category, SortCategory::Error);
        assert_eq!(first.actuated, None);
        assert!(rig.gpio.pulses().is_empty());
        assert_eq!(rig.audio.events(), vec![AudioEvent::Play(SoundCue::Error)]);

        // Released once, then LOW again.
        rig.gpio.queue_inputs(TRIGGER_PIN, &[Level::High, Level::Low]);
        let mut second = None;
        for _ in 0..10 {
            if let Some(cycle) = rig.trigger.step() {
                second = Some(cycle);
                break;
            }
        }
        let second = second.expect("second cycle");
        assert_eq!(second.category, SortCategory::Green);
        assert_eq!(
            rig.audio.events(),
            vec![
                AudioEvent::Play(SoundCue::Error),
                AudioEvent::Stop,
                AudioEvent::Play(SoundCue::Ok)
            ]
        );
    }

    #[test]
    fn held_sensor_triggers_once() {
        let mut rig = rig();
        rig.gpio.set_input(TRIGGER_PIN, Level::Low);
        assert!(rig.trigger.step().is_some());
        for _ in 0..20 {
            assert!(rig.trigger.step().is_none());
        }
        assert_eq!(rig.trigger.stats().cycles, 1);
    }

    #[test]
    fn second_low_during_cycle_is_debounced() {
        let mut rig = rig();
        // LOW to start, then a bounce during the settle wait, then released.
        rig.gpio.queue_inputs(
            TRIGGER_PIN,
            &[Level::Low, Level::High, Level::Low, Level::High],
        );
        assert!(rig.trigger.step().is_some());
        for _ in 0..20 {
            assert!(rig.trigger.step().is_none());
        }
        assert_eq!(rig.trigger.stats().cycles, 1);
        assert!(rig.trigger.stats().ignored_triggers >= 1);
    }

    #[test]
    fn manual_trigger_skips_sensor() {
        let mut rig = rig();
        rig.script.push(vec![Detection::labelled("Milk2", 0.8)]);
        let manual = rig.trigger.manual_trigger();
        assert!(manual.request());
        assert!(manual.request());

        let cycle = rig.trigger.step().expect("manual cycle");
        assert_eq!(cycle.source, TriggerSource::Manual);
        assert_eq!(cycle.category, SortCategory::Yellow);
        assert_eq!(rig.gpio.pulses(), vec![27, 22]);
        assert!(rig.trigger.step().is_none());
        assert_eq!(rig.trigger.stats().ignored_triggers, 1);
    }

    #[test]
    fn classifier_failure_degrades_to_error() {
        let mut rig = rig();
        rig.script.push_failure("model crashed");
        rig.trigger.manual_trigger().request();

        let cycle = rig.trigger.step().expect("cycle");
        assert_eq!(cycle.category, SortCategory::Error);
        assert_eq!(cycle.faults.len(), 1);
        assert_eq!(rig.trigger.stats().classifier_failures, 1);
        assert_eq!(rig.trigger.state(), TriggerState::Idle);
    }

    #[test]
    fn missing_frame_degrades_to_error() {
        let mut rig = rig();
        rig.trigger.parts.frames.clear();
        rig.trigger.manual_trigger().request();
        let cycle = rig.trigger.step().expect("cycle");
        assert_eq!(cycle.category, SortCategory::Error);
        assert_eq!(rig.script.calls(), 0);
        assert_eq!(rig.trigger.stats().missing_frames, 1);
    }

    #[test]
    fn pin_failure_turns_cycle_into_error() {
        let mut rig = rig();
        rig.script.push(vec![Detection::labelled("Coke", 0.9)]);
        rig.gpio.fail_writes(true);
        rig.trigger.manual_trigger().request();

        let cycle = rig.trigger.step().expect("cycle");
        assert_eq!(cycle.category, SortCategory::Error);
        assert_eq!(cycle.actuated, None);
        assert_eq!(rig.trigger.stats().actuator_faults, 1);
        // One alarm for the cycle, no "ok" cue ahead of it.
        assert_eq!(rig.audio.events(), vec![AudioEvent::Play(SoundCue::Error)]);
        let log = rig.ui.log();
        assert_eq!(
            log[..2],
            [
                StatusView::for_category(SortCategory::Green).detail,
                StatusView::for_category(SortCategory::Error).detail,
            ]
        );
    }

    #[test]
    fn classifier_panic_degrades_to_error_and_loop_survives() {
        let mut rig = rig();
        rig.script.push_panic("tensor shape mismatch");
        rig.script.push(vec![Detection::labelled("Coke", 0.9)]);
        rig.trigger.manual_trigger().request();

        let cycle = rig.trigger.step().expect("cycle");
        assert_eq!(cycle.category, SortCategory::Error);
        assert_eq!(cycle.faults, vec!["classifier panicked: tensor shape mismatch"]);
        assert_eq!(rig.trigger.stats().classifier_failures, 1);
        assert_eq!(rig.trigger.state(), TriggerState::Idle);

        rig.trigger.manual_trigger().request();
        let next = rig.trigger.step().expect("next cycle");
        assert_eq!(next.category, SortCategory::Green);
        assert_eq!(rig.script.calls(), 2);
    }

    #[test]
    fn cycle_waits_run_on_the_injected_clock() {
        let mut rig = rig();
        let clock = ManualClock::new();
        rig.trigger.parts.clock = Arc::new(clock.clone());
        rig.trigger.parts.timing.poll_interval = Duration::from_secs(1);
        rig.trigger.parts.timing.settle = Duration::from_secs(600);
        rig.trigger.parts.timing.announce_hold = Duration::from_secs(1200);
        rig.trigger.parts.timing.rearm = Duration::from_secs(1800);
        rig.script.push(vec![Detection::labelled("Milk2", 0.8)]);
        rig.gpio.queue_inputs(TRIGGER_PIN, &[Level::Low]);

        let start = clock.now();
        let wall = Instant::now();
        let cycle = rig.trigger.step().expect("cycle");
        assert_eq!(cycle.category, SortCategory::Yellow);
        assert_eq!(
            cycle.countdown_deadline,
            Some(start + Duration::from_secs(600 + 1200 + 5))
        );
        assert_eq!(clock.now() - start, Duration::from_secs(600 + 1200 + 1800));
        assert!(wall.elapsed() < Duration::from_secs(60));
    }

    #[test]
    fn capped_bottle_plays_cap_cue_without_motor() {
        let mut rig = rig();
        rig.script.push(vec![
            Detection::labelled("Honey", 0.9),
            Detection::labelled("Cap", 0.9),
        ]);
        rig.trigger.manual_trigger().request();
        let cycle = rig.trigger.step().expect("cycle");
        assert_eq!(cycle.category, SortCategory::NoCap);
        assert!(rig.gpio.pulses().is_empty());
        assert_eq!(rig.audio.plays(), vec![SoundCue::Cap]);
    }

    #[test]
    fn run_returns_on_shutdown() {
        let rig = rig();
        let shutdown = rig.shutdown.clone();
        let manual = rig.trigger.manual_trigger();
        let handle = std::thread::spawn(move || rig.trigger.run());
        manual.request();
        std::thread::sleep(Duration::from_millis(50));
        shutdown.trigger();
        let stats = handle.join().expect("trigger thread panicked");
        assert!(stats.cycles >= 1);
    }

    #[test]
    fn snapshot_is_written_for_classified_frame() {
        let mut rig = rig();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.jpg");
        rig.trigger.parts.snapshot_path = Some(path.clone());
        rig.trigger.manual_trigger().request();
        let cycle = rig.trigger.step().expect("cycle");
        assert_eq!(cycle.snapshot.as_deref(), Some(path.as_path()));
        assert!(path.exists());
    }
}
