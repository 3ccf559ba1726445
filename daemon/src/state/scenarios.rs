//! End-to-end runs of the control loop against simulated peripherals
//!
//! Button edges are scripted in absolute clock time since transitions
//! block inside `step`.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use super::{DeviceState, StateMachine};
use crate::config::Config;
use crate::events::{DeviceEvent, DiscardReason};
use crate::hal::{Clock, Peripherals, Pin};
use crate::recording::wav::WavHeader;
use crate::sim::{
    ManualClock, PlayLog, SimCaptureQueue, SimPins, SimPlayback, SimTone, SimTransfer, ToneLog, TransferStats,
};
use crate::storage::{MemStorage, Storage};

const PLAYBACK_MS: u64 = 2_000;

struct Harness {
    machine: StateMachine,
    config: Config,
    clock: ManualClock,
    pins: SimPins,
    storage: MemStorage,
    prompts: PlayLog,
    recordings: PlayLog,
    tones: ToneLog,
    transfer: TransferStats,
    halt: Arc<AtomicBool>,
    events: broadcast::Receiver<DeviceEvent>,
}

impl Harness {
    fn new(config_mode: bool) -> Self {
        Self::with_config(Config::with_root("/unused"), config_mode)
    }

    /// Boots the machine; in config mode the push-button is held through
    /// the boot window and let go afterwards
    fn with_config(config: Config, config_mode: bool) -> Self {
        let clock = ManualClock::new();
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let pins = SimPins::new(Arc::clone(&shared));
        if config_mode {
            pins.set_pressed(Pin::PushButton, true);
            pins.schedule(1_500, Pin::PushButton, false);
        }

        let storage = MemStorage::new();
        let prompts = SimPlayback::new(Arc::clone(&shared), PLAYBACK_MS);
        let recordings = SimPlayback::new(Arc::clone(&shared), PLAYBACK_MS);
        let tone = SimTone::new();
        let transfer = SimTransfer::new();
        let (prompt_log, recording_log) = (prompts.log(), recordings.log());
        let (tones, transfer_stats) = (tone.log(), transfer.stats());

        let peripherals = Peripherals {
            clock: Arc::clone(&shared),
            pins: Box::new(pins.clone()),
            capture: Box::new(SimCaptureQueue::new(Arc::clone(&shared), 60)),
            prompts: Box::new(prompts),
            recordings: Box::new(recordings),
            tone: Box::new(tone),
            storage: Box::new(storage.clone()),
            transfer: Box::new(transfer),
        };

        let (tx, events) = broadcast::channel(256);
        let halt = Arc::new(AtomicBool::new(false));
        let mut machine = StateMachine::new(config.clone(), peripherals, tx, Arc::clone(&halt));
        machine.boot().unwrap();
        assert_eq!(machine.context().config_mode, config_mode);

        Self {
            machine,
            config,
            clock,
            pins,
            storage,
            prompts: prompt_log,
            recordings: recording_log,
            tones,
            transfer: transfer_stats,
            halt,
            events,
        }
    }

    /// Step until `state` is current; false if the deadline passes first
    fn run_until_state(&mut self, state: DeviceState, deadline_ms: u64) -> bool {
        while self.clock.now_ms() < deadline_ms {
            if self.machine.state() == state {
                return true;
            }
            self.machine.step();
        }
        self.machine.state() == state
    }

    fn run_until_ms(&mut self, at_ms: u64) {
        while self.clock.now_ms() < at_ms {
            self.machine.step();
        }
    }

    fn drain_events(&mut self) -> Vec<DeviceEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

fn entered_states(events: &[DeviceEvent]) -> Vec<DeviceState> {
    events
        .iter()
        .filter_map(|event| match event {
            DeviceEvent::StateChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect()
}

fn read_wav(bytes: Vec<u8>) -> (hound::WavSpec, u32) {
    let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
    (reader.spec(), reader.len())
}

#[test]
fn test_normal_voicemail_is_kept() {
    let mut h = Harness::new(false);
    h.pins.schedule(2_100, Pin::Handset, false);
    h.pins.schedule(16_000, Pin::Handset, true);

    assert!(h.run_until_state(DeviceState::Recording, 10_000));
    assert_eq!(h.prompts.played(), vec![h.config.assets.default_greeting.clone()]);
    assert!(h.run_until_state(DeviceState::Ready, 20_000));

    let events = h.drain_events();
    assert_eq!(
        entered_states(&events),
        vec![
            DeviceState::Ready,
            DeviceState::Greeting,
            DeviceState::Recording,
            DeviceState::Ready
        ]
    );
    assert!(events.contains(&DeviceEvent::RecordingStarted));

    assert_eq!(h.machine.context().last_recording, "00000.wav");
    assert!(!h.storage.exists("temp.wav"));

    let bytes = h.storage.read("00000.wav").unwrap();
    let header = WavHeader::parse(&bytes).unwrap();
    assert!((9_000..=11_000).contains(&header.duration_ms()));
    assert_eq!(header.data_size as usize, bytes.len() - 44);

    let total = bytes.len() as u64;
    assert!(events.contains(&DeviceEvent::RecordingSaved {
        name: "00000.wav".to_string(),
        bytes: total,
    }));

    let (spec, samples) = read_wav(bytes);
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.sample_rate, 44_100);
    assert_eq!(spec.bits_per_sample, 16);
    assert_eq!(samples as u64, (total - 44) / 2);

    // loud boot beep, quiet end-of-greeting beep, three quiet "saved" beeps
    assert_eq!(h.tones.pulses(), vec![1.0, 0.1, 0.1, 0.1, 0.1]);
}

#[test]
fn test_too_short_message_is_discarded() {
    let mut h = Harness::new(false);
    h.pins.schedule(2_100, Pin::Handset, false);

    assert!(h.run_until_state(DeviceState::Recording, 10_000));
    h.pins.schedule_in(500, Pin::Handset, true);
    assert!(h.run_until_state(DeviceState::Ready, 10_000));

    let events = h.drain_events();
    assert!(events.iter().any(|event| matches!(
        event,
        DeviceEvent::RecordingDiscarded {
            reason: DiscardReason::TooShort,
            ..
        }
    )));
    assert_eq!(h.machine.context().last_recording, h.config.assets.no_message);
    assert!(h.storage.list().unwrap().is_empty());
}

#[test]
fn test_config_mode_greeting_change() {
    let mut h = Harness::new(true);
    h.storage.insert("Greeting.wav", vec![0u8; 100]);

    h.pins.schedule(2_500, Pin::Handset, false);
    assert!(h.run_until_state(DeviceState::Recording, 10_000));
    assert_eq!(h.prompts.played(), vec![h.config.assets.change_instructions.clone()]);

    let recording_started = h.clock.now_ms();
    h.pins.schedule(recording_started + 8_000, Pin::PushButton, true);
    h.pins.schedule(recording_started + 8_200, Pin::PushButton, false);
    assert!(h.run_until_state(DeviceState::ChangeGreeting, 20_000));
    assert_eq!(h.recordings.last().as_deref(), Some("00000.wav"));

    let confirm = h.config.assets.confirm_greeting.clone();
    while h.prompts.last().as_deref() != Some(confirm.as_str()) {
        assert!(h.clock.now_ms() < 30_000, "confirmation never prompted");
        h.machine.step();
    }

    let press_at = h.clock.now_ms() + 300;
    h.pins.schedule(press_at, Pin::PushButton, true);
    h.pins.schedule(press_at + 300, Pin::PushButton, false);
    h.pins.schedule(press_at + 5_000, Pin::Handset, true);
    assert!(h.run_until_state(DeviceState::Ready, press_at + 10_000));
    assert!(h.clock.now_ms() >= press_at + 5_000);

    let events = h.drain_events();
    let saved = events
        .iter()
        .find_map(|event| match event {
            DeviceEvent::RecordingSaved { bytes, .. } => Some(*bytes),
            _ => None,
        })
        .unwrap();
    assert!(events.contains(&DeviceEvent::ConfirmationPrompted));
    assert!(events.contains(&DeviceEvent::GreetingChanged {
        recording: "00000.wav".to_string(),
    }));

    let greeting = h.storage.read("Greeting.wav").unwrap();
    assert_eq!(greeting.len() as u64, saved);
    assert!(!h.storage.exists("00000.wav"));
    assert_eq!(h.machine.context().last_recording, h.config.assets.no_message);
    assert_eq!(h.prompts.last(), Some(h.config.assets.greeting_saved.clone()));
}

#[test]
fn test_confirmation_window_times_out() {
    let mut h = Harness::new(true);
    h.pins.schedule(2_500, Pin::Handset, false);
    assert!(h.run_until_state(DeviceState::Recording, 10_000));

    let recording_started = h.clock.now_ms();
    h.pins.schedule(recording_started + 8_000, Pin::PushButton, true);
    h.pins.schedule(recording_started + 8_200, Pin::PushButton, false);
    assert!(h.run_until_state(DeviceState::ChangeGreeting, 20_000));

    // nobody answers the prompt; hang up later so Ready can be entered
    h.pins.schedule(h.clock.now_ms() + 15_000, Pin::Handset, true);
    assert!(h.run_until_state(DeviceState::Ready, h.clock.now_ms() + 20_000));

    let events = h.drain_events();
    assert!(!events.iter().any(|event| matches!(event, DeviceEvent::GreetingChanged { .. })));
    assert!(!h.storage.exists("Greeting.wav"));
    assert_eq!(h.machine.context().last_recording, "00000.wav");
}

#[test]
fn test_max_duration_cuts_off_recording() {
    let mut config = Config::with_root("/unused");
    config.timings.poll_interval_ms = 5;
    let mut h = Harness::with_config(config, false);
    h.pins.schedule(2_100, Pin::Handset, false);
    h.pins.schedule(370_000, Pin::Handset, true);

    assert!(h.run_until_state(DeviceState::Recording, 10_000));
    let recording_started = h.clock.now_ms();
    assert!(h.run_until_state(DeviceState::Ready, 400_000));

    let events = h.drain_events();
    let ended_at = events
        .iter()
        .filter_map(|event| match event {
            DeviceEvent::StateChanged {
                from: DeviceState::Recording,
                duration_ms,
                ..
            } => Some(*duration_ms),
            _ => None,
        })
        .next()
        .unwrap();
    assert!(ended_at > 360_000);
    // the hang-up was only needed to get back to Ready
    assert!(h.clock.now_ms() >= 370_000);
    assert!(recording_started < 10_000);

    let bytes = h.storage.read("00000.wav").unwrap();
    let header = WavHeader::parse(&bytes).unwrap();
    assert_eq!(header.data_size as usize, bytes.len() - 44);
    assert_eq!(header.chunk_size as usize, bytes.len() - 8);
    assert!((359_900..=360_100).contains(&header.duration_ms()));
    assert_eq!(h.machine.context().last_recording, "00000.wav");
}

#[test]
fn test_transfer_mode_after_long_press() {
    let mut h = Harness::new(true);
    h.pins.schedule(3_000, Pin::PushButton, true);
    h.pins.schedule(9_000, Pin::PushButton, false);
    h.pins.schedule(10_000, Pin::Handset, false);

    h.run_until_ms(7_900);
    assert!(!h.machine.context().transfer_active);
    assert_eq!(h.transfer.begun(), 1);
    assert_eq!(h.transfer.polls(), 0);

    h.run_until_ms(8_200);
    assert!(h.machine.context().transfer_active);
    let early_polls = h.transfer.polls();
    assert!(early_polls > 0);

    h.run_until_ms(9_500);
    assert!(h.transfer.polls() > early_polls);

    assert!(h.run_until_state(DeviceState::Greeting, 12_000));
    assert!(!h.machine.context().transfer_active);
    let polls = h.transfer.polls();
    h.run_until_ms(h.clock.now_ms() + 100);
    assert_eq!(h.transfer.polls(), polls);

    let events = h.drain_events();
    assert!(events.contains(&DeviceEvent::TransferEnabled));
    assert!(events.contains(&DeviceEvent::TransferDisabled));
}

#[test]
fn test_ready_waits_for_push_button_release() {
    let mut h = Harness::new(false);
    h.pins.schedule(2_100, Pin::Handset, false);
    assert!(h.run_until_state(DeviceState::Greeting, 5_000));

    // skip the greeting, then hang up with the button still down
    let now = h.clock.now_ms();
    h.pins.schedule(now + 200, Pin::PushButton, true);
    h.pins.schedule(now + 1_000, Pin::Handset, true);
    h.pins.schedule(now + 4_000, Pin::PushButton, false);

    assert!(h.run_until_state(DeviceState::Playback, now + 1_000));
    assert!(h.run_until_state(DeviceState::Ready, now + 10_000));
    assert!(h.clock.now_ms() >= now + 4_000);

    h.run_until_ms(now + 6_000);
    assert_eq!(h.machine.state(), DeviceState::Ready);
    assert_eq!(
        h.recordings.played(),
        vec![h.config.assets.no_message.clone()]
    );
}

#[test]
fn test_halt_mid_recording_keeps_message() {
    let mut h = Harness::new(false);
    h.pins.schedule(2_100, Pin::Handset, false);
    assert!(h.run_until_state(DeviceState::Recording, 10_000));
    h.run_until_ms(h.clock.now_ms() + 5_000);

    h.halt.store(true, Ordering::SeqCst);
    h.machine.run_until_halted();

    let events = h.drain_events();
    assert!(events.iter().any(|event| matches!(event, DeviceEvent::RecordingSaved { .. })));
    assert!(h.storage.exists("00000.wav"));
    assert!(!h.storage.exists("temp.wav"));
}

#[test]
fn test_failed_capture_open_returns_to_ready() {
    let mut h = Harness::new(false);
    h.storage.fail_opens(true);
    h.pins.schedule(2_100, Pin::Handset, false);
    h.pins.schedule(8_000, Pin::Handset, true);

    // Ready is re-entered straight from the failed Recording entry
    h.run_until_ms(12_000);
    assert_eq!(h.machine.state(), DeviceState::Ready);

    let events = h.drain_events();
    assert_eq!(
        entered_states(&events),
        vec![
            DeviceState::Ready,
            DeviceState::Greeting,
            DeviceState::Recording,
            DeviceState::Ready
        ]
    );
    assert!(events.iter().any(|event| matches!(event, DeviceEvent::RecordingFailed { .. })));
    assert!(!events.contains(&DeviceEvent::RecordingStarted));
    assert_eq!(h.machine.context().last_recording, h.config.assets.no_message);
}

#[test]
fn test_custom_greeting_replaces_default() {
    let mut h = Harness::new(false);
    h.storage.insert("Greeting.wav", vec![0u8; 100]);
    h.pins.schedule(2_100, Pin::Handset, false);
    h.pins.schedule(16_000, Pin::Handset, true);

    assert!(h.run_until_state(DeviceState::Recording, 10_000));
    assert_eq!(h.recordings.played(), vec!["Greeting.wav".to_string()]);
    assert!(h.prompts.played().is_empty());

    assert!(h.run_until_state(DeviceState::Ready, 20_000));
    assert_eq!(h.machine.context().last_recording, "00000.wav");
    assert!(h.storage.exists("Greeting.wav"));
}

#[test]
fn test_config_mode_hang_up_discards_recording() {
    let mut h = Harness::new(true);
    h.pins.schedule(2_500, Pin::Handset, false);
    assert!(h.run_until_state(DeviceState::Recording, 10_000));

    // long enough to keep in normal mode
    let recording_started = h.clock.now_ms();
    h.pins.schedule(recording_started + 8_000, Pin::Handset, true);
    assert!(h.run_until_state(DeviceState::Ready, recording_started + 15_000));

    let events = h.drain_events();
    assert!(events.iter().any(|event| matches!(
        event,
        DeviceEvent::RecordingDiscarded {
            reason: DiscardReason::HungUp,
            ..
        }
    )));
    assert!(!events.iter().any(|event| matches!(event, DeviceEvent::RecordingSaved { .. })));
    assert_eq!(
        h.prompts.played(),
        vec![
            h.config.assets.change_instructions.clone(),
            h.config.assets.message_too_short.clone()
        ]
    );
    assert_eq!(h.machine.context().last_recording, h.config.assets.no_message);
    assert!(h.storage.list().unwrap().is_empty());
}

#[test]
fn test_config_mode_playback_reviews_greeting() {
    for custom in [true, false] {
        let mut h = Harness::new(true);
        if custom {
            h.storage.insert("Greeting.wav", vec![0u8; 100]);
        }
        h.pins.schedule(2_500, Pin::Handset, false);
        assert!(h.run_until_state(DeviceState::Greeting, 5_000));

        let now = h.clock.now_ms();
        h.pins.schedule(now + 200, Pin::PushButton, true);
        h.pins.schedule(now + 400, Pin::PushButton, false);
        h.pins.schedule(now + 6_000, Pin::Handset, true);
        assert!(h.run_until_state(DeviceState::Playback, now + 1_000));

        if custom {
            assert_eq!(h.recordings.played(), vec!["Greeting.wav".to_string()]);
        } else {
            assert!(h.recordings.played().is_empty());
            assert_eq!(h.prompts.last(), Some(h.config.assets.default_greeting.clone()));
        }
        assert!(h.run_until_state(DeviceState::Ready, now + 10_000));
    }
}

#[test]
fn test_playback_completion_beeps_and_returns_to_ready() {
    let mut h = Harness::new(false);
    h.pins.schedule(2_100, Pin::Handset, false);
    assert!(h.run_until_state(DeviceState::Greeting, 5_000));

    let now = h.clock.now_ms();
    h.pins.schedule(now + 200, Pin::PushButton, true);
    h.pins.schedule(now + 400, Pin::PushButton, false);
    // still off hook when the review ends
    h.pins.schedule(now + 6_000, Pin::Handset, true);

    assert!(h.run_until_state(DeviceState::Ready, now + 10_000));
    assert!(h.clock.now_ms() >= now + 6_000);

    let events = h.drain_events();
    assert_eq!(
        entered_states(&events),
        vec![
            DeviceState::Ready,
            DeviceState::Greeting,
            DeviceState::Playback,
            DeviceState::Ready
        ]
    );
    let review_ms = events
        .iter()
        .find_map(|event| match event {
            DeviceEvent::StateChanged {
                from: DeviceState::Playback,
                duration_ms,
                ..
            } => Some(*duration_ms),
            _ => None,
        })
        .unwrap();
    assert!(review_ms >= PLAYBACK_MS);
    assert_eq!(h.recordings.played(), vec![h.config.assets.no_message.clone()]);

    // loud boot beep, skip acknowledgement, three quiet "done" beeps
    assert_eq!(h.tones.pulses(), vec![1.0, 0.1, 0.1, 0.1, 0.1]);
}

#[test]
fn test_hang_up_during_greeting_replay_keeps_recording() {
    let mut h = Harness::new(true);
    h.pins.schedule(2_500, Pin::Handset, false);
    assert!(h.run_until_state(DeviceState::Recording, 10_000));

    let recording_started = h.clock.now_ms();
    h.pins.schedule(recording_started + 8_000, Pin::PushButton, true);
    h.pins.schedule(recording_started + 8_200, Pin::PushButton, false);
    assert!(h.run_until_state(DeviceState::ChangeGreeting, 20_000));

    // hang up before the replay ends
    h.pins.schedule(h.clock.now_ms() + 500, Pin::Handset, true);
    assert!(h.run_until_state(DeviceState::Ready, h.clock.now_ms() + 5_000));

    let events = h.drain_events();
    assert!(!events.contains(&DeviceEvent::ConfirmationPrompted));
    assert!(!events.iter().any(|event| matches!(event, DeviceEvent::GreetingChanged { .. })));
    assert!(h.storage.exists("00000.wav"));
    assert!(!h.storage.exists("Greeting.wav"));
    assert_eq!(h.machine.context().last_recording, "00000.wav");
    assert_ne!(h.prompts.last(), Some(h.config.assets.confirm_greeting.clone()));
}

#[test]
fn test_exhausted_names_fail_the_recording() {
    let mut config = Config::with_root("/unused");
    config.recording.name_slots = 2;
    let mut h = Harness::with_config(config, false);
    h.storage.insert("00000.wav", vec![0u8; 44]);
    h.storage.insert("00001.wav", vec![0u8; 44]);
    h.pins.schedule(2_100, Pin::Handset, false);
    h.pins.schedule(16_000, Pin::Handset, true);

    assert!(h.run_until_state(DeviceState::Recording, 10_000));
    assert!(h.run_until_state(DeviceState::Ready, 25_000));

    let events = h.drain_events();
    let reason = events
        .iter()
        .find_map(|event| match event {
            DeviceEvent::RecordingFailed { reason } => Some(reason.clone()),
            _ => None,
        })
        .unwrap();
    assert!(reason.contains("all 2 recording names"));
    assert!(!events.iter().any(|event| matches!(event, DeviceEvent::RecordingSaved { .. })));

    assert!(!h.storage.exists("temp.wav"));
    assert_eq!(h.storage.list().unwrap(), vec!["00000.wav", "00001.wav"]);
    assert_eq!(h.machine.context().last_recording, h.config.assets.no_message);

    // loud boot beep, end-of-greeting beep, four quiet error pulses
    assert_eq!(h.tones.pulses(), vec![1.0, 0.1, 0.1, 0.1, 0.1, 0.1]);
}
