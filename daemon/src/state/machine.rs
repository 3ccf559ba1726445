//! Core state machine implementation
//!
//! Runs the cooperative control loop: every iteration refreshes the
//! buttons, feeds the capture session, evaluates the current state's
//! guards and performs at most one transition.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::events::{DeviceEvent, DiscardReason};
use crate::feedback::{wait_until, BeepPattern, BeepSignaler, WaitOutcome};
use crate::hal::{CaptureQueue, Clock, Peripherals, Pin, PlaybackChannel, TransferService};
use crate::input::InputController;
use crate::recording::{FilenameAllocator, FinishedRecording, RecordingError, RecordingSession};
use crate::storage::Storage;

use super::boot::{self, BootError, ConfigModeGate};
use super::transitions::{self, Action, DeviceState, Finish, ReviewPhase, Snapshot, Trigger};

/// Pulses beeped when a recording session fails
const SESSION_ERROR_BEEP_COUNT: u32 = 4;

/// Mutable device-wide state shared by the transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceContext {
    /// Decided once at boot
    pub config_mode: bool,
    /// Most recently kept message, or the "no message" placeholder
    pub last_recording: String,
    pub transfer_active: bool,
}

/// The answering machine control loop
pub struct StateMachine {
    config: Config,
    state: DeviceState,
    review: ReviewPhase,
    /// When the current state was entered
    state_entered_at: u64,
    /// Start of the timer the guards see as `elapsed_ms`
    timer_started_at: u64,
    context: DeviceContext,

    clock: Arc<dyn Clock>,
    input: InputController,
    beeper: BeepSignaler,
    capture: Box<dyn CaptureQueue>,
    prompts: Box<dyn PlaybackChannel>,
    recordings: Box<dyn PlaybackChannel>,
    storage: Box<dyn Storage>,
    transfer: Box<dyn TransferService>,
    allocator: FilenameAllocator,
    session: Option<RecordingSession>,

    /// Channel for emitting device events
    event_tx: broadcast::Sender<DeviceEvent>,
    halt: Arc<AtomicBool>,
}

impl StateMachine {
    /// Create a new state machine in `Init`
    pub fn new(
        config: Config,
        peripherals: Peripherals,
        event_tx: broadcast::Sender<DeviceEvent>,
        halt: Arc<AtomicBool>,
    ) -> Self {
        let Peripherals {
            clock,
            pins,
            capture,
            prompts,
            recordings,
            tone,
            storage,
            transfer,
        } = peripherals;

        let now = clock.now_ms();
        let input = InputController::new(pins, Arc::clone(&clock), config.timings.debounce_ms);
        let beeper = BeepSignaler::new(tone, Arc::clone(&clock), config.volumes.beep_frequency_hz);
        let allocator = FilenameAllocator::new(config.recording.name_slots);
        let context = DeviceContext {
            config_mode: false,
            last_recording: config.assets.no_message.clone(),
            transfer_active: false,
        };

        Self {
            config,
            state: DeviceState::Init,
            review: ReviewPhase::Replay,
            state_entered_at: now,
            timer_started_at: now,
            context,
            clock,
            input,
            beeper,
            capture,
            prompts,
            recordings,
            storage,
            transfer,
            allocator,
            session: None,
            event_tx,
            halt,
        }
    }

    /// Get the current state
    #[cfg(test)]
    pub fn state(&self) -> DeviceState {
        self.state
    }

    #[cfg(test)]
    pub fn context(&self) -> &DeviceContext {
        &self.context
    }

    fn halted(&self) -> bool {
        self.halt.load(Ordering::SeqCst)
    }

    fn emit(&self, event: DeviceEvent) {
        debug!(%event, "emitting event");
        let _ = self.event_tx.send(event);
    }

    /// Boot, then run iterations until halted
    pub fn run(&mut self) -> Result<(), BootError> {
        self.boot()?;
        self.run_until_halted();
        Ok(())
    }

    /// Step until the halt flag is raised, then close any open session
    pub fn run_until_halted(&mut self) {
        info!(config_mode = self.context.config_mode, "control loop started");
        while !self.halted() {
            self.step();
        }
        self.shutdown();
        info!("control loop stopped");
    }

    /// Mount storage, sample the config mode and enter Ready
    pub fn boot(&mut self) -> Result<(), BootError> {
        let loud = self.config.volumes.beep_loud;
        let event_tx = &self.event_tx;
        boot::mount_storage(
            self.storage.as_mut(),
            &mut self.beeper,
            self.clock.as_ref(),
            &self.config.timings,
            loud,
            &self.halt,
            |attempt| {
                let _ = event_tx.send(DeviceEvent::StorageUnavailable { attempt });
            },
        )?;

        for asset in self.config.assets.protected() {
            if !self.storage.exists(asset) {
                warn!(asset, "protected asset missing");
            }
        }

        self.transfer.begin();

        let timings = &self.config.timings;
        let config_mode = ConfigModeGate::sample(
            self.clock.as_ref(),
            &mut self.input,
            timings.boot_window_ms,
            timings.poll_interval_ms,
        );
        self.context.config_mode = config_mode;
        info!(config_mode, "mode selected");
        self.emit(DeviceEvent::ConfigModeSelected { config_mode });

        if config_mode {
            self.beeper.beep(loud, 3, 250);
        } else {
            self.beeper.beep(loud, 1, 1_000);
        }

        self.enter(DeviceState::Ready);
        Ok(())
    }

    /// One control loop iteration
    pub fn step(&mut self) {
        self.input.update();

        if let Some(session) = self.session.as_mut() {
            session.continue_capture(self.capture.as_mut());
        }

        // the confirmation timeout only runs once the prompt is quiet
        if self.state == DeviceState::ChangeGreeting
            && self.review == ReviewPhase::Confirm
            && !self.prompts.is_stopped()
        {
            self.timer_started_at = self.clock.now_ms();
        }

        let snapshot = self.snapshot();
        if let Some(trigger) = transitions::evaluate(self.state, &snapshot, &self.config.timings) {
            self.fire(trigger);
        }

        if self.context.transfer_active {
            self.transfer.poll();
        }

        self.clock.sleep_ms(self.config.timings.poll_interval_ms);
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            config_mode: self.context.config_mode,
            handset_down: self.input.is_pressed(Pin::Handset),
            handset_lifted: self.input.released(Pin::Handset),
            push_pressed: self.input.is_pressed(Pin::PushButton),
            push_held_ms: self.input.duration(Pin::PushButton),
            playback_done: self.prompts.is_stopped() && self.recordings.is_stopped(),
            elapsed_ms: self.clock.elapsed_since(self.timer_started_at),
            transfer_active: self.context.transfer_active,
            review: self.review,
        }
    }

    fn fire(&mut self, trigger: Trigger) {
        let Some(transition) = transitions::lookup(self.state, trigger) else {
            debug!(state = %self.state, ?trigger, "trigger ignored");
            return;
        };

        debug!(state = %self.state, ?trigger, action = ?transition.action, "trigger");
        let diverted = self.perform(transition.action);
        if let Some(next) = diverted.or(transition.next) {
            self.enter(next);
        }
    }

    /// Carry out an action; `Some(state)` overrides the table's next state
    fn perform(&mut self, action: Action) -> Option<DeviceState> {
        let quiet = self.config.volumes.beep_quiet;
        match action {
            Action::EnableTransfer => {
                self.context.transfer_active = true;
                info!("transfer service enabled");
                self.emit(DeviceEvent::TransferEnabled);
            }
            Action::DisableTransfer => {
                if self.context.transfer_active {
                    self.context.transfer_active = false;
                    info!("transfer service disabled");
                    self.emit(DeviceEvent::TransferDisabled);
                }
            }
            Action::StopPlayback => self.stop_playback(),
            Action::SkipGreeting => {
                self.stop_playback();
                self.beeper.beep(quiet, 1, 250);
            }
            Action::QuietBeep { count, interval_ms } => self.beeper.beep(quiet, count, interval_ms),
            Action::FinishRecording(finish) => return self.finish_recording(finish),
            Action::PromptConfirmation => self.prompt_confirmation(),
            Action::SaveGreeting => self.save_greeting(),
            Action::AbandonGreeting => {
                self.prompts.stop();
                info!("greeting change abandoned");
                self.beeper.beep(quiet, 1, 1_000);
            }
        }
        None
    }

    /// Switch to `next`, honouring its entry conditions and starting its activity
    fn enter(&mut self, next: DeviceState) {
        let tick = self.config.timings.poll_interval_ms;
        match next {
            // a stale press must not retrigger straight away
            DeviceState::Ready => {
                let halt = &self.halt;
                wait_until(self.clock.as_ref(), &mut self.input, None, tick, |input| {
                    input.at_rest() || halt.load(Ordering::SeqCst)
                });
            }
            DeviceState::ChangeGreeting => {
                let halt = &self.halt;
                wait_until(self.clock.as_ref(), &mut self.input, None, tick, |input| {
                    !input.is_pressed(Pin::PushButton) || halt.load(Ordering::SeqCst)
                });
            }
            _ => {}
        }

        let old_state = self.state;
        let now = self.clock.now_ms();
        let duration_ms = now.saturating_sub(self.state_entered_at);
        info!(
            from = %old_state,
            to = %next,
            duration_ms = duration_ms,
            "state transition"
        );
        self.state = next;
        self.state_entered_at = now;
        self.emit(DeviceEvent::StateChanged {
            from: old_state,
            to: next,
            duration_ms,
        });

        match next {
            DeviceState::Greeting => {
                let halt = &self.halt;
                let settle = wait_until(
                    self.clock.as_ref(),
                    &mut self.input,
                    Some(self.config.timings.greeting_settle_ms),
                    tick,
                    |input| input.is_pressed(Pin::PushButton) || halt.load(Ordering::SeqCst),
                );
                if settle == WaitOutcome::Satisfied {
                    debug!("greeting settle cut short");
                }
                self.play_greeting();
            }
            DeviceState::Recording => {
                if let Err(e) = self.start_recording() {
                    self.recording_failed(e);
                    self.enter(DeviceState::Ready);
                    return;
                }
            }
            DeviceState::Playback => self.play_review(),
            DeviceState::ChangeGreeting => {
                self.review = ReviewPhase::Replay;
                self.recordings.play(&self.context.last_recording);
            }
            DeviceState::Init | DeviceState::Ready => {}
        }

        self.timer_started_at = self.clock.now_ms();
    }

    fn stop_playback(&mut self) {
        self.prompts.stop();
        self.recordings.stop();
    }

    /// Config mode plays the instructions, otherwise the custom greeting
    /// if there is one, else the default greeting
    fn play_greeting(&mut self) {
        let assets = &self.config.assets;
        if self.context.config_mode {
            self.prompts.play(&assets.change_instructions);
        } else if self.storage.exists(&assets.custom_greeting) {
            self.recordings.play(&assets.custom_greeting);
        } else {
            self.prompts.play(&assets.default_greeting);
        }
    }

    /// Config mode reviews the current greeting, otherwise the last message
    fn play_review(&mut self) {
        let assets = &self.config.assets;
        if self.context.config_mode {
            if self.storage.exists(&assets.custom_greeting) {
                self.recordings.play(&assets.custom_greeting);
            } else {
                self.prompts.play(&assets.default_greeting);
            }
        } else {
            self.recordings.play(&self.context.last_recording);
        }
    }

    fn start_recording(&mut self) -> Result<(), RecordingError> {
        if self.session.is_some() {
            return Err(RecordingError::SessionAlreadyOpen);
        }

        self.clock.sleep_ms(self.config.timings.capture_settle_ms);
        let session = RecordingSession::start(
            self.storage.as_mut(),
            self.capture.as_mut(),
            &self.config.assets.temp_recording,
            &self.config.recording,
        )?;
        self.session = Some(session);
        self.emit(DeviceEvent::RecordingStarted);
        Ok(())
    }

    /// Stop the session and keep, discard or hand over the recording
    fn finish_recording(&mut self, finish: Finish) -> Option<DeviceState> {
        let Some(session) = self.session.take() else {
            warn!("no open recording session");
            return Some(DeviceState::Ready);
        };

        let finished = match session.stop(self.capture.as_mut(), self.storage.as_mut(), &self.allocator) {
            Ok(finished) => finished,
            Err(e) => {
                self.recording_failed(e);
                return Some(DeviceState::Ready);
            }
        };

        let quiet = self.config.volumes.beep_quiet;
        match finish {
            Finish::TimeLimit => {
                info!("maximum recording time reached");
                self.keep(finished);
                self.beeper.beep(quiet, 3, 250);
                None
            }
            _ if self.context.config_mode => {
                if finished.too_short || finish == Finish::HungUp {
                    let reason = if finished.too_short {
                        DiscardReason::TooShort
                    } else {
                        DiscardReason::HungUp
                    };
                    self.discard(finished, reason);
                    let prompt = self.config.assets.message_too_short.clone();
                    self.play_prompt_until_hangup(&prompt);
                    Some(DeviceState::Ready)
                } else {
                    self.keep(finished);
                    self.beeper.beep(quiet, 1, 250);
                    None
                }
            }
            _ => {
                if finished.too_short {
                    self.discard(finished, DiscardReason::TooShort);
                } else {
                    self.keep(finished);
                    self.beeper.beep(quiet, 3, 250);
                }
                Some(DeviceState::Ready)
            }
        }
    }

    fn keep(&mut self, finished: FinishedRecording) {
        info!(name = %finished.name, bytes = finished.total_bytes, "recording saved");
        self.context.last_recording = finished.name.clone();
        self.emit(DeviceEvent::RecordingSaved {
            name: finished.name,
            bytes: finished.total_bytes,
        });
    }

    fn discard(&mut self, finished: FinishedRecording, reason: DiscardReason) {
        info!(name = %finished.name, bytes = finished.total_bytes, ?reason, "recording discarded");
        if let Err(e) = self.storage.remove(&finished.name) {
            warn!(?e, name = %finished.name, "failed to remove discarded recording");
        }
        self.context.last_recording = self.config.assets.no_message.clone();
        self.emit(DeviceEvent::RecordingDiscarded {
            bytes: finished.total_bytes,
            reason,
        });
    }

    fn recording_failed(&mut self, e: RecordingError) {
        error!(?e, "recording session failed");
        let temp = &self.config.assets.temp_recording;
        if self.storage.exists(temp) {
            if let Err(remove_err) = self.storage.remove(temp) {
                warn!(?remove_err, "failed to remove temporary recording");
            }
        }
        self.context.last_recording = self.config.assets.no_message.clone();
        self.emit(DeviceEvent::RecordingFailed {
            reason: e.to_string(),
        });
        let quiet = self.config.volumes.beep_quiet;
        self.beeper.play(BeepPattern::new(
            quiet,
            SESSION_ERROR_BEEP_COUNT,
            boot::STORAGE_ERROR_BEEP_MS,
        ));
    }

    /// Play a prompt and block until it ends or the handset goes down
    fn play_prompt_until_hangup(&mut self, name: &str) {
        self.prompts.play(name);
        let tick = self.config.timings.poll_interval_ms;
        let prompts = &self.prompts;
        let halt = &self.halt;
        wait_until(self.clock.as_ref(), &mut self.input, None, tick, |input| {
            prompts.is_stopped() || input.is_pressed(Pin::Handset) || halt.load(Ordering::SeqCst)
        });
        self.prompts.stop();
    }

    fn prompt_confirmation(&mut self) {
        let quiet = self.config.volumes.beep_quiet;
        self.beeper.beep(quiet, 2, 250);
        self.clock.sleep_ms(self.config.timings.confirm_pause_ms);
        self.prompts.play(&self.config.assets.confirm_greeting);
        self.review = ReviewPhase::Confirm;
        self.timer_started_at = self.clock.now_ms();
        self.emit(DeviceEvent::ConfirmationPrompted);
    }

    /// Replace the custom greeting with the last recording
    fn save_greeting(&mut self) {
        self.prompts.stop();

        let custom = self.config.assets.custom_greeting.clone();
        let recording = self.context.last_recording.clone();
        if recording == self.config.assets.no_message {
            warn!("no recording to save as greeting");
        } else {
            if self.storage.exists(&custom) {
                if let Err(e) = self.storage.remove(&custom) {
                    warn!(?e, "failed to remove old greeting");
                }
            }
            match self.storage.rename(&recording, &custom) {
                Ok(()) => {
                    info!(%recording, "greeting changed");
                    // the recording now lives on as the greeting
                    self.context.last_recording = self.config.assets.no_message.clone();
                    self.emit(DeviceEvent::GreetingChanged { recording });
                }
                Err(e) => error!(?e, %recording, "failed to install new greeting"),
            }
        }

        self.beeper.beep(self.config.volumes.beep_quiet, 3, 250);
        let prompt = self.config.assets.greeting_saved.clone();
        self.play_prompt_until_hangup(&prompt);
    }

    /// Finish an open session when the loop is stopped mid-recording
    fn shutdown(&mut self) {
        self.stop_playback();
        let Some(session) = self.session.take() else {
            return;
        };

        match session.stop(self.capture.as_mut(), self.storage.as_mut(), &self.allocator) {
            Ok(finished) if finished.too_short => self.discard(finished, DiscardReason::TooShort),
            Ok(finished) => self.keep(finished),
            Err(e) => error!(?e, "failed to finish recording on shutdown"),
        }
    }
}
