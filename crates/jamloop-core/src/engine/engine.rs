//! Audio engine - the realtime side of the command queue
//!
//! [`AudioEngine::process`] is called from the host audio callback. It
//! drains the command queue, renders the mixer, runs stem analysis, the
//! master effect stack, master gain and the clipper, hands the result to
//! attached sample processors and finally applies mute.
//!
//! Nothing in here blocks, locks or allocates: every buffer and stack is
//! sized from [`EngineConfig`] up front, replaced values are `basedrop`
//! handles, and anomalies go to the notice ring instead of the log.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use basedrop::Owned;

use crate::analysis::{StemAmalgamAnalyzer, StemAmalgamEvent, StemOnsetProbe};
use crate::config::EngineConfig;
use crate::events::{EventBus, SendError};
use crate::types::{Sample, StereoBuffer, StereoSample};

use super::command::{EngineCommand, ProcessorId};
use super::effect::{MasterEffect, SampleProcessor};
use super::handle::CommandBridge;
use super::master_clipper::MasterClipper;
use super::mixer::RiffMixer;
use super::notice::{NoticeSender, RealtimeNotice};

/// Lock-free engine state for UI reads
#[derive(Debug)]
pub struct EngineAtomics {
    pub muted: AtomicBool,
    /// Master gain as `f32` bits
    pub master_gain: AtomicU32,
    pub effect_count: AtomicUsize,
    pub processor_count: AtomicUsize,
}

impl EngineAtomics {
    pub fn new(master_gain: f32) -> Self {
        Self {
            muted: AtomicBool::new(false),
            master_gain: AtomicU32::new(master_gain.to_bits()),
            effect_count: AtomicUsize::new(0),
            processor_count: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn master_gain(&self) -> f32 {
        f32::from_bits(self.master_gain.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn effect_count(&self) -> usize {
        self.effect_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn processor_count(&self) -> usize {
        self.processor_count.load(Ordering::Relaxed)
    }
}

pub struct AudioEngine {
    bridge: Arc<CommandBridge>,
    mixer: Option<Owned<RiffMixer>>,
    effects: Vec<Owned<Box<dyn MasterEffect>>>,
    processors: Vec<(ProcessorId, Owned<Box<dyn SampleProcessor>>)>,
    master_gain: f32,
    muted: bool,
    clipper: MasterClipper,
    probe: StemOnsetProbe,
    analyzer: StemAmalgamAnalyzer,
    window_seconds: f32,
    bus: Option<Arc<EventBus>>,
    notices: NoticeSender,
    atomics: Arc<EngineAtomics>,
    /// Pre-allocated master buffer, `max_frames` capacity
    master: StereoBuffer,
    /// Absolute sample counter, advanced by every rendered frame
    position: u64,
    sample_rate: u32,
    max_frames: usize,
}

impl AudioEngine {
    pub(crate) fn new(
        config: &EngineConfig,
        bridge: Arc<CommandBridge>,
        mixer: Owned<RiffMixer>,
        bus: Option<Arc<EventBus>>,
        notices: NoticeSender,
        atomics: Arc<EngineAtomics>,
    ) -> Self {
        Self {
            bridge,
            mixer: Some(mixer),
            effects: Vec::with_capacity(config.effect_stack_capacity),
            processors: Vec::with_capacity(config.processor_capacity),
            master_gain: config.master_gain,
            muted: false,
            clipper: MasterClipper::with_threshold_db(config.clip_threshold_db),
            probe: StemOnsetProbe::new(config.analysis_window_frames),
            analyzer: StemAmalgamAnalyzer::new(
                config.consensus_threshold,
                config.consensus_decay_per_second,
            ),
            window_seconds: config.analysis_window_frames as f32 / config.sample_rate as f32,
            bus,
            notices,
            atomics,
            master: StereoBuffer::silence(config.max_buffer_frames),
            position: 0,
            sample_rate: config.sample_rate,
            max_frames: config.max_buffer_frames,
        }
    }

    /// Absolute sample position of the next frame to render
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn mixer(&self) -> Option<&RiffMixer> {
        self.mixer.as_deref()
    }

    pub fn clip_indicator(&self) -> Arc<AtomicBool> {
        self.clipper.clip_indicator()
    }

    /// Render one callback into `output`
    ///
    /// Commands are drained once, then the buffer is rendered in chunks no
    /// longer than the engine's or the installed mixer's frame limit.
    pub fn process(&mut self, output: &mut [StereoSample]) {
        self.process_commands();
        let mut offset = 0;
        while offset < output.len() {
            let rendered = self.render(output.len() - offset);
            if rendered == 0 {
                output[offset..].fill(StereoSample::silence());
                break;
            }
            output[offset..offset + rendered].copy_from_slice(self.master.as_slice());
            offset += rendered;
        }
    }

    /// Render one callback into an interleaved `[L, R, L, R, ...]` buffer
    pub fn process_interleaved(&mut self, output: &mut [Sample]) {
        let samples = output.len();
        match bytemuck::try_cast_slice_mut::<Sample, StereoSample>(output) {
            Ok(frames) => self.process(frames),
            Err(_) => {
                output.fill(0.0);
                self.notices.push(RealtimeNotice::MalformedOutput { samples });
            }
        }
    }

    /// Apply every command that was queued when the drain started
    pub fn process_commands(&mut self) -> usize {
        let pending = self.bridge.queue().len();
        let mut applied = 0;
        for _ in 0..pending {
            let Some(queued) = self.bridge.queue().pop() else {
                break;
            };
            self.apply(queued.command);
            self.bridge.tracker().complete(queued.counter);
            applied += 1;
        }
        // Pick up counters retired by producers whose push was rejected
        self.bridge.tracker().advance();
        if applied > 0 {
            self.publish();
        }
        applied
    }

    fn apply(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::SwapMixer(mixer) => {
                // The old mixer is handed to the collector when dropped here
                self.mixer = Some(mixer);
                self.probe.reset();
                self.analyzer.reset();
            }
            EngineCommand::PushEffect(mut effect) => {
                if self.effects.len() < self.effects.capacity() {
                    effect.reset();
                    self.effects.push(effect);
                } else {
                    self.notices.push(RealtimeNotice::EffectStackFull);
                }
            }
            EngineCommand::PopEffect => {
                if self.effects.pop().is_none() {
                    self.notices.push(RealtimeNotice::EffectStackEmpty);
                }
            }
            EngineCommand::SetMute(muted) => self.muted = muted,
            EngineCommand::ToggleMute => self.muted = !self.muted,
            EngineCommand::SetMasterGain(gain) => {
                if gain.is_finite() {
                    self.master_gain = gain.max(0.0);
                } else {
                    self.notices.push(RealtimeNotice::InvalidGain);
                }
            }
            EngineCommand::AttachProcessor { id, processor } => {
                if self.processors.len() < self.processors.capacity() {
                    self.processors.push((id, processor));
                } else {
                    self.notices.push(RealtimeNotice::ProcessorSlotsFull(id));
                }
            }
            EngineCommand::DetachProcessor(id) => {
                match self.processors.iter().position(|(existing, _)| *existing == id) {
                    Some(index) => {
                        self.processors.remove(index);
                    }
                    None => self.notices.push(RealtimeNotice::UnknownProcessor(id)),
                }
            }
            EngineCommand::PlayRiff { riff, boundary } => {
                let state = riff.sync_state();
                if !riff.is_ready() {
                    self.notices.push(RealtimeNotice::RiffNotReady {
                        riff: riff.id(),
                        state,
                    });
                    return;
                }
                match self.mixer.as_mut() {
                    Some(mixer) => mixer.play(riff, boundary),
                    None => self.notices.push(RealtimeNotice::NoMixer),
                }
            }
            EngineCommand::Stop => {
                if let Some(mixer) = self.mixer.as_mut() {
                    mixer.stop();
                }
                // Tails of the stopped riff must not ring into the next one
                for effect in self.effects.iter_mut() {
                    effect.reset();
                }
                self.analyzer.reset();
            }
            EngineCommand::SetChangeRate(rate) => match self.mixer.as_mut() {
                Some(mixer) => mixer.set_change_rate(rate),
                None => self.notices.push(RealtimeNotice::NoMixer),
            },
        }
    }

    /// Render up to `frames` frames into the master buffer; returns how many
    fn render(&mut self, frames: usize) -> usize {
        let limit = match self.mixer.as_deref() {
            Some(mixer) => self.max_frames.min(mixer.max_frames()),
            None => self.max_frames,
        };
        self.master.set_len_from_capacity(frames.min(limit));
        let frames = self.master.len();
        let end = self.position + frames as u64;

        match self.mixer.as_mut() {
            Some(mixer) => {
                mixer.process(&mut self.master, self.position);
                self.probe
                    .process(mixer.stem_buffers(), mixer.active_stems(), |signals| {
                        let amalgam = self.analyzer.ingest(signals, self.window_seconds);
                        if let Some(bus) = &self.bus {
                            let event = StemAmalgamEvent {
                                sample_position: end,
                                amalgam,
                            };
                            match bus.try_send(event) {
                                Ok(()) | Err(SendError::Closed(_)) => {}
                                Err(_) => self.notices.push(RealtimeNotice::SnapshotDropped),
                            }
                        }
                    });
            }
            None => self.master.fill_silence(),
        }

        for effect in self.effects.iter_mut() {
            effect.process(&mut self.master);
        }
        if self.master_gain != 1.0 {
            self.master.scale(self.master_gain);
        }
        self.clipper.process(&mut self.master);

        // Side-chain consumers see the signal before mute
        for (_, processor) in self.processors.iter_mut() {
            processor.process(&self.master, self.sample_rate);
        }
        if self.muted {
            self.master.fill_silence();
        }

        self.position = end;
        frames
    }

    fn publish(&self) {
        self.atomics.muted.store(self.muted, Ordering::Relaxed);
        self.atomics
            .master_gain
            .store(self.master_gain.to_bits(), Ordering::Relaxed);
        self.atomics.effect_count.store(self.effects.len(), Ordering::Relaxed);
        self.atomics
            .processor_count
            .store(self.processors.len(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::analysis::StemAmalgamEvent;
    use crate::context::EngineContext;
    use crate::engine::command::TransitionBoundary;
    use crate::engine::effect::LevelMeter;
    use crate::engine::gc::Collector;
    use crate::config::PermutationChangeRate;
    use crate::engine::handle::{create_engine, register_engine_events, EngineHandle};
    use crate::error::{ConfigError, RiffError};
    use crate::events::EventBusBuilder;
    use crate::riff::tests::{metadata, ready_riff};
    use crate::riff::Riff;

    /// Records its label every time it runs
    struct Labeled {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl MasterEffect for Labeled {
        fn process(&mut self, _buffer: &mut StereoBuffer) {
            self.log.lock().unwrap().push(self.label);
        }

        fn name(&self) -> &str {
            self.label
        }
    }

    /// Counts how often it was reset
    struct ResetCounter(Arc<AtomicUsize>);

    impl MasterEffect for ResetCounter {
        fn process(&mut self, _buffer: &mut StereoBuffer) {}

        fn name(&self) -> &str {
            "reset counter"
        }

        fn reset(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn build(
        config: EngineConfig,
        collector: &Collector,
        bus: Option<Arc<EventBus>>,
    ) -> (EngineHandle, AudioEngine) {
        let _ = env_logger::builder().is_test(true).try_init();
        let ctx = Arc::new(EngineContext::new());
        create_engine(config, ctx, collector.handle(), bus).unwrap()
    }

    fn config() -> EngineConfig {
        EngineConfig {
            transition_samples: 0,
            change_rate: PermutationChangeRate::Instant,
            max_buffer_frames: 1024,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_commands_apply_in_submission_order() {
        let collector = Collector::spawn().unwrap();
        let (handle, mut engine) = build(config(), &collector, None);
        let log = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            handle.push_effect(Box::new(Labeled {
                label,
                log: Arc::clone(&log),
            }));
        }
        handle.set_master_gain(0.5);
        let last = handle.set_master_gain(0.25);

        let before = handle.context().completed();
        assert_eq!(engine.process_commands(), 5);
        assert_eq!(handle.context().completed(), before + 5);
        assert!(handle.is_complete(last));

        let mut out = vec![StereoSample::silence(); 64];
        engine.process(&mut out);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);

        let atomics = handle.engine_atomics();
        assert_eq!(atomics.effect_count(), 3);
        assert_eq!(atomics.master_gain(), 0.25);
    }

    #[test]
    fn test_drain_is_bounded_to_queued_commands() {
        let collector = Collector::spawn().unwrap();
        let (handle, mut engine) = build(config(), &collector, None);

        handle.set_mute(true);
        assert_eq!(engine.process_commands(), 1);
        assert_eq!(engine.process_commands(), 0);
        assert!(engine.is_muted());
    }

    #[test]
    fn test_processors_see_signal_before_mute() {
        let collector = Collector::spawn().unwrap();
        let (handle, mut engine) = build(config(), &collector, None);

        let riff = handle.share_riff(ready_riff(handle.context(), &[0.5], 4800));
        handle.play_riff(riff, TransitionBoundary::Immediate).unwrap();
        let meter = LevelMeter::new();
        let readout = meter.readout();
        let (_token, _) = handle.attach_processor(Box::new(meter));
        handle.set_mute(true);

        let mut out = vec![StereoSample::silence(); 512];
        engine.process(&mut out);

        assert!((readout.peak() - 0.5).abs() < 1e-4);
        assert!(out.iter().all(|s| s.left == 0.0 && s.right == 0.0));
        assert!(handle.engine_atomics().is_muted());
    }

    #[test]
    fn test_toggle_mute_round_trips() {
        let collector = Collector::spawn().unwrap();
        let (handle, mut engine) = build(config(), &collector, None);

        handle.toggle_mute();
        engine.process_commands();
        assert!(engine.is_muted());
        handle.toggle_mute();
        engine.process_commands();
        assert!(!engine.is_muted());
    }

    #[test]
    fn test_unknown_detach_raises_notice() {
        let collector = Collector::spawn().unwrap();
        let (mut handle, mut engine) = build(config(), &collector, None);

        handle.detach_processor(ProcessorId(999));
        handle.pop_effect();
        engine.process_commands();

        let mut notices = Vec::new();
        assert_eq!(handle.drain_notices_with(|n| notices.push(n)), 2);
        assert_eq!(
            notices,
            vec![
                RealtimeNotice::UnknownProcessor(ProcessorId(999)),
                RealtimeNotice::EffectStackEmpty
            ]
        );
    }

    #[test]
    fn test_non_finite_gain_is_ignored() {
        let collector = Collector::spawn().unwrap();
        let (mut handle, mut engine) = build(config(), &collector, None);

        handle.set_master_gain(f32::NAN);
        engine.process_commands();
        assert_eq!(handle.engine_atomics().master_gain(), 1.0);
        assert_eq!(handle.drain_notices(), 1);
    }

    #[test]
    fn test_unready_riff_is_rejected() {
        let collector = Collector::spawn().unwrap();
        let (handle, _engine) = build(config(), &collector, None);

        let riff = Riff::new(handle.context(), metadata(1), 48000).unwrap();
        let riff = handle.share_riff(riff);
        let submitted = handle.context().submitted();
        assert!(matches!(
            handle.play_riff(riff, TransitionBoundary::NextBar),
            Err(RiffError::NotReady(_))
        ));
        assert_eq!(handle.context().submitted(), submitted);
    }

    #[test]
    fn test_token_outliving_engine_is_inert() {
        let collector = Collector::spawn().unwrap();
        let (handle, engine) = build(config(), &collector, None);

        let (token, _) = handle.attach_processor(Box::new(LevelMeter::new()));
        drop(engine);
        drop(handle);
        assert_eq!(token.detach(), None);
    }

    #[test]
    fn test_token_detaches_processor() {
        let collector = Collector::spawn().unwrap();
        let (handle, mut engine) = build(config(), &collector, None);

        let (token, _) = handle.attach_processor(Box::new(LevelMeter::new()));
        engine.process_commands();
        assert_eq!(handle.engine_atomics().processor_count(), 1);

        let done = token.detach().unwrap();
        engine.process_commands();
        assert!(handle.is_complete(done));
        assert_eq!(handle.engine_atomics().processor_count(), 0);
    }

    #[test]
    fn test_block_until_timeout() {
        let collector = Collector::spawn().unwrap();
        let (handle, mut engine) = build(config(), &collector, None);

        let counter = handle.set_mute(true);
        assert!(!handle.block_until_timeout(counter, Duration::from_millis(10)));
        engine.process_commands();
        assert!(handle.block_until_timeout(counter, Duration::from_millis(10)));
        handle.block_until(counter);
    }

    #[test]
    fn test_rejected_submit_does_not_stall_watermark() {
        let collector = Collector::spawn().unwrap();
        let config = EngineConfig {
            command_queue_capacity: 2,
            ..config()
        };
        let (handle, mut engine) = build(config, &collector, None);

        handle.set_mute(true);
        handle.set_mute(false);
        let rejected = handle.try_submit(EngineCommand::ToggleMute);
        assert!(matches!(rejected, Err(EngineCommand::ToggleMute)));

        assert_eq!(engine.process_commands(), 2);
        assert_eq!(handle.context().completed(), 3);

        let next = handle.set_mute(true);
        engine.process_commands();
        assert!(handle.is_complete(next));
    }

    #[test]
    #[should_panic(expected = "command queue full")]
    fn test_submit_panics_when_full() {
        let collector = Collector::spawn().unwrap();
        let config = EngineConfig {
            command_queue_capacity: 1,
            ..config()
        };
        let (handle, _engine) = build(config, &collector, None);
        handle.stop();
        handle.stop();
    }

    #[test]
    fn test_swapped_mixer_starts_idle() {
        let collector = Collector::spawn().unwrap();
        let (handle, mut engine) = build(config(), &collector, None);

        let riff = handle.share_riff(ready_riff(handle.context(), &[0.5], 4800));
        handle.play_riff(riff, TransitionBoundary::Immediate).unwrap();
        let mut out = vec![StereoSample::silence(); 256];
        engine.process(&mut out);
        assert!(handle.mixer_atomics().current_riff().is_some());

        handle.swap_mixer(handle.new_mixer());
        engine.process(&mut out);
        assert!(out.iter().all(|s| s.left == 0.0));
        assert_eq!(handle.mixer_atomics().current_riff(), None);
        assert_eq!(engine.position(), 512);
    }

    #[test]
    fn test_long_callback_is_rendered_in_chunks() {
        let collector = Collector::spawn().unwrap();
        let (handle, mut engine) = build(config(), &collector, None);

        let riff = handle.share_riff(ready_riff(handle.context(), &[0.25], 4800));
        handle.play_riff(riff, TransitionBoundary::Immediate).unwrap();
        let mut out = vec![StereoSample::silence(); 2500];
        engine.process(&mut out);

        assert!(out.iter().all(|s| (s.left - 0.25).abs() < 1e-6));
        assert_eq!(engine.position(), 2500);
        assert_eq!(handle.mixer_atomics().position(), 2500);
    }

    #[test]
    fn test_odd_interleaved_buffer_is_silenced() {
        let collector = Collector::spawn().unwrap();
        let (mut handle, mut engine) = build(config(), &collector, None);

        let mut out = vec![1.0; 7];
        engine.process_interleaved(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));

        let mut notices = Vec::new();
        handle.drain_notices_with(|n| notices.push(n));
        assert_eq!(notices, vec![RealtimeNotice::MalformedOutput { samples: 7 }]);
    }

    #[test]
    fn test_consensus_event_reaches_bus() {
        let collector = Collector::spawn().unwrap();
        let bus = register_engine_events(EventBusBuilder::new(), &config())
            .unwrap()
            .build();
        let (handle, mut engine) = build(config(), &collector, Some(Arc::clone(&bus)));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _listener = bus.add_listener::<StemAmalgamEvent, _>(move |event| {
            sink.lock().unwrap().push(*event);
        });

        let riff = handle.share_riff(ready_riff(handle.context(), &[0.5, 0.5, 0.5], 4800));
        handle.play_riff(riff, TransitionBoundary::Immediate).unwrap();
        let mut out = vec![StereoSample::silence(); 1024];
        engine.process(&mut out);

        assert_eq!(bus.dispatch(), 1);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].sample_position, 1024);
        assert_eq!(seen[0].amalgam.beat_count(), 3);
        assert_eq!(seen[0].amalgam.consensus_beat, 1.0);
    }

    #[test]
    fn test_smaller_foreign_mixer_is_rendered_in_its_own_chunks() {
        let collector = Collector::spawn().unwrap();
        let (handle, mut engine) = build(config(), &collector, None);
        let small = EngineConfig {
            max_buffer_frames: 256,
            ..config()
        };
        let (other, _other_engine) = build(small, &collector, None);

        handle.swap_mixer(other.new_mixer());
        let riff = handle.share_riff(ready_riff(handle.context(), &[0.25], 4800));
        handle.play_riff(riff, TransitionBoundary::Immediate).unwrap();
        let mut out = vec![StereoSample::silence(); 512];
        engine.process(&mut out);

        assert_eq!(engine.position(), 512);
        assert!(out.iter().all(|s| (s.left - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_change_rate_survives_mixer_swap() {
        let collector = Collector::spawn().unwrap();
        let (handle, mut engine) = build(config(), &collector, None);
        let mut out = vec![StereoSample::silence(); 64];

        handle.set_change_rate(PermutationChangeRate::FourBars);
        engine.process(&mut out);
        assert_eq!(handle.permutation_observer().change_rate(), PermutationChangeRate::FourBars);

        handle.swap_mixer(handle.new_mixer());
        engine.process(&mut out);
        let rate = engine.mixer().map(|mixer| mixer.blender().change_rate());
        assert_eq!(rate, Some(PermutationChangeRate::FourBars));
    }

    #[test]
    fn test_bus_without_engine_events_is_rejected() {
        let collector = Collector::spawn().unwrap();
        let bus = EventBusBuilder::new().register::<u32>(4).unwrap().build();
        let result = create_engine(
            config(),
            Arc::new(EngineContext::new()),
            collector.handle(),
            Some(bus),
        );
        assert!(matches!(result, Err(ConfigError::UnregisteredEvent(_))));

        let bus = register_engine_events(EventBusBuilder::new(), &config())
            .unwrap()
            .build();
        assert_eq!(bus.capacity::<StemAmalgamEvent>(), Some(config().snapshot_event_capacity));
    }

    #[test]
    fn test_effects_reset_on_push_and_stop() {
        let collector = Collector::spawn().unwrap();
        let (handle, mut engine) = build(config(), &collector, None);
        let resets = Arc::new(AtomicUsize::new(0));

        handle.push_effect(Box::new(ResetCounter(Arc::clone(&resets))));
        engine.process_commands();
        assert_eq!(resets.load(Ordering::SeqCst), 1);

        handle.stop();
        engine.process_commands();
        assert_eq!(resets.load(Ordering::SeqCst), 2);
    }
}
