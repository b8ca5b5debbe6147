//! Engine handle - the control-thread side of the engine
//!
//! [`create_engine`] builds an [`EngineHandle`] / [`AudioEngine`] pair. The
//! engine moves to the audio thread; the handle stays on the control side
//! and is the only way to reach it: submit commands, wait for them, queue
//! permutations, read atomics and drain realtime notices.
//!
//! ```ignore
//! let collector = Collector::spawn()?;
//! let (mut handle, engine) = create_engine(config, ctx, collector.handle(), Some(bus))?;
//! // move `engine` into the host audio callback
//! let riff = handle.share_riff(resolved_riff);
//! let done = handle.play_riff(riff, TransitionBoundary::NextBar)?;
//! handle.block_until(done);
//! ```

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use basedrop::{Owned, Shared};

use crate::analysis::StemAmalgamEvent;
use crate::config::{EngineConfig, PermutationChangeRate};
use crate::context::{AsyncCommandCounter, EngineContext, OperationId};
use crate::error::{ConfigError, EventBusResult, RiffError};
use crate::events::{EventBus, EventBusBuilder};
use crate::riff::Riff;

use super::command::{CommandQueue, EngineCommand, ProcessorId, QueuedCommand, TransitionBoundary};
use super::completion::CompletionTracker;
use super::effect::{MasterEffect, SampleProcessor};
use super::engine::{AudioEngine, EngineAtomics};
use super::mixer::{MixerAtomics, MixerLinks, RiffMixer};
use super::notice::{notice_channel, NoticeReceiver};
use super::permutation::{Permutation, PermutationObserver, PermutationQueue};

/// Counters that can be outstanding beyond the queue capacity (producers
/// holding a counter but not yet pushed)
const COMPLETION_SLACK: usize = 64;

/// Command queue plus completion tracking, shared by every producer and the engine
pub(crate) struct CommandBridge {
    queue: CommandQueue,
    tracker: CompletionTracker,
}

impl CommandBridge {
    fn new(ctx: Arc<EngineContext>, capacity: usize) -> Self {
        Self {
            queue: CommandQueue::new(capacity),
            tracker: CompletionTracker::new(ctx, capacity * 2 + COMPLETION_SLACK),
        }
    }

    pub(crate) fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub(crate) fn tracker(&self) -> &CompletionTracker {
        &self.tracker
    }

    fn context(&self) -> &Arc<EngineContext> {
        self.tracker.context()
    }

    fn try_submit(&self, command: EngineCommand) -> Result<AsyncCommandCounter, EngineCommand> {
        let counter = self.context().next_command_counter();
        match self.queue.push(QueuedCommand { counter, command }) {
            Ok(()) => Ok(counter),
            Err(rejected) => {
                // Nothing will ever apply it; don't let the watermark wait on it
                self.tracker.retire(counter);
                Err(rejected.command)
            }
        }
    }
}

/// Register the events the engine publishes, with pools sized from `config`
pub fn register_engine_events(
    builder: EventBusBuilder,
    config: &EngineConfig,
) -> EventBusResult<EventBusBuilder> {
    builder.register::<StemAmalgamEvent>(config.snapshot_event_capacity)
}

/// Build a handle/engine pair from a validated config
///
/// A bus, if given, must carry the engine's events (see
/// [`register_engine_events`]).
pub fn create_engine(
    config: EngineConfig,
    ctx: Arc<EngineContext>,
    gc: basedrop::Handle,
    bus: Option<Arc<EventBus>>,
) -> Result<(EngineHandle, AudioEngine), ConfigError> {
    config.validate()?;
    if let Some(bus) = &bus {
        if !bus.is_registered::<StemAmalgamEvent>() {
            return Err(ConfigError::UnregisteredEvent(std::any::type_name::<StemAmalgamEvent>()));
        }
    }

    let bridge = Arc::new(CommandBridge::new(Arc::clone(&ctx), config.command_queue_capacity));
    let links = MixerLinks {
        permutations: Arc::new(PermutationQueue::new(
            Arc::clone(&ctx),
            config.permutation_queue_capacity,
        )),
        observer: Arc::new(PermutationObserver::with_change_rate(config.change_rate)),
        atomics: Arc::new(MixerAtomics::new()),
    };
    let engine_atomics = Arc::new(EngineAtomics::new(config.master_gain));
    let (notice_tx, notice_rx) = notice_channel(config.notice_queue_capacity);

    let mixer = Owned::new(&gc, RiffMixer::new(&config, &links));
    let engine = AudioEngine::new(
        &config,
        Arc::clone(&bridge),
        mixer,
        bus,
        notice_tx,
        Arc::clone(&engine_atomics),
    );

    log::info!(
        "Audio engine created: {} Hz, {} max frames, {} command slots",
        config.sample_rate,
        config.max_buffer_frames,
        config.command_queue_capacity
    );

    let handle = EngineHandle {
        bridge,
        links,
        engine_atomics,
        notices: notice_rx,
        gc,
        config,
    };
    Ok((handle, engine))
}

pub struct EngineHandle {
    bridge: Arc<CommandBridge>,
    links: MixerLinks,
    engine_atomics: Arc<EngineAtomics>,
    notices: NoticeReceiver,
    gc: basedrop::Handle,
    config: EngineConfig,
}

impl EngineHandle {
    pub fn context(&self) -> &Arc<EngineContext> {
        self.bridge.context()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Submit a command from any thread
    ///
    /// # Panics
    ///
    /// When the command queue is full. The queue is sized for UI-rate
    /// traffic, so overflow means the engine isn't running or the capacity
    /// is wrong; use [`EngineHandle::try_submit`] to handle it instead.
    pub fn submit(&self, command: EngineCommand) -> AsyncCommandCounter {
        match self.try_submit(command) {
            Ok(counter) => counter,
            Err(rejected) => panic!(
                "Engine command queue full ({} slots) submitting {}",
                self.bridge.queue().capacity(),
                rejected.kind()
            ),
        }
    }

    /// Submit without panicking; hands the command back when the queue is full
    pub fn try_submit(&self, command: EngineCommand) -> Result<AsyncCommandCounter, EngineCommand> {
        self.bridge.try_submit(command)
    }

    /// Whether `counter` and every command before it has been applied
    pub fn is_complete(&self, counter: AsyncCommandCounter) -> bool {
        self.context().is_complete(counter)
    }

    /// Yield until `counter` has been applied
    ///
    /// Never call this from the audio thread. It relies on callbacks
    /// running every few milliseconds; if the engine has stopped, it spins
    /// forever. Prefer [`EngineHandle::block_until_timeout`] where that can
    /// happen.
    pub fn block_until(&self, counter: AsyncCommandCounter) {
        while !self.is_complete(counter) {
            std::thread::yield_now();
        }
    }

    /// Like [`EngineHandle::block_until`], giving up after `timeout`
    pub fn block_until_timeout(&self, counter: AsyncCommandCounter, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_complete(counter) {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::yield_now();
        }
        true
    }

    /// Wrap a riff for hand-over to the engine
    pub fn share_riff(&self, riff: Riff) -> Shared<Riff> {
        Shared::new(&self.gc, riff)
    }

    /// Switch to `riff` at `boundary`; only riffs in the `Success` state are accepted
    pub fn play_riff(
        &self,
        riff: Shared<Riff>,
        boundary: TransitionBoundary,
    ) -> Result<AsyncCommandCounter, RiffError> {
        if !riff.is_ready() {
            return Err(RiffError::NotReady(riff.sync_state()));
        }
        log::debug!("Queueing riff {:?} '{}' at {:?}", riff.id(), riff.name(), boundary);
        Ok(self.submit(EngineCommand::PlayRiff { riff, boundary }))
    }

    /// Drop the current riff and any pending transition
    pub fn stop(&self) -> AsyncCommandCounter {
        self.submit(EngineCommand::Stop)
    }

    pub fn set_mute(&self, muted: bool) -> AsyncCommandCounter {
        self.submit(EngineCommand::SetMute(muted))
    }

    pub fn toggle_mute(&self) -> AsyncCommandCounter {
        self.submit(EngineCommand::ToggleMute)
    }

    pub fn set_master_gain(&self, gain: f32) -> AsyncCommandCounter {
        self.submit(EngineCommand::SetMasterGain(gain))
    }

    pub fn set_change_rate(&self, rate: PermutationChangeRate) -> AsyncCommandCounter {
        self.submit(EngineCommand::SetChangeRate(rate))
    }

    pub fn push_effect(&self, effect: Box<dyn MasterEffect>) -> AsyncCommandCounter {
        log::debug!("Pushing master effect '{}'", effect.name());
        self.submit(EngineCommand::PushEffect(Owned::new(&self.gc, effect)))
    }

    pub fn pop_effect(&self) -> AsyncCommandCounter {
        self.submit(EngineCommand::PopEffect)
    }

    /// Attach a processor; the returned token detaches it again
    pub fn attach_processor(
        &self,
        processor: Box<dyn SampleProcessor>,
    ) -> (ProcessorToken, AsyncCommandCounter) {
        let id = ProcessorId(self.context().next_operation_id().0);
        log::debug!("Attaching processor '{}' as {:?}", processor.name(), id);
        let counter = self.submit(EngineCommand::AttachProcessor {
            id,
            processor: Owned::new(&self.gc, processor),
        });
        let token = ProcessorToken {
            id,
            bridge: Arc::downgrade(&self.bridge),
        };
        (token, counter)
    }

    pub fn detach_processor(&self, id: ProcessorId) -> AsyncCommandCounter {
        self.submit(EngineCommand::DetachProcessor(id))
    }

    /// Fresh mixer wired to this engine's permutation queue and atomics
    pub fn new_mixer(&self) -> RiffMixer {
        RiffMixer::new(&self.config, &self.links)
    }

    /// Replace the engine's mixer; the old one is freed off the audio thread
    pub fn swap_mixer(&self, mixer: RiffMixer) -> AsyncCommandCounter {
        self.submit(EngineCommand::SwapMixer(Owned::new(&self.gc, mixer)))
    }

    /// Queue a target permutation (any thread, never blocks)
    pub fn enqueue_permutation(&self, target: Permutation) -> OperationId {
        self.links.permutations.enqueue_permutation(target)
    }

    /// Blended permutation as last published by the audio thread
    pub fn current_permutation(&self) -> Permutation {
        self.links.observer.current()
    }

    pub fn permutation_observer(&self) -> Arc<PermutationObserver> {
        Arc::clone(&self.links.observer)
    }

    pub fn mixer_atomics(&self) -> Arc<MixerAtomics> {
        Arc::clone(&self.links.atomics)
    }

    pub fn engine_atomics(&self) -> Arc<EngineAtomics> {
        Arc::clone(&self.engine_atomics)
    }

    /// Log every pending realtime notice; returns how many there were
    pub fn drain_notices(&mut self) -> usize {
        self.notices.drain()
    }

    /// Drain notices into `f` instead of the log
    pub fn drain_notices_with(&mut self, f: impl FnMut(super::notice::RealtimeNotice)) -> usize {
        self.notices.drain_with(f)
    }

    /// Notices lost to a full ring
    pub fn dropped_notices(&self) -> u64 {
        self.notices.dropped()
    }
}

/// Detach token for an attached sample processor
///
/// Holds only a weak reference to the command queue, so it can outlive the
/// engine; detaching then does nothing.
#[must_use = "dropping the token leaves the processor attached"]
#[derive(Debug)]
pub struct ProcessorToken {
    id: ProcessorId,
    bridge: Weak<CommandBridge>,
}

impl ProcessorToken {
    pub fn id(&self) -> ProcessorId {
        self.id
    }

    /// Queue a detach; `None` when the engine is gone or its queue is full
    pub fn detach(self) -> Option<AsyncCommandCounter> {
        let bridge = self.bridge.upgrade()?;
        bridge.try_submit(EngineCommand::DetachProcessor(self.id)).ok()
    }
}
