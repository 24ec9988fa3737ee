/*
 *  Copyright (C) 2025 Michael Bachmann
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU Affero General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU Affero General Public License for more details.
 *
 *  You should have received a copy of the GNU Affero General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! The application side of the bridge. [`SessionApi`] may be used from any
//! thread except the media loop itself; its command methods never block.
//! Construction and destruction are the only blocking operations: both wait
//! until the actor exists / is gone on the media loop.

use crate::{
    error::BridgeResult,
    formats::{FrameKind, RtpPacket, VideoFrame},
    mailbox::Mailbox,
    media_loop::TaskScheduler,
    message::{Command, Event, SessionStatus},
    session::{
        ActorSlot, OutputTaps, SessionActor, command_drain_task, event_sink,
        config::{CodecConfig, DeviceConfig, TransmitParams},
    },
    worker::{PipelineWorker, RtpIngress},
};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::oneshot;
use tracing::{debug, info, instrument};

#[derive(Default)]
struct EventHandlers {
    preview_frame: Option<Box<dyn FnMut(VideoFrame) + Send>>,
    output_frame: Option<Box<dyn FnMut(VideoFrame) + Send>>,
    audio_intensity: Option<Box<dyn FnMut(i32) + Send>>,
    status: Option<Box<dyn FnMut(SessionStatus) + Send>>,
}

/// The api handle's shared half: the inbound event mailbox, the registered
/// handlers, and the liveness flag the drain re-checks after every emission.
pub(crate) struct EventInbox {
    mailbox: Mailbox<Event>,
    handlers: Mutex<EventHandlers>,
    alive: AtomicBool,
}

impl EventInbox {
    fn new(app_loop: Arc<dyn TaskScheduler>) -> Arc<Self> {
        let inbox = Arc::new(EventInbox {
            mailbox: Mailbox::new("events", app_loop),
            handlers: Mutex::new(EventHandlers::default()),
            alive: AtomicBool::new(true),
        });
        let weak = Arc::downgrade(&inbox);
        inbox.mailbox.set_drain_task(Arc::new(move || {
            if let Some(inbox) = weak.upgrade() {
                inbox.drain();
            }
        }));
        inbox
    }

    pub(crate) fn post(&self, event: Event) {
        self.mailbox.post(event);
    }

    /// Runs on the app loop. Frames and intensities are collapsed to the
    /// most recent of each kind, then emission order is fixed: preview,
    /// output, intensity, statuses in arrival order. A handler may drop the
    /// owning [`SessionApi`]; the liveness check after each emission frees
    /// the rest of the snapshot without calling further handlers.
    fn drain(&self) {
        let snapshot = self.mailbox.take_all();

        let mut preview = None;
        let mut output = None;
        let mut intensity = None;
        let mut statuses = Vec::new();
        for event in snapshot {
            match event {
                Event::Frame {
                    kind: FrameKind::Preview,
                    frame,
                } => preview = Some(frame),
                Event::Frame {
                    kind: FrameKind::Output,
                    frame,
                } => output = Some(frame),
                Event::AudioIntensity(value) => intensity = Some(value),
                Event::Status(status) => statuses.push(status),
            }
        }

        if let Some(frame) = preview {
            self.emit(|handlers| &mut handlers.preview_frame, frame);
            if !self.alive() {
                return;
            }
        }
        if let Some(frame) = output {
            self.emit(|handlers| &mut handlers.output_frame, frame);
            if !self.alive() {
                return;
            }
        }
        if let Some(value) = intensity {
            self.emit(|handlers| &mut handlers.audio_intensity, value);
            if !self.alive() {
                return;
            }
        }
        for status in statuses {
            self.emit(|handlers| &mut handlers.status, status);
            if !self.alive() {
                return;
            }
        }
    }

    /// Calls a handler without holding the handler lock, so a handler may
    /// re-register or drop the session. The handler is put back afterwards
    /// unless it re-registered itself meanwhile.
    fn emit<A>(
        &self,
        slot: impl Fn(&mut EventHandlers) -> &mut Option<Box<dyn FnMut(A) + Send>>,
        arg: A,
    ) {
        let handler = slot(&mut self.handlers.lock().expect("handlers mutex poisoned")).take();
        if let Some(mut handler) = handler {
            handler(arg);
            let mut handlers = self.handlers.lock().expect("handlers mutex poisoned");
            let current = slot(&mut handlers);
            if current.is_none() {
                *current = Some(handler);
            }
        }
    }

    fn alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn retire(&self) {
        self.alive.store(false, Ordering::Release);
        self.mailbox.clear();
    }

    fn handlers(&self) -> std::sync::MutexGuard<'_, EventHandlers> {
        self.handlers.lock().expect("handlers mutex poisoned")
    }
}

/// Thread-safe handle to a media session.
///
/// Commands are posted to the actor's mailbox and processed on the media
/// loop, strictly in order, one at a time. Worker events come back as
/// handler invocations on the app loop, except the raw RTP/record taps,
/// which are called directly from the media thread.
///
/// Dropping the handle synchronously tears the actor (and the worker) down
/// on the media loop. Construction and drop must therefore not happen on the
/// media loop itself, nor inside an async runtime context.
pub struct SessionApi {
    name: String,
    commands: Arc<Mailbox<Command>>,
    inbox: Arc<EventInbox>,
    taps: Arc<OutputTaps>,
    slot: ActorSlot,
    ingress: Arc<dyn RtpIngress>,
    media: Arc<dyn TaskScheduler>,
}

impl SessionApi {
    /// Creates the session actor on the media loop and blocks until it
    /// exists. The worker is built there too, by `make_worker`, so workers
    /// need not be constructible off their loop.
    ///
    /// Fails with [`BridgeError::MediaLoopUnavailable`] when the media loop
    /// is not running.
    ///
    /// [`BridgeError::MediaLoopUnavailable`]: crate::error::BridgeError::MediaLoopUnavailable
    pub fn new<W, F>(
        name: &str,
        media: Arc<dyn TaskScheduler>,
        app_loop: Arc<dyn TaskScheduler>,
        make_worker: F,
    ) -> BridgeResult<Self>
    where
        W: PipelineWorker + 'static,
        F: FnOnce() -> W + Send + 'static,
    {
        info!("Creating session '{name}' …");

        let inbox = EventInbox::new(app_loop);
        let commands = Arc::new(Mailbox::new("commands", media.clone()));
        let taps = Arc::new(OutputTaps::default());
        let slot: ActorSlot = Arc::new(Mutex::new(None));
        commands.set_drain_task(command_drain_task(&slot, &commands));

        let (ready_tx, ready_rx) = oneshot::channel();
        let actor_name = name.to_owned();
        let actor_slot = slot.clone();
        let actor_commands = commands.clone();
        let actor_inbox = inbox.clone();
        let actor_taps = taps.clone();
        media.schedule(Box::new(move || {
            let mut worker = make_worker();
            worker.set_event_sink(event_sink(&actor_slot));
            let ingress = worker.ingress();
            let actor = SessionActor::new(
                actor_name,
                worker,
                actor_commands,
                actor_inbox,
                actor_taps,
            );
            *actor_slot.lock().expect("actor slot mutex poisoned") = Some(Box::new(actor));
            ready_tx.send(ingress).ok();
        }))?;
        let ingress = ready_rx.blocking_recv()?;

        info!("Session '{name}' created.");
        Ok(SessionApi {
            name: name.to_owned(),
            commands,
            inbox,
            taps,
            slot,
            ingress,
            media,
        })
    }

    #[instrument(skip(self, devices, codecs), fields(session = %self.name))]
    pub fn start(&self, devices: DeviceConfig, codecs: CodecConfig) {
        self.commands.post(Command::Start {
            devices: Box::new(devices),
            codecs: Box::new(codecs),
        });
    }

    /// Requests a stop. The stop is terminal for the command stream: once
    /// the worker acknowledges it, commands posted afterwards stay queued
    /// until the session is dropped, where they are discarded.
    #[instrument(skip(self), fields(session = %self.name))]
    pub fn stop(&self) {
        self.commands.post(Command::Stop);
    }

    #[instrument(skip(self, devices), fields(session = %self.name))]
    pub fn update_devices(&self, devices: DeviceConfig) {
        self.commands.post(Command::UpdateDevices(Box::new(devices)));
    }

    #[instrument(skip(self, codecs), fields(session = %self.name))]
    pub fn update_codecs(&self, codecs: CodecConfig) {
        self.commands.post(Command::UpdateCodecs(Box::new(codecs)));
    }

    #[instrument(skip(self), fields(session = %self.name))]
    pub fn set_transmit(&self, transmit: TransmitParams) {
        self.commands.post(Command::Transmit(transmit));
    }

    #[instrument(skip(self), fields(session = %self.name))]
    pub fn set_record(&self, enabled: bool) {
        self.commands.post(Command::Record { enabled });
    }

    /// Forwards an inbound RTP audio packet straight to the worker, from the
    /// calling thread. Not mailboxed, unordered with respect to commands.
    pub fn rtp_audio_in(&self, packet: RtpPacket) {
        self.ingress.rtp_audio_in(packet);
    }

    pub fn rtp_video_in(&self, packet: RtpPacket) {
        self.ingress.rtp_video_in(packet);
    }

    pub fn on_preview_frame(&self, handler: impl FnMut(VideoFrame) + Send + 'static) {
        self.inbox.handlers().preview_frame = Some(Box::new(handler));
    }

    pub fn on_output_frame(&self, handler: impl FnMut(VideoFrame) + Send + 'static) {
        self.inbox.handlers().output_frame = Some(Box::new(handler));
    }

    pub fn on_audio_intensity(&self, handler: impl FnMut(i32) + Send + 'static) {
        self.inbox.handlers().audio_intensity = Some(Box::new(handler));
    }

    pub fn on_status(&self, handler: impl FnMut(SessionStatus) + Send + 'static) {
        self.inbox.handlers().status = Some(Box::new(handler));
    }

    /// Registers the outbound RTP audio tap, invoked directly on the media
    /// thread for every packet the worker produces.
    pub fn set_rtp_audio_out(&self, tap: impl Fn(&RtpPacket) + Send + Sync + 'static) {
        self.taps.set_rtp_audio(Arc::new(tap));
    }

    pub fn set_rtp_video_out(&self, tap: impl Fn(&RtpPacket) + Send + Sync + 'static) {
        self.taps.set_rtp_video(Arc::new(tap));
    }

    pub fn set_record_data(&self, tap: impl Fn(&[u8]) + Send + Sync + 'static) {
        self.taps.set_record(Arc::new(tap));
    }
}

impl Drop for SessionApi {
    fn drop(&mut self) {
        info!("Destroying session '{}' …", self.name);

        let (done_tx, done_rx) = oneshot::channel();
        let slot = self.slot.clone();
        let teardown = self.media.schedule(Box::new(move || {
            slot.lock().expect("actor slot mutex poisoned").take();
            done_tx.send(()).ok();
        }));
        match teardown {
            Ok(_) => {
                done_rx.blocking_recv().ok();
            }
            Err(_) => debug!(
                "media loop of session '{}' already gone, skipping actor teardown",
                self.name
            ),
        }

        self.inbox.retire();
        info!("Session '{}' destroyed.", self.name);
    }
}
