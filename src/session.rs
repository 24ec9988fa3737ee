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

//! The media-loop side of the bridge. [`SessionActor`] owns the worker,
//! translates commands into worker calls and worker events into outbound
//! messages, and serializes commands through a suspend/resume state machine:
//! a command that triggers an asynchronous worker operation suspends the
//! command mailbox until the worker acknowledges through its event sink.

pub mod api;
pub mod config;

pub use api::SessionApi;

use crate::{
    formats::{FrameKind, RtpPacket},
    mailbox::{DrainTask, Mailbox},
    message::{Command, Event, SessionStatus},
    session::{
        api::EventInbox,
        config::{CodecConfig, DeviceConfig},
    },
    worker::{PipelineWorker, WorkerEvent, WorkerEventSink},
};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

pub(crate) type RtpTap = Arc<dyn Fn(&RtpPacket) + Send + Sync>;
pub(crate) type RecordTap = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Raw outbound taps. The actor invokes these directly on the media thread,
/// without marshalling; registering one opts into that concurrency contract.
#[derive(Default)]
pub(crate) struct OutputTaps {
    rtp_audio: Mutex<Option<RtpTap>>,
    rtp_video: Mutex<Option<RtpTap>>,
    record: Mutex<Option<RecordTap>>,
}

impl OutputTaps {
    pub(crate) fn set_rtp_audio(&self, tap: RtpTap) {
        *self.rtp_audio.lock().expect("taps mutex poisoned") = Some(tap);
    }

    pub(crate) fn set_rtp_video(&self, tap: RtpTap) {
        *self.rtp_video.lock().expect("taps mutex poisoned") = Some(tap);
    }

    pub(crate) fn set_record(&self, tap: RecordTap) {
        *self.record.lock().expect("taps mutex poisoned") = Some(tap);
    }

    fn rtp_audio(&self) -> Option<RtpTap> {
        self.rtp_audio.lock().expect("taps mutex poisoned").clone()
    }

    fn rtp_video(&self) -> Option<RtpTap> {
        self.rtp_video.lock().expect("taps mutex poisoned").clone()
    }

    fn record(&self) -> Option<RecordTap> {
        self.record.lock().expect("taps mutex poisoned").clone()
    }
}

pub(crate) enum Disposition {
    Continue,
    Suspend,
}

/// Type-erased actor entry points, so the api handle and the drain task do
/// not carry the worker type around.
pub(crate) trait ActorCell: Send {
    fn process(&mut self, command: Command) -> Disposition;
    fn worker_event(&mut self, event: WorkerEvent);
}

/// The actor lives here between media-loop tasks. Only media-loop tasks lock
/// the slot; the api handle keeps it alive and empties it on teardown.
pub(crate) type ActorSlot = Arc<Mutex<Option<Box<dyn ActorCell>>>>;

pub(crate) struct SessionActor<W: PipelineWorker> {
    name: String,
    worker: W,
    commands: Arc<Mailbox<Command>>,
    events: Arc<EventInbox>,
    taps: Arc<OutputTaps>,
    pending_status: bool,
}

impl<W: PipelineWorker> SessionActor<W> {
    pub(crate) fn new(
        name: String,
        worker: W,
        commands: Arc<Mailbox<Command>>,
        events: Arc<EventInbox>,
        taps: Arc<OutputTaps>,
    ) -> Self {
        info!("Session actor '{name}' started.");
        Self {
            name,
            worker,
            commands,
            events,
            taps,
            pending_status: false,
        }
    }

    fn apply_devices(&mut self, devices: &DeviceConfig) {
        let worker = &mut self.worker;
        worker.set_audio_out(&devices.audio_out_id);
        worker.set_audio_in(&devices.audio_in_id);
        worker.set_video_in(&devices.video_in_id);
        worker.set_file_in(&devices.file_name_in);
        worker.set_file_data_in(&devices.file_data_in);
        worker.set_loop_file(devices.loop_file);
        worker.set_output_volume(devices.audio_out_volume);
        worker.set_input_volume(devices.audio_in_volume);
    }

    fn apply_codecs(&mut self, codecs: &CodecConfig) {
        let worker = &mut self.worker;
        if let Some(params) = &codecs.local_audio_params {
            worker.set_local_audio_params(params);
        }
        if let Some(params) = &codecs.local_video_params {
            worker.set_local_video_params(params);
        }
        if let Some(info) = &codecs.local_audio_payload_info {
            worker.set_local_audio_payload_info(info);
        }
        if let Some(info) = &codecs.local_video_payload_info {
            worker.set_local_video_payload_info(info);
        }
        if let Some(info) = &codecs.remote_audio_payload_info {
            worker.set_remote_audio_payload_info(info);
        }
        if let Some(info) = &codecs.remote_video_payload_info {
            worker.set_remote_video_payload_info(info);
        }
    }

    fn post_status(&self, stopped: bool, finished: bool, error: bool) {
        let status = SessionStatus {
            worker: self.worker.snapshot(),
            stopped,
            finished,
            error,
            error_code: if error { self.worker.error_code() } else { 0 },
        };
        self.events.post(Event::Status(status));
    }
}

impl<W: PipelineWorker> ActorCell for SessionActor<W> {
    fn process(&mut self, command: Command) -> Disposition {
        debug!("Session actor '{}' processing {command:?}", self.name);
        match command {
            Command::Start { devices, codecs } => {
                self.apply_devices(&devices);
                self.apply_codecs(&codecs);
                self.pending_status = true;
                self.worker.start();
                Disposition::Suspend
            }
            Command::Stop => {
                self.pending_status = true;
                self.worker.stop();
                Disposition::Suspend
            }
            Command::UpdateDevices(devices) => {
                // Device-only changes are transparent to status observers:
                // no pending_status, so the coming `updated` stays silent.
                self.apply_devices(&devices);
                self.worker.update();
                Disposition::Suspend
            }
            Command::UpdateCodecs(codecs) => {
                self.apply_codecs(&codecs);
                self.pending_status = true;
                self.worker.update();
                Disposition::Suspend
            }
            Command::Transmit(transmit) => {
                if transmit.use_audio {
                    self.worker.transmit_audio(transmit.audio_index);
                } else {
                    self.worker.pause_audio();
                }
                if transmit.use_video {
                    self.worker.transmit_video(transmit.video_index);
                } else {
                    self.worker.pause_video();
                }
                Disposition::Continue
            }
            Command::Record { enabled } => {
                if enabled {
                    self.worker.record_start();
                } else {
                    self.worker.record_stop();
                }
                Disposition::Continue
            }
        }
    }

    fn worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Started => {
                self.pending_status = false;
                self.post_status(false, false, false);
                self.commands.resume();
            }
            WorkerEvent::Updated => {
                if self.pending_status {
                    self.pending_status = false;
                    self.post_status(false, false, false);
                }
                self.commands.resume();
            }
            WorkerEvent::Stopped => {
                // Terminal: the command stream stays suspended until the
                // session is torn down.
                self.pending_status = false;
                self.post_status(true, false, false);
            }
            WorkerEvent::Finished => {
                self.post_status(false, true, false);
            }
            WorkerEvent::Error => {
                warn!(
                    "Session actor '{}' got worker error {}",
                    self.name,
                    self.worker.error_code()
                );
                self.post_status(false, false, true);
                self.commands.resume();
            }
            WorkerEvent::AudioIntensity(value) => {
                self.events.post(Event::AudioIntensity(value));
            }
            WorkerEvent::PreviewFrame(frame) => {
                self.events.post(Event::Frame {
                    kind: FrameKind::Preview,
                    frame,
                });
            }
            WorkerEvent::OutputFrame(frame) => {
                self.events.post(Event::Frame {
                    kind: FrameKind::Output,
                    frame,
                });
            }
            WorkerEvent::RtpAudioOut(packet) => {
                if let Some(tap) = self.taps.rtp_audio() {
                    tap(&packet);
                }
            }
            WorkerEvent::RtpVideoOut(packet) => {
                if let Some(tap) = self.taps.rtp_video() {
                    tap(&packet);
                }
            }
            WorkerEvent::RecordData(data) => {
                if let Some(tap) = self.taps.record() {
                    tap(&data);
                }
            }
        }
    }
}

impl<W: PipelineWorker> Drop for SessionActor<W> {
    fn drop(&mut self) {
        info!("Session actor '{}' stopped.", self.name);
    }
}

/// One command at a time: the mailbox lock is taken per dequeue and never
/// held across a worker call. A suspending command parks the mailbox and the
/// loop ends; a worker event resumes it later.
fn drain_commands(slot: &ActorSlot, commands: &Mailbox<Command>) {
    if !commands.begin_drain() {
        return;
    }
    loop {
        let Some(command) = commands.pop() else {
            return;
        };
        let disposition = {
            let mut cell = slot.lock().expect("actor slot mutex poisoned");
            let Some(actor) = cell.as_mut() else {
                return;
            };
            actor.process(command)
        };
        if matches!(disposition, Disposition::Suspend) {
            commands.suspend();
            return;
        }
    }
}

pub(crate) fn command_drain_task(slot: &ActorSlot, commands: &Arc<Mailbox<Command>>) -> DrainTask {
    let slot = Arc::downgrade(slot);
    let commands = Arc::downgrade(commands);
    Arc::new(move || {
        let (Some(slot), Some(commands)) = (slot.upgrade(), commands.upgrade()) else {
            return;
        };
        drain_commands(&slot, &commands);
    })
}

/// Builds the sink handed to the worker. Events for a torn-down actor are
/// silently dropped.
pub(crate) fn event_sink(slot: &ActorSlot) -> WorkerEventSink {
    let slot = Arc::downgrade(slot);
    WorkerEventSink::new(Arc::new(move |event| {
        let Some(slot) = slot.upgrade() else {
            return;
        };
        let mut cell = slot.lock().expect("actor slot mutex poisoned");
        if let Some(actor) = cell.as_mut() {
            actor.worker_event(event);
        }
    }))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        formats::AudioParams,
        media_loop::MediaLoop,
        session::config::TransmitParams,
        testkit::{FakeWorkerHandle, TestLoop, WorkerCall, barrier},
        worker::WorkerStatus,
    };

    fn bridge(handle: &FakeWorkerHandle) -> (MediaLoop, Arc<TestLoop>, SessionApi) {
        let media_loop = MediaLoop::start("media-test").expect("media loop did not start");
        let app_loop = TestLoop::new();
        let worker_handle = handle.clone();
        let api = SessionApi::new(
            "test",
            Arc::new(media_loop.handle()),
            app_loop.clone(),
            move || worker_handle.worker(),
        )
        .expect("session construction failed");
        (media_loop, app_loop, api)
    }

    fn status_log(api: &SessionApi) -> Arc<Mutex<Vec<SessionStatus>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let seen = log.clone();
        api.on_status(move |status| {
            seen.lock().expect("status log mutex poisoned").push(status);
        });
        log
    }

    #[test]
    fn start_applies_config_suspends_and_reports_one_status() {
        let handle = FakeWorkerHandle::default();
        let (media_loop, app_loop, api) = bridge(&handle);
        let statuses = status_log(&api);

        let devices = DeviceConfig {
            audio_out_id: "spk1".to_owned(),
            audio_in_id: "mic1".to_owned(),
            video_in_id: "cam1".to_owned(),
            audio_out_volume: 80,
            audio_in_volume: 70,
            ..Default::default()
        };
        let params = AudioParams {
            codec: "opus".to_owned(),
            sample_rate: 48_000,
            sample_size: 16,
            channels: 2,
        };
        let codecs = CodecConfig {
            local_audio_params: Some(params.clone()),
            ..Default::default()
        };

        api.start(devices, codecs);
        barrier(&media_loop.handle());
        assert_eq!(
            handle.take_calls(),
            vec![
                WorkerCall::AudioOut("spk1".to_owned()),
                WorkerCall::AudioIn("mic1".to_owned()),
                WorkerCall::VideoIn("cam1".to_owned()),
                WorkerCall::FileIn(String::new()),
                WorkerCall::FileData(Vec::new()),
                WorkerCall::LoopFile(false),
                WorkerCall::OutputVolume(80),
                WorkerCall::InputVolume(70),
                WorkerCall::LocalAudioParams(params),
                WorkerCall::Start,
            ]
        );

        // Suspended: the next command waits for the worker to acknowledge.
        api.set_record(true);
        barrier(&media_loop.handle());
        assert_eq!(handle.calls(), Vec::new());

        let worker_status = WorkerStatus {
            can_transmit_audio: true,
            ..Default::default()
        };
        handle.set_status(worker_status.clone());
        handle.fire(WorkerEvent::Started);
        barrier(&media_loop.handle());
        assert_eq!(handle.take_calls(), vec![WorkerCall::RecordStart]);

        app_loop.pump();
        let statuses = statuses.lock().expect("status log mutex poisoned");
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].worker, worker_status);
        assert!(!statuses[0].stopped && !statuses[0].finished && !statuses[0].error);

        drop(api);
        media_loop.shutdown();
    }

    #[test]
    fn commands_queue_across_suspensions_in_order() {
        let handle = FakeWorkerHandle::default();
        let (media_loop, _app_loop, api) = bridge(&handle);

        api.start(DeviceConfig::default(), CodecConfig::default());
        api.update_devices(DeviceConfig::default());
        api.set_transmit(TransmitParams {
            use_audio: true,
            audio_index: 2,
            use_video: false,
            video_index: 0,
        });

        barrier(&media_loop.handle());
        let calls = handle.take_calls();
        assert_eq!(calls.last(), Some(&WorkerCall::Start));
        assert!(!calls.contains(&WorkerCall::Update));

        handle.fire(WorkerEvent::Started);
        barrier(&media_loop.handle());
        let calls = handle.take_calls();
        assert_eq!(calls.last(), Some(&WorkerCall::Update));
        assert!(!calls.contains(&WorkerCall::TransmitAudio(2)));

        handle.fire(WorkerEvent::Updated);
        barrier(&media_loop.handle());
        assert_eq!(
            handle.take_calls(),
            vec![WorkerCall::TransmitAudio(2), WorkerCall::PauseVideo]
        );

        drop(api);
        media_loop.shutdown();
    }

    #[test]
    fn update_devices_is_silent_but_update_codecs_reports() {
        let handle = FakeWorkerHandle::default();
        let (media_loop, app_loop, api) = bridge(&handle);
        let statuses = status_log(&api);

        api.start(DeviceConfig::default(), CodecConfig::default());
        barrier(&media_loop.handle());
        handle.fire(WorkerEvent::Started);
        app_loop.pump();
        statuses.lock().expect("status log mutex poisoned").clear();

        api.update_devices(DeviceConfig::default());
        barrier(&media_loop.handle());
        handle.fire(WorkerEvent::Updated);
        barrier(&media_loop.handle());
        app_loop.pump();
        assert!(statuses.lock().expect("status log mutex poisoned").is_empty());

        api.update_codecs(CodecConfig {
            local_audio_params: Some(AudioParams::default()),
            ..Default::default()
        });
        barrier(&media_loop.handle());
        handle.fire(WorkerEvent::Updated);
        barrier(&media_loop.handle());
        app_loop.pump();
        assert_eq!(statuses.lock().expect("status log mutex poisoned").len(), 1);

        drop(api);
        media_loop.shutdown();
    }

    #[test]
    fn stop_is_terminal_for_the_command_stream() {
        let handle = FakeWorkerHandle::default();
        let (media_loop, app_loop, api) = bridge(&handle);
        let statuses = status_log(&api);

        api.start(DeviceConfig::default(), CodecConfig::default());
        barrier(&media_loop.handle());
        handle.fire(WorkerEvent::Started);

        api.stop();
        barrier(&media_loop.handle());
        assert!(handle.take_calls().contains(&WorkerCall::Stop));
        handle.fire(WorkerEvent::Stopped);

        // Not resumed: commands after the stop stay queued forever.
        api.set_record(true);
        barrier(&media_loop.handle());
        assert_eq!(handle.calls(), Vec::new());

        app_loop.pump();
        let statuses = statuses.lock().expect("status log mutex poisoned");
        assert_eq!(statuses.len(), 2);
        assert!(statuses[1].stopped);

        drop(api);
        media_loop.shutdown();
    }

    #[test]
    fn worker_error_reports_and_resumes() {
        let handle = FakeWorkerHandle::default();
        handle.set_error_code(7);
        let (media_loop, app_loop, api) = bridge(&handle);
        let statuses = status_log(&api);

        api.start(DeviceConfig::default(), CodecConfig::default());
        api.set_record(true);
        barrier(&media_loop.handle());
        assert!(!handle.take_calls().contains(&WorkerCall::RecordStart));

        handle.fire(WorkerEvent::Error);
        barrier(&media_loop.handle());
        assert_eq!(handle.take_calls(), vec![WorkerCall::RecordStart]);

        app_loop.pump();
        let statuses = statuses.lock().expect("status log mutex poisoned");
        assert_eq!(statuses.len(), 1);
        assert!(statuses[0].error);
        assert_eq!(statuses[0].error_code, 7);

        drop(api);
        media_loop.shutdown();
    }
}
