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

//! Test support: a manually pumped scheduler for deterministic drains and a
//! worker that records every call and fires events on demand.

use crate::{
    error::BridgeResult,
    formats::{AudioParams, PayloadInfo, RtpPacket, VideoParams},
    media_loop::{ScheduledTask, Task, TaskScheduler},
    worker::{PipelineWorker, RtpIngress, WorkerEvent, WorkerEventSink, WorkerStatus},
};
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, mpsc},
};

/// Scheduler whose tasks run only when the test pumps it, on the test's own
/// thread. Stands in for the app loop.
pub(crate) struct TestLoop {
    queue: Mutex<VecDeque<(ScheduledTask, Task)>>,
}

impl TestLoop {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
        })
    }

    /// Runs queued tasks, including ones they schedule, until none are left.
    pub(crate) fn pump(&self) {
        loop {
            let entry = self
                .queue
                .lock()
                .expect("test loop mutex poisoned")
                .pop_front();
            let Some((guard, task)) = entry else {
                break;
            };
            if !guard.is_cancelled() {
                task();
            }
        }
    }

    pub(crate) fn pending(&self) -> usize {
        self.queue.lock().expect("test loop mutex poisoned").len()
    }
}

impl TaskScheduler for TestLoop {
    fn schedule(&self, task: Task) -> BridgeResult<ScheduledTask> {
        let guard = ScheduledTask::new();
        self.queue
            .lock()
            .expect("test loop mutex poisoned")
            .push_back((guard.clone(), task));
        Ok(guard)
    }
}

/// Blocks until every task scheduled on `scheduler` before this call has run.
pub(crate) fn barrier(scheduler: &dyn TaskScheduler) {
    let (tx, rx) = mpsc::channel();
    scheduler
        .schedule(Box::new(move || {
            tx.send(()).ok();
        }))
        .expect("scheduler is gone");
    rx.recv().expect("barrier task was dropped");
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum WorkerCall {
    AudioOut(String),
    AudioIn(String),
    VideoIn(String),
    FileIn(String),
    FileData(Vec<u8>),
    LoopFile(bool),
    OutputVolume(i32),
    InputVolume(i32),
    LocalAudioParams(AudioParams),
    LocalVideoParams(VideoParams),
    LocalAudioPayloadInfo(Vec<PayloadInfo>),
    LocalVideoPayloadInfo(Vec<PayloadInfo>),
    RemoteAudioPayloadInfo(Vec<PayloadInfo>),
    RemoteVideoPayloadInfo(Vec<PayloadInfo>),
    Start,
    Stop,
    Update,
    TransmitAudio(i32),
    PauseAudio,
    TransmitVideo(i32),
    PauseVideo,
    RecordStart,
    RecordStop,
    RtpAudioIn(usize),
    RtpVideoIn(usize),
}

/// Test-side view of a [`FakeWorker`]: inspect recorded calls and fire
/// worker events. Clone it before handing the worker to the bridge.
#[derive(Clone, Default)]
pub(crate) struct FakeWorkerHandle {
    calls: Arc<Mutex<Vec<WorkerCall>>>,
    sink: Arc<Mutex<Option<WorkerEventSink>>>,
    status: Arc<Mutex<WorkerStatus>>,
    error_code: Arc<Mutex<i32>>,
}

impl FakeWorkerHandle {
    pub(crate) fn worker(&self) -> FakeWorker {
        FakeWorker {
            handle: self.clone(),
        }
    }

    pub(crate) fn calls(&self) -> Vec<WorkerCall> {
        self.calls.lock().expect("calls mutex poisoned").clone()
    }

    pub(crate) fn take_calls(&self) -> Vec<WorkerCall> {
        std::mem::take(&mut *self.calls.lock().expect("calls mutex poisoned"))
    }

    pub(crate) fn fire(&self, event: WorkerEvent) {
        let sink = self
            .sink
            .lock()
            .expect("sink mutex poisoned")
            .clone()
            .expect("no event sink registered");
        sink.deliver(event);
    }

    pub(crate) fn set_status(&self, status: WorkerStatus) {
        *self.status.lock().expect("status mutex poisoned") = status;
    }

    pub(crate) fn set_error_code(&self, code: i32) {
        *self.error_code.lock().expect("error code mutex poisoned") = code;
    }
}

pub(crate) struct FakeWorker {
    handle: FakeWorkerHandle,
}

impl FakeWorker {
    fn record(&self, call: WorkerCall) {
        self.handle
            .calls
            .lock()
            .expect("calls mutex poisoned")
            .push(call);
    }
}

impl PipelineWorker for FakeWorker {
    fn set_audio_out(&mut self, id: &str) {
        self.record(WorkerCall::AudioOut(id.to_owned()));
    }

    fn set_audio_in(&mut self, id: &str) {
        self.record(WorkerCall::AudioIn(id.to_owned()));
    }

    fn set_video_in(&mut self, id: &str) {
        self.record(WorkerCall::VideoIn(id.to_owned()));
    }

    fn set_file_in(&mut self, name: &str) {
        self.record(WorkerCall::FileIn(name.to_owned()));
    }

    fn set_file_data_in(&mut self, data: &[u8]) {
        self.record(WorkerCall::FileData(data.to_vec()));
    }

    fn set_loop_file(&mut self, looped: bool) {
        self.record(WorkerCall::LoopFile(looped));
    }

    fn set_output_volume(&mut self, volume: i32) {
        self.record(WorkerCall::OutputVolume(volume));
    }

    fn set_input_volume(&mut self, volume: i32) {
        self.record(WorkerCall::InputVolume(volume));
    }

    fn set_local_audio_params(&mut self, params: &AudioParams) {
        self.record(WorkerCall::LocalAudioParams(params.clone()));
    }

    fn set_local_video_params(&mut self, params: &VideoParams) {
        self.record(WorkerCall::LocalVideoParams(params.clone()));
    }

    fn set_local_audio_payload_info(&mut self, info: &[PayloadInfo]) {
        self.record(WorkerCall::LocalAudioPayloadInfo(info.to_vec()));
    }

    fn set_local_video_payload_info(&mut self, info: &[PayloadInfo]) {
        self.record(WorkerCall::LocalVideoPayloadInfo(info.to_vec()));
    }

    fn set_remote_audio_payload_info(&mut self, info: &[PayloadInfo]) {
        self.record(WorkerCall::RemoteAudioPayloadInfo(info.to_vec()));
    }

    fn set_remote_video_payload_info(&mut self, info: &[PayloadInfo]) {
        self.record(WorkerCall::RemoteVideoPayloadInfo(info.to_vec()));
    }

    fn set_event_sink(&mut self, sink: WorkerEventSink) {
        *self.handle.sink.lock().expect("sink mutex poisoned") = Some(sink);
    }

    fn start(&mut self) {
        self.record(WorkerCall::Start);
    }

    fn stop(&mut self) {
        self.record(WorkerCall::Stop);
    }

    fn update(&mut self) {
        self.record(WorkerCall::Update);
    }

    fn transmit_audio(&mut self, index: i32) {
        self.record(WorkerCall::TransmitAudio(index));
    }

    fn pause_audio(&mut self) {
        self.record(WorkerCall::PauseAudio);
    }

    fn transmit_video(&mut self, index: i32) {
        self.record(WorkerCall::TransmitVideo(index));
    }

    fn pause_video(&mut self) {
        self.record(WorkerCall::PauseVideo);
    }

    fn record_start(&mut self) {
        self.record(WorkerCall::RecordStart);
    }

    fn record_stop(&mut self) {
        self.record(WorkerCall::RecordStop);
    }

    fn snapshot(&self) -> WorkerStatus {
        self.handle.status.lock().expect("status mutex poisoned").clone()
    }

    fn error_code(&self) -> i32 {
        *self.handle.error_code.lock().expect("error code mutex poisoned")
    }

    fn ingress(&self) -> Arc<dyn RtpIngress> {
        Arc::new(FakeIngress {
            handle: self.handle.clone(),
        })
    }
}

struct FakeIngress {
    handle: FakeWorkerHandle,
}

impl RtpIngress for FakeIngress {
    fn rtp_audio_in(&self, packet: RtpPacket) {
        self.handle
            .calls
            .lock()
            .expect("calls mutex poisoned")
            .push(WorkerCall::RtpAudioIn(packet.bytes().len()));
    }

    fn rtp_video_in(&self, packet: RtpPacket) {
        self.handle
            .calls
            .lock()
            .expect("calls mutex poisoned")
            .push(WorkerCall::RtpVideoIn(packet.bytes().len()));
    }
}
