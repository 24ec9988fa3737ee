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

//! The consumed side of the bridge: the media pipeline worker. The bridge
//! does not implement capture, codecs or RTP transport; it drives a
//! [`PipelineWorker`] living on the media loop and listens to the events the
//! worker pushes back through its [`WorkerEventSink`].

pub mod loopback;

use crate::formats::{AudioParams, PayloadInfo, RtpPacket, VideoFrame, VideoParams};
use std::{fmt, sync::Arc};

/// Snapshot of the worker's negotiated media state, captured after a
/// lifecycle event. Lifecycle flags live in
/// [`SessionStatus`](crate::message::SessionStatus), not here.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorkerStatus {
    pub local_audio_params: AudioParams,
    pub local_video_params: VideoParams,
    pub local_audio_payload_info: Vec<PayloadInfo>,
    pub local_video_payload_info: Vec<PayloadInfo>,
    pub remote_audio_payload_info: Vec<PayloadInfo>,
    pub remote_video_payload_info: Vec<PayloadInfo>,
    pub can_transmit_audio: bool,
    pub can_transmit_video: bool,
}

#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Started,
    Updated,
    Stopped,
    Finished,
    Error,
    AudioIntensity(i32),
    PreviewFrame(VideoFrame),
    OutputFrame(VideoFrame),
    RtpAudioOut(RtpPacket),
    RtpVideoOut(RtpPacket),
    RecordData(Vec<u8>),
}

type EventFn = Arc<dyn Fn(WorkerEvent) + Send + Sync>;

/// The capability through which a worker reaches back into the bridge.
///
/// Events must be delivered from the media loop thread and never from inside
/// a bridge-initiated worker call; workers that complete operations
/// synchronously defer the event by scheduling a task on their loop.
#[derive(Clone)]
pub struct WorkerEventSink {
    deliver: EventFn,
}

impl WorkerEventSink {
    pub(crate) fn new(deliver: EventFn) -> Self {
        Self { deliver }
    }

    pub fn deliver(&self, event: WorkerEvent) {
        (self.deliver)(event);
    }

    pub fn started(&self) {
        self.deliver(WorkerEvent::Started);
    }

    pub fn updated(&self) {
        self.deliver(WorkerEvent::Updated);
    }

    pub fn stopped(&self) {
        self.deliver(WorkerEvent::Stopped);
    }

    pub fn finished(&self) {
        self.deliver(WorkerEvent::Finished);
    }

    pub fn error(&self) {
        self.deliver(WorkerEvent::Error);
    }
}

impl fmt::Debug for WorkerEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WorkerEventSink")
    }
}

/// Thread-safe RTP ingress into the worker.
///
/// This is the only part of the worker the bridge touches off the media
/// loop: inbound packets are forwarded straight from the caller's thread,
/// unordered with respect to commands.
pub trait RtpIngress: Send + Sync {
    fn rtp_audio_in(&self, packet: RtpPacket);
    fn rtp_video_in(&self, packet: RtpPacket);
}

/// A media pipeline worker confined to the media loop.
///
/// All methods are invoked on the media loop thread. `start`, `stop` and
/// `update` are asynchronous: the worker acknowledges them later through its
/// sink (`started`, `updated`, `stopped`, `finished` or `error`), and the
/// bridge keeps the command pipeline suspended until it does. The remaining
/// methods take effect immediately.
pub trait PipelineWorker: Send {
    fn set_audio_out(&mut self, id: &str);
    fn set_audio_in(&mut self, id: &str);
    fn set_video_in(&mut self, id: &str);
    fn set_file_in(&mut self, name: &str);
    fn set_file_data_in(&mut self, data: &[u8]);
    fn set_loop_file(&mut self, looped: bool);
    fn set_output_volume(&mut self, volume: i32);
    fn set_input_volume(&mut self, volume: i32);

    fn set_local_audio_params(&mut self, params: &AudioParams);
    fn set_local_video_params(&mut self, params: &VideoParams);
    fn set_local_audio_payload_info(&mut self, info: &[PayloadInfo]);
    fn set_local_video_payload_info(&mut self, info: &[PayloadInfo]);
    fn set_remote_audio_payload_info(&mut self, info: &[PayloadInfo]);
    fn set_remote_video_payload_info(&mut self, info: &[PayloadInfo]);

    fn set_event_sink(&mut self, sink: WorkerEventSink);

    fn start(&mut self);
    fn stop(&mut self);
    fn update(&mut self);
    fn transmit_audio(&mut self, index: i32);
    fn pause_audio(&mut self);
    fn transmit_video(&mut self, index: i32);
    fn pause_video(&mut self);
    fn record_start(&mut self);
    fn record_stop(&mut self);

    fn snapshot(&self) -> WorkerStatus;
    fn error_code(&self) -> i32;

    /// Hands out the worker's thread-safe RTP entry points.
    fn ingress(&self) -> Arc<dyn RtpIngress>;
}
