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

//! A worker without a real media pipeline behind it, for demos and manual
//! testing. Lifecycle commands are acknowledged by deferring the matching
//! event onto the media loop, inbound RTP is echoed back out through the
//! sink, and while started the worker synthesizes audio-intensity and
//! preview-frame ticks.

use crate::{
    formats::{AudioParams, PayloadInfo, RtpPacket, VideoFrame, VideoParams},
    media_loop::TaskScheduler,
    worker::{PipelineWorker, RtpIngress, WorkerEvent, WorkerEventSink, WorkerStatus},
};
use rand::Rng;
use rtp_rs::RtpReader;
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::time;
use tracing::{debug, info, warn};

const TICK_INTERVAL: Duration = Duration::from_millis(100);
/// Ticks of simulated file playback before `finished` fires.
const FILE_PLAYBACK_TICKS: u32 = 50;

struct LoopbackShared {
    scheduler: Arc<dyn TaskScheduler>,
    sink: Mutex<Option<WorkerEventSink>>,
    running: AtomicBool,
    recording: AtomicBool,
}

impl LoopbackShared {
    fn sink(&self) -> Option<WorkerEventSink> {
        self.sink.lock().expect("sink mutex poisoned").clone()
    }

    /// Defers an event onto the media loop so it is never delivered from
    /// inside a bridge-initiated worker call or from a foreign thread.
    fn defer(self: &Arc<Self>, event: WorkerEvent) {
        let shared = self.clone();
        let result = self.scheduler.schedule(Box::new(move || {
            if let Some(sink) = shared.sink() {
                sink.deliver(event);
            }
        }));
        if let Err(e) = result {
            debug!("dropping worker event, loop is gone: {e}");
        }
    }
}

pub struct LoopbackWorker {
    shared: Arc<LoopbackShared>,
    status: WorkerStatus,
    audio_out: String,
    audio_in: String,
    video_in: String,
    file_in: String,
    loop_file: bool,
    output_volume: i32,
    input_volume: i32,
}

impl LoopbackWorker {
    /// The scheduler must be the media loop the worker will live on, and it
    /// must be backed by a tokio runtime ([`MediaLoop`] is): the tick task
    /// uses the loop's timer.
    ///
    /// [`MediaLoop`]: crate::media_loop::MediaLoop
    pub fn new(scheduler: Arc<dyn TaskScheduler>) -> Self {
        Self {
            shared: Arc::new(LoopbackShared {
                scheduler,
                sink: Mutex::new(None),
                running: AtomicBool::new(false),
                recording: AtomicBool::new(false),
            }),
            status: WorkerStatus::default(),
            audio_out: String::new(),
            audio_in: String::new(),
            video_in: String::new(),
            file_in: String::new(),
            loop_file: false,
            output_volume: 100,
            input_volume: 100,
        }
    }

    fn spawn_ticker(&self) {
        let shared = self.shared.clone();
        let finite_file = !self.file_in.is_empty() && !self.loop_file;
        tokio::spawn(async move {
            let mut ticker = time::interval(TICK_INTERVAL);
            let mut tick = 0u32;
            loop {
                ticker.tick().await;
                if !shared.running.load(Ordering::Acquire) {
                    break;
                }
                let Some(sink) = shared.sink() else {
                    break;
                };
                sink.deliver(WorkerEvent::AudioIntensity(
                    rand::rng().random_range(0..=100),
                ));
                if tick % 2 == 0 {
                    sink.deliver(WorkerEvent::PreviewFrame(synth_frame(tick)));
                }
                if shared.recording.load(Ordering::Acquire) {
                    sink.deliver(WorkerEvent::RecordData(vec![0u8; 320]));
                }
                tick += 1;
                if finite_file && tick >= FILE_PLAYBACK_TICKS {
                    shared.running.store(false, Ordering::Release);
                    sink.deliver(WorkerEvent::Finished);
                    break;
                }
            }
        });
    }
}

impl PipelineWorker for LoopbackWorker {
    fn set_audio_out(&mut self, id: &str) {
        self.audio_out = id.to_owned();
    }

    fn set_audio_in(&mut self, id: &str) {
        self.audio_in = id.to_owned();
    }

    fn set_video_in(&mut self, id: &str) {
        self.video_in = id.to_owned();
    }

    fn set_file_in(&mut self, name: &str) {
        self.file_in = name.to_owned();
    }

    fn set_file_data_in(&mut self, data: &[u8]) {
        if !data.is_empty() {
            self.file_in = format!("<{} bytes in memory>", data.len());
        }
    }

    fn set_loop_file(&mut self, looped: bool) {
        self.loop_file = looped;
    }

    fn set_output_volume(&mut self, volume: i32) {
        self.output_volume = volume;
    }

    fn set_input_volume(&mut self, volume: i32) {
        self.input_volume = volume;
    }

    fn set_local_audio_params(&mut self, params: &AudioParams) {
        self.status.local_audio_params = params.clone();
    }

    fn set_local_video_params(&mut self, params: &VideoParams) {
        self.status.local_video_params = params.clone();
    }

    fn set_local_audio_payload_info(&mut self, info: &[PayloadInfo]) {
        self.status.local_audio_payload_info = info.to_vec();
    }

    fn set_local_video_payload_info(&mut self, info: &[PayloadInfo]) {
        self.status.local_video_payload_info = info.to_vec();
    }

    fn set_remote_audio_payload_info(&mut self, info: &[PayloadInfo]) {
        self.status.remote_audio_payload_info = info.to_vec();
    }

    fn set_remote_video_payload_info(&mut self, info: &[PayloadInfo]) {
        self.status.remote_video_payload_info = info.to_vec();
    }

    fn set_event_sink(&mut self, sink: WorkerEventSink) {
        *self.shared.sink.lock().expect("sink mutex poisoned") = Some(sink);
    }

    fn start(&mut self) {
        info!(
            "Loopback worker starting: out '{}' at {}%, in '{}' at {}%, video '{}', file '{}'",
            self.audio_out,
            self.output_volume,
            self.audio_in,
            self.input_volume,
            self.video_in,
            self.file_in
        );
        self.shared.running.store(true, Ordering::Release);
        self.spawn_ticker();
        self.shared.defer(WorkerEvent::Started);
    }

    fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.defer(WorkerEvent::Stopped);
    }

    fn update(&mut self) {
        self.shared.defer(WorkerEvent::Updated);
    }

    fn transmit_audio(&mut self, index: i32) {
        debug!("transmitting audio with payload index {index}");
        self.status.can_transmit_audio = true;
    }

    fn pause_audio(&mut self) {
        self.status.can_transmit_audio = false;
    }

    fn transmit_video(&mut self, index: i32) {
        debug!("transmitting video with payload index {index}");
        self.status.can_transmit_video = true;
    }

    fn pause_video(&mut self) {
        self.status.can_transmit_video = false;
    }

    fn record_start(&mut self) {
        self.shared.recording.store(true, Ordering::Release);
    }

    fn record_stop(&mut self) {
        self.shared.recording.store(false, Ordering::Release);
    }

    fn snapshot(&self) -> WorkerStatus {
        self.status.clone()
    }

    fn error_code(&self) -> i32 {
        0
    }

    fn ingress(&self) -> Arc<dyn RtpIngress> {
        Arc::new(LoopbackIngress {
            shared: self.shared.clone(),
        })
    }
}

impl Drop for LoopbackWorker {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
    }
}

struct LoopbackIngress {
    shared: Arc<LoopbackShared>,
}

impl LoopbackIngress {
    fn echo(&self, packet: RtpPacket, event: fn(RtpPacket) -> WorkerEvent) {
        match RtpReader::new(packet.bytes()) {
            Ok(rtp) => debug!(
                "echoing rtp packet, seq {}",
                u16::from(rtp.sequence_number())
            ),
            Err(e) => {
                warn!("received malformed rtp packet: {e:?}");
                return;
            }
        }
        if self.shared.running.load(Ordering::Acquire) {
            self.shared.defer(event(packet));
        }
    }
}

impl RtpIngress for LoopbackIngress {
    fn rtp_audio_in(&self, packet: RtpPacket) {
        self.echo(packet, WorkerEvent::RtpAudioOut);
    }

    fn rtp_video_in(&self, packet: RtpPacket) {
        self.echo(packet, WorkerEvent::RtpVideoOut);
    }
}

fn synth_frame(tick: u32) -> VideoFrame {
    let side = 16u32;
    let mut data = Vec::with_capacity((side * side * 4) as usize);
    for y in 0..side {
        for x in 0..side {
            data.push((x * 16) as u8);
            data.push((y * 16) as u8);
            data.push((tick % 256) as u8);
            data.push(0xff);
        }
    }
    VideoFrame::new(side, side, data)
}
