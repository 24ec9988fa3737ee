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

//! End-to-end demo: a session driving the loopback worker. Inbound RTP fed
//! through the session comes back out through the raw audio tap, and the
//! synthesized preview/intensity events arrive on the app loop.

use miette::Result;
use rtp_av_bridge::{
    config::Config,
    error::{BridgeError, WrappedRtpPacketBuildError},
    formats::RtpPacket,
    media_loop::{MediaLoop, TaskScheduler},
    session::{SessionApi, config::TransmitParams},
    telemetry,
    worker::loopback::LoopbackWorker,
};
use rand::Rng;
use rtp_rs::{RtpPacketBuilder, RtpReader, Seq};
use std::{sync::Arc, thread, time::Duration};
use tokio::runtime;
use tracing::{debug, info, warn};

fn main() -> Result<()> {
    let runtime = runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(BridgeError::from)?;
    let config = runtime.block_on(Config::load())?;
    telemetry::init(&config)?;

    info!(
        "Starting {} instance '{}'.",
        config.app.name, config.app.instance.name
    );

    let media_loop = if config.realtime_media_loop {
        MediaLoop::start_realtime("media-loop")?
    } else {
        MediaLoop::start("media-loop")?
    };
    // Stands in for the UI event loop a real application would drain on.
    let app_loop = MediaLoop::start("app-loop")?;

    let media: Arc<dyn TaskScheduler> = Arc::new(media_loop.handle());
    let worker_scheduler = media.clone();
    let session = SessionApi::new(
        &config.instance_name(),
        media,
        Arc::new(app_loop.handle()),
        move || LoopbackWorker::new(worker_scheduler),
    )?;

    session.on_status(|status| {
        info!(
            "status: transmit audio {}, video {}, stopped {}, finished {}, error {} ({})",
            status.worker.can_transmit_audio,
            status.worker.can_transmit_video,
            status.stopped,
            status.finished,
            status.error,
            status.error_code,
        );
    });
    session.on_audio_intensity(|value| debug!("audio intensity: {value}"));
    session.on_preview_frame(|frame| debug!("preview frame: {frame:?}"));
    session.on_output_frame(|frame| debug!("output frame: {frame:?}"));
    session.set_rtp_audio_out(|packet| match RtpReader::new(packet.bytes()) {
        Ok(rtp) => info!("rtp audio out: seq {}", u16::from(rtp.sequence_number())),
        Err(e) => warn!("worker produced malformed rtp packet: {e:?}"),
    });
    session.set_record_data(|data| debug!("record data: {} bytes", data.len()));

    session.start(config.devices.clone(), config.codecs.clone());
    session.set_transmit(TransmitParams {
        use_audio: true,
        audio_index: 0,
        use_video: true,
        video_index: 0,
    });
    thread::sleep(Duration::from_millis(500));

    info!("Feeding a burst of inbound RTP, expecting it back on the audio tap …");
    let mut seq: u16 = rand::rng().random();
    let mut rtp_buffer = [0u8; 1500];
    let payload = [0u8; 160];
    for i in 0..20u32 {
        let len = RtpPacketBuilder::new()
            .payload_type(97)
            .sequence(Seq::from(seq))
            .timestamp(i * 160)
            .payload(&payload)
            .build_into(&mut rtp_buffer)
            .map_err(WrappedRtpPacketBuildError)
            .map_err(BridgeError::from)?;
        session.rtp_audio_in(RtpPacket::new(rtp_buffer[..len].to_vec()));
        seq = seq.wrapping_add(1);
        thread::sleep(Duration::from_millis(20));
    }

    session.set_record(true);
    thread::sleep(Duration::from_millis(300));
    session.set_record(false);

    session.stop();
    thread::sleep(Duration::from_millis(300));

    drop(session);
    app_loop.shutdown();
    media_loop.shutdown();
    info!("Demo finished.");

    Ok(())
}
