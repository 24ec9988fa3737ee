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

use crate::{
    formats::{FrameKind, VideoFrame},
    mailbox::MailboxItem,
    session::config::{CodecConfig, DeviceConfig, TransmitParams},
    worker::WorkerStatus,
};
use std::collections::VecDeque;

/// Cap on queued video frames per kind in the event mailbox. When a frame of
/// a kind arrives while this many of the same kind are already queued, the
/// oldest one of that kind is evicted.
pub const FRAME_QUEUE_MAX: usize = 10;

/// Commands travelling from the application to the session actor.
#[derive(Debug)]
pub enum Command {
    Start {
        devices: Box<DeviceConfig>,
        codecs: Box<CodecConfig>,
    },
    Stop,
    UpdateDevices(Box<DeviceConfig>),
    UpdateCodecs(Box<CodecConfig>),
    Transmit(TransmitParams),
    Record {
        enabled: bool,
    },
}

impl MailboxItem for Command {}

/// Status snapshot delivered to the application. The lifecycle flags are set
/// by the bridge depending on which worker event produced the snapshot; the
/// worker itself never sets them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionStatus {
    pub worker: WorkerStatus,
    pub stopped: bool,
    pub finished: bool,
    pub error: bool,
    pub error_code: i32,
}

/// Events travelling from the session actor to the application.
#[derive(Debug, Clone)]
pub enum Event {
    Status(SessionStatus),
    Frame { kind: FrameKind, frame: VideoFrame },
    AudioIntensity(i32),
}

impl MailboxItem for Event {
    fn coalesce_on_post(queue: &mut VecDeque<Event>, next: &Event) {
        let Event::Frame { kind, .. } = next else {
            return;
        };
        let same_kind = |event: &&Event| matches!(event, Event::Frame { kind: k, .. } if k == kind);
        if queue.iter().filter(same_kind).count() >= FRAME_QUEUE_MAX
            && let Some(oldest) = queue.iter().position(|e| same_kind(&e))
        {
            queue.remove(oldest);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{mailbox::Mailbox, media_loop::TaskScheduler, testkit::TestLoop};
    use std::sync::Arc;

    fn frame(kind: FrameKind, tag: u8) -> Event {
        Event::Frame {
            kind,
            frame: VideoFrame::new(4, 4, vec![tag; 4]),
        }
    }

    fn frame_tags(queue: &VecDeque<Event>, kind: FrameKind) -> Vec<u8> {
        queue
            .iter()
            .filter_map(|event| match event {
                Event::Frame { kind: k, frame } if *k == kind => Some(frame.data()[0]),
                _ => None,
            })
            .collect()
    }

    fn post(queue: &mut VecDeque<Event>, event: Event) {
        Event::coalesce_on_post(queue, &event);
        queue.push_back(event);
    }

    #[test]
    fn frame_cap_evicts_oldest_of_the_same_kind() {
        let mut queue = VecDeque::new();
        for tag in 0..10 {
            post(&mut queue, frame(FrameKind::Preview, tag));
        }
        for tag in 100..103 {
            post(&mut queue, frame(FrameKind::Output, tag));
        }

        post(&mut queue, frame(FrameKind::Preview, 10));

        let previews = frame_tags(&queue, FrameKind::Preview);
        assert_eq!(previews.len(), FRAME_QUEUE_MAX);
        assert_eq!(previews, (1..=10).collect::<Vec<u8>>());
        assert_eq!(frame_tags(&queue, FrameKind::Output), vec![100, 101, 102]);
    }

    #[test]
    fn statuses_and_intensities_are_not_capped() {
        let mut queue = VecDeque::new();
        for v in 0..20 {
            post(&mut queue, Event::AudioIntensity(v));
        }
        assert_eq!(queue.len(), 20);
    }

    #[test]
    fn event_mailbox_applies_the_cap_at_post_time() {
        let scheduler: Arc<dyn TaskScheduler> = TestLoop::new();
        let mailbox = Mailbox::new("events", scheduler);
        for tag in 0..15 {
            mailbox.post(frame(FrameKind::Preview, tag));
        }
        assert_eq!(mailbox.queued(), FRAME_QUEUE_MAX);
    }
}
