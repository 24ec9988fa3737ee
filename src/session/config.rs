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

use crate::formats::{AudioParams, PayloadInfo, VideoParams};
use serde::{Deserialize, Serialize};

/// Device selection applied to the worker as a whole. Every field is copied
/// on apply; use [`CodecConfig`] for the conditionally-applied parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceConfig {
    pub audio_out_id: String,
    pub audio_in_id: String,
    pub video_in_id: String,
    /// Media file played back instead of live capture. Empty means live.
    pub file_name_in: String,
    /// In-memory alternative to `file_name_in`; not config-file material.
    #[serde(skip)]
    pub file_data_in: Vec<u8>,
    pub loop_file: bool,
    pub audio_out_volume: i32,
    pub audio_in_volume: i32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            audio_out_id: String::new(),
            audio_in_id: String::new(),
            video_in_id: String::new(),
            file_name_in: String::new(),
            file_data_in: Vec::new(),
            loop_file: false,
            audio_out_volume: 100,
            audio_in_volume: 100,
        }
    }
}

/// Codec and payload negotiation state. A `None` field leaves the worker's
/// current value untouched, so partial updates never clobber negotiated
/// state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CodecConfig {
    pub local_audio_params: Option<AudioParams>,
    pub local_video_params: Option<VideoParams>,
    pub local_audio_payload_info: Option<Vec<PayloadInfo>>,
    pub local_video_payload_info: Option<Vec<PayloadInfo>>,
    pub remote_audio_payload_info: Option<Vec<PayloadInfo>>,
    pub remote_video_payload_info: Option<Vec<PayloadInfo>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransmitParams {
    pub use_audio: bool,
    pub audio_index: i32,
    pub use_video: bool,
    pub video_index: i32,
}
