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

use miette::Diagnostic;
use rtp_rs::RtpPacketBuildError;
use std::{fmt::Display, io};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing_subscriber::{filter::ParseError, util::TryInitError};

#[derive(Error, Debug, Diagnostic)]
pub enum BridgeError {
    #[error("media loop is not running")]
    MediaLoopUnavailable,
    #[error("media loop dropped the request: {0}")]
    ApiError(#[from] oneshot::error::RecvError),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),
    #[error("Tracing init error: {0}")]
    TryInitError(#[from] TryInitError),
    #[error("Tracing config parse error: {0}")]
    ParseError(#[from] ParseError),
    #[error("Could not build RTP packet: {0}")]
    InvalidRtpData(#[from] WrappedRtpPacketBuildError),
}

#[derive(Error, Debug, Diagnostic)]
pub struct WrappedRtpPacketBuildError(pub RtpPacketBuildError);

impl Display for WrappedRtpPacketBuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
