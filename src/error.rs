/*
 *  Copyright (C) 2026 The WaveSync Authors
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
use std::io;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum WaveSyncError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("argument error: {0}")]
    ArgError(String),
    #[error("malformed datagram: {0}")]
    Wire(#[from] WireError),
    #[error("audio sink error: {0}")]
    Sink(String),
    #[error("general error: {0}")]
    Other(String),
}

/// Errors that can occur while parsing an inbound UDP datagram. Kept
/// separate from [`WaveSyncError`] because the receiver treats every
/// variant the same way: log and drop the single datagram.
#[derive(Error, Debug, Diagnostic, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    #[error("datagram shorter than the 2-byte header")]
    TooShort,
    #[error("unknown datagram header")]
    UnknownHeader,
    #[error("status payload truncated")]
    StatusTruncated,
    #[error("zlib inflation failed")]
    Decompress,
}

pub type WaveSyncResult<T> = Result<T, WaveSyncError>;
