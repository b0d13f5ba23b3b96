// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright © 2022 Adrian <adrian.eddy at gmail>

use thiserror::Error;

use crate::gpmf::GpmfError;
use crate::source::SourceError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Gpmf(#[from] GpmfError),
    #[error("{0} has no timestamped points")]
    NoTimestamps(String),
    #[error("invalid stream tag {0:?}, expected four ASCII characters")]
    InvalidTag(String),
}

pub type Result<T> = std::result::Result<T, Error>;
