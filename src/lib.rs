// Copyright 2024 FastLabs Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Logroll is a file logger that rotates files on time-derived suffixes and can buffer records
//! to write them in the background.
//!
//! # Overview
//!
//! A [`RotatingLogger`] writes to `<base_path>.<suffix>`, where the suffix is the current local
//! time formatted with a strftime pattern (`%Y-%m-%d` by default, one file per day). When the
//! suffix changes, the old file is closed and a new one is opened.
//!
//! With a capacity above one, each file is written through a buffer. The buffer is handed to a
//! background flusher when it is full, when a record at or above the flush level arrives, or when
//! the last flush is older than the flush interval. Flushes of one file complete in order.
//!
//! Every logger also implements [`log::Log`], so it can be installed as the global logger of the
//! `log` crate.
//!
//! # Examples
//!
//! Log directly to daily files:
//!
//! ```
//! use logroll::Level;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let logger = logroll::rotating(dir.path().join("app.log"))
//!     .level(Level::Debug)
//!     .build()
//!     .unwrap();
//!
//! logger.write(Level::Info, "This is an info message.").unwrap();
//! logger.close().unwrap();
//! ```
//!
//! Buffer records and forward the `log` crate:
//!
//! ```
//! use logroll::Level;
//!
//! let dir = tempfile::tempdir().unwrap();
//! logroll::buffered_rotating(dir.path().join("app.log"))
//!     .capacity(200)
//!     .flush_level(Level::Warning)
//!     .format("{time} {level} {target}: {message}")
//!     .build()
//!     .unwrap()
//!     .apply();
//!
//! log::warn!("This record triggers a flush.");
//! ```

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod append;
pub mod layout;
pub mod trap;

mod bridge;
mod clock;
mod error;
mod logger;
mod record;

pub use append::Append;
pub use error::Error;
pub use layout::Layout;
pub use logger::*;
pub use record::Level;
pub use record::Record;
pub use record::RecordBuilder;
pub use trap::Trap;
