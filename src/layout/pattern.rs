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

use std::fmt::Write;

use jiff::Timestamp;
use jiff::tz::TimeZone;

use crate::Error;
use crate::layout::Layout;
use crate::record::Record;

/// The line format used when none is configured.
pub const DEFAULT_FORMAT: &str = "[{level}][{time}] at {module}:{line}: {message}";

const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";

/// A layout that formats log records from a template.
///
/// The template may contain the placeholders `{level}`, `{time}`, `{module}`, `{file}`,
/// `{line}`, `{target}` and `{message}`. Literal braces are written as `{{` and `}}`.
///
/// Output of the default template:
///
/// ```text
/// [INFO][2024-08-11 22:44:57,172] at app::server:51: listening on 0.0.0.0:8080
/// [ERROR][2024-08-11 22:44:57,173] at app::server:88: connection reset
/// ```
///
/// # Examples
///
/// ```
/// use logroll::layout::PatternLayout;
///
/// let layout = PatternLayout::new("{level} {message}").unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct PatternLayout {
    pieces: Vec<Piece>,
    time_format: String,
    tz: Option<TimeZone>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Level,
    Time,
    Module,
    File,
    Line,
    Target,
    Message,
}

impl Default for PatternLayout {
    fn default() -> Self {
        Self {
            pieces: parse_pattern(DEFAULT_FORMAT).unwrap_or_default(),
            time_format: DEFAULT_TIME_FORMAT.to_string(),
            tz: None,
        }
    }
}

impl PatternLayout {
    /// Create a layout from a template.
    ///
    /// # Errors
    ///
    /// Return an error if the template has an unknown placeholder or an unbalanced brace.
    pub fn new(pattern: &str) -> Result<Self, Error> {
        Ok(Self {
            pieces: parse_pattern(pattern)?,
            ..Default::default()
        })
    }

    /// Set the strftime format used to render `{time}`.
    ///
    /// Default to `%Y-%m-%d %H:%M:%S,%3f`.
    ///
    /// # Errors
    ///
    /// Return an error if the format cannot be rendered.
    pub fn time_format(mut self, format: impl Into<String>) -> Result<Self, Error> {
        let format = format.into();
        let probe = Timestamp::UNIX_EPOCH.to_zoned(TimeZone::UTC);
        jiff::fmt::strtime::format(&format, &probe).map_err(|err| {
            Error::new("malformed time format")
                .with_context("format", &format)
                .with_source(err)
        })?;
        self.time_format = format;
        Ok(self)
    }

    /// Set the time zone used to render `{time}`.
    ///
    /// Default to the system time zone.
    pub fn timezone(mut self, tz: TimeZone) -> Self {
        self.tz = Some(tz);
        self
    }
}

impl Layout for PatternLayout {
    fn format(&self, record: &Record) -> Result<Vec<u8>, Error> {
        let mut text = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Literal(s) => text.push_str(s),
                Piece::Level => text.push_str(record.level().as_str()),
                Piece::Time => {
                    let tz = self.tz.clone().unwrap_or_else(TimeZone::system);
                    let time = record.time().to_zoned(tz);
                    let time = jiff::fmt::strtime::format(&self.time_format, &time)
                        .map_err(|err| Error::new("failed to format time").with_source(err))?;
                    text.push_str(&time);
                }
                Piece::Module => text.push_str(record.module_path().unwrap_or_default()),
                Piece::File => text.push_str(&record.filename()),
                Piece::Line => {
                    write!(&mut text, "{}", record.line().unwrap_or_default())
                        .map_err(Error::from_fmt_error)?;
                }
                Piece::Target => text.push_str(record.target()),
                Piece::Message => text.push_str(record.payload()),
            }
        }
        Ok(text.into_bytes())
    }
}

fn parse_pattern(pattern: &str) -> Result<Vec<Piece>, Error> {
    let mut pieces = vec![];
    let mut literal = String::new();
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => name.push(c),
                        None => {
                            return Err(Error::new("unclosed placeholder in log format")
                                .with_context("format", pattern));
                        }
                    }
                }
                let piece = match name.as_str() {
                    "level" => Piece::Level,
                    "time" => Piece::Time,
                    "module" => Piece::Module,
                    "file" => Piece::File,
                    "line" => Piece::Line,
                    "target" => Piece::Target,
                    "message" => Piece::Message,
                    _ => {
                        return Err(Error::new("unknown placeholder in log format")
                            .with_context("format", pattern)
                            .with_context("placeholder", name));
                    }
                };
                if !literal.is_empty() {
                    pieces.push(Piece::Literal(std::mem::take(&mut literal)));
                }
                pieces.push(piece);
            }
            '}' => {
                return Err(Error::new("unmatched '}' in log format").with_context("format", pattern));
            }
            c => literal.push(c),
        }
    }

    if !literal.is_empty() {
        pieces.push(Piece::Literal(literal));
    }
    Ok(pieces)
}
