// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use thiserror::Error;

/// The error type returned when parsing invalid values from strings.
///
/// Derived using [`thiserror::Error`]
#[derive(Debug, Error)]
pub enum ParsingError {
    #[error("Invalid subject kind bit: `{0}`")]
    InvalidSubjectKind(u8),
    #[error("Invalid group kind: `{0}`")]
    InvalidGroupKind(String),
    #[error("Invalid token kind bits: `{0}`")]
    InvalidTokenKind(u16),
}
