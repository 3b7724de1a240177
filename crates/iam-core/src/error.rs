// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use iam_database::DatabaseError;
use snafu::Snafu;
use tokio_util::sync::CancellationToken;

/// A combining error type returned by the access-policy, group and token
/// engines.
///
/// Derived using [`snafu::Snafu`]. Invariant and authorization errors are
/// surfaced unchanged; storage failures are wrapped with context, matching
/// the propagation policy in the specification's error-handling section.
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Policy {id} not found"))]
    PolicyNotFound { id: i64 },

    #[snafu(display("Group {id} not found"))]
    GroupNotFound { id: i64 },

    #[snafu(display("Token not found"))]
    TokenNotFound,

    #[snafu(display("No callback named `{name}` is registered"))]
    CallbackNotFound { name: String },

    #[snafu(display("Policy name `{name}` is already taken"))]
    NameTaken { name: String },

    #[snafu(display("Object type/id pair is already protected by another policy"))]
    ObjectKindAndIdTaken,

    #[snafu(display(
        "At least one of `name` or `(object_type, object_id)` must be present"
    ))]
    EmptyDesignators,

    #[snafu(display("`object_type` and `object_id` must be either both set or both empty"))]
    PartialObjectDesignator,

    #[snafu(display("`is_inherited`/`is_extended` require a non-zero parent_id, and are mutually exclusive"))]
    InvalidParentCombination,

    #[snafu(display("Group kind does not match its parent's kind"))]
    GroupKindMismatch,

    #[snafu(display("Group key `{key}` is already taken"))]
    GroupKeyTaken { key: String },

    #[snafu(display("Group key or name must not be empty"))]
    EmptyGroupDesignator,

    #[snafu(display("Parent chain did not terminate within the acyclicity deadline"))]
    CircuitedParent,

    #[snafu(display("A callback named `{name}` is already registered"))]
    DuplicateCallback { name: String },

    #[snafu(display("Assignor lacks ManageRights on this policy"))]
    AccessDenied,

    #[snafu(display("Assignor attempted to grant rights they do not themselves hold"))]
    ExcessOfRights,

    #[snafu(display("Token has expired"))]
    TokenExpired,

    #[snafu(display("Token has no checkins remaining"))]
    TokenUsedUp,

    #[snafu(display("checkins must be non-zero"))]
    InvalidCheckinCount,

    #[snafu(display("Generated token hash collided with an existing token"))]
    TokenHashCollision,

    #[snafu(display("No backup snapshot is available to restore"))]
    BackupNotFound,

    #[snafu(display("Storage failure: {source}"), context(false))]
    StorageFailure { source: DatabaseError },

    #[snafu(display("Operation was cancelled"))]
    Cancelled,

    #[snafu(display("No rows were affected by the operation"))]
    NothingChanged,
}

impl Error {
    /// True for the subset of variants the caller must treat as
    /// "the policy is unchanged" (spec §7, User-visible behaviour).
    pub fn is_authorization_denied(&self) -> bool {
        matches!(self, Error::AccessDenied | Error::ExcessOfRights)
    }

    /// True for the subset the caller must treat as "discard the token".
    pub fn is_token_lifecycle(&self) -> bool {
        matches!(self, Error::TokenExpired | Error::TokenUsedUp)
    }
}

/// A default specialized Result type for the core.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Checked at the start of every store-touching manager method (spec's
/// "Suspension points": store calls are cancellable, lock sections are
/// not).
pub(crate) fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}
