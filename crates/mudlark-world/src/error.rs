//! Error types for the world layer.

use mudlark_entity::EntityError;

/// Errors that can occur in world operations.
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    /// An underlying entity runtime operation failed.
    #[error("entity error: {0}")]
    Entity(#[from] EntityError),

    /// A passage was used that does not leave from the given place.
    #[error("no passage from {from} to {to}")]
    UnknownPassage {
        /// Address of the place the character is in.
        from: String,
        /// Target address that has no passage.
        to: String,
    },

    /// A character tried to act in a place while not being in any.
    #[error("character {character} is not in any place")]
    Unplaced {
        /// The character's id.
        character: i32,
    },

    /// A game-object type id had no registered descriptor.
    #[error("no object type registered for id {id}")]
    UnknownObjType {
        /// The unmapped numeric type id.
        id: i32,
    },

    /// Login failed.
    ///
    /// Deliberately does not say whether the user was missing or the
    /// password wrong.
    #[error("invalid credentials")]
    InvalidCredentials,
}
