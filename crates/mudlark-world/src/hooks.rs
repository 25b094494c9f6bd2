//! Interfaces the world layer consumes but does not implement.
//!
//! The game (content) supplies [`GameHooks`]; the network layer
//! supplies one [`Session`] per connected player character. Both use
//! boxed futures so implementations can live behind trait objects.

use std::pin::Pin;

use mudlark_entity::Entity;

use crate::character::{Character, CharacterTemplate};
use crate::place::{ChangeFlags, Place};
use crate::user::User;

/// A boxed future as returned by world-facing trait methods.
pub type BoxFuture<'a, T = ()> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Hooks through which the hosted game controls world operations.
pub trait GameHooks: Send + Sync {
    /// Character creation options offered to the given user.
    fn character_creation_options<'a>(
        &'a self,
        user: &'a Entity<User>,
    ) -> BoxFuture<'a, Vec<CharacterTemplate>>;

    /// Starting place for a newly created character.
    ///
    /// `None` falls back to limbo.
    fn starting_place<'a>(
        &'a self,
        character: &'a Entity<Character>,
        user: &'a Entity<User>,
    ) -> BoxFuture<'a, Option<Entity<Place>>>;
}

/// A connected player's session, as seen from the world layer.
///
/// The world only ever pushes notifications; everything else about the
/// connection is out of its sight.
pub trait Session: Send + Sync {
    /// The character's current place changed in the given ways during
    /// the last tick.
    fn notify_place_changed(&self, changes: ChangeFlags) -> BoxFuture<'_>;

    /// The character moved to a new place.
    fn notify_character_moved<'a>(&'a self, place: &'a Entity<Place>) -> BoxFuture<'a>;
}
