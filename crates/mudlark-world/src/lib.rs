//! World model for Mudlark: places linked by passages, the characters
//! and items in them, user accounts, and the loop that ticks every
//! loaded place.
//!
//! Everything persistent is an entity kind on the
//! [`mudlark_entity`] runtime; this crate adds the live, non-persisted
//! side of the world (who is where right now, what changed this tick)
//! and the interfaces the hosted game and the network layer plug into.
//!
//! # Modules
//!
//! - [`place`] -- places, passages, per-place [`ChangeFlags`]
//! - [`character`] / [`item`] -- actors and objects in the world
//! - [`user`] -- accounts and the [`PasswordVerifier`] seam
//! - [`gameobj`] -- object type descriptors and their persisted ids
//! - [`hooks`] -- [`GameHooks`] and [`Session`], consumed interfaces
//! - [`tick`] -- weak tracking of loaded places for the tick loop
//! - [`world`] -- the [`World`] facade and tick loop
//! - [`error`] -- the [`WorldError`] type

pub mod character;
pub mod error;
pub mod gameobj;
pub mod hooks;
pub mod item;
pub mod place;
pub mod tick;
pub mod user;
pub mod world;

pub use character::{Character, CharacterTemplate, ItemTemplate};
pub use error::WorldError;
pub use gameobj::{ObjType, TypeMapping, TypeRegistry};
pub use hooks::{BoxFuture, GameHooks, Session};
pub use item::Item;
pub use place::{ChangeFlags, Passage, PassageData, PassageView, Place, LIMBO_ADDRESS};
pub use tick::{PlaceTracker, TickRoster};
pub use user::{PasswordVerifier, User};
pub use world::{register_world_kinds, World};
