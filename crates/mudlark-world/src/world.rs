//! The world facade: live place state, movement, sessions, and the
//! drift-compensated tick loop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use mudlark_entity::{
    Entity, EntityError, EntityHooks, EntityRuntime, Field, RuntimeBuilder,
};
use tokio::time::Instant;

use crate::character::{Character, CharacterTemplate};
use crate::error::WorldError;
use crate::gameobj::{ObjType, TypeMapping, TypeRegistry};
use crate::hooks::{GameHooks, Session};
use crate::item::Item;
use crate::place::{
    ChangeFlags, Passage, PassageData, PassageView, Place, PlaceState, LIMBO_ADDRESS,
};
use crate::tick::PlaceTracker;
use crate::user::{PasswordVerifier, User};

/// Minimum interval between "cannot keep up" warnings.
const LAG_WARN_INTERVAL: Duration = Duration::from_secs(10);

/// Entity hooks feeding loaded and created places into the tracker.
struct TrackPlaces {
    tracker: Arc<PlaceTracker>,
}

impl EntityHooks<Place> for TrackPlaces {
    fn on_constructed(&self, entity: &Entity<Place>) {
        self.tracker.track(entity.downgrade());
    }

    fn on_loaded(&self, entity: &Entity<Place>) {
        self.tracker.track(entity.downgrade());
    }
}

/// Register every world entity kind on the given builder.
///
/// Places are registered with hooks that feed the tracker, so every
/// place that enters memory is ticked.
///
/// # Errors
///
/// Returns [`EntityError`] if a kind declares an invalid field set or
/// is already registered.
pub fn register_world_kinds(
    builder: RuntimeBuilder,
    tracker: &Arc<PlaceTracker>,
) -> Result<RuntimeBuilder, EntityError> {
    builder
        .register_with_hooks::<Place>(Arc::new(TrackPlaces {
            tracker: Arc::clone(tracker),
        }))?
        .register::<Passage>()?
        .register::<Character>()?
        .register::<Item>()?
        .register::<User>()?
        .register::<TypeMapping>()
}

/// The live world: entities plus everything that is not persisted.
///
/// Holds the per-place side state (present characters, resolved
/// passages, change flags), the session registry, and the object type
/// registry. One instance exists per server.
pub struct World {
    runtime: Arc<EntityRuntime>,
    tracker: Arc<PlaceTracker>,
    types: TypeRegistry,
    hooks: Arc<dyn GameHooks>,
    verifier: Arc<dyn PasswordVerifier>,
    state: Mutex<HashMap<i32, PlaceState>>,
    sessions: Mutex<HashMap<i32, Arc<dyn Session>>>,
    limbo: Entity<Place>,
}

impl World {
    /// Build the world over a started runtime.
    ///
    /// Resolves the object type registry against the database and
    /// bootstraps the limbo place if the database has none.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::Entity`] on database failure.
    pub async fn initialize(
        runtime: Arc<EntityRuntime>,
        tracker: Arc<PlaceTracker>,
        obj_types: Vec<ObjType>,
        hooks: Arc<dyn GameHooks>,
        verifier: Arc<dyn PasswordVerifier>,
    ) -> Result<Arc<Self>, WorldError> {
        let types = TypeRegistry::initialize(&runtime, obj_types).await?;

        let limbo = match find_place(&runtime, LIMBO_ADDRESS).await? {
            Some(place) => place,
            None => {
                tracing::debug!("Creating limbo place (empty database?)");
                runtime.create(Place {
                    address: LIMBO_ADDRESS.to_owned(),
                    title: "Limbo".to_owned(),
                    header: "Nothing to see here.".to_owned(),
                })?
            }
        };

        Ok(Arc::new(Self {
            runtime,
            tracker,
            types,
            hooks,
            verifier,
            state: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            limbo,
        }))
    }

    /// The object type registry.
    pub const fn types(&self) -> &TypeRegistry {
        &self.types
    }

    /// The underlying entity runtime.
    pub const fn runtime(&self) -> &Arc<EntityRuntime> {
        &self.runtime
    }

    /// The fallback place every database has.
    pub const fn limbo(&self) -> &Entity<Place> {
        &self.limbo
    }

    fn state(&self) -> std::sync::MutexGuard<'_, HashMap<i32, PlaceState>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sessions(&self) -> std::sync::MutexGuard<'_, HashMap<i32, Arc<dyn Session>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Find a place by its unique string address.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::Entity`] on database failure.
    pub async fn place_by_address(&self, address: &str) -> Result<Option<Entity<Place>>, WorldError> {
        find_place(&self.runtime, address).await
    }

    /// Load a place's live state (characters, passages) if not loaded.
    ///
    /// Passage target addresses and titles are resolved here, once, so
    /// later passage use is a pure map lookup.
    async fn ensure_place_state(&self, place: &Entity<Place>) -> Result<(), WorldError> {
        let id = place.id();
        if self.state().get(&id).is_some_and(|s| s.loaded) {
            return Ok(());
        }

        let characters = self
            .runtime
            .select::<Character>(&[Field::of::<Character>("place").eq(id)])
            .await?;
        let passages = self
            .runtime
            .select::<Passage>(&[Field::of::<Passage>("place").eq(id)])
            .await?;

        let mut views = HashMap::with_capacity(passages.len());
        for passage in passages {
            let target_id = passage.read(|p| p.target);
            let target = self.runtime.get::<Place>(target_id).await?;
            let (address, target_title) = target.read(|t| (t.address.clone(), t.title.clone()));
            views.insert(
                address.clone(),
                PassageView {
                    passage,
                    address,
                    target_title,
                },
            );
        }

        let mut state = self.state();
        let entry = state.entry(id).or_default();
        // Someone may have loaded it while we were querying.
        if !entry.loaded {
            entry.characters = characters.into_iter().map(|c| (c.id(), c)).collect();
            entry.passages = views;
            entry.loaded = true;
        }
        Ok(())
    }

    /// Passages leaving the given place, with resolved target data.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::Entity`] on database failure.
    pub async fn passages(&self, place: &Entity<Place>) -> Result<Vec<PassageView>, WorldError> {
        self.ensure_place_state(place).await?;
        Ok(self
            .state()
            .get(&place.id())
            .map(|s| s.passages.values().cloned().collect())
            .unwrap_or_default())
    }

    /// Characters currently at the given place.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::Entity`] on database failure.
    pub async fn characters_in(
        &self,
        place: &Entity<Place>,
    ) -> Result<Vec<Entity<Character>>, WorldError> {
        self.ensure_place_state(place).await?;
        Ok(self
            .state()
            .get(&place.id())
            .map(|s| s.characters.values().cloned().collect())
            .unwrap_or_default())
    }

    /// Items lying at the given place.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::Entity`] on database failure.
    pub async fn items_in(&self, place: &Entity<Place>) -> Result<Vec<Entity<Item>>, WorldError> {
        Ok(self
            .runtime
            .select::<Item>(&[Field::of::<Item>("place").eq(place.id())])
            .await?)
    }

    /// Items carried by the given character.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::Entity`] on database failure.
    pub async fn inventory(
        &self,
        character: &Entity<Character>,
    ) -> Result<Vec<Entity<Item>>, WorldError> {
        Ok(self
            .runtime
            .select::<Item>(&[Field::of::<Item>("owner").eq(character.id())])
            .await?)
    }

    /// Player characters owned by the given user.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::Entity`] on database failure.
    pub async fn owned_characters(
        &self,
        user: &Entity<User>,
    ) -> Result<Vec<Entity<Character>>, WorldError> {
        Ok(self
            .runtime
            .select::<Character>(&[Field::of::<Character>("owner").eq(user.id())])
            .await?)
    }

    /// Replace every passage leaving the given place.
    ///
    /// Passages pointing at addresses that do not exist are skipped
    /// with a warning rather than failing the whole update.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::Entity`] on database failure.
    pub async fn update_passages(
        &self,
        place: &Entity<Place>,
        passages: &[PassageData],
    ) -> Result<(), WorldError> {
        self.ensure_place_state(place).await?;

        let old = self
            .runtime
            .select::<Passage>(&[Field::of::<Passage>("place").eq(place.id())])
            .await?;
        for passage in old {
            passage.destroy().await?;
        }

        let mut views = HashMap::with_capacity(passages.len());
        for data in passages {
            let Some(target) = self.place_by_address(&data.address).await? else {
                tracing::warn!(address = %data.address, "Passage to missing place");
                continue;
            };
            let entity = self.runtime.create(Passage {
                place: place.id(),
                target: target.id(),
                name: data.name.clone(),
                hidden: data.hidden,
            })?;
            let (address, target_title) = target.read(|t| (t.address.clone(), t.title.clone()));
            views.insert(
                address.clone(),
                PassageView {
                    passage: entity,
                    address,
                    target_title,
                },
            );
        }

        let mut state = self.state();
        let entry = state.entry(place.id()).or_default();
        entry.passages = views;
        entry.changes = entry.changes.union(ChangeFlags::PASSAGES);
        Ok(())
    }

    /// Move a character through a passage of its current place.
    ///
    /// Returns the place moved to.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::Unplaced`] if the character is nowhere,
    /// [`WorldError::UnknownPassage`] if its place has no passage to
    /// the given address, or [`WorldError::Entity`] on database
    /// failure.
    pub async fn use_passage(
        &self,
        character: &Entity<Character>,
        address: &str,
    ) -> Result<Entity<Place>, WorldError> {
        let place_id = character
            .read(|c| c.place)
            .ok_or(WorldError::Unplaced {
                character: character.id(),
            })?;
        let place = self.runtime.get::<Place>(place_id).await?;
        self.ensure_place_state(&place).await?;

        let target_id = {
            let state = self.state();
            state
                .get(&place.id())
                .and_then(|s| s.passages.get(address))
                .map(|view| view.passage.read(|p| p.target))
        };
        let Some(target_id) = target_id else {
            return Err(WorldError::UnknownPassage {
                from: place.read(|p| p.address.clone()),
                to: address.to_owned(),
            });
        };

        let target = self.runtime.get::<Place>(target_id).await?;
        self.move_character(character, &target).await?;
        Ok(target)
    }

    /// Move a character to a place, updating both places' live state
    /// and notifying the character's session, if any.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::Entity`] on database failure.
    pub async fn move_character(
        &self,
        character: &Entity<Character>,
        to_place: &Entity<Place>,
    ) -> Result<(), WorldError> {
        let from_id = character.read(|c| c.place);
        character.modify(|c| c.place = Some(to_place.id()));

        // A brand new character has no previous place.
        if let Some(from_id) = from_id {
            let from_place = self.runtime.get::<Place>(from_id).await?;
            self.ensure_place_state(&from_place).await?;
            let mut state = self.state();
            if let Some(entry) = state.get_mut(&from_id) {
                entry.characters.remove(&character.id());
                entry.changes = entry.changes.union(ChangeFlags::CHARACTERS);
            }
        }

        self.ensure_place_state(to_place).await?;
        {
            let mut state = self.state();
            let entry = state.entry(to_place.id()).or_default();
            entry.characters.insert(character.id(), character.clone());
            entry.changes = entry.changes.union(ChangeFlags::CHARACTERS);
        }

        let session = self.sessions().get(&character.id()).cloned();
        if let Some(session) = session {
            session.notify_character_moved(to_place).await;
        }
        Ok(())
    }

    /// Character creation options the game offers to a user.
    pub async fn character_options(&self, user: &Entity<User>) -> Vec<CharacterTemplate> {
        self.hooks.character_creation_options(user).await
    }

    /// Create a player character from a template and move it to the
    /// game's starting place, granting the template's inventory.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::Entity`] on database failure.
    pub async fn spawn_character(
        &self,
        user: &Entity<User>,
        template: &CharacterTemplate,
    ) -> Result<Entity<Character>, WorldError> {
        let character = self.runtime.create(Character {
            type_id: template.type_id,
            name: None,
            place: None,
            owner: Some(user.id()),
        })?;
        for item in &template.inventory {
            self.runtime.create(Item {
                type_id: item.type_id,
                name: item.name.clone(),
                place: None,
                owner: Some(character.id()),
            })?;
        }

        let start = self
            .hooks
            .starting_place(&character, user)
            .await
            .unwrap_or_else(|| self.limbo.clone());
        self.move_character(&character, &start).await?;
        tracing::info!(
            character = character.id(),
            user = user.id(),
            place = start.id(),
            "Player character created"
        );
        Ok(character)
    }

    /// Create a user account with an already-hashed password.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::Entity`] on database failure.
    pub fn create_user(&self, name: &str, password_hash: &str) -> Result<Entity<User>, WorldError> {
        Ok(self.runtime.create(User {
            name: name.to_owned(),
            password_hash: password_hash.to_owned(),
        })?)
    }

    /// Check a name/password pair and return the matching user.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::InvalidCredentials`] whenever login must
    /// not succeed, without saying why.
    pub async fn validate_credentials(
        &self,
        name: &str,
        password: &str,
    ) -> Result<Entity<User>, WorldError> {
        let user = self
            .runtime
            .select_one::<User>(&[Field::of::<User>("name").eq(name)])
            .await?
            .ok_or(WorldError::InvalidCredentials)?;
        let hash = user.read(|u| u.password_hash.clone());
        if self.verifier.verify(&hash, password) {
            Ok(user)
        } else {
            Err(WorldError::InvalidCredentials)
        }
    }

    /// Attach a session to a character; it starts receiving tick and
    /// movement notifications.
    pub fn attach_session(&self, character: &Entity<Character>, session: Arc<dyn Session>) {
        self.sessions().insert(character.id(), session);
    }

    /// Detach the session attached to a character, if any.
    pub fn detach_session(&self, character_id: i32) {
        self.sessions().remove(&character_id);
    }

    /// Merge change flags into a place's accumulated set.
    ///
    /// For changes the world layer cannot observe itself, e.g. edited
    /// header text or item drops done through raw queries.
    pub fn mark_changed(&self, place: &Entity<Place>, flags: ChangeFlags) {
        let mut state = self.state();
        let entry = state.entry(place.id()).or_default();
        entry.changes = entry.changes.union(flags);
    }

    /// Tick one place: swap out its accumulated changes and notify the
    /// session of every present character.
    async fn tick_place(&self, place: &Entity<Place>, _delta: f64) -> Result<(), WorldError> {
        self.ensure_place_state(place).await?;

        // Swap flags to empty so changes landing mid-tick are kept for
        // the next tick instead of being half-delivered.
        let (changes, characters) = {
            let mut state = self.state();
            let Some(entry) = state.get_mut(&place.id()) else {
                return Ok(());
            };
            let changes = std::mem::take(&mut entry.changes);
            let characters: Vec<i32> = entry.characters.keys().copied().collect();
            (changes, characters)
        };

        if !changes.any() {
            return Ok(());
        }
        for character_id in characters {
            let session = self.sessions().get(&character_id).cloned();
            if let Some(session) = session {
                session.notify_place_changed(changes).await;
            }
        }
        Ok(())
    }

    /// Run one tick round over every tracked place.
    ///
    /// Places tracked since the last round tick first, so a freshly
    /// loaded place never waits a full interval; then the standing set
    /// ticks, carrying survivors forward. `delta` is the time since the
    /// previous round started, in seconds.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::Entity`] on database failure.
    pub async fn tick_all(&self, delta: f64) -> Result<(), WorldError> {
        let fresh = self.tracker.take_fresh();
        for weak in &fresh {
            if let Some(place) = weak.upgrade() {
                self.tick_place(&place, delta).await?;
            }
        }
        for weak in self.tracker.take_standing() {
            if let Some(place) = weak.upgrade() {
                self.tick_place(&place, delta).await?;
                self.tracker.track(weak);
            }
        }
        self.tracker.set_standing(fresh);
        Ok(())
    }

    /// Drive the tick loop forever.
    ///
    /// Sleeps off whatever part of `interval` a round left unused; when
    /// a round overruns the interval, the next one starts immediately
    /// and a rate-limited warning reports how many rounds ran late.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::Entity`] if a tick round fails.
    pub async fn run_tick_loop(&self, interval: Duration) -> Result<(), WorldError> {
        tracing::info!(?interval, "Ticking loaded places");
        let mut prev_start = Instant::now();
        // First round is always on time.
        self.tick_all(interval.as_secs_f64()).await?;

        let mut late_rounds: u32 = 0;
        let mut last_warn = Instant::now();
        loop {
            let start = Instant::now();
            let delta = start.duration_since(prev_start);
            match interval.checked_sub(delta) {
                Some(wait) if !wait.is_zero() => tokio::time::sleep(wait).await,
                _ => {
                    late_rounds = late_rounds.saturating_add(1);
                    if last_warn.elapsed() >= LAG_WARN_INTERVAL {
                        tracing::warn!(late_rounds, ?delta, "Tick loop cannot keep up");
                        late_rounds = 0;
                        last_warn = Instant::now();
                    }
                }
            }
            self.tick_all(delta.as_secs_f64()).await?;
            prev_start = start;
        }
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("types", &self.types.len())
            .field("tracked_places", &self.tracker.len())
            .finish_non_exhaustive()
    }
}

/// Find a place by address on a bare runtime (used during bootstrap,
/// before the [`World`] exists).
async fn find_place(
    runtime: &EntityRuntime,
    address: &str,
) -> Result<Option<Entity<Place>>, WorldError> {
    Ok(runtime
        .select_one::<Place>(&[Field::of::<Place>("address").eq(address)])
        .await?)
}
