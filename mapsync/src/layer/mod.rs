//! Layer controller.
//!
//! One [`LayerController`] keeps one data source's visuals on one map in sync
//! with its repositories, the user's preferences and the shared session.
//!
//! # Architecture
//!
//! ```text
//!  settings store ──► SettingsSubscription ──► apply_preferences ─┐
//!  refresh_events ──────────────────────────► request(NewData) ───┤
//!  data-change bus ─► clear_cache ──────────► request(Settings) ──┤
//!                                                                 ▼
//!                                                     MapSessionState.touch
//!                                                                 │
//!  session listener ◄─────────────────────────────────────────────┘
//!        │ dispatch
//!        ▼
//!     update ──► retire current ──► fetch (runtime) ──► commit (render)
//!                                                          │
//!                                       deferred cleanup ◄─┘
//! ```
//!
//! # Update cycle
//!
//! 1. Idle when the session's timestamp for the refresh key is the one the
//!    layer last rendered for.
//! 2. Otherwise record it, seeding the session with "now" on first run.
//! 3. Retire `current` into `previous`. A hidden layer stops here.
//! 4. Fetch the tile overlay and the feature set off the rendering context.
//! 5. Commit on the rendering context; `previous` leaves per the
//!    [`RemovalPolicy`] the triggering refresh selected.
//!
//! # Generations
//!
//! Every update cycle that passes the staleness check takes the next
//! generation number. Fetch results and deferred cleanups carry the
//! generation they belong to; under [`FetchOrdering::LatestIssued`] a result
//! whose cycle has been superseded is discarded at commit.
//!
//! # Threading
//!
//! [`setup`](LayerController::setup), [`update`](LayerController::update) and
//! [`remove`](LayerController::remove) touch the map view and must run on the
//! rendering context. Everything they start (fetches, timers, listeners)
//! runs on the map's runtime and marshals map work back through
//! [`RenderContext::dispatch`](crate::map_view::RenderContext::dispatch).

mod coordinator;
mod query;
mod swapper;

pub use coordinator::{RefreshCoordinator, RefreshTrigger, RemovalPolicy};
pub use query::{point_query, SpatialQueryEngine, TapQuery};
pub use swapper::FeatureSwapper;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::{FetchOrdering, LayerConfig};
use crate::features::{AnnotationsAndOverlays, DataSourceKey, Overlay, Renderer, RendererRegistry};
use crate::map_view::MapHandle;
use crate::notifications::DataChangeBus;
use crate::repository::{FeatureRepository, LayerSources, MapItem, TileRepository};
use crate::session::{MapSessionState, RefreshKey, Timestamp};
use crate::settings::{PreferenceChange, SettingsStore, SettingsSubscription};

/// Result of one [`LayerController::update`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Nothing changed since the last update.
    Idle,
    /// Stale, but the layer is hidden: visuals were retired, nothing fetched.
    Hidden { generation: u64 },
    /// A fetch was started for this generation.
    FetchIssued { generation: u64 },
}

/// What happened to a fetch result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Features are on the map. `displaced` counts features of an earlier
    /// commit that were replaced.
    Applied { displaced: usize },
    /// The result belonged to a superseded cycle or a removed layer.
    Discarded,
}

/// Synchronizes one data source with one map.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct LayerController {
    shared: Arc<LayerShared>,
}

impl fmt::Debug for LayerController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("LayerController")
            .field("data_source", &self.shared.data_source)
            .field("refresh_key", self.shared.coordinator.refresh_key())
            .field("show", &state.show)
            .field("order", &state.order)
            .field("attached", &state.attachment.is_some())
            .field("generation", &self.shared.generation.load(Ordering::SeqCst))
            .finish()
    }
}

struct LayerShared {
    data_source: DataSourceKey,
    sources: LayerSources,
    config: LayerConfig,
    coordinator: RefreshCoordinator,
    query: SpatialQueryEngine,
    renderers: RendererRegistry,
    settings: Option<Arc<dyn SettingsStore>>,
    data_changes: Option<DataChangeBus>,
    generation: AtomicU64,
    state: Mutex<LayerState>,
    swapper: Mutex<FeatureSwapper>,
}

struct LayerState {
    show: bool,
    order: i64,
    /// Session timestamp the layer last rendered for.
    last_change: Option<Timestamp>,
    /// Parent of every pending commit and cleanup. Cancelled on remove.
    lifetime: CancellationToken,
    attachment: Option<Attachment>,
}

/// Listeners started by `setup`. Dropping it stops them.
struct Attachment {
    session: Weak<MapSessionState>,
    listeners: CancellationToken,
    _settings: Option<SettingsSubscription>,
}

impl Drop for Attachment {
    fn drop(&mut self) {
        self.listeners.cancel();
    }
}

impl LayerController {
    pub fn builder() -> LayerControllerBuilder {
        LayerControllerBuilder::new()
    }

    /// Attach to a map and session, then run one update.
    ///
    /// Calling it again replaces the previous listeners; the update that
    /// follows is idle unless the session changed in between. Drawing is
    /// asynchronous: nothing is guaranteed to be on the map when this
    /// returns.
    pub fn setup(&self, map: &MapHandle, session: &Arc<MapSessionState>) -> UpdateOutcome {
        let shared = &self.shared;
        let listeners = CancellationToken::new();
        {
            let mut state = shared.state.lock();
            if state.lifetime.is_cancelled() {
                state.lifetime = CancellationToken::new();
            }
            state.attachment = Some(Attachment {
                session: Arc::downgrade(session),
                listeners: listeners.clone(),
                _settings: None,
            });
        }

        spawn_session_listener(shared, map, session, listeners.child_token());
        if let Some(events) = shared.sources.tiles.as_ref().and_then(|t| t.refresh_events()) {
            spawn_refresh_listener(shared, map, session, events, listeners.child_token());
        }
        if let Some(bus) = &shared.data_changes {
            spawn_data_change_listener(shared, map, session, bus, listeners.child_token());
        }
        let settings = shared.settings.as_ref().map(|store| {
            let weak = Arc::downgrade(shared);
            SettingsSubscription::spawn(
                Arc::clone(store),
                shared.data_source.clone(),
                map.runtime(),
                listeners.child_token(),
                move |change| {
                    if let Some(shared) = weak.upgrade() {
                        shared.apply_preference(change);
                    }
                },
            )
        });
        if let Some(attachment) = shared.state.lock().attachment.as_mut() {
            attachment._settings = settings;
        }

        info!(
            data_source = %shared.data_source,
            refresh_key = %shared.coordinator.refresh_key(),
            "Layer attached"
        );
        shared.update(map, session)
    }

    /// Re-evaluate the layer against the session. See the module docs for
    /// the state machine.
    pub fn update(&self, map: &MapHandle, session: &MapSessionState) -> UpdateOutcome {
        self.shared.update(map, session)
    }

    /// Take every feature of this layer off the map and stop listening.
    ///
    /// Pending commits and cleanups are cancelled. Returns the number of
    /// features removed; zero when the layer was already empty.
    pub fn remove(&self, map: &MapHandle, session: &MapSessionState) -> usize {
        let shared = &self.shared;
        let attachment = {
            let mut state = shared.state.lock();
            state.lifetime.cancel();
            state.last_change = None;
            state.attachment.take()
        };
        drop(attachment);

        let removed = shared.swapper.lock().remove_all(map.view());
        info!(
            data_source = %shared.data_source,
            removed,
            session_change = ?session.last_change(shared.coordinator.refresh_key()),
            "Layer removed"
        );
        removed
    }

    /// Set visibility and z-order. Returns whether either changed.
    ///
    /// A change requests a settings refresh when the layer is attached and
    /// the drawn result can differ.
    pub fn apply_preferences(&self, visibility: bool, order: i64) -> bool {
        self.shared.apply_preferences(visibility, order)
    }

    /// Keys of this layer's items under a tap, gated by zoom and visibility.
    pub async fn hit_test(
        &self,
        tap: TapQuery,
        map: &MapHandle,
    ) -> HashMap<DataSourceKey, Vec<String>> {
        let visible = self.is_visible();
        self.shared.query.item_keys(tap, map.view(), visible).await
    }

    /// Every item under a tap, ignoring the zoom and visibility gate.
    pub async fn items_at(&self, tap: TapQuery, map: &MapHandle) -> Vec<MapItem> {
        self.shared.query.items(tap, map.view()).await
    }

    /// How the host should draw an overlay of this layer.
    pub fn renderer_for(&self, overlay: &Overlay) -> Renderer {
        self.shared.renderers.renderer_for(overlay)
    }

    pub fn data_source_key(&self) -> &DataSourceKey {
        &self.shared.data_source
    }

    pub fn refresh_key(&self) -> &RefreshKey {
        self.shared.coordinator.refresh_key()
    }

    pub fn config(&self) -> &LayerConfig {
        &self.shared.config
    }

    /// The user's visibility preference.
    pub fn is_shown(&self) -> bool {
        self.shared.state.lock().show
    }

    /// Whether the layer draws: shown by the user or always shown.
    pub fn is_visible(&self) -> bool {
        self.is_shown() || self.shared.sources.always_show()
    }

    pub fn order(&self) -> i64 {
        self.shared.state.lock().order
    }

    pub fn is_attached(&self) -> bool {
        self.shared.state.lock().attachment.is_some()
    }

    /// Latest issued generation; zero before the first update.
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }

    /// Snapshot of the committed features.
    pub fn current_features(&self) -> AnnotationsAndOverlays {
        self.shared.swapper.lock().current().clone()
    }

    /// Snapshot of the features waiting for removal.
    pub fn previous_features(&self) -> AnnotationsAndOverlays {
        self.shared.swapper.lock().previous().clone()
    }

    /// Commit a fetch result directly, as the fetch task would.
    #[cfg(test)]
    fn commit(
        &self,
        generation: u64,
        features: AnnotationsAndOverlays,
        policy: RemovalPolicy,
        map: &MapHandle,
    ) -> CommitOutcome {
        let lifetime = self.shared.state.lock().lifetime.clone();
        self.shared.commit(generation, features, policy, map, &lifetime)
    }
}

impl LayerShared {
    fn update(self: &Arc<Self>, map: &MapHandle, session: &MapSessionState) -> UpdateOutcome {
        let key = self.coordinator.refresh_key();
        let (show, lifetime) = {
            let mut state = self.state.lock();
            let recorded = session.last_change(key);
            if recorded.is_some() && recorded == state.last_change {
                trace!(data_source = %self.data_source, "Layer up to date");
                return UpdateOutcome::Idle;
            }
            let changed_at = match recorded {
                Some(at) => at,
                None => session.seed(key, Utc::now()),
            };
            state.last_change = Some(changed_at);
            (state.show, state.lifetime.clone())
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let policy = self.coordinator.take_removal_policy();
        let view = map.view();
        let mut swapper = self.swapper.lock();
        swapper.retire_current(view, generation);

        if !show && !self.sources.always_show() {
            match policy {
                RemovalPolicy::Immediate => {
                    swapper.clear_previous(view);
                }
                RemovalPolicy::Deferred(delay) => {
                    drop(swapper);
                    self.schedule_cleanup(map, generation, delay, &lifetime);
                }
            }
            debug!(
                data_source = %self.data_source,
                generation,
                policy = ?policy,
                "Layer hidden"
            );
            return UpdateOutcome::Hidden { generation };
        }

        if policy == RemovalPolicy::Immediate {
            swapper.clear_previous(view);
        }
        drop(swapper);

        self.spawn_fetch(map, generation, policy, lifetime);
        debug!(
            data_source = %self.data_source,
            generation,
            policy = ?policy,
            "Fetch issued"
        );
        UpdateOutcome::FetchIssued { generation }
    }

    fn spawn_fetch(
        self: &Arc<Self>,
        map: &MapHandle,
        generation: u64,
        policy: RemovalPolicy,
        lifetime: CancellationToken,
    ) {
        let shared = Arc::clone(self);
        let map = map.clone();
        let runtime = map.runtime().clone();
        runtime.spawn(async move {
            let features = shared.fetch().await;
            let data_source = shared.data_source.clone();
            let render_map = map.clone();
            let dispatched = map.render().dispatch(move || {
                shared.commit(generation, features, policy, &render_map, &lifetime);
            });
            if !dispatched {
                debug!(%data_source, generation, "Rendering context closed, dropping fetch result");
            }
        });
    }

    /// Tile overlay (if tiled) followed by the feature repository's set.
    /// A failing feature repository contributes nothing.
    async fn fetch(&self) -> AnnotationsAndOverlays {
        let tiles = match &self.sources.tiles {
            Some(_) => AnnotationsAndOverlays::new(
                Vec::new(),
                vec![Overlay::tile(
                    self.data_source.clone(),
                    self.config.tile_size,
                    self.config.min_zoom,
                )],
            ),
            None => AnnotationsAndOverlays::empty(),
        };

        let features = match &self.sources.features {
            Some(repository) => fetch_features(repository.as_ref(), &self.data_source).await,
            None => AnnotationsAndOverlays::empty(),
        };

        tiles.merged(features)
    }

    fn commit(
        self: &Arc<Self>,
        generation: u64,
        features: AnnotationsAndOverlays,
        policy: RemovalPolicy,
        map: &MapHandle,
        lifetime: &CancellationToken,
    ) -> CommitOutcome {
        if lifetime.is_cancelled() {
            debug!(data_source = %self.data_source, generation, "Layer removed, discarding fetch result");
            return CommitOutcome::Discarded;
        }
        if self.config.fetch_ordering == FetchOrdering::LatestIssued {
            let latest = self.generation.load(Ordering::SeqCst);
            if generation != latest {
                debug!(
                    data_source = %self.data_source,
                    generation,
                    latest,
                    "Discarding stale fetch result"
                );
                return CommitOutcome::Discarded;
            }
        }

        let z_order = self.state.lock().order;
        let count = features.len();
        let displaced = self.swapper.lock().commit(features, map.view(), z_order);
        if let RemovalPolicy::Deferred(delay) = policy {
            self.schedule_cleanup(map, generation, delay, lifetime);
        }

        debug!(
            data_source = %self.data_source,
            generation,
            features = count,
            displaced,
            "Features committed"
        );
        CommitOutcome::Applied { displaced }
    }

    /// Clear `previous` after `delay`, unless a newer cycle got there first
    /// or the layer is removed.
    fn schedule_cleanup(
        self: &Arc<Self>,
        map: &MapHandle,
        generation: u64,
        delay: Duration,
        lifetime: &CancellationToken,
    ) {
        let token = lifetime.child_token();
        let weak = Arc::downgrade(self);
        let map = map.clone();
        let runtime = map.runtime().clone();
        runtime.spawn(async move {
            tokio::select! {
                biased;

                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            let render_map = map.clone();
            map.render().dispatch(move || {
                if token.is_cancelled() {
                    return;
                }
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                let cleared = shared
                    .swapper
                    .lock()
                    .clear_previous_for(render_map.view(), generation);
                trace!(data_source = %shared.data_source, generation, cleared, "Deferred cleanup");
            });
        });
    }

    fn apply_preference(&self, change: PreferenceChange) {
        self.edit_preferences(|show, order| match change {
            PreferenceChange::Visibility(v) => *show = v,
            PreferenceChange::Order(o) => *order = o,
        });
    }

    fn apply_preferences(&self, visibility: bool, order: i64) -> bool {
        self.edit_preferences(|show, current_order| {
            *show = visibility;
            *current_order = order;
        })
    }

    /// Read, edit and store `(show, order)` under one lock. Returns whether
    /// either changed.
    ///
    /// A refresh is requested only when the drawn result can differ: the
    /// order changed, or the effective visibility did. Toggling `show` on an
    /// always-shown layer is recorded without a refresh.
    fn edit_preferences(&self, edit: impl FnOnce(&mut bool, &mut i64)) -> bool {
        let always_show = self.sources.always_show();
        let (visibility, order, session) = {
            let mut state = self.state.lock();
            let (mut show, mut order) = (state.show, state.order);
            edit(&mut show, &mut order);
            if show == state.show && order == state.order {
                return false;
            }
            let was_visible = state.show || always_show;
            let redraw = order != state.order || (show || always_show) != was_visible;
            state.show = show;
            state.order = order;
            let session = if redraw {
                state.attachment.as_ref().and_then(|a| a.session.upgrade())
            } else {
                None
            };
            (show, order, session)
        };

        debug!(data_source = %self.data_source, visibility, order, "Preferences applied");
        if let Some(session) = session {
            self.coordinator.request_refresh(&session, RefreshTrigger::Settings);
        }
        true
    }
}

async fn fetch_features(
    repository: &dyn FeatureRepository,
    data_source: &DataSourceKey,
) -> AnnotationsAndOverlays {
    match repository.annotations_and_overlays().await {
        Ok(features) => features,
        Err(e) => {
            warn!(%data_source, error = %e, "Feature fetch failed, showing no features");
            AnnotationsAndOverlays::empty()
        }
    }
}

/// Request a refresh if both the layer and the session are still alive.
fn request_refresh(
    shared: &Weak<LayerShared>,
    session: &Weak<MapSessionState>,
    trigger: RefreshTrigger,
) -> bool {
    match (shared.upgrade(), session.upgrade()) {
        (Some(shared), Some(session)) => {
            shared.coordinator.request_refresh(&session, trigger);
            true
        }
        _ => false,
    }
}

/// Dispatch an update whenever the session records a change for this layer.
fn spawn_session_listener(
    shared: &Arc<LayerShared>,
    map: &MapHandle,
    session: &Arc<MapSessionState>,
    token: CancellationToken,
) {
    let mut rx = session.subscribe();
    let weak = Arc::downgrade(shared);
    let weak_session = Arc::downgrade(session);
    let key = shared.coordinator.refresh_key().clone();
    let map = map.clone();
    let runtime = map.runtime().clone();

    runtime.spawn(async move {
        loop {
            let stale = tokio::select! {
                biased;

                _ = token.cancelled() => break,

                result = rx.recv() => match result {
                    Ok(change) => change.key == key,
                    Err(RecvError::Lagged(missed)) => {
                        trace!(refresh_key = %key, missed, "Session listener lagged");
                        true
                    }
                    Err(RecvError::Closed) => break,
                }
            };
            if !stale {
                continue;
            }

            let weak = weak.clone();
            let weak_session = weak_session.clone();
            let render_map = map.clone();
            let job_token = token.clone();
            let dispatched = map.render().dispatch(move || {
                if job_token.is_cancelled() {
                    return;
                }
                if let (Some(shared), Some(session)) = (weak.upgrade(), weak_session.upgrade()) {
                    shared.update(&render_map, &session);
                }
            });
            if !dispatched {
                debug!(refresh_key = %key, "Rendering context closed, stopping session listener");
                break;
            }
        }
    });
}

/// Turn repository refresh events into data-arrived refreshes.
fn spawn_refresh_listener(
    shared: &Arc<LayerShared>,
    map: &MapHandle,
    session: &Arc<MapSessionState>,
    mut events: tokio::sync::broadcast::Receiver<Timestamp>,
    token: CancellationToken,
) {
    let weak = Arc::downgrade(shared);
    let weak_session = Arc::downgrade(session);
    let data_source = shared.data_source.clone();

    map.runtime().spawn(async move {
        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => break,

                result = events.recv() => match result {
                    Ok(_) | Err(RecvError::Lagged(_)) => {
                        trace!(%data_source, "Repository reported new data");
                        if !request_refresh(&weak, &weak_session, RefreshTrigger::NewData) {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => {
                        debug!(%data_source, "Repository refresh events closed");
                        break;
                    }
                }
            }
        }
    });
}

/// Invalidate the cache and refresh at once when the application announces
/// a change to this layer's data.
fn spawn_data_change_listener(
    shared: &Arc<LayerShared>,
    map: &MapHandle,
    session: &Arc<MapSessionState>,
    bus: &DataChangeBus,
    token: CancellationToken,
) {
    let mut rx = bus.subscribe();
    let weak = Arc::downgrade(shared);
    let weak_session = Arc::downgrade(session);
    let data_source = shared.data_source.clone();
    let tiles: Option<Arc<dyn TileRepository>> = shared.sources.tiles.clone();

    map.runtime().spawn(async move {
        loop {
            let relevant = tokio::select! {
                biased;

                _ = token.cancelled() => break,

                result = rx.recv() => match result {
                    Ok(notification) if notification.data_source == data_source => {
                        debug!(%data_source, reason = %notification.reason, "Data changed");
                        true
                    }
                    Ok(_) => false,
                    Err(RecvError::Lagged(missed)) => {
                        trace!(%data_source, missed, "Data-change listener lagged");
                        true
                    }
                    Err(RecvError::Closed) => break,
                }
            };
            if !relevant {
                continue;
            }

            if let Some(tiles) = &tiles {
                tiles.clear_cache().await;
            }
            if !request_refresh(&weak, &weak_session, RefreshTrigger::Settings) {
                break;
            }
        }
    });
}

/// Hit test every layer at once and merge the results.
///
/// Layers that are gated out contribute nothing.
pub async fn hit_test_all(
    layers: &[LayerController],
    tap: TapQuery,
    map: &MapHandle,
) -> HashMap<DataSourceKey, Vec<String>> {
    let results = join_all(layers.iter().map(|layer| layer.hit_test(tap, map))).await;
    let mut merged: HashMap<DataSourceKey, Vec<String>> = HashMap::new();
    for (data_source, keys) in results.into_iter().flatten() {
        merged.entry(data_source).or_default().extend(keys);
    }
    merged
}

/// Builder for [`LayerController`].
#[derive(Default)]
pub struct LayerControllerBuilder {
    sources: LayerSources,
    settings: Option<Arc<dyn SettingsStore>>,
    data_changes: Option<DataChangeBus>,
    refresh_key: Option<RefreshKey>,
    renderers: RendererRegistry,
    config: LayerConfig,
}

impl LayerControllerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tile_repository(mut self, repository: Arc<dyn TileRepository>) -> Self {
        self.sources.tiles = Some(repository);
        self
    }

    pub fn feature_repository(mut self, repository: Arc<dyn FeatureRepository>) -> Self {
        self.sources.features = Some(repository);
        self
    }

    /// Preference store to follow. Without one, only
    /// [`LayerController::apply_preferences`] changes visibility.
    pub fn settings(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings = Some(store);
        self
    }

    pub fn data_changes(mut self, bus: DataChangeBus) -> Self {
        self.data_changes = Some(bus);
        self
    }

    /// Override the session slot, which otherwise derives from the data
    /// source key.
    pub fn refresh_key(mut self, key: RefreshKey) -> Self {
        self.refresh_key = Some(key);
        self
    }

    pub fn renderers(mut self, renderers: RendererRegistry) -> Self {
        self.renderers = renderers;
        self
    }

    pub fn config(mut self, config: LayerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> LayerController {
        let data_source = self.sources.data_source_key();
        let refresh_key = self
            .refresh_key
            .unwrap_or_else(|| RefreshKey::for_data_source(&data_source));
        let query = SpatialQueryEngine::new(
            self.sources.tiles.clone(),
            data_source.clone(),
            self.config.min_zoom,
        );

        LayerController {
            shared: Arc::new(LayerShared {
                coordinator: RefreshCoordinator::new(refresh_key, self.config.cleanup_delay),
                data_source,
                query,
                sources: self.sources,
                config: self.config,
                renderers: self.renderers,
                settings: self.settings,
                data_changes: self.data_changes,
                generation: AtomicU64::new(0),
                state: Mutex::new(LayerState {
                    show: false,
                    order: crate::settings::DEFAULT_ORDER,
                    last_change: None,
                    lifetime: CancellationToken::new(),
                    attachment: None,
                }),
                swapper: Mutex::new(FeatureSwapper::new()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{Annotation, OverlayTag, RendererStyle};
    use crate::geo::Coordinate;
    use crate::map_view::{HeadlessMapView, RenderContext, RenderLoop};
    use crate::repository::{BoxFuture, RepositoryError};

    struct StaticFeatures {
        count: usize,
        fail: bool,
    }

    impl FeatureRepository for StaticFeatures {
        fn data_source_key(&self) -> DataSourceKey {
            DataSourceKey::new("obs")
        }

        fn annotations_and_overlays(
            &self,
        ) -> BoxFuture<'_, Result<AnnotationsAndOverlays, RepositoryError>> {
            Box::pin(async move {
                if self.fail {
                    return Err(RepositoryError::Query("boom".into()));
                }
                Ok(annotations(self.count))
            })
        }
    }

    fn annotations(count: usize) -> AnnotationsAndOverlays {
        let annotations = (0..count)
            .map(|i| {
                Annotation::new(DataSourceKey::new("obs"), i.to_string(), Coordinate::new(1.0, 1.0))
            })
            .collect();
        AnnotationsAndOverlays::new(annotations, Vec::new())
    }

    struct Harness {
        view: Arc<HeadlessMapView>,
        map: MapHandle,
        render_loop: RenderLoop,
        session: Arc<MapSessionState>,
    }

    impl Harness {
        fn new() -> Self {
            let view = Arc::new(HeadlessMapView::default());
            let (render, render_loop) = RenderContext::new();
            let map = MapHandle::on_current_runtime(view.clone(), render);
            Self {
                view,
                map,
                render_loop,
                session: Arc::new(MapSessionState::new()),
            }
        }

        /// Let spawned tasks run, then run what they dispatched.
        async fn settle(&mut self) {
            for _ in 0..5 {
                tokio::time::sleep(Duration::from_millis(1)).await;
                self.render_loop.drain();
            }
        }
    }

    fn controller(count: usize, fail: bool) -> LayerController {
        LayerController::builder()
            .feature_repository(Arc::new(StaticFeatures { count, fail }))
            .build()
    }

    #[test]
    fn test_builder_defaults() {
        let controller = controller(1, false);
        assert_eq!(controller.data_source_key().as_str(), "obs");
        assert_eq!(controller.refresh_key().as_str(), "obsMapDateUpdated");
        assert!(!controller.is_shown());
        assert!(!controller.is_attached());
        assert_eq!(controller.generation(), 0);
        assert_eq!(controller.config(), &LayerConfig::default());
    }

    #[test]
    fn test_custom_refresh_key() {
        let controller = LayerController::builder()
            .feature_repository(Arc::new(StaticFeatures {
                count: 0,
                fail: false,
            }))
            .refresh_key(RefreshKey::custom("ObservationMapDateUpdated"))
            .build();
        assert_eq!(controller.refresh_key().as_str(), "ObservationMapDateUpdated");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_update_fetches_nothing() {
        let h = Harness::new();
        let controller = controller(2, false);

        let outcome = controller.update(&h.map, &h.session);
        assert_eq!(outcome, UpdateOutcome::Hidden { generation: 1 });
        assert!(h.session.last_change(controller.refresh_key()).is_some());
        assert_eq!(h.view.feature_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_is_idle_without_session_change() {
        let mut h = Harness::new();
        let controller = controller(2, false);
        controller.apply_preferences(true, 0);

        assert!(matches!(
            controller.update(&h.map, &h.session),
            UpdateOutcome::FetchIssued { .. }
        ));
        h.settle().await;
        assert_eq!(controller.update(&h.map, &h.session), UpdateOutcome::Idle);
        assert_eq!(h.view.feature_count(), 2);
        assert_eq!(controller.current_features().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_feature_failure_degrades_to_empty() {
        let mut h = Harness::new();
        let controller = controller(2, true);
        controller.apply_preferences(true, 0);

        controller.update(&h.map, &h.session);
        h.settle().await;
        assert!(controller.current_features().is_empty());
        assert_eq!(h.view.feature_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_generation_is_discarded() {
        let h = Harness::new();
        let controller = controller(1, false);
        controller.apply_preferences(true, 0);

        controller.update(&h.map, &h.session);
        h.session.touch(controller.refresh_key());
        controller.update(&h.map, &h.session);
        assert_eq!(controller.generation(), 2);

        let outcome = controller.commit(1, annotations(3), RemovalPolicy::Immediate, &h.map);
        assert_eq!(outcome, CommitOutcome::Discarded);
        assert_eq!(h.view.feature_count(), 0);

        let outcome = controller.commit(2, annotations(1), RemovalPolicy::Immediate, &h.map);
        assert_eq!(outcome, CommitOutcome::Applied { displaced: 0 });
        assert_eq!(h.view.feature_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latest_completed_applies_stale_result() {
        let h = Harness::new();
        let controller = LayerController::builder()
            .feature_repository(Arc::new(StaticFeatures {
                count: 1,
                fail: false,
            }))
            .config(LayerConfig::default().with_fetch_ordering(FetchOrdering::LatestCompleted))
            .build();
        controller.apply_preferences(true, 0);

        controller.update(&h.map, &h.session);
        h.session.touch(controller.refresh_key());
        controller.update(&h.map, &h.session);

        controller.commit(2, annotations(1), RemovalPolicy::Immediate, &h.map);
        let outcome = controller.commit(1, annotations(3), RemovalPolicy::Immediate, &h.map);
        assert_eq!(outcome, CommitOutcome::Applied { displaced: 1 });
        assert_eq!(h.view.feature_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_discards_in_flight_result() {
        let mut h = Harness::new();
        let controller = controller(2, false);
        controller.apply_preferences(true, 0);

        controller.update(&h.map, &h.session);
        assert_eq!(controller.remove(&h.map, &h.session), 0);
        h.settle().await;
        assert_eq!(h.view.feature_count(), 0);
        assert_eq!(controller.remove(&h.map, &h.session), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_preferences_reports_changes() {
        let controller = controller(0, false);
        assert!(controller.apply_preferences(true, 0));
        assert!(!controller.apply_preferences(true, 0));
        assert!(controller.apply_preferences(true, 3));
        assert!(controller.is_shown());
        assert_eq!(controller.order(), 3);
    }

    #[test]
    fn test_single_preference_keeps_the_other() {
        let controller = controller(0, false);
        controller.apply_preferences(true, 2);

        controller.shared.apply_preference(PreferenceChange::Order(4));
        assert!(controller.is_shown());
        assert_eq!(controller.order(), 4);

        controller.shared.apply_preference(PreferenceChange::Visibility(false));
        assert!(!controller.is_shown());
        assert_eq!(controller.order(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_committed_overlays_use_order_as_z() {
        let mut h = Harness::new();
        let controller = LayerController::builder()
            .tile_repository(Arc::new(NoItems))
            .build();
        controller.apply_preferences(true, 7);

        controller.update(&h.map, &h.session);
        h.settle().await;
        let overlays = h.view.overlays();
        assert_eq!(overlays.len(), 1);
        assert_eq!(overlays[0].tag(), OverlayTag::Tile);
        assert_eq!(h.view.z_order_of(overlays[0].id), Some(7));
    }

    #[test]
    fn test_renderer_for_uses_registry() {
        let registry = RendererRegistry::new().with(OverlayTag::Tile, |overlay| Renderer {
            overlay: overlay.id,
            style: RendererStyle::Tile { tile_size: 256 },
        });
        let controller = LayerController::builder()
            .tile_repository(Arc::new(NoItems))
            .renderers(registry)
            .build();
        let overlay = Overlay::tile(DataSourceKey::new("tiles"), 512, 2);
        assert_eq!(
            controller.renderer_for(&overlay).style,
            RendererStyle::Tile { tile_size: 256 }
        );
    }

    struct NoItems;

    impl TileRepository for NoItems {
        fn data_source_key(&self) -> DataSourceKey {
            DataSourceKey::new("tiles")
        }

        fn tileable_items(
            &self,
            _query: crate::repository::TileQuery,
        ) -> BoxFuture<'_, Result<Vec<MapItem>, RepositoryError>> {
            Box::pin(async { Ok(Vec::new()) })
        }

        fn item_keys(
            &self,
            _query: crate::repository::TileQuery,
        ) -> BoxFuture<'_, Result<Vec<String>, RepositoryError>> {
            Box::pin(async { Ok(Vec::new()) })
        }

        fn clear_cache(&self) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
    }
}
