//! The matrix proxy core.
//!
//! An [`AnnoMatrix`] owns the authoritative schema, its own dimensionality, and per-field
//! caches of loaded columns. Callers see it as immutable: every observable change (schema,
//! dimensions, column data) produces a new instance. Internally the cache, the where-cache,
//! the pending-load table and the access table are populated lazily behind one mutex, which is
//! only ever held for synchronous sections and never across an `.await`.

use crate::config::ProxyConfig;
use crate::error::{MatrixError, Result};
use crate::field::{Field, PerField};
use crate::gc::{select_victims, AccessClock, GcHints};
use crate::memo::{MemoStats, SubsetMemo};
use crate::query::{NormalizedQuery, Query, QueryKey};
use crate::schema::{ColumnSchema, IndexedSchema};
use crate::view::ViewTransform;
use crate::where_cache::WhereCache;
use annomatrix_frame::{Dataframe, RowIndex};
use futures_util::future::{try_join_all, BoxFuture, Shared};
use futures_util::FutureExt;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Columns evicted between a load completing and the result being read trigger a re-plan; this
/// bounds how often that may happen within one `fetch`. Labels known when the fetch plans are
/// pinned, so only labels learned from a load can be lost this way.
const MAX_FETCH_ATTEMPTS: usize = 3;

/// Advisory request to linearly digitize continuous data into `nbins` buckets in transit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BinningHint {
    pub nbins: u32,
}

impl BinningHint {
    pub fn new(nbins: u32) -> Self {
        Self { nbins }
    }

    /// Whether the hint means anything for `query`. Categorical, integer, string and
    /// embedding data is never digitized.
    pub fn applies_to(&self, schema: &IndexedSchema, query: &NormalizedQuery) -> bool {
        match (query.field, &query.query) {
            (Field::Obs | Field::Var, Query::Column(name)) => schema
                .annotation(query.field, name)
                .is_some_and(|col| col.column_type.is_continuous()),
            (Field::X, _) => schema.matrix_type().is_continuous(),
            _ => false,
        }
    }
}

/// One load the proxy needs from its data source.
#[derive(Clone, Debug)]
pub struct LoadRequest {
    pub query: NormalizedQuery,
    pub hint: Option<BinningHint>,
    pub schema: Arc<IndexedSchema>,
}

impl LoadRequest {
    pub fn field(&self) -> Field {
        self.query.field
    }
}

#[derive(Clone, Debug)]
pub struct LoadResult {
    /// Where-cache contribution of this load.
    pub where_update: WhereCache,
    pub frame: Dataframe,
}

/// The data source behind a root proxy.
pub trait MatrixLoader: fmt::Debug + Send + Sync {
    fn load(&self, request: LoadRequest) -> BoxFuture<'static, Result<LoadResult>>;

    /// Clone hook: produce the loader a cloned proxy should use.
    ///
    /// Per-instance state (such as an admission window) must not be shared with the fork.
    fn fork(&self) -> Arc<dyn MatrixLoader>;
}

#[derive(Debug)]
pub enum ProxyKind {
    Root(Arc<dyn MatrixLoader>),
    View {
        parent: Arc<AnnoMatrix>,
        transform: ViewTransform,
    },
}

type SharedLoad = Shared<BoxFuture<'static, Result<()>>>;

struct PendingLoad {
    /// Labels the load is known to produce; GC leaves them alone while it is in flight.
    labels: Vec<String>,
    load: SharedLoad,
}

pub(crate) struct CacheState {
    pub(crate) cache: PerField<Dataframe>,
    pub(crate) where_cache: WhereCache,
    pending: PerField<HashMap<QueryKey, PendingLoad>>,
    gc_info: PerField<HashMap<String, u64>>,
    /// Reader counts of labels in-progress fetches are about to read.
    pinned: PerField<HashMap<String, usize>>,
}

impl CacheState {
    fn empty(rows: impl Fn(Field) -> RowIndex) -> Self {
        Self {
            cache: PerField::from_fn(|field| Dataframe::empty(rows(field))),
            where_cache: WhereCache::new(),
            pending: PerField::from_fn(|_| HashMap::new()),
            gc_info: PerField::from_fn(|_| HashMap::new()),
            pinned: PerField::from_fn(|_| HashMap::new()),
        }
    }

    /// Copy for a clone: caches carry over, in-flight loads, pins and access times do not.
    fn forked(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            where_cache: self.where_cache.clone(),
            pending: PerField::from_fn(|_| HashMap::new()),
            gc_info: PerField::from_fn(|_| HashMap::new()),
            pinned: PerField::from_fn(|_| HashMap::new()),
        }
    }

    fn pending_labels(&self, field: Field) -> impl Iterator<Item = &str> {
        self.pending
            .get(field)
            .values()
            .flat_map(|pending| pending.labels.iter().map(String::as_str))
    }
}

/// Labels one `fetch` has pinned against eviction; released on drop, including when the
/// caller abandons the fetch.
struct FetchPins {
    state: Arc<Mutex<CacheState>>,
    field: Field,
    labels: HashSet<String>,
}

impl FetchPins {
    fn new(state: &Arc<Mutex<CacheState>>, field: Field) -> Self {
        Self {
            state: Arc::clone(state),
            field,
            labels: HashSet::new(),
        }
    }

    fn pin(&mut self, state: &mut CacheState, labels: impl IntoIterator<Item = String>) {
        let counts = state.pinned.get_mut(self.field);
        for label in labels {
            if self.labels.insert(label.clone()) {
                *counts.entry(label).or_insert(0) += 1;
            }
        }
    }
}

impl Drop for FetchPins {
    fn drop(&mut self) {
        if self.labels.is_empty() {
            return;
        }
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let counts = state.pinned.get_mut(self.field);
        for label in &self.labels {
            if let Some(count) = counts.get_mut(label) {
                *count -= 1;
                if *count == 0 {
                    counts.remove(label);
                }
            }
        }
    }
}

/// A proxy over an annotated matrix dataset.
pub struct AnnoMatrix {
    pub(crate) schema: Arc<IndexedSchema>,
    pub(crate) obs_index: RowIndex,
    pub(crate) n_var: usize,
    pub(crate) kind: ProxyKind,
    pub(crate) config: ProxyConfig,
    memo: Arc<SubsetMemo>,
    clock: Arc<AccessClock>,
    pub(crate) state: Arc<Mutex<CacheState>>,
}

impl AnnoMatrix {
    /// A root proxy over the full dataset described by `schema`.
    pub fn new(
        schema: IndexedSchema,
        loader: Arc<dyn MatrixLoader>,
        config: ProxyConfig,
    ) -> Arc<Self> {
        let config = config.sanitized();
        let obs_index = RowIndex::identity(schema.n_obs());
        let n_var = schema.n_var();
        let memo = Arc::new(SubsetMemo::new(config.subset_memo_entries));
        Arc::new(Self::assemble(
            Arc::new(schema),
            obs_index,
            n_var,
            ProxyKind::Root(loader),
            config,
            memo,
            Arc::new(AccessClock::default()),
        ))
    }

    /// A derived proxy with fresh caches over `parent`.
    pub(crate) fn new_view(
        parent: &Arc<AnnoMatrix>,
        transform: ViewTransform,
        obs_index: RowIndex,
    ) -> Self {
        Self::assemble(
            Arc::clone(&parent.schema),
            obs_index,
            parent.n_var,
            ProxyKind::View {
                parent: Arc::clone(parent),
                transform,
            },
            parent.config,
            Arc::clone(&parent.memo),
            Arc::clone(&parent.clock),
        )
    }

    fn assemble(
        schema: Arc<IndexedSchema>,
        obs_index: RowIndex,
        n_var: usize,
        kind: ProxyKind,
        config: ProxyConfig,
        memo: Arc<SubsetMemo>,
        clock: Arc<AccessClock>,
    ) -> Self {
        let state = CacheState::empty(|field| rows_for(&obs_index, n_var, field));
        Self {
            schema,
            obs_index,
            n_var,
            kind,
            config,
            memo,
            clock,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Clone protocol.
    ///
    /// The copy shares schema, dimensions and cached column payloads, but owns fresh
    /// pending-load and access tables. A root's loader goes through its [`MatrixLoader::fork`]
    /// hook. Callers adjust the returned instance before publishing it and never after.
    pub fn clone_proxy(&self) -> AnnoMatrix {
        let kind = match &self.kind {
            ProxyKind::Root(loader) => ProxyKind::Root(loader.fork()),
            ProxyKind::View { parent, transform } => ProxyKind::View {
                parent: Arc::clone(parent),
                transform: transform.clone(),
            },
        };
        let state = self.lock_state().forked();
        Self {
            schema: Arc::clone(&self.schema),
            obs_index: self.obs_index.clone(),
            n_var: self.n_var,
            kind,
            config: self.config,
            memo: Arc::clone(&self.memo),
            clock: Arc::clone(&self.clock),
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Clone with a replacement schema; used by the mutation family.
    pub(crate) fn clone_with_schema(&self, schema: IndexedSchema) -> AnnoMatrix {
        let mut clone = self.clone_proxy();
        clone.schema = Arc::new(schema);
        clone
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().expect("proxy cache mutex poisoned")
    }

    pub fn schema(&self) -> &IndexedSchema {
        &self.schema
    }

    pub fn n_obs(&self) -> usize {
        self.obs_index.len()
    }

    pub fn n_var(&self) -> usize {
        self.n_var
    }

    /// Row labels of this proxy, in base-dataset numbering.
    pub fn obs_index(&self) -> &RowIndex {
        &self.obs_index
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn kind(&self) -> &ProxyKind {
        &self.kind
    }

    pub fn is_view(&self) -> bool {
        matches!(self.kind, ProxyKind::View { .. })
    }

    /// Walk the view chain to the root proxy.
    pub fn base(self: &Arc<Self>) -> Arc<AnnoMatrix> {
        let mut current = Arc::clone(self);
        loop {
            let next = match &current.kind {
                ProxyKind::View { parent, .. } => Arc::clone(parent),
                ProxyKind::Root(_) => return current,
            };
            current = next;
        }
    }

    pub fn memo_stats(&self) -> MemoStats {
        self.memo.stats()
    }

    pub(crate) fn rows(&self, field: Field) -> RowIndex {
        rows_for(&self.obs_index, self.n_var, field)
    }

    /// Resolve `queries` against `field`, loading whatever is not cached yet.
    ///
    /// The result holds exactly the resolved columns of every sub-query, in query order and
    /// without duplicates. Repeating an identical fetch against an unchanged cache returns the
    /// same frame instance.
    pub async fn fetch(
        &self,
        field: Field,
        queries: &[Query],
        hint: Option<BinningHint>,
    ) -> Result<Dataframe> {
        let queries = queries
            .iter()
            .cloned()
            .map(|query| NormalizedQuery::new(field, query, &self.schema))
            .collect::<Result<Vec<_>>>()?;

        let mut pins = FetchPins::new(&self.state, field);
        for attempt in 1..=MAX_FETCH_ATTEMPTS {
            let loads = self.plan_loads(field, &queries, hint, &mut pins);
            if !loads.is_empty() {
                try_join_all(loads).await?;
            }
            if let Some(frame) = self.select_resolved(field, &queries)? {
                return Ok(frame);
            }
            log::debug!("{field} columns evicted before they were read (attempt {attempt})");
        }

        let queries = queries
            .iter()
            .map(|q| q.key.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Err(MatrixError::Evicted { field, queries })
    }

    /// Fire-and-forget [`fetch`](Self::fetch). Failures are logged, never returned.
    pub fn prefetch(self: &Arc<Self>, field: Field, queries: Vec<Query>, hint: Option<BinningHint>) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                log::warn!("prefetch of {field} skipped: no async runtime");
                return;
            }
        };
        let this = Arc::clone(self);
        handle.spawn(async move {
            if let Err(err) = this.fetch(field, &queries, hint).await {
                log::warn!("prefetch of {field} failed: {err}");
            }
        });
    }

    /// Sweep cached columns down to the configured caps.
    ///
    /// A hot sweep only targets the main matrix; a cold sweep targets every field.
    pub fn gc(&self, hints: GcHints) {
        let caps = *self.config.gc.caps(hints.is_hot);
        let fields: &[Field] = if hints.is_hot { &[Field::X] } else { &Field::ALL };
        let mut state = self.lock_state();
        for &field in fields {
            self.sweep(&mut state, field, caps.get(field), &HashSet::new());
        }
    }

    fn sweep(&self, state: &mut CacheState, field: Field, cap: usize, keep: &HashSet<String>) {
        let pending: HashSet<&str> = state.pending_labels(field).collect();
        let pinned = state.pinned.get(field);
        let victims = select_victims(
            state.cache.get(field).labels().iter().map(String::as_str),
            cap,
            |label| {
                keep.contains(label)
                    || pending.contains(label)
                    || pinned.contains_key(label)
                    || self.schema.is_writable(field, label)
            },
            state.gc_info.get(field),
        );
        if victims.is_empty() {
            return;
        }
        log::debug!("gc evicting {} {field} columns", victims.len());
        let pruned = state.cache.get(field).drop_columns(&victims);
        *state.cache.get_mut(field) = pruned;
        let access = state.gc_info.get_mut(field);
        for label in &victims {
            access.remove(label);
        }
    }

    /// Partition queries into cached and to-load, pin every label already known, sweep the main
    /// matrix, and join or start one shared load per unresolved query.
    fn plan_loads(
        &self,
        field: Field,
        queries: &[NormalizedQuery],
        hint: Option<BinningHint>,
        pins: &mut FetchPins,
    ) -> Vec<SharedLoad> {
        let mut state = self.lock_state();
        let mut referenced = HashSet::new();
        let mut missing = Vec::new();
        for query in queries {
            let cached = match state.where_cache.resolve(query, &self.schema) {
                Some(labels) => {
                    let cache = state.cache.get(field);
                    let all_cached = labels.iter().all(|label| cache.has_column(label));
                    referenced.extend(labels);
                    all_cached
                }
                None => false,
            };
            if !cached {
                referenced.extend(query.static_labels(&self.schema).unwrap_or_default());
                missing.push(query);
            }
        }
        pins.pin(&mut state, referenced.iter().cloned());

        if field == Field::X {
            self.sweep(&mut state, field, self.config.gc.hot.x, &referenced);
        }

        let mut loads = Vec::with_capacity(missing.len());
        for query in missing {
            loads.push(self.join_or_start(&mut state, query, hint));
        }
        loads
    }

    fn join_or_start(
        &self,
        state: &mut CacheState,
        query: &NormalizedQuery,
        hint: Option<BinningHint>,
    ) -> SharedLoad {
        if let Some(pending) = state.pending.get(query.field).get(&query.key) {
            log::debug!("joining pending {} load {}", query.field, query.key);
            return pending.load.clone();
        }

        let hint = hint.filter(|hint| hint.applies_to(&self.schema, query));
        log::debug!("starting {} load {}", query.field, query.key);
        let load = self.start_load(query.clone(), hint);
        let shared_state = Arc::downgrade(&self.state);
        let schema = Arc::clone(&self.schema);
        let finished = query.clone();
        let driver = async move {
            let outcome = match load.await {
                Ok(result) => checked_result(&schema, &finished, result),
                Err(err) => Err(err),
            };
            finish_load(&shared_state, &finished, outcome)
        }
        .boxed();
        let shared = spawn_on_runtime(driver, Arc::downgrade(&self.state), query.clone()).shared();

        state.pending.get_mut(query.field).insert(
            query.key.clone(),
            PendingLoad {
                labels: query.static_labels(&self.schema).unwrap_or_default(),
                load: shared.clone(),
            },
        );
        shared
    }

    /// The single primitive that depends on what backs this proxy.
    fn start_load(
        &self,
        query: NormalizedQuery,
        hint: Option<BinningHint>,
    ) -> BoxFuture<'static, Result<LoadResult>> {
        match &self.kind {
            ProxyKind::Root(loader) => loader.load(LoadRequest {
                query,
                hint,
                schema: Arc::clone(&self.schema),
            }),
            ProxyKind::View { parent, transform } => {
                let parent = Arc::clone(parent);
                let transform = transform.clone();
                async move {
                    let field = query.field;
                    let frame = parent
                        .fetch(field, std::slice::from_ref(&query.query), hint)
                        .await?;
                    let where_update = WhereCache::for_result(&query, frame.labels().to_vec());
                    let frame = transform.apply(field, &frame)?;
                    Ok(LoadResult {
                        where_update,
                        frame,
                    })
                }
                .boxed()
            }
        }
    }

    fn select_resolved(
        &self,
        field: Field,
        queries: &[NormalizedQuery],
    ) -> Result<Option<Dataframe>> {
        let (source, labels) = {
            let mut state = self.lock_state();
            let mut seen = HashSet::new();
            let mut labels = Vec::new();
            for query in queries {
                let Some(resolved) = state.where_cache.resolve(query, &self.schema) else {
                    return Ok(None);
                };
                for label in resolved {
                    if seen.insert(label.clone()) {
                        labels.push(label);
                    }
                }
            }
            let source = state.cache.get(field).clone();
            if !labels.iter().all(|label| source.has_column(label)) {
                return Ok(None);
            }
            let now = self.clock.tick();
            let access = state.gc_info.get_mut(field);
            for label in &labels {
                access.insert(label.clone(), now);
            }
            (source, labels)
        };
        self.memo.select(&source, &labels).map(Some)
    }

    /// Labels of `query` currently resident in the cache. Empty when unresolved or invalid.
    pub fn get_cache_keys(&self, field: Field, query: &Query) -> Vec<String> {
        let Ok(query) = NormalizedQuery::new(field, query.clone(), &self.schema) else {
            return Vec::new();
        };
        let state = self.lock_state();
        let cache = state.cache.get(field);
        state
            .where_cache
            .resolve(&query, &self.schema)
            .unwrap_or_default()
            .into_iter()
            .filter(|label| cache.has_column(label))
            .collect()
    }

    pub fn get_column_schema(&self, field: Field, column: &str) -> Option<ColumnSchema> {
        match field {
            Field::Obs | Field::Var => self.schema.annotation(field, column).cloned(),
            Field::X => self
                .is_matrix_label(column)
                .then(|| ColumnSchema::new(column, self.schema.matrix_type())),
            Field::Emb => self
                .schema
                .embedding(column)
                .map(|emb| ColumnSchema::new(emb.name.clone(), emb.data_type)),
        }
    }

    /// Shape of one column of `field` in this proxy: `[rows]`, or `[rows, dims]` for a layout.
    pub fn get_column_dimensions(&self, field: Field, column: &str) -> Option<Vec<usize>> {
        match field {
            Field::Obs => self
                .schema
                .annotation(field, column)
                .map(|_| vec![self.n_obs()]),
            Field::Var => self
                .schema
                .annotation(field, column)
                .map(|_| vec![self.n_var]),
            Field::X => self.is_matrix_label(column).then(|| vec![self.n_obs()]),
            Field::Emb => self
                .schema
                .embedding(column)
                .map(|emb| vec![self.n_obs(), emb.dims.len()]),
        }
    }

    /// Every column name `field` declares. The main matrix is addressed by var offset.
    pub fn get_matrix_columns(&self, field: Field) -> Vec<String> {
        match field {
            Field::Obs | Field::Var => self
                .schema
                .annotations(field)
                .map(|annotations| annotations.columns.iter().map(|c| c.name.clone()).collect())
                .unwrap_or_default(),
            Field::X => (0..self.n_var).map(|offset| offset.to_string()).collect(),
            Field::Emb => self
                .schema
                .schema()
                .layout
                .obs
                .iter()
                .map(|emb| emb.name.clone())
                .collect(),
        }
    }

    fn is_matrix_label(&self, column: &str) -> bool {
        column.parse::<usize>().is_ok_and(|offset| offset < self.n_var)
            || self.lock_state().cache.x.has_column(column)
    }
}

impl fmt::Debug for AnnoMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnnoMatrix")
            .field("n_obs", &self.n_obs())
            .field("n_var", &self.n_var)
            .field("is_view", &self.is_view())
            .finish_non_exhaustive()
    }
}

/// Run a load to completion on the current runtime, independently of the callers awaiting it.
///
/// Without a runtime the load stays lazy and only progresses while some caller polls it.
fn spawn_on_runtime(
    driver: BoxFuture<'static, Result<()>>,
    state: Weak<Mutex<CacheState>>,
    query: NormalizedQuery,
) -> BoxFuture<'static, Result<()>> {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        return driver;
    };
    let task = handle.spawn(driver);
    async move {
        match task.await {
            Ok(outcome) => outcome,
            Err(err) => {
                log::warn!("{} load {} task failed: {err}", query.field, query.key);
                let err = MatrixError::Load {
                    field: query.field,
                    query: query.key.to_string(),
                    message: format!("load task failed: {err}"),
                    retryable: true,
                };
                finish_load(&state, &query, Err(err))
            }
        }
    }
    .boxed()
}

fn rows_for(obs_index: &RowIndex, n_var: usize, field: Field) -> RowIndex {
    match field {
        Field::Var => RowIndex::identity(n_var),
        Field::Obs | Field::X | Field::Emb => obs_index.clone(),
    }
}

/// Reject degenerate results and fill in the where-cache contribution of value-join loads.
fn checked_result(
    schema: &IndexedSchema,
    query: &NormalizedQuery,
    mut result: LoadResult,
) -> Result<LoadResult> {
    let field = query.field;
    if result.frame.is_empty() {
        return Err(MatrixError::EmptyLoadResult {
            field,
            query: query.key.to_string(),
        });
    }
    if let Some(label) = result
        .frame
        .labels()
        .iter()
        .find(|label| !schema.has_label(field, label))
    {
        return Err(MatrixError::Load {
            field,
            query: query.key.to_string(),
            message: format!("load returned undeclared column {label:?}"),
            retryable: false,
        });
    }
    match query.static_labels(schema) {
        Some(expected) => {
            if let Some(label) = expected.iter().find(|l| !result.frame.has_column(l)) {
                return Err(MatrixError::EmptyLoadResult {
                    field,
                    query: format!("{} (missing {label:?})", query.key),
                });
            }
        }
        None => {
            if result.where_update.get(field, &query.key).is_none() {
                result.where_update.insert(
                    field,
                    query.key.clone(),
                    result.frame.labels().to_vec(),
                );
            }
        }
    }
    Ok(result)
}

/// Clear the pending entry and, on success only, merge the load into the caches.
fn finish_load(
    state: &Weak<Mutex<CacheState>>,
    query: &NormalizedQuery,
    outcome: Result<LoadResult>,
) -> Result<()> {
    let field = query.field;
    let Some(state) = state.upgrade() else {
        // The proxy is gone; nobody can observe the merge.
        return outcome.map(|_| ());
    };
    let mut state = state.lock().expect("proxy cache mutex poisoned");
    state.pending.get_mut(field).remove(&query.key);
    let result = match outcome {
        Ok(result) => result,
        Err(err) => {
            log::debug!("{field} load {} failed: {err}", query.key);
            return Err(err);
        }
    };
    let merged = state.cache.get(field).with_columns_from(&result.frame)?;
    *state.cache.get_mut(field) = merged;
    state.where_cache.merge_from(&result.where_update);
    log::debug!(
        "{field} load {} merged {} columns",
        query.key,
        result.frame.column_count()
    );
    Ok(())
}
