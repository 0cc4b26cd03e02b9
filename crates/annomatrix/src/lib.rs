//! Client-side proxy and cache over a remote annotated matrix dataset.
//!
//! The dataset is partitioned into four [`Field`]s: row annotations (`obs`), column
//! annotations (`var`), the main matrix (`X`) and row embeddings (`emb`). An [`AnnoMatrix`]
//! fetches columns of a field on demand, coalesces concurrent identical loads, caches what it
//! loaded, and evicts by recency under pressure. It never changes once handed out: mutations
//! and views return new instances.
//!
//! Data comes from a [`MatrixLoader`]; [`RemoteLoader`] is the implementation backed by the
//! dataset service.

#![forbid(unsafe_code)]

mod admission;
mod config;
mod error;
mod field;
mod gc;
mod memo;
mod mutation;
mod proxy;
mod query;
mod remote;
mod schema;
mod view;
mod where_cache;

pub use crate::admission::{AdmissionPermit, AdmissionWindow, LoadPriority};
pub use crate::config::{FieldCaps, GcConfig, ProxyConfig};
pub use crate::error::{MatrixError, Result};
pub use crate::field::{Field, PerField};
pub use crate::gc::{select_victims, AccessClock, GcHints};
pub use crate::memo::{MemoStats, SubsetMemo};
pub use crate::mutation::ColumnInit;
pub use crate::proxy::{AnnoMatrix, BinningHint, LoadRequest, LoadResult, MatrixLoader, ProxyKind};
pub use crate::query::{
    NormalizedQuery, Query, QueryKey, SummarizePredicate, SummaryMethod, WherePredicate,
};
pub use crate::remote::{
    endpoint_path, DatasetClient, DatasetRequest, RemoteLoader, RemoteLoaderConfig,
    TransportError,
};
pub use crate::schema::{
    AnnotationSchema, AnnotationType, AnnotationsSchema, ColumnSchema, DataframeSchema,
    EmbeddingSchema, IndexedSchema, LayoutSchema, Schema,
};
pub use crate::view::ViewTransform;
pub use crate::where_cache::WhereCache;

pub use annomatrix_frame::{Column, ColumnType, Dataframe, FrameError, RowIndex, Value};
