//! Remote-backed loader.
//!
//! Routes each load to an endpoint of the dataset service, throttles loads through a
//! per-instance [`AdmissionWindow`], and decodes the Arrow IPC response.

use crate::admission::{AdmissionWindow, LoadPriority};
use crate::error::{MatrixError, Result};
use crate::field::Field;
use crate::proxy::{LoadRequest, LoadResult, MatrixLoader};
use crate::query::Query;
use crate::where_cache::WhereCache;
use annomatrix_frame::arrow::read_ipc_stream;
use bytes::Bytes;
use futures_util::future::{self, BoxFuture};
use futures_util::FutureExt;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Characters left unescaped in query-string values.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatasetRequest {
    pub field: Field,
    /// Endpoint path and query string, relative to the dataset root.
    pub path: String,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
    pub retryable: bool,
}

impl TransportError {
    pub fn new(message: impl Into<String>, retryable: bool) -> Self {
        Self {
            message: message.into(),
            retryable,
        }
    }
}

/// The transport to the dataset service.
pub trait DatasetClient: fmt::Debug + Send + Sync {
    fn resolve(
        &self,
        request: DatasetRequest,
    ) -> BoxFuture<'static, std::result::Result<Bytes, TransportError>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RemoteLoaderConfig {
    /// Size of the admission window (default: 5).
    pub max_inflight_loads: usize,
}

impl Default for RemoteLoaderConfig {
    fn default() -> Self {
        Self {
            max_inflight_loads: 5,
        }
    }
}

#[derive(Debug)]
pub struct RemoteLoader {
    client: Arc<dyn DatasetClient>,
    config: RemoteLoaderConfig,
    window: AdmissionWindow,
}

impl RemoteLoader {
    pub fn new(client: Arc<dyn DatasetClient>, mut config: RemoteLoaderConfig) -> Self {
        config.max_inflight_loads = config.max_inflight_loads.max(1);
        Self {
            window: AdmissionWindow::new(config.max_inflight_loads),
            client,
            config,
        }
    }

    pub fn config(&self) -> &RemoteLoaderConfig {
        &self.config
    }

    pub fn window(&self) -> &AdmissionWindow {
        &self.window
    }
}

impl MatrixLoader for RemoteLoader {
    fn load(&self, request: LoadRequest) -> BoxFuture<'static, Result<LoadResult>> {
        let path = match endpoint_path(&request) {
            Ok(path) => path,
            Err(err) => return future::ready(Err(err)).boxed(),
        };
        let client = Arc::clone(&self.client);
        let window = self.window.clone();
        let field = request.field();
        let priority = match field {
            Field::Emb => LoadPriority::Embedding,
            Field::Obs | Field::Var | Field::X => LoadPriority::Column,
        };

        async move {
            let query = &request.query;
            let _permit = window.acquire(priority).await;
            log::debug!("GET {path}");
            let buf = client
                .resolve(DatasetRequest {
                    field,
                    path: path.clone(),
                })
                .await
                .map_err(|err| MatrixError::Load {
                    field,
                    query: query.key.to_string(),
                    message: err.message,
                    retryable: err.retryable,
                })?;
            let frame = read_ipc_stream(&buf)?;
            if frame.is_empty() {
                return Err(MatrixError::EmptyLoadResult {
                    field,
                    query: query.key.to_string(),
                });
            }
            log::debug!("{path}: {} columns x {} rows", frame.column_count(), frame.row_count());
            Ok(LoadResult {
                where_update: WhereCache::for_result(query, frame.labels().to_vec()),
                frame,
            })
        }
        .boxed()
    }

    fn fork(&self) -> Arc<dyn MatrixLoader> {
        Arc::new(RemoteLoader::new(Arc::clone(&self.client), self.config))
    }
}

/// The endpoint serving `request`, with any applicable binning hint appended.
pub fn endpoint_path(request: &LoadRequest) -> Result<String> {
    let query = &request.query;
    let mut path = match (query.field, &query.query) {
        (field @ (Field::Obs | Field::Var), Query::Column(name)) => {
            format!("annotations/{field}?annotation-name={}", encode(name))
        }
        (Field::X, Query::Column(offset)) => format!("data/var?var-offset={}", encode(offset)),
        (Field::X, Query::Where { predicate }) => format!(
            "data/var?{}:{}={}",
            predicate.field,
            encode(&predicate.column),
            encode(&predicate.value)
        ),
        (Field::X, Query::Summarize { summarize }) => {
            let mut path = format!(
                "summary/var?method={}&key={}",
                summarize.method.as_str(),
                encode(&summarize.column)
            );
            for value in &summarize.values {
                path.push_str("&value=");
                path.push_str(&encode(value));
            }
            path
        }
        (Field::Emb, Query::Column(name)) => format!("layout/obs?layout-name={}", encode(name)),
        (field, _) => {
            return Err(MatrixError::InvalidQuery {
                field,
                reason: "no endpoint serves this query shape".to_owned(),
            })
        }
    };
    if let Some(hint) = request.hint {
        if hint.applies_to(&request.schema, query) {
            path.push_str(&format!("&nbins={}", hint.nbins));
        }
    }
    Ok(path)
}

fn encode(value: &str) -> String {
    utf8_percent_encode(value, QUERY_VALUE).to_string()
}
