#![allow(dead_code)]

use annomatrix::{
    AnnoMatrix, BinningHint, Column, Dataframe, Field, IndexedSchema, LoadRequest, LoadResult,
    MatrixError, MatrixLoader, ProxyConfig, Query, RowIndex, Schema, WhereCache,
};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

pub const N_OBS: usize = 4;
pub const N_VAR: usize = 3;

pub const SCHEMA_JSON: &str = r#"{
    "dataframe": { "nObs": 4, "nVar": 3, "type": "float32" },
    "annotations": {
        "obs": {
            "index": "name_0",
            "columns": [
                { "name": "name_0", "type": "string" },
                { "name": "louvain", "type": "categorical", "categories": ["a", "b", "c"] },
                { "name": "n_genes", "type": "int32" },
                { "name": "percent_mito", "type": "float32" },
                { "name": "notes", "type": "categorical", "writable": true,
                  "categories": ["unassigned", "tumor"] }
            ]
        },
        "var": {
            "index": "gene",
            "columns": [
                { "name": "gene", "type": "string" },
                { "name": "highly_variable", "type": "boolean" }
            ]
        }
    },
    "layout": {
        "obs": [{ "name": "umap", "type": "float32", "dims": ["umap_0", "umap_1"] }]
    }
}"#;

pub fn schema() -> IndexedSchema {
    IndexedSchema::new(Schema::from_json(SCHEMA_JSON).unwrap()).unwrap()
}

pub fn frame(rows: usize, columns: Vec<(&str, Column)>) -> Dataframe {
    Dataframe::from_columns(RowIndex::identity(rows), columns).unwrap()
}

/// In-memory loader serving canned frames, counting every load it starts.
#[derive(Clone, Debug, Default)]
pub struct FakeLoader {
    inner: Arc<FakeInner>,
}

#[derive(Debug, Default)]
struct FakeInner {
    responses: Mutex<HashMap<(Field, Query), Dataframe>>,
    failures: Mutex<HashMap<(Field, Query), (usize, MatrixError)>>,
    requests: Mutex<Vec<(Field, Query, Option<BinningHint>)>>,
    loads: AtomicUsize,
    forks: AtomicUsize,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, field: Field, query: Query, frame: Dataframe) {
        self.inner
            .responses
            .lock()
            .unwrap()
            .insert((field, query), frame);
    }

    /// Fail the next `times` loads of `query` with `err`.
    pub fn fail(&self, field: Field, query: Query, times: usize, err: MatrixError) {
        self.inner
            .failures
            .lock()
            .unwrap()
            .insert((field, query), (times, err));
    }

    /// Hold every load started from now on until the returned gate gets permits.
    pub fn gate(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.inner.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn loads(&self) -> usize {
        self.inner.loads.load(Ordering::SeqCst)
    }

    pub fn forks(&self) -> usize {
        self.inner.forks.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<(Field, Query, Option<BinningHint>)> {
        self.inner.requests.lock().unwrap().clone()
    }
}

impl MatrixLoader for FakeLoader {
    fn load(&self, request: LoadRequest) -> BoxFuture<'static, annomatrix::Result<LoadResult>> {
        let field = request.field();
        let key = (field, request.query.query.clone());
        self.inner.loads.fetch_add(1, Ordering::SeqCst);
        self.inner
            .requests
            .lock()
            .unwrap()
            .push((field, key.1.clone(), request.hint));

        let failure = {
            let mut failures = self.inner.failures.lock().unwrap();
            match failures.get_mut(&key) {
                Some((remaining, err)) if *remaining > 0 => {
                    *remaining -= 1;
                    Some(err.clone())
                }
                _ => None,
            }
        };
        let response = self.inner.responses.lock().unwrap().get(&key).cloned();
        let gate = self.inner.gate.lock().unwrap().clone();

        async move {
            if let Some(gate) = gate {
                let _permit = gate.acquire().await.unwrap();
            }
            if let Some(err) = failure {
                return Err(err);
            }
            let frame = response.ok_or_else(|| MatrixError::Load {
                field,
                query: request.query.key.to_string(),
                message: "no canned response".to_string(),
                retryable: false,
            })?;
            Ok(LoadResult {
                where_update: WhereCache::for_result(&request.query, frame.labels().to_vec()),
                frame,
            })
        }
        .boxed()
    }

    fn fork(&self) -> Arc<dyn MatrixLoader> {
        self.inner.forks.fetch_add(1, Ordering::SeqCst);
        Arc::new(self.clone())
    }
}

/// A loader with responses for every column of the test dataset.
pub fn populated_loader() -> FakeLoader {
    let loader = FakeLoader::new();
    let obs = [
        ("name_0", Column::from_strings(["c0", "c1", "c2", "c3"])),
        ("louvain", Column::from_strings(["a", "b", "a", "c"])),
        ("n_genes", Column::from(vec![10i32, 20, 30, 40])),
        ("percent_mito", Column::from(vec![0.1f32, 0.2, 0.3, 0.4])),
        ("notes", Column::from_strings(["unassigned"; 4])),
    ];
    for (name, column) in obs {
        loader.respond(Field::Obs, Query::column(name), frame(N_OBS, vec![(name, column)]));
    }

    loader.respond(
        Field::Var,
        Query::column("gene"),
        frame(N_VAR, vec![("gene", Column::from_strings(["CD3E", "MS4A1", "NKG7"]))]),
    );
    loader.respond(
        Field::Var,
        Query::column("highly_variable"),
        frame(N_VAR, vec![("highly_variable", Column::from(vec![true, false, true]))]),
    );

    for offset in 0..N_VAR {
        let label = offset.to_string();
        let base = offset as f32 * 10.0;
        loader.respond(
            Field::X,
            Query::var_offset(offset),
            frame(
                N_OBS,
                vec![(label.as_str(), Column::from(vec![base, base + 1.0, base + 2.0, base + 3.0]))],
            ),
        );
    }
    loader.respond(
        Field::X,
        Query::where_eq(Field::Var, "gene", "NKG7"),
        frame(N_OBS, vec![("2", Column::from(vec![20.0f32, 21.0, 22.0, 23.0]))]),
    );
    loader.respond(
        Field::X,
        Query::summarize_mean(Field::Var, "gene", ["CD3E", "NKG7"]),
        frame(
            N_OBS,
            vec![("mean(CD3E,NKG7)", Column::from(vec![10.0f32, 11.0, 12.0, 13.0]))],
        ),
    );

    loader.respond(
        Field::Emb,
        Query::column("umap"),
        frame(
            N_OBS,
            vec![
                ("umap_0", Column::from(vec![0.0f32, 1.0, 2.0, 3.0])),
                ("umap_1", Column::from(vec![5.0f32, 6.0, 7.0, 8.0])),
            ],
        ),
    );
    loader
}

pub fn proxy(loader: &FakeLoader) -> Arc<AnnoMatrix> {
    proxy_with_config(loader, ProxyConfig::default())
}

pub fn proxy_with_config(loader: &FakeLoader, config: ProxyConfig) -> Arc<AnnoMatrix> {
    AnnoMatrix::new(schema(), Arc::new(loader.clone()), config)
}

pub fn strings(frame: &Dataframe, label: &str) -> Vec<String> {
    frame
        .column(label)
        .and_then(Column::as_strings)
        .map(|values| values.iter().map(|v| v.to_string()).collect())
        .unwrap_or_default()
}

pub fn floats(frame: &Dataframe, label: &str) -> Vec<f32> {
    frame
        .column(label)
        .and_then(Column::as_f32)
        .map(<[f32]>::to_vec)
        .unwrap_or_default()
}
