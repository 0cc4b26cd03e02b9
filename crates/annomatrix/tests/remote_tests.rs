mod common;

use annomatrix::{
    endpoint_path, AnnoMatrix, BinningHint, Column, DatasetClient, DatasetRequest, Field,
    FrameError, LoadRequest, MatrixError, NormalizedQuery, ProxyConfig, Query, RemoteLoader,
    RemoteLoaderConfig, TransportError,
};
use annomatrix_frame::arrow::write_ipc_stream;
use bytes::Bytes;
use common::{floats, frame, schema, strings, N_OBS};
use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

fn request(field: Field, query: Query, hint: Option<BinningHint>) -> LoadRequest {
    let schema = Arc::new(schema());
    LoadRequest {
        query: NormalizedQuery::new(field, query, &schema).unwrap(),
        hint,
        schema,
    }
}

/// Serves pre-encoded IPC payloads by request path.
#[derive(Clone, Debug, Default)]
struct IpcClient {
    inner: Arc<IpcState>,
}

#[derive(Debug, Default)]
struct IpcState {
    responses: Mutex<HashMap<String, std::result::Result<Bytes, TransportError>>>,
    calls: Mutex<Vec<String>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl IpcClient {
    fn serve(&self, path: &str, columns: Vec<(&str, Column)>) {
        let bytes = write_ipc_stream(&frame(N_OBS, columns)).unwrap();
        self.respond(path, Ok(bytes));
    }

    fn respond(&self, path: &str, response: std::result::Result<Bytes, TransportError>) {
        self.inner
            .responses
            .lock()
            .unwrap()
            .insert(path.to_string(), response);
    }

    fn gate(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.inner.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    fn calls(&self) -> Vec<String> {
        self.inner.calls.lock().unwrap().clone()
    }

    fn peak(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }
}

impl DatasetClient for IpcClient {
    fn resolve(
        &self,
        request: DatasetRequest,
    ) -> BoxFuture<'static, std::result::Result<Bytes, TransportError>> {
        let state = Arc::clone(&self.inner);
        state.calls.lock().unwrap().push(request.path.clone());
        async move {
            let active = state.active.fetch_add(1, Ordering::SeqCst) + 1;
            state.peak.fetch_max(active, Ordering::SeqCst);

            let gate = state.gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                let _permit = gate.acquire().await.unwrap();
            }
            for _ in 0..4 {
                tokio::task::yield_now().await;
            }

            state.active.fetch_sub(1, Ordering::SeqCst);
            state
                .responses
                .lock()
                .unwrap()
                .get(&request.path)
                .cloned()
                .unwrap_or_else(|| Err(TransportError::new("404 not found", false)))
        }
        .boxed()
    }
}

fn remote_proxy(
    client: &IpcClient,
    max_inflight_loads: usize,
) -> (Arc<AnnoMatrix>, Arc<RemoteLoader>) {
    let loader = Arc::new(RemoteLoader::new(
        Arc::new(client.clone()),
        RemoteLoaderConfig { max_inflight_loads },
    ));
    let matrix = AnnoMatrix::new(schema(), loader.clone(), ProxyConfig::default());
    (matrix, loader)
}

fn x_column(offset: usize) -> Vec<(&'static str, Column)> {
    let label: &'static str = ["0", "1", "2"][offset];
    let base = offset as f32 * 10.0;
    vec![(label, Column::from(vec![base, base + 1.0, base + 2.0, base + 3.0]))]
}

#[test]
fn endpoint_paths_follow_query_shape() {
    let cases = [
        (
            Field::Obs,
            Query::column("louvain"),
            "annotations/obs?annotation-name=louvain",
        ),
        (
            Field::Var,
            Query::column("highly_variable"),
            "annotations/var?annotation-name=highly_variable",
        ),
        (Field::X, Query::var_offset(2), "data/var?var-offset=2"),
        (
            Field::X,
            Query::where_eq(Field::Var, "gene", "HLA-DR B"),
            "data/var?var:gene=HLA-DR%20B",
        ),
        (
            Field::X,
            Query::summarize_mean(Field::Var, "gene", ["CD3E", "NKG7"]),
            "summary/var?method=mean&key=gene&value=CD3E&value=NKG7",
        ),
        (Field::Emb, Query::column("umap"), "layout/obs?layout-name=umap"),
    ];
    for (field, query, expected) in cases {
        assert_eq!(endpoint_path(&request(field, query, None)).unwrap(), expected);
    }
}

#[test]
fn binning_hints_are_appended_for_continuous_targets_only() {
    let hint = Some(BinningHint::new(500));
    assert_eq!(
        endpoint_path(&request(Field::Obs, Query::column("percent_mito"), hint)).unwrap(),
        "annotations/obs?annotation-name=percent_mito&nbins=500"
    );
    assert_eq!(
        endpoint_path(&request(Field::X, Query::var_offset(0), hint)).unwrap(),
        "data/var?var-offset=0&nbins=500"
    );
    assert_eq!(
        endpoint_path(&request(Field::Obs, Query::column("louvain"), hint)).unwrap(),
        "annotations/obs?annotation-name=louvain"
    );
    assert_eq!(
        endpoint_path(&request(Field::Obs, Query::column("n_genes"), hint)).unwrap(),
        "annotations/obs?annotation-name=n_genes"
    );
    assert_eq!(
        endpoint_path(&request(Field::Emb, Query::column("umap"), hint)).unwrap(),
        "layout/obs?layout-name=umap"
    );
}

#[tokio::test(flavor = "current_thread")]
async fn remote_loads_decode_ipc_payloads() {
    let client = IpcClient::default();
    client.serve(
        "annotations/obs?annotation-name=louvain",
        vec![("louvain", Column::from_strings(["a", "b", "a", "c"]))],
    );
    client.serve(
        "layout/obs?layout-name=umap",
        vec![
            ("umap_0", Column::from(vec![0.0f32, 1.0, 2.0, 3.0])),
            ("umap_1", Column::from(vec![5.0f32, 6.0, 7.0, 8.0])),
        ],
    );
    let (matrix, _) = remote_proxy(&client, 5);

    let obs = matrix
        .fetch(Field::Obs, &[Query::column("louvain")], None)
        .await
        .expect("obs fetch");
    assert_eq!(strings(&obs, "louvain"), vec!["a", "b", "a", "c"]);

    let emb = matrix
        .fetch(Field::Emb, &[Query::column("umap")], None)
        .await
        .expect("emb fetch");
    assert_eq!(floats(&emb, "umap_1"), vec![5.0, 6.0, 7.0, 8.0]);
    assert_eq!(client.calls().len(), 2);
}

#[tokio::test(flavor = "current_thread")]
async fn transport_and_decode_failures_surface_as_errors() {
    let client = IpcClient::default();
    client.respond(
        "annotations/obs?annotation-name=n_genes",
        Err(TransportError::new("503 service unavailable", true)),
    );
    client.respond(
        "annotations/obs?annotation-name=percent_mito",
        Ok(Bytes::from_static(&[0xff, 0xff, 0xff, 0xff, 8, 0, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8])),
    );
    let (matrix, _) = remote_proxy(&client, 5);

    let err = matrix
        .fetch(Field::Obs, &[Query::column("n_genes")], None)
        .await
        .expect_err("transport failure");
    assert!(err.is_retryable());
    assert!(matches!(
        err,
        MatrixError::Load { field: Field::Obs, ref message, .. } if message == "503 service unavailable"
    ));

    let err = matrix
        .fetch(Field::Obs, &[Query::column("percent_mito")], None)
        .await
        .expect_err("garbage payload");
    assert!(matches!(err, MatrixError::Frame(FrameError::Arrow(_))));
    assert!(!err.is_retryable());

    let err = matrix
        .fetch(Field::Obs, &[Query::column("louvain")], None)
        .await
        .expect_err("missing endpoint");
    assert!(!err.is_retryable());
}

#[tokio::test(flavor = "current_thread")]
async fn admission_window_bounds_concurrent_loads() {
    let client = IpcClient::default();
    for offset in 0..3 {
        client.serve(&format!("data/var?var-offset={offset}"), x_column(offset));
    }
    client.serve(
        "annotations/obs?annotation-name=louvain",
        vec![("louvain", Column::from_strings(["a", "b", "a", "c"]))],
    );
    let (matrix, loader) = remote_proxy(&client, 2);

    let fetches = join_all([
        matrix.fetch(Field::X, &[Query::var_offset(0)], None),
        matrix.fetch(Field::X, &[Query::var_offset(1)], None),
        matrix.fetch(Field::X, &[Query::var_offset(2)], None),
        matrix.fetch(Field::Obs, &[Query::column("louvain")], None),
    ])
    .await;

    for result in fetches {
        result.expect("fetch");
    }
    assert_eq!(client.peak(), 2);
    assert_eq!(client.calls().len(), 4);
    assert_eq!(loader.window().active(), 0);
    assert_eq!(loader.window().queued(), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn embedding_loads_jump_the_admission_queue() {
    let client = IpcClient::default();
    for offset in 0..2 {
        client.serve(&format!("data/var?var-offset={offset}"), x_column(offset));
    }
    client.serve(
        "layout/obs?layout-name=umap",
        vec![
            ("umap_0", Column::from(vec![0.0f32, 1.0, 2.0, 3.0])),
            ("umap_1", Column::from(vec![5.0f32, 6.0, 7.0, 8.0])),
        ],
    );
    let gate = client.gate();
    let (matrix, _) = remote_proxy(&client, 1);

    let (x0, x1, umap) = (
        [Query::var_offset(0)],
        [Query::var_offset(1)],
        [Query::column("umap")],
    );
    let fetches = join_all([
        matrix.fetch(Field::X, &x0, None),
        matrix.fetch(Field::X, &x1, None),
        matrix.fetch(Field::Emb, &umap, None),
    ]);
    let open = async {
        tokio::task::yield_now().await;
        gate.add_permits(16);
    };
    let (results, ()) = tokio::join!(fetches, open);

    for result in results {
        result.expect("fetch");
    }
    assert_eq!(
        client.calls(),
        vec![
            "data/var?var-offset=0",
            "layout/obs?layout-name=umap",
            "data/var?var-offset=1",
        ]
    );
}

#[tokio::test(flavor = "current_thread")]
async fn abandoned_fetch_releases_its_admission_slot() {
    let client = IpcClient::default();
    for offset in 0..2 {
        client.serve(&format!("data/var?var-offset={offset}"), x_column(offset));
    }
    let gate = client.gate();
    let (matrix, loader) = remote_proxy(&client, 1);

    let abandoned = tokio::time::timeout(
        Duration::from_millis(10),
        matrix.fetch(Field::X, &[Query::var_offset(0)], None),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(loader.window().active(), 1);

    gate.add_permits(16);
    let unrelated = tokio::time::timeout(
        Duration::from_secs(5),
        matrix.fetch(Field::X, &[Query::var_offset(1)], None),
    )
    .await
    .expect("load after an abandoned fetch is admitted")
    .expect("fetch");
    assert_eq!(floats(&unrelated, "1"), vec![10.0, 11.0, 12.0, 13.0]);

    // The abandoned load still completed and was merged.
    let cached = matrix
        .fetch(Field::X, &[Query::var_offset(0)], None)
        .await
        .expect("cached fetch");
    assert_eq!(floats(&cached, "0"), vec![0.0, 1.0, 2.0, 3.0]);
    assert_eq!(
        client.calls(),
        vec!["data/var?var-offset=0", "data/var?var-offset=1"]
    );
    assert_eq!(loader.window().active(), 0);
    assert_eq!(loader.window().queued(), 0);
}

#[test]
fn zero_sized_window_is_raised_to_one() {
    let client = IpcClient::default();
    let loader = RemoteLoader::new(
        Arc::new(client),
        RemoteLoaderConfig {
            max_inflight_loads: 0,
        },
    );
    assert_eq!(loader.config().max_inflight_loads, 1);
    assert_eq!(loader.window().capacity(), 1);
}
