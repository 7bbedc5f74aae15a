//! Document-worker behavior: request ordering, superseded-update elision,
//! the completion lane and diagnostics delivery.

use conjure_ls::{
    index::SymbolId,
    testing::{recording_observer, DocStore, MockFrontend, Publish, TestWorkspace},
    worker::{DocumentWorker, NeedDiagnostics},
    Project, Server,
};
use lsp_types::Position;
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

const A_SRC: &str = "package demo.a public\npublic func f() -> std.Int\npublic class Box<T>\n  public func get(i: std.Int) -> T\n";
const B_SRC: &str = "package demo.b public\nimport public demo.a\npublic func g()\n  check demo.a.f -> std.Int\n";

struct Fixture {
    _ws: TestWorkspace,
    server: Server<MockFrontend>,
    docs: Arc<DocStore>,
    publishes: Arc<Mutex<Vec<Publish>>>,
    notices: Arc<Mutex<Vec<String>>>,
    file_a: PathBuf,
    file_b: PathBuf,
}

fn fixture() -> Fixture {
    let mut ws = TestWorkspace::new();
    ws.module("demo", &[]);
    let file_a = ws.file("demo", "a/lib.cj", A_SRC);
    let file_b = ws.file("demo", "b/lib.cj", B_SRC);

    let docs = Arc::new(DocStore::new());
    docs.open(&file_a, A_SRC, 0);
    docs.open(&file_b, B_SRC, 0);

    let (diags, publishes, notices) = recording_observer();
    let server = Server::start(
        ws.config(),
        MockFrontend,
        Arc::clone(&docs) as Arc<dyn conjure_ls::Callbacks>,
        diags,
        false,
    )
    .unwrap();
    Fixture { _ws: ws, server, docs, publishes, notices, file_a, file_b }
}

/// Polls until `predicate` holds or the deadline passes.
fn wait_for(mut predicate: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !predicate() {
        assert!(Instant::now() < deadline, "timed out waiting for condition");
        std::thread::sleep(Duration::from_millis(10));
    }
}

fn versions_for(publishes: &Mutex<Vec<Publish>>, file: &PathBuf) -> Vec<Option<i32>> {
    publishes.lock().unwrap().iter().filter(|p| p.file == *file).map(|p| p.version).collect()
}

#[test]
fn updates_publish_under_their_version() {
    // property 4: two YES updates publish once per version, in order
    let fx = fixture();
    fx.docs.edit(&fx.file_a, &format!("// touch\n{A_SRC}"), 1);
    fx.server.worker.update(&fx.file_a, 1, NeedDiagnostics::Yes);
    fx.docs.edit(&fx.file_a, &format!("// touch twice\n{A_SRC}"), 2);
    fx.server.worker.update(&fx.file_a, 2, NeedDiagnostics::Yes);

    wait_for(|| versions_for(&fx.publishes, &fx.file_a).contains(&Some(2)));

    let versions = versions_for(&fx.publishes, &fx.file_a);
    assert!(versions.iter().filter(|v| **v == Some(1)).count() <= 1);
    assert_eq!(versions.iter().filter(|v| **v == Some(2)).count(), 1);
    // publishes arrive in submission order
    let numbered: Vec<i32> = versions.into_iter().flatten().collect();
    let mut sorted = numbered.clone();
    sorted.sort();
    assert_eq!(numbered, sorted);
}

#[test]
fn superseded_auto_updates_may_be_elided() {
    let fx = fixture();
    for version in 1..=5 {
        fx.docs.edit(&fx.file_a, &format!("// v{version}\n{A_SRC}"), version);
        fx.server.worker.update(&fx.file_a, version, NeedDiagnostics::Auto);
    }
    wait_for(|| versions_for(&fx.publishes, &fx.file_a).contains(&Some(5)));

    let versions: Vec<i32> =
        versions_for(&fx.publishes, &fx.file_a).into_iter().flatten().collect();
    // the newest version always lands; stale ones may be skipped but never
    // out of order
    assert_eq!(*versions.last().unwrap(), 5);
    let mut sorted = versions.clone();
    sorted.sort();
    assert_eq!(versions, sorted);
}

#[test]
fn run_with_ast_sees_the_latest_edit() {
    let fx = fixture();
    let broken = B_SRC.replace("check demo.a.f -> std.Int", "check demo.a.f -> std.String");
    fx.docs.edit(&fx.file_b, &broken, 3);

    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    fx.server.worker.run_with_ast(
        "hover",
        &fx.file_b,
        NeedDiagnostics::Auto,
        move |inputs| {
            *sink.lock().unwrap() = Some((inputs.used_cached_ast, inputs.ast.is_some()));
        },
    );
    wait_for(|| seen.lock().unwrap().is_some());

    let (used_cached, has_ast) = seen.lock().unwrap().unwrap();
    assert!(!used_cached, "a dirty document forces a recompile");
    assert!(has_ast);
    // the type error from the edit is now observable
    let diags = fx.server.project.diags.diags_of_file(&fx.file_b);
    assert!(diags.iter().any(|d| d.message.contains("mismatched types")));
}

#[test]
fn rename_transaction_compiles_the_defining_file_first() {
    let fx = fixture();
    // the rename edited both files; the defining file is still dirty
    let renamed_a = A_SRC.replace("func f()", "func renamed()");
    let renamed_b = B_SRC.replace("demo.a.f", "demo.a.renamed");
    fx.docs.edit(&fx.file_a, &renamed_a, 7);
    fx.docs.edit(&fx.file_b, &renamed_b, 7);
    fx.server.worker.begin_rename_transaction(&fx.file_a);

    let done = Arc::new(AtomicUsize::new(0));
    let flag = Arc::clone(&done);
    fx.server.worker.run_with_ast("references", &fx.file_b, NeedDiagnostics::Auto, move |_| {
        flag.store(1, Ordering::SeqCst);
    });
    wait_for(|| done.load(Ordering::SeqCst) == 1);

    // the defining file compiled first, so the reference resolves cleanly
    let diags = fx.server.project.diags.diags_of_file(&fx.file_b);
    assert!(
        diags.is_empty(),
        "rename transaction should leave no stale resolution errors: {diags:?}"
    );
}

#[test]
fn completion_produces_a_typed_receiver() {
    // S4: the partial compile types the receiver under the cursor
    let fx = fixture();
    let completing =
        "package demo.b public\nimport public demo.a\npublic func g()\n  demo.a.Box.\n";
    fx.docs.edit(&fx.file_b, completing, 9);

    let receiver = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&receiver);
    // the `test` flag runs the completion synchronously on this thread
    fx.server.worker.run_with_ast_cache(
        "completion",
        &fx.file_b,
        Position { line: 3, character: 13 },
        move |partial| {
            *sink.lock().unwrap() = partial.receiver.clone();
        },
    );

    assert_eq!(receiver.lock().unwrap().as_deref(), Some("demo.a.Box"));
}

#[test]
fn nested_macro_completion_sends_the_waiting_notice() {
    let fx = fixture();
    let completing =
        "package demo.b public\nimport public demo.a\npublic func g()\n  expand demo.a.f expand demo.a.f.\n";
    fx.docs.edit(&fx.file_b, completing, 11);

    let called = Arc::new(AtomicUsize::new(0));
    let flag = Arc::clone(&called);
    fx.server.worker.run_with_ast_cache(
        "completion",
        &fx.file_b,
        Position { line: 3, character: 36 },
        move |_| {
            flag.fetch_add(1, Ordering::SeqCst);
        },
    );

    assert_eq!(called.load(Ordering::SeqCst), 1);
    assert!(fx
        .notices
        .lock()
        .unwrap()
        .iter()
        .any(|notice| notice.contains("waiting macro expand")));
}

#[test]
fn newer_completion_displaces_the_waiting_one() {
    // the lane is real (non-test config): one completion runs, the waiting
    // slot holds only the newest
    let mut ws = TestWorkspace::new();
    ws.module("demo", &[]);
    let file_a = ws.file("demo", "a/lib.cj", A_SRC);
    let mut config = ws.config();
    config.options.test = false;

    let docs = Arc::new(DocStore::new());
    docs.open(&file_a, A_SRC, 0);

    let (diags, _publishes, _notices) = recording_observer();
    let project = Arc::new(Project::new(config, MockFrontend, diags, false).unwrap());
    project.initialize().unwrap();
    project.full_compilation().unwrap();
    let worker = DocumentWorker::new(Arc::clone(&project), docs as Arc<dyn conjure_ls::Callbacks>);

    let log = Arc::new(Mutex::new(Vec::new()));
    let position = Position { line: 1, character: 0 };

    // the first completion blocks the lane long enough for two more to queue
    let slow = Arc::clone(&log);
    worker.run_with_ast_cache("completion", &file_a, position, move |_| {
        std::thread::sleep(Duration::from_millis(300));
        slow.lock().unwrap().push(1);
    });
    std::thread::sleep(Duration::from_millis(50));
    let second = Arc::clone(&log);
    worker.run_with_ast_cache("completion", &file_a, position, move |_| {
        second.lock().unwrap().push(2);
    });
    let third = Arc::clone(&log);
    worker.run_with_ast_cache("completion", &file_a, position, move |_| {
        third.lock().unwrap().push(3);
    });

    wait_for(|| log.lock().unwrap().contains(&3));
    let log = log.lock().unwrap().clone();
    assert!(log.contains(&1), "the running completion finishes");
    assert!(!log.contains(&2), "the displaced completion is abandoned");

    worker.stop();
}

#[test]
fn deleted_documents_clear_their_diagnostics() {
    let fx = fixture();
    let broken = B_SRC.replace("check demo.a.f -> std.Int", "use demo.missing.thing");
    fx.docs.edit(&fx.file_b, &broken, 4);
    fx.server.worker.update(&fx.file_b, 4, NeedDiagnostics::Yes);
    wait_for(|| !fx.server.project.diags.diags_of_file(&fx.file_b).is_empty());

    std::fs::remove_file(&fx.file_b).unwrap();
    fx.server.project.increment_for_file_delete(&fx.file_b);
    assert!(fx.server.project.diags.diags_of_file(&fx.file_b).is_empty());
}

#[test]
fn shutdown_persists_and_drains() {
    let fx = fixture();
    fx.server.worker.update(&fx.file_a, 1, NeedDiagnostics::Yes);
    fx.server.shutdown();
    // after shutdown, the pool is quiescent and caches are on disk
    assert_eq!(fx.server.project.pool.outstanding(), 0);
}

#[test]
fn symbol_index_serves_queries_during_worker_traffic() {
    // index reads are safe while the worker compiles
    let fx = fixture();
    for version in 1..=3 {
        fx.docs.edit(&fx.file_a, &format!("// v{version}\n{A_SRC}"), version);
        fx.server.worker.update(&fx.file_a, version, NeedDiagnostics::Auto);
        let mut hits = 0;
        fx.server.project.index().lookup(
            &conjure_ls::index::LookupRequest { ids: vec![SymbolId::of("demo.a.f")] },
            &mut |_| hits += 1,
        );
        assert!(hits <= 1);
    }
    wait_for(|| versions_for(&fx.publishes, &fx.file_a).contains(&Some(3)));
}
