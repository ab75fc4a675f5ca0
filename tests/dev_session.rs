//! End-to-end behaviour of a dev session driven by watch events, with a
//! fake client standing in for a browser connection.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use hotpack::compiler::transform::TransformOutput;
use hotpack::compiler::{Passthrough, TransformOptions};
use hotpack::graph::DependencyMap;
use hotpack::{
    DevConfig, DevSession, FsRegenerator, HotpackError, ModuleId, ModuleRecord, Snapshot,
    SourceTransform, WatchEvent, WatchKind, WatchOutcome,
};
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

struct Project {
    _dir: TempDir,
    root: PathBuf,
}

impl Project {
    /// `index.js` imports `./a` and `./b`; `a.js` exports 1.
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::write(
            root.join("index.js"),
            "module.exports = require(\"./a\") + require(\"./b\");",
        )
        .unwrap();
        fs::write(root.join("a.js"), "module.exports = 1;").unwrap();
        fs::write(root.join("b.js"), "module.exports = 10;").unwrap();
        Self { _dir: dir, root }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn snapshot(&self) -> Snapshot {
        let deps: DependencyMap = [
            ("./a".to_string(), ModuleId::from("1")),
            ("./b".to_string(), ModuleId::from("2")),
        ]
        .into_iter()
        .collect();
        Snapshot {
            modules: vec![
                record("root", &self.path("index.js"), "module.exports = require(\"_mod_1\") + require(\"_mod_2\");", deps),
                record("1", &self.path("a.js"), "module.exports = 1;", DependencyMap::new()),
                record("2", &self.path("b.js"), "module.exports = 10;", DependencyMap::new()),
            ],
        }
    }

    fn session_with(&self, transform: Arc<dyn SourceTransform>) -> DevSession {
        let snapshot = self.snapshot();
        let regenerator = Arc::new(FsRegenerator::new(&snapshot.modules).unwrap());
        DevSession::create(
            self.root.clone(),
            DevConfig::default(),
            snapshot,
            regenerator,
            transform,
        )
        .unwrap()
    }

    fn session(&self) -> DevSession {
        self.session_with(Arc::new(Passthrough))
    }

    fn change(&self, id: &str, name: &str) -> WatchEvent {
        WatchEvent {
            kind: WatchKind::Change,
            module_id: ModuleId::from(id),
            absolute_path: self.path(name),
        }
    }

    fn unlink(&self, id: &str, name: &str) -> WatchEvent {
        WatchEvent {
            kind: WatchKind::Unlink,
            ..self.change(id, name)
        }
    }
}

fn record(id: &str, path: &Path, content: &str, dependencies: DependencyMap) -> ModuleRecord {
    ModuleRecord {
        id: ModuleId::from(id),
        path: path.to_path_buf(),
        content: content.to_string(),
        dependencies,
    }
}

async fn connect(session: &DevSession) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    // The connection stays registered for as long as the session lives.
    let _conn = session.broadcaster().on_connect(tx).await;
    rx
}

fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(serde_json::from_str(&frame).unwrap());
    }
    frames
}

fn of_type<'a>(frames: &'a [Value], kind: &str) -> Vec<&'a Value> {
    frames.iter().filter(|f| f["type"] == kind).collect()
}

/// Wait for the next frame of `kind`, skipping any others.
async fn next_of_type(rx: &mut mpsc::UnboundedReceiver<String>, kind: &str) -> Value {
    loop {
        let frame = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap_or_else(|_| panic!("no {} frame within 5s", kind))
            .expect("connection closed");
        let value: Value = serde_json::from_str(&frame).unwrap();
        if value["type"] == kind {
            return value;
        }
    }
}

/// A session running its event loop in the background.
struct Running {
    events: mpsc::UnboundedSender<WatchEvent>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<hotpack::Result<()>>,
}

impl Running {
    fn start(session: &Arc<DevSession>) -> Self {
        let (events, rx) = mpsc::unbounded_channel();
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(Arc::clone(session).run(rx, async move {
            let _ = stopped.await;
        }));
        Self { events, stop, task }
    }

    fn send(&self, event: WatchEvent) {
        self.events.send(event).unwrap();
    }

    async fn stop(self) {
        let _ = self.stop.send(());
        assert!(self.task.await.unwrap().is_ok());
    }
}

fn patch_of(update: &Value) -> &str {
    update["subsequentBundle"].as_str().unwrap()
}

#[tokio::test]
async fn test_edit_pushes_one_update_for_the_changed_module() {
    let project = Project::new();
    let session = project.session();
    let mut rx = connect(&session).await;

    let initial = session.bootstrap_html(3000).unwrap();
    assert!(initial.contains("__hotpackModules._mod_1 = function(require, module, exports) {module.exports = 1;"));

    fs::write(project.path("a.js"), "module.exports = 2;").unwrap();
    let outcome = session.handle_watch_event(project.change("1", "a.js")).await;
    assert_eq!(
        outcome,
        WatchOutcome::Rebuilt {
            modules: vec![ModuleId::from("1")]
        }
    );

    let frames = drain(&mut rx);
    let updates = of_type(&frames, "MODULE_UPDATE");
    assert_eq!(updates.len(), 1);
    // Evaluated by the client, this only redefines the table slot of a.
    assert_eq!(
        patch_of(updates[0]),
        "\n__hotpackModules._mod_1 = function(require, module, exports) {module.exports = 2;\n};"
    );

    let logs = of_type(&frames, "CONSOLE_LOG");
    assert_eq!(logs.len(), 1);
    assert!(logs[0]["msg"].as_str().unwrap().contains("rebuilt 1 module(s)"));
}

#[tokio::test]
async fn test_bootstrap_is_idempotent_and_fresh() {
    let project = Project::new();
    let session = project.session();

    let first = session.bootstrap_html(3000).unwrap();
    assert_eq!(first, session.bootstrap_html(3000).unwrap());

    for n in 2..=4 {
        fs::write(project.path("a.js"), format!("module.exports = {};", n)).unwrap();
        session.handle_watch_event(project.change("1", "a.js")).await;
    }

    let latest = session.bootstrap_html(3000).unwrap();
    assert!(latest.contains("module.exports = 4;"));
    assert!(!latest.contains("module.exports = 2;"));
    assert!(!latest.contains("module.exports = 3;"));
    assert_eq!(latest.matches("__hotpackModules._mod_1 =").count(), 1);
    assert_eq!(latest, session.bootstrap_html(3000).unwrap());
}

#[tokio::test]
async fn test_other_modules_keep_their_dependencies() {
    let project = Project::new();
    let session = project.session();
    let before = session
        .cache()
        .read()
        .unwrap()
        .get(&ModuleId::root())
        .unwrap()
        .dependencies
        .clone();

    fs::write(project.path("a.js"), "module.exports = 5;").unwrap();
    session.handle_watch_event(project.change("1", "a.js")).await;

    let cache = session.cache().read().unwrap();
    assert_eq!(cache.get(&ModuleId::root()).unwrap().dependencies, before);
    assert!(!cache.is_cached(&ModuleId::root()));
}

#[tokio::test]
async fn test_new_import_is_discovered_and_tracked() {
    let project = Project::new();
    let session = project.session();

    fs::write(project.path("c.js"), "module.exports = 100;").unwrap();
    fs::write(project.path("a.js"), "module.exports = require(\"./c\");").unwrap();
    let outcome = session.handle_watch_event(project.change("1", "a.js")).await;

    assert_eq!(
        outcome,
        WatchOutcome::Rebuilt {
            modules: vec![ModuleId::from("1"), ModuleId::from("3")]
        }
    );
    let cache = session.cache().read().unwrap();
    assert_eq!(cache.lookup_path(&project.path("c.js")), Some(ModuleId::from("3")));
    assert_eq!(
        cache.get(&ModuleId::from("1")).unwrap().content,
        "module.exports = require(\"_mod_3\");"
    );
}

#[tokio::test]
async fn test_unlink_is_broadcast_exactly_once() {
    let project = Project::new();
    let session = project.session();
    let mut rx = connect(&session).await;

    fs::remove_file(project.path("b.js")).unwrap();
    assert_eq!(
        session.handle_watch_event(project.unlink("2", "b.js")).await,
        WatchOutcome::Unlinked {
            module: ModuleId::from("2")
        }
    );
    assert_eq!(
        session.handle_watch_event(project.unlink("2", "b.js")).await,
        WatchOutcome::Skipped
    );

    let frames = drain(&mut rx);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["type"], "MODULE_UNLINK");
    assert_eq!(frames[0]["modId"], "2");

    let html = session.bootstrap_html(3000).unwrap();
    assert!(html.contains("__hotpackModules._mod_2 = function(require, module, exports) {module.exports = null;"));
    assert!(!html.contains("module.exports = 10;"));
}

/// Fails on any source containing `throw`, quoting the first module slot.
struct Strict;

impl SourceTransform for Strict {
    fn transform(&self, content: &str, _options: &TransformOptions) -> hotpack::Result<TransformOutput> {
        if content.contains("throw") {
            return Err(HotpackError::Transform(
                "\u{1b}[31mUnexpected token\u{1b}[39m near _mod_2".to_string(),
            ));
        }
        Ok(TransformOutput {
            code: content.to_string(),
        })
    }
}

#[tokio::test]
async fn test_compile_error_reaches_console_and_dialog() {
    let project = Project::new();
    let session = project.session_with(Arc::new(Strict));
    let mut rx = connect(&session).await;

    fs::write(
        project.path("index.js"),
        "throw require(\"./a\") + require(\"./b\");",
    )
    .unwrap();
    let outcome = session.handle_watch_event(project.change("root", "index.js")).await;
    assert_eq!(
        outcome,
        WatchOutcome::CompileFailed {
            path: project.path("index.js")
        }
    );

    let frames = drain(&mut rx);
    assert!(of_type(&frames, "MODULE_UPDATE").is_empty());

    let errors = of_type(&frames, "CONSOLE_ERROR");
    assert_eq!(errors.len(), 1);
    let console = errors[0]["msg"].as_str().unwrap();
    assert!(console.starts_with("Unexpected token near ./b"));
    assert!(console.contains("Error in: "));
    assert!(!console.contains('\u{1b}'));

    let dialogs = of_type(&frames, "MESSAGE_DIALOG");
    assert_eq!(dialogs.len(), 1);
    let html = dialogs[0]["msg"].as_str().unwrap();
    assert!(html.contains("<br />"));
    assert!(html.contains("./b"));
    assert!(!html.contains("_mod_2"));

    // The session keeps serving the last good state.
    let page = session.bootstrap_html(3000).unwrap();
    assert!(page.contains("require(\"_mod_1\") + require(\"_mod_2\")"));
}

#[tokio::test]
async fn test_failed_new_import_compiles_once_fixed() {
    let project = Project::new();
    let session = project.session_with(Arc::new(Strict));

    fs::write(project.path("c.js"), "throw 1;").unwrap();
    fs::write(project.path("a.js"), "module.exports = require(\"./c\") + 0;").unwrap();
    assert_eq!(
        session.handle_watch_event(project.change("1", "a.js")).await,
        WatchOutcome::CompileFailed {
            path: project.path("c.js")
        }
    );
    assert_eq!(session.cache().read().unwrap().lookup_path(&project.path("c.js")), None);

    fs::write(project.path("c.js"), "module.exports = 3;").unwrap();
    fs::write(project.path("a.js"), "module.exports = require(\"./c\") + 1;").unwrap();
    assert_eq!(
        session.handle_watch_event(project.change("1", "a.js")).await,
        WatchOutcome::Rebuilt {
            modules: vec![ModuleId::from("1"), ModuleId::from("3")]
        }
    );

    assert_eq!(
        session.cache().read().unwrap().lookup_path(&project.path("c.js")),
        Some(ModuleId::from("3"))
    );
    let page = session.bootstrap_html(3000).unwrap();
    assert!(page.contains("__hotpackModules._mod_3 = function(require, module, exports) {module.exports = 3;"));
    assert!(page.contains("module.exports = require(\"_mod_3\") + 1;"));
}

/// Passes sources through, taking its time over any containing `slow`.
struct Sluggish;

impl SourceTransform for Sluggish {
    fn transform(&self, content: &str, _options: &TransformOptions) -> hotpack::Result<TransformOutput> {
        if content.contains("slow") {
            std::thread::sleep(Duration::from_millis(600));
        }
        Ok(TransformOutput {
            code: content.to_string(),
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_edits_to_one_file_apply_in_order() {
    let project = Project::new();
    let session = Arc::new(project.session_with(Arc::new(Sluggish)));
    let mut rx = connect(&session).await;
    let running = Running::start(&session);

    fs::write(project.path("a.js"), "module.exports = 'slow edit 1';").unwrap();
    running.send(project.change("1", "a.js"));
    tokio::time::sleep(Duration::from_millis(150)).await;
    fs::write(project.path("a.js"), "module.exports = 'edit 2';").unwrap();
    running.send(project.change("1", "a.js"));

    let first = next_of_type(&mut rx, "MODULE_UPDATE").await;
    let second = next_of_type(&mut rx, "MODULE_UPDATE").await;
    assert!(patch_of(&first).contains("'slow edit 1'"));
    assert!(patch_of(&second).contains("'edit 2'"));

    assert_eq!(
        session.cache().read().unwrap().get(&ModuleId::from("1")).unwrap().content,
        "module.exports = 'edit 2';"
    );
    assert!(session.bootstrap_html(3000).unwrap().contains("module.exports = 'edit 2';"));
    running.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_rebuild_does_not_hold_up_other_files() {
    let project = Project::new();
    let session = Arc::new(project.session_with(Arc::new(Sluggish)));
    let mut rx = connect(&session).await;
    let running = Running::start(&session);

    fs::write(project.path("a.js"), "module.exports = 'slow';").unwrap();
    running.send(project.change("1", "a.js"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    fs::write(project.path("b.js"), "module.exports = 20;").unwrap();
    running.send(project.change("2", "b.js"));

    let first = next_of_type(&mut rx, "MODULE_UPDATE").await;
    let second = next_of_type(&mut rx, "MODULE_UPDATE").await;
    assert!(patch_of(&first).contains("_mod_2 = "));
    assert!(patch_of(&second).contains("_mod_1 = "));
    running.stop().await;
}

#[tokio::test]
async fn test_compile_error_then_fix_through_run() {
    let project = Project::new();
    let session = Arc::new(project.session_with(Arc::new(Strict)));
    let mut rx = connect(&session).await;
    let running = Running::start(&session);

    fs::write(project.path("index.js"), "throw require(\"./a\");").unwrap();
    running.send(project.change("root", "index.js"));
    let error = next_of_type(&mut rx, "CONSOLE_ERROR").await;
    assert!(error["msg"].as_str().unwrap().contains("Unexpected token"));

    fs::write(project.path("index.js"), "module.exports = require(\"./a\") * 2;").unwrap();
    running.send(project.change("root", "index.js"));
    let update = next_of_type(&mut rx, "MODULE_UPDATE").await;
    assert_eq!(
        patch_of(&update),
        "\n__hotpackModules._mod_root = function(require, module, exports) {module.exports = require(\"_mod_1\") * 2;\n};"
    );

    let page = session.bootstrap_html(3000).unwrap();
    assert!(page.contains("module.exports = require(\"_mod_1\") * 2;"));
    assert!(!page.contains("throw"));
    running.stop().await;
}
