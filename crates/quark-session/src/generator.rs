//! Callable namespace tree built from the API document.
//!
//! Each declared method becomes a [`MethodStub`] at
//! `namespace.segments.Action.method`. Invoking a stub checks the argument
//! count, registers the call with the [`CorrelationQueue`] and hands an
//! [`OutboundCall`] to the session's transport driver.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use quark_schema::{consolidate, ActionDescriptor, MethodSignature, SchemaError};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::envelope::settle_response;
use crate::error::{Result, SessionError};
use crate::queue::CorrelationQueue;
use crate::request::{now_millis, CallRequest};

/// A request waiting to be framed and sent by the transport driver.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundCall {
    pub request: CallRequest,
}

/// Node of the namespace tree.
#[derive(Clone)]
pub enum ApiNode {
    Branch(BTreeMap<String, ApiNode>),
    Method(Arc<MethodStub>),
}

impl fmt::Debug for ApiNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiNode::Branch(children) => f.debug_map().entries(children.iter()).finish(),
            ApiNode::Method(stub) => write!(f, "{}{:?}", stub.name(), stub.arities()),
        }
    }
}

/// Shared namespace tree. Cloning shares the same tree.
#[derive(Clone, Default)]
pub struct ApiTree {
    root: Arc<RwLock<BTreeMap<String, ApiNode>>>,
}

impl ApiTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find the stub at a dotted path.
    pub fn lookup(&self, path: &str) -> Option<Arc<MethodStub>> {
        let root = self.root.read();
        let mut segments = path.split('.');
        let mut node = root.get(segments.next()?)?;
        for segment in segments {
            node = match node {
                ApiNode::Branch(children) => children.get(segment)?,
                ApiNode::Method(_) => return None,
            };
        }
        match node {
            ApiNode::Method(stub) => Some(Arc::clone(stub)),
            ApiNode::Branch(_) => None,
        }
    }

    /// All stubs, ordered by path.
    pub fn methods(&self) -> Vec<Arc<MethodStub>> {
        fn walk(nodes: &BTreeMap<String, ApiNode>, out: &mut Vec<Arc<MethodStub>>) {
            for node in nodes.values() {
                match node {
                    ApiNode::Branch(children) => walk(children, out),
                    ApiNode::Method(stub) => out.push(Arc::clone(stub)),
                }
            }
        }

        let mut out = Vec::new();
        walk(&self.root.read(), &mut out);
        out.sort_by_key(|stub| stub.path());
        out
    }

    /// Dotted paths of all stubs, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.methods().iter().map(|stub| stub.path()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.root.read().is_empty()
    }

    fn has_session(&self, session_id: &str) -> bool {
        self.methods()
            .iter()
            .any(|stub| stub.binding.session_id == session_id)
    }
}

impl fmt::Debug for ApiTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.root.read().iter()).finish()
    }
}

/// What every stub of one generator shares.
struct Binding {
    session_id: String,
    queue: Arc<CorrelationQueue>,
    call_timeout: Duration,
    hook: RwLock<Option<mpsc::UnboundedSender<OutboundCall>>>,
}

/// A callable remote method.
pub struct MethodStub {
    namespace: String,
    action: String,
    signature: MethodSignature,
    binding: Arc<Binding>,
}

impl MethodStub {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn name(&self) -> &str {
        &self.signature.name
    }

    /// `namespace.action.method`
    pub fn path(&self) -> String {
        format!("{}.{}.{}", self.namespace, self.action, self.signature.name)
    }

    pub fn arities(&self) -> Vec<usize> {
        self.signature.arity_list()
    }

    pub fn signature(&self) -> &MethodSignature {
        &self.signature
    }

    pub fn session_id(&self) -> &str {
        &self.binding.session_id
    }

    /// Invoke the remote method and wait for its `result`.
    ///
    /// An undeclared argument count fails before anything is queued.
    pub async fn call(&self, args: Vec<Value>) -> Result<Value> {
        let info = self
            .signature
            .arity(args.len())
            .ok_or_else(|| SessionError::ArityMismatch {
                path: self.path(),
                expected: self.arities(),
                got: args.len(),
            })?;

        let hook = self
            .binding
            .hook
            .read()
            .clone()
            .ok_or_else(SessionError::stopped)?;

        let timeout = if info.is_async {
            Duration::ZERO
        } else {
            self.binding.call_timeout
        };
        let queue = &self.binding.queue;
        let (tid, pending) = queue.enqueue(timeout)?;

        let request = CallRequest {
            tid,
            sid: self.binding.session_id.clone(),
            namespace: self.namespace.clone(),
            action: self.action.clone(),
            method: self.signature.name.clone(),
            e: info.encrypt,
            data: args,
            ts: now_millis(),
        };
        debug!(%tid, path = %request.path(), "dispatching call");
        if hook.send(OutboundCall { request }).is_err() {
            queue.reject(tid, SessionError::stopped());
        }

        let record = pending.wait().await?;
        settle_response(&self.action, &self.signature.name, record).map_err(SessionError::Remote)
    }
}

impl fmt::Debug for MethodStub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodStub")
            .field("path", &self.path())
            .field("arities", &self.arities())
            .field("session_id", &self.binding.session_id)
            .finish()
    }
}

/// Builds stubs for one session into a (possibly shared) [`ApiTree`].
pub struct ApiGenerator {
    tree: ApiTree,
    binding: Arc<Binding>,
}

impl ApiGenerator {
    /// Create a generator whose stubs push calls onto the returned receiver.
    pub fn new(
        tree: ApiTree,
        session_id: impl Into<String>,
        queue: Arc<CorrelationQueue>,
        call_timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<OutboundCall>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let binding = Arc::new(Binding {
            session_id: session_id.into(),
            queue,
            call_timeout,
            hook: RwLock::new(Some(tx)),
        });
        (Self { tree, binding }, rx)
    }

    pub fn tree(&self) -> &ApiTree {
        &self.tree
    }

    pub fn session_id(&self) -> &str {
        &self.binding.session_id
    }

    /// True if any stub of this generator is in the tree.
    pub fn is_built(&self) -> bool {
        self.tree.has_session(&self.binding.session_id)
    }

    /// Add stubs for `descriptors` and return how many were added.
    ///
    /// All-or-nothing: on error the tree is unchanged. A leaf already at a
    /// method's path is replaced; a branch there is a
    /// [`SchemaError::PathConflict`].
    pub fn build(&self, descriptors: &[ActionDescriptor]) -> Result<usize> {
        let actions = consolidate(descriptors)?;

        let mut root = self.tree.root.write();
        let mut next = root.clone();
        let mut added = 0;
        for action in actions {
            let parent = branch_mut(&mut next, action.segments())?;
            for (name, signature) in action.methods {
                if let Some(ApiNode::Branch(_)) = parent.get(&name) {
                    return Err(SchemaError::PathConflict {
                        path: format!("{}.{}.{}", action.namespace, action.action, name),
                    }
                    .into());
                }
                let stub = MethodStub {
                    namespace: action.namespace.clone(),
                    action: action.action.clone(),
                    signature,
                    binding: Arc::clone(&self.binding),
                };
                parent.insert(name, ApiNode::Method(Arc::new(stub)));
                added += 1;
            }
        }
        *root = next;
        drop(root);

        info!(
            session_id = %self.binding.session_id,
            methods = added,
            "api tree built"
        );
        Ok(added)
    }

    /// Remove this session's stubs and prune emptied branches.
    pub fn detach(&self) -> usize {
        let removed = detach_from(&mut self.tree.root.write(), &self.binding.session_id);
        debug!(session_id = %self.binding.session_id, removed, "api tree detached");
        removed
    }

    /// Stop stubs from dispatching; later calls fail with "session stopped".
    pub fn unbind(&self) {
        self.binding.hook.write().take();
    }
}

impl fmt::Debug for ApiGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiGenerator")
            .field("session_id", &self.binding.session_id)
            .field("bound", &self.binding.hook.read().is_some())
            .finish()
    }
}

fn branch_mut<'a, 'b>(
    root: &'a mut BTreeMap<String, ApiNode>,
    segments: impl Iterator<Item = &'b str>,
) -> Result<&'a mut BTreeMap<String, ApiNode>> {
    let mut current = root;
    let mut walked = String::new();
    for segment in segments {
        if !walked.is_empty() {
            walked.push('.');
        }
        walked.push_str(segment);

        let node = current
            .entry(segment.to_string())
            .or_insert_with(|| ApiNode::Branch(BTreeMap::new()));
        current = match node {
            ApiNode::Branch(children) => children,
            ApiNode::Method(_) => return Err(SchemaError::PathConflict { path: walked }.into()),
        };
    }
    Ok(current)
}

fn detach_from(nodes: &mut BTreeMap<String, ApiNode>, session_id: &str) -> usize {
    let mut removed = 0;
    nodes.retain(|_, node| match node {
        ApiNode::Method(stub) => {
            let ours = stub.binding.session_id == session_id;
            removed += usize::from(ours);
            !ours
        }
        ApiNode::Branch(children) => {
            removed += detach_from(children, session_id);
            !children.is_empty()
        }
    });
    removed
}

/// Call surface handed out by a session.
#[derive(Debug, Clone)]
pub struct ApiHandle {
    tree: ApiTree,
}

impl ApiHandle {
    pub fn new(tree: ApiTree) -> Self {
        Self { tree }
    }

    /// The stub at `path`, if published.
    pub fn method(&self, path: &str) -> Option<Arc<MethodStub>> {
        self.tree.lookup(path)
    }

    /// Call the method at `path` with `args`.
    pub async fn call(&self, path: &str, args: Vec<Value>) -> Result<Value> {
        let stub = self
            .method(path)
            .ok_or_else(|| SessionError::UnknownMethod(path.to_string()))?;
        stub.call(args).await
    }

    pub fn paths(&self) -> Vec<String> {
        self.tree.paths()
    }

    pub fn methods(&self) -> Vec<Arc<MethodStub>> {
        self.tree.methods()
    }

    pub fn tree(&self) -> &ApiTree {
        &self.tree
    }
}

#[cfg(test)]
mod tests {
    use quark_schema::{Arity, AsyncFlag, MethodDescriptor};
    use serde_json::json;

    use super::*;
    use crate::queue::Resolution;

    fn method(name: &str, arity: Arity, is_async: bool) -> MethodDescriptor {
        MethodDescriptor {
            name: name.to_string(),
            arity,
            is_async: AsyncFlag::All(is_async),
            encrypt: true,
        }
    }

    fn demo() -> Vec<ActionDescriptor> {
        vec![ActionDescriptor {
            namespace: "io.greenscreens".to_string(),
            action: "Demo".to_string(),
            methods: vec![
                method("hello", Arity::One(1), false),
                method("listUsers", Arity::Many(vec![0, 2]), false),
                method("watch", Arity::One(0), true),
            ],
        }]
    }

    fn generator(
        tree: &ApiTree,
        session: &str,
    ) -> (
        ApiGenerator,
        mpsc::UnboundedReceiver<OutboundCall>,
        Arc<CorrelationQueue>,
    ) {
        let queue = Arc::new(CorrelationQueue::new());
        let (generator, rx) = ApiGenerator::new(
            tree.clone(),
            session,
            Arc::clone(&queue),
            Duration::from_secs(30),
        );
        (generator, rx, queue)
    }

    #[tokio::test]
    async fn builds_nested_paths() {
        let tree = ApiTree::new();
        let (generator, _rx, _) = generator(&tree, "s1");
        assert_eq!(generator.build(&demo()).unwrap(), 3);

        assert_eq!(
            tree.paths(),
            vec![
                "io.greenscreens.Demo.hello",
                "io.greenscreens.Demo.listUsers",
                "io.greenscreens.Demo.watch",
            ]
        );
        let stub = tree.lookup("io.greenscreens.Demo.listUsers").unwrap();
        assert_eq!(stub.arities(), vec![0, 2]);
        assert!(tree.lookup("io.greenscreens.Demo").is_none());
        assert!(tree.lookup("io.greenscreens.Demo.hello.x").is_none());
        assert!(generator.is_built());
    }

    #[tokio::test]
    async fn arity_mismatch_consumes_no_tid() {
        let tree = ApiTree::new();
        let (generator, mut rx, queue) = generator(&tree, "s1");
        generator.build(&demo()).unwrap();

        let stub = tree.lookup("io.greenscreens.Demo.hello").unwrap();
        let err = stub.call(vec![]).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::ArityMismatch { got: 0, ref expected, .. } if expected == &vec![1]
        ));
        assert_eq!(queue.stats().sent, 0);
        assert!(rx.try_recv().is_err());

        let (tid, _pending) = queue.enqueue(Duration::ZERO).unwrap();
        assert_eq!(tid.0, 1);
    }

    #[tokio::test]
    async fn call_produces_request_and_settles() {
        let tree = ApiTree::new();
        let (generator, mut rx, queue) = generator(&tree, "s1");
        generator.build(&demo()).unwrap();
        let handle = ApiHandle::new(tree);

        let call = tokio::spawn({
            let handle = handle.clone();
            async move {
                handle
                    .call("io.greenscreens.Demo.hello", vec![json!("John Doe")])
                    .await
            }
        });

        let outbound = rx.recv().await.unwrap();
        let request = outbound.request;
        assert_eq!(request.sid, "s1");
        assert_eq!(request.path(), "io.greenscreens.Demo.hello");
        assert!(request.e);
        assert_eq!(request.data, vec![json!("John Doe")]);

        let record = json!({
            "tid": request.tid.to_string(),
            "action": "Demo",
            "method": "hello",
            "result": {"success": true, "data": "Hello John Doe"}
        });
        assert_eq!(queue.resolve(request.tid, record), Resolution::Matched);

        let result = call.await.unwrap().unwrap();
        assert_eq!(result["data"], "Hello John Doe");
    }

    #[tokio::test]
    async fn unsuccessful_result_is_remote_error() {
        let tree = ApiTree::new();
        let (generator, mut rx, queue) = generator(&tree, "s1");
        generator.build(&demo()).unwrap();
        let stub = tree.lookup("io.greenscreens.Demo.watch").unwrap();

        let call = tokio::spawn(async move { stub.call(vec![]).await });
        let request = rx.recv().await.unwrap().request;
        queue.resolve(
            request.tid,
            json!({"result": {"success": false, "msg": "nope"}}),
        );
        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, SessionError::Remote(remote) if remote.message == "nope"));
    }

    #[tokio::test(start_paused = true)]
    async fn async_methods_are_not_timed() {
        let tree = ApiTree::new();
        let queue = Arc::new(CorrelationQueue::new());
        let (generator, mut rx) = ApiGenerator::new(
            tree.clone(),
            "s1",
            Arc::clone(&queue),
            Duration::from_millis(10),
        );
        generator.build(&demo()).unwrap();

        let watch = tree.lookup("io.greenscreens.Demo.watch").unwrap();
        let hello = tree.lookup("io.greenscreens.Demo.hello").unwrap();
        let slow = tokio::spawn(async move { watch.call(vec![]).await });
        let timed = tokio::spawn(async move { hello.call(vec![json!(1)]).await });
        let first = rx.recv().await.unwrap().request;
        let second = rx.recv().await.unwrap().request;
        let watch_tid = if first.method == "watch" {
            first.tid
        } else {
            second.tid
        };

        assert!(matches!(
            timed.await.unwrap(),
            Err(SessionError::Timeout(_))
        ));
        assert!(queue.is_pending(watch_tid));
        queue.resolve(watch_tid, json!({"result": {"success": true}}));
        assert!(slow.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn unbound_stub_reports_stopped() {
        let tree = ApiTree::new();
        let (generator, _rx, queue) = generator(&tree, "s1");
        generator.build(&demo()).unwrap();
        generator.unbind();

        let err = ApiHandle::new(tree)
            .call("io.greenscreens.Demo.hello", vec![json!(1)])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Transport(quark_transport::TransportError::Shutdown)
        ));
        assert_eq!(queue.stats().sent, 0);
    }

    #[tokio::test]
    async fn dropped_receiver_rejects_call() {
        let tree = ApiTree::new();
        let (generator, rx, queue) = generator(&tree, "s1");
        generator.build(&demo()).unwrap();
        drop(rx);

        let stub = tree.lookup("io.greenscreens.Demo.hello").unwrap();
        assert!(matches!(
            stub.call(vec![json!(1)]).await,
            Err(SessionError::Transport(_))
        ));
        assert_eq!(queue.stats().pending, 0);
    }

    #[tokio::test]
    async fn unknown_path() {
        let handle = ApiHandle::new(ApiTree::new());
        assert!(matches!(
            handle.call("a.B.c", vec![]).await,
            Err(SessionError::UnknownMethod(path)) if path == "a.B.c"
        ));
    }

    #[test]
    fn duplicate_arity_leaves_tree_untouched() {
        let tree = ApiTree::new();
        let (generator, _rx, _) = generator(&tree, "s1");
        generator.build(&demo()).unwrap();

        let mut bad = demo();
        bad[0].action = "Other".to_string();
        bad[0].methods.push(method("hello", Arity::Many(vec![1, 3]), false));
        let err = generator.build(&bad).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Schema(SchemaError::DuplicateArity { arity: 1, .. })
        ));
        assert_eq!(tree.paths().len(), 3);
    }

    #[test]
    fn method_over_branch_conflicts() {
        let tree = ApiTree::new();
        let (generator, _rx, _) = generator(&tree, "s1");
        generator.build(&demo()).unwrap();

        let clash = vec![ActionDescriptor {
            namespace: "io".to_string(),
            action: "greenscreens".to_string(),
            methods: vec![method("Demo", Arity::One(0), false)],
        }];
        assert!(matches!(
            generator.build(&clash),
            Err(SessionError::Schema(SchemaError::PathConflict { .. }))
        ));

        let under_leaf = vec![ActionDescriptor {
            namespace: "io.greenscreens.Demo".to_string(),
            action: "hello".to_string(),
            methods: vec![method("x", Arity::One(0), false)],
        }];
        assert!(matches!(
            generator.build(&under_leaf),
            Err(SessionError::Schema(SchemaError::PathConflict { path })) if path == "io.greenscreens.Demo.hello"
        ));
        assert_eq!(tree.paths().len(), 3);
    }

    #[test]
    fn detach_removes_only_own_leaves() {
        let tree = ApiTree::new();
        let (first, _rx1, _) = generator(&tree, "s1");
        let (second, _rx2, _) = generator(&tree, "s2");
        first.build(&demo()).unwrap();
        second
            .build(&[ActionDescriptor {
                namespace: "io.greenscreens".to_string(),
                action: "Admin".to_string(),
                methods: vec![method("reset", Arity::One(0), false)],
            }])
            .unwrap();

        assert_eq!(first.detach(), 3);
        assert_eq!(tree.paths(), vec!["io.greenscreens.Admin.reset"]);
        assert!(!first.is_built());

        assert_eq!(second.detach(), 1);
        assert!(tree.is_empty());
    }

    #[test]
    fn rebuild_replaces_leaves() {
        let tree = ApiTree::new();
        let (first, _rx1, _) = generator(&tree, "s1");
        let (second, _rx2, _) = generator(&tree, "s2");
        first.build(&demo()).unwrap();
        second.build(&demo()).unwrap();

        let stub = tree.lookup("io.greenscreens.Demo.hello").unwrap();
        assert_eq!(stub.session_id(), "s2");
        assert_eq!(first.detach(), 0);
        assert_eq!(tree.paths().len(), 3);
    }
}
