//! Capture coverage for same-origin embedded frames.
//!
//! Script injected into a page does not reach frame documents on its own, and
//! some editors build their real editing surface inside a frame created after
//! load. [`FrameCoverage`] attaches the page's capture listeners to every
//! reachable frame document, re-attaches when a frame navigates, and picks up
//! frames inserted later through a subtree observer.

use std::collections::HashMap;
use thiserror::Error;

pub type NodeId = u64;
pub type FrameId = u64;
pub type DocumentId = u64;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameAccessError {
    #[error("frame {0} is cross-origin")]
    CrossOrigin(FrameId),
    #[error("frame {0} has no content document")]
    NoDocument(FrameId),
    #[error("document {0} is no longer reachable")]
    Detached(DocumentId),
}

/// The page environment the coverage manager works against.
///
/// A browser binding implements this over the real DOM; the listeners it
/// installs must feed the same engine that serves the top document.
pub trait FrameHost {
    /// Frame elements at or below `node`, including `node` itself when it
    /// is a frame.
    fn frames_within(&self, node: NodeId) -> Vec<FrameId>;

    fn content_document(&self, frame: FrameId) -> Result<DocumentId, FrameAccessError>;

    /// Installs the capture-phase key and paste listeners on `doc`.
    fn install_listeners(&mut self, doc: DocumentId) -> Result<(), FrameAccessError>;

    fn remove_listeners(&mut self, doc: DocumentId) -> Result<(), FrameAccessError>;

    /// Routes the frame's `load` event back to the engine.
    fn watch_load(&mut self, frame: FrameId);

    fn unwatch_load(&mut self, frame: FrameId);

    /// Starts a `childList`/`subtree` observer rooted at `root`.
    fn observe_subtree(&mut self, root: NodeId);

    fn disconnect_observer(&mut self);
}

/// Host without any frames, for surfaces that are a single document
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFrames;

impl FrameHost for NoFrames {
    fn frames_within(&self, _node: NodeId) -> Vec<FrameId> {
        Vec::new()
    }

    fn content_document(&self, frame: FrameId) -> Result<DocumentId, FrameAccessError> {
        Err(FrameAccessError::NoDocument(frame))
    }

    fn install_listeners(&mut self, _doc: DocumentId) -> Result<(), FrameAccessError> {
        Ok(())
    }

    fn remove_listeners(&mut self, _doc: DocumentId) -> Result<(), FrameAccessError> {
        Ok(())
    }

    fn watch_load(&mut self, _frame: FrameId) {}

    fn unwatch_load(&mut self, _frame: FrameId) {}

    fn observe_subtree(&mut self, _root: NodeId) {}

    fn disconnect_observer(&mut self) {}
}

#[derive(Debug, Default)]
pub struct FrameCoverage {
    attached: HashMap<FrameId, DocumentId>,
    known: Vec<FrameId>,
    watching: Option<NodeId>,
}

impl FrameCoverage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Best-effort: a cross-origin frame is left uncovered without error.
    /// Attaching twice to the same document does nothing the second time.
    pub fn attach<H: FrameHost + ?Sized>(&mut self, host: &mut H, frame: FrameId) {
        let doc = match host.content_document(frame) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::debug!(frame, error = %e, "frame left uncovered");
                return;
            }
        };

        match self.attached.get(&frame) {
            Some(&current) if current == doc => return,
            Some(&stale) => {
                // navigated: the old document is usually gone already
                let _ = host.remove_listeners(stale);
            }
            None => {}
        }

        match host.install_listeners(doc) {
            Ok(()) => {
                tracing::trace!(frame, doc, "frame covered");
                self.attached.insert(frame, doc);
            }
            Err(e) => {
                tracing::debug!(frame, error = %e, "could not install frame listeners");
                self.attached.remove(&frame);
            }
        }
    }

    pub fn detach<H: FrameHost + ?Sized>(&mut self, host: &mut H, frame: FrameId) {
        let doc = self
            .attached
            .remove(&frame)
            .or_else(|| host.content_document(frame).ok());
        if let Some(doc) = doc {
            if let Err(e) = host.remove_listeners(doc) {
                tracing::debug!(frame, error = %e, "could not remove frame listeners");
            }
        }
    }

    pub fn start_watching<H: FrameHost + ?Sized>(&mut self, host: &mut H, root: NodeId) {
        if self.watching.is_some() {
            self.stop_watching(host);
        }
        self.cover_subtree(host, root);
        host.observe_subtree(root);
        self.watching = Some(root);
    }

    /// Mutation observer callback: covers frames anywhere inside the added
    /// nodes, so a bulk-inserted subtree with nested frames is handled too.
    pub fn on_nodes_added<H: FrameHost + ?Sized>(&mut self, host: &mut H, nodes: &[NodeId]) {
        if self.watching.is_none() {
            return;
        }
        for &node in nodes {
            self.cover_subtree(host, node);
        }
    }

    /// A frame's `load` fired, so its document may have been replaced.
    pub fn on_frame_load<H: FrameHost + ?Sized>(&mut self, host: &mut H, frame: FrameId) {
        if self.watching.is_some() {
            self.attach(host, frame);
        }
    }

    pub fn stop_watching<H: FrameHost + ?Sized>(&mut self, host: &mut H) {
        if self.watching.take().is_some() {
            host.disconnect_observer();
        }
        for frame in std::mem::take(&mut self.known) {
            host.unwatch_load(frame);
            self.detach(host, frame);
        }
        self.attached.clear();
    }

    pub fn is_watching(&self) -> bool {
        self.watching.is_some()
    }

    pub fn is_attached(&self, frame: FrameId) -> bool {
        self.attached.contains_key(&frame)
    }

    pub fn attached_count(&self) -> usize {
        self.attached.len()
    }

    fn cover_subtree<H: FrameHost + ?Sized>(&mut self, host: &mut H, node: NodeId) {
        for frame in host.frames_within(node) {
            if !self.known.contains(&frame) {
                host.watch_load(frame);
                self.known.push(frame);
            }
            self.attach(host, frame);
        }
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::{HashMap, HashSet};

    /// In-memory page tree for exercising frame coverage
    #[derive(Debug, Default)]
    pub struct FakeDom {
        pub children: HashMap<NodeId, Vec<NodeId>>,
        pub frames: HashMap<FrameId, Result<DocumentId, FrameAccessError>>,
        pub listening: HashSet<DocumentId>,
        pub install_calls: usize,
        pub load_hooks: HashSet<FrameId>,
        pub observing: Option<NodeId>,
    }

    impl FakeDom {
        pub fn add_node(&mut self, parent: NodeId, node: NodeId) {
            self.children.entry(parent).or_default().push(node);
        }

        pub fn add_frame(&mut self, parent: NodeId, frame: FrameId, doc: DocumentId) {
            self.add_node(parent, frame);
            self.frames.insert(frame, Ok(doc));
        }

        pub fn add_cross_origin_frame(&mut self, parent: NodeId, frame: FrameId) {
            self.add_node(parent, frame);
            self.frames
                .insert(frame, Err(FrameAccessError::CrossOrigin(frame)));
        }

        pub fn navigate(&mut self, frame: FrameId, doc: DocumentId) {
            if let Some(Ok(old)) = self.frames.insert(frame, Ok(doc)) {
                // the old document goes away with its listeners
                self.listening.remove(&old);
            }
        }
    }

    impl FrameHost for FakeDom {
        fn frames_within(&self, node: NodeId) -> Vec<FrameId> {
            let mut found = Vec::new();
            let mut stack = vec![node];
            while let Some(n) = stack.pop() {
                if self.frames.contains_key(&n) {
                    found.push(n);
                }
                if let Some(kids) = self.children.get(&n) {
                    stack.extend(kids.iter().rev());
                }
            }
            found
        }

        fn content_document(&self, frame: FrameId) -> Result<DocumentId, FrameAccessError> {
            self.frames
                .get(&frame)
                .cloned()
                .unwrap_or(Err(FrameAccessError::NoDocument(frame)))
        }

        fn install_listeners(&mut self, doc: DocumentId) -> Result<(), FrameAccessError> {
            self.install_calls += 1;
            self.listening.insert(doc);
            Ok(())
        }

        fn remove_listeners(&mut self, doc: DocumentId) -> Result<(), FrameAccessError> {
            if self.listening.remove(&doc) {
                Ok(())
            } else {
                Err(FrameAccessError::Detached(doc))
            }
        }

        fn watch_load(&mut self, frame: FrameId) {
            self.load_hooks.insert(frame);
        }

        fn unwatch_load(&mut self, frame: FrameId) {
            self.load_hooks.remove(&frame);
        }

        fn observe_subtree(&mut self, root: NodeId) {
            self.observing = Some(root);
        }

        fn disconnect_observer(&mut self) {
            self.observing = None;
        }
    }
}
