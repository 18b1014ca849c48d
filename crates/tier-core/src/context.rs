//! Execution context: the stack of frames used for dependency attribution
//!
//! Every `run` of a leaf pushes a [`Frame::Running`] frame and every load of a
//! node's configuration pushes a [`Frame::LoadingConfig`] frame. A lazy
//! reference used while a frame is on top is attributed to that frame's path.

use std::cell::RefCell;
use std::fmt;

use crate::path::SectionPath;

/// One entry on the execution stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// The item at this path is being materialized or executed.
    Running(SectionPath),
    /// The configuration of this path is being loaded from the store.
    LoadingConfig(SectionPath),
}

impl Frame {
    pub fn path(&self) -> &SectionPath {
        match self {
            Self::Running(path) | Self::LoadingConfig(path) => path,
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running(path) => write!(f, "running {path}"),
            Self::LoadingConfig(path) => write!(f, "loading config of {path}"),
        }
    }
}

/// Stack of active frames for one engine.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    frames: Vec<Frame>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// The most recently pushed frame.
    pub fn current(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// The path a dependency should be attributed to right now.
    ///
    /// This is the top frame's path, whichever kind it is: a config load
    /// nested inside a run attributes to the item being loaded.
    pub fn attribution(&self) -> Option<&SectionPath> {
        self.current().map(Frame::path)
    }

    /// Whether the configuration of `path` is being loaded further down.
    pub fn is_loading(&self, path: &SectionPath) -> bool {
        self.frames
            .iter()
            .any(|f| matches!(f, Frame::LoadingConfig(p) if p == path))
    }

    /// Paths whose configuration is currently loading, outermost first.
    pub fn loading_chain(&self) -> Vec<SectionPath> {
        self.frames
            .iter()
            .filter_map(|f| match f {
                Frame::LoadingConfig(p) => Some(p.clone()),
                Frame::Running(_) => None,
            })
            .collect()
    }
}

/// Pops its frame when dropped, on every exit path.
#[must_use = "the frame is popped as soon as the guard is dropped"]
pub struct FrameGuard<'a> {
    context: &'a RefCell<ExecutionContext>,
}

impl<'a> FrameGuard<'a> {
    pub fn enter(context: &'a RefCell<ExecutionContext>, frame: Frame) -> Self {
        tracing::trace!(%frame, "push frame");
        context.borrow_mut().push(frame);
        Self { context }
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        if let Some(frame) = self.context.borrow_mut().pop() {
            tracing::trace!(%frame, "pop frame");
        }
    }
}
