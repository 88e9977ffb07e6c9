//! Scripted session fakes for executor and operation tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use tenantgraph_core::{ExecutionError, Params, Row};

use crate::session::{GraphSession, SessionFactory};

type Response = Result<Vec<Row>, ExecutionError>;

#[derive(Default)]
struct Shared {
    responses: Mutex<VecDeque<Response>>,
    submitted: Mutex<Vec<(String, Params)>>,
    opened: AtomicUsize,
    committed: AtomicUsize,
    rolled_back: AtomicUsize,
    commit_error: Option<ExecutionError>,
}

/// Replays canned responses in order, recording every submitted query.
pub(crate) struct ScriptedSessions {
    shared: Arc<Shared>,
    open_error: Option<ExecutionError>,
}

impl ScriptedSessions {
    pub(crate) fn new(responses: Vec<Response>) -> Self {
        let shared = Shared {
            responses: Mutex::new(responses.into()),
            ..Default::default()
        };
        Self {
            shared: Arc::new(shared),
            open_error: None,
        }
    }

    /// Queries succeed as scripted but every commit fails with `error`.
    pub(crate) fn failing_commit(responses: Vec<Response>, error: ExecutionError) -> Self {
        let shared = Shared {
            responses: Mutex::new(responses.into()),
            commit_error: Some(error),
            ..Default::default()
        };
        Self {
            shared: Arc::new(shared),
            open_error: None,
        }
    }

    pub(crate) fn failing_open(error: ExecutionError) -> Self {
        Self {
            open_error: Some(error),
            ..Self::new(Vec::new())
        }
    }

    pub(crate) fn submitted(&self) -> Vec<(String, Params)> {
        self.shared.submitted.lock().unwrap().clone()
    }

    pub(crate) fn opened(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    pub(crate) fn committed(&self) -> usize {
        self.shared.committed.load(Ordering::SeqCst)
    }

    pub(crate) fn rolled_back(&self) -> usize {
        self.shared.rolled_back.load(Ordering::SeqCst)
    }

    /// Sessions ended either way.
    pub(crate) fn closed(&self) -> usize {
        self.committed() + self.rolled_back()
    }
}

#[async_trait]
impl SessionFactory for ScriptedSessions {
    async fn open(&self) -> Result<Box<dyn GraphSession>, ExecutionError> {
        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = &self.open_error {
            return Err(e.clone());
        }
        Ok(Box::new(ScriptedSession {
            shared: self.shared.clone(),
        }))
    }
}

struct ScriptedSession {
    shared: Arc<Shared>,
}

#[async_trait]
impl GraphSession for ScriptedSession {
    async fn run(&mut self, query: &str, params: &Params) -> Result<Vec<Row>, ExecutionError> {
        self.shared
            .submitted
            .lock()
            .unwrap()
            .push((query.to_string(), params.clone()));
        self.shared
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ExecutionError::Query("no scripted response".into())))
    }

    async fn commit(self: Box<Self>) -> Result<(), ExecutionError> {
        self.shared.committed.fetch_add(1, Ordering::SeqCst);
        match &self.shared.commit_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn rollback(self: Box<Self>) {
        self.shared.rolled_back.fetch_add(1, Ordering::SeqCst);
    }
}
