//! Run-scoped key/value store shared by every node of a flow.
//!
//! Inside the scheduling process the map lives behind a mutex, so each
//! mutating call is atomic with respect to all in-process callers. Worker
//! processes get a proxy that forwards every call to the parent over IPC;
//! the parent applies it under the same mutex. Read-your-own-writes is not
//! guaranteed across process boundaries: a read issued from one process
//! only observes a write from another once that write's reply has been
//! delivered.

use crate::StateError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// One state operation, as carried over the process-pool pipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StateOp {
    Get { key: String },
    Set { key: String, value: Value },
    Delete { key: String },
    Update { entries: Map<String, Value> },
    Snapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StateReply {
    Found { value: Value },
    Missing,
    Done,
    Snapshot { entries: Map<String, Value> },
    Error { message: String },
}

/// Carries state operations to the process that owns the map.
pub trait StateTransport: Send + Sync {
    fn call(&self, op: StateOp) -> Result<StateReply, StateError>;
}

enum Backing {
    Local(Mutex<Map<String, Value>>),
    Remote(Box<dyn StateTransport>),
}

/// Cheaply cloneable handle; clones share one store.
#[derive(Clone)]
pub struct GlobalState {
    backing: Arc<Backing>,
}

impl fmt::Debug for GlobalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match *self.backing {
            Backing::Local(_) => "local",
            Backing::Remote(_) => "remote",
        };
        f.debug_struct("GlobalState").field("backing", &kind).finish()
    }
}

impl Default for GlobalState {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalState {
    pub fn new() -> Self {
        Self::with_entries(Map::new())
    }

    pub fn with_entries(entries: Map<String, Value>) -> Self {
        Self {
            backing: Arc::new(Backing::Local(Mutex::new(entries))),
        }
    }

    /// Proxy whose calls are forwarded through `transport`.
    pub fn remote(transport: impl StateTransport + 'static) -> Self {
        Self {
            backing: Arc::new(Backing::Remote(Box::new(transport))),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(*self.backing, Backing::Remote(_))
    }

    // Async surface. None of these hold the lock across an await point, so
    // they are safe to call from any task.

    pub async fn get(&self, key: &str) -> Result<Option<Value>, StateError> {
        self.get_sync(key)
    }

    pub async fn get_or(&self, key: &str, default: Value) -> Result<Value, StateError> {
        self.get_or_sync(key, default)
    }

    pub async fn set(&self, key: impl Into<String>, value: Value) -> Result<(), StateError> {
        self.set_sync(key, value)
    }

    pub async fn delete(&self, key: &str) -> Result<(), StateError> {
        self.delete_sync(key)
    }

    pub async fn update<I>(&self, entries: I) -> Result<(), StateError>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        self.update_sync(entries)
    }

    pub async fn snapshot(&self) -> Result<Map<String, Value>, StateError> {
        self.snapshot_sync()
    }

    // Sync surface, for synchronous logic and worker processes. On a
    // remote handle each call blocks until the owner replies.

    pub fn get_sync(&self, key: &str) -> Result<Option<Value>, StateError> {
        match self.apply(StateOp::Get { key: key.to_string() })? {
            StateReply::Found { value } => Ok(Some(value)),
            StateReply::Missing => Ok(None),
            other => Err(unexpected(other)),
        }
    }

    pub fn get_or_sync(&self, key: &str, default: Value) -> Result<Value, StateError> {
        Ok(self.get_sync(key)?.unwrap_or(default))
    }

    pub fn set_sync(&self, key: impl Into<String>, value: Value) -> Result<(), StateError> {
        self.expect_done(StateOp::Set {
            key: key.into(),
            value,
        })
    }

    pub fn delete_sync(&self, key: &str) -> Result<(), StateError> {
        self.expect_done(StateOp::Delete { key: key.to_string() })
    }

    pub fn update_sync<I>(&self, entries: I) -> Result<(), StateError>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        self.expect_done(StateOp::Update {
            entries: entries.into_iter().collect(),
        })
    }

    pub fn snapshot_sync(&self) -> Result<Map<String, Value>, StateError> {
        match self.apply(StateOp::Snapshot)? {
            StateReply::Snapshot { entries } => Ok(entries),
            other => Err(unexpected(other)),
        }
    }

    /// Execute one operation against this store. The owning side of the
    /// process-pool pipe answers worker requests through this.
    pub fn apply(&self, op: StateOp) -> Result<StateReply, StateError> {
        match &*self.backing {
            Backing::Local(map) => Ok(apply_local(&mut map.lock(), op)),
            Backing::Remote(transport) => match transport.call(op)? {
                StateReply::Error { message } => Err(StateError::Transport(message)),
                reply => Ok(reply),
            },
        }
    }

    fn expect_done(&self, op: StateOp) -> Result<(), StateError> {
        match self.apply(op)? {
            StateReply::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

fn apply_local(map: &mut Map<String, Value>, op: StateOp) -> StateReply {
    match op {
        StateOp::Get { key } => match map.get(&key) {
            Some(value) => StateReply::Found {
                value: value.clone(),
            },
            None => StateReply::Missing,
        },
        StateOp::Set { key, value } => {
            map.insert(key, value);
            StateReply::Done
        }
        StateOp::Delete { key } => {
            map.remove(&key);
            StateReply::Done
        }
        StateOp::Update { entries } => {
            map.extend(entries);
            StateReply::Done
        }
        StateOp::Snapshot => StateReply::Snapshot {
            entries: map.clone(),
        },
    }
}

fn unexpected(reply: StateReply) -> StateError {
    StateError::Protocol(format!("{:?}", reply))
}
