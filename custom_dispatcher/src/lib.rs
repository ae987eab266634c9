use std::collections::HashMap;

use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error("failed to encode payload for event `{event}`: {source}")]
    Encode {
        event: String,
        source: bincode::Error,
    },
    #[error("listener for event `{event}` could not decode payload: {source}")]
    Decode {
        event: String,
        source: bincode::Error,
    },
}

type Callback = Box<dyn FnMut(&[u8]) -> Result<(), bincode::Error> + Send + 'static>;

pub struct Listener {
    callback: Callback,
    limit: Option<u64>,
    id: String,
}

/// Named-event registry. Payloads are serialized once per emit and handed to
/// every listener of the event, in registration order, on the calling thread.
#[derive(Default)]
pub struct EventEmitter {
    pub listeners: HashMap<String, Vec<Listener>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self { ..Self::default() }
    }

    pub fn on<T, F>(&mut self, event: &str, callback: F) -> String
    where
        T: DeserializeOwned,
        F: FnMut(T) + Send + 'static,
    {
        self.on_limited(event, None, callback)
    }

    /// Registers a listener that is dropped after `limit` invocations.
    pub fn on_limited<T, F>(&mut self, event: &str, limit: Option<u64>, mut callback: F) -> String
    where
        T: DeserializeOwned,
        F: FnMut(T) + Send + 'static,
    {
        let id = Uuid::new_v4().to_string();
        let parsed_callback = move |bytes: &[u8]| {
            let value: T = bincode::deserialize(bytes)?;
            callback(value);
            Ok(())
        };

        self.listeners
            .entry(event.to_string())
            .or_default()
            .push(Listener {
                id: id.clone(),
                limit,
                callback: Box::new(parsed_callback),
            });

        id
    }

    /// Removes the listener with the given id. Returns whether one was found.
    pub fn off(&mut self, id: &str) -> bool {
        let mut found = false;
        for listeners in self.listeners.values_mut() {
            let before = listeners.len();
            listeners.retain(|l| l.id != id);
            found |= listeners.len() != before;
        }
        found
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.get(event).map_or(0, Vec::len)
    }

    /// Invokes every listener of `event` and returns how many ran.
    pub fn emit<T>(&mut self, event: &str, value: &T) -> Result<usize, DispatchError>
    where
        T: Serialize,
    {
        let listeners = match self.listeners.get_mut(event) {
            Some(listeners) if !listeners.is_empty() => listeners,
            _ => return Ok(0),
        };

        let bytes = bincode::serialize(value).map_err(|source| DispatchError::Encode {
            event: event.to_string(),
            source,
        })?;

        let mut invoked = 0;
        for listener in listeners.iter_mut() {
            if listener.limit == Some(0) {
                continue;
            }
            (listener.callback)(&bytes).map_err(|source| DispatchError::Decode {
                event: event.to_string(),
                source,
            })?;
            if let Some(limit) = listener.limit.as_mut() {
                *limit -= 1;
            }
            invoked += 1;
        }

        listeners.retain(|l| l.limit != Some(0));

        Ok(invoked)
    }
}
