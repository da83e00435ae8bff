//! Routes decoded payloads to per-type callbacks.
//!
//! Each registration erases a `(decode, callback)` pair into one
//! [`HandlerEntry`] keyed by [`MessageType`]. Dispatch clones the entry out
//! of the table and runs it after the lock is dropped, so a callback may
//! register, unregister or dispatch on the same table.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use thiserror::Error;
use tracing::trace;

use crate::{
    error::BoxError,
    net::{ConnectionId, NetworkError, ServerContext},
    protocol::{DecodeError, FrameFlags, MessageType, Payload},
};

/// What a message callback returns.
pub type HandlerResult = crate::error::Result<()>;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("a handler for {0} is already registered")]
    AlreadyRegistered(MessageType),

    #[error("no handler registered for {0}")]
    NoHandler(MessageType),

    #[error("unknown message type tag {0:#04x}")]
    UnknownMessageType(u8),

    #[error("failed to decode {message_type} payload")]
    Decode {
        message_type: MessageType,
        source: DecodeError,
    },

    #[error("{message_type} handler failed")]
    Handler {
        message_type: MessageType,
        source: BoxError,
    },

    #[error("dispatch table lock poisoned")]
    PoisonedLock,
}

/// Where a message came from.
///
/// Messages read by the server carry the connection they arrived on and a
/// handle to the server; messages dispatched by hand carry neither.
#[derive(Clone, Default)]
pub struct Origin {
    connection: Option<ConnectionId>,
    context: Option<ServerContext>,
}

impl Origin {
    pub fn new(connection: ConnectionId, context: ServerContext) -> Self {
        Self {
            connection: Some(connection),
            context: Some(context),
        }
    }

    pub fn detached() -> Self {
        Self::default()
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.connection
    }

    pub fn context(&self) -> Option<&ServerContext> {
        self.context.as_ref()
    }

    /// Send `message` back on the originating connection.
    pub fn reply<P: Payload>(&self, message: &P) -> HandlerResult {
        match (self.connection, &self.context) {
            (Some(id), Some(context)) => {
                context.send_frame(id, message, FrameFlags::empty())?;
                Ok(())
            }
            _ => Err(Box::new(NetworkError::InvalidState(
                "message has no originating connection".to_string(),
            ))),
        }
    }
}

impl fmt::Debug for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Origin")
            .field("connection", &self.connection)
            .field("attached", &self.context.is_some())
            .finish()
    }
}

type Invoke = dyn Fn(&[u8], &Origin) -> Result<(), DispatchError> + Send + Sync;

/// One registered handler: a payload decoder fused with its callback.
pub struct HandlerEntry {
    message_type: MessageType,
    payload_type: &'static str,
    invoke: Box<Invoke>,
}

impl HandlerEntry {
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// Rust type name of the decoded payload.
    pub fn payload_type(&self) -> &'static str {
        self.payload_type
    }

    /// Decode `payload` and, only if that succeeds, run the callback.
    pub fn invoke(&self, payload: &[u8], origin: &Origin) -> Result<(), DispatchError> {
        (self.invoke)(payload, origin)
    }
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("message_type", &self.message_type)
            .field("payload_type", &self.payload_type)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct DispatchTable {
    handlers: Mutex<HashMap<MessageType, Arc<HandlerEntry>>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<MessageType, Arc<HandlerEntry>>>, DispatchError> {
        self.handlers.lock().map_err(|_| DispatchError::PoisonedLock)
    }

    // Read-only queries; entries are only ever inserted or removed whole.
    fn lock_recovered(&self) -> MutexGuard<'_, HashMap<MessageType, Arc<HandlerEntry>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `callback` for payloads of type `P`.
    pub fn register<P, F>(&self, callback: F) -> Result<(), DispatchError>
    where
        P: Payload,
        F: Fn(&P, &Origin) -> HandlerResult + Send + Sync + 'static,
    {
        self.register_with(P::TYPE, P::decode, callback)
    }

    /// Register an explicit decoder and callback for `message_type`.
    ///
    /// Fails with [`DispatchError::AlreadyRegistered`] if the tag is taken;
    /// the existing handler stays in place.
    pub fn register_with<T, D, F>(
        &self,
        message_type: MessageType,
        decode: D,
        callback: F,
    ) -> Result<(), DispatchError>
    where
        T: 'static,
        D: Fn(&[u8]) -> Result<T, DecodeError> + Send + Sync + 'static,
        F: Fn(&T, &Origin) -> HandlerResult + Send + Sync + 'static,
    {
        let mut handlers = self.lock()?;
        if handlers.contains_key(&message_type) {
            return Err(DispatchError::AlreadyRegistered(message_type));
        }

        let invoke = move |payload: &[u8], origin: &Origin| {
            let message = decode(payload).map_err(|source| DispatchError::Decode {
                message_type,
                source,
            })?;
            callback(&message, origin).map_err(|source| DispatchError::Handler {
                message_type,
                source,
            })
        };

        handlers.insert(
            message_type,
            Arc::new(HandlerEntry {
                message_type,
                payload_type: std::any::type_name::<T>(),
                invoke: Box::new(invoke),
            }),
        );
        trace!(%message_type, payload = std::any::type_name::<T>(), "handler registered");
        Ok(())
    }

    /// Returns whether a handler was removed.
    pub fn unregister(&self, message_type: MessageType) -> bool {
        self.lock_recovered().remove(&message_type).is_some()
    }

    pub fn has(&self, message_type: MessageType) -> bool {
        self.lock_recovered().contains_key(&message_type)
    }

    pub fn get(&self, message_type: MessageType) -> Option<Arc<HandlerEntry>> {
        self.lock_recovered().get(&message_type).cloned()
    }

    pub fn count(&self) -> usize {
        self.lock_recovered().len()
    }

    pub fn clear(&self) {
        self.lock_recovered().clear();
    }

    /// Decode `payload` as `message_type` and run its handler.
    pub fn dispatch(&self, message_type: MessageType, payload: &[u8]) -> Result<(), DispatchError> {
        self.dispatch_typed(&Origin::detached(), message_type, payload)
    }

    /// Like [`dispatch`](Self::dispatch), for a raw tag read off the wire.
    pub fn dispatch_raw(&self, tag: u8, payload: &[u8]) -> Result<(), DispatchError> {
        self.dispatch_from(&Origin::detached(), tag, payload)
    }

    /// Dispatch a payload received from a connection.
    pub fn dispatch_from(&self, origin: &Origin, tag: u8, payload: &[u8]) -> Result<(), DispatchError> {
        let message_type =
            MessageType::from_u8(tag).ok_or(DispatchError::UnknownMessageType(tag))?;
        self.dispatch_typed(origin, message_type, payload)
    }

    fn dispatch_typed(
        &self,
        origin: &Origin,
        message_type: MessageType,
        payload: &[u8],
    ) -> Result<(), DispatchError> {
        let entry = self
            .lock()?
            .get(&message_type)
            .cloned()
            .ok_or(DispatchError::NoHandler(message_type))?;

        trace!(%message_type, len = payload.len(), "dispatching");
        entry.invoke(payload, origin)
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.lock_recovered();
        let mut types: Vec<_> = handlers.keys().copied().collect();
        types.sort();
        f.debug_struct("DispatchTable")
            .field("handlers", &types)
            .finish()
    }
}
