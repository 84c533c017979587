use crate::core::command::Opcode;
use crate::error::{constants, ProtocolError, Result};
use crate::transport::server::{Inbound, Server};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

type HandlerFn = dyn Fn(&Server, &Inbound) -> Result<()> + Send + Sync + 'static;

/// Opcode-based routing for inbound commands.
///
/// Handlers reply through the `&Server` they are given. A dispatcher turns
/// into a server callback with [`Dispatcher::into_callback`].
#[derive(Clone)]
pub struct Dispatcher {
    handlers: Arc<RwLock<HashMap<Opcode, Box<HandlerFn>>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Route `opcode` to `handler`, replacing any previous handler
    pub fn register<F>(&self, opcode: Opcode, handler: F) -> Result<()>
    where
        F: Fn(&Server, &Inbound) -> Result<()> + Send + Sync + 'static,
    {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_DISPATCHER_WRITE_LOCK.into()))?;

        handlers.insert(opcode, Box::new(handler));
        Ok(())
    }

    /// Run the handler for the inbound command's opcode.
    ///
    /// An opcode without a handler yields `UnknownOpcode`.
    pub fn dispatch(&self, server: &Server, inbound: &Inbound) -> Result<()> {
        let opcode = inbound.opcode();

        let handlers = self
            .handlers
            .read()
            .map_err(|_| ProtocolError::Custom(constants::ERR_DISPATCHER_READ_LOCK.into()))?;

        handlers
            .get(&opcode)
            .ok_or(ProtocolError::UnknownOpcode(opcode.as_u16()))
            .and_then(|handler| handler(server, inbound))
    }

    pub fn is_registered(&self, opcode: Opcode) -> bool {
        self.handlers
            .read()
            .map(|h| h.contains_key(&opcode))
            .unwrap_or(false)
    }

    /// Adapt into a callback for [`Server::start`]; handler errors are logged
    pub fn into_callback(self) -> impl Fn(&Server, Inbound) + Send + Sync + 'static {
        move |server: &Server, inbound: Inbound| {
            if let Err(e) = self.dispatch(server, &inbound) {
                debug!(opcode = inbound.opcode().name(), error = %e, "Dispatch failed");
            }
        }
    }
}
