pub mod connection;
mod dispatcher;
pub mod hooks;
pub mod server;

pub use connection::{Connection, ConnectionId, Flush, Status};
pub use corral_core::{EngineError, Result, ServerConfig};
pub use hooks::{Hook, HookContext, HookKind, HookTable, ReadWindow};
pub use server::{Server, ServerHandle};

use std::net::Ipv4Addr;

/// Fluent construction of a [`Server`] with its hooks installed up front.
pub struct ServerBuilder {
    pub config: ServerConfig,
    hooks: HookTable,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            hooks: HookTable::default(),
        }
    }

    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn host(mut self, host: Ipv4Addr) -> Self {
        self.config.host = host;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.config.nodelay = nodelay;
        self
    }

    pub fn hook(mut self, hook: Hook) -> Self {
        self.hooks.set(hook);
        self
    }

    pub fn on_join(self, f: impl Fn(&mut HookContext<'_>) -> bool + Send + Sync + 'static) -> Self {
        self.hook(Hook::join(f))
    }

    pub fn on_leave(self, f: impl Fn(&mut HookContext<'_>) + Send + Sync + 'static) -> Self {
        self.hook(Hook::leave(f))
    }

    pub fn on_data(
        self,
        f: impl Fn(&mut HookContext<'_>, &mut ReadWindow<'_>) + Send + Sync + 'static,
    ) -> Self {
        self.hook(Hook::data_ready(f))
    }

    pub fn on_pre_write(self, f: impl Fn(&mut HookContext<'_>, &[u8]) + Send + Sync + 'static) -> Self {
        self.hook(Hook::pre_write(f))
    }

    /// Validates the configuration and creates the (closed) server.
    pub fn build(self) -> Result<Server> {
        self.config.validate()?;
        Ok(Server::with_hooks(self.config, self.hooks))
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
