//! The tap-inject control object.
//!
//! [`TapInject`] owns the configuration path: it validates inject requests,
//! provisions the host TAP, starts the namespace watcher when needed,
//! registers input hooks and finally publishes the binding.

use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use tracing::{debug, error, info};

use crate::dataplane::Dataplane;
use crate::directory::MappingDirectory;
use crate::error::{ConfigError, Result};
use crate::hooks::InputHooks;
use crate::interface::{InterfaceId, TapId};
use crate::netns::NamespaceSource;
use crate::protocol::ProtocolSet;
use crate::provision::{TapProvisioner, validate_tap_name};

/// A request to divert `protocols` from `interface` to a TAP named
/// `tap_name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectRequest {
    pub protocols: ProtocolSet,
    pub interface: InterfaceId,
    pub tap_name: String,
}

impl InjectRequest {
    pub fn new(protocols: ProtocolSet, interface: InterfaceId, tap_name: impl Into<String>) -> Self {
        Self {
            protocols,
            interface,
            tap_name: tap_name.into(),
        }
    }
}

/// Configuration path of tap-inject.
pub struct TapInject<D, P> {
    directory: Arc<MappingDirectory>,
    dataplane: Arc<D>,
    hooks: Arc<ArcSwap<InputHooks>>,
    provisioner: P,
    namespace: Box<dyn NamespaceSource>,
    namespace_open: Mutex<bool>,
}

impl<D: Dataplane, P: TapProvisioner> TapInject<D, P> {
    pub fn new(
        directory: Arc<MappingDirectory>,
        dataplane: Arc<D>,
        hooks: Arc<ArcSwap<InputHooks>>,
        provisioner: P,
        namespace: Box<dyn NamespaceSource>,
    ) -> Self {
        Self {
            directory,
            dataplane,
            hooks,
            provisioner,
            namespace,
            namespace_open: Mutex::new(false),
        }
    }

    pub fn directory(&self) -> &Arc<MappingDirectory> {
        &self.directory
    }

    pub fn provisioner(&self) -> &P {
        &self.provisioner
    }

    /// Dataplane interface created or re-created: forget its binding.
    pub fn interface_added(&self, interface: InterfaceId) {
        self.directory.reset(interface);
        debug!(%interface, "Interface binding reset");
    }

    /// Dataplane interface removed: forget its binding.
    pub fn interface_removed(&self, interface: InterfaceId) {
        self.directory.reset(interface);
        debug!(%interface, "Interface binding cleared");
    }

    /// Check a request without touching any state.
    pub fn validate(&self, request: &InjectRequest) -> std::result::Result<(), ConfigError> {
        if request.protocols.is_empty() {
            return Err(ConfigError::NoProtocols);
        }
        if !self.dataplane.interface_exists(request.interface) {
            return Err(ConfigError::UnknownInterface(request.interface));
        }
        if request.tap_name.is_empty() {
            return Err(ConfigError::MissingTapName);
        }
        validate_tap_name(&request.tap_name)?;
        request.protocols.validate()?;
        Ok(())
    }

    /// Enable tap-inject for `request`.
    ///
    /// On any error the directory is left untouched and a TAP created along
    /// the way is torn down again.
    pub fn enable(&self, request: &InjectRequest) -> Result<TapId> {
        self.validate(request)?;

        let tap = self
            .provisioner
            .provision(&request.tap_name, request.interface)?;

        if request.protocols.needs_namespace_sync()
            && let Err(e) = self.ensure_namespace()
        {
            error!(error = %e, tap = %request.tap_name, "Failed to open host namespace");
            self.provisioner.release(tap);
            return Err(e);
        }

        self.hooks.rcu(|current| {
            let mut hooks = (**current).clone();
            hooks.register(request.protocols);
            hooks
        });

        self.directory
            .bind(request.interface, tap, request.protocols);

        info!(
            interface = %request.interface,
            tap = %request.tap_name,
            host_index = tap.host_index,
            protocols = %request.protocols,
            "Tap inject enabled"
        );
        Ok(tap)
    }

    fn ensure_namespace(&self) -> Result<()> {
        let mut open = self
            .namespace_open
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !*open {
            self.namespace.open()?;
            *open = true;
        }
        Ok(())
    }
}
