//! Supervisor bus - remote-object proxies for system services.
//!
//! Service wrappers (storage daemons, network managers, firmware updaters,
//! login managers, ...) talk to their daemons through this crate instead of
//! hand-written bus bindings. The main pieces:
//!
//! - Introspection-driven [`dbus::RemoteObject`] connections with retry
//! - Per-interface [`dbus::Dispatcher`]s that validate members before sending
//! - [`dbus::DbusProxy`], a property cache kept in step with
//!   `PropertiesChanged`
//! - Scoped one-shot signal waits
//! - Tolerant decoding of integer and string enums
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use supervisor_bus::{
//!     config::BusConfig,
//!     dbus::{DbusProxy, ServiceDescriptor, ZbusTransport},
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BusConfig::default();
//! let transport = Arc::new(ZbusTransport::system(config.call_timeout()).await?);
//!
//! let proxy = DbusProxy::new(
//!     ServiceDescriptor::new(
//!         "org.freedesktop.hostname1",
//!         "/org/freedesktop/hostname1",
//!         "org.freedesktop.hostname1",
//!     ),
//!     config.introspect_policy(),
//! );
//! proxy.connect(transport).await?;
//! println!("{:?}", proxy.property("Hostname"));
//! # Ok(())
//! # }
//! ```

/// Bus configuration loaded from TOML.
pub mod config;

/// Remote-object proxy framework.
pub mod dbus;

/// Command-line interface for inspecting bus objects.
pub mod cli;

/// Logging initialisation.
pub mod tracing_config;
