//! Built-in connection protocols.
//!
//! Each protocol registers itself with [`register_protocol!`](crate::register_protocol).
//! Protocols behind a disabled cargo feature are still declared, so discovery
//! can report them instead of failing later with an unknown protocol.

pub mod local;

#[cfg(feature = "docker")]
pub mod docker;

#[cfg(feature = "ssh")]
pub mod ssh;

#[cfg(feature = "docker")]
use docker::DockerConnectionBuilder;
use local::LocalConnectionBuilder;
#[cfg(feature = "ssh")]
use ssh::SshConnectionBuilder;

pub const LOCAL_PROTOCOL: &str = "local";
pub const DOCKER_PROTOCOL: &str = "docker";
pub const SSH_PROTOCOL: &str = "ssh";

crate::register_protocol!(LOCAL_PROTOCOL, LocalConnectionBuilder);

#[cfg(feature = "docker")]
crate::register_protocol!(DOCKER_PROTOCOL, DockerConnectionBuilder);

#[cfg(not(feature = "docker"))]
crate::declare_protocol!(DOCKER_PROTOCOL, "DockerConnectionBuilder");

#[cfg(feature = "ssh")]
crate::register_protocol!(SSH_PROTOCOL, SshConnectionBuilder);

#[cfg(not(feature = "ssh"))]
crate::declare_protocol!(SSH_PROTOCOL, "SshConnectionBuilder");
