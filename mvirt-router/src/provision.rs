//! Host TAP provisioning.
//!
//! Creates the host TAP that mirrors a dataplane interface, gives it the
//! interface's MAC and link state, attaches it to the dataplane and
//! cross-connects it so that anything the host transmits on the TAP leaves
//! through the interface.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex, PoisonError};

use nix::libc;
use tracing::{debug, info, warn};

use crate::dataplane::Dataplane;
use crate::error::{ConfigError, ProvisionError};
use crate::interface::{InterfaceFlags, InterfaceId, TapId, format_mac};

/// TAP device flags from linux/if_tun.h
const IFF_TAP: libc::c_short = 0x0002;
const IFF_NO_PI: libc::c_short = 0x1000;

/// ioctl request code for TUNSETIFF
const TUNSETIFF: libc::c_ulong = 0x400454ca;

/// Longest usable interface name (IFNAMSIZ minus the terminator).
pub const MAX_TAP_NAME: usize = libc::IFNAMSIZ - 1;

type Result<T> = std::result::Result<T, ProvisionError>;

/// Check that `name` can be used as a host interface name.
pub fn validate_tap_name(name: &str) -> std::result::Result<(), ConfigError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_TAP_NAME
        && name != "."
        && name != ".."
        && !name.bytes().any(|b| b == b'/' || b == b':' || b.is_ascii_whitespace() || b == 0);
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidTapName(name.to_string()))
    }
}

/// Creates and tears down host TAPs for dataplane interfaces.
pub trait TapProvisioner: Send + Sync {
    /// Create a TAP named `name` mirroring `interface`.
    ///
    /// On error nothing is left behind.
    fn provision(&self, name: &str, interface: InterfaceId) -> Result<TapId>;

    /// Tear down a TAP returned by [`TapProvisioner::provision`].
    fn release(&self, tap: TapId);
}

/// ifreq structure for TUNSETIFF and interface flags
#[repr(C)]
struct IfReqFlags {
    ifr_name: [libc::c_char; libc::IFNAMSIZ],
    ifr_flags: libc::c_short,
    _pad: [u8; 22],
}

/// ifreq structure for SIOCSIFHWADDR
#[repr(C)]
struct IfReqHwAddr {
    ifr_name: [libc::c_char; libc::IFNAMSIZ],
    ifr_hwaddr: libc::sockaddr,
    _pad: [u8; 8],
}

fn ifr_name(name: &str) -> [libc::c_char; libc::IFNAMSIZ] {
    let mut out = [0 as libc::c_char; libc::IFNAMSIZ];
    for (i, &b) in name.as_bytes().iter().take(MAX_TAP_NAME).enumerate() {
        out[i] = b as libc::c_char;
    }
    out
}

/// RAII guard for socket fd
struct SockGuard(RawFd);

impl SockGuard {
    fn inet() -> io::Result<Self> {
        let sock = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
        if sock < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self(sock))
    }
}

impl Drop for SockGuard {
    fn drop(&mut self) {
        unsafe { libc::close(self.0) };
    }
}

/// Open `/dev/net/tun` and create a TAP named `name`.
///
/// The device is not persistent: it disappears when the returned file is
/// closed.
fn create_tap(name: &str) -> Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/net/tun")
        .map_err(ProvisionError::OpenTun)?;

    let ifr = IfReqFlags {
        ifr_name: ifr_name(name),
        ifr_flags: IFF_TAP | IFF_NO_PI,
        _pad: [0; 22],
    };

    let ret = unsafe { libc::ioctl(file.as_raw_fd(), TUNSETIFF as _, &ifr) };
    if ret < 0 {
        return Err(ProvisionError::Create(
            name.to_string(),
            io::Error::last_os_error(),
        ));
    }

    Ok(file)
}

fn host_index(name: &str) -> Result<u32> {
    nix::net::if_::if_nametoindex(name)
        .map_err(|e| ProvisionError::IfIndex(name.to_string(), io::Error::from(e)))
}

/// Set the MAC address of a host interface.
fn set_hw_address(name: &str, mac: [u8; 6]) -> Result<()> {
    let sock = SockGuard::inet().map_err(|e| ProvisionError::HwAddr(name.to_string(), e))?;

    let mut hwaddr: libc::sockaddr = unsafe { std::mem::zeroed() };
    hwaddr.sa_family = libc::ARPHRD_ETHER;
    for (i, &b) in mac.iter().enumerate() {
        hwaddr.sa_data[i] = b as libc::c_char;
    }
    let ifr = IfReqHwAddr {
        ifr_name: ifr_name(name),
        ifr_hwaddr: hwaddr,
        _pad: [0; 8],
    };

    let ret = unsafe { libc::ioctl(sock.0, libc::SIOCSIFHWADDR as _, &ifr) };
    if ret < 0 {
        return Err(ProvisionError::HwAddr(
            name.to_string(),
            io::Error::last_os_error(),
        ));
    }
    Ok(())
}

/// Set or clear IFF_UP|IFF_RUNNING on a host interface, keeping other flags.
fn set_link_state(name: &str, up: bool) -> Result<()> {
    let err = |e| ProvisionError::LinkState(name.to_string(), e);
    let sock = SockGuard::inet().map_err(err)?;

    let mut ifr = IfReqFlags {
        ifr_name: ifr_name(name),
        ifr_flags: 0,
        _pad: [0; 22],
    };

    let ret = unsafe { libc::ioctl(sock.0, libc::SIOCGIFFLAGS as _, &mut ifr) };
    if ret < 0 {
        return Err(err(io::Error::last_os_error()));
    }

    let bits = (libc::IFF_UP | libc::IFF_RUNNING) as libc::c_short;
    if up {
        ifr.ifr_flags |= bits;
    } else {
        ifr.ifr_flags &= !bits;
    }

    let ret = unsafe { libc::ioctl(sock.0, libc::SIOCSIFFLAGS as _, &ifr) };
    if ret < 0 {
        return Err(err(io::Error::last_os_error()));
    }
    Ok(())
}

struct HostTap {
    name: String,
    /// Keeps the TAP alive.
    _file: File,
}

/// Provisions real host TAPs through `/dev/net/tun`. Requires CAP_NET_ADMIN.
pub struct HostTapProvisioner<D> {
    dataplane: Arc<D>,
    /// Open TAPs by dataplane-side interface.
    taps: Mutex<HashMap<InterfaceId, HostTap>>,
}

impl<D: Dataplane> HostTapProvisioner<D> {
    pub fn new(dataplane: Arc<D>) -> Self {
        Self {
            dataplane,
            taps: Mutex::new(HashMap::new()),
        }
    }

    /// Everything after the dataplane side of the TAP exists.
    fn wire(&self, name: &str, tap: InterfaceId, interface: InterfaceId, mac: [u8; 6]) -> Result<()> {
        set_hw_address(name, mac)?;

        let admin_up = self
            .dataplane
            .interface_flags(interface)
            .is_some_and(InterfaceFlags::is_admin_up);
        set_link_state(name, admin_up)?;

        self.dataplane
            .set_l2_xconnect(tap, interface)
            .map_err(|e| ProvisionError::Xconnect(name.to_string(), e))?;

        let flags = self.dataplane.interface_flags(tap).unwrap_or_default();
        self.dataplane
            .set_interface_flags(tap, flags.with(InterfaceFlags::ADMIN_UP, true))
            .map_err(|e| ProvisionError::AdminUp(name.to_string(), e))
    }
}

impl<D: Dataplane> TapProvisioner for HostTapProvisioner<D> {
    fn provision(&self, name: &str, interface: InterfaceId) -> Result<TapId> {
        let mac = self
            .dataplane
            .hardware_address(interface)
            .ok_or(ProvisionError::NoHardwareAddress(interface))?;

        let file = create_tap(name)?;
        let host_index = host_index(name)?;

        let tap = self
            .dataplane
            .create_tap_interface(name, host_index, mac)
            .map_err(|e| ProvisionError::Attach(name.to_string(), e))?;

        if let Err(e) = self.wire(name, tap, interface, mac) {
            if let Err(del) = self.dataplane.delete_interface(tap) {
                warn!(tap = %tap, error = %del, "Failed to delete tap interface during rollback");
            }
            return Err(e);
        }

        self.taps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                tap,
                HostTap {
                    name: name.to_string(),
                    _file: file,
                },
            );

        info!(name, %interface, %tap, host_index, mac = %format_mac(&mac), "Tap provisioned");
        Ok(TapId {
            interface: tap,
            host_index,
        })
    }

    fn release(&self, tap: TapId) {
        if let Err(e) = self.dataplane.delete_interface(tap.interface) {
            warn!(tap = %tap.interface, error = %e, "Failed to delete tap interface");
        }
        let removed = self
            .taps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&tap.interface);
        if let Some(host) = removed {
            debug!(name = %host.name, "Tap released");
        }
    }
}
