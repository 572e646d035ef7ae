/*
 *  Copyright (C) 2026 The WaveSync Authors
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU Affero General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU Affero General Public License for more details.
 *
 *  You should have received a copy of the GNU Affero General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! UDP socket construction. Multicast membership is derived purely from
//! the destination address's first octet (224..239) rather than from an
//! SDP description — WaveSync has no session description protocol, its
//! "session" is just `--target host:port`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::{info, instrument};

use crate::error::WaveSyncResult;

pub fn is_multicast(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.octets()[0] >= 224 && v4.octets()[0] <= 239,
        IpAddr::V6(v6) => v6.is_multicast(),
    }
}

/// The sender's socket. `IP_MTU_DISCOVER = DO` (Linux-only; set via raw
/// `setsockopt` since `socket2` has no typed wrapper for it) makes
/// oversized unfragmented datagrams fail with `EMSGSIZE` instead of
/// silently fragmenting, which is what drives the packetizer's MTU
/// back-off.
#[instrument(skip(opts))]
pub fn create_tx_socket(
    local_ip: IpAddr,
    port: u16,
    target: SocketAddr,
    opts: &TxSocketOpts,
) -> WaveSyncResult<UdpSocket> {
    let domain = if target.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;

    let local_addr = SocketAddr::new(local_ip, port);
    socket.bind(&SockAddr::from(local_addr))?;

    if let IpAddr::V4(ip) = target.ip() {
        if is_multicast(IpAddr::V4(ip)) {
            socket.set_multicast_ttl_v4(opts.multicast_ttl)?;
            socket.set_multicast_loop_v4(opts.multicast_loop)?;
        }
    }
    if opts.broadcast {
        socket.set_broadcast(true)?;
    }
    if opts.mtu_discover {
        set_mtu_discover_do(&socket);
    }

    info!(
        ?target,
        multicast = is_multicast(target.ip()),
        "opened transmit socket"
    );

    Ok(socket.into())
}

/// The receiver's socket: joins the multicast group when `group` is a
/// multicast address, otherwise binds for plain unicast delivery.
#[instrument]
pub fn create_rx_socket(group: SocketAddr, local_ip: IpAddr) -> WaveSyncResult<UdpSocket> {
    let socket = match (group.ip(), local_ip) {
        (IpAddr::V4(group_ip), IpAddr::V4(local_ip)) => {
            create_ipv4_rx_socket(group_ip, local_ip, group.port())?
        }
        (IpAddr::V6(group_ip), IpAddr::V6(local_ip)) => {
            create_ipv6_rx_socket(group_ip, local_ip, group.port())?
        }
        _ => {
            return Err(crate::error::WaveSyncError::ArgError(
                "group and local bind address must be the same IP version".into(),
            ));
        }
    };
    Ok(socket.into())
}

fn create_ipv4_rx_socket(group_ip: Ipv4Addr, local_ip: Ipv4Addr, port: u16) -> WaveSyncResult<Socket> {
    info!(
        %group_ip,
        %local_ip,
        port,
        multicast = group_ip.is_multicast(),
        "creating IPv4 receive socket"
    );

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;

    if group_ip.is_multicast() {
        socket.join_multicast_v4(&group_ip, &local_ip)?;
        socket.bind(&SockAddr::from(SocketAddr::new(IpAddr::V4(group_ip), port)))?;
    } else {
        socket.bind(&SockAddr::from(SocketAddr::new(IpAddr::V4(local_ip), port)))?;
    }
    Ok(socket)
}

fn create_ipv6_rx_socket(group_ip: Ipv6Addr, local_ip: Ipv6Addr, port: u16) -> WaveSyncResult<Socket> {
    info!(
        %group_ip,
        %local_ip,
        port,
        multicast = group_ip.is_multicast(),
        "creating IPv6 receive socket"
    );

    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;

    if group_ip.is_multicast() {
        socket.join_multicast_v6(&group_ip, 0)?;
        socket.bind(&SockAddr::from(SocketAddr::new(IpAddr::V6(group_ip), port)))?;
    } else {
        socket.bind(&SockAddr::from(SocketAddr::new(IpAddr::V6(local_ip), port)))?;
    }
    Ok(socket)
}

#[derive(Debug, Clone, Copy)]
pub struct TxSocketOpts {
    pub multicast_ttl: u32,
    pub multicast_loop: bool,
    pub broadcast: bool,
    pub mtu_discover: bool,
}

impl Default for TxSocketOpts {
    fn default() -> Self {
        Self {
            multicast_ttl: 1,
            multicast_loop: false,
            broadcast: false,
            mtu_discover: true,
        }
    }
}

/// `IP_MTU_DISCOVER = IP_PMTUDISC_DO`. Best-effort: a platform that
/// doesn't support it (anything but Linux) just keeps fragmenting
/// silently, which only costs us the early `EMSGSIZE` signal.
fn set_mtu_discover_do(socket: &Socket) {
    use std::os::fd::AsRawFd;

    #[cfg(target_os = "linux")]
    {
        let value: libc::c_int = libc::IP_PMTUDISC_DO;
        let ret = unsafe {
            libc::setsockopt(
                socket.as_raw_fd(),
                libc::IPPROTO_IP,
                libc::IP_MTU_DISCOVER,
                &value as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if ret != 0 {
            tracing::warn!(
                "failed to set IP_MTU_DISCOVER: {}",
                std::io::Error::last_os_error()
            );
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = socket.as_raw_fd();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn multicast_range_detection() {
        assert!(is_multicast("224.0.0.1".parse().unwrap()));
        assert!(is_multicast("239.255.255.255".parse().unwrap()));
        assert!(!is_multicast("223.255.255.255".parse().unwrap()));
        assert!(!is_multicast("240.0.0.0".parse().unwrap()));
        assert!(!is_multicast("192.168.1.1".parse().unwrap()));
    }

    #[test]
    fn broadcast_address_is_not_multicast() {
        assert!(!is_multicast("255.255.255.255".parse().unwrap()));
    }
}
