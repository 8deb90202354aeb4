use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use log::{debug, warn};

use crate::error::{DlnaError, Result};

pub const SSDP_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
pub const SSDP_PORT: u16 = 1900;
pub const DEFAULT_MX: u32 = 2;

/// Search targets probed during a multicast scan, most specific first.
/// AVTransport is listed per version because renderers answer for the
/// exact version they implement.
pub const SEARCH_TARGETS: &[&str] = &[
  "urn:schemas-upnp-org:device:MediaRenderer:1",
  "urn:schemas-upnp-org:service:AVTransport:1",
  "urn:schemas-upnp-org:service:AVTransport:2",
  "urn:schemas-upnp-org:service:AVTransport:3",
  "upnp:rootdevice",
  "ssdp:all",
];

/// Shorter target list for the unicast (known-IP) variant.
pub const UNICAST_SEARCH_TARGETS: &[&str] = &[
  "urn:schemas-upnp-org:device:MediaRenderer:1",
  "urn:schemas-upnp-org:service:AVTransport:1",
  "urn:schemas-upnp-org:service:AVTransport:2",
  "upnp:rootdevice",
];

pub fn multicast_addr() -> SocketAddr {
  SocketAddr::V4(SocketAddrV4::new(SSDP_ADDR, SSDP_PORT))
}

/// Build an M-SEARCH request. `host` is the HOST header value, which for
/// unicast searches is the renderer's own `ip:1900`.
pub fn build_msearch(host: &str, target: &str, mx: u32) -> String {
  format!(
    "M-SEARCH * HTTP/1.1\r\n\
      HOST: {}\r\n\
      MAN: \"ssdp:discover\"\r\n\
      MX: {}\r\n\
      ST: {}\r\n\
      USER-AGENT: dlnacast/0.1 UPnP/1.0\r\n\
      \r\n",
    host, mx, target
  )
}

/// One parsed discovery datagram: a 200-OK search response or an
/// `ssdp:alive` NOTIFY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsdpResponse {
  pub usn: String,
  pub search_target: String,
  pub server: Option<String>,
  pub location: Option<String>,
}

/// Parse a discovery datagram. Returns `None` for anything that cannot
/// become a device: wrong start line, `ssdp:byebye`, or a missing USN
/// (without a USN the response cannot be deduplicated).
pub fn parse_response(text: &str) -> Option<SsdpResponse> {
  let mut lines = text.lines();
  let start = lines.next()?;
  if !start.starts_with("HTTP/1.1 200") && !start.starts_with("NOTIFY * HTTP/1.1") {
    return None;
  }

  let mut usn = None;
  let mut search_target = None;
  let mut server = None;
  let mut location = None;

  for line in lines {
    if let Some(value) = header_value(line, "NTS") {
      if !value.eq_ignore_ascii_case("ssdp:alive") {
        return None;
      }
    } else if let Some(value) = header_value(line, "USN") {
      usn = Some(value.to_string());
    } else if let Some(value) = header_value(line, "ST").or_else(|| header_value(line, "NT")) {
      search_target = Some(value.to_string());
    } else if let Some(value) = header_value(line, "SERVER") {
      server = Some(value.to_string());
    } else if let Some(value) = header_value(line, "LOCATION") {
      location = Some(value.to_string());
    }
  }

  Some(SsdpResponse {
    usn: usn?,
    search_target: search_target.unwrap_or_default(),
    server,
    location,
  })
}

/// Case-insensitive `Header: value` match.
fn header_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
  let (key, value) = line.split_once(':')?;
  if key.trim().eq_ignore_ascii_case(name) {
    Some(value.trim())
  } else {
    None
  }
}

/// Listener bound to the SSDP port, joined to the multicast group on
/// every usable interface. Receives both solicited 200-OK responses and
/// unsolicited NOTIFY announcements. Leaves the group on drop, so every
/// exit path of a scan releases it.
pub struct MulticastListener {
  socket: UdpSocket,
  joined: Vec<Ipv4Addr>,
}

impl MulticastListener {
  pub fn open(read_timeout: Duration) -> Result<Self> {
    let socket = bind_reuse(SSDP_PORT)?;
    socket.set_read_timeout(Some(read_timeout))?;
    if let Err(e) = socket.set_multicast_ttl_v4(2) {
      debug!("set_multicast_ttl_v4 failed: {}", e);
    }

    let mut joined = Vec::new();
    for (name, addr) in local_ip_address::list_afinet_netifas().unwrap_or_default() {
      let IpAddr::V4(v4) = addr else { continue };
      if v4.is_loopback() {
        continue;
      }
      match socket.join_multicast_v4(&SSDP_ADDR, &v4) {
        Ok(()) => {
          debug!("joined {} on {} ({})", SSDP_ADDR, v4, name);
          joined.push(v4);
        }
        // one deaf interface must not silence the rest
        Err(e) => warn!("multicast join failed on {} ({}): {}", v4, name, e),
      }
    }
    if joined.is_empty() {
      // no enumerable interfaces; let the OS pick the default route
      socket
        .join_multicast_v4(&SSDP_ADDR, &Ipv4Addr::UNSPECIFIED)
        .map_err(|e| DlnaError::Transport(format!("multicast join failed: {}", e)))?;
      joined.push(Ipv4Addr::UNSPECIFIED);
    }

    Ok(Self { socket, joined })
  }

  /// Block up to the read timeout for one datagram. A timeout is the
  /// normal idle outcome and yields `Ok(None)`.
  pub fn receive_one(&self) -> io::Result<Option<(String, SocketAddr)>> {
    recv_text(&self.socket)
  }
}

impl Drop for MulticastListener {
  fn drop(&mut self) {
    for ip in &self.joined {
      if let Err(e) = self.socket.leave_multicast_v4(&SSDP_ADDR, ip) {
        debug!("leave_multicast_v4 {} failed: {}", ip, e);
      }
    }
  }
}

/// Ephemeral-port socket used for sending M-SEARCH requests. Kept
/// separate from the listener: some renderers only reply to the port a
/// search actually came from, and port 1900 carries NOTIFY traffic of
/// its own.
pub struct SearchSocket {
  socket: UdpSocket,
}

impl SearchSocket {
  pub fn open() -> Result<Self> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    if let Err(e) = socket.set_multicast_ttl_v4(2) {
      debug!("set_multicast_ttl_v4 failed: {}", e);
    }
    Ok(Self { socket })
  }

  /// Variant that also listens for replies, used by unicast discovery.
  pub fn with_read_timeout(read_timeout: Duration) -> Result<Self> {
    let this = Self::open()?;
    this.socket.set_read_timeout(Some(read_timeout))?;
    Ok(this)
  }

  pub fn send_search(&self, dest: SocketAddr, host: &str, target: &str, mx: u32) -> io::Result<()> {
    let request = build_msearch(host, target, mx);
    debug!("M-SEARCH ST={} -> {}", target, dest);
    self.socket.send_to(request.as_bytes(), dest).map(|_| ())
  }

  pub fn receive_one(&self) -> io::Result<Option<(String, SocketAddr)>> {
    recv_text(&self.socket)
  }
}

fn recv_text(socket: &UdpSocket) -> io::Result<Option<(String, SocketAddr)>> {
  let mut buf = [0u8; 8192];
  match socket.recv_from(&mut buf) {
    Ok((len, from)) => Ok(Some((String::from_utf8_lossy(&buf[..len]).into_owned(), from))),
    Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
      Ok(None)
    }
    Err(e) => Err(e),
  }
}

/// SO_REUSEADDR before bind, so a scan can share the well-known port
/// with any other UPnP stack on the host.
fn bind_reuse(port: u16) -> Result<UdpSocket> {
  let socket = socket2::Socket::new(socket2::Domain::IPV4, socket2::Type::DGRAM, None)?;
  socket.set_reuse_address(true)?;
  let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
  socket.bind(&socket2::SockAddr::from(addr))?;
  Ok(socket.into())
}
