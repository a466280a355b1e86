//! procfs-based attribution
//!
//! 1. Find the socket inode for the local port in `/proc/net/{tcp,udp}{,6}`
//! 2. Find the pid holding an fd linked to `socket:[inode]`
//! 3. Walk parents through `/proc/<pid>/stat` until init

use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use super::ProcessResolver;
use crate::session::Network;

const INIT_PID: u32 = 1;

/// Upper bound on the ancestor walk
const MAX_CHAIN_DEPTH: usize = 64;

/// Attribution through a procfs mount
#[derive(Debug, Clone)]
pub struct ProcfsResolver {
    root: PathBuf,
}

impl Default for ProcfsResolver {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcfsResolver {
    /// Use the procfs tree mounted at `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Inode of the socket bound to `port`, searching v4 then v6 tables
    ///
    /// Only the port is matched: the virtual interface rewrites addresses.
    fn socket_inode(&self, network: Network, port: u16) -> io::Result<u64> {
        let tables: [&str; 2] = match network {
            Network::Tcp => ["net/tcp", "net/tcp6"],
            Network::Udp => ["net/udp", "net/udp6"],
        };
        for table in tables {
            let Ok(contents) = fs::read_to_string(self.root.join(table)) else {
                continue;
            };
            if let Some(inode) = find_inode(&contents, port) {
                return Ok(inode);
            }
        }
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no {network} socket bound to port {port}"),
        ))
    }

    fn pid_by_inode(&self, inode: u64) -> io::Result<u32> {
        let target = format!("socket:[{inode}]");
        for entry in fs::read_dir(&self.root)?.flatten() {
            let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) else {
                continue;
            };
            let Ok(fds) = fs::read_dir(entry.path().join("fd")) else {
                continue;
            };
            for fd in fds.flatten() {
                if fs::read_link(fd.path()).is_ok_and(|link| link.as_os_str() == target.as_str()) {
                    return Ok(pid);
                }
            }
        }
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no process owns socket inode {inode}"),
        ))
    }

    fn ppid_and_command(&self, pid: u32) -> io::Result<(u32, String)> {
        let stat = fs::read_to_string(self.root.join(pid.to_string()).join("stat"))?;
        parse_stat(&stat).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, format!("malformed stat for pid {pid}"))
        })
    }
}

impl ProcessResolver for ProcfsResolver {
    fn resolve_owning_process_chain(
        &self,
        network: Network,
        local: SocketAddr,
    ) -> io::Result<Vec<String>> {
        let inode = self.socket_inode(network, local.port())?;
        let mut pid = self.pid_by_inode(inode)?;

        let mut chain = Vec::new();
        while chain.len() < MAX_CHAIN_DEPTH {
            let Ok((ppid, command)) = self.ppid_and_command(pid) else {
                break;
            };
            chain.push(command);
            if ppid == INIT_PID || ppid == 0 {
                break;
            }
            pid = ppid;
        }

        if chain.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no command for pid {pid}"),
            ));
        }
        Ok(chain)
    }
}

/// Find the inode of the row whose local port is `port`
///
/// ```text
///  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
///   5: 6800000A:0016 6500000A:E816 01 00000000:00000000 02:000712BC 00000000     0        0 18136 ...
/// ```
fn find_inode(table: &str, port: u16) -> Option<u64> {
    table.lines().skip(1).find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 {
            return None;
        }
        let (_, port_hex) = fields[1].rsplit_once(':')?;
        if u16::from_str_radix(port_hex, 16).ok()? != port {
            return None;
        }
        fields[9].parse().ok()
    })
}

/// Parse `(ppid, comm)` out of `/proc/<pid>/stat`
///
/// The command may itself contain spaces and parentheses, so it spans from
/// the first `(` to the last `)`.
fn parse_stat(stat: &str) -> Option<(u32, String)> {
    let open = stat.find('(')?;
    let close = stat.rfind(')')?;
    let command = stat.get(open + 1..close)?;
    if command.is_empty() {
        return None;
    }
    let mut rest = stat.get(close + 1..)?.split_whitespace();
    let _state = rest.next()?;
    let ppid = rest.next()?.parse().ok()?;
    Some((ppid, command.to_string()))
}
