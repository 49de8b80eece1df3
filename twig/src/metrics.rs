//! Snapshot assembly: reads every section through the probe, turns
//! cumulative counters into per-second rates, and degrades any section that
//! fails to the `unavailable` sentinel instead of failing the snapshot.

use chrono::Utc;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::error::CollectError;
use crate::identity::MachineIdentity;
use crate::probe::{HostProbe, RawDisk, RawInterface};
use crate::types::{
    DiskIo, DiskUsage, InterfaceCounters, Metric, NetworkInterface, ProcessInfo, ProcessList,
    Snapshot,
};

pub struct Collector {
    probe: Box<dyn HostProbe>,
    identity: Arc<MachineIdentity>,
    top_k: usize,
    seq: u64,
    last_at: Option<Instant>,
    prev_net: HashMap<String, (u64, u64)>,
    prev_disk: HashMap<String, (u64, u64)>,
}

impl Collector {
    pub fn new(probe: Box<dyn HostProbe>, identity: Arc<MachineIdentity>, top_k: usize) -> Self {
        Self {
            probe,
            identity,
            top_k: top_k.max(1),
            seq: 0,
            last_at: None,
            prev_net: HashMap::new(),
            prev_disk: HashMap::new(),
        }
    }

    pub fn collect(&mut self) -> Snapshot {
        self.collect_at(Instant::now())
    }

    /// `now` drives rate computation; rates are 0 on the first poll.
    pub fn collect_at(&mut self, now: Instant) -> Snapshot {
        let elapsed = self.last_at.map(|t| now.saturating_duration_since(t));
        self.last_at = Some(now);
        self.seq += 1;

        let probe = &mut self.probe;
        let cpu_usage = guarded("cpu", || probe.cpu());
        let memory_usage = guarded("memory", || probe.memory());
        let disks = guarded("disks", || probe.disks());
        let interfaces = guarded("network", || probe.interfaces());
        let processes = guarded("processes", || probe.processes());

        let disk_usage = disks.map(|d| self.disk_rates(d, elapsed));
        let network_interfaces = interfaces.map(|i| self.interface_rates(i, elapsed));
        let top_k = self.top_k;
        let process_list = processes.map(|p| top_processes(p, top_k));

        Snapshot {
            seq: self.seq,
            timestamp: Utc::now(),
            machine_id: self.identity.id.clone(),
            hostname: self.identity.hostname.clone(),
            cpu_usage,
            memory_usage,
            disk_usage,
            network_interfaces,
            process_list,
        }
    }

    fn interface_rates(
        &mut self,
        raw: Vec<RawInterface>,
        elapsed: Option<Duration>,
    ) -> Vec<NetworkInterface> {
        let mut next = HashMap::with_capacity(raw.len());
        let out = raw
            .into_iter()
            .map(|iface| {
                let counters = match iface.counters {
                    Ok((rx, tx)) => {
                        let (prev_rx, prev_tx) =
                            self.prev_net.get(&iface.name).copied().unwrap_or((rx, tx));
                        next.insert(iface.name.clone(), (rx, tx));
                        Metric::Available(InterfaceCounters {
                            received: rx,
                            transmitted: tx,
                            received_per_sec: per_sec(prev_rx, rx, elapsed),
                            transmitted_per_sec: per_sec(prev_tx, tx, elapsed),
                        })
                    }
                    Err(e) => {
                        warn!("interface {} unavailable: {e}", iface.name);
                        Metric::Unavailable
                    }
                };
                NetworkInterface {
                    name: iface.name,
                    counters,
                }
            })
            .collect();
        // interfaces that vanished or failed start from scratch next time
        self.prev_net = next;
        out
    }

    fn disk_rates(&mut self, raw: Vec<RawDisk>, elapsed: Option<Duration>) -> Vec<DiskUsage> {
        let mut next = HashMap::with_capacity(raw.len());
        let out = raw
            .into_iter()
            .map(|d| {
                let io = match d.io {
                    Ok((read, written)) => {
                        let (prev_r, prev_w) =
                            self.prev_disk.get(&d.name).copied().unwrap_or((read, written));
                        next.insert(d.name.clone(), (read, written));
                        Metric::Available(DiskIo {
                            read_bytes_per_sec: per_sec(prev_r, read, elapsed),
                            written_bytes_per_sec: per_sec(prev_w, written, elapsed),
                        })
                    }
                    // platform without I/O counters; not worth a warning per poll
                    Err(_) => Metric::Unavailable,
                };
                DiskUsage {
                    name: d.name,
                    mount_point: d.mount_point,
                    file_system: d.file_system,
                    total: d.total,
                    available: d.available,
                    removable: d.removable,
                    io,
                }
            })
            .collect();
        self.prev_disk = next;
        out
    }
}

/// Run one section read; a failure or panic degrades only that section.
fn guarded<T>(section: &'static str, read: impl FnOnce() -> Result<T, CollectError>) -> Metric<T> {
    let result = catch_unwind(AssertUnwindSafe(read))
        .unwrap_or_else(|_| Err(CollectError::Panicked(section)));
    match result {
        Ok(v) => Metric::Available(v),
        Err(e) => {
            warn!("{section} unavailable: {e}");
            Metric::Unavailable
        }
    }
}

fn per_sec(prev: u64, now: u64, elapsed: Option<Duration>) -> u64 {
    match elapsed {
        Some(d) if !d.is_zero() => (now.saturating_sub(prev) as f64 / d.as_secs_f64()).round() as u64,
        _ => 0,
    }
}

fn top_processes(mut procs: Vec<ProcessInfo>, k: usize) -> ProcessList {
    let process_count = procs.len();
    procs.sort_by(|a, b| {
        b.cpu_usage
            .total_cmp(&a.cpu_usage)
            .then_with(|| a.pid.cmp(&b.pid))
    });
    procs.truncate(k);
    ProcessList {
        process_count,
        top_processes: procs,
    }
}
