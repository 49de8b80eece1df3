//! OS counter readers. `HostProbe` is the seam between the collector's
//! bookkeeping and the platform; `SystemProbe` is the real one (sysinfo,
//! plus procfs on Linux for per-interface and per-disk counters).

use sysinfo::{
    CpuRefreshKind, Disks, MemoryRefreshKind, Networks, ProcessRefreshKind, ProcessesToUpdate,
    RefreshKind, System,
};

use crate::error::CollectError;
use crate::types::{CpuFrequency, CpuUsage, LoadAverage, MemoryUsage, Metric, ProcessInfo};

/// A mounted filesystem with cumulative I/O counters (bytes read, written).
#[derive(Debug, Clone, PartialEq)]
pub struct RawDisk {
    pub name: String,
    pub mount_point: String,
    pub file_system: String,
    pub total: u64,
    pub available: u64,
    pub removable: bool,
    pub io: Result<(u64, u64), CollectError>,
}

/// An interface with cumulative (received, transmitted) byte counters.
#[derive(Debug, Clone, PartialEq)]
pub struct RawInterface {
    pub name: String,
    pub counters: Result<(u64, u64), CollectError>,
}

/// Each section is read independently so one failure degrades only that field.
pub trait HostProbe: Send {
    fn cpu(&mut self) -> Result<CpuUsage, CollectError>;
    fn memory(&mut self) -> Result<MemoryUsage, CollectError>;
    fn disks(&mut self) -> Result<Vec<RawDisk>, CollectError>;
    fn interfaces(&mut self) -> Result<Vec<RawInterface>, CollectError>;
    /// All processes; CPU already normalised to a single-core 0..=100 scale.
    fn processes(&mut self) -> Result<Vec<ProcessInfo>, CollectError>;
}

pub struct SystemProbe {
    sys: System,
    // kept alive across polls so counters stay consistent
    disks: Disks,
    networks: Networks,
    max_mhz: u64,
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProbe {
    pub fn new() -> Self {
        let refresh_kind = RefreshKind::nothing()
            .with_cpu(CpuRefreshKind::everything())
            .with_memory(MemoryRefreshKind::everything());
        let sys = System::new_with_specifics(refresh_kind);
        Self {
            sys,
            disks: Disks::new_with_refreshed_list(),
            networks: Networks::new_with_refreshed_list(),
            max_mhz: 0,
        }
    }

    fn core_count(&self) -> usize {
        match self.sys.cpus().len() {
            0 => std::thread::available_parallelism().map_or(1, |n| n.get()),
            n => n,
        }
    }
}

impl HostProbe for SystemProbe {
    fn cpu(&mut self) -> Result<CpuUsage, CollectError> {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_cpu_frequency();
        let cpus = self.sys.cpus();
        let first = cpus.first().ok_or(CollectError::Empty("cpu"))?;
        let mhz: Vec<u64> = cpus.iter().map(|c| c.frequency()).collect();
        let frequency = frequency_from_mhz(&mhz, &mut self.max_mhz);
        let load = System::load_average();
        Ok(CpuUsage {
            brand: first.brand().trim().to_string(),
            global: self.sys.global_cpu_usage(),
            per_core: cpus.iter().map(|c| c.cpu_usage()).collect(),
            frequency,
            load_average: LoadAverage {
                one: load.one,
                five: load.five,
                fifteen: load.fifteen,
            },
        })
    }

    fn memory(&mut self) -> Result<MemoryUsage, CollectError> {
        self.sys.refresh_memory();
        let total = self.sys.total_memory();
        if total == 0 {
            return Err(CollectError::Empty("memory"));
        }
        let available = self.sys.available_memory();
        Ok(MemoryUsage {
            total,
            used: total.saturating_sub(available),
            available,
            swap_total: self.sys.total_swap(),
            swap_used: self.sys.used_swap(),
        })
    }

    fn disks(&mut self) -> Result<Vec<RawDisk>, CollectError> {
        self.disks.refresh(true);
        let io = platform::disk_io_counters();
        Ok(self
            .disks
            .iter()
            .map(|d| {
                let name = d.name().to_string_lossy().into_owned();
                RawDisk {
                    io: io.lookup(&name),
                    name,
                    mount_point: d.mount_point().to_string_lossy().into_owned(),
                    file_system: d.file_system().to_string_lossy().into_owned(),
                    total: d.total_space(),
                    available: d.available_space(),
                    removable: d.is_removable(),
                }
            })
            .collect())
    }

    fn interfaces(&mut self) -> Result<Vec<RawInterface>, CollectError> {
        self.networks.refresh(true);
        let counters = platform::interface_counters(&self.networks);
        let mut out: Vec<RawInterface> = self
            .networks
            .iter()
            .filter(|(name, _)| !is_loopback(name))
            .map(|(name, _)| RawInterface {
                name: name.to_string(),
                counters: counters.lookup(name),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn processes(&mut self) -> Result<Vec<ProcessInfo>, CollectError> {
        self.sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_cpu().with_memory(),
        );
        let cores = self.core_count() as f32;
        let procs: Vec<ProcessInfo> = self
            .sys
            .processes()
            .values()
            .map(|p| ProcessInfo {
                pid: p.pid().as_u32(),
                name: p.name().to_string_lossy().into_owned(),
                cpu_usage: (p.cpu_usage() / cores).clamp(0.0, 100.0),
                mem_bytes: p.memory(),
            })
            .collect();
        if procs.is_empty() {
            return Err(CollectError::Empty("processes"));
        }
        Ok(procs)
    }
}

/// Mean clock over cores reporting one; zero means the platform hides it.
fn frequency_from_mhz(mhz: &[u64], max_seen: &mut u64) -> Metric<CpuFrequency> {
    let reporting: Vec<u64> = mhz.iter().copied().filter(|&f| f > 0).collect();
    if reporting.is_empty() {
        return Metric::Unavailable;
    }
    let mean = reporting.iter().sum::<u64>() as f32 / reporting.len() as f32;
    *max_seen = reporting.iter().copied().fold(*max_seen, u64::max);
    Metric::Available(CpuFrequency {
        current_ghz: mean / 1_000.0,
        max_ghz: *max_seen as f32 / 1_000.0,
    })
}

fn is_loopback(name: &str) -> bool {
    name == "lo" || name.starts_with("lo0")
}

/// Counter table keyed by device name, or the reason the whole table failed.
struct CounterTable(Result<std::collections::HashMap<String, (u64, u64)>, CollectError>);

impl CounterTable {
    fn lookup(&self, name: &str) -> Result<(u64, u64), CollectError> {
        let key = name.strip_prefix("/dev/").unwrap_or(name);
        match &self.0 {
            Ok(map) => map
                .get(key)
                .copied()
                .ok_or_else(|| CollectError::unreadable("counters", format!("{key} not listed"))),
            Err(e) => Err(e.clone()),
        }
    }
}

#[cfg(target_os = "linux")]
mod platform {
    use super::CounterTable;
    use crate::error::CollectError;
    use sysinfo::Networks;

    const SECTOR_BYTES: u64 = 512;

    pub(super) fn disk_io_counters() -> CounterTable {
        CounterTable(
            procfs::diskstats()
                .map(|stats| {
                    stats
                        .into_iter()
                        .map(|s| {
                            (
                                s.name,
                                (s.sectors_read * SECTOR_BYTES, s.sectors_written * SECTOR_BYTES),
                            )
                        })
                        .collect()
                })
                .map_err(|e| CollectError::unreadable("disk io", e.to_string())),
        )
    }

    // /proc/net/dev, so an interface sysinfo lists but the kernel table
    // lacks is reported as unreadable rather than zero
    pub(super) fn interface_counters(_networks: &Networks) -> CounterTable {
        CounterTable(
            procfs::net::dev_status()
                .map(|devs| {
                    devs.into_iter()
                        .map(|(name, d)| (name, (d.recv_bytes, d.sent_bytes)))
                        .collect()
                })
                .map_err(|e| CollectError::unreadable("network", e.to_string())),
        )
    }
}

#[cfg(not(target_os = "linux"))]
mod platform {
    use super::CounterTable;
    use crate::error::CollectError;
    use sysinfo::Networks;

    pub(super) fn disk_io_counters() -> CounterTable {
        CounterTable(Err(CollectError::unreadable(
            "disk io",
            "not supported on this platform",
        )))
    }

    pub(super) fn interface_counters(networks: &Networks) -> CounterTable {
        CounterTable(Ok(networks
            .iter()
            .map(|(name, data)| {
                (
                    name.to_string(),
                    (data.total_received(), data.total_transmitted()),
                )
            })
            .collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn counter_lookup_strips_dev_prefix() {
        let table = CounterTable(Ok(HashMap::from([("sda1".to_string(), (1, 2))])));
        assert_eq!(table.lookup("/dev/sda1"), Ok((1, 2)));
        assert!(table.lookup("/dev/nvme0n1p1").is_err());
    }

    #[test]
    fn failed_table_fails_every_lookup() {
        let table = CounterTable(Err(CollectError::Empty("network")));
        assert_eq!(table.lookup("eth0"), Err(CollectError::Empty("network")));
    }

    #[test]
    fn frequency_is_mean_of_reporting_cores() {
        let mut max = 0;
        let Metric::Available(f) = frequency_from_mhz(&[2_000, 3_000, 0], &mut max) else {
            panic!("expected a reading");
        };
        assert_eq!(f.current_ghz, 2.5);
        assert_eq!(f.max_ghz, 3.0);

        // max holds across slower polls
        let Metric::Available(f) = frequency_from_mhz(&[1_000, 1_000], &mut max) else {
            panic!("expected a reading");
        };
        assert_eq!(f.current_ghz, 1.0);
        assert_eq!(f.max_ghz, 3.0);

        assert_eq!(frequency_from_mhz(&[0, 0], &mut max), Metric::Unavailable);
        assert_eq!(frequency_from_mhz(&[], &mut max), Metric::Unavailable);
    }

    #[test]
    fn loopback_names() {
        assert!(is_loopback("lo"));
        assert!(is_loopback("lo0"));
        assert!(!is_loopback("eth0"));
        assert!(!is_loopback("local-bridge"));
    }

    // Reads the real host; only checks shape, not values.
    #[test]
    fn system_reader_sees_memory_and_cpu() {
        let mut probe = SystemProbe::new();
        let mem = probe.memory().expect("memory");
        assert!(mem.total > 0);
        assert!(mem.used <= mem.total);
        let cpu = probe.cpu().expect("cpu");
        assert!(!cpu.per_core.is_empty());
    }
}
