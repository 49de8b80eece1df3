//! Data types sent to clients over HTTP and WebSocket.
//! Keep this module minimal and stable: it defines the wire format.

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Wire marker for a field the collector could not read this cycle.
pub const UNAVAILABLE: &str = "unavailable";

/// A snapshot field that is either a reading or the `"unavailable"` sentinel.
#[derive(Debug, Clone, PartialEq)]
pub enum Metric<T> {
    Available(T),
    Unavailable,
}

impl<T> Metric<T> {
    pub fn is_available(&self) -> bool {
        matches!(self, Metric::Available(_))
    }

    pub fn available(self) -> Option<T> {
        match self {
            Metric::Available(v) => Some(v),
            Metric::Unavailable => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Metric<U> {
        match self {
            Metric::Available(v) => Metric::Available(f(v)),
            Metric::Unavailable => Metric::Unavailable,
        }
    }
}

impl<T, E> From<Result<T, E>> for Metric<T> {
    fn from(r: Result<T, E>) -> Self {
        match r {
            Ok(v) => Metric::Available(v),
            Err(_) => Metric::Unavailable,
        }
    }
}

impl<T: Serialize> Serialize for Metric<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Metric::Available(v) => v.serialize(serializer),
            Metric::Unavailable => serializer.serialize_str(UNAVAILABLE),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Metric<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        if value.as_str() == Some(UNAVAILABLE) {
            return Ok(Metric::Unavailable);
        }
        T::deserialize(value)
            .map(Metric::Available)
            .map_err(de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

// GHz; `max_ghz` is the highest clock seen since startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuFrequency {
    pub current_ghz: f32,
    pub max_ghz: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuUsage {
    pub brand: String,
    pub global: f32,
    pub per_core: Vec<f32>,
    pub frequency: Metric<CpuFrequency>,
    pub load_average: LoadAverage,
}

// bytes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub total: u64,
    pub used: u64,
    pub available: u64,
    pub swap_total: u64,
    pub swap_used: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskIo {
    pub read_bytes_per_sec: u64,
    pub written_bytes_per_sec: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskUsage {
    pub name: String,
    pub mount_point: String,
    pub file_system: String,
    pub total: u64,
    pub available: u64,
    pub removable: bool,
    pub io: Metric<DiskIo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceCounters {
    // cumulative totals as reported by the OS
    pub received: u64,
    pub transmitted: u64,
    // since the previous poll
    pub received_per_sec: u64,
    pub transmitted_per_sec: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub name: String,
    pub counters: Metric<InterfaceCounters>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub cpu_usage: f32,
    pub mem_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessList {
    pub process_count: usize,
    pub top_processes: Vec<ProcessInfo>,
}

/// One point-in-time telemetry record. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub machine_id: String,
    pub hostname: String,
    pub cpu_usage: Metric<CpuUsage>,
    pub memory_usage: Metric<MemoryUsage>,
    pub disk_usage: Metric<Vec<DiskUsage>>,
    pub network_interfaces: Metric<Vec<NetworkInterface>>,
    pub process_list: Metric<ProcessList>,
}

impl Snapshot {
    /// A record where nothing could be read; every section is the sentinel.
    pub fn unavailable(seq: u64, machine_id: &str, hostname: &str) -> Snapshot {
        Snapshot {
            seq,
            timestamp: Utc::now(),
            machine_id: machine_id.to_string(),
            hostname: hostname.to_string(),
            cpu_usage: Metric::Unavailable,
            memory_usage: Metric::Unavailable,
            disk_usage: Metric::Unavailable,
            network_interfaces: Metric::Unavailable,
            process_list: Metric::Unavailable,
        }
    }

    /// Copy of this snapshot with at most `top` processes listed.
    pub fn with_top_processes(&self, top: usize) -> Snapshot {
        let mut out = self.clone();
        if let Metric::Available(list) = &mut out.process_list {
            list.top_processes.truncate(top);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unavailable_serializes_as_sentinel_string() {
        let m: Metric<MemoryUsage> = Metric::Unavailable;
        assert_eq!(serde_json::to_value(&m).unwrap(), json!("unavailable"));
    }

    #[test]
    fn available_serializes_transparently() {
        let m = Metric::Available(DiskIo {
            read_bytes_per_sec: 10,
            written_bytes_per_sec: 20,
        });
        assert_eq!(
            serde_json::to_value(&m).unwrap(),
            json!({"read_bytes_per_sec": 10, "written_bytes_per_sec": 20})
        );
    }

    #[test]
    fn sentinel_parses_back() {
        let v: Metric<Vec<u32>> = serde_json::from_value(json!("unavailable")).unwrap();
        assert_eq!(v, Metric::Unavailable);
        let v: Metric<Vec<u32>> = serde_json::from_value(json!([1, 2])).unwrap();
        assert_eq!(v, Metric::Available(vec![1, 2]));
    }

    #[test]
    fn top_processes_truncates_copy_only() {
        let procs = (0..5)
            .map(|i| ProcessInfo {
                pid: i,
                name: format!("p{i}"),
                cpu_usage: 0.0,
                mem_bytes: 0,
            })
            .collect();
        let mut snap = Snapshot::unavailable(1, "m", "h");
        snap.process_list = Metric::Available(ProcessList {
            process_count: 5,
            top_processes: procs,
        });
        let small = snap.with_top_processes(2);
        let Metric::Available(list) = &small.process_list else {
            panic!("expected processes");
        };
        assert_eq!(list.top_processes.len(), 2);
        assert_eq!(list.process_count, 5);
        let Metric::Available(orig) = &snap.process_list else {
            panic!("expected processes");
        };
        assert_eq!(orig.top_processes.len(), 5);
    }
}
