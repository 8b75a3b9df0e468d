//! Benchmark run parameters -- the flat configuration record sent with every
//! run request, plus the size magnitude/unit pairs used for the message-size
//! sweep bounds.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Unit multiplier for a message size. Wire form is the bare suffix the
/// benchmark binary understands (`-b 8K`, `-e 1G`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SizeUnit {
    #[default]
    Bytes,
    Kibi,
    Mebi,
    Gibi,
}

impl SizeUnit {
    pub fn multiplier(self) -> u64 {
        match self {
            SizeUnit::Bytes => 1,
            SizeUnit::Kibi => 1024,
            SizeUnit::Mebi => 1024 * 1024,
            SizeUnit::Gibi => 1024 * 1024 * 1024,
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            SizeUnit::Bytes => "",
            SizeUnit::Kibi => "K",
            SizeUnit::Mebi => "M",
            SizeUnit::Gibi => "G",
        }
    }
}

/// A message size: magnitude plus unit, e.g. `8K` or `1G`.
///
/// Serialized as the suffixed string form; deserialized from either that
/// form or a bare integer byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeSpec {
    pub value: u64,
    pub unit: SizeUnit,
}

impl SizeSpec {
    pub fn new(value: u64, unit: SizeUnit) -> Self {
        Self { value, unit }
    }

    pub fn bytes(self) -> u64 {
        self.value.saturating_mul(self.unit.multiplier())
    }
}

impl fmt::Display for SizeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.unit.suffix())
    }
}

impl FromStr for SizeSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty size".to_string());
        }
        let (digits, unit) = match s.as_bytes()[s.len() - 1].to_ascii_uppercase() {
            b'K' => (&s[..s.len() - 1], SizeUnit::Kibi),
            b'M' => (&s[..s.len() - 1], SizeUnit::Mebi),
            b'G' => (&s[..s.len() - 1], SizeUnit::Gibi),
            _ => (s, SizeUnit::Bytes),
        };
        let value: u64 = digits
            .parse()
            .map_err(|_| format!("invalid size magnitude: {digits:?}"))?;
        Ok(SizeSpec { value, unit })
    }
}

impl Serialize for SizeSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SizeSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SizeVisitor;

        impl de::Visitor<'_> for SizeVisitor {
            type Value = SizeSpec;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a size string like \"8K\" or a byte count")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<SizeSpec, E> {
                v.parse().map_err(de::Error::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<SizeSpec, E> {
                Ok(SizeSpec::new(v, SizeUnit::Bytes))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<SizeSpec, E> {
                if v < 0 {
                    return Err(de::Error::custom("size must be non-negative"));
                }
                Ok(SizeSpec::new(v as u64, SizeUnit::Bytes))
            }
        }

        deserializer.deserialize_any(SizeVisitor)
    }
}

/// NCCL debug verbosity, forwarded as `NCCL_DEBUG` when debugging is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DebugLevel {
    #[default]
    Warn,
    Info,
    Trace,
}

impl fmt::Display for DebugLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebugLevel::Warn => write!(f, "WARN"),
            DebugLevel::Info => write!(f, "INFO"),
            DebugLevel::Trace => write!(f, "TRACE"),
        }
    }
}

impl FromStr for DebugLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "WARN" => Ok(DebugLevel::Warn),
            "INFO" => Ok(DebugLevel::Info),
            "TRACE" => Ok(DebugLevel::Trace),
            other => Err(format!("unknown debug level: {other}")),
        }
    }
}

/// One run attempt's full parameter set. Treated as an immutable snapshot
/// once a run starts; only the owning caller mutates it between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchParams {
    /// mpirun rank placement policy, e.g. `ppr:8:node`.
    pub map_by: String,
    /// Interface for out-of-band TCP control traffic.
    pub oob_interface: String,
    /// Interface for the BTL TCP data path.
    pub data_interface: String,
    pub ib_gid_index: u32,
    pub min_channels: u32,
    pub qps_per_connection: u32,
    /// Lower bound of the message-size sweep; omit to use the binary's default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_begin: Option<SizeSpec>,
    /// Upper bound of the message-size sweep.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_end: Option<SizeSpec>,
    /// Iterations per size step; omit or zero to use the binary's default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iters: Option<u32>,
    /// Blocking-mode timeout in seconds; 0 means the server default.
    #[serde(default)]
    pub timeout_secs: u64,
    #[serde(default)]
    pub enable_debug: bool,
    #[serde(default)]
    pub debug_level: DebugLevel,
    /// Name of the stored host list to run against. Required to start a run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostlist: Option<String>,
}

impl Default for BenchParams {
    fn default() -> Self {
        Self {
            map_by: "ppr:8:node".to_string(),
            oob_interface: "bond0".to_string(),
            data_interface: "bond0".to_string(),
            ib_gid_index: 3,
            min_channels: 32,
            qps_per_connection: 8,
            size_begin: Some(SizeSpec::new(1, SizeUnit::Bytes)),
            size_end: Some(SizeSpec::new(1, SizeUnit::Mebi)),
            iters: Some(20),
            timeout_secs: 600,
            enable_debug: false,
            debug_level: DebugLevel::Warn,
            hostlist: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_spec_display_round_trip() {
        for text in ["1", "8K", "128M", "1G"] {
            let spec: SizeSpec = text.parse().unwrap();
            assert_eq!(spec.to_string(), text);
        }
    }

    #[test]
    fn size_spec_bytes() {
        assert_eq!(SizeSpec::new(8, SizeUnit::Kibi).bytes(), 8192);
        assert_eq!(SizeSpec::new(1, SizeUnit::Gibi).bytes(), 1 << 30);
    }

    #[test]
    fn size_spec_rejects_garbage() {
        assert!("".parse::<SizeSpec>().is_err());
        assert!("K".parse::<SizeSpec>().is_err());
        assert!("12X".parse::<SizeSpec>().is_err());
    }

    #[test]
    fn size_spec_deserializes_from_int_or_string() {
        let from_int: SizeSpec = serde_json::from_str("1048576").unwrap();
        assert_eq!(from_int, SizeSpec::new(1048576, SizeUnit::Bytes));

        let from_str: SizeSpec = serde_json::from_str("\"128M\"").unwrap();
        assert_eq!(from_str, SizeSpec::new(128, SizeUnit::Mebi));
    }

    #[test]
    fn params_wire_round_trip() {
        let params = BenchParams {
            hostlist: Some("default".to_string()),
            ..BenchParams::default()
        };
        let json = serde_json::to_string(&params).unwrap();
        let back: BenchParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
        assert!(json.contains("\"size_end\":\"1M\""));
    }
}
