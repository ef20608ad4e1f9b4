//! SNMP snapshot lines and the static OID table built from them.
//!
//! A snapshot line is `<oid>/<asn1-type>/<value-type>/<value>`, e.g.
//! `.1.3.6.1.2.1.1.5.0/4/string/core-sw-01`.

use crate::config::SnmpServiceConfig;
use crate::error::{ConfigError, SnapshotError};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// Decoded value of a snapshot line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PduValue {
    Octets(Vec<u8>),
    Int(i64),
    Uint(u32),
    Uint32(u32),
    Uint64(u64),
}

impl PduValue {
    /// Value-type token and encoded value.
    fn encode(&self) -> (&'static str, String) {
        match self {
            PduValue::Octets(bytes) if is_printable(bytes) => {
                ("string", String::from_utf8_lossy(bytes).into_owned())
            }
            PduValue::Octets(bytes) => ("hex-string", hex::encode(bytes)),
            PduValue::Int(v) => ("int", v.to_string()),
            PduValue::Uint(v) => ("uint", v.to_string()),
            PduValue::Uint32(v) => ("uint32", v.to_string()),
            PduValue::Uint64(v) => ("uint64", v.to_string()),
        }
    }

    fn decode(kind: &str, value: &str) -> Result<Self, SnapshotError> {
        let invalid = || SnapshotError::Value {
            kind: kind.to_string(),
            value: value.to_string(),
        };
        match kind {
            "string" => Ok(PduValue::Octets(value.as_bytes().to_vec())),
            "hex-string" => hex::decode(value).map(PduValue::Octets).map_err(|_| invalid()),
            "int" => value.parse().map(PduValue::Int).map_err(|_| invalid()),
            "uint" => value.parse().map(PduValue::Uint).map_err(|_| invalid()),
            "uint32" => value.parse().map(PduValue::Uint32).map_err(|_| invalid()),
            "uint64" => value.parse().map(PduValue::Uint64).map_err(|_| invalid()),
            other => Err(SnapshotError::ValueType(other.to_string())),
        }
    }
}

fn is_printable(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| (32..=126).contains(b))
}

/// One OID with its ASN.1 BER type tag and value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeutralPdu {
    pub oid: String,
    pub asn1_ber: u8,
    pub value: PduValue,
}

impl NeutralPdu {
    /// Conventional name of the type tag, when it is one SNMP agents use.
    pub fn asn1_name(&self) -> Option<&'static str> {
        Some(match self.asn1_ber {
            0x02 => "Integer",
            0x04 => "OctetString",
            0x05 => "Null",
            0x06 => "ObjectIdentifier",
            0x40 => "IPAddress",
            0x41 => "Counter32",
            0x42 => "Gauge32",
            0x43 => "TimeTicks",
            0x44 => "Opaque",
            0x46 => "Counter64",
            _ => return None,
        })
    }
}

impl fmt::Display for NeutralPdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (kind, value) = self.value.encode();
        write!(f, "{}/{}/{}/{}", self.oid, self.asn1_ber, kind, value)
    }
}

impl FromStr for NeutralPdu {
    type Err = SnapshotError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = line.splitn(4, '/').collect();
        let [oid, asn1, kind, value] = parts[..] else {
            return Err(SnapshotError::Parts(line.to_string()));
        };
        let asn1_ber = asn1
            .parse::<u8>()
            .map_err(|_| SnapshotError::Asn1Type(asn1.to_string()))?;

        Ok(Self {
            oid: oid.to_string(),
            asn1_ber,
            value: PduValue::decode(kind, value)?,
        })
    }
}

/// Parse a snapshot document. Blank lines and `#` comments are skipped.
pub fn parse_snapshot(text: &str) -> Result<Vec<NeutralPdu>, SnapshotError> {
    text.lines()
        .filter(|line| !line.starts_with('#') && !line.trim().is_empty())
        .map(str::parse::<NeutralPdu>)
        .collect()
}

/// Static OID lookup table; later entries for an OID replace earlier ones.
#[derive(Debug, Clone, Default)]
pub struct SnapshotTable {
    entries: BTreeMap<String, NeutralPdu>,
}

impl SnapshotTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pdu: NeutralPdu) {
        self.entries.insert(pdu.oid.clone(), pdu);
    }

    pub fn extend<I: IntoIterator<Item = NeutralPdu>>(&mut self, pdus: I) {
        for pdu in pdus {
            self.insert(pdu);
        }
    }

    /// Snapshot files in order, then the inline `oids`.
    pub fn load(config: &SnmpServiceConfig) -> Result<Self, ConfigError> {
        let mut table = Self::new();
        for file in &config.snapshot_files {
            let pdus = read_snapshot_file(file)?;
            debug!(service = %config.name, file = %file.display(), oids = pdus.len(), "snapshot file parsed");
            table.extend(pdus);
        }
        for line in &config.oids {
            let pdu = line.parse::<NeutralPdu>().map_err(|source| ConfigError::Snapshot {
                path: PathBuf::from("oids"),
                source,
            })?;
            table.insert(pdu);
        }
        info!(service = %config.name, oids = table.len(), "snapshot table loaded");
        Ok(table)
    }

    pub fn get(&self, oid: &str) -> Option<&NeutralPdu> {
        self.entries.get(oid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NeutralPdu> {
        self.entries.values()
    }
}

/// Read and parse one snapshot file.
pub fn read_snapshot_file(path: &Path) -> Result<Vec<NeutralPdu>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_snapshot(&text).map_err(|source| ConfigError::Snapshot {
        path: path.to_path_buf(),
        source,
    })
}
