//! IPSpace engine: a longest-prefix IP-range table with typed columns,
//! reloadable from a CSV file without blocking in-flight lookups.
//!
//! The live table is held behind `RwLock<Arc<Table>>`: a lookup takes the
//! read lock just long enough to clone the `Arc`, then matches against that
//! snapshot lock-free. A reload builds a brand new `Table` off to the side
//! and only takes the write lock to swap the `Arc` in, so a slow parse of a
//! large CSV never blocks concurrent lookups.

use crate::error::{Errata, LoadResult};
use ipnet::IpNet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Address,
    String,
    Integer,
    Enum,
    Flags,
}

#[derive(Debug, Clone)]
pub enum ColumnValue {
    Address(IpAddr),
    String(Arc<str>),
    Integer(i64),
    Enum(Arc<str>),
    Flags(u64),
}

#[derive(Debug, Clone)]
pub struct ColumnSchema {
    pub name: String,
    pub kind: ColumnType,
}

#[derive(Debug, Clone)]
struct Row {
    range: IpNet,
    values: Vec<ColumnValue>,
}

/// An immutable, fully-loaded table snapshot.
#[derive(Debug, Default)]
pub struct Table {
    columns: Vec<ColumnSchema>,
    rows: Vec<Row>,
}

impl Table {
    pub fn columns(&self) -> &[ColumnSchema] {
        &self.columns
    }

    /// Longest-prefix match: among all rows whose range contains `addr`,
    /// return the one with the smallest range (most specific prefix).
    pub fn lookup(&self, addr: IpAddr) -> Option<&[ColumnValue]> {
        self.rows
            .iter()
            .filter(|row| row.range.contains(&addr))
            .min_by_key(|row| row.range.prefix_len().abs_diff(row.range.max_prefix_len()))
            .map(|row| row.values.as_slice())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

/// Parse a CSV IPSpace table. Header row: `range,<name>:<TYPE>,...` where
/// `range` is always column 0 (implicit `KEY`/`ADDRESS` range column,
/// CIDR or `start-end`). Data rows: range literal, then one value per
/// declared column, comma-separated.
pub fn parse_csv(source: &str, file: &Path) -> LoadResult<Table> {
    let mut errata = Errata::new();
    let mut lines = source.lines().filter(|l| !l.trim().is_empty());

    let header = match lines.next() {
        Some(h) => h,
        None => {
            errata.push_error_at(
                "ipspace table is empty",
                crate::error::SourceMark {
                    file: file.to_path_buf(),
                    line: Some(1),
                },
            );
            return Err(errata);
        }
    };

    let mut parts = header.split(',');
    parts.next(); // range column, unnamed
    let mut columns = Vec::new();
    for field in parts {
        match parse_column_header(field) {
            Ok(col) => columns.push(col),
            Err(msg) => {
                errata.push_error(format!("bad column header '{field}': {msg}"));
            }
        }
    }
    if !errata.is_ok() {
        return Err(errata);
    }

    let mut rows = Vec::new();
    for (lineno, line) in lines.enumerate() {
        let lineno = lineno + 2; // 1-based, header consumed line 1
        let mut fields = line.split(',');
        let range_str = match fields.next() {
            Some(r) => r.trim(),
            None => continue,
        };
        let range = match parse_range(range_str) {
            Ok(r) => r,
            Err(msg) => {
                errata.push_error_at(
                    format!("bad range '{range_str}': {msg}"),
                    crate::error::SourceMark {
                        file: file.to_path_buf(),
                        line: Some(lineno),
                    },
                );
                continue;
            }
        };

        let mut values = Vec::with_capacity(columns.len());
        for col in &columns {
            let raw = fields.next().unwrap_or("").trim();
            match parse_value(col, raw) {
                Ok(v) => values.push(v),
                Err(msg) => {
                    errata.push_error_at(
                        format!("column '{}': {msg}", col.name),
                        crate::error::SourceMark {
                            file: file.to_path_buf(),
                            line: Some(lineno),
                        },
                    );
                    values.push(ColumnValue::Integer(0));
                }
            }
        }
        rows.push(Row { range, values });
    }

    if !errata.is_ok() {
        return Err(errata);
    }

    Ok(Table { columns, rows })
}

fn parse_column_header(field: &str) -> Result<ColumnSchema, String> {
    let field = field.trim();
    let (name, kind) = field.split_once(':').ok_or("missing ':TYPE' suffix")?;
    let kind = match kind.to_ascii_uppercase().as_str() {
        "ADDRESS" => ColumnType::Address,
        "STRING" => ColumnType::String,
        "INTEGER" => ColumnType::Integer,
        "ENUM" => ColumnType::Enum,
        "FLAGS" => ColumnType::Flags,
        other => return Err(format!("unknown column type '{other}'")),
    };
    Ok(ColumnSchema {
        name: name.trim().to_string(),
        kind,
    })
}

fn parse_range(text: &str) -> Result<IpNet, String> {
    if let Ok(net) = text.parse::<IpNet>() {
        return Ok(net);
    }
    if let Some((start, end)) = text.split_once('-') {
        let start: IpAddr = start.trim().parse().map_err(|_| "bad start address")?;
        let end: IpAddr = end.trim().parse().map_err(|_| "bad end address")?;
        return range_to_net(start, end);
    }
    let addr: IpAddr = text.parse().map_err(|_| "not an address, CIDR, or range")?;
    IpNet::new(addr, if addr.is_ipv4() { 32 } else { 128 }).map_err(|e| e.to_string())
}

/// Approximate an arbitrary `start-end` range as the smallest CIDR block
/// that covers it. Ranges are modeled as CIDR-addressable; exact
/// non-power-of-two ranges are widened to the covering block, which is a
/// conservative (over-matching) approximation rather than silently
/// dropping data.
fn range_to_net(start: IpAddr, end: IpAddr) -> Result<IpNet, String> {
    match (start, end) {
        (IpAddr::V4(s), IpAddr::V4(e)) => {
            let s = u32::from(s);
            let e = u32::from(e);
            if s > e {
                return Err("range start after end".into());
            }
            let mut prefix = 32u8;
            while prefix > 0 {
                let mask = !0u32 << (32 - prefix + 1);
                if (s & mask) != (e & mask) {
                    break;
                }
                prefix -= 1;
            }
            IpNet::new(IpAddr::V4(s.into()), prefix).map_err(|e| e.to_string())
        }
        (IpAddr::V6(s), IpAddr::V6(e)) => {
            let s = u128::from(s);
            let e = u128::from(e);
            if s > e {
                return Err("range start after end".into());
            }
            let mut prefix = 128u8;
            while prefix > 0 {
                let mask = !0u128 << (128 - prefix + 1);
                if (s & mask) != (e & mask) {
                    break;
                }
                prefix -= 1;
            }
            IpNet::new(IpAddr::V6(s.into()), prefix).map_err(|e| e.to_string())
        }
        _ => Err("range endpoints must be the same address family".into()),
    }
}

fn parse_value(col: &ColumnSchema, raw: &str) -> Result<ColumnValue, String> {
    match col.kind {
        ColumnType::Address => raw
            .parse::<IpAddr>()
            .map(ColumnValue::Address)
            .map_err(|_| "not an IP address".to_string()),
        ColumnType::String => Ok(ColumnValue::String(Arc::from(raw))),
        ColumnType::Integer => raw
            .parse::<i64>()
            .map(ColumnValue::Integer)
            .map_err(|_| "not an integer".to_string()),
        ColumnType::Enum => Ok(ColumnValue::Enum(Arc::from(raw))),
        ColumnType::Flags => {
            let mut bits = 0u64;
            for (i, flag) in raw.split('|').enumerate() {
                if !flag.trim().is_empty() {
                    bits |= 1 << i.min(63);
                }
            }
            Ok(ColumnValue::Flags(bits))
        }
    }
}

/// A reloadable IPSpace table: current snapshot plus the file it was
/// loaded from and the mtime observed at last load, for the periodic
/// reload task in `reload.rs` to poll against.
pub struct IpSpaceHandle {
    path: PathBuf,
    table: RwLock<Arc<Table>>,
    last_mtime: RwLock<Option<SystemTime>>,
}

impl IpSpaceHandle {
    pub fn load(path: impl Into<PathBuf>) -> LoadResult<Self> {
        let path = path.into();
        let source = std::fs::read_to_string(&path).map_err(|e| {
            let mut errata = Errata::new();
            errata.push_error(format!("failed to read {}: {e}", path.display()));
            errata
        })?;
        let table = parse_csv(&source, &path)?;
        let mtime = std::fs::metadata(&path).ok().and_then(|m| m.modified().ok());
        Ok(IpSpaceHandle {
            path,
            table: RwLock::new(Arc::new(table)),
            last_mtime: RwLock::new(mtime),
        })
    }

    pub fn snapshot(&self) -> Arc<Table> {
        Arc::clone(&self.table.read().expect("ipspace lock poisoned"))
    }

    pub fn lookup(&self, addr: IpAddr) -> Option<Vec<ColumnValue>> {
        self.snapshot().lookup(addr).map(|v| v.to_vec())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the backing file's mtime and reload if it changed. Returns
    /// `Ok(true)` if a reload happened.
    pub fn reload_if_changed(&self) -> LoadResult<bool> {
        let current_mtime = std::fs::metadata(&self.path).ok().and_then(|m| m.modified().ok());
        let changed = {
            let last = self.last_mtime.read().expect("ipspace lock poisoned");
            current_mtime != *last
        };
        if !changed {
            return Ok(false);
        }
        let source = std::fs::read_to_string(&self.path).map_err(|e| {
            let mut errata = Errata::new();
            errata.push_error(format!("failed to read {}: {e}", self.path.display()));
            errata
        })?;
        let table = parse_csv(&source, &self.path)?;
        *self.table.write().expect("ipspace lock poisoned") = Arc::new(table);
        *self.last_mtime.write().expect("ipspace lock poisoned") = current_mtime;
        Ok(true)
    }
}

#[derive(Debug, Default)]
pub struct IpSpaceRegistry {
    tables: dashmap::DashMap<String, Arc<IpSpaceHandle>>,
}

impl IpSpaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a named table. Takes `&self` (not `&mut self`) so
    /// the `ip-space-define` directive can register a table from `POST_LOAD`
    /// without needing exclusive access to the whole `Shared` bundle.
    pub fn insert(&self, name: impl Into<String>, handle: Arc<IpSpaceHandle>) {
        self.tables.insert(name.into(), handle);
    }

    pub fn get(&self, name: &str) -> Option<Arc<IpSpaceHandle>> {
        self.tables.get(name).map(|e| Arc::clone(&e))
    }

    pub fn names(&self) -> Vec<String> {
        self.tables.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const CSV: &str = "range,name:STRING,weight:INTEGER\n\
10.0.0.0/8,internal,10\n\
10.1.0.0/16,internal-east,20\n\
192.168.0.0/16,lan,5\n";

    #[test]
    fn longest_prefix_wins_over_broader_match() {
        let table = parse_csv(CSV, Path::new("t.csv")).unwrap();
        let addr = IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3));
        let row = table.lookup(addr).unwrap();
        let name_idx = table.column_index("name").unwrap();
        match &row[name_idx] {
            ColumnValue::String(s) => assert_eq!(&**s, "internal-east"),
            _ => panic!("wrong column type"),
        }
    }

    #[test]
    fn unmatched_address_returns_none() {
        let table = parse_csv(CSV, Path::new("t.csv")).unwrap();
        let addr = IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8));
        assert!(table.lookup(addr).is_none());
    }

    #[test]
    fn range_without_cidr_widens_to_covering_block() {
        let csv = "range,name:STRING\n10.0.0.0-10.0.0.255,block,\n";
        let table = parse_csv(csv, Path::new("t.csv")).unwrap();
        let addr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 128));
        assert!(table.lookup(addr).is_some());
    }

    #[test]
    fn bad_column_type_is_reported_in_errata() {
        let csv = "range,weird:NOTATYPE\n10.0.0.0/8,x\n";
        let err = parse_csv(csv, Path::new("t.csv")).unwrap_err();
        assert!(!err.is_ok());
    }
}
