// db.rs
//
// The database descriptor: a text file mapping variable names to their
// dataset-meta file and index file. Lines are `var.metapath=<path>` and
// `var.indexpath=<path>`; blank lines and `#` comments are ignored.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::error::BinIdxError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DbEntry {
    pub metapath: Option<PathBuf>,
    pub indexpath: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Database {
    vars: BTreeMap<String, DbEntry>,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(path: &Path) -> Result<Self, BinIdxError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text, &path.display().to_string())
    }

    pub fn parse(text: &str, origin: &str) -> Result<Self, BinIdxError> {
        let mut db = Database::new();
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let malformed = |reason: String| BinIdxError::MalformedDescriptor {
                path: origin.to_string(),
                reason: format!("line {}: {}", lineno + 1, reason),
            };
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| malformed("expected key=value".into()))?;
            let (varname, field) = key
                .trim()
                .rsplit_once('.')
                .ok_or_else(|| malformed("expected var.field key".into()))?;
            if varname.is_empty() {
                return Err(malformed("empty variable name".into()));
            }
            let entry = db.vars.entry(varname.to_string()).or_default();
            match field {
                "metapath" => entry.metapath = Some(PathBuf::from(value.trim())),
                "indexpath" => entry.indexpath = Some(PathBuf::from(value.trim())),
                other => return Err(malformed(format!("unknown field {:?}", other))),
            }
        }
        Ok(db)
    }

    pub fn set_var(&mut self, varname: &str, metapath: PathBuf, indexpath: PathBuf) {
        self.vars.insert(
            varname.to_string(),
            DbEntry {
                metapath: Some(metapath),
                indexpath: Some(indexpath),
            },
        );
    }

    pub fn vars(&self) -> impl Iterator<Item = (&String, &DbEntry)> {
        self.vars.iter()
    }

    pub fn meta_path(&self, varname: &str) -> Result<PathBuf, BinIdxError> {
        self.vars
            .get(varname)
            .and_then(|e| e.metapath.clone())
            .ok_or_else(|| BinIdxError::StringError(format!("no metapath for variable {}", varname)))
    }

    pub fn index_path(&self, varname: &str) -> Result<PathBuf, BinIdxError> {
        self.vars
            .get(varname)
            .and_then(|e| e.indexpath.clone())
            .ok_or_else(|| {
                BinIdxError::StringError(format!("no indexpath for variable {}", varname))
            })
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (var, entry) in &self.vars {
            if let Some(meta) = &entry.metapath {
                let _ = writeln!(out, "{}.metapath={}", var, meta.display());
            }
            if let Some(index) = &entry.indexpath {
                let _ = writeln!(out, "{}.indexpath={}", var, index.display());
            }
        }
        out
    }

    pub fn save(&self, path: &Path) -> Result<(), BinIdxError> {
        std::fs::write(path, self.to_text())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        let text = "\
# test database
temp.metapath=/data/temp.meta
temp.indexpath=/data/temp.binidx

pressure.metapath=/data/p.meta
pressure.indexpath=/data/p.binidx
";
        let db = Database::parse(text, "test").unwrap();
        assert_eq!(
            db.index_path("temp").unwrap(),
            PathBuf::from("/data/temp.binidx")
        );
        assert_eq!(
            db.meta_path("pressure").unwrap(),
            PathBuf::from("/data/p.meta")
        );
        let reparsed = Database::parse(&db.to_text(), "round").unwrap();
        assert_eq!(reparsed, db);
    }

    #[test]
    fn test_malformed_lines() {
        assert!(matches!(
            Database::parse("temp.metapath", "t"),
            Err(BinIdxError::MalformedDescriptor { .. })
        ));
        assert!(matches!(
            Database::parse("noval=path", "t"),
            Err(BinIdxError::MalformedDescriptor { .. })
        ));
        assert!(matches!(
            Database::parse("temp.bogus=path", "t"),
            Err(BinIdxError::MalformedDescriptor { .. })
        ));
    }

    #[test]
    fn test_missing_var() {
        let db = Database::parse("a.indexpath=x", "t").unwrap();
        assert!(db.index_path("b").is_err());
        assert!(db.meta_path("a").is_err());
    }
}
