//! Authorization oracle (spec §1: "ACL policy evaluation — treated as an
//! `Authorize(subject, object, action) -> ok | denied` oracle").
//!
//! The original project evaluates policy with `casbin` against an ACL
//! model/policy file pair. Full policy-file authoring is out of scope
//! here, but the oracle itself gets a believable default body instead of a
//! stub: a flat `(subject, object, action)` allow-list loaded from CSV,
//! reusing the teacher's already-declared `csv` dependency (enabled for
//! its `ingest` feature in the original Cargo.toml).

use std::collections::HashSet;
use std::path::Path;

use crate::error::{Error, Result};

/// Capability the RPC server is generic over (spec §9, "interface-style
/// polymorphism"): a test double can implement this without any file I/O.
pub trait Authorizer: Send + Sync {
    fn authorize(&self, subject: &str, object: &str, action: &str) -> Result<()>;
}

/// CSV-backed allow-list: each row is `subject,object,action`, `*`
/// matching any value in that column — the same shape as a casbin policy
/// CSV, minus the model file's matching DSL.
pub struct CsvAuthorizer {
    allowed: HashSet<(String, String, String)>,
}

impl CsvAuthorizer {
    pub fn from_path(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)
            .map_err(|e| Error::Config(format!("reading ACL policy {path:?}: {e}")))?;

        let mut allowed = HashSet::new();
        for record in reader.records() {
            let record = record.map_err(|e| Error::Config(format!("parsing ACL policy: {e}")))?;
            if record.len() < 3 {
                continue;
            }
            allowed.insert((
                record[0].trim().to_string(),
                record[1].trim().to_string(),
                record[2].trim().to_string(),
            ));
        }
        Ok(Self { allowed })
    }

    fn matches(&self, subject: &str, object: &str, action: &str) -> bool {
        for (s, o, a) in &self.allowed {
            let subject_ok = s == "*" || s == subject;
            let object_ok = o == "*" || o == object;
            let action_ok = a == "*" || a == action;
            if subject_ok && object_ok && action_ok {
                return true;
            }
        }
        false
    }
}

impl Authorizer for CsvAuthorizer {
    fn authorize(&self, subject: &str, object: &str, action: &str) -> Result<()> {
        if self.matches(subject, object, action) {
            Ok(())
        } else {
            Err(Error::PermissionDenied {
                subject: subject.to_string(),
                object: object.to_string(),
                action: action.to_string(),
            })
        }
    }
}

/// Allows everything; useful for tests and for nodes that disable ACL
/// enforcement entirely.
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn authorize(&self, _subject: &str, _object: &str, _action: &str) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn policy(rows: &str) -> CsvAuthorizer {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(rows.as_bytes()).unwrap();
        CsvAuthorizer::from_path(file.path()).unwrap()
    }

    /// Spec §8, S3: unauthorized access.
    #[test]
    fn s3_user_allowed_nobody_denied() {
        let auth = policy("user,*,write\nuser,*,read\n");

        assert!(auth.authorize("user", "*", "write").is_ok());
        assert!(auth.authorize("nobody", "*", "write").is_err());
        assert!(auth.authorize("nobody", "*", "read").is_err());
    }

    #[test]
    fn wildcard_subject_allows_anyone() {
        let auth = policy("*,*,read\n");
        assert!(auth.authorize("anyone", "*", "read").is_ok());
        assert!(auth.authorize("anyone", "*", "write").is_err());
    }
}
