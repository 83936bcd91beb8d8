//! `zfs(8)` command-line store driver.
//!
//! Each store call runs one `zfs` invocation. Children are killed when the
//! call is cancelled.

use async_trait::async_trait;
use chrono::DateTime;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::store::{
    DatasetFilter, DatasetPath, FilesystemVersion, Result, StoreError, VersionKind, VersionStore,
};

/// Store backed by the `zfs` binary.
#[derive(Debug, Clone)]
pub struct ZfsCli {
    binary: PathBuf,
}

impl Default for ZfsCli {
    fn default() -> Self {
        Self::new("zfs")
    }
}

impl ZfsCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run `zfs <args>` and return its stdout.
    async fn run(&self, args: &[&str], cancel: &CancellationToken) -> Result<String> {
        let command = format!("{} {}", self.binary.display(), args.join(" "));
        debug!(command = %command, "running zfs");

        let child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StoreError::Cancelled),
            output = child.wait_with_output() => output?,
        };

        if output.status.success() {
            String::from_utf8(output.stdout)
                .map_err(|e| StoreError::Parse(format!("non-UTF-8 output of `{}`: {}", command, e)))
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if is_not_found(&stderr) {
                Err(StoreError::NotFound(stderr))
            } else {
                Err(StoreError::Command { command, stderr })
            }
        }
    }
}

fn is_not_found(stderr: &str) -> bool {
    stderr.contains("dataset does not exist")
        || stderr.contains("could not find any snapshots")
        || stderr.contains("bookmark does not exist")
}

/// Parse `zfs list -H -p -o name,guid,createtxg,creation -t snapshot,bookmark`
/// output for the versions of `fs`.
pub fn parse_version_list(fs: &DatasetPath, output: &str) -> Result<Vec<FilesystemVersion>> {
    let mut versions = Vec::new();
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let fields: Vec<&str> = line.split('\t').collect();
        let [name, guid, create_txg, creation] = fields.as_slice() else {
            return Err(StoreError::Parse(format!(
                "expected 4 tab-separated fields, got {:?}",
                line
            )));
        };

        let (kind, dataset, version) = if let Some((d, v)) = name.split_once('@') {
            (VersionKind::Snapshot, d, v)
        } else if let Some((d, v)) = name.split_once('#') {
            (VersionKind::Bookmark, d, v)
        } else {
            return Err(StoreError::Parse(format!(
                "{:?} is neither a snapshot nor a bookmark",
                name
            )));
        };
        if dataset != fs.as_str() {
            // -d 1 should only list direct versions
            continue;
        }

        let number = |field: &str, what: &str| {
            field
                .parse::<u64>()
                .map_err(|e| StoreError::Parse(format!("invalid {} {:?}: {}", what, field, e)))
        };
        let guid = number(*guid, "guid")?;
        let create_txg = number(*create_txg, "createtxg")?;
        let creation_secs = number(*creation, "creation")?;
        let creation = i64::try_from(creation_secs)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or_else(|| {
                StoreError::Parse(format!("creation time {} out of range", creation_secs))
            })?;

        versions.push(FilesystemVersion {
            kind,
            name: version.to_string(),
            guid,
            create_txg,
            creation,
        });
    }
    Ok(versions)
}

/// Parse `zfs holds -H` output into hold tags.
pub fn parse_holds(output: &str) -> Result<Vec<String>> {
    output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let mut fields = line.split('\t');
            match (fields.next(), fields.next()) {
                (Some(_), Some(tag)) => Ok(tag.to_string()),
                _ => Err(StoreError::Parse(format!("malformed holds line {:?}", line))),
            }
        })
        .collect()
}

/// Parse `zfs list -H -o name` output into dataset paths.
pub fn parse_dataset_list(output: &str) -> Result<Vec<DatasetPath>> {
    output
        .lines()
        .filter(|l| !l.is_empty())
        .map(|name| DatasetPath::parse(name).map_err(|e| StoreError::Parse(e.to_string())))
        .collect()
}

#[async_trait]
impl VersionStore for ZfsCli {
    async fn list_filesystem_versions(
        &self,
        fs: &DatasetPath,
        cancel: &CancellationToken,
    ) -> Result<Vec<FilesystemVersion>> {
        let out = self
            .run(
                &[
                    "list",
                    "-H",
                    "-p",
                    "-o",
                    "name,guid,createtxg,creation",
                    "-t",
                    "snapshot,bookmark",
                    "-d",
                    "1",
                    fs.as_str(),
                ],
                cancel,
            )
            .await?;
        parse_version_list(fs, &out)
    }

    async fn list_holds(
        &self,
        fs: &DatasetPath,
        snapshot: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let target = format!("{}@{}", fs, snapshot);
        let out = self.run(&["holds", "-H", &target], cancel).await?;
        parse_holds(&out)
    }

    async fn destroy_bookmark(
        &self,
        fs: &DatasetPath,
        bookmark: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let target = format!("{}#{}", fs, bookmark);
        match self.run(&["destroy", &target], cancel).await {
            Ok(_) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn release_hold(
        &self,
        fs: &DatasetPath,
        snapshot: &str,
        tag: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let target = format!("{}@{}", fs, snapshot);
        match self.run(&["release", tag, &target], cancel).await {
            Ok(_) => Ok(()),
            Err(StoreError::Command { stderr, .. }) if stderr.contains("no such tag") => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn list_filesystems(
        &self,
        filter: &dyn DatasetFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<DatasetPath>> {
        let out = self
            .run(&["list", "-H", "-o", "name", "-t", "filesystem,volume", "-r"], cancel)
            .await?;
        Ok(parse_dataset_list(&out)?
            .into_iter()
            .filter(|fs| filter.filter(fs))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fs() -> DatasetPath {
        DatasetPath::parse("pool/a").unwrap()
    }

    #[test]
    fn test_parse_version_list() {
        let out = "pool/a@s1\t12345\t100\t1600000000\n\
                   pool/a#zrepl_replication_cursor\t12345\t100\t1600000000\n\
                   \n";
        let versions = parse_version_list(&fs(), out).unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].kind, VersionKind::Snapshot);
        assert_eq!(versions[0].name, "s1");
        assert_eq!(versions[0].guid, 12345);
        assert_eq!(versions[0].create_txg, 100);
        assert_eq!(versions[0].creation.timestamp(), 1_600_000_000);
        assert_eq!(versions[1].kind, VersionKind::Bookmark);
        assert_eq!(versions[1].to_abs_path(&fs()), "pool/a#zrepl_replication_cursor");
    }

    #[test]
    fn test_parse_version_list_skips_children() {
        let out = "pool/a/b@s1\t1\t2\t3\n";
        assert!(parse_version_list(&fs(), out).unwrap().is_empty());
    }

    #[test]
    fn test_parse_version_list_errors() {
        assert!(parse_version_list(&fs(), "pool/a@s1\t1\t2\n").is_err());
        assert!(parse_version_list(&fs(), "pool/a\t1\t2\t3\n").is_err());
        assert!(parse_version_list(&fs(), "pool/a@s1\tx\t2\t3\n").is_err());
    }

    #[test]
    fn test_parse_version_list_creation_out_of_range() {
        let out = "pool/a@s1\t1\t2\t18446744073709551615\n";
        assert!(matches!(
            parse_version_list(&fs(), out),
            Err(StoreError::Parse(msg)) if msg.contains("out of range")
        ));
    }

    #[test]
    fn test_parse_holds() {
        let out = "pool/a@s1\tzrepl_STEP_J_j\tThu Jan  1 00:00 2024\n\
                   pool/a@s1\tkeep\tThu Jan  1 00:00 2024\n";
        assert_eq!(parse_holds(out).unwrap(), vec!["zrepl_STEP_J_j", "keep"]);
        assert!(parse_holds("").unwrap().is_empty());
        assert!(parse_holds("garbage").is_err());
    }

    #[test]
    fn test_parse_dataset_list() {
        let list = parse_dataset_list("pool\npool/a\n\n").unwrap();
        assert_eq!(list.len(), 2);
        assert!(parse_dataset_list("pool/a@s").is_err());
    }

    #[test]
    fn test_parse_dataset_list_keeps_spaces() {
        let list = parse_dataset_list("pool\npool/data\npool/my data\n").unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[2].as_str(), "pool/my data");

        let fs = DatasetPath::parse("pool/my data").unwrap();
        let out = "pool/my data#zrepl_replication_cursor\t1\t2\t3\n";
        assert_eq!(parse_version_list(&fs, out).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_binary_is_io_error() {
        let zfs = ZfsCli::new("/nonexistent/holdmark-test-zfs");
        let res = zfs
            .list_filesystem_versions(&fs(), &CancellationToken::new())
            .await;
        assert!(matches!(res, Err(StoreError::Io(_))));
    }
}
