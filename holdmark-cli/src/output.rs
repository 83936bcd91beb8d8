//! Human-readable and JSON rendering of command results.

use anyhow::Result;
use holdmark_core::{Abstraction, BatchDestroyResult, ListAbstractionsError};
use serde::Serialize;

/// One abstraction per line, or a JSON array.
pub fn render_abstractions(abstractions: &[Abstraction], json: bool) -> Result<String> {
    if json {
        return to_json(abstractions);
    }
    Ok(abstractions
        .iter()
        .map(|a| format!("{}\n", a))
        .collect())
}

pub fn render_errors(errors: &[ListAbstractionsError]) -> String {
    errors.iter().map(|e| format!("error: {}\n", e)).collect()
}

/// One line per destroy outcome, or a JSON array.
pub fn render_destroy_results(results: &[BatchDestroyResult], json: bool) -> Result<String> {
    if json {
        return to_json(results);
    }
    Ok(results
        .iter()
        .map(|r| match &r.destroy_err {
            None => format!("destroyed {}\n", r.abstraction),
            Some(err) => format!("failed    {}: {}\n", r.abstraction, err),
        })
        .collect())
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let mut out = serde_json::to_string_pretty(value)?;
    out.push('\n');
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use holdmark_core::extractors::REPLICATION_CURSOR_V1_NAME;
    use holdmark_core::{
        AbstractionType, BookmarkAbstraction, DatasetPath, FilesystemVersion, StoreError,
    };

    fn cursor() -> Abstraction {
        let fs = DatasetPath::parse("pool/a").unwrap();
        let v = FilesystemVersion::bookmark(REPLICATION_CURSOR_V1_NAME, 1, 100, Default::default());
        Abstraction::Bookmark(BookmarkAbstraction::new(
            AbstractionType::ReplicationCursorBookmarkV1,
            fs,
            v,
            None,
        ))
    }

    #[test]
    fn test_render_text() {
        let out = render_abstractions(&[cursor()], false).unwrap();
        assert_eq!(
            out,
            "replication-cursor-bookmark-v1 pool/a#zrepl_replication_cursor\n"
        );
    }

    #[test]
    fn test_render_json() {
        let out = render_abstractions(&[cursor()], true).unwrap();
        let v: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v[0]["type"], "replication-cursor-bookmark-v1");
        assert!(v[0]["job_id"].is_null());
    }

    #[test]
    fn test_render_destroy_results() {
        let results = vec![
            BatchDestroyResult {
                abstraction: cursor(),
                destroy_err: None,
            },
            BatchDestroyResult {
                abstraction: cursor(),
                destroy_err: Some(StoreError::Backend("busy".into())),
            },
        ];
        let text = render_destroy_results(&results, false).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("destroyed "));
        assert!(lines[1].starts_with("failed ") && lines[1].ends_with("busy"));

        let v: serde_json::Value =
            serde_json::from_str(&render_destroy_results(&results, true).unwrap()).unwrap();
        assert_eq!(v[0]["destroy_err"], "");
        assert_eq!(v[1]["destroy_err"], "store backend error: busy");
    }
}
