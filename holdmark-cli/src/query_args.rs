//! Query flags shared by the subcommands.

use anyhow::{Context, Result, bail};
use clap::Args;
use holdmark_core::{
    AbstractionTypeSet, CreateTxgRange, CreateTxgRangeBound, JobId, ListZfsHoldsAndBookmarksQuery,
    SubtreeFilter,
};
use std::sync::Arc;

#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    /// Single filesystem to scan
    #[arg(long, conflicts_with = "filter")]
    pub fs: Option<String>,

    /// Filesystem filter rule, e.g. `pool/data<` or `!pool/data/tmp` (repeatable)
    #[arg(long)]
    pub filter: Vec<String>,

    /// Abstraction type to list (repeatable, default: all)
    #[arg(long = "type", value_name = "TYPE")]
    pub types: Vec<String>,

    /// Only markers of this job (markers without a job always match)
    #[arg(long)]
    pub job: Option<String>,

    /// Lower CreateTXG bound
    #[arg(long)]
    pub since: Option<u64>,

    /// Make --since exclusive
    #[arg(long, requires = "since")]
    pub since_exclusive: bool,

    /// Number of filesystems scanned concurrently (default from config)
    #[arg(long)]
    pub concurrency: Option<usize>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct UntilArgs {
    /// Upper CreateTXG bound
    #[arg(long)]
    pub until: Option<u64>,

    /// Make --until exclusive
    #[arg(long, requires = "until")]
    pub until_exclusive: bool,
}

fn bound(create_txg: u64, exclusive: bool) -> CreateTxgRangeBound {
    if exclusive {
        CreateTxgRangeBound::exclusive(create_txg)
    } else {
        CreateTxgRangeBound::inclusive(create_txg)
    }
}

impl QueryArgs {
    /// Build and validate the query these flags describe.
    pub fn build(
        &self,
        until: &UntilArgs,
        default_concurrency: usize,
    ) -> Result<ListZfsHoldsAndBookmarksQuery> {
        let query = match (&self.fs, self.filter.is_empty()) {
            (Some(fs), true) => ListZfsHoldsAndBookmarksQuery::for_filesystem(fs.clone()),
            (None, false) => {
                let mut filter = SubtreeFilter::new();
                for rule in &self.filter {
                    filter.add_rule_str(rule)?;
                }
                ListZfsHoldsAndBookmarksQuery::for_filter(Arc::new(filter))
            }
            (Some(_), false) => bail!("--fs and --filter are mutually exclusive"),
            (None, true) => bail!("one of --fs or --filter is required"),
        };

        let what = if self.types.is_empty() {
            AbstractionTypeSet::all()
        } else {
            AbstractionTypeSet::from_strings(&self.types)?
        };
        let job_id = self.job.as_deref().map(JobId::new).transpose()?;
        let range = CreateTxgRange {
            since: self.since.map(|t| bound(t, self.since_exclusive)),
            until: until.until.map(|t| bound(t, until.until_exclusive)),
        };

        let query = query
            .what(what)
            .job_id(job_id)
            .create_txg(range)
            .concurrency(self.concurrency.unwrap_or(default_concurrency));
        query.validate().context("invalid query")?;
        Ok(query)
    }
}
