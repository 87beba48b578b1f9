use std::path::Path;
use std::sync::Arc;

use strata::AnalyzeOptions;
use strata::progress::IndicatifProgress;
use tokio_util::sync::CancellationToken;

use super::report;
use crate::ViewArgs;
use crate::error::{CliError, Result};
use crate::utils;

pub async fn execute(path: &Path, view: &ViewArgs, cancel: &CancellationToken) -> Result<()> {
    if !path.is_file() {
        return Err(CliError::Input(format!(
            "{} is not an exported image archive",
            path.display()
        )));
    }
    utils::print_header(&format!("Reading {}", path.display()));

    let options = AnalyzeOptions::from_env().with_allow_partial(view.allow_partial);
    let analysis =
        strata::analyze_archive(path, &options, Arc::new(IndicatifProgress::new()), cancel)
            .await?;

    report::print(&analysis, view)
}
