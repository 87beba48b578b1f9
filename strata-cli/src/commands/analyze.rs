use std::sync::Arc;

use strata::progress::IndicatifProgress;
use strata::{AnalyzeOptions, DockerEngine};
use tokio_util::sync::CancellationToken;

use super::report;
use crate::ViewArgs;
use crate::error::{CliError, Result};
use crate::utils;

pub async fn execute(image: &str, view: &ViewArgs, cancel: &CancellationToken) -> Result<()> {
    if image.trim().is_empty() {
        return Err(CliError::Input("Image name is required".to_string()));
    }
    utils::print_header(&format!("Analyzing {image}"));

    let engine = DockerEngine::from_env()?;
    let options = AnalyzeOptions::from_env().with_allow_partial(view.allow_partial);
    let analysis = strata::analyze_image(
        &engine,
        image,
        &options,
        Arc::new(IndicatifProgress::new()),
        cancel,
    )
    .await?;

    report::print(&analysis, view)
}
