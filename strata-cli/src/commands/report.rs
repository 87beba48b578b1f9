use tabled::{Table, Tabled};

use strata::ImageAnalysis;

use crate::ViewArgs;
use crate::error::{CliError, Result};
use crate::utils;

#[derive(Tabled)]
struct LayerRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Id")]
    id: String,
    #[tabled(rename = "Command")]
    command: String,
}

pub fn print(analysis: &ImageAnalysis, view: &ViewArgs) -> Result<()> {
    let rows: Vec<LayerRow> = analysis
        .layers
        .iter()
        .map(|layer| LayerRow {
            index: layer.index,
            size: match &layer.error {
                Some(_) => "unreadable".to_string(),
                None => utils::format_size(layer.history.size),
            },
            id: utils::truncate(&layer.history.id, 19),
            command: utils::truncate(layer.history.created_by.trim(), 60),
        })
        .collect();

    println!("{}", Table::new(rows));
    println!();

    let tags = analysis.manifest.repo_tags.join(", ");
    if !tags.is_empty() {
        utils::print_info(&format!("Tags: {tags}"));
    }
    utils::print_info(&format!(
        "{} layer(s), {} total",
        analysis.layers.len(),
        utils::format_size(analysis.total_size())
    ));

    for layer in analysis.layers.iter().filter(|l| !l.is_usable()) {
        utils::print_warning(&format!(
            "Layer {} is unusable: {}",
            layer.index,
            layer.error.as_deref().unwrap_or_default()
        ));
    }
    if !analysis.anomalies.is_empty() {
        utils::print_warning(&format!(
            "{} archive entries were skipped (set RUST_LOG=strata=debug for details)",
            analysis.anomalies.len()
        ));
    }

    if let Some(index) = view.tree {
        let layer = analysis.layers.get(index).ok_or_else(|| {
            CliError::Input(format!(
                "No layer with index {index}; the image has {} layer(s)",
                analysis.layers.len()
            ))
        })?;
        utils::print_header(&format!("Layer {index} file tree"));
        layer.tree.print(view.depth);
    }

    utils::print_success("Done");
    Ok(())
}
