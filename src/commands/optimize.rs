use crate::config::{GridSpec, RunConfig};
use crate::data::load_bars_csv;
use crate::optimizer::{print_ranking, ParameterSearch};
use crate::report::export_ranking_csv;
use anyhow::Result;
use log::info;
use std::path::Path;

pub fn run(
    data_file: &Path,
    base: RunConfig,
    grid: GridSpec,
    top: usize,
    output: Option<&Path>,
) -> Result<()> {
    base.validate()?;
    let bars = load_bars_csv(data_file)?;

    let search = ParameterSearch::new(base, grid);
    let ranked = search.run(&bars)?;

    info!("Top {} of {} configurations:", top.min(ranked.len()), ranked.len());
    print_ranking(&ranked, top);

    if let Some(path) = output {
        export_ranking_csv(path, &ranked)?;
    }
    Ok(())
}
