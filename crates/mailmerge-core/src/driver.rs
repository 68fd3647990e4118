//! File-level merge: template + data file in, merged document out

use crate::document::TemplateDocument;
use crate::error::{Error, Result};
use crate::merger::{apply_template, MergeContext, MergeSummary};
use crate::source::read_dataset;
use std::path::Path;
use tracing::info;

/// Merge `data` into `template` and write the result to `output`.
///
/// Everything is built in memory; `output` is only written once the merge
/// has succeeded.
pub fn merge_files<T, D, O>(
    template: T,
    data: D,
    output: O,
    context: &MergeContext,
) -> Result<MergeSummary>
where
    T: AsRef<Path>,
    D: AsRef<Path>,
    O: AsRef<Path>,
{
    let (template, data, output) = (template.as_ref(), data.as_ref(), output.as_ref());
    require_file(template)?;
    require_file(data)?;

    info!(
        "Merging data from {} and {} into {}",
        template.display(),
        data.display(),
        output.display()
    );

    let dataset = read_dataset(data)?;
    let mut document = TemplateDocument::open(template)?;
    let summary = apply_template(document.body_mut(), &dataset, context)?;
    document.write(output)?;

    info!("Done");
    Ok(summary)
}

fn require_file(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(Error::InputNotFound {
            path: path.to_path_buf(),
        })
    }
}
