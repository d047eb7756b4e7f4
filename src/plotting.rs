use crate::clustering::Dendrogram;
use log::info;
use plotters::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

custom_error::custom_error! { pub PlotError
    Render{message: String} = @{ format!("failed to render dendrogram: {}", message) },
    Io{source: std::io::Error} = @{ format!("failed to write dendrogram: {}", source) },
}

/// Paths of the artifacts written for one k
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DendrogramArtifacts {
    pub image: PathBuf,
    pub newick: PathBuf,
}

/// One dendrogram segment in (x, height) coordinates
type Segment = [(f64, f64); 2];

/// Layout of the dendrogram: leaves at x = 0, 1, 2, ... in leaf order, each
/// merge centred over its children. Computed in merge order, children are
/// always placed before their parent.
fn layout(dendrogram: &Dendrogram) -> Vec<Segment> {
    let n = dendrogram.n_leaves();
    let mut x = vec![0.0; n + dendrogram.linkage.len()];
    for (position, leaf) in dendrogram.leaf_order().into_iter().enumerate() {
        x[leaf] = position as f64;
    }

    let mut segments = Vec::with_capacity(3 * dendrogram.linkage.len());
    for step in 0..dendrogram.linkage.len() {
        let cluster = n + step;
        let Some((left, right)) = dendrogram.children(cluster) else {
            continue;
        };
        let height = dendrogram.height(cluster);
        x[cluster] = (x[left] + x[right]) / 2.0;

        // Vertical line from each child up to the merge, then the bar
        segments.push([(x[left], dendrogram.height(left)), (x[left], height)]);
        segments.push([(x[right], dendrogram.height(right)), (x[right], height)]);
        segments.push([(x[left], height), (x[right], height)]);
    }

    segments
}

/// Plot dendrogram to a PNG file
///
/// # Arguments
/// * `dendrogram` - The hierarchical clustering result
/// * `output_path` - Path to save the PNG file
/// * `title` - Title for the plot
pub fn plot_dendrogram(
    dendrogram: &Dendrogram,
    output_path: &Path,
    title: &str,
) -> Result<(), PlotError> {
    let render = |e: &dyn std::fmt::Display| PlotError::Render {
        message: e.to_string(),
    };
    let n_samples = dendrogram.n_leaves();
    let labels: Vec<String> = dendrogram
        .ordered_labels()
        .into_iter()
        .map(str::to_string)
        .collect();

    // Find max height for y-axis scaling
    let max_height = dendrogram
        .linkage
        .iter()
        .map(|(_, _, h, _)| *h)
        .fold(0.0, f64::max)
        .max(f64::EPSILON);

    let width = (n_samples as u32 * 40).max(1200);
    let root_area = BitMapBackend::new(output_path, (width, 800)).into_drawing_area();
    root_area.fill(&WHITE).map_err(|e| render(&e))?;

    let mut chart = ChartBuilder::on(&root_area)
        .caption(title, ("sans-serif", 40).into_font())
        .margin(20)
        .x_label_area_size(150)
        .y_label_area_size(60)
        .build_cartesian_2d(-0.5..(n_samples as f64 - 0.5), 0.0..(max_height * 1.1))
        .map_err(|e| render(&e))?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .y_desc("Ward distance")
        .x_labels(n_samples)
        .x_label_formatter(&|x| {
            let position = x.round();
            if position >= 0.0 && (x - position).abs() < 1e-6 {
                labels.get(position as usize).cloned().unwrap_or_default()
            } else {
                String::new()
            }
        })
        .draw()
        .map_err(|e| render(&e))?;

    chart
        .draw_series(
            layout(dendrogram)
                .into_iter()
                .map(|segment| PathElement::new(segment.to_vec(), BLUE.stroke_width(2))),
        )
        .map_err(|e| render(&e))?;

    root_area.present().map_err(|e| render(&e))?;

    Ok(())
}

/// Render `<k>_analyzed.png` and `<k>_analyzed.nwk` into `out_dir`
pub fn create_dendrogram(
    dendrogram: &Dendrogram,
    out_dir: &Path,
) -> Result<DendrogramArtifacts, PlotError> {
    let k = dendrogram.k;
    let artifacts = DendrogramArtifacts {
        image: out_dir.join(format!("{}_analyzed.png", k)),
        newick: out_dir.join(format!("{}_analyzed.nwk", k)),
    };
    let title = format!("Hierarchical Clustering Dendrogram (k={})", k);

    fs::write(&artifacts.newick, dendrogram.to_newick() + "\n")?;
    plot_dendrogram(dendrogram, &artifacts.image, &title)?;
    info!("Dendrogram saved to: {}", artifacts.image.display());

    Ok(artifacts)
}
